use crate::schema::SchemaDescription;

pub const SQL_SYSTEM_PROMPT: &str =
    "you are a sql expert generating sqlite queries against a single table. \
     output only the raw sql query. no markdown, no backticks, no commentary, \
     no trailing semicolon.";

pub const INTENT_SYSTEM_PROMPT: &str =
    "you extract search terms from database questions. \
     output only a json object, no markdown.";

pub fn build_generation_prompt(
    request: &str,
    schema: &SchemaDescription,
    keywords: &[String],
    feedback: &str,
) -> String {
    let feedback = if feedback.trim().is_empty() {
        "None"
    } else {
        feedback
    };

    let context = if keywords.is_empty() {
        String::new()
    } else {
        format!(
            "query context: based on your question about {}, the relevant columns are {}.\n\n",
            keywords.join(", "),
            schema.column_names().join(", ")
        )
    };

    format!(
        "generate a valid sqlite query for the user's request.\n\n\
         table: {table}\n\
         schema:\n{columns}\n\n\
         {context}\
         user query: {request}\n\
         validator feedback: {feedback}\n\n\
         instructions:\n\
         - return only the raw sql query with no extra text, explanations or prefixes.\n\
         - do not include markdown code blocks or backticks.\n\
         - do not end the query with a semicolon.\n\
         - use only the columns listed above.\n\
         - if feedback is provided, fix the issues it mentions.\n\
         - when asked about desserts, filter by course = 'dessert'.\n\n\
         example: SELECT name, state FROM {table} WHERE course = 'dessert' AND prep_time < 30",
        table = schema.table,
        columns = schema.render_columns(),
        context = context,
        request = request,
        feedback = feedback,
    )
}

pub fn build_intent_prompt(request: &str, domains: &[String]) -> String {
    format!(
        "analyze this question and extract information for a database search.\n\n\
         question: \"{}\"\n\n\
         1. extract key keywords, entities and concepts.\n\
         2. identify business domains, for example: {}.\n\
         3. focus on ingredients, regions, states, preparation time, cooking time, diet and flavors.\n\n\
         return only a json object shaped like:\n\
         {{\"keywords\": [\"keyword1\", \"keyword2\"], \"domains\": [\"domain1\"]}}",
        request,
        domains.join(", ")
    )
}
