use super::description::SchemaDescription;
use std::collections::HashSet;

/// narrows the schema shown to the oracle down to the columns relevant to a request
pub trait SchemaRetriever: Send + Sync {
    /// column names ranked by relevance, at most `limit`
    fn retrieve(&self, terms: &[String], limit: usize) -> Vec<String>;
}

struct ColumnDocument {
    column: String,
    tokens: HashSet<String>,
}

/// term-overlap retriever over one document per column
pub struct KeywordRetriever {
    documents: Vec<ColumnDocument>,
}

impl KeywordRetriever {
    pub fn build(schema: &SchemaDescription) -> Self {
        let documents = schema
            .columns
            .iter()
            .map(|column| {
                let mut text = format!(
                    "{} {} {} {}",
                    column.name, column.column_type, column.description, schema.table
                );
                if let Some(examples) = &column.examples {
                    text.push(' ');
                    text.push_str(&examples.to_string());
                }

                let mut tokens = tokenize(&text);
                // `prep_time` should also answer to `prep` and `time`
                tokens.extend(tokenize(&column.name.replace('_', " ")));
                tokens.insert(column.name.to_lowercase());

                ColumnDocument {
                    column: column.name.clone(),
                    tokens,
                }
            })
            .collect();

        Self { documents }
    }
}

impl SchemaRetriever for KeywordRetriever {
    fn retrieve(&self, terms: &[String], limit: usize) -> Vec<String> {
        let query: HashSet<String> = terms.iter().flat_map(|t| tokenize(t)).collect();

        let mut scored: Vec<(usize, usize)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(idx, doc)| (idx, query.intersection(&doc.tokens).count()))
            .filter(|(_, score)| *score > 0)
            .collect();

        // stable sort keeps schema order among equal scores
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        scored
            .into_iter()
            .take(limit)
            .map(|(idx, _)| self.documents[idx].column.clone())
            .collect()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 2)
        .collect()
}

/// schema for the generation prompt; falls back to the full schema when
/// no retriever is configured or nothing matched
pub fn relevant_schema(
    schema: &SchemaDescription,
    retriever: Option<&dyn SchemaRetriever>,
    terms: &[String],
    limit: usize,
) -> SchemaDescription {
    let Some(retriever) = retriever else {
        return schema.clone();
    };

    let columns = retriever.retrieve(terms, limit);
    if columns.is_empty() {
        tracing::warn!("retrieval found no relevant columns, using full schema");
        return schema.clone();
    }

    tracing::info!(columns = ?columns, "retrieved relevant schema");
    schema.subset(&columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::description::tests::desserts_schema;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_retrieve_by_description() {
        let schema = desserts_schema();
        let retriever = KeywordRetriever::build(&schema);

        let columns = retriever.retrieve(&terms(&["preparation", "minutes"]), 5);
        assert_eq!(columns.first().map(String::as_str), Some("prep_time"));
    }

    #[test]
    fn test_retrieve_respects_limit() {
        let schema = desserts_schema();
        let retriever = KeywordRetriever::build(&schema);

        let columns = retriever.retrieve(&terms(&["indian_desserts"]), 2);
        assert_eq!(columns.len(), 2);
    }

    #[test]
    fn test_relevant_schema_falls_back_without_matches() {
        let schema = desserts_schema();
        let retriever = KeywordRetriever::build(&schema);

        let narrowed = relevant_schema(&schema, Some(&retriever), &terms(&["zzz"]), 5);
        assert_eq!(narrowed, schema);

        let unconfigured = relevant_schema(&schema, None, &terms(&["state"]), 5);
        assert_eq!(unconfigured, schema);
    }

    #[test]
    fn test_relevant_schema_narrows() {
        let schema = desserts_schema();
        let retriever = KeywordRetriever::build(&schema);

        let narrowed = relevant_schema(&schema, Some(&retriever), &terms(&["state", "origin"]), 5);
        assert_eq!(narrowed.column_names(), vec!["state"]);
    }
}
