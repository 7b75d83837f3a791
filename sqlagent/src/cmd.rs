use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use common::config::AgentConfig;
use common::llm::{GeminiOracle, Oracle, ScriptedOracle};
use common::schema::SchemaDescription;
use common::store::{load_csv, SqliteStore};
use common::telemetry::init_tracing;
use common::AgentLoop;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sqlagent")]
#[command(about = "ask questions about a sqlite table in plain language", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TableArgs {
    /// SQLite database file
    #[arg(long, env = "SQLAGENT_DATABASE")]
    database: Option<PathBuf>,

    /// Table the questions are about
    #[arg(long, env = "SQLAGENT_TABLE")]
    table: Option<String>,

    /// Column metadata JSON (default: read columns from the database)
    #[arg(long, env = "SQLAGENT_SCHEMA")]
    schema: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question by generating, validating and running a query
    Ask {
        /// Question in plain language (prompted on stdin when omitted)
        question: Option<String>,

        #[command(flatten)]
        target: TableArgs,

        /// Generation attempts before the last candidate is run anyway
        #[arg(long, env = "SQLAGENT_MAX_ITERATIONS")]
        max_iterations: Option<usize>,

        /// Narrow the schema shown to the model by keyword retrieval
        #[arg(long, default_value = "false")]
        retrieval: bool,

        /// Replay model replies from a JSON array of strings instead of calling Gemini
        #[arg(long, env = "SQLAGENT_ORACLE_SCRIPT")]
        oracle_script: Option<PathBuf>,

        /// Print the whole session report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
    /// Create or replace a table from a CSV file
    Load {
        /// Input CSV file with a header row
        #[arg(short, long)]
        csv: PathBuf,

        #[command(flatten)]
        target: TableArgs,
    },
    /// Print the schema description the model sees
    Schema {
        #[command(flatten)]
        target: TableArgs,

        #[arg(long, default_value = "false")]
        json: bool,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let _guard = init_tracing("sqlagent")?;

        match self.command {
            Commands::Ask {
                question,
                target,
                max_iterations,
                retrieval,
                oracle_script,
                json,
            } => {
                let mut config = resolve_config(target)?;
                if let Some(n) = max_iterations {
                    config.max_iterations = n;
                }
                config.use_retrieval |= retrieval;

                ask(config, question, oracle_script, json).await
            }
            Commands::Load { csv, target } => {
                let config = resolve_config(target)?;
                let rows = load_csv(&csv, &config.database_path, &config.table)?;
                println!(
                    "loaded {} rows into {} ({})",
                    rows,
                    config.table,
                    config.database_path.display()
                );
                Ok(())
            }
            Commands::Schema { target, json } => {
                let config = resolve_config(target)?;
                let schema = load_schema(&config)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&schema)?);
                } else {
                    println!("table: {}", schema.table);
                    if !schema.description.is_empty() {
                        println!("{}", schema.description);
                    }
                    println!("{}", schema.render_columns());
                }
                Ok(())
            }
        }
    }
}

/// environment and defaults first, then whatever the flags say
fn resolve_config(target: TableArgs) -> Result<AgentConfig> {
    let mut config = AgentConfig::from_env()?;
    if let Some(database) = target.database {
        config.database_path = database;
    }
    if let Some(table) = target.table {
        config.table = table;
    }
    if target.schema.is_some() {
        config.schema_path = target.schema;
    }
    Ok(config)
}

fn load_schema(config: &AgentConfig) -> Result<SchemaDescription> {
    let schema = match &config.schema_path {
        Some(path) => SchemaDescription::load(path, &config.table)?,
        None => {
            let store = SqliteStore::new(&config.database_path, config.query_timeout);
            SchemaDescription::from_store(&store, &config.table)?
        }
    };
    Ok(schema)
}

fn read_question() -> Result<String> {
    print!("Enter your query: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn ask(
    config: AgentConfig,
    question: Option<String>,
    oracle_script: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let question = match question {
        Some(q) => q.trim().to_string(),
        None => read_question()?,
    };
    if question.is_empty() {
        bail!("no question given");
    }

    let schema = Arc::new(load_schema(&config)?);

    let oracle: Arc<dyn Oracle> = match oracle_script {
        Some(path) => {
            tracing::info!("replaying oracle replies from {}", path.display());
            Arc::new(ScriptedOracle::from_json_file(&path)?)
        }
        None => Arc::new(GeminiOracle::new(&config.oracle, config.oracle_timeout)?),
    };

    let agent = AgentLoop::new(config, oracle, schema)?;
    let report = agent.ask(&question).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.forced {
        tracing::warn!(
            "no candidate passed validation after {} attempts; last feedback: {}",
            report.iterations,
            report.feedback
        );
    }
    println!("Final Query: {}", report.final_query);
    println!("Final Result: {}", report.result);

    Ok(())
}
