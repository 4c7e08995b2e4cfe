/// docpath - run path operations against a JSON document
///
/// The document is loaded into an in-memory record and every command prints
/// its result together with the document as it stands afterwards.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use docpath::config::{ClientConfig, ConfigError, LogFormat};
use docpath::executor::{BatchItem, DocumentClient, ItemResult};
use docpath::store::{MemoryStore, SystemClock};
use docpath::DocumentError;

/// docpath - JSONPath-addressed reads and writes on a JSON document
#[derive(Parser, Debug)]
#[command(name = "docpath")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON document to load into the record
    #[arg(short = 'd', long = "document", value_name = "FILE", global = true)]
    document: Option<PathBuf>,

    /// Record field holding the document
    #[arg(short = 'f', long = "field", default_value = "doc", global = true)]
    field: String,

    /// User key of the record
    #[arg(short = 'k', long = "key", default_value = "1", global = true)]
    key: String,

    /// Path to configuration file (JSON)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read the value(s) at a path
    Get { path: String },
    /// Set the value at a path
    Put { path: String, value: String },
    /// Append a value to the list(s) at a path
    Append { path: String, value: String },
    /// Remove the value(s) at a path
    Delete { path: String },
    /// Run a JSON array of batch items
    Batch { file: PathBuf },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {what}: {source}")]
    Json {
        what: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Document(#[from] DocumentError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match ClientConfig::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {}", err);
                return ExitCode::FAILURE;
            }
        },
        None => ClientConfig::default(),
    };
    init_logging(&config);

    match run(&cli, config) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: ClientConfig) -> Result<Value, CliError> {
    let document = match &cli.document {
        Some(path) => parse_json(&read_file(path)?, &path.display().to_string())?,
        None => Value::Object(Map::new()),
    };

    let clock = SystemClock;
    let seed_key = docpath::Key::new(&config.namespace, &config.set_name, &cli.key);
    let store = MemoryStore::new().with_record(seed_key.clone(), [(cli.field.clone(), document)]);
    let client = DocumentClient::new(&store, &clock, config);
    let field = cli.field.as_str();

    debug!(key = %seed_key, field, "seeded record");
    let result = match &cli.command {
        Commands::Get { path } => client.get_one(&seed_key, field, path)?,
        Commands::Put { path, value } => {
            client.put(&seed_key, &[field], path, &parse_json(value, "value")?)?;
            Value::Null
        }
        Commands::Append { path, value } => {
            client.append(&seed_key, &[field], path, &parse_json(value, "value")?)?;
            Value::Null
        }
        Commands::Delete { path } => {
            client.delete(&seed_key, &[field], path)?;
            Value::Null
        }
        Commands::Batch { file } => {
            let items: Vec<BatchItem> = serde_json::from_str(&read_file(file)?).map_err(|source| {
                CliError::Json {
                    what: file.display().to_string(),
                    source,
                }
            })?;
            let results = client.batch_perform(items);
            Value::Array(results.iter().map(item_json).collect())
        }
    };

    Ok(json!({
        "result": result,
        "document": store.bin(&seed_key, field).unwrap_or(Value::Null),
    }))
}

fn item_json(result: &ItemResult) -> Value {
    let fields: Map<String, Value> = result
        .fields
        .iter()
        .map(|(name, outcome)| {
            let entry = match outcome {
                Ok(value) => json!({ "ok": value }),
                Err(err) => json!({ "error": err.to_string() }),
            };
            (name.clone(), entry)
        })
        .collect();
    json!({
        "key": result.key,
        "state": result.state,
        "fields": fields,
    })
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse_json(text: &str, what: &str) -> Result<Value, CliError> {
    serde_json::from_str(text).map_err(|source| CliError::Json {
        what: what.to_string(),
        source,
    })
}

fn init_logging(config: &ClientConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let layer = fmt::layer().with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .init(),
    }
}
