//! bibload CLI - load catalogue records into a relational store
//!
//! Validates loader specs against a table schema and loads MARC-in-JSON
//! record files through them.

use bibload::diesel_runtime::{Database, DatabaseConfig};
use bibload::runtime::{BatchReport, ErrorPolicy, LoaderOptions, LoaderSpec, RecursiveLoader, TransactionScope};
use bibload::store::{Backend, MemoryBackend, MergeOrInsert, SchemaRegistry};
use bibload::reader::read_records;
use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bibload")]
#[command(version, about = "Configuration-driven loader for tag-addressed catalogue records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a loader spec, and optionally check it against a table schema
    Validate {
        /// Path to the loader spec YAML
        #[arg(short, long, default_value = "config/loader.yaml")]
        spec: PathBuf,

        /// Path to the table schema YAML
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Load a record file through a loader spec
    Load {
        /// Path to the loader spec YAML
        #[arg(short, long, default_value = "config/loader.yaml")]
        spec: PathBuf,

        /// Path to the table schema YAML
        #[arg(long, default_value = "config/schema.yaml")]
        schema: PathBuf,

        /// MARC-in-JSON record file
        #[arg(short, long)]
        input: PathBuf,

        /// Database URL (defaults to DATABASE_URL)
        #[arg(long)]
        database_url: Option<String>,

        /// Load into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,

        /// What to do when a record fails
        #[arg(long, value_enum, default_value = "abort")]
        on_error: OnError,

        /// Commit or roll back all rows of a record together
        #[arg(long)]
        per_record_transactions: bool,

        /// Maximum size of the connection pool
        #[arg(long, default_value_t = 4)]
        max_connections: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OnError {
    Abort,
    Skip,
}

impl From<OnError> for ErrorPolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Abort => ErrorPolicy::Abort,
            OnError::Skip => ErrorPolicy::Skip,
        }
    }
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { spec, schema } => validate(spec, schema),
        Commands::Load {
            spec,
            schema,
            input,
            database_url,
            dry_run,
            on_error,
            per_record_transactions,
            max_connections,
        } => {
            let options = LoaderOptions {
                on_error: on_error.into(),
                transaction_scope: if per_record_transactions {
                    TransactionScope::PerRecord
                } else {
                    TransactionScope::PerRow
                },
            };
            let target = if dry_run {
                Target::Memory
            } else {
                Target::Database {
                    url: database_url,
                    max_connections,
                }
            };
            load(spec, schema, input, target, options)
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

/// Validate a spec and, when given, its fit against a schema
fn validate(spec_path: PathBuf, schema_path: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let spec = LoaderSpec::load_from_file(&spec_path)?;
    info!(spec = %spec_path.display(), tables = ?spec.tables(), "loader spec is valid");

    if let Some(schema_path) = schema_path {
        let schemas = SchemaRegistry::load_from_file(&schema_path)?;
        spec.validate_against(&schemas)?;
        info!(schema = %schema_path.display(), "loader spec matches schema");
    }
    Ok(())
}

enum Target {
    Memory,
    Database { url: Option<String>, max_connections: u32 },
}

fn load(
    spec_path: PathBuf,
    schema_path: PathBuf,
    input: PathBuf,
    target: Target,
    options: LoaderOptions,
) -> Result<(), Box<dyn Error>> {
    let spec = LoaderSpec::load_from_file(&spec_path)?;
    let schemas = SchemaRegistry::load_from_file(&schema_path)?;
    spec.validate_against(&schemas)?;
    let records = read_records(&input)?;

    let report = match target {
        Target::Memory => {
            info!("dry run: loading into an in-memory store");
            run(&spec, MemoryBackend::new(), schemas, &records, options)?
        }
        Target::Database { url, max_connections } => {
            let url = match url {
                Some(url) => url,
                None => std::env::var("DATABASE_URL").map_err(|_| "no --database-url given and DATABASE_URL is not set")?,
            };
            let config = DatabaseConfig {
                max_connections,
                ..DatabaseConfig::default()
            };
            let database = Database::new_with_config(&url, config)?;
            database.test_connection()?;
            run(&spec, database.backend()?, schemas, &records, options)?
        }
    };

    info!(
        total = report.records_total,
        loaded = report.records_loaded,
        failed = report.failures.len(),
        created = report.stats.rows_created,
        reused = report.stats.rows_reused,
        skipped = report.stats.rows_skipped,
        "load complete"
    );
    for failure in &report.failures {
        error!(index = failure.index, "{}", failure.message);
    }
    Ok(())
}

fn run<B: Backend>(
    spec: &LoaderSpec,
    backend: B,
    schemas: SchemaRegistry,
    records: &[bibload::record::Record],
    options: LoaderOptions,
) -> Result<BatchReport, Box<dyn Error>> {
    let store = MergeOrInsert::new(backend, schemas).with_text_match(spec.config().text_match);
    let mut loader = RecursiveLoader::new(spec, store).with_options(options);
    Ok(loader.load_records(records)?)
}
