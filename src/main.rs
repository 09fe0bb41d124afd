//! Dbferry CLI - snapshot a relational database into paginated flat files,
//! and rebuild an indexed local store from a snapshot.

use clap::{Parser, Subcommand};
use dbferry::Event;
use dbferry::config::{self, ConfigFile};
use dbferry::import::fetch::FsSnapshotSource;
use dbferry::source::postgres::PostgresExecutor;
use dbferry::store::SqliteStoreEngine;
use dbferry::ui::ProgressRenderer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "dbferry")]
#[command(version = "0.1.0")]
#[command(about = "Snapshot a relational database to flat files and rebuild an indexed local store")]
#[command(long_about = r#"
Dbferry replicates a server-side database for offline/local consumption:
  • export introspects the schema, writes a manifest, and streams every
    table into newline-delimited record files
  • import rebuilds the snapshot into an indexed key/value store with
    transactional page commits

Example usage:
  dbferry export -d host=localhost -d dbname=app -o ./snapshot
  dbferry import --data-path ./snapshot --store-path app.db
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML config file with [export] / [import] sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a database into a directory of newline-delimited records
    Export {
        /// Connection parameter, key=value (repeatable)
        #[arg(short, long = "db", value_name = "KEY=VALUE")]
        db: Vec<String>,

        /// Restrict the export to one schema (unqualified table names)
        #[arg(short, long)]
        schema: Option<String>,

        /// Rows fetched per page
        #[arg(short, long)]
        results_per_page: Option<u64>,

        /// Snapshot output directory (cleared at run start)
        #[arg(short, long)]
        output_path: Option<PathBuf>,
    },

    /// Rebuild an indexed local store from a snapshot directory
    Import {
        /// Snapshot directory holding _manifest.json and record files
        #[arg(short, long)]
        data_path: Option<PathBuf>,

        /// Records committed per page
        #[arg(short, long)]
        items_per_page: Option<u64>,

        /// SQLite file for the reconstructed store
        #[arg(short = 'S', long, default_value = "dbferry.db")]
        store_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let file = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ConfigFile::default(),
    };

    match cli.command {
        Commands::Export {
            db,
            schema,
            results_per_page,
            output_path,
        } => {
            let mut conf = file.export.unwrap_or_default();
            for pair in db {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("expected key=value, got {}", pair))?;
                conf.db.insert(key.to_string(), value.to_string());
            }
            if schema.is_some() {
                conf.schema = schema;
            }
            if let Some(n) = results_per_page {
                conf.results_per_page = n;
            }
            if let Some(path) = output_path {
                conf.output_path = path;
            }
            if conf.output_path.as_os_str().is_empty() {
                anyhow::bail!("an output path is required (--output-path or [export] output_path)");
            }

            println!("🚀 Exporting into {:?}", conf.output_path);
            let executor = Arc::new(PostgresExecutor::connect(&conf.conn_params()).await?);
            let events = dbferry::export::run(conf, executor);
            finish(ProgressRenderer::new("exporting").render(events).await)
        }

        Commands::Import {
            data_path,
            items_per_page,
            store_path,
        } => {
            let mut conf = file.import.unwrap_or_default();
            if let Some(path) = data_path {
                conf.data_path = path;
            }
            if let Some(n) = items_per_page {
                conf.items_per_page = n;
            }
            if conf.data_path.as_os_str().is_empty() {
                anyhow::bail!("a data path is required (--data-path or [import] data_path)");
            }

            println!("🚀 Importing {:?} into {:?}", conf.data_path, store_path);
            let source = Arc::new(FsSnapshotSource::new(&conf.data_path));
            let engine = Arc::new(SqliteStoreEngine::open(&store_path)?);
            let events = dbferry::import::run(conf, source, engine);
            finish(ProgressRenderer::new("importing").render(events).await)
        }
    }
}

fn finish(terminal: Option<Event>) -> anyhow::Result<()> {
    match terminal {
        Some(Event::Success) => Ok(()),
        Some(Event::Error(reason)) => anyhow::bail!("run failed: {}", reason),
        _ => anyhow::bail!("event stream ended without a terminal event"),
    }
}
