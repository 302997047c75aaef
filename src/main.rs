//! Chronograph command-line interface
//!
//! Runs one SPARQL or DSL query against an engine built from a JSON
//! configuration file and prints the result table.
//!
//! Usage:
//!   chronograph --config engine.json --dsl 'Widget.Sensor aggregate mean 5s'
//!   chronograph --config engine.json --sparql query.rq --ipc-out result.arrows

use arrow::ipc::writer::StreamWriter;
use chronograph::{config::EngineConfig, Engine, ResultTable};
use clap::Parser;
use log::{info, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "chronograph")]
#[command(about = "Hybrid knowledge-graph and time-series query engine", long_about = None)]
struct Args {
    /// Engine configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// File holding a SPARQL SELECT query
    #[arg(long, conflicts_with = "dsl", required_unless_present = "dsl")]
    sparql: Option<PathBuf>,

    /// Path DSL query text
    #[arg(long)]
    dsl: Option<String>,

    /// Also write the result as an Arrow IPC stream
    #[arg(long)]
    ipc_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = EngineConfig::from_file(&args.config)?;
    let engine = Engine::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the running query");
            on_interrupt.cancel();
        }
    });

    let table = match (&args.sparql, &args.dsl) {
        (Some(path), _) => {
            let query = fs::read_to_string(path)?;
            engine.execute_hybrid_query_with_cancellation(&query, &cancel).await?
        }
        (None, Some(text)) => engine.execute_dsl_query_with_cancellation(text, &cancel).await?,
        (None, None) => return Err("either --sparql or --dsl is required".into()),
    };

    println!("{}", table);
    info!("{} row(s)", table.len());

    if let Some(path) = &args.ipc_out {
        write_ipc(&table, path)?;
        info!("Wrote Arrow IPC stream to {}", path.display());
    }
    Ok(())
}

fn write_ipc(table: &ResultTable, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let batch = table.to_record_batch()?;
    let mut writer = StreamWriter::try_new(File::create(path)?, &batch.schema())?;
    writer.write(&batch)?;
    writer.finish()?;
    Ok(())
}
