//! Run the plate pipeline against a local image file
//!
//! Uses the configured detector and OCR endpoints and prints the outcome as
//! JSON. With --decide the registry lookup runs too (and a GRANTED result
//! appends to the configured database's access log).
//!
//! Usage:
//!   cargo run --bin plate_check -- car.jpg --config config/dev.toml
//!   cargo run --bin plate_check -- car.jpg --decide

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use plate_gate::infra::{Config, Metrics};
use plate_gate::io::{Registry, SqliteRegistry};
use plate_gate::services::GateStateMachine;
use std::sync::Arc;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plate_check")]
#[command(about = "Extract a plate from an image file and print the result")]
struct Args {
    /// Image file (JPEG or PNG)
    image: String,

    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Also run the access decision against the registry
    #[arg(long)]
    decide: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config).with_env_overrides();
    config.validate()?;

    let image = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("failed to read {}", args.image))?;

    let metrics = Arc::new(Metrics::new());
    let gate = GateStateMachine::new(config.gate_open_duration(), metrics.clone());
    let registry: Arc<dyn Registry> = if args.decide {
        Arc::new(SqliteRegistry::open(config.database())?)
    } else {
        Arc::new(SqliteRegistry::open_in_memory()?)
    };
    let checkpoint = plate_gate::build_checkpoint(&config, registry, gate, metrics)?;

    let output = if args.decide {
        serde_json::to_string_pretty(&checkpoint.process_upload(Bytes::from(image)).await?)?
    } else {
        serde_json::to_string_pretty(&checkpoint.extract_only(Bytes::from(image)).await)?
    };
    println!("{output}");
    Ok(())
}
