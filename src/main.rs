//! Plate gate - license-plate driven vehicle gate service
//!
//! Accepts vehicle photos over HTTP, reads the plate, checks it against the
//! employee registry and opens the gate for registered vehicles.
//!
//! Module structure:
//! - `domain/` - Core types (plates, log entries, errors)
//! - `io/` - External interfaces (detector, OCR, SQLite, HTTP API)
//! - `services/` - Business logic (pipeline, decision engine, gate)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use plate_gate::infra::{Config, Metrics};
use plate_gate::io::{start_api_server, ApiState, Registry, SqliteRegistry};
use plate_gate::services::GateStateMachine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Plate gate - automated vehicle access control
#[derive(Parser, Debug)]
#[command(name = "plate-gate", version, about)]
struct Args {
    /// Path to TOML configuration file (else $CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls the level, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %plate_gate::GIT_HASH, "plate-gate starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path).with_env_overrides();
    if let Err(e) = config.validate() {
        error!(error = %e, config_file = %config.config_file(), "invalid_config");
        std::process::exit(2);
    }

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind = %config.bind_address(),
        port = %config.port(),
        database = %config.database(),
        upload_dir = %config.upload_dir(),
        detector = %config.detector_endpoint(),
        model = %config.detector_model(),
        confidence_threshold = %config.confidence_threshold(),
        recognizer = %config.recognizer_endpoint(),
        ocr_key_set = %!config.recognizer_api_key().is_empty(),
        crop_width_ratio = %config.crop_width_ratio(),
        gate_open_ms = %config.gate_open_duration().as_millis(),
        "config_loaded"
    );

    let registry: Arc<dyn Registry> = match SqliteRegistry::open(config.database()) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!(error = %e, database = %config.database(), "registry_open_failed");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let gate = GateStateMachine::new(config.gate_open_duration(), metrics.clone());

    let checkpoint =
        Arc::new(plate_gate::build_checkpoint(&config, registry.clone(), gate.clone(), metrics.clone())?);

    // Actuator signal: the gate relay would follow this channel
    let mut gate_rx = gate.subscribe();
    tokio::spawn(async move {
        while gate_rx.changed().await.is_ok() {
            let open = *gate_rx.borrow_and_update();
            info!(open = %open, "gate_signal");
        }
    });

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics_clone.report().log();
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let addr: SocketAddr = format!("{}:{}", config.bind_address(), config.port()).parse()?;
    let state = Arc::new(ApiState::new(&config, checkpoint, registry, gate, metrics));
    start_api_server(addr, state, shutdown_rx).await?;

    info!("plate-gate shutdown complete");
    Ok(())
}
