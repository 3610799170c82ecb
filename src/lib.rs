//! Plate gate library
//!
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;

use crate::infra::{Config, Metrics};
use crate::io::{
    ArtifactStore, DetectorHandle, HttpDetectorLoader, OcrSpaceClient, PlateRecognizer, Registry,
};
use crate::services::{
    AccessDecisionEngine, Checkpoint, GateStateMachine, PipelineSettings, PlateExtractionPipeline,
};
use anyhow::Context;
use std::sync::Arc;

/// Commit the build was stamped with by `build.rs` ("unknown" outside a checkout)
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Wire the pipeline and decision engine from config, with the HTTP
/// detector and OCR clients
pub fn build_checkpoint(
    config: &Config,
    registry: Arc<dyn Registry>,
    gate: GateStateMachine,
    metrics: Arc<Metrics>,
) -> anyhow::Result<Checkpoint> {
    let detector = Arc::new(DetectorHandle::new(
        HttpDetectorLoader::new(config)?,
        config.serialize_inference(),
    ));
    let recognizer: Arc<dyn PlateRecognizer> = Arc::new(OcrSpaceClient::new(config)?);
    let artifacts = ArtifactStore::new(config.upload_dir())
        .with_context(|| format!("upload dir {}", config.upload_dir()))?;

    let pipeline = PlateExtractionPipeline::new(
        detector,
        recognizer,
        artifacts,
        PipelineSettings::from_config(config),
        metrics.clone(),
    );
    let engine = AccessDecisionEngine::new(registry, gate, config.min_plate_len());
    Ok(Checkpoint::new(pipeline, engine, metrics))
}
