//! Upload checkpoint: pipeline + decision for one vehicle photo

use crate::domain::error::RegistryError;
use crate::domain::types::DecisionStatus;
use crate::infra::metrics::Metrics;
use crate::services::decision::{AccessDecisionEngine, Decision};
use crate::services::pipeline::{Extraction, PlateExtractionPipeline};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Response body of the detection endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub status: DecisionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_image: Option<String>,
    pub message: String,
    pub gate_triggered: bool,
}

impl UploadOutcome {
    fn new(extraction: Extraction, decision: Decision) -> Self {
        Self {
            status: decision.status,
            plate_text: decision.plate_text,
            employee_name: decision.employee_name,
            full_image: extraction.full_image,
            crop_image: extraction.crop_image,
            message: decision.message,
            gate_triggered: decision.gate_triggered,
        }
    }
}

pub struct Checkpoint {
    pipeline: PlateExtractionPipeline,
    engine: AccessDecisionEngine,
    metrics: Arc<Metrics>,
}

impl Checkpoint {
    pub fn new(
        pipeline: PlateExtractionPipeline,
        engine: AccessDecisionEngine,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { pipeline, engine, metrics }
    }

    pub fn pipeline(&self) -> &PlateExtractionPipeline {
        &self.pipeline
    }

    /// Run extraction only, without touching the registry or gate
    pub async fn extract_only(&self, image: Bytes) -> Extraction {
        self.pipeline.extract(image).await
    }

    pub async fn process_upload(&self, image: Bytes) -> Result<UploadOutcome, RegistryError> {
        let start = Instant::now();
        let extraction = self.pipeline.extract(image).await;
        let decided = self.engine.decide(extraction.plate_text.as_deref()).await;

        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_upload(latency_ms);

        let decision = match decided {
            Ok(decision) => decision,
            Err(e) => {
                self.metrics.record_registry_error();
                return Err(e);
            }
        };
        self.metrics.record_decision(decision.status);

        info!(
            status = %decision.status.as_str(),
            plate = ?decision.plate_text,
            gate_triggered = %decision.gate_triggered,
            latency_ms = %latency_ms,
            "upload_processed"
        );
        Ok(UploadOutcome::new(extraction, decision))
    }
}
