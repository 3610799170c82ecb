//! Plate extraction pipeline
//!
//! image -> persist raw -> decode -> detect -> annotated JPEG -> per box:
//! crop, keep left part, persist crop, OCR under timeout, normalize.
//! The first candidate that survives the length filter wins.
//!
//! Detector and recognizer failures are absorbed here and logged. `extract`
//! never fails; the worst outcome is an `Extraction` with no plate text.

use crate::domain::error::VisionError;
use crate::domain::types::{plate_candidate, BoundingBox, CropRect};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::artifacts::{
    encode_jpeg, sniff_extension, swap_extension, ArtifactKind, ArtifactStore,
};
use crate::io::detector::DetectorHandle;
use crate::io::recognizer::PlateRecognizer;
use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

/// Tunables for one pipeline instance
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    pub crop_width_ratio: f32,
    pub min_plate_len: usize,
    pub ocr_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold(),
            crop_width_ratio: config.crop_width_ratio(),
            min_plate_len: config.min_plate_len(),
            ocr_timeout: config.recognizer_timeout(),
        }
    }
}

/// Pipeline output. Artifact fields are names inside the artifact store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extraction {
    pub plate_text: Option<String>,
    pub full_image: Option<String>,
    pub crop_image: Option<String>,
}

pub struct PlateExtractionPipeline {
    detector: Arc<DetectorHandle>,
    recognizer: Arc<dyn PlateRecognizer>,
    artifacts: ArtifactStore,
    settings: PipelineSettings,
    metrics: Arc<Metrics>,
}

impl PlateExtractionPipeline {
    pub fn new(
        detector: Arc<DetectorHandle>,
        recognizer: Arc<dyn PlateRecognizer>,
        artifacts: ArtifactStore,
        settings: PipelineSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { detector, recognizer, artifacts, settings, metrics }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub async fn extract(&self, image: Bytes) -> Extraction {
        let start = Instant::now();
        if image.is_empty() {
            warn!(error = %VisionError::InvalidUpload("empty body".into()), "upload_rejected");
            return Extraction::default();
        }

        // Raw bytes keep their own format until a decoded JPEG replaces them
        let full_name = self.artifacts.new_name(ArtifactKind::Full);
        let raw_name = swap_extension(&full_name, sniff_extension(&image));
        let mut extraction = Extraction::default();
        match self.artifacts.write(&raw_name, &image).await {
            Ok(()) => extraction.full_image = Some(raw_name.clone()),
            Err(e) => warn!(error = %format!("{e:#}"), "artifact_write_failed"),
        }

        let decoded = match decode(image.clone()).await {
            Ok(decoded) => Arc::new(decoded),
            Err(e) => {
                warn!(error = %e, bytes = %image.len(), "upload_rejected");
                return extraction;
            }
        };

        let (boxes, detector_ok) =
            match self.detector.detect(image, self.settings.confidence_threshold).await {
                Ok(boxes) => (boxes, true),
                Err(e) => {
                    self.metrics.record_detector_failure();
                    warn!(error = %e, "detector_failed");
                    (Vec::new(), false)
                }
            };

        if self.write_annotated(&full_name, decoded.clone(), boxes.clone()).await {
            if raw_name != full_name && extraction.full_image.is_some() {
                self.artifacts.remove(&raw_name).await;
            }
            extraction.full_image = Some(full_name);
        }

        if !detector_ok {
            return extraction;
        }
        if boxes.is_empty() {
            debug!(latency_ms = %start.elapsed().as_millis(), "no_plate_boxes");
            return extraction;
        }

        let (width, height) = (decoded.width(), decoded.height());
        let crop_name = self.artifacts.new_name(ArtifactKind::Crop);

        for (index, bbox) in boxes.iter().enumerate() {
            let Some(rect) = bbox
                .to_crop_rect(width, height)
                .and_then(|rect| rect.keep_left(self.settings.crop_width_ratio))
            else {
                debug!(box_index = %index, "crop_skipped_zero_area");
                continue;
            };

            let crop_jpeg = match encode_crop(decoded.clone(), rect).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(box_index = %index, error = %format!("{e:#}"), "crop_encode_failed");
                    continue;
                }
            };

            match self.artifacts.write(&crop_name, &crop_jpeg).await {
                Ok(()) => extraction.crop_image = Some(crop_name.clone()),
                Err(e) => warn!(error = %format!("{e:#}"), "artifact_write_failed"),
            }

            let raw = self.recognize(index, Bytes::from(crop_jpeg)).await;
            if let Some(plate) =
                raw.as_deref().and_then(|text| plate_candidate(text, self.settings.min_plate_len))
            {
                info!(
                    plate = %plate,
                    box_index = %index,
                    score = %bbox.score,
                    latency_ms = %start.elapsed().as_millis(),
                    "plate_extracted"
                );
                extraction.plate_text = Some(plate);
                return extraction;
            }
            debug!(box_index = %index, raw = ?raw, "plate_candidate_discarded");
        }

        debug!(
            boxes = %boxes.len(),
            latency_ms = %start.elapsed().as_millis(),
            "no_plate_candidate"
        );
        extraction
    }

    /// One OCR attempt; any failure means "no text from this crop"
    async fn recognize(&self, index: usize, crop: Bytes) -> Option<String> {
        let timeout = self.settings.ocr_timeout;
        match tokio::time::timeout(timeout, self.recognizer.recognize(crop)).await {
            Ok(Ok(text)) => {
                self.metrics.record_ocr_request(false);
                text
            }
            Ok(Err(e)) => {
                self.metrics.record_ocr_request(true);
                warn!(box_index = %index, error = %e, "ocr_failed");
                None
            }
            Err(_) => {
                self.metrics.record_ocr_request(true);
                let e = VisionError::RecognitionTimeout(timeout.as_millis() as u64);
                warn!(box_index = %index, error = %e, "ocr_failed");
                None
            }
        }
    }

    /// Re-encode the full image as JPEG with the boxes drawn on it. Returns
    /// whether the artifact was written.
    async fn write_annotated(
        &self,
        name: &str,
        image: Arc<DynamicImage>,
        boxes: Vec<BoundingBox>,
    ) -> bool {
        let encoded = tokio::task::spawn_blocking(move || {
            let mut canvas = image.to_rgb8();
            for bbox in &boxes {
                if let Some(rect) = bbox.to_crop_rect(canvas.width(), canvas.height()) {
                    draw_rect_outline(&mut canvas, rect, BOX_COLOR, BOX_THICKNESS);
                }
            }
            encode_jpeg(&DynamicImage::ImageRgb8(canvas))
        })
        .await;

        let result = match encoded {
            Ok(Ok(bytes)) => self.artifacts.write(name, &bytes).await,
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "annotation_failed");
                false
            }
        }
    }
}

async fn decode(bytes: Bytes) -> Result<DynamicImage, VisionError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| VisionError::InvalidUpload(e.to_string()))?
        .map_err(|e| VisionError::InvalidUpload(e.to_string()))
}

async fn encode_crop(image: Arc<DynamicImage>, rect: CropRect) -> anyhow::Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let crop = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        encode_jpeg(&crop)
    })
    .await?
}

/// Draw a rectangle outline, clipped to the canvas
fn draw_rect_outline(canvas: &mut RgbImage, rect: CropRect, color: Rgb<u8>, thickness: u32) {
    let (w, h) = canvas.dimensions();
    let x_end = (rect.x + rect.width).min(w);
    let y_end = (rect.y + rect.height).min(h);

    for t in 0..thickness {
        let top = rect.y + t;
        let bottom = y_end.saturating_sub(1 + t);
        for x in rect.x..x_end {
            if top < h {
                canvas.put_pixel(x, top, color);
            }
            if bottom >= rect.y {
                canvas.put_pixel(x, bottom, color);
            }
        }

        let left = rect.x + t;
        let right = x_end.saturating_sub(1 + t);
        for y in rect.y..y_end {
            if left < w {
                canvas.put_pixel(left, y, color);
            }
            if right >= rect.x {
                canvas.put_pixel(right, y, color);
            }
        }
    }
}
