//! Plate detector adapter
//!
//! `DetectorHandle` wraps a `DetectorLoader` in a `tokio::sync::OnceCell`:
//! the model is loaded at most once even under concurrent first use, and a
//! failed load is not cached so the next request retries.
//!
//! `HttpDetector` talks to an object-detection inference server:
//! - `GET  {endpoint}/models/{model}` - readiness probe, used as the load step
//! - `POST {endpoint}/detect?model=..&conf=..` - raw image body, returns
//!   `{"boxes": [{"x1", "y1", "x2", "y2", "score"}]}`

use crate::domain::error::VisionError;
use crate::domain::types::BoundingBox;
use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Object-detection capability: image in, boxes with scores out
#[async_trait]
pub trait PlateDetector: Send + Sync {
    async fn detect(
        &self,
        image: Bytes,
        confidence_threshold: f32,
    ) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Produces a ready detector (loads weights, probes a server, ...)
#[async_trait]
pub trait DetectorLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn PlateDetector>, VisionError>;
}

/// Lazily initialized, shared detector
pub struct DetectorHandle {
    loader: Box<dyn DetectorLoader>,
    cell: OnceCell<Arc<dyn PlateDetector>>,
    /// Held around inference when the backend is not known to be thread-safe
    inference_lock: Option<Mutex<()>>,
}

impl DetectorHandle {
    pub fn new(loader: impl DetectorLoader + 'static, serialize_inference: bool) -> Self {
        Self {
            loader: Box::new(loader),
            cell: OnceCell::new(),
            inference_lock: serialize_inference.then(|| Mutex::new(())),
        }
    }

    /// Wrap an already constructed detector (still goes through the once-cell)
    pub fn from_detector(detector: Arc<dyn PlateDetector>) -> Self {
        Self::new(ReadyLoader(detector), false)
    }

    /// Get the detector, loading it on first use
    pub async fn get(&self) -> Result<Arc<dyn PlateDetector>, VisionError> {
        self.cell
            .get_or_try_init(|| async {
                let start = Instant::now();
                let detector = self.loader.load().await?;
                info!(load_ms = %start.elapsed().as_millis(), "detector_loaded");
                Ok::<_, VisionError>(detector)
            })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Run detection, keeping only boxes at or above the threshold
    pub async fn detect(
        &self,
        image: Bytes,
        confidence_threshold: f32,
    ) -> Result<Vec<BoundingBox>, VisionError> {
        let detector = self.get().await?;

        let _guard = match &self.inference_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let boxes = detector.detect(image, confidence_threshold).await?;
        let total = boxes.len();
        let kept: Vec<BoundingBox> =
            boxes.into_iter().filter(|b| b.score >= confidence_threshold).collect();

        debug!(total = %total, kept = %kept.len(), threshold = %confidence_threshold, "detector_boxes");
        Ok(kept)
    }
}

struct ReadyLoader(Arc<dyn PlateDetector>);

#[async_trait]
impl DetectorLoader for ReadyLoader {
    async fn load(&self) -> Result<Arc<dyn PlateDetector>, VisionError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    boxes: Vec<BoundingBox>,
}

/// Loader for a remote inference server
pub struct HttpDetectorLoader {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpDetectorLoader {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(config.detector_timeout())
            .build()
            .context("failed to build detector HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.detector_endpoint().trim_end_matches('/').to_string(),
            model: config.detector_model().to_string(),
        })
    }
}

#[async_trait]
impl DetectorLoader for HttpDetectorLoader {
    async fn load(&self) -> Result<Arc<dyn PlateDetector>, VisionError> {
        let url = format!("{}/models/{}", self.endpoint, self.model);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "detector_probe_failed");
            VisionError::ModelUnavailable(e.to_string())
        })?;

        if !response.status().is_success() {
            warn!(url = %url, status = %response.status().as_u16(), "detector_model_not_ready");
            return Err(VisionError::ModelUnavailable(format!(
                "model {} not ready: HTTP {}",
                self.model,
                response.status()
            )));
        }

        Ok(Arc::new(HttpDetector {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
        }))
    }
}

/// Detector backed by a remote inference server
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[async_trait]
impl PlateDetector for HttpDetector {
    async fn detect(
        &self,
        image: Bytes,
        confidence_threshold: f32,
    ) -> Result<Vec<BoundingBox>, VisionError> {
        let url = format!("{}/detect", self.endpoint);
        let conf = confidence_threshold.to_string();

        let response = self
            .client
            .post(&url)
            .query(&[("model", self.model.as_str()), ("conf", conf.as_str())])
            .header("Content-Type", "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(|e| VisionError::Detection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisionError::Detection(format!("HTTP {}", status.as_u16())));
        }

        let body: DetectResponse =
            response.json().await.map_err(|e| VisionError::Detection(e.to_string()))?;
        Ok(body.boxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedDetector(Vec<BoundingBox>);

    #[async_trait]
    impl PlateDetector for FixedDetector {
        async fn detect(&self, _image: Bytes, _conf: f32) -> Result<Vec<BoundingBox>, VisionError> {
            Ok(self.0.clone())
        }
    }

    /// Fails the first `failures` loads, then succeeds; counts attempts
    struct CountingLoader {
        attempts: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl DetectorLoader for CountingLoader {
        async fn load(&self) -> Result<Arc<dyn PlateDetector>, VisionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if attempt < self.failures {
                return Err(VisionError::ModelUnavailable("weights missing".into()));
            }
            Ok(Arc::new(FixedDetector(vec![])))
        }
    }

    fn bbox(score: f32) -> BoundingBox {
        BoundingBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0, score }
    }

    #[tokio::test]
    async fn test_concurrent_first_use_loads_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handle = Arc::new(DetectorHandle::new(
            CountingLoader { attempts: attempts.clone(), failures: 0 },
            true,
        ));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.get().await.is_ok() }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handle =
            DetectorHandle::new(CountingLoader { attempts: attempts.clone(), failures: 1 }, false);

        let first = handle.get().await;
        assert!(matches!(first, Err(VisionError::ModelUnavailable(_))));
        assert!(!handle.is_loaded());

        assert!(handle.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detect_filters_below_threshold_and_keeps_order() {
        let handle = DetectorHandle::from_detector(Arc::new(FixedDetector(vec![
            bbox(0.9),
            bbox(0.3),
            bbox(0.6),
            bbox(0.75),
        ])));

        let boxes = handle.detect(Bytes::from_static(b"img"), 0.6).await.unwrap();
        let scores: Vec<f32> = boxes.iter().map(|b| b.score).collect();
        assert_eq!(scores, vec![0.9, 0.6, 0.75]);
    }

    #[test]
    fn test_detect_response_parsing() {
        let body = r#"{"boxes":[{"x1":10.5,"y1":20,"x2":110,"y2":60,"score":0.87}]}"#;
        let parsed: DetectResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.boxes.len(), 1);
        assert_eq!(parsed.boxes[0].x1, 10.5);
        assert_eq!(parsed.boxes[0].score, 0.87);

        let empty: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.boxes.is_empty());
    }

    #[tokio::test]
    async fn test_http_loader_unreachable_is_model_unavailable() {
        let config = Config::from_toml_str(
            "[detector]\nendpoint = \"http://127.0.0.1:1\"\ntimeout_ms = 500\n",
            "inline".into(),
        )
        .unwrap();
        let handle = DetectorHandle::new(HttpDetectorLoader::new(&config).unwrap(), true);

        let result = handle.detect(Bytes::from_static(b"img"), 0.6).await;
        assert!(matches!(result, Err(VisionError::ModelUnavailable(_))));
    }
}
