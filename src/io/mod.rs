//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `detector` - Plate detector adapter (lazy once-init, remote inference)
//! - `recognizer` - OCR adapter (OCR.space-compatible HTTP API)
//! - `registry` - Employees, plate mappings and access log (SQLite)
//! - `artifacts` - Full image and crop files on disk
//! - `http_api` - JSON HTTP API (hyper)
//! - `prometheus` - Prometheus text exposition

pub mod artifacts;
pub mod detector;
pub mod http_api;
pub mod prometheus;
pub mod recognizer;
pub mod registry;

// Re-export commonly used types
pub use artifacts::ArtifactStore;
pub use detector::{DetectorHandle, HttpDetectorLoader, PlateDetector};
pub use http_api::{start_api_server, ApiState};
pub use recognizer::{OcrSpaceClient, PlateRecognizer};
pub use registry::{Registry, SqliteRegistry};
