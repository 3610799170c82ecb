//! Domain models - core business types and error taxonomy
//!
//! - `types` - employees, plate mappings, access log entries, detector boxes
//! - `error` - `VisionError` (absorbed by the pipeline) and `RegistryError`
//!   (surfaced to callers)

pub mod error;
pub mod types;

pub use error::{RegistryError, VisionError};
pub use types::{normalize_plate, AccessAction, AccessLogEntry, BoundingBox, DecisionStatus, EmployeeId};
