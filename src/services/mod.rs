//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `pipeline` - Detection, crop refinement, recognition, candidate filtering
//! - `decision` - GRANTED / DENIED / FAILED classification and side effects
//! - `gate` - Gate open/closed state with generation-guarded auto-close
//! - `checkpoint` - One upload through pipeline and decision

pub mod checkpoint;
pub mod decision;
pub mod gate;
pub mod pipeline;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, UploadOutcome};
pub use decision::{AccessDecisionEngine, Decision};
pub use gate::GateStateMachine;
pub use pipeline::{Extraction, PipelineSettings, PlateExtractionPipeline};
