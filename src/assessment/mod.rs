//! Granular confidence assessment.
//!
//! An extraction result is split into small tasks (batches of scalar fields,
//! one task per object group, one per list item), each task is asked of the
//! LLM on its own, and the per-field confidences are merged back into one
//! assessment shaped like the extraction.

pub mod aggregator;
pub mod cache;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod parser;
pub mod planner;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod service;
pub mod types;

pub use error::AssessmentError;
pub use schema::{ClassSchema, SchemaRegistry};
pub use service::{GranularAssessmentService, SectionOutcome, SectionStatus};
pub use types::{AssessmentResult, AssessmentTask, ConfidenceAlert, TaskType};
