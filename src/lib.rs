pub mod assessment; // Task planning, execution, aggregation
pub mod config;
pub mod db;
pub mod llm;
pub mod models;
pub mod store; // Object + task cache storage

use tracing_subscriber::EnvFilter;

pub use assessment::{AssessmentError, GranularAssessmentService, SectionOutcome, SectionStatus};
pub use config::AssessmentConfig;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling this more than once is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
