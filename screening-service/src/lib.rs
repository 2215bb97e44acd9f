pub mod advisory;
pub mod backends;
pub mod classifier;
pub mod config;
pub mod error;
pub mod input;
pub mod models;
pub mod report;
pub mod service;
pub mod tasks;
pub mod telemetry;
pub mod workflow;

pub use config::{LogFormat, ScreeningConfig};
pub use error::{FailureTag, ScreeningError};
pub use models::*;
pub use service::{AppState, build_router, create_app};
pub use telemetry::init_tracing;
pub use workflow::ScreeningPipeline;
