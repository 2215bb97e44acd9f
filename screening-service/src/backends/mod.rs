//! Boundaries to the external inference and generation services.
//!
//! Each backend is a trait so the pipeline can be wired against fakes in tests;
//! the concrete implementations talk HTTP.

pub mod content;
pub mod llm;
pub mod vision;

use async_trait::async_trait;

use crate::{error::BackendError, input::PreparedImage};

pub use content::RawContent;
pub use llm::OpenRouterTextGenerator;
pub use vision::ChatCompletionsVisionBackend;

/// Image-in, text-out inference service
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// One-time acquisition of the backend (credentials, reachability, model load)
    async fn load(&self) -> Result<(), BackendError>;

    async fn generate(&self, image: &PreparedImage, prompt: &str)
    -> Result<RawContent, BackendError>;
}

/// Prompt-in, text-out generation service
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<RawContent, BackendError>;
}
