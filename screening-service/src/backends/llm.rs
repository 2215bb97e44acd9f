use async_trait::async_trait;
use rig::{agent::Agent, completion::Prompt, prelude::*, providers::openrouter};
use tracing::debug;

use super::{RawContent, TextGenerator};
use crate::{config::AdvisoryConfig, error::BackendError};

/// Text generation through an OpenRouter-hosted chat model
pub struct OpenRouterTextGenerator {
    client: openrouter::Client,
    model: String,
    temperature: f64,
}

impl OpenRouterTextGenerator {
    pub fn new(api_key: &str, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
            temperature,
        }
    }

    /// `None` when no API key is configured
    pub fn from_config(config: &AdvisoryConfig) -> Option<Self> {
        config
            .api_key
            .as_deref()
            .map(|key| Self::new(key, config.model.clone(), config.temperature))
    }

    fn agent(&self, system: &str) -> Agent<openrouter::CompletionModel> {
        self.client
            .agent(&self.model)
            .preamble(system)
            .temperature(self.temperature)
            .build()
    }
}

#[async_trait]
impl TextGenerator for OpenRouterTextGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<RawContent, BackendError> {
        debug!(model = %self.model, "Requesting advisory narrative");
        let agent = self.agent(system);
        let response = agent
            .prompt(user)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(RawContent::Text(response))
    }
}
