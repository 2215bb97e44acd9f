use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{RawContent, VisionBackend};
use crate::{config::ClassifierConfig, error::BackendError, input::PreparedImage};

/// Vision model served behind an OpenAI-compatible chat-completions API
pub struct ChatCompletionsVisionBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl ChatCompletionsVisionBackend {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn completion_payload(&self, image: &PreparedImage, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "image_url", "image_url": { "url": image.data_url() } },
                        { "type": "text", "text": prompt }
                    ]
                }
            ],
            "max_tokens": self.max_tokens,
            "temperature": 0
        })
    }
}

#[async_trait]
impl VisionBackend for ChatCompletionsVisionBackend {
    async fn load(&self) -> Result<(), BackendError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "model listing at {} returned {}",
                url,
                response.status()
            )));
        }

        info!(model = %self.model, base_url = %self.base_url, "Vision backend reachable");
        Ok(())
    }

    async fn generate(
        &self,
        image: &PreparedImage,
        prompt: &str,
    ) -> Result<RawContent, BackendError> {
        let (width, height) = image.dimensions();
        debug!(model = %self.model, width, height, "Submitting image for classification");

        let response = self
            .authorize(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(&self.completion_payload(image, prompt))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "inference request failed: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(format!("response is not JSON: {}", e)))?;

        extract_message_content(body)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions body
pub(crate) fn extract_message_content(mut body: Value) -> Result<RawContent, BackendError> {
    let content = body
        .pointer_mut("/choices/0/message/content")
        .map(Value::take)
        .ok_or_else(|| {
            BackendError::Malformed("missing choices[0].message.content".to_string())
        })?;
    RawContent::from_value(content)
}
