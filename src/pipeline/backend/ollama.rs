//! Local model server (Ollama `/api/chat`).

use crate::output::ExtractedImage;
use serde_json::{json, Value};
use tracing::warn;

use super::ProviderRequest;

/// Images beyond this count are dropped from the request.
pub const MAX_IMAGES: usize = 5;

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub(crate) fn request(
        &self,
        prompt: &str,
        images: &[ExtractedImage],
        model: &str,
    ) -> ProviderRequest {
        if images.len() > MAX_IMAGES {
            warn!(
                "ollama: sending first {} of {} images",
                MAX_IMAGES,
                images.len()
            );
        }

        let mut message = json!({ "role": "user", "content": prompt });
        if !images.is_empty() {
            let encoded: Vec<&str> = images
                .iter()
                .take(MAX_IMAGES)
                .map(|img| img.data.as_str())
                .collect();
            message["images"] = json!(encoded);
        }

        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("Authorization", format!("Bearer {key}")));
        }

        ProviderRequest {
            url: format!("{}/api/chat", self.base_url),
            headers,
            body: json!({
                "model": model,
                "messages": [message],
                "stream": false,
            }),
        }
    }

    pub(crate) fn extract_text(response: &Value) -> Option<&str> {
        response.pointer("/message/content")?.as_str()
    }
}
