//! Anthropic messages API.

use crate::config::DEFAULT_ANTHROPIC_BASE_URL;
use crate::output::ExtractedImage;
use serde_json::{json, Value};
use tracing::warn;

use super::ProviderRequest;

pub const MAX_IMAGES: usize = 20;
pub const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) max_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, max_tokens: u32) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            max_tokens,
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
                "anthropic: sending first {} of {} images",
                MAX_IMAGES,
                images.len()
            );
        }

        // Images precede the text block.
        let mut content: Vec<Value> = images
            .iter()
            .take(MAX_IMAGES)
            .map(|img| {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": img.mime_type(),
                        "data": img.data,
                    },
                })
            })
            .collect();
        content.push(json!({ "type": "text", "text": prompt }));

        ProviderRequest {
            url: format!("{}/v1/messages", self.base_url),
            headers: vec![
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", API_VERSION.to_string()),
            ],
            body: json!({
                "model": model,
                "max_tokens": self.max_tokens,
                "messages": [{ "role": "user", "content": content }],
            }),
        }
    }

    pub(crate) fn extract_text(response: &Value) -> Option<&str> {
        response.pointer("/content/0/text")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_then_text() {
        let b = AnthropicBackend::new("ak", None, 4000);
        let images = vec![ExtractedImage {
            data: "iVBOR".into(),
            format: "png".into(),
        }];
        let req = b.request("評分", &images, "claude-sonnet-4-20250514");

        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert!(req.headers.contains(&("x-api-key", "ak".to_string())));
        assert!(req
            .headers
            .contains(&("anthropic-version", "2023-06-01".to_string())));

        let content = req.body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[0]["source"]["data"], "iVBOR");
        assert_eq!(content[1]["text"], "評分");
        assert_eq!(req.body["max_tokens"], 4000);
    }

    #[test]
    fn caps_at_twenty_images() {
        let b = AnthropicBackend::new("ak", Some("http://mirror/"), 10);
        let images: Vec<ExtractedImage> = (0..25)
            .map(|_| ExtractedImage {
                data: "x".into(),
                format: "gif".into(),
            })
            .collect();
        let req = b.request("p", &images, "m");
        assert_eq!(req.url, "http://mirror/v1/messages");
        let content = req.body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), MAX_IMAGES + 1);
    }

    #[test]
    fn reads_first_content_block() {
        let resp = json!({ "content": [{ "type": "text", "text": "{}" }] });
        assert_eq!(AnthropicBackend::extract_text(&resp), Some("{}"));
    }
}
