//! OpenAI-compatible chat completions.

use crate::config::DEFAULT_OPENAI_BASE_URL;
use crate::output::ExtractedImage;
use serde_json::{json, Value};
use tracing::warn;

use super::ProviderRequest;

pub const MAX_IMAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) max_tokens: u32,
}

impl OpenAiBackend {
    /// `base_url` already includes the version segment (`.../v1`).
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, max_tokens: u32) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_OPENAI_BASE_URL)
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
                "openai: sending first {} of {} images",
                MAX_IMAGES,
                images.len()
            );
        }

        let mut content = vec![json!({ "type": "text", "text": prompt })];
        content.extend(images.iter().take(MAX_IMAGES).map(|img| {
            json!({
                "type": "image_url",
                "image_url": { "url": img.data_uri() },
            })
        }));

        ProviderRequest {
            url: format!("{}/chat/completions", self.base_url),
            headers: vec![("Authorization", format!("Bearer {}", self.api_key))],
            body: json!({
                "model": model,
                "messages": [{ "role": "user", "content": content }],
                "max_tokens": self.max_tokens,
            }),
        }
    }

    pub(crate) fn extract_text(response: &Value) -> Option<&str> {
        response.pointer("/choices/0/message/content")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_first_then_data_uris() {
        let b = OpenAiBackend::new("sk-test", None, 4000);
        let images: Vec<ExtractedImage> = (0..12)
            .map(|_| ExtractedImage {
                data: "AAAA".into(),
                format: "jpg".into(),
            })
            .collect();
        let req = b.request("評分", &images, "gpt-4o-mini-2024-07-18");

        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(req.headers[0].1, "Bearer sk-test");
        assert_eq!(req.body["max_tokens"], 4000);

        let content = req.body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1 + MAX_IMAGES);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "評分");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/jpeg;base64,AAAA"
        );
    }

    #[test]
    fn custom_base_url() {
        let b = OpenAiBackend::new("k", Some("http://proxy.local/v1/"), 100);
        let req = b.request("p", &[], "m");
        assert_eq!(req.url, "http://proxy.local/v1/chat/completions");
    }

    #[test]
    fn reads_first_choice() {
        let resp = json!({ "choices": [{ "message": { "content": "{\"a\":1}" } }] });
        assert_eq!(OpenAiBackend::extract_text(&resp), Some("{\"a\":1}"));
        assert_eq!(OpenAiBackend::extract_text(&json!({ "choices": [] })), None);
    }
}
