//! LLM backend strategies.
//!
//! A [`Backend`] turns `(prompt, images, model)` into the raw reply text of
//! one provider. The set of providers is closed, so this is an enum rather
//! than a trait object; every variant shares the same [`HttpTransport`] and
//! the same refusal and error mapping.
//!
//! ## Refusal detection
//!
//! Providers with content filters sometimes answer "I'm sorry, I cannot…"
//! instead of JSON. Only the prose *outside* the outermost `{…}` is checked,
//! so a report quoting "I cannot reproduce the failure" inside a JSON comment
//! is not mistaken for a refusal.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod transport;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use transport::{HttpTransport, ReqwestTransport, TransportError};

use crate::config::{AnalyzerConfig, BackendKind, BackendSettings};
use crate::error::AnalyzerError;
use crate::output::ExtractedImage;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const REFUSAL_MARKERS: &[&str] = &["i'm sorry", "i cannot", "i can't", "i am unable"];

const REFUSAL_GUIDANCE: &str = "The provider's content filter declined the request. \
Retry with images skipped, or switch backend (ollama runs locally without a content filter; \
anthropic is usually less restrictive on technical reports).";

/// One HTTP exchange, fully described.
#[derive(Debug, Clone)]
pub(crate) struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

#[derive(Debug, Clone)]
enum Strategy {
    Ollama(OllamaBackend),
    OpenAi(OpenAiBackend),
    Anthropic(AnthropicBackend),
}

/// A configured provider bound to a transport.
#[derive(Clone)]
pub struct Backend {
    strategy: Strategy,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

impl Backend {
    /// Construct the backend for `kind`.
    ///
    /// Cloud backends fail with [`AnalyzerError::ConfigurationError`] when no
    /// API key was resolved. Ollama falls back to `config.ollama_base_url`.
    pub fn build(
        kind: BackendKind,
        settings: &BackendSettings,
        config: &AnalyzerConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, AnalyzerError> {
        let base_url = settings.base_url.as_deref();
        let strategy = match kind {
            BackendKind::Ollama => Strategy::Ollama(OllamaBackend::new(
                base_url.unwrap_or(config.ollama_base_url.as_str()),
                settings.api_key.clone(),
            )),
            BackendKind::OpenAi => Strategy::OpenAi(OpenAiBackend::new(
                require_key(kind, settings)?,
                base_url,
                config.max_tokens,
            )),
            BackendKind::Anthropic => Strategy::Anthropic(AnthropicBackend::new(
                require_key(kind, settings)?,
                base_url,
                config.max_tokens,
            )),
        };
        Ok(Self {
            strategy,
            transport,
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self.strategy {
            Strategy::Ollama(_) => BackendKind::Ollama,
            Strategy::OpenAi(_) => BackendKind::OpenAi,
            Strategy::Anthropic(_) => BackendKind::Anthropic,
        }
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        match &self.strategy {
            Strategy::Ollama(b) => &b.base_url,
            Strategy::OpenAi(b) => &b.base_url,
            Strategy::Anthropic(b) => &b.base_url,
        }
    }

    /// Send one evaluation request and return the trimmed reply text.
    pub async fn submit(
        &self,
        prompt: &str,
        images: &[ExtractedImage],
        model: &str,
    ) -> Result<String, AnalyzerError> {
        let request = match &self.strategy {
            Strategy::Ollama(b) => b.request(prompt, images, model),
            Strategy::OpenAi(b) => b.request(prompt, images, model),
            Strategy::Anthropic(b) => b.request(prompt, images, model),
        };

        info!(
            "Calling {} (model: {}, images: {}, prompt: {} chars)",
            self.kind(),
            model,
            images.len(),
            prompt.chars().count()
        );

        let headers: Vec<(&str, String)> = request
            .headers
            .iter()
            .map(|(name, value)| (*name, value.clone()))
            .collect();
        let response = self
            .transport
            .post_json(&request.url, &headers, &request.body)
            .await
            .map_err(|e| self.invocation_failure(e.to_string()))?;

        let text = match &self.strategy {
            Strategy::Ollama(_) => OllamaBackend::extract_text(&response),
            Strategy::OpenAi(_) => OpenAiBackend::extract_text(&response),
            Strategy::Anthropic(_) => AnthropicBackend::extract_text(&response),
        }
        .ok_or_else(|| self.invocation_failure("response envelope has no text content"))?
        .trim()
        .to_string();

        debug!("{} replied with {} chars", self.kind(), text.chars().count());

        if is_refusal(&text) {
            return Err(AnalyzerError::ProviderRefused {
                backend: self.kind().to_string(),
                guidance: REFUSAL_GUIDANCE.to_string(),
            });
        }
        Ok(text)
    }

    fn invocation_failure(&self, detail: impl Into<String>) -> AnalyzerError {
        AnalyzerError::ProviderInvocationFailure {
            backend: self.kind().to_string(),
            detail: detail.into(),
        }
    }
}

fn require_key(kind: BackendKind, settings: &BackendSettings) -> Result<String, AnalyzerError> {
    settings
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AnalyzerError::ConfigurationError {
            backend: kind.to_string(),
            detail: format!(
                "API key required. Set {}_API_KEY, store it in the config, or pass it with the request.",
                kind.as_str().to_ascii_uppercase()
            ),
        })
}

/// Whether the prose surrounding the reply's outermost JSON object reads as a refusal.
pub fn is_refusal(text: &str) -> bool {
    let prose = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => format!("{} {}", &text[..start], &text[end + 1..]),
        _ => text.to_string(),
    };
    let prose = prose.replace('\u{2019}', "'").to_lowercase();
    REFUSAL_MARKERS.iter().any(|m| prose.contains(m))
}
