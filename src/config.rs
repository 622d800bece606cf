//! Configuration types for FA report analysis.
//!
//! Two layers live here:
//!
//! * [`AnalyzerConfig`]: process-wide knobs (worker count, timeouts,
//!   token budget), built via its [`AnalyzerConfigBuilder`].
//! * [`ConfigResolver`]: per-request backend settings (API key, base URL,
//!   model) resolved with precedence *request > stored config > environment >
//!   built-in default*. It is constructed once at startup and handed to the
//!   orchestrator explicitly; nothing in the crate reads a global.
//!
//! # Design choice: builder over constructor
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::AnalyzerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
/// Default OpenAI-compatible endpoint (already includes `/v1`).
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default Anthropic endpoint.
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

// ── Backend kind ─────────────────────────────────────────────────────────

/// The closed set of LLM backends.
///
/// Serialised under the provider names (`ollama`, `openai`, `anthropic`);
/// parsing also accepts the role names `local`, `cloud-a`, `cloud-b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local model server (Ollama).
    Ollama,
    /// OpenAI-compatible chat completions API.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::Ollama, Self::OpenAi, Self::Anthropic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Model used when neither the request nor any config layer names one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Ollama => "llama3.1:latest",
            Self::OpenAi => "gpt-4o-mini-2024-07-18",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    /// Whether construction fails without an API key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(Self::Ollama),
            "openai" | "cloud-a" => Ok(Self::OpenAi),
            "anthropic" | "cloud-b" => Ok(Self::Anthropic),
            other => Err(format!(
                "Unsupported backend '{other}'. Supported: ollama (local), openai (cloud-a), anthropic (cloud-b)"
            )),
        }
    }
}

// ── AnalyzerConfig ───────────────────────────────────────────────────────

/// Process-wide analyzer configuration.
///
/// # Example
/// ```rust
/// use fa_report_analyzer::AnalyzerConfig;
///
/// let config = AnalyzerConfig::builder()
///     .workers(2)
///     .api_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Pipelines that may run at once. Default: 4.
    ///
    /// Each pipeline spends most of its time waiting on the provider, so this
    /// bounds concurrent provider calls rather than CPU use.
    pub workers: usize,

    /// Timeout for one provider call in seconds. Default: 300.
    ///
    /// Scoring a long report with images can take minutes on a local model.
    /// A call exceeding this fails the task with a provider invocation error.
    pub api_timeout_secs: u64,

    /// Timeout for one legacy-format conversion attempt in seconds. Default: 30.
    pub conversion_timeout_secs: u64,

    /// Completion budget for cloud backends. Default: 4000.
    pub max_tokens: u32,

    /// Ollama endpoint used when no other layer supplies one.
    pub ollama_base_url: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            api_timeout_secs: 300,
            conversion_timeout_secs: 30,
            max_tokens: 4000,
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
        }
    }
}

impl AnalyzerConfig {
    /// Create a new builder for `AnalyzerConfig`.
    pub fn builder() -> AnalyzerConfigBuilder {
        AnalyzerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalyzerConfig`].
#[derive(Debug)]
pub struct AnalyzerConfigBuilder {
    config: AnalyzerConfig,
}

impl AnalyzerConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn ollama_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.ollama_base_url = url.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalyzerConfig, AnalyzerError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(AnalyzerError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(AnalyzerError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.conversion_timeout_secs == 0 {
            return Err(AnalyzerError::InvalidConfig(
                "conversion_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(AnalyzerError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if !(c.ollama_base_url.starts_with("http://") || c.ollama_base_url.starts_with("https://"))
        {
            return Err(AnalyzerError::InvalidConfig(format!(
                "ollama_base_url must be an http(s) URL, got '{}'",
                c.ollama_base_url
            )));
        }
        Ok(self.config)
    }
}

// ── Backend settings ─────────────────────────────────────────────────────

/// Everything a backend is constructed from.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BackendSettings {
    pub api_key: Option<String>,
    /// Endpoint override; `None` means the backend's default endpoint.
    pub base_url: Option<String>,
    pub model: String,
}

impl fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSettings")
            .field("api_key", &self.api_key.as_deref().map(|k| mask_api_key(k, 4)))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Per-request overrides; the highest-precedence configuration layer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BackendOverrides {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl fmt::Debug for BackendOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendOverrides")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_deref().map(|k| mask_api_key(k, 4)))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Mask an API key for display, keeping the first `visible` characters.
///
/// Keys no longer than `visible` are fully masked as `****`.
pub fn mask_api_key(key: &str, visible: usize) -> String {
    let len = key.chars().count();
    if len <= visible {
        return "****".to_string();
    }
    let head: String = key.chars().take(visible).collect();
    format!("{head}{}", "*".repeat(len - visible))
}

// ── Stored config ────────────────────────────────────────────────────────

/// Key/value configuration persisted by the host application.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Keys understood by [`ConfigResolver`].
pub mod keys {
    pub const OPENAI_API_KEY: &str = "openai_api_key";
    pub const OPENAI_BASE_URL: &str = "openai_base_url";
    pub const DEFAULT_MODEL: &str = "default_model";
    pub const OLLAMA_BASE_URL: &str = "ollama_base_url";
    pub const OLLAMA_API_KEY: &str = "ollama_api_key";
    pub const ANTHROPIC_API_KEY: &str = "anthropic_api_key";
    pub const ANTHROPIC_BASE_URL: &str = "anthropic_base_url";
}

/// Process-local [`ConfigStore`].
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut map) = self.values.write() {
            map.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.values.write() {
            map.remove(key);
        }
    }
}

// ── Environment defaults ─────────────────────────────────────────────────

/// Defaults captured from the process environment at startup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvDefaults {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub default_model: Option<String>,
    pub ollama_api_key: Option<String>,
    pub ollama_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
}

impl EnvDefaults {
    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `DEFAULT_MODEL`,
    /// `OLLAMA_API_KEY`, `OLLAMA_BASE_URL`, `ANTHROPIC_API_KEY` and
    /// `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| non_empty(lookup(name));
        Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            default_model: get("DEFAULT_MODEL"),
            ollama_api_key: get("OLLAMA_API_KEY"),
            ollama_base_url: get("OLLAMA_BASE_URL"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_base_url: get("ANTHROPIC_BASE_URL"),
        }
    }
}

impl fmt::Debug for EnvDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = |k: &Option<String>| k.as_deref().map(|k| mask_api_key(k, 4));
        f.debug_struct("EnvDefaults")
            .field("openai_api_key", &masked(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("default_model", &self.default_model)
            .field("ollama_api_key", &masked(&self.ollama_api_key))
            .field("ollama_base_url", &self.ollama_base_url)
            .field("anthropic_api_key", &masked(&self.anthropic_api_key))
            .field("anthropic_base_url", &self.anthropic_base_url)
            .finish()
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ── Resolver ─────────────────────────────────────────────────────────────

/// Resolves [`BackendSettings`] for a request.
#[derive(Clone)]
pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
    env: EnvDefaults,
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("store", &"<dyn ConfigStore>")
            .field("env", &self.env)
            .finish()
    }
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>, env: EnvDefaults) -> Self {
        Self { store, env }
    }

    /// In-memory store plus the current process environment.
    pub fn from_env() -> Self {
        Self::new(Arc::new(InMemoryConfigStore::new()), EnvDefaults::from_env())
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Resolve settings for `backend`: request > stored > environment > default.
    pub fn resolve(&self, backend: BackendKind, request: &BackendOverrides) -> BackendSettings {
        let stored = |key: &str| non_empty(self.store.get(key));
        let req = |v: &Option<String>| non_empty(v.clone());

        let (api_key, base_url, model) = match backend {
            BackendKind::OpenAi => (
                req(&request.api_key)
                    .or_else(|| stored(keys::OPENAI_API_KEY))
                    .or_else(|| self.env.openai_api_key.clone()),
                req(&request.base_url)
                    .or_else(|| stored(keys::OPENAI_BASE_URL))
                    .or_else(|| self.env.openai_base_url.clone()),
                req(&request.model)
                    .or_else(|| stored(keys::DEFAULT_MODEL))
                    .or_else(|| self.env.default_model.clone()),
            ),
            BackendKind::Ollama => (
                req(&request.api_key)
                    .or_else(|| stored(keys::OLLAMA_API_KEY))
                    .or_else(|| self.env.ollama_api_key.clone()),
                req(&request.base_url)
                    .or_else(|| stored(keys::OLLAMA_BASE_URL))
                    .or_else(|| self.env.ollama_base_url.clone()),
                req(&request.model),
            ),
            BackendKind::Anthropic => (
                req(&request.api_key)
                    .or_else(|| stored(keys::ANTHROPIC_API_KEY))
                    .or_else(|| self.env.anthropic_api_key.clone()),
                req(&request.base_url)
                    .or_else(|| stored(keys::ANTHROPIC_BASE_URL))
                    .or_else(|| self.env.anthropic_base_url.clone()),
                req(&request.model),
            ),
        };

        BackendSettings {
            api_key,
            base_url,
            model: model.unwrap_or_else(|| backend.default_model().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvDefaults {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvDefaults::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn builder_defaults() {
        let c = AnalyzerConfig::builder().build().unwrap();
        assert_eq!(c.workers, 4);
        assert_eq!(c.api_timeout_secs, 300);
        assert_eq!(c.conversion_timeout_secs, 30);
        assert_eq!(c.max_tokens, 4000);
        assert_eq!(c.ollama_base_url, "http://localhost:11434");
    }

    #[test]
    fn builder_clamps_workers() {
        let c = AnalyzerConfig::builder().workers(0).build().unwrap();
        assert_eq!(c.workers, 1);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = AnalyzerConfig::builder().api_timeout_secs(0).build().unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_non_http_ollama_url() {
        let err = AnalyzerConfig::builder()
            .ollama_base_url("localhost:11434")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("local".parse::<BackendKind>(), Ok(BackendKind::Ollama));
        assert_eq!("cloud-a".parse::<BackendKind>(), Ok(BackendKind::OpenAi));
        assert_eq!("Cloud-B".parse::<BackendKind>(), Ok(BackendKind::Anthropic));
        assert_eq!("openai".parse::<BackendKind>(), Ok(BackendKind::OpenAi));
        assert!("gemini".parse::<BackendKind>().is_err());
    }

    #[test]
    fn backend_kind_serialises_provider_name() {
        let json = serde_json::to_string(&BackendKind::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
    }

    #[test]
    fn mask_keeps_prefix() {
        assert_eq!(mask_api_key("sk-abcdef", 4), "sk-a*****");
        assert_eq!(mask_api_key("abcd", 4), "****");
        assert_eq!(mask_api_key("", 4), "****");
    }

    #[test]
    fn debug_never_prints_key() {
        let s = BackendSettings {
            api_key: Some("sk-secret-value".into()),
            base_url: None,
            model: "m".into(),
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("secret"), "got: {dbg}");
        assert!(dbg.contains("sk-s"));
    }

    #[test]
    fn precedence_request_over_stored_over_env() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.set(keys::OPENAI_API_KEY, "stored-key");
        let resolver = ConfigResolver::new(
            store.clone(),
            env(&[("OPENAI_API_KEY", "env-key"), ("DEFAULT_MODEL", "env-model")]),
        );

        let from_request = resolver.resolve(
            BackendKind::OpenAi,
            &BackendOverrides {
                api_key: Some("req-key".into()),
                ..Default::default()
            },
        );
        assert_eq!(from_request.api_key.as_deref(), Some("req-key"));
        assert_eq!(from_request.model, "env-model");

        let from_store = resolver.resolve(BackendKind::OpenAi, &BackendOverrides::default());
        assert_eq!(from_store.api_key.as_deref(), Some("stored-key"));

        store.remove(keys::OPENAI_API_KEY);
        let from_env = resolver.resolve(BackendKind::OpenAi, &BackendOverrides::default());
        assert_eq!(from_env.api_key.as_deref(), Some("env-key"));
    }

    #[test]
    fn falls_back_to_built_in_model() {
        let resolver = ConfigResolver::new(Arc::new(InMemoryConfigStore::new()), env(&[]));
        let s = resolver.resolve(BackendKind::Anthropic, &BackendOverrides::default());
        assert_eq!(s.model, "claude-sonnet-4-20250514");
        assert_eq!(s.api_key, None);
        assert_eq!(s.base_url, None);
    }

    #[test]
    fn default_model_only_applies_to_openai() {
        let resolver = ConfigResolver::new(
            Arc::new(InMemoryConfigStore::new()),
            env(&[("DEFAULT_MODEL", "gpt-4.1")]),
        );
        let ollama = resolver.resolve(BackendKind::Ollama, &BackendOverrides::default());
        assert_eq!(ollama.model, "llama3.1:latest");
    }

    #[test]
    fn blank_values_are_ignored() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.set(keys::OLLAMA_BASE_URL, "   ");
        let resolver = ConfigResolver::new(
            store,
            env(&[("OLLAMA_BASE_URL", "http://gpu-box:11434")]),
        );
        let s = resolver.resolve(
            BackendKind::Ollama,
            &BackendOverrides {
                base_url: Some(String::new()),
                ..Default::default()
            },
        );
        assert_eq!(s.base_url.as_deref(), Some("http://gpu-box:11434"));
    }
}
