//! One report, end to end: ingest → prompt → backend → normalise.
//!
//! [`analyze_report`] is the whole pipeline as a single unit of work. It
//! knows nothing about tasks or concurrency; the orchestrator runs it on a
//! worker and turns checkpoint callbacks into task-store writes.

use crate::config::{AnalyzerConfig, BackendKind, BackendSettings};
use crate::error::AnalyzerError;
use crate::output::AnalysisResult;
use crate::pipeline::backend::{Backend, HttpTransport};
use crate::pipeline::{ingest, postprocess};
use crate::progress::{AnalysisProgressCallback, Checkpoint};
use crate::prompts::build_analysis_prompt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Everything needed to analyse one report.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub path: PathBuf,
    pub backend: BackendKind,
    /// Resolved credentials, endpoint and model.
    pub settings: BackendSettings,
    /// Drop extracted images before building the prompt.
    pub skip_images: bool,
}

/// Run the analysis pipeline for one report.
///
/// The backend is constructed first so a missing credential fails before
/// any extraction work is done.
pub async fn analyze_report(
    request: &AnalysisRequest,
    config: &AnalyzerConfig,
    transport: Arc<dyn HttpTransport>,
    progress: &dyn AnalysisProgressCallback,
) -> Result<AnalysisResult, AnalyzerError> {
    let start = Instant::now();
    let backend = Backend::build(request.backend, &request.settings, config, transport)?;

    progress.on_checkpoint(Checkpoint::Reading);
    let mut content = ingest::read_report(&request.path, config.conversion_timeout_secs).await?;

    if request.skip_images && content.has_images() {
        info!(
            "Skipping {} images; analysing text only",
            content.images.len()
        );
        content.images.clear();
    }
    progress.on_content_extracted(content.text.chars().count(), content.images.len());

    let prompt = build_analysis_prompt(&content.text, content.has_images());

    progress.on_checkpoint(Checkpoint::Analyzing);
    let raw = backend
        .submit(&prompt, &content.images, &request.settings.model)
        .await?;
    progress.on_response_received(raw.chars().count());

    let result = postprocess::normalize(&raw)?;
    info!(
        "Analysis of {} finished in {:.1}s: {:.2} ({})",
        request.path.display(),
        start.elapsed().as_secs_f64(),
        result.total_score,
        result.grade
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::TransportError;
    use crate::pipeline::office::fixtures;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    const REPLY: &str = r#"{"total_score": 72, "grade": "C", "dimension_scores": {
        "基本資訊完整性": {"score": 70, "percentage": 70, "comment": "ok"},
        "問題描述與定義": {"score": 70, "percentage": 70, "comment": "ok"},
        "分析方法與流程": {"score": 75, "percentage": 75, "comment": "ok"},
        "數據與證據支持": {"score": 70, "percentage": 70, "comment": "ok"},
        "根因分析": {"score": 75, "percentage": 75, "comment": "ok"},
        "改善對策": {"score": 70, "percentage": 70, "comment": "ok"}},
        "strengths": [], "improvements": [], "summary": "尚可"}"#;

    #[derive(Default)]
    struct Capture {
        bodies: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl HttpTransport for Capture {
        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(&str, String)],
            body: &Value,
        ) -> Result<Value, TransportError> {
            self.bodies.lock().unwrap().push(body.clone());
            Ok(json!({ "message": { "content": REPLY } }))
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl AnalysisProgressCallback for Events {
        fn on_checkpoint(&self, checkpoint: Checkpoint) {
            self.0.lock().unwrap().push(checkpoint.progress().to_string());
        }
        fn on_content_extracted(&self, _text_chars: usize, image_count: usize) {
            self.0.lock().unwrap().push(format!("images={image_count}"));
        }
    }

    fn request(path: PathBuf, skip_images: bool) -> AnalysisRequest {
        AnalysisRequest {
            path,
            backend: BackendKind::Ollama,
            settings: BackendSettings {
                api_key: None,
                base_url: None,
                model: "llama3.1:latest".into(),
            },
            skip_images,
        }
    }

    #[tokio::test]
    async fn text_report_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fa.txt");
        std::fs::write(&path, "FA-2024-001 焊點空洞").unwrap();

        let transport = Arc::new(Capture::default());
        let events = Events::default();
        let result = analyze_report(
            &request(path, false),
            &AnalyzerConfig::default(),
            transport.clone(),
            &events,
        )
        .await
        .unwrap();

        assert_eq!(result.grade, crate::rubric::Grade::C);
        assert_eq!(*events.0.lock().unwrap(), vec!["10", "images=0", "30"]);

        let bodies = transport.bodies.lock().unwrap();
        let content = bodies[0]["messages"][0]["content"].as_str().unwrap();
        assert!(content.ends_with("FA-2024-001 焊點空洞\n"));
    }

    #[tokio::test]
    async fn skip_images_drops_them_from_request_and_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        std::fs::write(&path, fixtures::pptx_with_image()).unwrap();

        let transport = Arc::new(Capture::default());
        let events = Events::default();
        analyze_report(
            &request(path, true),
            &AnalyzerConfig::default(),
            transport.clone(),
            &events,
        )
        .await
        .unwrap();

        assert!(events.0.lock().unwrap().contains(&"images=0".to_string()));
        let bodies = transport.bodies.lock().unwrap();
        let message = &bodies[0]["messages"][0];
        assert!(message.get("images").is_none());
        assert!(!message["content"]
            .as_str()
            .unwrap()
            .contains(crate::prompts::IMAGE_NOTE.trim()));
    }

    #[tokio::test]
    async fn missing_key_fails_before_reading() {
        let events = Events::default();
        let mut req = request(PathBuf::from("/no/such/report.txt"), false);
        req.backend = BackendKind::Anthropic;
        let err = analyze_report(
            &req,
            &AnalyzerConfig::default(),
            Arc::new(Capture::default()),
            &events,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalyzerError::ConfigurationError { .. }));
        assert!(events.0.lock().unwrap().is_empty());
    }
}
