//! CLI binary for fa-report-analyzer.
//!
//! A thin shim over the library crate: maps CLI flags to an
//! `AnalyzerConfig` and a `SubmitRequest`, runs one task through the
//! orchestrator and writes the report.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fa_report_analyzer::report::{render_text_report, to_json};
use fa_report_analyzer::{
    AnalyzerConfig, ConfigResolver, FileResolver, InMemoryTaskStore, Orchestrator,
    ReqwestTransport, SubmitRequest, TaskError, TaskStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Local model (Ollama at http://localhost:11434)
  fa-analyze fa_report.pdf

  # OpenAI, text only (avoids image content filtering)
  fa-analyze -b openai -k sk-... --skip-images fa_report.pptx

  # Anthropic with a specific model, JSON output
  fa-analyze -b anthropic -m claude-sonnet-4-20250514 --json report.docx -o result.json

  # OpenAI-compatible self-hosted endpoint
  fa-analyze -b openai --base-url http://vllm.local:8000/v1 -m qwen2-vl report.pdf

BACKENDS:
  Name        Alias     Default model               Credentials
  ─────────   ───────   ─────────────────────────   ─────────────────
  ollama      local     llama3.1:latest             optional
  openai      cloud-a   gpt-4o-mini-2024-07-18      OPENAI_API_KEY
  anthropic   cloud-b   claude-sonnet-4-20250514    ANTHROPIC_API_KEY

SUPPORTED FORMATS:
  pdf, docx, pptx, txt, jpg, jpeg, png, gif, webp
  doc, ppt (converted with LibreOffice, or Office on Windows)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY / OPENAI_BASE_URL / DEFAULT_MODEL
  ANTHROPIC_API_KEY / ANTHROPIC_BASE_URL
  OLLAMA_API_KEY / OLLAMA_BASE_URL
  PDFIUM_LIB_PATH     Path to libpdfium (file or directory) for PDF reports
"#;

/// Score failure-analysis reports with a local or cloud LLM.
#[derive(Parser, Debug)]
#[command(
    name = "fa-analyze",
    version,
    about = "Score failure-analysis (FA) reports against a six-dimension rubric using an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// FA report file (pdf, docx, pptx, doc, ppt, txt or an image).
    input: PathBuf,

    /// Write the report here. Default: evaluation_results/fa_evaluation_<timestamp>.txt
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Backend: ollama (local), openai (cloud-a), anthropic (cloud-b).
    #[arg(short, long, env = "FA_BACKEND", default_value = "ollama")]
    backend: String,

    /// Model name. Default depends on the backend.
    #[arg(short, long)]
    model: Option<String>,

    /// API key (required for openai / anthropic unless set in the environment).
    #[arg(short = 'k', long)]
    api_key: Option<String>,

    /// Endpoint override (e.g. an OpenAI-compatible server).
    #[arg(long)]
    base_url: Option<String>,

    /// Analyse text only; do not send images.
    #[arg(long)]
    skip_images: bool,

    /// Write JSON instead of the text report.
    #[arg(long)]
    json: bool,

    /// Provider call timeout in seconds.
    #[arg(long, env = "FA_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Legacy .doc/.ppt conversion timeout in seconds.
    #[arg(long, env = "FA_CONVERSION_TIMEOUT", default_value_t = 30)]
    conversion_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

/// The CLI analyses local paths only.
struct NoUploads;

impl FileResolver for NoUploads {
    fn resolve(&self, file_id: &str) -> Result<PathBuf, TaskError> {
        Err(TaskError::FileNotFound {
            file_id: file_id.to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build orchestrator ───────────────────────────────────────────────
    let config = AnalyzerConfig::builder()
        .workers(1)
        .api_timeout_secs(cli.api_timeout)
        .conversion_timeout_secs(cli.conversion_timeout)
        .build()
        .context("Invalid configuration")?;
    let transport =
        Arc::new(ReqwestTransport::new(config.api_timeout_secs).context("HTTP client setup failed")?);
    let orchestrator = Orchestrator::new(
        config,
        ConfigResolver::from_env(),
        Arc::new(InMemoryTaskStore::new()),
        transport,
        Arc::new(NoUploads),
    );

    let mut request = SubmitRequest::new(&cli.input, &cli.backend).skip_images(cli.skip_images);
    if let Some(model) = &cli.model {
        request = request.model(model);
    }
    if let Some(key) = &cli.api_key {
        request = request.api_key(key);
    }
    if let Some(url) = &cli.base_url {
        request = request.base_url(url);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let start = Instant::now();
    let task_id = orchestrator.submit(request).context("Submission rejected")?;

    let bar = show_progress.then(|| {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Analysing");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let task = orchestrator
        .wait_for(&task_id, |t| {
            if let Some(bar) = &bar {
                bar.set_position(u64::from(t.progress));
                bar.set_message(t.message.clone());
            }
        })
        .await
        .context("Lost track of the analysis task")?;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    if task.status != TaskStatus::Completed {
        let reason = task.error.unwrap_or_else(|| "unknown error".into());
        if !cli.quiet {
            eprintln!("{} {}", red("✘"), red(&reason));
        }
        bail!("Analysis of {} failed", cli.input.display());
    }
    let result = orchestrator.get_result(&task_id)?;

    // ── Write report ─────────────────────────────────────────────────────
    let source = task.filename;
    let (body, ext) = if cli.json {
        (to_json(&result).context("Failed to serialise result")?, "json")
    } else {
        (render_text_report(&result, &source), "txt")
    };
    let output_path = match cli.output {
        Some(p) => p,
        None => {
            let dir = PathBuf::from("evaluation_results");
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            dir.join(format!(
                "fa_evaluation_{}.{}",
                chrono::Local::now().format("%Y%m%d_%H%M%S"),
                ext
            ))
        }
    };
    std::fs::write(&output_path, body)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    if !cli.quiet {
        eprintln!(
            "{}  {}  {} / 100  {} {}",
            green("✔"),
            bold(&source),
            bold(&format!("{:.2}", result.total_score)),
            bold(result.grade.letter()),
            dim(&result.grade_description),
        );
        eprintln!(
            "   {}  →  {}",
            dim(&format!("{:.1}s", start.elapsed().as_secs_f64())),
            bold(&output_path.display().to_string()),
        );
    }
    Ok(())
}
