//! Document ingestion: dispatch a resolved report to its format extractor.
//!
//! | Format | Text | Images |
//! |--------|------|--------|
//! | jpg/jpeg/png/gif/webp | `[圖片文件: <name>]` placeholder | the file itself |
//! | txt | verbatim (UTF-8) | none |
//! | pdf | per-page text, `\n` after each page | embedded image objects |
//! | docx / doc | paragraphs joined with `\n` | relationship image parts |
//! | pptx / ppt | text bodies joined with `\n` | slide picture parts |

use crate::error::AnalyzerError;
use crate::output::ExtractedContent;
use crate::pipeline::encode;
use crate::pipeline::input::{self, extension_of, ReportFormat, ResolvedInput};
use crate::pipeline::{office, pdf};
use std::path::Path;
use tracing::{debug, info};

/// Resolve and extract a report in one step.
///
/// Any scratch file produced by legacy conversion is removed before this
/// returns, whether extraction succeeded or not.
pub async fn read_report(
    path: &Path,
    conversion_timeout_secs: u64,
) -> Result<ExtractedContent, AnalyzerError> {
    let resolved = input::resolve_input(path, conversion_timeout_secs).await?;
    let content = ingest(&resolved).await;
    drop(resolved);
    content
}

/// Extract text and images from an already-resolved report.
pub async fn ingest(resolved: &ResolvedInput) -> Result<ExtractedContent, AnalyzerError> {
    let path = resolved.path();
    info!("Reading report: {} ({:?})", path.display(), resolved.format());

    let content = match resolved.format() {
        ReportFormat::Image => read_image_file(path).await?,
        ReportFormat::Text => read_text_file(path).await?,
        ReportFormat::Pdf => pdf::extract_pdf(path).await?,
        ReportFormat::Docx => run_blocking(path, office::extract_docx).await?,
        ReportFormat::Pptx => run_blocking(path, office::extract_pptx).await?,
        ReportFormat::LegacyDoc | ReportFormat::LegacyPpt => {
            return Err(AnalyzerError::Internal(format!(
                "legacy .{} file reached extraction without conversion",
                extension_of(path)
            )))
        }
    };

    debug!(
        "Extracted {} chars, {} images",
        content.text.chars().count(),
        content.images.len()
    );
    Ok(content)
}

async fn read_image_file(path: &Path) -> Result<ExtractedContent, AnalyzerError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AnalyzerError::extraction(path, e))?;
    if bytes.is_empty() {
        return Err(AnalyzerError::extraction(path, "image file is empty"));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ExtractedContent {
        text: format!("[圖片文件: {name}]"),
        images: vec![encode::encode_bytes(&bytes, &extension_of(path))],
    })
}

async fn read_text_file(path: &Path) -> Result<ExtractedContent, AnalyzerError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AnalyzerError::extraction(path, e))?;
    let mut text = String::from_utf8(bytes)
        .map_err(|e| AnalyzerError::extraction(path, format!("text is not valid UTF-8: {e}")))?;
    if text.starts_with('\u{feff}') {
        text.remove(0);
    }
    Ok(ExtractedContent {
        text,
        images: Vec::new(),
    })
}

async fn run_blocking(
    path: &Path,
    extract: fn(&Path) -> Result<ExtractedContent, AnalyzerError>,
) -> Result<ExtractedContent, AnalyzerError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract(&owned))
        .await
        .map_err(|e| AnalyzerError::Internal(format!("Extraction task panicked: {}", e)))?
}
