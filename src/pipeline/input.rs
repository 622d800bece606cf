//! Input resolution: probe the report format and, for legacy binary Office
//! files, convert to the Open XML equivalent first.
//!
//! ## Why convert into a TempDir?
//!
//! `.ppt` and `.doc` are opaque binary formats; the ingestor only reads the
//! zip-of-XML formats. An office suite can convert them, but the converted
//! file must never outlive the analysis. Converting into a `TempDir` owned by
//! [`ResolvedInput`] means the artefact is removed when the resolved input is
//! dropped, on success, on error and on panic alike. The source file is
//! never touched.

use crate::error::AnalyzerError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extensions accepted by the ingestor (lower-case, without the dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "doc", "pptx", "ppt", "txt", "jpg", "jpeg", "png", "gif", "webp",
];

/// The format family of a report file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// jpg / jpeg / png / gif / webp: the file itself is the only content.
    Image,
    /// UTF-8 plain text.
    Text,
    Pdf,
    Docx,
    Pptx,
    /// Legacy binary Word; converted to docx before extraction.
    LegacyDoc,
    /// Legacy binary PowerPoint; converted to pptx before extraction.
    LegacyPpt,
}

impl ReportFormat {
    /// Map a lower-case extension (no dot) to its format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" | "png" | "gif" | "webp" => Some(Self::Image),
            "txt" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "doc" => Some(Self::LegacyDoc),
            "ppt" => Some(Self::LegacyPpt),
            _ => None,
        }
    }

    fn conversion_target(&self) -> Option<(&'static str, ReportFormat)> {
        match self {
            Self::LegacyDoc => Some(("docx", Self::Docx)),
            Self::LegacyPpt => Some(("pptx", Self::Pptx)),
            _ => None,
        }
    }
}

/// Lower-case extension of `path` without the dot (empty when absent).
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Check existence and format without reading content.
///
/// Cheap enough to run before a task is marked `processing`.
pub fn probe(path: &Path) -> Result<ReportFormat, AnalyzerError> {
    if !path.is_file() {
        return Err(AnalyzerError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let ext = extension_of(path);
    ReportFormat::from_extension(&ext).ok_or_else(|| AnalyzerError::UnsupportedFormat {
        hint: format!("Supported formats: {}", SUPPORTED_EXTENSIONS.join(", ")),
        extension: if ext.is_empty() { "(none)".to_string() } else { ext },
    })
}

/// A report ready for extraction.
pub enum ResolvedInput {
    /// The file can be read as-is.
    Local { path: PathBuf, format: ReportFormat },
    /// A legacy file converted into a scratch directory.
    /// The `TempDir` is kept alive until extraction completes.
    Converted {
        path: PathBuf,
        format: ReportFormat,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    /// Path to the file to extract from.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } => path,
            ResolvedInput::Converted { path, .. } => path,
        }
    }

    /// Format of [`Self::path`] (never a legacy format).
    pub fn format(&self) -> ReportFormat {
        match self {
            ResolvedInput::Local { format, .. } => *format,
            ResolvedInput::Converted { format, .. } => *format,
        }
    }
}

/// Resolve `path` to an extractable file, converting legacy formats.
pub async fn resolve_input(
    path: &Path,
    conversion_timeout_secs: u64,
) -> Result<ResolvedInput, AnalyzerError> {
    let format = probe(path)?;
    match format.conversion_target() {
        None => {
            debug!("Resolved local report: {} ({:?})", path.display(), format);
            Ok(ResolvedInput::Local {
                path: path.to_path_buf(),
                format,
            })
        }
        Some((target_ext, target_format)) => {
            let timeout = Duration::from_secs(conversion_timeout_secs);
            convert_legacy(path, target_ext, target_format, timeout, &office_commands()).await
        }
    }
}

// ── Legacy conversion ────────────────────────────────────────────────────

/// An office-suite executable that understands `--headless --convert-to`.
#[derive(Debug, Clone)]
pub(crate) struct OfficeCommand {
    pub program: String,
    /// Arguments placed before the conversion arguments.
    pub prefix: Vec<String>,
}

impl OfficeCommand {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            prefix: Vec::new(),
        }
    }
}

/// Office-suite executables tried in order.
fn office_commands() -> Vec<OfficeCommand> {
    [
        "soffice",
        "libreoffice",
        "/Applications/LibreOffice.app/Contents/MacOS/soffice",
        "/usr/bin/libreoffice",
        r"C:\Program Files\LibreOffice\program\soffice.exe",
    ]
    .into_iter()
    .map(OfficeCommand::new)
    .collect()
}

pub(crate) async fn convert_legacy(
    source: &Path,
    target_ext: &str,
    target_format: ReportFormat,
    timeout: Duration,
    commands: &[OfficeCommand],
) -> Result<ResolvedInput, AnalyzerError> {
    let source_ext = extension_of(source);
    info!(
        "Converting legacy .{} report to .{}: {}",
        source_ext,
        target_ext,
        source.display()
    );

    let temp_dir = TempDir::new()
        .map_err(|e| AnalyzerError::Internal(format!("Failed to create scratch dir: {}", e)))?;
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let expected = temp_dir.path().join(format!("{stem}.{target_ext}"));

    for cmd in commands {
        if try_office_suite(cmd, source, target_ext, temp_dir.path(), timeout).await
            && expected.is_file()
        {
            info!("Converted with {}: {}", cmd.program, expected.display());
            return Ok(ResolvedInput::Converted {
                path: expected,
                format: target_format,
                _temp_dir: temp_dir,
            });
        }
    }

    if try_com_automation(source, &expected, target_format, timeout).await && expected.is_file() {
        info!("Converted with Office automation: {}", expected.display());
        return Ok(ResolvedInput::Converted {
            path: expected,
            format: target_format,
            _temp_dir: temp_dir,
        });
    }

    // `temp_dir` dropped here: any partial output is removed.
    Err(AnalyzerError::UnsupportedFormat {
        extension: source_ext,
        hint: format!(
            "Automatic conversion to .{ext} failed (no working LibreOffice or Microsoft Office found).\n\
             Open the file in Office and save it as .{ext}, or run:\n  \
             libreoffice --headless --convert-to {ext} \"{path}\"",
            ext = target_ext,
            path = source.display()
        ),
    })
}

/// Run one office-suite conversion attempt. `true` when the process exited 0.
async fn try_office_suite(
    cmd: &OfficeCommand,
    source: &Path,
    target_ext: &str,
    out_dir: &Path,
    timeout: Duration,
) -> bool {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.prefix)
        .arg("--headless")
        .arg("--convert-to")
        .arg(target_ext)
        .arg("--outdir")
        .arg(out_dir)
        .arg(source)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!("{} unavailable: {}", cmd.program, e);
            return false;
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => true,
        Ok(Ok(output)) => {
            warn!(
                "{} exited with {}: {}",
                cmd.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Ok(Err(e)) => {
            warn!("{} failed: {}", cmd.program, e);
            false
        }
        Err(_) => {
            warn!("{} timed out after {:?}", cmd.program, timeout);
            false
        }
    }
}

/// Fallback on Windows: drive PowerPoint / Word through PowerShell COM.
async fn try_com_automation(
    source: &Path,
    target: &Path,
    target_format: ReportFormat,
    timeout: Duration,
) -> bool {
    if !cfg!(windows) {
        return false;
    }
    let Some(script) = com_script(source, target, target_format) else {
        return false;
    };

    let mut command = Command::new("powershell");
    command
        .args(["-NoProfile", "-NonInteractive", "-Command", script.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!("PowerShell unavailable: {}", e);
            return false;
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => true,
        Ok(Ok(output)) => {
            warn!(
                "Office automation failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Ok(Err(e)) => {
            warn!("Office automation failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Office automation timed out after {:?}", timeout);
            false
        }
    }
}

/// PowerShell script saving `source` as Open XML at `target`.
fn com_script(source: &Path, target: &Path, target_format: ReportFormat) -> Option<String> {
    let src = ps_quote(&source.to_string_lossy());
    let dst = ps_quote(&target.to_string_lossy());
    match target_format {
        // 24 = ppSaveAsOpenXMLPresentation
        ReportFormat::Pptx => Some(format!(
            "$app = New-Object -ComObject PowerPoint.Application; \
             $p = $app.Presentations.Open({src}, $true, $false, $false); \
             $p.SaveAs({dst}, 24); $p.Close(); $app.Quit()"
        )),
        // 16 = wdFormatXMLDocument
        ReportFormat::Docx => Some(format!(
            "$app = New-Object -ComObject Word.Application; $app.Visible = $false; \
             $d = $app.Documents.Open({src}, $false, $true); \
             $d.SaveAs([ref] {dst}, [ref] 16); $d.Close(); $app.Quit()"
        )),
        _ => None,
    }
}

/// Single-quoted PowerShell string literal.
fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
