//! PDF extraction: per-page text plus embedded raster images via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which uses thread-local
//! state and is CPU-bound. `tokio::task::spawn_blocking` moves the work onto
//! the blocking pool so Tokio worker threads never stall on a large document.
//!
//! ## Library discovery
//!
//! pdfium is bound at runtime, in order:
//! 1. `PDFIUM_LIB_PATH` / `PDFIUM_DYNAMIC_LIB_PATH` (library file or its directory)
//! 2. next to the running executable
//! 3. the system library search path
//!
//! A missing library fails only PDF reports; every other format works
//! without it.

use crate::error::AnalyzerError;
use crate::output::{ExtractedContent, ExtractedImage};
use crate::pipeline::encode;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LIB_PATH_VARS: [&str; 2] = ["PDFIUM_LIB_PATH", "PDFIUM_DYNAMIC_LIB_PATH"];

const MAX_FORM_DEPTH: usize = 16;

#[cfg(target_os = "macos")]
const LIB_NAME: &str = "libpdfium.dylib";
#[cfg(target_os = "windows")]
const LIB_NAME: &str = "pdfium.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const LIB_NAME: &str = "libpdfium.so";

/// Extract text and embedded images from the PDF at `path`.
///
/// Page text is concatenated in page order, each page followed by `\n`.
/// Images are taken from every image object on every page, including those
/// nested in form XObjects, PNG-encoded.
pub async fn extract_pdf(path: &Path) -> Result<ExtractedContent, AnalyzerError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_pdf_blocking(&path))
        .await
        .map_err(|e| AnalyzerError::Internal(format!("PDF extraction task panicked: {}", e)))?
}

/// Blocking implementation of PDF extraction.
fn extract_pdf_blocking(path: &Path) -> Result<ExtractedContent, AnalyzerError> {
    check_magic(path)?;

    let pdfium = load_pdfium().map_err(|detail| AnalyzerError::extraction(path, detail))?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| map_load_error(path, e))?;

    let mut content = ExtractedContent::default();

    for (index, page) in document.pages().iter().enumerate() {
        let page_num = index + 1;
        let page_text = page.text().map_err(|e| {
            AnalyzerError::extraction(path, format!("page {}: text layer unreadable: {}", page_num, e))
        })?;
        content.text.push_str(&page_text.all());
        content.text.push('\n');

        for object in page.objects().iter() {
            collect_images(&object, page_num, 0, &mut content.images);
        }
    }

    info!(
        "PDF extracted: {} pages, {} chars, {} images",
        document.pages().len(),
        content.text.chars().count(),
        content.images.len()
    );
    Ok(content)
}

/// PNG-encode `object` if it is an image, or every image nested inside it
/// if it is a form XObject.
fn collect_images(
    object: &PdfPageObject,
    page_num: usize,
    depth: usize,
    images: &mut Vec<ExtractedImage>,
) {
    if let Some(image_object) = object.as_image_object() {
        match image_object.get_raw_image() {
            Ok(raw) => match encode::encode_png(&raw) {
                Ok(img) => images.push(img),
                Err(e) => warn!("Page {}: failed to encode image: {}", page_num, e),
            },
            Err(e) => warn!("Page {}: skipping unreadable image: {}", page_num, e),
        }
    } else if let Some(form) = object.as_x_object_form_object() {
        if depth >= MAX_FORM_DEPTH {
            warn!("Page {}: form XObjects nested deeper than {}", page_num, MAX_FORM_DEPTH);
            return;
        }
        for child in form.iter() {
            collect_images(&child, page_num, depth + 1, images);
        }
    }
}

/// Reject files that are not PDFs before handing them to pdfium.
fn check_magic(path: &Path) -> Result<(), AnalyzerError> {
    let mut file = std::fs::File::open(path).map_err(|_| AnalyzerError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"%PDF" => Ok(()),
        _ => Err(AnalyzerError::extraction(
            path,
            format!(
                "not a PDF (expected '%PDF' header, found {:?})",
                String::from_utf8_lossy(&magic)
            ),
        )),
    }
}

/// Bind the pdfium dynamic library.
fn load_pdfium() -> Result<Pdfium, String> {
    // 1. Explicit path via env var
    for var in LIB_PATH_VARS {
        if let Ok(value) = std::env::var(var) {
            let candidate = PathBuf::from(&value);
            let lib_path = if candidate.is_dir() {
                candidate.join(LIB_NAME)
            } else {
                candidate
            };
            debug!("Loading pdfium from {}={}", var, value);
            let bindings = Pdfium::bind_to_library(&lib_path).map_err(|e| {
                format!("failed to load pdfium from {}: {}", lib_path.display(), e)
            })?;
            return Ok(Pdfium::new(bindings));
        }
    }

    // 2. Alongside the executable
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let lib_path = exe_dir.join(LIB_NAME);
        if lib_path.is_file() {
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!("Loaded pdfium from {}", exe_dir.display());
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    // 3. System library
    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        format!(
            "pdfium library not found ({e}).\n\
             Install pdfium or set PDFIUM_LIB_PATH to the libpdfium file or its directory."
        )
    })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(path: &Path, e: PdfiumError) -> AnalyzerError {
    let msg = format!("{e:?}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        AnalyzerError::extraction(path, "PDF is password-protected")
    } else {
        AnalyzerError::extraction(path, format!("failed to open PDF: {msg}"))
    }
}

/// Whether pdfium can be bound in this process.
pub fn pdfium_available() -> bool {
    load_pdfium().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HELLO_PDF: &str = "%PDF-1.4
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj
3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj
4 0 obj << /Length 39 >> stream
BT /F1 12 Tf 20 100 Td (Hello FA) Tj ET
endstream endobj
5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj
trailer << /Root 1 0 R /Size 6 >>
%%EOF
";

    #[tokio::test]
    async fn non_pdf_bytes_are_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        fs::write(&path, b"this is not a pdf").unwrap();

        let err = extract_pdf(&path).await.unwrap_err();
        assert!(
            matches!(err, AnalyzerError::ExtractionFailure { .. }),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn empty_file_is_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        fs::write(&path, b"").unwrap();
        let err = extract_pdf(&path).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::ExtractionFailure { .. }));
    }

    #[tokio::test]
    async fn extracts_page_text_when_pdfium_present() {
        if !pdfium_available() {
            eprintln!("SKIP: pdfium library not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.pdf");
        fs::write(&path, HELLO_PDF).unwrap();

        let content = extract_pdf(&path).await.unwrap();
        assert!(content.text.contains("Hello FA"), "got: {:?}", content.text);
        assert!(content.text.ends_with('\n'));
        assert!(content.images.is_empty());
    }

    /// Assemble a PDF from numbered object bodies with a valid xref table.
    fn build_pdf(objects: &[Vec<u8>]) -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            pdf.extend_from_slice(body);
            pdf.extend_from_slice(b"\nendobj\n");
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .as_bytes(),
        );
        pdf
    }

    fn stream(dict: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!("<< {dict} /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        body
    }

    /// 2x2 uncompressed RGB image XObject.
    fn rgb_image() -> Vec<u8> {
        let pixels = [255u8, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        stream(
            "/Type /XObject /Subtype /Image /Width 2 /Height 2 /ColorSpace /DeviceRGB /BitsPerComponent 8",
            &pixels,
        )
    }

    const PAINT_IMAGE: &[u8] = b"q 100 0 0 100 50 50 cm /Im1 Do Q";

    fn catalog_and_pages() -> Vec<Vec<u8>> {
        vec![
            b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
            b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec(),
        ]
    }

    async fn extract_fixture(name: &str, pdf: Vec<u8>) -> ExtractedContent {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        fs::write(&path, pdf).unwrap();
        extract_pdf(&path).await.unwrap()
    }

    #[tokio::test]
    async fn extracts_direct_image_when_pdfium_present() {
        if !pdfium_available() {
            eprintln!("SKIP: pdfium library not available");
            return;
        }
        let mut objects = catalog_and_pages();
        objects.push(
            b"<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] /Contents 4 0 R /Resources << /XObject << /Im1 5 0 R >> >> >>"
                .to_vec(),
        );
        objects.push(stream("", PAINT_IMAGE));
        objects.push(rgb_image());

        let content = extract_fixture("image.pdf", build_pdf(&objects)).await;
        assert!(!content.images.is_empty());
        assert!(content.images.iter().all(|img| img.format == "png"));
    }

    #[tokio::test]
    async fn extracts_image_nested_in_form_xobject_when_pdfium_present() {
        if !pdfium_available() {
            eprintln!("SKIP: pdfium library not available");
            return;
        }
        let mut objects = catalog_and_pages();
        objects.push(
            b"<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] /Contents 4 0 R /Resources << /XObject << /Fm1 6 0 R >> >> >>"
                .to_vec(),
        );
        objects.push(stream("", b"/Fm1 Do"));
        objects.push(rgb_image());
        objects.push(stream(
            "/Type /XObject /Subtype /Form /BBox [0 0 200 200] /Resources << /XObject << /Im1 5 0 R >> >>",
            PAINT_IMAGE,
        ));

        let content = extract_fixture("form.pdf", build_pdf(&objects)).await;
        assert!(!content.images.is_empty());
        assert!(content.images.iter().all(|img| img.format == "png"));
    }
}
