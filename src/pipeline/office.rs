//! Word (`.docx`) and PowerPoint (`.pptx`) extraction.
//!
//! Both formats are zip containers of XML parts. Text comes from the main
//! parts (`word/document.xml`, `ppt/slides/slideN.xml`), images from the
//! media parts their relationship files point at.
//!
//! ## Text rules
//!
//! * **docx**: every `w:p` paragraph in document order (tables and text
//!   boxes included), joined with `\n`. `w:tab` becomes `\t`, `w:br` / `w:cr`
//!   become `\n`.
//! * **pptx**: slides in presentation order; every text body (`txBody`) is
//!   one block whose paragraphs are joined with `\n`; blocks are joined with
//!   `\n`.
//!
//! ## Image rules
//!
//! Images referenced from the content (`a:blip r:embed`, VML
//! `v:imagedata r:id`) come first in document order, then any image
//! relationship of the main part that was not referenced. Each media part is
//! emitted once. External (linked) images are skipped, as are payloads no
//! backend can display (see [`encode::encode_embedded`]).
//!
//! These functions are blocking; the ingestor runs them in `spawn_blocking`.

use crate::error::AnalyzerError;
use crate::output::{ExtractedContent, ExtractedImage};
use crate::pipeline::encode;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

const DOCX_MAIN: &str = "word/document.xml";
const DOCX_RELS: &str = "word/_rels/document.xml.rels";
const PPTX_MAIN: &str = "ppt/presentation.xml";
const PPTX_RELS: &str = "ppt/_rels/presentation.xml.rels";

// ── Word ─────────────────────────────────────────────────────────────────

/// Extract paragraph text and embedded images from a `.docx`.
pub fn extract_docx(path: &Path) -> Result<ExtractedContent, AnalyzerError> {
    let mut archive = open_archive(path)?;
    let fail = |detail: String| AnalyzerError::extraction(path, detail);

    let xml = read_part(&mut archive, DOCX_MAIN)
        .map_err(&fail)?
        .ok_or_else(|| fail(format!("missing {DOCX_MAIN}: not a Word document")))?;
    let body = parse_docx_body(&xml).map_err(|e| fail(format!("{DOCX_MAIN}: {e}")))?;

    let rels = match read_part(&mut archive, DOCX_RELS).map_err(&fail)? {
        Some(rels_xml) => parse_relationships(&rels_xml).map_err(|e| fail(format!("{DOCX_RELS}: {e}")))?,
        None => Vec::new(),
    };

    let images = collect_images(&mut archive, "word", &body.image_refs, &rels);
    let text = body.paragraphs.join("\n");

    info!(
        "DOCX extracted: {} paragraphs, {} chars, {} images",
        body.paragraphs.len(),
        text.chars().count(),
        images.len()
    );
    Ok(ExtractedContent { text, images })
}

struct DocxBody {
    paragraphs: Vec<String>,
    image_refs: Vec<String>,
}

fn parse_docx_body(xml: &str) -> Result<DocxBody, String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut image_refs = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(&reader, e))? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => open.push(String::new()),
                b"w:t" => in_text = true,
                _ => collect_image_ref(&e, &mut image_refs)?,
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:p" => paragraphs.push(String::new()),
                b"w:tab" => push_to(&mut open, "\t"),
                b"w:br" | b"w:cr" => push_to(&mut open, "\n"),
                _ => collect_image_ref(&e, &mut image_refs)?,
            },
            Event::Text(t) if in_text => {
                let s = t.unescape().map_err(|e| e.to_string())?;
                push_to(&mut open, &s);
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if let Some(p) = open.pop() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(DocxBody {
        paragraphs,
        image_refs,
    })
}

fn push_to(open: &mut [String], s: &str) {
    if let Some(current) = open.last_mut() {
        current.push_str(s);
    }
}

// ── PowerPoint ───────────────────────────────────────────────────────────

/// Extract shape text and picture images from a `.pptx`.
pub fn extract_pptx(path: &Path) -> Result<ExtractedContent, AnalyzerError> {
    let mut archive = open_archive(path)?;
    let fail = |detail: String| AnalyzerError::extraction(path, detail);

    let slides = slide_parts(&mut archive).map_err(&fail)?;
    if slides.is_empty() && read_part(&mut archive, PPTX_MAIN).map_err(&fail)?.is_none() {
        return Err(fail(format!("missing {PPTX_MAIN}: not a PowerPoint presentation")));
    }

    let mut blocks: Vec<String> = Vec::new();
    let mut images: Vec<ExtractedImage> = Vec::new();
    let mut seen_media: HashSet<String> = HashSet::new();

    for slide in &slides {
        let Some(xml) = read_part(&mut archive, slide).map_err(&fail)? else {
            warn!("Slide part {} listed but missing", slide);
            continue;
        };
        let parsed = parse_slide(&xml).map_err(|e| fail(format!("{slide}: {e}")))?;
        blocks.extend(parsed.blocks);

        let rels_name = rels_part_for(slide);
        let rels = match read_part(&mut archive, &rels_name).map_err(&fail)? {
            Some(rels_xml) => {
                parse_relationships(&rels_xml).map_err(|e| fail(format!("{rels_name}: {e}")))?
            }
            None => Vec::new(),
        };
        let base = parent_dir(slide);
        for id in &parsed.image_refs {
            let Some(rel) = rels.iter().find(|r| &r.id == id && !r.external) else {
                continue;
            };
            let part = resolve_target(base, &rel.target);
            if seen_media.insert(part.clone()) {
                if let Some(img) = read_image(&mut archive, &part) {
                    images.push(img);
                }
            }
        }
    }

    let text = blocks.join("\n");
    info!(
        "PPTX extracted: {} slides, {} chars, {} images",
        slides.len(),
        text.chars().count(),
        images.len()
    );
    Ok(ExtractedContent { text, images })
}

struct SlideContent {
    blocks: Vec<String>,
    image_refs: Vec<String>,
}

fn parse_slide(xml: &str) -> Result<SlideContent, String> {
    let mut reader = Reader::from_str(xml);
    let mut blocks = Vec::new();
    let mut image_refs = Vec::new();

    // Paragraphs of the text body currently open; `None` outside a txBody.
    let mut body: Option<Vec<String>> = None;
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(&reader, e))? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"txBody" => body = Some(Vec::new()),
                b"p" => {
                    if let Some(paras) = body.as_mut() {
                        paras.push(String::new());
                    }
                }
                b"t" => in_text = body.is_some(),
                _ => collect_image_ref(&e, &mut image_refs)?,
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(paras) = body.as_mut() {
                        paras.push(String::new());
                    }
                }
                b"br" => {
                    if let Some(p) = body.as_mut().and_then(|b| b.last_mut()) {
                        p.push('\n');
                    }
                }
                _ => collect_image_ref(&e, &mut image_refs)?,
            },
            Event::Text(t) if in_text => {
                let s = t.unescape().map_err(|e| e.to_string())?;
                if let Some(p) = body.as_mut().and_then(|b| b.last_mut()) {
                    p.push_str(&s);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"txBody" => {
                    if let Some(paras) = body.take() {
                        blocks.push(paras.join("\n"));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(SlideContent { blocks, image_refs })
}

/// Slide part names in presentation order.
///
/// Follows `p:sldIdLst` through the presentation relationships; falls back
/// to numeric order of `ppt/slides/slideN.xml` when that chain is missing.
fn slide_parts<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>, String> {
    if let (Some(pres), Some(rels_xml)) = (
        read_part(archive, PPTX_MAIN)?,
        read_part(archive, PPTX_RELS)?,
    ) {
        let ids = slide_ids(&pres).map_err(|e| format!("{PPTX_MAIN}: {e}"))?;
        let rels = parse_relationships(&rels_xml).map_err(|e| format!("{PPTX_RELS}: {e}"))?;
        let ordered: Vec<String> = ids
            .iter()
            .filter_map(|id| rels.iter().find(|r| &r.id == id))
            .map(|r| resolve_target("ppt", &r.target))
            .collect();
        if !ordered.is_empty() {
            return Ok(ordered);
        }
    }

    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    numbered.sort();
    debug!("Slide order from part names: {} slides", numbered.len());
    Ok(numbered.into_iter().map(|(_, name)| name).collect())
}

/// `r:id` values of `p:sldId` entries, in order.
fn slide_ids(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut ids = Vec::new();
    loop {
        match reader.read_event().map_err(|e| xml_error(&reader, e))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sldId" => {
                if let Some(id) = prefixed_attr(&e, b"id")? {
                    ids.push(id);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

// ── Shared OOXML plumbing ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    external: bool,
}

impl Relationship {
    fn is_image(&self) -> bool {
        self.rel_type.ends_with("/image")
    }
}

fn parse_relationships(xml: &str) -> Result<Vec<Relationship>, String> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event().map_err(|e| xml_error(&reader, e))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut rel = Relationship {
                    id: String::new(),
                    rel_type: String::new(),
                    target: String::new(),
                    external: false,
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    let value = attr.unescape_value().map_err(|e| e.to_string())?;
                    match attr.key.local_name().as_ref() {
                        b"Id" => rel.id = value.into_owned(),
                        b"Type" => rel.rel_type = value.into_owned(),
                        b"Target" => rel.target = value.into_owned(),
                        b"TargetMode" => rel.external = value.eq_ignore_ascii_case("external"),
                        _ => {}
                    }
                }
                rels.push(rel);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// Record `r:embed` of `a:blip` and `r:id` of `v:imagedata`.
fn collect_image_ref(e: &BytesStart<'_>, refs: &mut Vec<String>) -> Result<(), String> {
    let attr = match e.local_name().as_ref() {
        b"blip" => b"embed".as_slice(),
        b"imagedata" => b"id".as_slice(),
        _ => return Ok(()),
    };
    if let Some(id) = prefixed_attr(e, attr)? {
        refs.push(id);
    }
    Ok(())
}

/// Value of a namespace-prefixed attribute (`r:id`, not a bare `id`).
fn prefixed_attr(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.prefix().is_some() && attr.key.local_name().as_ref() == local {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Images referenced in `refs` order, then unreferenced image relationships.
fn collect_images<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    base: &str,
    refs: &[String],
    rels: &[Relationship],
) -> Vec<ExtractedImage> {
    let referenced = refs
        .iter()
        .filter_map(|id| rels.iter().find(|r| &r.id == id));
    let unreferenced = rels.iter().filter(|r| r.is_image());

    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for rel in referenced.chain(unreferenced) {
        if rel.external || !rel.is_image() {
            continue;
        }
        let part = resolve_target(base, &rel.target);
        if !seen.insert(part.clone()) {
            continue;
        }
        if let Some(img) = read_image(archive, &part) {
            images.push(img);
        }
    }
    images
}

fn read_image<R: Read + Seek>(archive: &mut ZipArchive<R>, part: &str) -> Option<ExtractedImage> {
    match read_bytes(archive, part) {
        Ok(Some(bytes)) => encode::encode_embedded(&bytes),
        Ok(None) => {
            warn!("Image part {} referenced but missing", part);
            None
        }
        Err(e) => {
            warn!("Image part {} unreadable: {}", part, e);
            None
        }
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, AnalyzerError> {
    let file = File::open(path).map_err(|_| AnalyzerError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    ZipArchive::new(file).map_err(|e| {
        AnalyzerError::extraction(path, format!("not a valid Office Open XML container: {e}"))
    })
}

fn read_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, String> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(format!("{name}: {e}")),
    };
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| format!("{name}: {e}"))?;
    Ok(Some(buf))
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, String> {
    match read_bytes(archive, name)? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| format!("{name}: not valid UTF-8")),
        None => Ok(None),
    }
}

fn xml_error(reader: &Reader<&[u8]>, e: quick_xml::Error) -> String {
    format!("XML error at byte {}: {}", reader.buffer_position(), e)
}

/// `ppt/slides/slide1.xml` → `ppt/slides/_rels/slide1.xml.rels`.
fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve a relationship target against the directory of its source part.
///
/// Absolute targets (`/word/media/x.png`) are package-rooted; `..` segments
/// are collapsed.
fn resolve_target(base: &str, target: &str) -> String {
    let mut segments: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|s| !s.is_empty()).collect()
    };
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}
