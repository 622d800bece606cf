//! Response normalisation: raw model reply → [`AnalysisResult`].
//!
//! ## Why a cleanup pass before parsing?
//!
//! Models are told to answer with bare JSON, yet routinely wrap it in
//! ` ```json ` fences, add a sentence before or after it, or write
//! `"percentage": 93.33%`. Three narrow, ordered text rules fix exactly
//! those quirks and nothing else:
//!
//! 1. Strip code-fence markers
//! 2. Slice from the first `{` to the last `}`
//! 3. Rewrite `: <number>%` to `: <number>`
//!
//! Anything still unparseable after these rules is a
//! [`AnalyzerError::MalformedResponse`] carrying the byte offset of the
//! parse error and a ±50 character window around it. Malformed model output
//! is the most common failure in practice, so the diagnostic is always
//! attached.
//!
//! ## Tolerated shape variations
//!
//! - `comment` as a string or a list of strings (list items become lines)
//! - `improvements` entries as objects or bare strings
//! - numeric fields as numbers or numeric strings
//! - a missing `percentage` falls back to `score`

use crate::error::AnalyzerError;
use crate::output::{AnalysisResult, DimensionScore, Improvement};
use crate::rubric::{self, Grade, DIMENSIONS};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Characters of context kept on each side of a parse error.
const CONTEXT_CHARS: usize = 50;

/// Allowed gap between the reported total and the weighted dimension sum.
const TOTAL_TOLERANCE: f64 = 5.0;

static PERCENT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s*(\d+\.?\d*)\s*%").unwrap());

/// Apply the three cleanup rules to a raw reply.
pub fn clean_response(raw: &str) -> String {
    let unfenced = raw.replace("```json", "").replace("```", "");
    let trimmed = unfenced.trim();
    let sliced = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    PERCENT_SUFFIX.replace_all(sliced, ": $1").into_owned()
}

/// Clean, parse and validate a raw reply.
pub fn normalize(raw: &str) -> Result<AnalysisResult, AnalyzerError> {
    debug!("Raw model response ({} chars): {}", raw.chars().count(), raw);
    let cleaned = clean_response(raw);

    let parsed: RawResult = serde_json::from_str(&cleaned).map_err(|e| {
        let offset = offset_of(&cleaned, e.line(), e.column());
        malformed(e.to_string(), offset, &cleaned)
    })?;

    let dimension_scores = validate_dimensions(parsed.dimension_scores, &cleaned)?;

    let (grade, grade_description) = rubric::calculate_grade(parsed.total_score);
    let result = AnalysisResult {
        total_score: parsed.total_score,
        grade,
        grade_description: grade_description.to_string(),
        dimension_scores,
        strengths: parsed.strengths,
        improvements: parsed.improvements.into_iter().map(Improvement::from).collect(),
        summary: parsed.summary,
    };

    let weighted = result.weighted_sum();
    if (result.total_score - weighted).abs() > TOTAL_TOLERANCE {
        warn!(
            "Reported total {:.2} differs from weighted dimension sum {:.2}",
            result.total_score, weighted
        );
    }
    if let Some(reported) = parsed.grade.as_deref() {
        if Grade::parse_loose(reported) != Some(grade) {
            warn!(
                "Model grade '{}' replaced by '{}' for total {:.2}",
                reported, grade, result.total_score
            );
        }
    }

    Ok(result)
}

// ── Dimension validation ─────────────────────────────────────────────────

fn validate_dimensions(
    raw: BTreeMap<String, RawDimension>,
    cleaned: &str,
) -> Result<BTreeMap<String, DimensionScore>, AnalyzerError> {
    let offset = cleaned.find("\"dimension_scores\"").unwrap_or(0);
    let mut scores = BTreeMap::new();

    for (name, dim) in raw {
        let Some(rubric_dim) = rubric::dimension(&name) else {
            return Err(malformed(
                format!("unknown dimension '{}'", name.trim()),
                offset,
                cleaned,
            ));
        };
        let percentage = dim.percentage.unwrap_or(dim.score);
        let score = DimensionScore {
            score: dim.score,
            percentage,
            weight: rubric_dim.weight,
            weighted_score: percentage * rubric_dim.weight,
            comment: dim.comment.into_text(),
        };
        if scores.insert(rubric_dim.name.to_string(), score).is_some() {
            return Err(malformed(
                format!("dimension '{}' appears more than once", rubric_dim.name),
                offset,
                cleaned,
            ));
        }
    }

    let missing: Vec<&str> = DIMENSIONS
        .iter()
        .map(|d| d.name)
        .filter(|name| !scores.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(malformed(
            format!("missing dimensions: {}", missing.join(", ")),
            offset,
            cleaned,
        ));
    }
    Ok(scores)
}

// ── Diagnostics ──────────────────────────────────────────────────────────

fn malformed(reason: String, offset: usize, cleaned: &str) -> AnalyzerError {
    AnalyzerError::MalformedResponse {
        reason,
        offset,
        context: context_window(cleaned, offset),
        cleaned: cleaned.to_string(),
    }
}

/// Byte offset of a 1-based serde line/column, snapped to a char boundary.
fn offset_of(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    let mut offset = (line_start + column.saturating_sub(1)).min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn context_window(text: &str, offset: usize) -> String {
    let center = text[..offset].chars().count();
    text.chars()
        .skip(center.saturating_sub(CONTEXT_CHARS))
        .take(center.min(CONTEXT_CHARS) + CONTEXT_CHARS)
        .collect()
}

// ── Wire shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(deserialize_with = "lenient_f64")]
    total_score: f64,
    #[serde(default)]
    grade: Option<String>,
    dimension_scores: BTreeMap<String, RawDimension>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<RawImprovement>,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct RawDimension {
    #[serde(deserialize_with = "lenient_f64")]
    score: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    percentage: Option<f64>,
    #[serde(default, alias = "comments")]
    comment: RawComment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum RawComment {
    Text(String),
    Lines(Vec<String>),
    #[default]
    Missing,
}

impl RawComment {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Lines(lines) => lines
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Missing => String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawImprovement {
    Structured {
        #[serde(default)]
        priority: String,
        #[serde(default)]
        item: String,
        #[serde(default)]
        suggestion: String,
    },
    Text(String),
}

impl From<RawImprovement> for Improvement {
    fn from(raw: RawImprovement) -> Self {
        match raw {
            RawImprovement::Structured {
                priority,
                item,
                suggestion,
            } => Improvement {
                priority,
                item,
                suggestion,
            },
            RawImprovement::Text(item) => Improvement {
                priority: String::new(),
                item,
                suggestion: String::new(),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Text(s) => s
                .trim()
                .trim_end_matches(['%', '分'])
                .trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("expected a number, found \"{s}\""))),
        }
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    NumberLike::deserialize(d)?.into_f64()
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Option::<NumberLike>::deserialize(d)?
        .map(NumberLike::into_f64)
        .transpose()
}
