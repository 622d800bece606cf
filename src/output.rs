//! Data types flowing through and out of the analysis pipeline.
//!
//! [`ExtractedContent`] is ephemeral: produced by the ingestor, consumed by
//! the prompt builder and backend, then dropped. [`AnalysisResult`] is the
//! payload stored on a completed task and exported by [`crate::report`].

use crate::rubric::{weighted_total, Grade};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One image pulled out of a report, ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// Base64 (standard alphabet, padded) encoding of the image bytes.
    pub data: String,
    /// Lower-case format tag, e.g. `png`, `jpg`, `gif`.
    pub format: String,
}

impl ExtractedImage {
    /// MIME type for data URIs and content blocks.
    pub fn mime_type(&self) -> String {
        match self.format.as_str() {
            "jpg" | "jpeg" => "image/jpeg".to_string(),
            other => format!("image/{other}"),
        }
    }

    /// `data:image/...;base64,...` URI.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.data)
    }
}

/// Text body plus ordered images of one report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub text: String,
    pub images: Vec<ExtractedImage>,
}

impl ExtractedContent {
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Score record for a single rubric dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// Raw score as reported by the model.
    pub score: f64,
    /// Completion percentage of this dimension (0–100).
    pub percentage: f64,
    /// Rubric weight as a fraction (0.15 = 15%).
    pub weight: f64,
    /// `percentage * weight`: this dimension's contribution to the total.
    pub weighted_score: f64,
    /// Free-text evaluator comment.
    pub comment: String,
}

/// One suggested improvement, tagged with a priority (e.g. 高 / 中).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Improvement {
    pub priority: String,
    pub item: String,
    pub suggestion: String,
}

/// Canonical result of one report analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Total score 0–100 as reported by the model.
    pub total_score: f64,
    /// Letter grade, always derived from `total_score`.
    pub grade: Grade,
    pub grade_description: String,
    /// Keyed by dimension name; exactly the six rubric dimensions.
    pub dimension_scores: BTreeMap<String, DimensionScore>,
    pub strengths: Vec<String>,
    pub improvements: Vec<Improvement>,
    pub summary: String,
}

impl AnalysisResult {
    /// Sum of the per-dimension weighted contributions, using rubric weights.
    pub fn weighted_sum(&self) -> f64 {
        weighted_total(
            self.dimension_scores
                .iter()
                .map(|(name, d)| (name.as_str(), d.percentage)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpg_maps_to_jpeg_mime() {
        let img = ExtractedImage {
            data: "AAAA".into(),
            format: "jpg".into(),
        };
        assert_eq!(img.mime_type(), "image/jpeg");
        assert_eq!(img.data_uri(), "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn png_mime() {
        let img = ExtractedImage {
            data: String::new(),
            format: "png".into(),
        };
        assert_eq!(img.mime_type(), "image/png");
    }

    #[test]
    fn weighted_sum_uses_rubric_weights() {
        let score = |percentage: f64| DimensionScore {
            score: percentage,
            percentage,
            weight: 0.0,
            weighted_score: 0.0,
            comment: String::new(),
        };
        let mut dimension_scores = BTreeMap::new();
        dimension_scores.insert("根因分析".to_string(), score(80.0));
        dimension_scores.insert("改善對策".to_string(), score(50.0));
        dimension_scores.insert("其他".to_string(), score(100.0));
        let result = AnalysisResult {
            total_score: 21.0,
            grade: Grade::F,
            grade_description: "不合格報告".into(),
            dimension_scores,
            strengths: vec![],
            improvements: vec![],
            summary: String::new(),
        };
        assert!((result.weighted_sum() - 21.0).abs() < 1e-9);
    }

    #[test]
    fn result_serialises_grade_as_letter() {
        let result = AnalysisResult {
            total_score: 85.0,
            grade: Grade::B,
            grade_description: "良好報告".into(),
            dimension_scores: BTreeMap::new(),
            strengths: vec![],
            improvements: vec![],
            summary: String::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["grade"], "B");
        assert_eq!(json["total_score"], 85.0);
    }
}
