//! The fixed FA scoring rubric: six weighted dimensions and the grade table.
//!
//! Both tables are compile-time constants. The prompt embeds them, the
//! normaliser validates model output against them, and the text report reads
//! weights from them, so they must stay in one place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One rubric dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimension {
    /// Display name; also the key the model must use in `dimension_scores`.
    pub name: &'static str,
    /// Weight as a fraction of the total score (the six weights sum to 1.0).
    pub weight: f64,
}

impl Dimension {
    /// Weight as a whole percentage, as shown in the prompt.
    pub fn weight_percent(&self) -> u32 {
        (self.weight * 100.0).round() as u32
    }
}

/// The six rubric dimensions, in prompt order.
pub const DIMENSIONS: [Dimension; 6] = [
    Dimension { name: "基本資訊完整性", weight: 0.15 },
    Dimension { name: "問題描述與定義", weight: 0.15 },
    Dimension { name: "分析方法與流程", weight: 0.20 },
    Dimension { name: "數據與證據支持", weight: 0.20 },
    Dimension { name: "根因分析", weight: 0.20 },
    Dimension { name: "改善對策", weight: 0.10 },
];

/// Look up a dimension by its (trimmed) name.
pub fn dimension(name: &str) -> Option<&'static Dimension> {
    let name = name.trim();
    DIMENSIONS.iter().find(|d| d.name == name)
}

// ── Grades ───────────────────────────────────────────────────────────────

/// Letter grade of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn letter(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn description(&self) -> &'static str {
        GRADE_TABLE
            .iter()
            .find(|band| band.grade == *self)
            .map(|band| band.description)
            .unwrap_or("不合格報告")
    }

    /// Parse a model-supplied grade such as `"B"`, `"b"` or `"B級"`.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().chars().next()?.to_ascii_uppercase() {
            'A' => Some(Grade::A),
            'B' => Some(Grade::B),
            'C' => Some(Grade::C),
            'D' => Some(Grade::D),
            'F' => Some(Grade::F),
            _ => None,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// A row of the grade table.
///
/// Bands are half-open `[low, high)` so fractional scores between the
/// integer bounds (89.5, 59.999) land in the lower band. The top band is
/// closed at 100.
#[derive(Debug, Clone, Copy)]
pub struct GradeBand {
    pub grade: Grade,
    pub low: f64,
    pub high: f64,
    pub description: &'static str,
}

impl GradeBand {
    fn contains(&self, score: f64) -> bool {
        if self.high >= 100.0 {
            score >= self.low && score <= self.high
        } else {
            score >= self.low && score < self.high
        }
    }
}

/// Ordered grade table, best first.
pub const GRADE_TABLE: [GradeBand; 5] = [
    GradeBand { grade: Grade::A, low: 90.0, high: 100.0, description: "卓越報告" },
    GradeBand { grade: Grade::B, low: 80.0, high: 90.0, description: "良好報告" },
    GradeBand { grade: Grade::C, low: 70.0, high: 80.0, description: "合格報告" },
    GradeBand { grade: Grade::D, low: 60.0, high: 70.0, description: "待改進報告" },
    GradeBand { grade: Grade::F, low: 0.0, high: 60.0, description: "不合格報告" },
];

/// Map a total score to its grade and description.
///
/// Scores outside every band (negative, above 100, NaN) fall to the lowest
/// grade.
pub fn calculate_grade(total_score: f64) -> (Grade, &'static str) {
    GRADE_TABLE
        .iter()
        .find(|band| band.contains(total_score))
        .map(|band| (band.grade, band.description))
        .unwrap_or((Grade::F, "不合格報告"))
}

/// Weighted sum of per-dimension percentages (each 0–100).
pub fn weighted_total<'a>(percentages: impl IntoIterator<Item = (&'a str, f64)>) -> f64 {
    percentages
        .into_iter()
        .filter_map(|(name, pct)| dimension(name).map(|d| d.weight * pct))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let sum: f64 = DIMENSIONS.iter().map(|d| d.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        let pct: u32 = DIMENSIONS.iter().map(|d| d.weight_percent()).sum();
        assert_eq!(pct, 100);
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(calculate_grade(90.0).0, Grade::A);
        assert_eq!(calculate_grade(89.999).0, Grade::B);
        assert_eq!(calculate_grade(60.0).0, Grade::D);
        assert_eq!(calculate_grade(59.999).0, Grade::F);
        assert_eq!(calculate_grade(100.0).0, Grade::A);
        assert_eq!(calculate_grade(0.0).0, Grade::F);
    }

    #[test]
    fn out_of_range_scores_fall_to_f() {
        assert_eq!(calculate_grade(-1.0), (Grade::F, "不合格報告"));
        assert_eq!(calculate_grade(100.5).0, Grade::F);
        assert_eq!(calculate_grade(f64::NAN).0, Grade::F);
    }

    #[test]
    fn descriptions_follow_table() {
        assert_eq!(calculate_grade(85.0), (Grade::B, "良好報告"));
        assert_eq!(Grade::C.description(), "合格報告");
        assert_eq!(Grade::D.to_string(), "D");
    }

    #[test]
    fn loose_grade_parsing() {
        assert_eq!(Grade::parse_loose("B"), Some(Grade::B));
        assert_eq!(Grade::parse_loose(" a級"), Some(Grade::A));
        assert_eq!(Grade::parse_loose(""), None);
        assert_eq!(Grade::parse_loose("優"), None);
    }

    #[test]
    fn dimension_lookup_trims() {
        assert_eq!(dimension(" 根因分析 ").map(|d| d.weight), Some(0.20));
        assert!(dimension("其他").is_none());
    }

    #[test]
    fn weighted_total_of_perfect_report() {
        let all = DIMENSIONS.iter().map(|d| (d.name, 100.0));
        assert!((weighted_total(all) - 100.0).abs() < 1e-9);
    }
}
