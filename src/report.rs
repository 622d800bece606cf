//! Export of an [`AnalysisResult`] as a plain-text report or JSON.
//!
//! The text layout is consumed by existing downstream tooling, so every
//! banner, label and number format here is fixed.

use crate::output::{AnalysisResult, Improvement};
use crate::rubric::DIMENSIONS;

const WIDTH: usize = 80;

/// Render the fixed text report.
///
/// Dimensions appear in rubric order. Sections without content (strengths,
/// improvements, summary, a dimension's comment) are omitted.
///
/// Improvements are written as `i. [priority] item: suggestion` rather than
/// the legacy export's bare `i. <improvement>` line.
pub fn render_text_report(result: &AnalysisResult, source_filename: &str) -> String {
    let heavy = "=".repeat(WIDTH);
    let light = "-".repeat(WIDTH);
    let mut lines: Vec<String> = Vec::new();

    lines.push(heavy.clone());
    lines.push("FA 報告評分結果".into());
    lines.push(heavy.clone());
    lines.push(format!("\n來源文件: {source_filename}"));
    lines.push(format!("總分: {:.2} / 100", result.total_score));
    lines.push(format!("等級: {}", result.grade));
    lines.push(String::new());

    lines.push(light.clone());
    lines.push("各維度評分詳情".into());
    lines.push(light.clone());

    for dim in DIMENSIONS {
        let Some(score) = result.dimension_scores.get(dim.name) else {
            continue;
        };
        lines.push(format!("\n【{}】", dim.name));
        lines.push(format!(
            "  得分: {:.1} / 100  ({:.1}%)",
            score.score, score.percentage
        ));
        lines.push(format!("  權重: {:.0}%", score.weight * 100.0));
        lines.push(format!("  加權分數: {:.2}", score.weighted_score));

        let comments: Vec<&str> = score
            .comment
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if !comments.is_empty() {
            lines.push("  評語:".into());
            lines.extend(comments.iter().map(|c| format!("    - {c}")));
        }
    }

    if !result.strengths.is_empty() {
        section(&mut lines, &light, "報告優點");
        for (i, strength) in result.strengths.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, strength));
        }
    }

    if !result.improvements.is_empty() {
        section(&mut lines, &light, "改進建議");
        for (i, improvement) in result.improvements.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, improvement_line(improvement)));
        }
    }

    if !result.summary.is_empty() {
        section(&mut lines, &light, "總結評語");
        lines.push(result.summary.clone());
    }

    lines.push(format!("\n{heavy}"));
    lines.push("報告結束".into());
    lines.push(heavy);

    lines.join("\n")
}

/// Pretty-printed JSON of the result.
pub fn to_json(result: &AnalysisResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}

fn section(lines: &mut Vec<String>, rule: &str, title: &str) {
    lines.push(format!("\n{rule}"));
    lines.push(title.to_string());
    lines.push(rule.to_string());
}

fn improvement_line(imp: &Improvement) -> String {
    let mut line = String::new();
    if !imp.priority.is_empty() {
        line.push_str(&format!("[{}] ", imp.priority));
    }
    line.push_str(&imp.item);
    if !imp.suggestion.is_empty() {
        line.push_str(&format!(": {}", imp.suggestion));
    }
    line
}
