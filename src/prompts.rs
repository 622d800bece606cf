//! Prompt construction for FA report scoring.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the rubric text is generated from the
//!    constants in [`crate::rubric`], so the weights the model sees can never
//!    drift from the weights the normaliser applies.
//!
//! 2. **Testability**: unit tests inspect the prompt directly without a
//!    backend, making prompt regressions easy to catch.
//!
//! [`build_analysis_prompt`] is pure and backend-agnostic.

use crate::rubric::{DIMENSIONS, GRADE_TABLE};
use std::fmt::Write as _;

/// Evaluation criteria listed under each dimension, in [`DIMENSIONS`] order.
const DIMENSION_CRITERIA: [&[&str]; 6] = [
    &[
        "產品資訊(型號、批號、製造日期)",
        "客戶資訊與投訴內容",
        "FA 編號與日期",
        "負責工程師資訊",
    ],
    &[
        "失效現象描述的清晰度",
        "失效模式的準確性",
        "問題範圍與影響評估",
        "失效率數據",
    ],
    &[
        "分析方法的適當性(如:光學檢查、SEM、FIB、X-ray等)",
        "分析步驟的邏輯性與完整性",
        "實驗設計的合理性",
        "分析設備使用的正確性",
    ],
    &[
        "分析數據的充分性",
        "圖片/圖表的清晰度與標註",
        "量化數據的準確性",
        "對照組/比較樣本的使用",
    ],
    &[
        "根本原因的深度與準確度",
        "因果關係的邏輯推導",
        "5-Why 或 Fishbone 分析的應用",
        "排除其他可能原因的論證",
    ],
    &[
        "短期與長期對策的完整性",
        "對策的可行性與有效性",
        "預防措施的提出",
        "驗證計畫",
    ],
];

/// Added when the report carries images.
pub const IMAGE_NOTE: &str = "
【注意】此報告包含圖片,請仔細分析圖片中的內容:
- 檢查圖片的清晰度和標註
- 評估圖片是否充分支持分析結論
- 判斷圖表/數據視覺化的品質
";

/// Output format rules appended after the schema sketch.
pub const FORMAT_RULES: &str = "重要格式要求:
1. 你的回應必須是純 JSON 格式,不要包含任何其他文字、markdown 標記或程式碼區塊符號
2. 所有數字欄位(total_score, score, percentage)必須是純數字,不要加單位或符號(例如: 85.5 而不是 85.5% 或 85.5分)
3. percentage 是百分比數值(0-100),例如: 93.33 表示 93.33%
4. 使用台灣繁體中文回答";

/// Marker line preceding the verbatim report text.
pub const REPORT_MARKER: &str = "【FA 報告內容】";

/// Build the single instruction sent to every backend.
///
/// The report text is appended verbatim after [`REPORT_MARKER`].
pub fn build_analysis_prompt(report_text: &str, has_images: bool) -> String {
    let mut p = String::with_capacity(report_text.len() + 3000);

    p.push_str("請分析這份 Failure Analysis Report,並根據以下評估維度進行全面評分:\n");
    if has_images {
        p.push_str(IMAGE_NOTE);
    }

    // ── Rubric ──
    p.push_str("\n【評估維度與權重】\n");
    for (i, (dim, criteria)) in DIMENSIONS.iter().zip(DIMENSION_CRITERIA).enumerate() {
        let _ = writeln!(p, "{}. **{}** ({}%)", i + 1, dim.name, dim.weight_percent());
        for c in criteria {
            let _ = writeln!(p, "   - {c}");
        }
        p.push('\n');
    }

    // ── Grade bands ──
    p.push_str("【評分標準】\n");
    for band in GRADE_TABLE {
        if band.low <= 0.0 {
            let _ = writeln!(
                p,
                "- **{}級 (<{}分)**:{}",
                band.grade, band.high as u32, band.description
            );
        } else {
            let _ = writeln!(
                p,
                "- **{}級 ({}-{}分)**:{}",
                band.grade,
                band.low as u32,
                upper_bound(band.high),
                band.description
            );
        }
    }

    // ── Schema sketch ──
    p.push_str("\n請以 JSON 格式回傳評估結果,格式如下:\n\n");
    p.push_str(&schema_sketch());
    p.push_str("\n\n");
    p.push_str(FORMAT_RULES);

    p.push_str("\n\n");
    p.push_str(REPORT_MARKER);
    p.push('\n');
    p.push_str(report_text);
    p.push('\n');
    p
}

/// Integer upper bound as written in the rubric (100 stays 100, 90 → 89).
fn upper_bound(high: f64) -> u32 {
    if high >= 100.0 {
        100
    } else {
        high as u32 - 1
    }
}

fn schema_sketch() -> String {
    let dims = DIMENSIONS
        .iter()
        .map(|d| {
            format!(
                "    \"{}\": {{\"score\": <分數>, \"percentage\": <百分比數字>, \"comment\": \"<評語>\"}}",
                d.name
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        r#"{{
  "total_score": <總分數字>,
  "grade": "<等級字母>",
  "dimension_scores": {{
{dims}
  }},
  "strengths": [
    "<具體優點1>",
    "<具體優點2>",
    "<具體優點3>"
  ],
  "improvements": [
    {{"priority": "高", "item": "<待改進項目>", "suggestion": "<具體改善建議>"}},
    {{"priority": "中", "item": "<待改進項目>", "suggestion": "<具體改善建議>"}}
  ],
  "summary": "<總評與建議>"
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_all_dimensions_with_weights() {
        let p = build_analysis_prompt("report body", false);
        for d in DIMENSIONS {
            assert!(p.contains(&format!("**{}** ({}%)", d.name, d.weight_percent())));
            assert!(p.contains(&format!("\"{}\": {{\"score\"", d.name)));
        }
    }

    #[test]
    fn prompt_lists_grade_bands() {
        let p = build_analysis_prompt("x", false);
        assert!(p.contains("**A級 (90-100分)**:卓越報告"));
        assert!(p.contains("**B級 (80-89分)**:良好報告"));
        assert!(p.contains("**F級 (<60分)**:不合格報告"));
    }

    #[test]
    fn report_text_is_appended_last() {
        let p = build_analysis_prompt("樣品 A 失效於 85°C", false);
        let marker = p.find(REPORT_MARKER).unwrap();
        let body = p.find("樣品 A 失效於 85°C").unwrap();
        assert!(body > marker);
        assert!(p.trim_end().ends_with("樣品 A 失效於 85°C"));
    }

    #[test]
    fn image_clause_only_when_images_present() {
        assert!(!build_analysis_prompt("x", false).contains("此報告包含圖片"));
        assert!(build_analysis_prompt("x", true).contains("此報告包含圖片"));
    }

    #[test]
    fn requests_pure_json() {
        let p = build_analysis_prompt("x", false);
        assert!(p.contains("純 JSON"));
        assert!(p.contains("\"total_score\": <總分數字>"));
    }

    #[test]
    fn prompt_is_deterministic() {
        assert_eq!(
            build_analysis_prompt("same", true),
            build_analysis_prompt("same", true)
        );
    }
}
