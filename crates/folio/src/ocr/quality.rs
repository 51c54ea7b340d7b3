//! Four-axis quality scoring of raw OCR text.
//!
//! The score drives engine fallback in [`crate::ocr::OcrCoordinator`]: it is
//! never persisted and has no side effects.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{OcrResult, QualityAssessment};

const TEXT_CONFIDENCE_WEIGHT: f64 = 0.30;
const LAYOUT_WEIGHT: f64 = 0.25;
const COMPLETENESS_WEIGHT: f64 = 0.30;
const LANGUAGE_WEIGHT: f64 = 0.15;

const LAYOUT_BASE: f64 = 0.5;
const STRUCTURE_MARKER_BONUS: f64 = 0.3;
const PARAGRAPH_BONUS: f64 = 0.2;
const MIN_PARAGRAPH_WORDS: f64 = 10.0;
const MAX_PARAGRAPH_WORDS: f64 = 200.0;

const GARBLED_PENALTY_PER_RUN: f64 = 0.1;
const GARBLED_PENALTY_CAP: f64 = 0.4;
const ARTIFACT_PENALTY_PER_RUN: f64 = 0.05;
const ARTIFACT_PENALTY_CAP: f64 = 0.2;
const ARTIFACT_RUN_LENGTH: usize = 5;
const SHORT_TOKEN_PENALTY: f64 = 0.3;
const SHORT_TOKEN_MAX_LEN: usize = 2;
const SHORT_TOKEN_RATIO: f64 = 0.3;

const NON_ASCII_HIGH: f64 = 0.5;
const NON_ASCII_MODERATE: f64 = 0.2;

static HEADING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s+\S").expect("Heading regex pattern is valid and should compile"));
static BULLET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*+•]|\d+[.)])\s+\S").expect("Bullet regex pattern is valid and should compile")
});
static TABLE_ROW_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\|.*\|\s*$").expect("Table row regex pattern is valid and should compile"));
static PARAGRAPH_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("Paragraph split regex pattern is valid and should compile"));
static GARBLED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[^\w\s.,!?;:'"()\[\]{}<>/\\|#*`$%&@+=\-]{3,}"#)
        .expect("Garbled text regex pattern is valid and should compile")
});

/// Assess an engine attempt. `text_confidence` is the engine-reported confidence, verbatim.
pub fn assess(result: &OcrResult) -> QualityAssessment {
    assess_text(&result.text, result.confidence)
}

pub fn assess_text(text: &str, engine_confidence: f64) -> QualityAssessment {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let text_confidence = engine_confidence;
    let layout_coherence = layout_coherence(text);
    let content_completeness = content_completeness(text, &mut issues, &mut recommendations);
    let language_consistency = language_consistency(text, &mut issues, &mut recommendations);

    let overall_score = (TEXT_CONFIDENCE_WEIGHT * text_confidence
        + LAYOUT_WEIGHT * layout_coherence
        + COMPLETENESS_WEIGHT * content_completeness
        + LANGUAGE_WEIGHT * language_consistency)
        .clamp(0.0, 1.0);

    if text_confidence < 0.5 && !text.trim().is_empty() {
        recommendations.push("engine reported low confidence; consider a fallback engine".to_string());
    }

    QualityAssessment {
        overall_score,
        text_confidence,
        layout_coherence,
        content_completeness,
        language_consistency,
        issues,
        recommendations,
    }
}

fn layout_coherence(text: &str) -> f64 {
    let mut score = LAYOUT_BASE;

    if HEADING_PATTERN.is_match(text) || BULLET_PATTERN.is_match(text) || TABLE_ROW_PATTERN.is_match(text) {
        score += STRUCTURE_MARKER_BONUS;
    }

    let paragraphs: Vec<&str> = PARAGRAPH_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.len() >= 2 {
        let total_words: usize = paragraphs.iter().map(|p| p.split_whitespace().count()).sum();
        let avg_words = total_words as f64 / paragraphs.len() as f64;
        if (MIN_PARAGRAPH_WORDS..=MAX_PARAGRAPH_WORDS).contains(&avg_words) {
            score += PARAGRAPH_BONUS;
        }
    }

    score.min(1.0)
}

fn content_completeness(text: &str, issues: &mut Vec<String>, recommendations: &mut Vec<String>) -> f64 {
    if text.trim().is_empty() {
        issues.push("no text extracted".to_string());
        recommendations.push("verify the input is readable and try another engine".to_string());
        return 0.0;
    }

    let mut score = 1.0;

    let garbled_runs = GARBLED_PATTERN.find_iter(text).count();
    if garbled_runs > 0 {
        score -= (garbled_runs as f64 * GARBLED_PENALTY_PER_RUN).min(GARBLED_PENALTY_CAP);
        issues.push(format!("garbled text ({} sequences)", garbled_runs));
        recommendations.push("re-run OCR at a higher resolution".to_string());
    }

    let artifact_runs = count_repeated_runs(text);
    if artifact_runs > 0 {
        score -= (artifact_runs as f64 * ARTIFACT_PENALTY_PER_RUN).min(ARTIFACT_PENALTY_CAP);
        issues.push(format!("OCR artifacts ({} repeated-character runs)", artifact_runs));
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    if !tokens.is_empty() {
        let short = tokens
            .iter()
            .filter(|t| t.chars().count() <= SHORT_TOKEN_MAX_LEN)
            .count();
        if short as f64 / tokens.len() as f64 > SHORT_TOKEN_RATIO {
            score -= SHORT_TOKEN_PENALTY;
            issues.push("incomplete words".to_string());
            recommendations.push("check for broken word segmentation".to_string());
        }
    }

    score.max(0.0)
}

/// Counts runs of at least five identical non-whitespace characters.
///
/// Markdown table separator rows are skipped.
fn count_repeated_runs(text: &str) -> usize {
    let mut runs = 0;

    for line in text.lines() {
        let trimmed = line.trim();
        let is_table_separator = trimmed.starts_with('|')
            && trimmed.ends_with('|')
            && trimmed
                .chars()
                .all(|c| c == '|' || c == '-' || c.is_whitespace() || c == ':');
        if is_table_separator {
            continue;
        }

        let mut prev: Option<char> = None;
        let mut length = 0usize;
        for c in line.chars() {
            if Some(c) == prev {
                length += 1;
            } else {
                if length >= ARTIFACT_RUN_LENGTH && prev.is_some_and(|p| !p.is_whitespace()) {
                    runs += 1;
                }
                prev = Some(c);
                length = 1;
            }
        }
        if length >= ARTIFACT_RUN_LENGTH && prev.is_some_and(|p| !p.is_whitespace()) {
            runs += 1;
        }
    }

    runs
}

fn language_consistency(text: &str, issues: &mut Vec<String>, recommendations: &mut Vec<String>) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 1.0;
    }

    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    let ratio = non_ascii as f64 / total as f64;

    if ratio > NON_ASCII_HIGH {
        issues.push(format!("high non-ASCII ratio ({:.2})", ratio));
        recommendations.push("verify the OCR language setting".to_string());
        0.3
    } else if ratio > NON_ASCII_MODERATE {
        0.7
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_TEXT: &str = "# Quarterly Report\n\n\
        The committee reviewed the quarterly figures and approved the budget for the next period without changes.\n\n\
        Revenue grew steadily across all regions while operating costs remained within the planned range for the year.";

    #[test]
    fn test_empty_text_has_zero_completeness() {
        let assessment = assess_text("", 0.9);
        assert_eq!(assessment.content_completeness, 0.0);
        assert!(assessment.issues.iter().any(|i| i == "no text extracted"));
        assert!((0.0..=1.0).contains(&assessment.overall_score));
    }

    #[test]
    fn test_clean_structured_text_scores_high() {
        let assessment = assess_text(CLEAN_TEXT, 0.95);
        assert_eq!(assessment.text_confidence, 0.95);
        assert_eq!(assessment.layout_coherence, 1.0);
        assert_eq!(assessment.content_completeness, 1.0);
        assert_eq!(assessment.language_consistency, 1.0);
        assert!(assessment.issues.is_empty());
        assert!(assessment.overall_score > 0.9);
    }

    #[test]
    fn test_layout_base_without_structure() {
        assert_eq!(layout_coherence("plain sentence without structure"), LAYOUT_BASE);
    }

    #[test]
    fn test_layout_detects_table_rows() {
        let text = "| a | b |\n|---|---|\n| 1 | 2 |";
        assert_eq!(layout_coherence(text), LAYOUT_BASE + STRUCTURE_MARKER_BONUS);
    }

    #[test]
    fn test_garbled_penalty_is_capped() {
        let text = "words ~^~ more ~^~ and ~^~ still ~^~ then ~^~ again ~^~ final";
        let mut issues = Vec::new();
        let mut recs = Vec::new();
        let score = content_completeness(text, &mut issues, &mut recs);
        assert!((score - (1.0 - GARBLED_PENALTY_CAP)).abs() < 1e-9);
        assert!(issues.iter().any(|i| i.starts_with("garbled text")));
    }

    #[test]
    fn test_repeated_runs_skip_table_separators() {
        assert_eq!(count_repeated_runs("|-------|-------|"), 0);
        assert_eq!(count_repeated_runs("loading......... done xxxxx"), 2);
        assert_eq!(count_repeated_runs("indented          text"), 0);
    }

    #[test]
    fn test_short_token_penalty() {
        let mut issues = Vec::new();
        let mut recs = Vec::new();
        let score = content_completeness("a b c d words here", &mut issues, &mut recs);
        assert!((score - (1.0 - SHORT_TOKEN_PENALTY)).abs() < 1e-9);
        assert!(issues.contains(&"incomplete words".to_string()));
    }

    #[test]
    fn test_language_consistency_bands() {
        let mut issues = Vec::new();
        let mut recs = Vec::new();
        assert_eq!(language_consistency("plain ascii text", &mut issues, &mut recs), 1.0);
        assert_eq!(language_consistency("ääää aaaaaa", &mut issues, &mut recs), 0.7);
        assert!(issues.is_empty());
        assert_eq!(language_consistency("日本語のテキスト", &mut issues, &mut recs), 0.3);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_overall_score_weights() {
        let assessment = assess_text("plain sentence without structure", 0.0);
        let expected = LAYOUT_WEIGHT * LAYOUT_BASE + COMPLETENESS_WEIGHT * 1.0 + LANGUAGE_WEIGHT * 1.0;
        assert!((assessment.overall_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_assess_uses_result_confidence() {
        let result = OcrResult::new(CLEAN_TEXT.to_string(), 0.4, "tesseract", 10);
        assert_eq!(assess(&result).text_confidence, 0.4);
    }
}
