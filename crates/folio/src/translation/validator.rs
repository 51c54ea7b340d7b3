//! Structural validation of translations.
//!
//! The original text is classified into a [`ContentType`] and the candidate
//! translation is checked for the structure that type must keep: table shape,
//! code fences, math delimiters, list markers, or a plausible length ratio.
//! Every raised issue subtracts a fixed penalty from a confidence of 1.0.

use crate::types::{ContentType, ValidationResult};
use once_cell::sync::Lazy;
use regex::Regex;

const ROW_TOLERANCE_RATIO: f64 = 0.10;
const COLUMN_TOLERANCE: usize = 1;
const COLUMN_SAMPLE_ROWS: usize = 3;
const MIN_LENGTH_RATIO: f64 = 0.3;
const MAX_LENGTH_RATIO: f64 = 3.0;

const TABLE_ROWS_PENALTY: f64 = 0.4;
const TABLE_COLUMNS_PENALTY: f64 = 0.3;
const TABLE_SEPARATOR_PENALTY: f64 = 0.3;
const CODE_FENCE_PENALTY: f64 = 0.4;
const CODE_LANGUAGE_PENALTY: f64 = 0.3;
const DISPLAY_MATH_PENALTY: f64 = 0.4;
const INLINE_MATH_PENALTY: f64 = 0.3;
const MATH_ENV_PENALTY: f64 = 0.3;
const BULLET_PENALTY: f64 = 0.3;
const NUMBERED_PENALTY: f64 = 0.3;
const LENGTH_PENALTY: f64 = 0.3;

static TABLE_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\|.*\|\s*$").expect("Table row regex pattern is valid and should compile"));
static TABLE_ROW_ANYWHERE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\|.*\|\s*$").expect("Table row regex pattern is valid and should compile"));
static TABLE_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(?:\|\s*:?-{3,}:?\s*)*\|?\s*$")
        .expect("Table separator regex pattern is valid and should compile")
});
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*```[ \t]*([^\s`]*)").expect("Code fence regex pattern is valid and should compile")
});
static INLINE_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$[^$\n]+\$").expect("Inline math regex pattern is valid and should compile"));
static MATH_BEGIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\begin\{[^}]+\}").expect("Math begin regex pattern is valid and should compile"));
static MATH_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\end\{[^}]+\}").expect("Math end regex pattern is valid and should compile"));
static BULLET_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*+•]\s+\S").expect("Bullet item regex pattern is valid and should compile"));
static NUMBERED_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\d+[.)]\s+\S").expect("Numbered item regex pattern is valid and should compile")
});

/// Classify text: table, code block, formula, list, then generic.
pub fn detect_content_type(text: &str) -> ContentType {
    if TABLE_ROW_ANYWHERE.is_match(text) {
        ContentType::Table
    } else if CODE_FENCE.is_match(text) {
        ContentType::CodeBlock
    } else if text.contains("$$") || INLINE_MATH.is_match(text) || MATH_BEGIN.is_match(text) {
        ContentType::Formula
    } else if BULLET_ITEM.is_match(text) || NUMBERED_ITEM.is_match(text) {
        ContentType::List
    } else {
        ContentType::Generic
    }
}

#[derive(Default)]
struct Findings {
    issues: Vec<String>,
    fixes: Vec<String>,
    penalty: f64,
}

impl Findings {
    fn raise(&mut self, issue: String, fix: impl Into<String>, penalty: f64) {
        self.issues.push(issue);
        self.fixes.push(fix.into());
        self.penalty += penalty;
    }
}

/// Validate `translation` against the structure detected in `original`.
pub fn validate(original: &str, translation: &str) -> ValidationResult {
    validate_as(original, translation, detect_content_type(original))
}

/// Validate with an explicit content type.
pub fn validate_as(original: &str, translation: &str, content_type: ContentType) -> ValidationResult {
    let mut findings = Findings::default();

    match content_type {
        ContentType::Table => check_table(original, translation, &mut findings),
        ContentType::CodeBlock => check_code(original, translation, &mut findings),
        ContentType::Formula => check_formula(original, translation, &mut findings),
        ContentType::List => check_list(original, translation, &mut findings),
        ContentType::Generic => check_length(original, translation, &mut findings),
    }

    ValidationResult {
        is_valid: findings.issues.is_empty(),
        content_type,
        confidence: (1.0 - findings.penalty).max(0.0),
        issues: findings.issues,
        suggested_fixes: findings.fixes,
    }
}

struct TableShape {
    rows: usize,
    sample_columns: usize,
    has_separator: bool,
}

fn column_count(row: &str) -> usize {
    let trimmed = row.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').count()
}

fn table_shape(text: &str) -> TableShape {
    let mut rows = Vec::new();
    let mut has_separator = false;

    for line in text.lines() {
        if TABLE_SEPARATOR.is_match(line) && line.contains('-') {
            has_separator = true;
        } else if TABLE_ROW.is_match(line) {
            rows.push(line);
        }
    }

    let sample_columns = rows
        .iter()
        .take(COLUMN_SAMPLE_ROWS)
        .map(|r| column_count(r))
        .max()
        .unwrap_or(0);

    TableShape {
        rows: rows.len(),
        sample_columns,
        has_separator,
    }
}

fn check_table(original: &str, translation: &str, findings: &mut Findings) {
    let source = table_shape(original);
    let target = table_shape(translation);

    let tolerance = ((source.rows as f64 * ROW_TOLERANCE_RATIO).floor() as usize).max(1);
    let row_diff = source.rows.abs_diff(target.rows);
    if row_diff >= tolerance {
        findings.raise(
            format!(
                "row count mismatch: original has {} rows, translation has {}",
                source.rows, target.rows
            ),
            format!("keep exactly {} table rows, one per original row", source.rows),
            TABLE_ROWS_PENALTY,
        );
    }

    if source.sample_columns.abs_diff(target.sample_columns) > COLUMN_TOLERANCE {
        findings.raise(
            format!(
                "column count mismatch: original has {} columns, translation has {}",
                source.sample_columns, target.sample_columns
            ),
            format!("keep {} pipe-delimited cells per row", source.sample_columns),
            TABLE_COLUMNS_PENALTY,
        );
    }

    if source.has_separator != target.has_separator {
        let (issue, fix) = if source.has_separator {
            ("header separator row missing", "restore the |---| separator under the header row")
        } else {
            ("unexpected header separator row", "remove the separator row that the original does not have")
        };
        findings.raise(issue.to_string(), fix, TABLE_SEPARATOR_PENALTY);
    }
}

fn fence_languages(text: &str) -> Vec<String> {
    CODE_FENCE
        .captures_iter(text)
        .enumerate()
        .filter(|(index, _)| index % 2 == 0)
        .map(|(_, captures)| captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect()
}

fn check_code(original: &str, translation: &str, findings: &mut Findings) {
    let source_fences = CODE_FENCE.find_iter(original).count();
    let target_fences = CODE_FENCE.find_iter(translation).count();

    if source_fences != target_fences {
        findings.raise(
            format!(
                "code fence count mismatch: original has {}, translation has {}",
                source_fences, target_fences
            ),
            "keep every ``` fence and leave code inside fences untranslated",
            CODE_FENCE_PENALTY,
        );
    }

    let source_languages = fence_languages(original);
    let target_languages = fence_languages(translation);
    if source_languages != target_languages {
        findings.raise(
            format!(
                "code language tags differ: original {:?}, translation {:?}",
                source_languages, target_languages
            ),
            "restore the original language tag after each opening fence",
            CODE_LANGUAGE_PENALTY,
        );
    }
}

struct MathCounts {
    display: usize,
    inline: usize,
    environments: usize,
}

fn math_counts(text: &str) -> MathCounts {
    let display = text.matches("$$").count();
    let without_display = text.replace("$$", "");
    MathCounts {
        display,
        inline: INLINE_MATH.find_iter(&without_display).count(),
        environments: MATH_BEGIN.find_iter(text).count() + MATH_END.find_iter(text).count(),
    }
}

fn check_formula(original: &str, translation: &str, findings: &mut Findings) {
    let source = math_counts(original);
    let target = math_counts(translation);

    if source.display != target.display {
        findings.raise(
            format!(
                "display math delimiter mismatch: original has {} $$, translation has {}",
                source.display, target.display
            ),
            "keep every $$ block exactly as in the original",
            DISPLAY_MATH_PENALTY,
        );
    }
    if source.inline != target.inline {
        findings.raise(
            format!(
                "inline math mismatch: original has {} $...$ spans, translation has {}",
                source.inline, target.inline
            ),
            "keep inline $...$ formulas unchanged",
            INLINE_MATH_PENALTY,
        );
    }
    if source.environments != target.environments {
        findings.raise(
            format!(
                "math environment mismatch: original has {} \\begin/\\end markers, translation has {}",
                source.environments, target.environments
            ),
            "keep \\begin{...} and \\end{...} pairs unchanged",
            MATH_ENV_PENALTY,
        );
    }
}

fn check_list(original: &str, translation: &str, findings: &mut Findings) {
    let source_bullets = BULLET_ITEM.find_iter(original).count();
    let target_bullets = BULLET_ITEM.find_iter(translation).count();
    if source_bullets != target_bullets {
        findings.raise(
            format!(
                "bullet item count mismatch: original has {}, translation has {}",
                source_bullets, target_bullets
            ),
            format!("keep exactly {} bullet items", source_bullets),
            BULLET_PENALTY,
        );
    }

    let source_numbered = NUMBERED_ITEM.find_iter(original).count();
    let target_numbered = NUMBERED_ITEM.find_iter(translation).count();
    if source_numbered != target_numbered {
        findings.raise(
            format!(
                "numbered item count mismatch: original has {}, translation has {}",
                source_numbered, target_numbered
            ),
            format!("keep exactly {} numbered items with their numbers", source_numbered),
            NUMBERED_PENALTY,
        );
    }
}

fn check_length(original: &str, translation: &str, findings: &mut Findings) {
    let source_len = original.trim().chars().count();
    let target_len = translation.trim().chars().count();

    if source_len == 0 {
        return;
    }

    let ratio = target_len as f64 / source_len as f64;
    if !(MIN_LENGTH_RATIO..=MAX_LENGTH_RATIO).contains(&ratio) {
        findings.raise(
            format!("translation length ratio {:.2} outside [0.3, 3.0]", ratio),
            if ratio < MIN_LENGTH_RATIO {
                "translate the complete text without omissions"
            } else {
                "translate only the given text without additions or commentary"
            },
            LENGTH_PENALTY,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "| Name | Qty | Price |\n|------|-----|-------|\n| Apple | 3 | 1.20 |\n| Pear | 5 | 0.80 |\n| Plum | 7 | 2.10 |";

    #[test]
    fn test_detect_content_type() {
        assert_eq!(detect_content_type(TABLE), ContentType::Table);
        assert_eq!(detect_content_type("```rust\nfn main() {}\n```"), ContentType::CodeBlock);
        assert_eq!(detect_content_type("Energy is $E = mc^2$ here."), ContentType::Formula);
        assert_eq!(detect_content_type("$$\\int_0^1 x dx$$"), ContentType::Formula);
        assert_eq!(detect_content_type("\\begin{align} a \\end{align}"), ContentType::Formula);
        assert_eq!(detect_content_type("- one\n- two"), ContentType::List);
        assert_eq!(detect_content_type("1. first\n2. second"), ContentType::List);
        assert_eq!(detect_content_type("Just a paragraph of text."), ContentType::Generic);
        assert_eq!(detect_content_type("It costs $5 today."), ContentType::Generic);
    }

    #[test]
    fn test_table_with_equal_shape_is_valid() {
        let translated = "| Nombre | Cant. | Precio |\n|------|-----|-------|\n| Manzana | 3 | 1.20 |\n| Pera | 5 | 0.80 |\n| Ciruela | 7 | 2.10 |";
        let result = validate(TABLE, translated);
        assert!(result.is_valid, "issues: {:?}", result.issues);
        assert_eq!(result.content_type, ContentType::Table);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_table_with_removed_row_is_invalid() {
        let translated = "| Nombre | Cant. | Precio |\n|------|-----|-------|\n| Manzana | 3 | 1.20 |\n| Pera | 5 | 0.80 |";
        let result = validate(TABLE, translated);
        assert!(!result.is_valid);
        assert!(result.issues.iter().any(|i| i.contains("row count")));
        assert!((result.confidence - (1.0 - TABLE_ROWS_PENALTY)).abs() < 1e-9);
    }

    #[test]
    fn test_large_table_tolerates_small_row_difference() {
        let mut original = String::from("| a | b |\n|---|---|\n");
        for i in 0..30 {
            original.push_str(&format!("| {} | x |\n", i));
        }
        let mut translated = String::from("| a | b |\n|---|---|\n");
        for i in 0..29 {
            translated.push_str(&format!("| {} | y |\n", i));
        }
        // 31 rows vs 30: tolerance is floor(3.1) = 3
        assert!(validate(&original, &translated).is_valid);
    }

    #[test]
    fn test_table_column_and_separator_issues() {
        let translated = "| Nombre |\n| Manzana |\n| Pera |\n| Ciruela |";
        let result = validate_as(TABLE, translated, ContentType::Table);
        assert!(!result.is_valid);
        assert!(result.issues.iter().any(|i| i.contains("column count")));
        assert!(result.issues.iter().any(|i| i.contains("separator")));
        assert_eq!(result.issues.len(), result.suggested_fixes.len());
    }

    #[test]
    fn test_code_fence_checks() {
        let original = "```python\nprint('hi')\n```\n\n```bash\nls\n```";
        assert!(validate(original, original).is_valid);

        let wrong_tag = "```py\nprint('hi')\n```\n\n```bash\nls\n```";
        let result = validate(original, wrong_tag);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].contains("language tags"));

        let missing_fence = "```python\nprint('hi')\n```\n\nls";
        let result = validate(original, missing_fence);
        assert!(result.issues.iter().any(|i| i.contains("fence count")));
    }

    #[test]
    fn test_formula_checks() {
        let original = "The area is $\\pi r^2$ and\n$$\\sum_i x_i$$";
        assert!(validate(original, "La superficie es $\\pi r^2$ y\n$$\\sum_i x_i$$").is_valid);

        let result = validate(original, "La superficie es pi r^2 y\n$$\\sum_i x_i$$");
        assert!(!result.is_valid);
        assert!(result.issues[0].contains("inline math"));
    }

    #[test]
    fn test_list_checks() {
        let original = "- apples\n- pears\n1. first\n2. second";
        assert!(validate(original, "- manzanas\n- peras\n1. primero\n2. segundo").is_valid);

        let result = validate(original, "- manzanas\n1. primero\n2. segundo");
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].contains("bullet"));
    }

    #[test]
    fn test_generic_length_ratio() {
        let original = "This paragraph has a reasonable amount of text in it.";
        assert!(validate(original, "Este párrafo tiene una cantidad razonable de texto.").is_valid);

        let result = validate(original, "Sí.");
        assert!(!result.is_valid);
        assert!((result.confidence - (1.0 - LENGTH_PENALTY)).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_never_negative() {
        let original = "$$a$$ $b$ \\begin{x} \\end{x}";
        let result = validate_as(original, "nothing", ContentType::Formula);
        assert_eq!(result.issues.len(), 3);
        assert!(result.confidence >= 0.0 && result.confidence < 1e-9);
    }
}
