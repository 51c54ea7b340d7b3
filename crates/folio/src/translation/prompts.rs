//! Prompt construction for translation and correction requests.

use crate::types::{ContentType, ValidationResult};

/// Context marker passed to [`crate::translation::Translator::translate`]
/// when the text is a complete correction prompt rather than source text.
pub const CORRECTION_CONTEXT: &str = "correction";

/// System instruction for plain translation requests.
pub fn translation_instruction(target_language: &str, context: Option<&str>) -> String {
    let mut instruction = format!(
        "Translate the user's text into {}. Preserve Markdown structure exactly: \
         table rows and pipes, code fences and code, math delimiters, list markers and headings. \
         Reply with the translation only.",
        target_language
    );
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        instruction.push_str(&format!(" The text is a {}.", context));
    }
    instruction
}

/// System instruction for correction requests; the user message is the prompt itself.
pub fn correction_instruction(target_language: &str) -> String {
    format!(
        "You repair translations into {}. Follow the user's instructions and reply with the corrected translation only.",
        target_language
    )
}

fn type_rules(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Table => {
            "The content is a Markdown table. Keep the same number of rows and columns, \
             keep every | delimiter and keep the header separator row (|---|) if the original has one. \
             Translate cell text only."
        }
        ContentType::CodeBlock => {
            "The content contains fenced code blocks. Keep every ``` fence with its original language tag \
             and leave code inside the fences untranslated; translate only surrounding prose and comments."
        }
        ContentType::Formula => {
            "The content contains mathematics. Keep every $$ block, inline $...$ span and \\begin{...}/\\end{...} \
             environment exactly as in the original; translate only the prose around them."
        }
        ContentType::List => {
            "The content is a list. Keep the same number of bullet items and numbered items, \
             with the same markers and numbering."
        }
        ContentType::Generic => {
            "Translate the complete text, without omissions, additions or commentary."
        }
    }
}

/// Build the correction prompt for an invalid translation.
pub fn build_correction_prompt(
    content_type: ContentType,
    original: &str,
    translation: &str,
    validation: &ValidationResult,
    target_language: &str,
) -> String {
    let issues = bullet_list(&validation.issues);
    let fixes = bullet_list(&validation.suggested_fixes);

    format!(
        "The following translation into {language} failed structural validation.\n\n\
         {rules}\n\n\
         Issues found:\n{issues}\n\n\
         Suggested fixes:\n{fixes}\n\n\
         Original text:\n{original}\n\n\
         Current translation:\n{translation}\n\n\
         Return the corrected translation only.",
        language = target_language,
        rules = type_rules(content_type),
        issues = issues,
        fixes = fixes,
        original = original,
        translation = translation,
    )
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- none".to_string();
    }
    items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_table() -> ValidationResult {
        ValidationResult {
            is_valid: false,
            content_type: ContentType::Table,
            issues: vec!["row count mismatch: original has 4 rows, translation has 3".to_string()],
            suggested_fixes: vec!["keep exactly 4 table rows, one per original row".to_string()],
            confidence: 0.6,
        }
    }

    #[test]
    fn test_correction_prompt_embeds_everything() {
        let prompt = build_correction_prompt(ContentType::Table, "| a |", "| b", &invalid_table(), "German");
        assert!(prompt.contains("into German"));
        assert!(prompt.contains("Markdown table"));
        assert!(prompt.contains("- row count mismatch"));
        assert!(prompt.contains("- keep exactly 4 table rows"));
        assert!(prompt.contains("Original text:\n| a |"));
        assert!(prompt.contains("Current translation:\n| b"));
    }

    #[test]
    fn test_each_type_has_distinct_rules() {
        let types = [
            ContentType::Table,
            ContentType::CodeBlock,
            ContentType::Formula,
            ContentType::List,
            ContentType::Generic,
        ];
        let rules: std::collections::HashSet<_> = types.iter().map(|t| type_rules(*t)).collect();
        assert_eq!(rules.len(), types.len());
    }

    #[test]
    fn test_translation_instruction_context() {
        assert!(translation_instruction("French", Some("table")).ends_with("The text is a table."));
        assert!(!translation_instruction("French", None).contains("The text is"));
    }
}
