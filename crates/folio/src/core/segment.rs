//! Splitting OCR text into translation items.

use crate::translation::validator::detect_content_type;
use crate::types::ContentType;

/// One unit of translation work.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub content: String,
    pub content_type: ContentType,
    /// False for blocks with no alphabetic characters (rules, page numbers).
    pub translatable: bool,
}

impl Segment {
    fn from_lines(lines: &[&str]) -> Self {
        let content = lines.join("\n");
        Self {
            content_type: detect_content_type(&content),
            translatable: content.chars().any(char::is_alphabetic),
            content,
        }
    }
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() > 1 && trimmed.starts_with('|') && trimmed.ends_with('|')
}

/// Split `text` into blank-line separated blocks.
///
/// Fenced code is one block up to its closing fence, blank lines included.
/// Contiguous table rows form their own block even without surrounding
/// blank lines.
pub fn segment(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if in_fence {
            current.push(line);
            if is_fence(line) {
                in_fence = false;
                flush(&mut current, &mut segments);
            }
            continue;
        }

        if is_fence(line) {
            flush(&mut current, &mut segments);
            current.push(line);
            in_fence = true;
            continue;
        }

        if line.trim().is_empty() {
            flush(&mut current, &mut segments);
            continue;
        }

        if let Some(previous) = current.last()
            && is_table_row(previous) != is_table_row(line)
        {
            flush(&mut current, &mut segments);
        }
        current.push(line);
    }
    flush(&mut current, &mut segments);

    segments
}

fn flush(current: &mut Vec<&str>, segments: &mut Vec<Segment>) {
    if !current.is_empty() {
        segments.push(Segment::from_lines(current));
        current.clear();
    }
}

/// Join translated blocks back into a document.
pub fn join_segments<'a>(blocks: impl IntoIterator<Item = &'a str>) -> String {
    blocks.into_iter().collect::<Vec<_>>().join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_lines_split_blocks() {
        let segments = segment("First paragraph.\nStill first.\n\nSecond paragraph.");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].content, "First paragraph.\nStill first.");
        assert_eq!(segments[1].content_type, ContentType::Generic);
    }

    #[test]
    fn test_fence_keeps_blank_lines() {
        let text = "Intro\n```python\nx = 1\n\ny = 2\n```\nAfter";
        let segments = segment(text);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].content, "```python\nx = 1\n\ny = 2\n```");
        assert_eq!(segments[1].content_type, ContentType::CodeBlock);
        assert_eq!(segments[2].content, "After");
    }

    #[test]
    fn test_table_separated_from_prose() {
        let text = "Results below\n| a | b |\n|---|---|\n| 1 | 2 |\nThat was the table";
        let segments = segment(text);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].content_type, ContentType::Table);
        assert_eq!(segments[1].content.lines().count(), 3);
    }

    #[test]
    fn test_non_alphabetic_blocks_pass_through() {
        let segments = segment("Text\n\n---\n\n42");
        assert!(segments[0].translatable);
        assert!(!segments[1].translatable);
        assert!(!segments[2].translatable);
    }

    #[test]
    fn test_unterminated_fence_is_one_block() {
        let segments = segment("```\ncode\n\nmore");
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_join() {
        assert_eq!(join_segments(["a", "b"]), "a\n\nb");
        assert_eq!(join_segments(Vec::<&str>::new()), "");
    }
}
