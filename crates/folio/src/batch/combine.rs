//! Reassembly of batch outputs into one ordered document.
//!
//! Output order is always ascending start page, whatever order the batches
//! completed in. The separator at each seam is picked from the neighbouring
//! batches' structure summaries so a paragraph or section boundary that falls
//! on a batch boundary is preserved, and a sentence cut by it is rejoined.

use crate::ocr::utils::is_heading_line;
use crate::types::{Batch, BatchStructure};

/// Inserted when the next batch opens on a heading.
pub const SECTION_BREAK: &str = "\n\n---\n\n";
/// Default seam.
pub const PARAGRAPH_BREAK: &str = "\n\n";
/// Rejoins a sentence split across the seam.
pub const MINIMAL_JOIN: &str = "\n";

/// Summarize the first and last lines of a batch's content.
pub fn summarize_structure(content: &str) -> BatchStructure {
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
    let first_line = lines.next().unwrap_or_default().to_string();
    let last_line = content
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string();

    BatchStructure {
        starts_with_heading: is_heading_line(&first_line),
        ends_mid_sentence: ends_mid_sentence(&last_line),
        first_line,
        last_line,
    }
}

fn ends_mid_sentence(last_line: &str) -> bool {
    if last_line.is_empty() || is_heading_line(last_line) || last_line.starts_with('|') || last_line.starts_with("```") {
        return false;
    }

    match last_line.chars().last() {
        Some(c) => c.is_alphanumeric() || matches!(c, ',' | '-' | '–' | '(' | '&'),
        None => false,
    }
}

/// Pick the seam between two adjacent batches.
pub fn joiner(previous: &BatchStructure, next: &BatchStructure) -> &'static str {
    if next.starts_with_heading {
        SECTION_BREAK
    } else if previous.ends_mid_sentence {
        MINIMAL_JOIN
    } else {
        PARAGRAPH_BREAK
    }
}

/// Concatenate batches in start-page order.
///
/// Batches with no text contribute nothing, not even a separator.
pub fn combine_batches(mut batches: Vec<Batch>) -> String {
    batches.sort_by_key(|b| (b.start_page, b.batch_number));

    let mut combined = String::new();
    let mut previous: Option<&BatchStructure> = None;

    for batch in &batches {
        let content = batch.content.trim();
        if content.is_empty() {
            continue;
        }

        if let Some(prev) = previous {
            combined.push_str(joiner(prev, &batch.structure));
        }
        combined.push_str(content);
        previous = Some(&batch.structure);
    }

    combined
}
