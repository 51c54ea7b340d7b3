use ahash::AHasher;
use std::hash::{Hash, Hasher};

/// Compute a hash string from input data
pub fn compute_hash(data: &str) -> String {
    let mut hasher = AHasher::default();
    data.hash(&mut hasher);
    let hash = hasher.finish();
    format!("{:016x}", hash)
}

/// Hash several fields into one key.
///
/// Each part is hashed with its length so `("ab", "c")` and `("a", "bc")` differ.
pub fn compute_composite_hash(parts: &[&str]) -> String {
    let mut hasher = AHasher::default();
    for part in parts {
        part.len().hash(&mut hasher);
        part.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

/// Whether a line opens a Markdown heading (`# ` through `###### `).
pub fn is_heading_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_deterministic() {
        let hash1 = compute_hash("test_string");
        let hash2 = compute_hash("test_string");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_compute_hash_different_inputs() {
        assert_ne!(compute_hash("test1"), compute_hash("test2"));
    }

    #[test]
    fn test_composite_hash_respects_boundaries() {
        assert_ne!(compute_composite_hash(&["ab", "c"]), compute_composite_hash(&["a", "bc"]));
        assert_eq!(
            compute_composite_hash(&["hello", "de", "gpt"]),
            compute_composite_hash(&["hello", "de", "gpt"])
        );
    }

    #[test]
    fn test_is_heading_line() {
        assert!(is_heading_line("# Title"));
        assert!(is_heading_line("  ### Section 2"));
        assert!(!is_heading_line("#hashtag"));
        assert!(!is_heading_line("####### too deep"));
        assert!(!is_heading_line("plain text"));
        assert!(!is_heading_line("#"));
    }
}
