use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// OCR
// ============================================================================

/// Outcome of a coordinator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    /// An engine reached the quality threshold.
    Accepted,
    /// No engine reached the quality threshold; the best result cleared the fallback threshold.
    BestEffort,
    /// Every available engine failed or scored below the fallback threshold.
    Exhausted,
}

/// Text produced by one OCR engine attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    /// Engine-reported confidence in `[0, 1]`.
    pub confidence: f64,
    pub engine: String,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityAssessment>,
    pub status: OcrStatus,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OcrResult {
    pub fn new(text: String, confidence: f64, engine: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            text,
            confidence: confidence.clamp(0.0, 1.0),
            engine: engine.into(),
            processing_time_ms,
            quality: None,
            status: OcrStatus::Accepted,
            metadata: HashMap::new(),
        }
    }

    /// The explicit failure result returned when every engine is exhausted.
    pub fn exhausted(attempted: Vec<String>, best_score: Option<f64>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("exhausted".to_string(), serde_json::Value::Bool(true));
        metadata.insert(
            "attempted_engines".to_string(),
            serde_json::Value::from(attempted),
        );
        if let Some(score) = best_score {
            metadata.insert("best_score".to_string(), serde_json::Value::from(score));
        }

        Self {
            text: String::new(),
            confidence: 0.0,
            engine: "none".to_string(),
            processing_time_ms: 0,
            quality: None,
            status: OcrStatus::Exhausted,
            metadata,
        }
    }

    pub fn with_quality(mut self, quality: QualityAssessment) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_status(mut self, status: OcrStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status == OcrStatus::Exhausted
    }

    /// Overall quality score, or 0.0 when the result was never assessed.
    pub fn overall_score(&self) -> f64 {
        self.quality.as_ref().map(|q| q.overall_score).unwrap_or(0.0)
    }
}

/// Four-axis quality score of raw OCR text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall_score: f64,
    pub text_confidence: f64,
    pub layout_coherence: f64,
    pub content_completeness: f64,
    pub language_consistency: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

// ============================================================================
// Batches
// ============================================================================

/// Lightweight summary of a batch's edges, used to pick the seam joiner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStructure {
    pub first_line: String,
    pub last_line: String,
    pub starts_with_heading: bool,
    pub ends_mid_sentence: bool,
}

/// A document handed to the scheduler.
///
/// Page counting belongs to the surrounding application, which already has a
/// PDF reader; folio only needs the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    pub path: PathBuf,
    pub page_count: usize,
}

impl DocumentSource {
    pub fn new(path: impl Into<PathBuf>, page_count: usize) -> Self {
        Self {
            path: path.into(),
            page_count,
        }
    }
}

/// OCR output of one contiguous page range.
///
/// Pages are 0-based and half-open: `start_page..end_page`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_number: usize,
    pub start_page: usize,
    pub end_page: usize,
    pub content: String,
    pub structure: BatchStructure,
    pub engine: String,
    pub quality_score: f64,
}

impl Batch {
    pub fn page_count(&self) -> usize {
        self.end_page.saturating_sub(self.start_page)
    }
}

/// Durable record of a batch that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub pdf_path: PathBuf,
    pub batch_number: usize,
    pub start_page: usize,
    pub end_page: usize,
    pub error: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub failure_count: u32,
}

/// How the scheduler executed a document's batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel { workers: usize },
    /// Parallel execution failed to start or crashed; rerun sequentially.
    SequentialFallback,
}

impl ExecutionMode {
    pub fn workers(&self) -> usize {
        match self {
            ExecutionMode::Parallel { workers } => *workers,
            _ => 1,
        }
    }
}

// ============================================================================
// Validation & translation
// ============================================================================

/// Structural kind of a translation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Table,
    CodeBlock,
    Formula,
    List,
    Generic,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Table => "table",
            ContentType::CodeBlock => "code_block",
            ContentType::Formula => "formula",
            ContentType::List => "list",
            ContentType::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub content_type: ContentType,
    pub issues: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionAttempt {
    pub attempt_number: usize,
    pub previous_translation: String,
    pub corrected_translation: String,
    pub validation: ValidationResult,
    pub success: bool,
}

/// Result of one `translate_with_validation` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub translation: String,
    pub confidence: f64,
    pub validation: ValidationResult,
    pub attempts: Vec<CorrectionAttempt>,
    /// True when all correction attempts ran without producing a valid translation.
    pub exhausted: bool,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Where a translation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationSource {
    ExactCache,
    SemanticCache,
    Translated,
    Passthrough,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub batches_total: usize,
    pub batches_succeeded: usize,
    pub batches_quarantined: usize,
    pub batch_retries: usize,
    /// Half-open page ranges missing from the output.
    pub omitted_page_ranges: Vec<(usize, usize)>,
    pub execution_mode: Option<ExecutionMode>,
    pub engines_used: Vec<String>,
    pub mean_ocr_quality: f64,
    pub items_total: usize,
    pub items_passthrough: usize,
    pub exact_cache_hits: usize,
    pub semantic_cache_hits: usize,
    pub cache_misses: usize,
    pub cache_errors: usize,
    pub items_translated: usize,
    pub translation_failures: usize,
    pub corrections_attempted: usize,
    pub items_still_invalid: usize,
    pub mean_validation_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub source_path: PathBuf,
    pub target_language: String,
    /// OCR text after batch reassembly.
    pub ocr_text: String,
    pub translated_text: String,
    /// Overall document confidence: mean validation confidence of translated items.
    pub confidence: f64,
    pub stats: PipelineStats,
    pub quarantined: Vec<QuarantineRecord>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Seconds since the Unix epoch with sub-second precision.
pub(crate) fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_result_clamps_confidence() {
        let result = OcrResult::new("text".to_string(), 1.7, "marker", 12);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.status, OcrStatus::Accepted);
    }

    #[test]
    fn test_exhausted_result_is_empty_failure() {
        let result = OcrResult::exhausted(vec!["marker".to_string(), "tesseract".to_string()], Some(0.2));
        assert!(result.is_failure());
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.metadata["exhausted"], serde_json::Value::Bool(true));
        assert_eq!(result.overall_score(), 0.0);
    }

    #[test]
    fn test_batch_page_count() {
        let batch = Batch {
            batch_number: 1,
            start_page: 50,
            end_page: 100,
            content: String::new(),
            structure: BatchStructure::default(),
            engine: "marker".to_string(),
            quality_score: 0.9,
        };
        assert_eq!(batch.page_count(), 50);
    }

    #[test]
    fn test_execution_mode_workers() {
        assert_eq!(ExecutionMode::Sequential.workers(), 1);
        assert_eq!(ExecutionMode::Parallel { workers: 2 }.workers(), 2);
    }

    #[test]
    fn test_content_type_display() {
        assert_eq!(ContentType::CodeBlock.to_string(), "code_block");
        assert_eq!(ContentType::Table.as_str(), "table");
    }
}
