//! End-to-end document processing with scripted OCR and translation.

use async_trait::async_trait;
use folio::batch::FixedResources;
use folio::{
    CacheConfig, DocumentSource, FolioError, HashingEmbedder, OcrRequest, OcrResult, PageRangeOcr, Pipeline,
    PipelineConfig, Result, SemanticCache, Translator,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every batch yields one paragraph; batches starting at a page in
/// `broken` always fail.
struct ParagraphOcr {
    broken: HashSet<usize>,
}

#[async_trait]
impl PageRangeOcr for ParagraphOcr {
    fn is_ready(&self) -> bool {
        true
    }

    async fn ocr_pages(&self, request: &OcrRequest) -> Result<OcrResult> {
        let pages = request.pages.clone().unwrap_or(0..0);
        if self.broken.contains(&pages.start) {
            return Err(FolioError::ocr(format!("render failure at page {}", pages.start)));
        }
        Ok(OcrResult::new(
            format!("The inspection of pages {} to {} found no defects.", pages.start, pages.end),
            0.92,
            "scripted",
            3,
        ))
    }
}

struct TaggingTranslator {
    calls: AtomicUsize,
}

#[async_trait]
impl Translator for TaggingTranslator {
    fn model_id(&self) -> &str {
        "tagging"
    }

    async fn translate(&self, text: &str, target_language: &str, _context: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[{}] {}", target_language, text))
    }
}

fn config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.batch.batch_size = 10;
    config.batch.max_retries = 3;
    config.batch.scratch_dir = Some(dir.join("scratch"));
    config.batch.quarantine_dir = dir.join("quarantine");
    config.cache = CacheConfig {
        cache_dir: dir.join("cache"),
        ..Default::default()
    };
    config
}

fn pipeline(dir: &Path, broken: &[usize], translator: Arc<TaggingTranslator>) -> Pipeline {
    let config = config(dir);
    let cache = SemanticCache::open(&config.cache, Arc::new(HashingEmbedder::default())).unwrap();
    Pipeline::new(
        config,
        Arc::new(ParagraphOcr {
            broken: broken.iter().copied().collect(),
        }),
        translator,
        Some(cache),
    )
    .unwrap()
    .with_resource_probe(Arc::new(FixedResources {
        memory_gb: 8.0,
        cores: 2,
    }))
}

#[tokio::test]
async fn test_document_with_quarantined_batch_is_still_translated() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let translator = Arc::new(TaggingTranslator {
        calls: AtomicUsize::new(0),
    });
    let mut pipeline = pipeline(dir.path(), &[10], translator.clone());

    let document = pipeline
        .process_document(&DocumentSource::new(dir.path().join("audit.pdf"), 30), "German")
        .await?;

    assert_eq!(document.stats.batches_total, 3);
    assert_eq!(document.stats.batches_succeeded, 2);
    assert_eq!(document.stats.batches_quarantined, 1);
    assert_eq!(document.stats.omitted_page_ranges, vec![(10, 20)]);
    assert_eq!(document.quarantined.len(), 1);
    assert_eq!(document.stats.engines_used, vec!["scripted".to_string()]);

    assert!(document.ocr_text.contains("pages 0 to 10"));
    assert!(!document.ocr_text.contains("pages 10 to 20"));
    assert!(document.translated_text.contains("[German] The inspection of pages 0 to 10"));
    assert!(document.translated_text.contains("[German] The inspection of pages 20 to 30"));

    assert_eq!(document.stats.items_translated, 2);
    assert_eq!(document.stats.cache_misses, 2);
    assert_eq!(translator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(document.confidence, 1.0);
    assert_eq!(document.metadata["translation_model"], serde_json::json!("tagging"));

    assert!(dir.path().join("cache").join("entries.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_second_run_is_served_from_persisted_cache() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let source = DocumentSource::new(dir.path().join("audit.pdf"), 20);

    let first = Arc::new(TaggingTranslator {
        calls: AtomicUsize::new(0),
    });
    let expected = pipeline(dir.path(), &[], first.clone())
        .process_document(&source, "German")
        .await?
        .translated_text;
    assert_eq!(first.calls.load(Ordering::SeqCst), 2);

    let second = Arc::new(TaggingTranslator {
        calls: AtomicUsize::new(0),
    });
    let document = pipeline(dir.path(), &[], second.clone())
        .process_document(&source, "German")
        .await?;

    assert_eq!(document.translated_text, expected);
    assert_eq!(document.stats.exact_cache_hits, 2);
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_every_batch_quarantined_is_an_error() {
    init_tracing();
    let dir = tempdir().unwrap();
    let translator = Arc::new(TaggingTranslator {
        calls: AtomicUsize::new(0),
    });
    let mut pipeline = pipeline(dir.path(), &[0, 10], translator.clone());

    let err = pipeline
        .process_document(&DocumentSource::new(dir.path().join("audit.pdf"), 20), "German")
        .await
        .unwrap_err();

    assert!(matches!(err, FolioError::Ocr { .. }));
    assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.scheduler().quarantine_store().records().unwrap().len(), 2);
}
