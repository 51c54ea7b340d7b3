//! Batch scheduling scenarios: parallel planning, timeout retry, quarantine
//! thresholds and order-restoring reassembly.

use async_trait::async_trait;
use folio::batch::{BatchScheduler, FixedResources, combine_batches, summarize_structure};
use folio::{Batch, BatchConfig, DocumentSource, ExecutionMode, FolioError, OcrRequest, OcrResult, PageRangeOcr, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Scripted OCR: each batch (keyed by its first page) fails or stalls a set
/// number of times before producing `Pages a-b.`.
#[derive(Default)]
struct ScriptedOcr {
    failures: HashMap<usize, usize>,
    stalls: HashMap<usize, usize>,
    calls: parking_lot::Mutex<HashMap<usize, usize>>,
}

impl ScriptedOcr {
    fn calls_for(&self, start_page: usize) -> usize {
        self.calls.lock().get(&start_page).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageRangeOcr for ScriptedOcr {
    fn is_ready(&self) -> bool {
        true
    }

    async fn ocr_pages(&self, request: &OcrRequest) -> Result<OcrResult> {
        let pages = request.pages.clone().unwrap_or(0..0);
        let call = {
            let mut calls = self.calls.lock();
            let entry = calls.entry(pages.start).or_insert(0);
            *entry += 1;
            *entry
        };

        if call <= self.stalls.get(&pages.start).copied().unwrap_or(0) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if call <= self.failures.get(&pages.start).copied().unwrap_or(0) {
            return Err(FolioError::ocr(format!("engine crashed on pages {}-{}", pages.start, pages.end)));
        }

        Ok(OcrResult::new(
            format!("Pages {}-{}.", pages.start, pages.end),
            0.9,
            "scripted",
            5,
        ))
    }
}

fn batch_config(dir: &Path) -> BatchConfig {
    BatchConfig {
        batch_size: 50,
        max_retries: 3,
        max_workers: 2,
        seconds_per_page: 1,
        max_batch_timeout_secs: 1,
        scratch_dir: Some(dir.join("scratch")),
        quarantine_dir: dir.join("quarantine"),
        ..Default::default()
    }
}

fn two_core_host() -> Arc<FixedResources> {
    Arc::new(FixedResources {
        memory_gb: 8.0,
        cores: 2,
    })
}

#[tokio::test]
async fn test_timeout_then_retry_keeps_all_batches_in_order() {
    let dir = tempdir().unwrap();
    let ocr = Arc::new(ScriptedOcr {
        stalls: HashMap::from([(50, 1)]),
        ..Default::default()
    });
    let mut scheduler = BatchScheduler::new(ocr.clone(), batch_config(dir.path())).with_probe(two_core_host());

    let source = DocumentSource::new(dir.path().join("scan.pdf"), 120);
    let outcome = scheduler.process_document(&source).await.unwrap();

    assert_eq!(outcome.batches_total, 3);
    assert_eq!(outcome.mode, ExecutionMode::Parallel { workers: 2 });
    assert_eq!(outcome.retries, 1);
    assert_eq!(ocr.calls_for(50), 2);
    assert_eq!(
        outcome.content,
        "Pages 0-50.\n\nPages 50-100.\n\nPages 100-120."
    );
    assert!(outcome.quarantined.is_empty());
    assert!(outcome.omitted_page_ranges.is_empty());
    assert!(scheduler.quarantine_store().records().unwrap().is_empty());
    assert_eq!(scheduler.failure_count(&source.path, 2), 1);
}

#[tokio::test]
async fn test_batch_failing_max_retries_times_is_quarantined_once() {
    let dir = tempdir().unwrap();
    let ocr = Arc::new(ScriptedOcr {
        failures: HashMap::from([(50, 3)]),
        ..Default::default()
    });
    let mut scheduler = BatchScheduler::new(ocr.clone(), batch_config(dir.path())).with_probe(two_core_host());

    let source = DocumentSource::new(dir.path().join("scan.pdf"), 120);
    let outcome = scheduler.process_document(&source).await.unwrap();

    assert_eq!(ocr.calls_for(50), 3);
    assert_eq!(outcome.quarantined.len(), 1);
    let record = &outcome.quarantined[0];
    assert_eq!(record.batch_number, 2);
    assert_eq!((record.start_page, record.end_page), (50, 100));
    assert_eq!(record.failure_count, 3);
    assert!(record.error.contains("engine crashed"));

    assert_eq!(outcome.omitted_page_ranges, vec![(50, 100)]);
    assert_eq!(outcome.content, "Pages 0-50.\n\nPages 100-120.");

    let persisted = scheduler.quarantine_store().records_for(&source.path).unwrap();
    assert_eq!(persisted, outcome.quarantined);
}

#[tokio::test]
async fn test_batch_failing_one_less_than_max_retries_succeeds() {
    let dir = tempdir().unwrap();
    let ocr = Arc::new(ScriptedOcr {
        failures: HashMap::from([(50, 2)]),
        ..Default::default()
    });
    let mut scheduler = BatchScheduler::new(ocr.clone(), batch_config(dir.path())).with_probe(two_core_host());

    let source = DocumentSource::new(dir.path().join("scan.pdf"), 120);
    let outcome = scheduler.process_document(&source).await.unwrap();

    assert_eq!(ocr.calls_for(50), 3);
    assert!(outcome.quarantined.is_empty());
    assert!(outcome.content.contains("Pages 50-100."));
    assert_eq!(outcome.retries, 2);
    assert!(scheduler.quarantine_store().records().unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_counters_reset_per_run() {
    let dir = tempdir().unwrap();
    let ocr = Arc::new(ScriptedOcr {
        failures: HashMap::from([(0, 2)]),
        ..Default::default()
    });
    let mut scheduler = BatchScheduler::new(ocr, batch_config(dir.path())).with_probe(two_core_host());
    let source = DocumentSource::new(dir.path().join("scan.pdf"), 40);

    scheduler.process_document(&source).await.unwrap();
    assert_eq!(scheduler.failure_count(&source.path, 1), 2);

    let outcome = scheduler.process_document(&source).await.unwrap();
    assert_eq!(scheduler.failure_count(&source.path, 1), 0);
    assert_eq!(outcome.mode, ExecutionMode::Sequential);
}

#[tokio::test]
async fn test_low_memory_host_runs_sequentially() {
    let dir = tempdir().unwrap();
    let ocr = Arc::new(ScriptedOcr::default());
    let mut scheduler = BatchScheduler::new(ocr, batch_config(dir.path())).with_probe(Arc::new(FixedResources {
        memory_gb: 4.0,
        cores: 8,
    }));

    let outcome = scheduler
        .process_document(&DocumentSource::new(dir.path().join("scan.pdf"), 120))
        .await
        .unwrap();
    assert_eq!(outcome.mode, ExecutionMode::Sequential);
    assert_eq!(outcome.batches.len(), 3);
}

fn batch(number: usize, start: usize, end: usize, content: &str) -> Batch {
    Batch {
        batch_number: number,
        start_page: start,
        end_page: end,
        content: content.to_string(),
        structure: summarize_structure(content),
        engine: "mock".to_string(),
        quality_score: 0.8,
    }
}

fn permutations(items: &[Batch]) -> Vec<Vec<Batch>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            all.push(tail);
        }
    }
    all
}

#[test]
fn test_combine_is_independent_of_completion_order() {
    let ordered = vec![
        batch(1, 0, 10, "# Introduction\n\nThe survey covers the northern"),
        batch(2, 10, 20, "districts and their rivers.\n\nWater levels rose."),
        batch(3, 20, 30, "# Results\n\n| Site | Level |\n|---|---|\n| A | 3 |"),
        batch(4, 30, 40, "Closing remarks follow."),
    ];
    let expected = combine_batches(ordered.clone());
    assert_eq!(
        expected,
        "# Introduction\n\nThe survey covers the northern\ndistricts and their rivers.\n\nWater levels rose.\n\n---\n\n# Results\n\n| Site | Level |\n|---|---|\n| A | 3 |\n\nClosing remarks follow."
    );

    for permutation in permutations(&ordered) {
        assert_eq!(combine_batches(permutation), expected);
    }
}
