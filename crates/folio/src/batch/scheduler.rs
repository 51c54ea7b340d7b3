//! Page-batch scheduling with retry and quarantine.
//!
//! A document is split into fixed-size page ranges. Each range is one OCR
//! invocation running in its own scratch directory under a timeout of
//! `min(max_batch_timeout_secs, pages × seconds_per_page)`. Failed batches are
//! retried in later rounds until their failure count reaches `max_retries`,
//! at which point a [`QuarantineRecord`] is persisted and the range is left
//! out of the combined document.
//!
//! Parallel rounds run on a `JoinSet` bounded by a semaphore sized from
//! [`plan_workers`]. Each worker drives an external engine process; the
//! coordinating task alone updates failure counters and the quarantine store.
//! If the worker pool cannot be set up or a worker task crashes, the
//! unfinished batches are rerun sequentially.

use crate::batch::combine::{combine_batches, summarize_structure};
use crate::batch::quarantine::QuarantineStore;
use crate::batch::resources::{ResourceProbe, SystemResources, plan_workers};
use crate::batch::scratch::ScratchDir;
use crate::core::config::BatchConfig;
use crate::error::{FolioError, Result};
use crate::ocr::{OcrRequest, PageRangeOcr};
use crate::types::{Batch, DocumentSource, ExecutionMode, QuarantineRecord, unix_timestamp};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A page range awaiting OCR. Batch numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    pub batch_number: usize,
    pub start_page: usize,
    pub end_page: usize,
}

impl BatchSpec {
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page
    }
}

/// Split `page_count` pages into half-open ranges of `batch_size` pages.
pub fn split_into_batches(page_count: usize, batch_size: usize) -> Vec<BatchSpec> {
    let batch_size = batch_size.max(1);
    (0..page_count)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, start)| BatchSpec {
            batch_number: index + 1,
            start_page: start,
            end_page: (start + batch_size).min(page_count),
        })
        .collect()
}

/// Everything the scheduler produced for one document.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    /// Combined text in page order, without quarantined ranges.
    pub content: String,
    /// Successful batches in page order.
    pub batches: Vec<Batch>,
    pub quarantined: Vec<QuarantineRecord>,
    pub omitted_page_ranges: Vec<(usize, usize)>,
    pub mode: ExecutionMode,
    pub batches_total: usize,
    pub retries: usize,
}

struct RoundResult {
    results: Vec<(BatchSpec, Result<Batch>)>,
    fell_back: bool,
}

struct ParallelFailure {
    results: Vec<(BatchSpec, Result<Batch>)>,
    incomplete: Vec<BatchSpec>,
    reason: String,
}

pub struct BatchScheduler {
    ocr: Arc<dyn PageRangeOcr>,
    probe: Arc<dyn ResourceProbe>,
    config: BatchConfig,
    quarantine: QuarantineStore,
    failures: HashMap<(PathBuf, usize), u32>,
}

impl BatchScheduler {
    pub fn new(ocr: Arc<dyn PageRangeOcr>, config: BatchConfig) -> Self {
        let quarantine = QuarantineStore::new(config.quarantine_dir.clone());
        Self {
            ocr,
            probe: Arc::new(SystemResources),
            config,
            quarantine,
            failures: HashMap::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn quarantine_store(&self) -> &QuarantineStore {
        &self.quarantine
    }

    /// Failures recorded for a batch during the latest run over `path`.
    pub fn failure_count(&self, path: &Path, batch_number: usize) -> u32 {
        self.failures
            .get(&(path.to_path_buf(), batch_number))
            .copied()
            .unwrap_or(0)
    }

    /// OCR every batch of `source` and reassemble the text.
    ///
    /// Batch failures never fail the document. Only IO errors while writing
    /// quarantine records propagate.
    #[tracing::instrument(skip(self, source), fields(path = %source.path.display(), pages = source.page_count))]
    pub async fn process_document(&mut self, source: &DocumentSource) -> Result<ScheduleOutcome> {
        self.failures.retain(|(path, _), _| path != &source.path);

        let specs = split_into_batches(source.page_count, self.config.batch_size);
        let plan = plan_workers(specs.len(), self.ocr.is_ready(), self.probe.as_ref(), &self.config);
        tracing::info!(
            batches = specs.len(),
            mode = ?plan.mode,
            by_cores = plan.by_cores,
            by_memory = plan.by_memory,
            reason = plan.reason,
            "Batch execution planned"
        );

        let mut mode = plan.mode;
        let mut pending = specs.clone();
        let mut completed: Vec<Batch> = Vec::with_capacity(specs.len());
        let mut quarantined = Vec::new();
        let mut retries = 0;

        while !pending.is_empty() {
            let workers = match mode {
                ExecutionMode::Parallel { workers } => workers.min(pending.len()),
                _ => 1,
            };

            let round = self
                .run_round(&source.path, std::mem::take(&mut pending), workers)
                .await;
            if round.fell_back {
                mode = ExecutionMode::SequentialFallback;
            }

            for (spec, result) in round.results {
                let error = match result {
                    Ok(batch) => {
                        completed.push(batch);
                        continue;
                    }
                    Err(e) => e,
                };

                let count = {
                    let counter = self
                        .failures
                        .entry((source.path.clone(), spec.batch_number))
                        .or_insert(0);
                    *counter += 1;
                    *counter
                };

                if count >= self.config.max_retries || !error.is_retryable() {
                    let record = QuarantineRecord {
                        pdf_path: source.path.clone(),
                        batch_number: spec.batch_number,
                        start_page: spec.start_page,
                        end_page: spec.end_page,
                        error: error.to_string(),
                        timestamp: unix_timestamp(),
                        failure_count: count,
                    };
                    self.quarantine.write(&record)?;
                    quarantined.push(record);
                } else {
                    tracing::warn!(
                        batch = spec.batch_number,
                        failures = count,
                        max_retries = self.config.max_retries,
                        error = %error,
                        "Batch failed; scheduling retry"
                    );
                    retries += 1;
                    pending.push(spec);
                }
            }

            pending.sort_by_key(|s| s.batch_number);
        }

        completed.sort_by_key(|b| b.start_page);
        quarantined.sort_by_key(|r| r.start_page);
        let omitted_page_ranges = quarantined.iter().map(|r| (r.start_page, r.end_page)).collect();
        let content = combine_batches(completed.clone());

        Ok(ScheduleOutcome {
            content,
            batches: completed,
            quarantined,
            omitted_page_ranges,
            mode,
            batches_total: specs.len(),
            retries,
        })
    }

    async fn run_round(&self, path: &Path, specs: Vec<BatchSpec>, workers: usize) -> RoundResult {
        if workers >= 2 {
            match self.run_parallel(path, &specs, workers).await {
                Ok(results) => {
                    return RoundResult {
                        results,
                        fell_back: false,
                    };
                }
                Err(ParallelFailure {
                    mut results,
                    incomplete,
                    reason,
                }) => {
                    tracing::warn!(
                        reason = %reason,
                        incomplete = incomplete.len(),
                        "Parallel batch execution failed; falling back to sequential"
                    );
                    for spec in incomplete {
                        let result = self.run_sequential_one(path, spec).await;
                        results.push((spec, result));
                    }
                    return RoundResult {
                        results,
                        fell_back: true,
                    };
                }
            }
        }

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = self.run_sequential_one(path, spec).await;
            results.push((spec, result));
        }
        RoundResult {
            results,
            fell_back: false,
        }
    }

    async fn run_sequential_one(&self, path: &Path, spec: BatchSpec) -> Result<Batch> {
        let timeout_secs = self.config.timeout_for(spec.page_count());
        run_batch(
            self.ocr.as_ref(),
            path,
            spec,
            &self.config.scratch_root(),
            0,
            timeout_secs,
        )
        .await
    }

    async fn run_parallel(
        &self,
        path: &Path,
        specs: &[BatchSpec],
        workers: usize,
    ) -> std::result::Result<Vec<(BatchSpec, Result<Batch>)>, ParallelFailure> {
        let scratch_root = self.config.scratch_root();
        if let Err(e) = tokio::fs::create_dir_all(&scratch_root).await {
            return Err(ParallelFailure {
                results: Vec::new(),
                incomplete: specs.to_vec(),
                reason: format!("cannot create scratch root {}: {}", scratch_root.display(), e),
            });
        }

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for (index, spec) in specs.iter().copied().enumerate() {
            let ocr = Arc::clone(&self.ocr);
            let semaphore = Arc::clone(&semaphore);
            let path = path.to_path_buf();
            let scratch_root = scratch_root.clone();
            let timeout_secs = self.config.timeout_for(spec.page_count());
            let worker_id = index % workers + 1;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, None);
                };
                let result = run_batch(ocr.as_ref(), &path, spec, &scratch_root, worker_id, timeout_secs).await;
                (index, Some(result))
            });
        }

        let mut slots: Vec<Option<Result<Batch>>> = specs.iter().map(|_| None).collect();
        let mut crash = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = outcome,
                Err(join_err) => crash = Some(format!("worker task failed: {}", join_err)),
            }
        }

        let mut results = Vec::with_capacity(specs.len());
        let mut incomplete = Vec::new();
        for (spec, slot) in specs.iter().copied().zip(slots) {
            match slot {
                Some(result) => results.push((spec, result)),
                None => incomplete.push(spec),
            }
        }

        if incomplete.is_empty() {
            Ok(results)
        } else {
            Err(ParallelFailure {
                results,
                incomplete,
                reason: crash.unwrap_or_else(|| "worker pool closed".to_string()),
            })
        }
    }
}

/// OCR one batch inside its own scratch directory, under a timeout.
///
/// On timeout the OCR future is dropped, which kills the engine process.
async fn run_batch(
    ocr: &dyn PageRangeOcr,
    path: &Path,
    spec: BatchSpec,
    scratch_root: &Path,
    worker_id: usize,
    timeout_secs: u64,
) -> Result<Batch> {
    let scratch = ScratchDir::create(scratch_root, worker_id)
        .await
        .map_err(|e| FolioError::batch_failure(spec.batch_number, e))?;
    let request = OcrRequest::new(path, scratch.path()).with_pages(spec.start_page..spec.end_page);

    tracing::debug!(
        batch = spec.batch_number,
        start_page = spec.start_page,
        end_page = spec.end_page,
        worker = worker_id,
        timeout_secs,
        "Running batch"
    );

    let result = match tokio::time::timeout(Duration::from_secs(timeout_secs), ocr.ocr_pages(&request)).await {
        Ok(result) => result.map_err(|e| FolioError::batch_failure(spec.batch_number, e))?,
        Err(_) => {
            return Err(FolioError::BatchTimeout {
                batch_number: spec.batch_number,
                timeout_secs,
            });
        }
    };

    Ok(Batch {
        batch_number: spec.batch_number,
        start_page: spec.start_page,
        end_page: spec.end_page,
        structure: summarize_structure(&result.text),
        quality_score: result.overall_score(),
        engine: result.engine,
        content: result.text,
    })
}
