//! Batch scheduling for large documents.
//!
//! - [`scheduler`] splits documents into page ranges and drives OCR per range
//! - [`resources`] decides between sequential and parallel execution
//! - [`combine`] restores page order and picks seam separators
//! - [`quarantine`] persists batches that exhausted their retries
pub mod combine;
pub mod quarantine;
pub mod resources;
pub mod scheduler;
pub mod scratch;

pub use combine::{combine_batches, summarize_structure};
pub use quarantine::QuarantineStore;
pub use resources::{FixedResources, MAX_PARALLEL_WORKERS, ResourceProbe, SystemResources, WorkerPlan, plan_workers};
pub use scheduler::{BatchScheduler, BatchSpec, ScheduleOutcome, split_into_batches};
pub use scratch::ScratchDir;
