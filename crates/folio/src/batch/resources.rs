//! Host resource probing and worker-count selection.

use crate::core::config::BatchConfig;
use crate::types::ExecutionMode;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Cores consumed per parallel OCR worker.
const CORES_PER_WORKER: usize = 4;

/// Upper bound on parallel workers whatever the host offers.
pub const MAX_PARALLEL_WORKERS: usize = 2;

/// Source of the resource figures used to size the worker pool.
pub trait ResourceProbe: Send + Sync {
    fn available_memory_gb(&self) -> f64;
    fn cpu_cores(&self) -> usize;
}

/// Live figures from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResources;

impl ResourceProbe for SystemResources {
    fn available_memory_gb(&self) -> f64 {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        sys.available_memory() as f64 / BYTES_PER_GB
    }

    fn cpu_cores(&self) -> usize {
        num_cpus::get()
    }
}

/// Fixed figures, for hosts where probing is unreliable (containers with cgroup limits).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedResources {
    pub memory_gb: f64,
    pub cores: usize,
}

impl ResourceProbe for FixedResources {
    fn available_memory_gb(&self) -> f64 {
        self.memory_gb
    }

    fn cpu_cores(&self) -> usize {
        self.cores
    }
}

/// Outcome of the sequential/parallel decision.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPlan {
    pub mode: ExecutionMode,
    pub by_cores: usize,
    pub by_memory: usize,
    pub reason: &'static str,
}

/// Pick sequential or parallel execution for `batch_count` batches.
///
/// Workers are `min(by_cores, by_memory, batch_count, max_workers, 2)` where
/// `by_memory = floor(available_gb / memory_per_worker_gb)` and
/// `by_cores = max(1, cores - 1) / 4`, floored at 2 so small hosts with
/// enough memory still run two workers.
pub fn plan_workers(batch_count: usize, engine_ready: bool, probe: &dyn ResourceProbe, config: &BatchConfig) -> WorkerPlan {
    let cores = probe.cpu_cores();
    let memory_gb = probe.available_memory_gb().max(0.0);

    let by_cores = (cores.saturating_sub(1).max(1) / CORES_PER_WORKER).max(2);
    let by_memory = (memory_gb / config.memory_per_worker_gb).floor() as usize;

    let sequential = |reason| WorkerPlan {
        mode: ExecutionMode::Sequential,
        by_cores,
        by_memory,
        reason,
    };

    if batch_count < 2 {
        return sequential("fewer than two batches");
    }
    if !engine_ready {
        return sequential("no OCR engine available for parallel workers");
    }

    let workers = by_cores
        .min(by_memory)
        .min(batch_count)
        .min(config.max_workers.min(MAX_PARALLEL_WORKERS));
    if workers < 2 {
        return sequential("insufficient resources for two workers");
    }

    WorkerPlan {
        mode: ExecutionMode::Parallel { workers },
        by_cores,
        by_memory,
        reason: "parallel",
    }
}
