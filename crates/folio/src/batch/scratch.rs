use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static WORKER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// RAII guard for a batch worker's private scratch directory.
///
/// The directory is named `worker-<id>-<timestamp>` and removed on drop,
/// whether the batch succeeded, failed or was cancelled by a timeout.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub async fn create(root: &Path, worker_id: usize) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let sequence = WORKER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let path = root.join(format!("worker-{}-{}-{}", worker_id, nanos, sequence));

        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        // Blocking remove since Drop can't be async
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}
