//! Durable records of permanently failed batches.
//!
//! One JSON file per quarantined batch. Records are never deleted by folio;
//! operators inspect and clear the directory themselves.

use crate::error::{FolioError, Result};
use crate::types::QuarantineRecord;
use crate::utils::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct QuarantineStore {
    dir: PathBuf,
}

impl QuarantineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, record: &QuarantineRecord) -> PathBuf {
        let stem = record
            .pdf_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let stem: String = stem
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let millis = (record.timestamp * 1000.0) as u64;
        let key = crate::ocr::utils::compute_hash(&record.pdf_path.to_string_lossy());

        self.dir.join(format!(
            "{}-{}-batch{}-{}.json",
            stem, key, record.batch_number, millis
        ))
    }

    /// Persist one record and return its path.
    pub fn write(&self, record: &QuarantineRecord) -> Result<PathBuf> {
        let path = self.record_path(record);
        let json = serde_json::to_vec_pretty(record)?;

        write_atomic(&path, &json).map_err(|e| {
            FolioError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write quarantine record {}: {}", path.display(), e),
            ))
        })?;

        tracing::warn!(
            pdf = %record.pdf_path.display(),
            batch = record.batch_number,
            start_page = record.start_page,
            end_page = record.end_page,
            failures = record.failure_count,
            path = %path.display(),
            "Batch quarantined"
        );

        Ok(path)
    }

    /// All persisted records, ordered by document, batch and time.
    ///
    /// Unreadable files are skipped.
    pub fn records(&self) -> Result<Vec<QuarantineRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(FolioError::from)
                .and_then(|bytes| serde_json::from_slice::<QuarantineRecord>(&bytes).map_err(FolioError::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable quarantine record"),
            }
        }

        records.sort_by(|a, b| {
            a.pdf_path
                .cmp(&b.pdf_path)
                .then(a.batch_number.cmp(&b.batch_number))
                .then(a.timestamp.total_cmp(&b.timestamp))
        });
        Ok(records)
    }

    pub fn records_for(&self, pdf_path: &Path) -> Result<Vec<QuarantineRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.pdf_path == pdf_path)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(batch_number: usize, timestamp: f64) -> QuarantineRecord {
        QuarantineRecord {
            pdf_path: PathBuf::from("/docs/annual report.pdf"),
            batch_number,
            start_page: batch_number * 50,
            end_page: batch_number * 50 + 50,
            error: "Batch timed out after 300s".to_string(),
            timestamp,
            failure_count: 3,
        }
    }

    #[test]
    fn test_write_and_list_records() {
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path().join("quarantine"));

        let path = store.write(&record(2, 1_700_000_000.5)).unwrap();
        store.write(&record(1, 1_700_000_001.0)).unwrap();

        assert!(path.file_name().unwrap().to_string_lossy().starts_with("annual_report-"));

        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].batch_number, 1);
        assert_eq!(records[1], record(2, 1_700_000_000.5));
    }

    #[test]
    fn test_records_for_filters_by_document() {
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path());

        store.write(&record(1, 1.0)).unwrap();
        let mut other = record(1, 2.0);
        other.pdf_path = PathBuf::from("/docs/other.pdf");
        store.write(&other).unwrap();

        let records = store.records_for(Path::new("/docs/other.pdf")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pdf_path, PathBuf::from("/docs/other.pdf"));
    }

    #[test]
    fn test_missing_dir_has_no_records() {
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path().join("absent"));
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let dir = tempdir().unwrap();
        let store = QuarantineStore::new(dir.path());
        store.write(&record(1, 1.0)).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        assert_eq!(store.records().unwrap().len(), 1);
    }
}
