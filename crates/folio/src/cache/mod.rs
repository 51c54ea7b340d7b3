//! Two-tier translation cache.
//!
//! Lookups first try an exact key over `(text, target_language, model, context)`.
//! On a miss the text is embedded and compared by cosine similarity against
//! every stored entry with the same target language and model; the closest
//! entry at or above `similarity_threshold` is a semantic hit.
//!
//! # Persistence
//!
//! The cache directory holds two files kept in sync by position:
//!
//! - `entries.json` - entry metadata (text, translation, language, model,
//!   timestamps, usage count, quality score)
//! - `embeddings.msgpack` - the embedding matrix plus the key of each row
//!
//! State is flushed every `flush_interval` inserts and on [`SemanticCache::flush`].
//! A matrix that does not match the entries or the current embedder is
//! discarded and rebuilt by re-embedding.
//!
//! The on-disk files are single-writer: sharing a cache directory between
//! concurrent processes is not supported.
pub mod embedding;

use crate::core::config::CacheConfig;
use crate::error::{FolioError, Result};
use crate::ocr::utils::compute_composite_hash;
use crate::types::unix_timestamp;
use crate::utils::write_atomic;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use embedding::{Embedder, HashingEmbedder, embedder_from_config};
#[cfg(feature = "embeddings")]
pub use embedding::FastEmbedder;

const ENTRIES_FILE: &str = "entries.json";
const EMBEDDINGS_FILE: &str = "embeddings.msgpack";

/// One cached translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
    pub translation: String,
    pub target_language: String,
    pub model: String,
    #[serde(default)]
    pub context: Option<String>,
    /// Unit-length embedding of `text`; persisted in the matrix file.
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: f64,
    /// 1 on insert, incremented on every hit.
    pub usage_count: u64,
    /// Threshold in force when the entry was written.
    pub similarity_threshold: f64,
    pub quality_score: f64,
}

impl CacheEntry {
    fn key(&self) -> String {
        cache_key(
            &self.text,
            &self.target_language,
            &self.model,
            self.context.as_deref(),
        )
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    Exact,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHit {
    pub translation: String,
    pub kind: HitKind,
    /// 1.0 for exact hits.
    pub similarity: f64,
    /// Usage count of the matched entry after this hit.
    pub usage_count: u64,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub exact_hits: usize,
    pub semantic_hits: usize,
    pub misses: usize,
    pub inserts: usize,
    pub evictions: usize,
    pub flushes: usize,
}

#[derive(Serialize, Deserialize)]
struct EntriesFile {
    entries: Vec<CacheEntry>,
}

#[derive(Serialize, Deserialize)]
struct EmbeddingMatrix {
    embedder: String,
    dimensions: usize,
    keys: Vec<String>,
    rows: Vec<Vec<f32>>,
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    inserts_since_flush: usize,
    stats: CacheStats,
}

/// Exact-match key for a cache entry.
pub fn cache_key(text: &str, target_language: &str, model: &str, context: Option<&str>) -> String {
    compute_composite_hash(&[text, target_language, model, context.unwrap_or("")])
}

/// Exact plus embedding-similarity translation cache.
pub struct SemanticCache {
    cache_dir: Option<PathBuf>,
    similarity_threshold: f64,
    max_cache_size: usize,
    eviction_buffer: usize,
    flush_interval: usize,
    embedder: Arc<dyn Embedder>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for SemanticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("cache_dir", &self.cache_dir)
            .field("embedder", &self.embedder.model_id())
            .field("entries", &self.len())
            .finish()
    }
}

impl SemanticCache {
    /// Open the cache in `config.cache_dir`, loading any persisted state.
    pub fn open(config: &CacheConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir).map_err(|e| {
            FolioError::cache_with_source(
                format!("Failed to create cache directory {}", config.cache_dir.display()),
                e,
            )
        })?;

        let cache = Self::build(config, embedder, Some(config.cache_dir.clone()));
        cache.load()?;
        Ok(cache)
    }

    /// A cache that never touches disk.
    pub fn in_memory(config: &CacheConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self::build(config, embedder, None)
    }

    fn build(config: &CacheConfig, embedder: Arc<dyn Embedder>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            similarity_threshold: config.similarity_threshold,
            max_cache_size: config.max_cache_size.max(1),
            eviction_buffer: config.eviction_buffer,
            flush_interval: config.flush_interval.max(1),
            embedder,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embeddings are stored and compared at unit length, whatever the embedder returns.
    fn embed_normalized(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = self.embedder.embed(text)?;
        embedding::l2_normalize(&mut vector);
        Ok(vector)
    }

    /// Look up a translation, exact key first, then by similarity.
    ///
    /// Every hit increments the matched entry's usage count. Fails only when
    /// the text cannot be embedded.
    pub fn get(
        &self,
        text: &str,
        target_language: &str,
        model: &str,
        context: Option<&str>,
    ) -> Result<Option<CacheHit>> {
        let key = cache_key(text, target_language, model, context);

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.usage_count += 1;
                state.stats.exact_hits += 1;
                return Ok(Some(CacheHit {
                    translation: entry.translation.clone(),
                    kind: HitKind::Exact,
                    similarity: 1.0,
                    usage_count: entry.usage_count,
                    quality_score: entry.quality_score,
                }));
            }
        }

        let query = self.embed_normalized(text)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut best: Option<(usize, f64)> = None;
        for (index, entry) in state.entries.values().enumerate() {
            if entry.target_language != target_language
                || entry.model != model
                || entry.embedding.len() != query.len()
            {
                continue;
            }
            let similarity = embedding::dot(&query, &entry.embedding);
            if similarity >= self.similarity_threshold && best.is_none_or(|(_, s)| similarity > s) {
                best = Some((index, similarity));
            }
        }

        match best.and_then(|(index, similarity)| state.entries.get_index_mut(index).map(|(_, e)| (e, similarity))) {
            Some((entry, similarity)) => {
                entry.usage_count += 1;
                state.stats.semantic_hits += 1;
                tracing::debug!(similarity, "Semantic cache hit");
                Ok(Some(CacheHit {
                    translation: entry.translation.clone(),
                    kind: HitKind::Semantic,
                    similarity,
                    usage_count: entry.usage_count,
                    quality_score: entry.quality_score,
                }))
            }
            None => {
                state.stats.misses += 1;
                Ok(None)
            }
        }
    }

    /// Read an entry without counting it as a hit.
    pub fn peek(&self, text: &str, target_language: &str, model: &str, context: Option<&str>) -> Option<CacheEntry> {
        let key = cache_key(text, target_language, model, context);
        self.state.lock().entries.get(&key).cloned()
    }

    /// Store a translation.
    ///
    /// Rewriting an existing key replaces the translation and keeps its usage
    /// count. Exceeding `max_cache_size` evicts the least used, oldest entries
    /// down to `max_cache_size - eviction_buffer`; the entry just written is
    /// never evicted. A flush error is returned after the entry is stored in
    /// memory.
    pub fn put(
        &self,
        text: &str,
        translation: &str,
        target_language: &str,
        model: &str,
        context: Option<&str>,
        quality_score: f64,
    ) -> Result<()> {
        let embedding = self.embed_normalized(text)?;
        let key = cache_key(text, target_language, model, context);

        let flush_due = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let usage_count = state.entries.get(&key).map(|e| e.usage_count).unwrap_or(1);
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    text: text.to_string(),
                    translation: translation.to_string(),
                    target_language: target_language.to_string(),
                    model: model.to_string(),
                    context: context.map(str::to_string),
                    embedding,
                    created_at: unix_timestamp(),
                    usage_count,
                    similarity_threshold: self.similarity_threshold,
                    quality_score: quality_score.clamp(0.0, 1.0),
                },
            );
            state.stats.inserts += 1;
            state.inserts_since_flush += 1;

            if state.entries.len() > self.max_cache_size {
                self.evict(state, &key);
            }

            state.inserts_since_flush >= self.flush_interval
        };

        if flush_due {
            self.flush()?;
        }
        Ok(())
    }

    fn evict(&self, state: &mut CacheState, protected_key: &str) {
        let len = state.entries.len();
        let target = (len - self.max_cache_size) + self.eviction_buffer;

        let mut candidates: Vec<(u64, f64, usize)> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (key, _))| key.as_str() != protected_key)
            .map(|(index, (_, entry))| (entry.usage_count, entry.created_at, index))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)).then(a.2.cmp(&b.2)));

        let victims: HashSet<usize> = candidates.iter().take(target).map(|c| c.2).collect();
        let mut index = 0;
        state.entries.retain(|_, _| {
            let keep = !victims.contains(&index);
            index += 1;
            keep
        });

        state.stats.evictions += victims.len();
        tracing::info!(
            evicted = victims.len(),
            remaining = state.entries.len(),
            "Evicted cache entries"
        );
    }

    /// Write entries and the embedding matrix to the cache directory.
    pub fn flush(&self) -> Result<()> {
        let Some(dir) = &self.cache_dir else {
            self.state.lock().inserts_since_flush = 0;
            return Ok(());
        };

        let (entries_bytes, matrix_bytes) = {
            let mut state = self.state.lock();
            let entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
            let matrix = EmbeddingMatrix {
                embedder: self.embedder.model_id().to_string(),
                dimensions: self.embedder.dimensions(),
                keys: state.entries.keys().cloned().collect(),
                rows: state.entries.values().map(|e| e.embedding.clone()).collect(),
            };
            state.inserts_since_flush = 0;
            (
                serde_json::to_vec(&EntriesFile { entries })?,
                rmp_serde::to_vec_named(&matrix)?,
            )
        };

        write_atomic(&dir.join(ENTRIES_FILE), &entries_bytes)
            .map_err(|e| FolioError::cache_with_source("Failed to write cache entries", e))?;
        write_atomic(&dir.join(EMBEDDINGS_FILE), &matrix_bytes)
            .map_err(|e| FolioError::cache_with_source("Failed to write embedding matrix", e))?;

        let mut state = self.state.lock();
        state.stats.flushes += 1;
        tracing::debug!(entries = state.entries.len(), "Flushed semantic cache");
        Ok(())
    }

    fn load(&self) -> Result<()> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };

        let entries_path = dir.join(ENTRIES_FILE);
        if !entries_path.exists() {
            return Ok(());
        }

        let content = fs::read(&entries_path)
            .map_err(|e| FolioError::cache_with_source("Failed to read cache entries", e))?;
        let mut entries = match serde_json::from_slice::<EntriesFile>(&content) {
            Ok(file) => file.entries,
            Err(e) => {
                tracing::warn!(path = %entries_path.display(), error = %e, "Corrupt cache entries file, starting empty");
                return Ok(());
            }
        };

        let keys: Vec<String> = entries.iter().map(CacheEntry::key).collect();

        match self.read_matrix(dir, &keys) {
            Some(rows) => {
                for (entry, row) in entries.iter_mut().zip(rows) {
                    entry.embedding = row;
                }
            }
            None => {
                tracing::warn!(entries = entries.len(), "Rebuilding embedding matrix");
                let mut rebuilt = Vec::with_capacity(entries.len());
                for mut entry in entries {
                    match self.embed_normalized(&entry.text) {
                        Ok(embedding) => {
                            entry.embedding = embedding;
                            rebuilt.push(entry);
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropping cache entry that could not be embedded"),
                    }
                }
                entries = rebuilt;
            }
        }

        let mut state = self.state.lock();
        state.entries = entries.into_iter().map(|e| (e.key(), e)).collect();
        tracing::debug!(entries = state.entries.len(), "Loaded semantic cache");
        Ok(())
    }

    /// Rows of a persisted matrix that matches `keys` and the current embedder.
    fn read_matrix(&self, dir: &Path, keys: &[String]) -> Option<Vec<Vec<f32>>> {
        let path = dir.join(EMBEDDINGS_FILE);
        let bytes = fs::read(&path).ok()?;
        let matrix: EmbeddingMatrix = match rmp_serde::from_slice(&bytes) {
            Ok(matrix) => matrix,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt embedding matrix");
                return None;
            }
        };

        let consistent = matrix.embedder == self.embedder.model_id()
            && matrix.dimensions == self.embedder.dimensions()
            && matrix.keys == keys
            && matrix.rows.len() == keys.len()
            && matrix.rows.iter().all(|r| r.len() == matrix.dimensions);
        if !consistent {
            tracing::warn!(path = %path.display(), "Embedding matrix out of sync with entries");
            return None;
        }

        let mut rows = matrix.rows;
        rows.iter_mut().for_each(|row| embedding::l2_normalize(row));
        Some(rows)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    /// Drop every entry and delete the persisted files.
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.inserts_since_flush = 0;
        }

        if let Some(dir) = &self.cache_dir {
            for name in [ENTRIES_FILE, EMBEDDINGS_FILE] {
                match fs::remove_file(dir.join(name)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(FolioError::cache_with_source("Failed to remove cache file", e)),
                }
            }
        }
        Ok(())
    }
}
