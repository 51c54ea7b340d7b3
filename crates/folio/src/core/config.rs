//! Configuration loading and management.
//!
//! This module provides utilities for loading pipeline configuration from various
//! sources (TOML, YAML, JSON) and discovering configuration files in the project hierarchy.
//!
//! Engine executables, scratch and quarantine locations and translation API
//! credentials are all configuration values; nothing environment-specific is
//! compiled into the pipeline.

use crate::batch::resources::MAX_PARALLEL_WORKERS;
use crate::{FolioError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Main pipeline configuration.
///
/// # Example
///
/// ```rust
/// use folio::core::config::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.ocr.quality_threshold, 0.7);
/// assert_eq!(config.batch.max_retries, 3);
///
/// // let config = PipelineConfig::from_toml_file("folio.toml")?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub translation: TranslationConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// OCR engine selection and quality thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Engine tried first. Defaults to the first registered engine.
    #[serde(default)]
    pub preferred_engine: Option<String>,

    /// Score at which a result is accepted without trying further engines.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Minimum score for a best-effort result when no engine reaches `quality_threshold`.
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f64,

    /// External engines, in fallback order.
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

/// An external OCR executable.
///
/// `args` may contain the placeholders `{input}`, `{output_dir}`,
/// `{first_page}`, `{last_page}` (inclusive), `{end_page}` (exclusive) and
/// `{page_range}` (`first-last`). Arguments that reference a page placeholder
/// are dropped when the whole document is processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub name: String,

    /// Executable name (resolved on `PATH`) or explicit path.
    pub executable: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Artifact file name inside the output directory. Defaults to the first `.md` or `.txt` file.
    #[serde(default)]
    pub output_file: Option<String>,

    /// Use stdout as the text when the engine writes no artifact.
    #[serde(default)]
    pub read_stdout: bool,

    /// Confidence reported when the engine prints no `confidence=` line.
    #[serde(default = "default_engine_confidence")]
    pub default_confidence: f64,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Page batching, retry and quarantine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failures after which a batch is quarantined.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Cap on parallel workers, at most 2.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Memory each worker is assumed to need.
    #[serde(default = "default_memory_per_worker_gb")]
    pub memory_per_worker_gb: f64,

    #[serde(default = "default_seconds_per_page")]
    pub seconds_per_page: u64,

    #[serde(default = "default_max_batch_timeout_secs")]
    pub max_batch_timeout_secs: u64,

    /// Parent of the per-worker scratch directories (None = system temp dir).
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: PathBuf,
}

/// Translation collaborator and correction loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_correction_attempts")]
    pub max_correction_attempts: usize,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key. Takes precedence over `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub temperature: f32,
}

/// Semantic cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    /// Extra entries evicted below `max_cache_size` so eviction does not run on every insert.
    #[serde(default = "default_eviction_buffer")]
    pub eviction_buffer: usize,

    /// Inserts between flushes to disk.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: usize,

    /// `hashing`, or a fastembed preset (`fast`, `balanced`, `quality`, `multilingual`).
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Vector length of the hashing embedder.
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

fn default_true() -> bool {
    true
}
fn default_quality_threshold() -> f64 {
    0.7
}
fn default_fallback_threshold() -> f64 {
    0.4
}
fn default_engine_confidence() -> f64 {
    0.8
}
fn default_batch_size() -> usize {
    50
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_workers() -> usize {
    2
}
fn default_memory_per_worker_gb() -> f64 {
    3.0
}
fn default_seconds_per_page() -> u64 {
    10
}
fn default_max_batch_timeout_secs() -> u64 {
    300
}
fn default_quarantine_dir() -> PathBuf {
    PathBuf::from(".folio/quarantine")
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_correction_attempts() -> usize {
    2
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".folio/cache")
}
fn default_similarity_threshold() -> f64 {
    0.85
}
fn default_max_cache_size() -> usize {
    10_000
}
fn default_eviction_buffer() -> usize {
    100
}
fn default_flush_interval() -> usize {
    10
}
fn default_embedding_model() -> String {
    "hashing".to_string()
}
fn default_embedding_dimensions() -> usize {
    384
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            preferred_engine: None,
            quality_threshold: default_quality_threshold(),
            fallback_threshold: default_fallback_threshold(),
            engines: Vec::new(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            max_workers: default_max_workers(),
            memory_per_worker_gb: default_memory_per_worker_gb(),
            seconds_per_page: default_seconds_per_page(),
            max_batch_timeout_secs: default_max_batch_timeout_secs(),
            scratch_dir: None,
            quarantine_dir: default_quarantine_dir(),
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_correction_attempts: default_max_correction_attempts(),
            endpoint: default_endpoint(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_request_timeout_secs(),
            temperature: 0.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: default_cache_dir(),
            similarity_threshold: default_similarity_threshold(),
            max_cache_size: default_max_cache_size(),
            eviction_buffer: default_eviction_buffer(),
            flush_interval: default_flush_interval(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

impl BatchConfig {
    /// Per-batch timeout: `pages × seconds_per_page`, capped at `max_batch_timeout_secs`.
    pub fn timeout_for(&self, pages: usize) -> u64 {
        (pages as u64)
            .saturating_mul(self.seconds_per_page)
            .min(self.max_batch_timeout_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("folio-scratch"))
    }
}

impl TranslationConfig {
    /// Resolve the API key from config, then from `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty()))
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| FolioError::configuration(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| FolioError::configuration(format!("Invalid YAML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| FolioError::configuration(format!("Invalid JSON in {}: {}", path.as_ref().display(), e)))
    }

    /// Load by file extension (`.toml`, `.yaml`/`.yml`, `.json`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(FolioError::configuration(format!(
                "Unsupported config file format: {}",
                path.display()
            ))),
        }
    }

    /// Discover configuration file in parent directories.
    ///
    /// Searches for `folio.toml` in current directory and parent directories.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir().map_err(FolioError::Io)?;

        loop {
            let folio_toml = current.join("folio.toml");
            if folio_toml.exists() {
                return Ok(Some(Self::from_toml_file(folio_toml)?));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(FolioError::configuration(format!("{} must be within [0, 1], got {}", name, value)))
            }
        };

        unit("ocr.quality_threshold", self.ocr.quality_threshold)?;
        unit("ocr.fallback_threshold", self.ocr.fallback_threshold)?;
        unit("cache.similarity_threshold", self.cache.similarity_threshold)?;

        if self.ocr.fallback_threshold > self.ocr.quality_threshold {
            return Err(FolioError::configuration(format!(
                "ocr.fallback_threshold ({}) exceeds ocr.quality_threshold ({})",
                self.ocr.fallback_threshold, self.ocr.quality_threshold
            )));
        }

        let mut names = HashSet::new();
        for engine in &self.ocr.engines {
            if engine.name.trim().is_empty() || engine.executable.trim().is_empty() {
                return Err(FolioError::configuration("OCR engines need a name and an executable"));
            }
            if !names.insert(engine.name.as_str()) {
                return Err(FolioError::configuration(format!("Duplicate OCR engine '{}'", engine.name)));
            }
            unit("engine.default_confidence", engine.default_confidence)?;
        }

        if let Some(preferred) = &self.ocr.preferred_engine
            && !self.ocr.engines.is_empty()
            && !names.contains(preferred.as_str())
        {
            return Err(FolioError::configuration(format!(
                "Preferred engine '{}' is not configured",
                preferred
            )));
        }

        if self.batch.batch_size == 0 {
            return Err(FolioError::configuration("batch.batch_size must be positive"));
        }
        if self.batch.max_retries == 0 {
            return Err(FolioError::configuration("batch.max_retries must be at least 1"));
        }
        if self.batch.max_workers == 0 || self.batch.max_workers > MAX_PARALLEL_WORKERS {
            return Err(FolioError::configuration(format!(
                "batch.max_workers must be between 1 and {}",
                MAX_PARALLEL_WORKERS
            )));
        }
        if self.batch.memory_per_worker_gb <= 0.0 {
            return Err(FolioError::configuration("batch.memory_per_worker_gb must be positive"));
        }
        if self.batch.max_batch_timeout_secs == 0 {
            return Err(FolioError::configuration("batch.max_batch_timeout_secs must be positive"));
        }
        if self.cache.max_cache_size == 0 {
            return Err(FolioError::configuration("cache.max_cache_size must be positive"));
        }
        if self.cache.flush_interval == 0 {
            return Err(FolioError::configuration("cache.flush_interval must be positive"));
        }
        if self.cache.embedding_dimensions == 0 {
            return Err(FolioError::configuration("cache.embedding_dimensions must be positive"));
        }

        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| FolioError::configuration(format!("Failed to read config file {}: {}", path.display(), e)))
}
