//! Text embedding for the semantic cache.
//!
//! [`HashingEmbedder`] is the default: a hashed bag of character trigrams,
//! deterministic and free of model downloads. With the `embeddings` feature,
//! [`FastEmbedder`] runs a local ONNX model through fastembed, selected by
//! preset name.

use crate::core::config::CacheConfig;
use crate::error::{FolioError, Result};
use ahash::AHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[cfg(feature = "embeddings")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

/// Produces fixed-length vectors for text.
pub trait Embedder: Send + Sync {
    /// Identifier persisted with the embedding matrix.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vector.iter_mut().for_each(|x| *x /= magnitude);
    }
}

/// Dot product of two vectors; the cosine similarity when both are normalized.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

/// Character-trigram feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-trigram-{}", dimensions),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];

        let normalized: Vec<char> = std::iter::once(' ')
            .chain(
                text.split_whitespace()
                    .flat_map(|word| word.chars().chain(std::iter::once(' ')))
                    .flat_map(char::to_lowercase),
            )
            .collect();

        for window in normalized.windows(3) {
            let mut hasher = AHasher::default();
            window.hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Named fastembed model presets.
#[derive(Debug, Clone)]
pub struct EmbeddingPreset {
    pub name: &'static str,
    #[cfg(feature = "embeddings")]
    pub model: EmbeddingModel,
    #[cfg(not(feature = "embeddings"))]
    pub model_name: &'static str,
    pub dimensions: usize,
}

pub const EMBEDDING_PRESETS: &[EmbeddingPreset] = &[
    EmbeddingPreset {
        name: "fast",
        #[cfg(feature = "embeddings")]
        model: EmbeddingModel::AllMiniLML6V2Q,
        #[cfg(not(feature = "embeddings"))]
        model_name: "AllMiniLML6V2Q",
        dimensions: 384,
    },
    EmbeddingPreset {
        name: "balanced",
        #[cfg(feature = "embeddings")]
        model: EmbeddingModel::BGEBaseENV15,
        #[cfg(not(feature = "embeddings"))]
        model_name: "BGEBaseENV15",
        dimensions: 768,
    },
    EmbeddingPreset {
        name: "quality",
        #[cfg(feature = "embeddings")]
        model: EmbeddingModel::BGELargeENV15,
        #[cfg(not(feature = "embeddings"))]
        model_name: "BGELargeENV15",
        dimensions: 1024,
    },
    EmbeddingPreset {
        name: "multilingual",
        #[cfg(feature = "embeddings")]
        model: EmbeddingModel::MultilingualE5Base,
        #[cfg(not(feature = "embeddings"))]
        model_name: "MultilingualE5Base",
        dimensions: 768,
    },
];

pub fn get_preset(name: &str) -> Option<&'static EmbeddingPreset> {
    EMBEDDING_PRESETS.iter().find(|p| p.name == name)
}

/// fastembed-backed embedder.
///
/// `TextEmbedding::embed` needs `&mut self`, so the model sits behind a mutex
/// and concurrent callers are serialized.
#[cfg(feature = "embeddings")]
pub struct FastEmbedder {
    model: parking_lot::Mutex<TextEmbedding>,
    model_id: String,
    dimensions: usize,
}

#[cfg(feature = "embeddings")]
impl FastEmbedder {
    /// Load the model for `preset`, downloading it into `cache_dir` on first use.
    pub fn from_preset(preset: &str, cache_dir: std::path::PathBuf) -> Result<Self> {
        let preset = get_preset(preset)
            .ok_or_else(|| FolioError::configuration(format!("Unknown embedding preset: {}", preset)))?;

        let options = InitOptions::new(preset.model.clone()).with_cache_dir(cache_dir);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| FolioError::cache(format!("Failed to initialize embedding model: {}", e)))?;

        Ok(Self {
            model: parking_lot::Mutex::new(model),
            model_id: format!("fastembed-{}", preset.name),
            dimensions: preset.dimensions,
        })
    }
}

#[cfg(feature = "embeddings")]
impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self
            .model
            .lock()
            .embed(vec![text], None)
            .map_err(|e| FolioError::cache(format!("Failed to generate embedding: {}", e)))?;

        let mut embedding = embeddings
            .pop()
            .ok_or_else(|| FolioError::cache("Embedding model returned no vectors"))?;
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Build the embedder named by `config.embedding_model`.
pub fn embedder_from_config(config: &CacheConfig) -> Result<Arc<dyn Embedder>> {
    if config.embedding_model == "hashing" {
        return Ok(Arc::new(HashingEmbedder::new(config.embedding_dimensions)));
    }

    #[cfg(feature = "embeddings")]
    {
        let embedder = FastEmbedder::from_preset(&config.embedding_model, config.cache_dir.join("models"))?;
        Ok(Arc::new(embedder))
    }

    #[cfg(not(feature = "embeddings"))]
    {
        if get_preset(&config.embedding_model).is_some() {
            Err(FolioError::MissingDependency(format!(
                "Embedding preset '{}' requires the 'embeddings' feature",
                config.embedding_model
            )))
        } else {
            Err(FolioError::configuration(format!(
                "Unknown embedding model: {}",
                config.embedding_model
            )))
        }
    }
}
