//! Folio - Adaptive Document Processing Pipeline
//!
//! Folio turns scanned documents into translated text. Pages are OCRed in
//! batches by external engines with quality-scored fallback, the text is
//! translated item by item with structural validation and self-correction,
//! and translations are reused through an exact plus semantic-similarity cache.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use folio::{DocumentSource, Pipeline, PipelineConfig};
//!
//! # async fn example() -> folio::Result<()> {
//! let config = PipelineConfig::from_toml_file("folio.toml")?;
//! let mut pipeline = Pipeline::from_config(config).await?;
//!
//! let document = pipeline
//!     .process_document(&DocumentSource::new("report.pdf", 120), "German")
//!     .await?;
//! println!("confidence {:.2}", document.confidence);
//! println!("quarantined batches: {}", document.quarantined.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **OCR** (`ocr`): engine contract, subprocess engines, the quality assessor
//!   and the fallback coordinator
//! - **Batching** (`batch`): page-range scheduling, resource-aware parallelism,
//!   retry, quarantine and order-restoring reassembly
//! - **Translation** (`translation`): content validator, correction prompts and
//!   the self-correcting translator
//! - **Cache** (`cache`): two-tier translation cache with pluggable embedders
//! - **Core** (`core`): configuration and the pipeline orchestrator
//!
//! # Features
//!
//! - `http` (default): OpenAI-compatible translation client
//! - `embeddings`: fastembed ONNX models for the semantic cache

#![deny(unsafe_code)]

pub mod batch;
pub mod cache;
pub mod core;
pub mod error;
pub mod ocr;
pub mod translation;
pub mod types;

mod utils;

pub use error::{FolioError, Result};
pub use types::*;

pub use batch::{BatchScheduler, QuarantineStore, ScheduleOutcome};
pub use cache::{CacheHit, CacheStats, Embedder, HashingEmbedder, HitKind, SemanticCache};
pub use core::config::{BatchConfig, CacheConfig, EngineConfig, OcrConfig, PipelineConfig, TranslationConfig};
pub use core::pipeline::Pipeline;
pub use ocr::{OcrCoordinator, OcrEngine, OcrRequest, PageRangeOcr, SubprocessEngine};
pub use translation::{SelfCorrectingTranslator, Translator};

#[cfg(feature = "http")]
pub use translation::HttpTranslator;
