//! Pipeline orchestration and configuration.
//!
//! - **Configuration** (`config`): `PipelineConfig` and its TOML/YAML/JSON loaders
//! - **Segmentation** (`segment`): splitting OCR text into translation items
//! - **Pipeline** (`pipeline`): OCR batches, cache, correction loop, statistics
//!
//! # Example
//!
//! ```rust,no_run
//! use folio::core::config::PipelineConfig;
//! use folio::core::pipeline::Pipeline;
//! use folio::types::DocumentSource;
//!
//! # async fn example() -> folio::Result<()> {
//! let config = PipelineConfig::discover()?.unwrap_or_default();
//! let mut pipeline = Pipeline::from_config(config).await?;
//!
//! let document = pipeline
//!     .process_document(&DocumentSource::new("scan.pdf", 120), "German")
//!     .await?;
//! println!("{}", document.translated_text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pipeline;
pub mod segment;

pub use config::{BatchConfig, CacheConfig, EngineConfig, OcrConfig, PipelineConfig, TranslationConfig};
pub use pipeline::Pipeline;
pub use segment::{Segment, segment};
