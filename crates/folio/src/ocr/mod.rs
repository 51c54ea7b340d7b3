//! OCR engines, quality assessment and multi-engine coordination.
pub mod coordinator;
pub mod engine;
pub mod quality;
pub mod utils;

pub use coordinator::{OcrCoordinator, PageRangeOcr};
pub use engine::{EngineOutput, OcrEngine, OcrRequest, SubprocessEngine};
pub use quality::{assess, assess_text};
pub use utils::compute_hash;
