//! Translation with structural validation and self-correction.
//!
//! The translation backend is a [`Translator`]: anything that turns text into
//! text in a target language. [`SelfCorrectingTranslator`] wraps a backend with
//! the [`validator`] and re-prompts it with a [`prompts::build_correction_prompt`]
//! until the structure survives or the attempt budget runs out.
//!
//! With the `http` feature, [`HttpTranslator`] talks to an OpenAI-compatible
//! chat completions endpoint.
pub mod corrector;
#[cfg(feature = "http")]
pub mod http;
pub mod prompts;
pub mod validator;

use crate::error::Result;
use async_trait::async_trait;

pub use corrector::SelfCorrectingTranslator;
#[cfg(feature = "http")]
pub use http::HttpTranslator;
pub use prompts::{CORRECTION_CONTEXT, build_correction_prompt};
pub use validator::{detect_content_type, validate, validate_as};

/// A translation backend.
///
/// `context` is a content-type hint (`"table"`, `"code_block"`, ...) or
/// [`CORRECTION_CONTEXT`] when `text` is a full correction prompt.
/// Implementations report quota exhaustion and network failures as
/// [`crate::FolioError::Translation`].
#[async_trait]
pub trait Translator: Send + Sync {
    /// Identifier of the underlying model, used in cache keys.
    fn model_id(&self) -> &str;

    async fn translate(&self, text: &str, target_language: &str, context: Option<&str>) -> Result<String>;
}
