//! Validate-then-correct translation loop.

use crate::error::Result;
use crate::translation::Translator;
use crate::translation::prompts::{CORRECTION_CONTEXT, build_correction_prompt};
use crate::translation::validator::{detect_content_type, validate_as};
use crate::types::{ContentType, CorrectionAttempt, TranslationOutcome, ValidationResult};
use std::sync::Arc;

/// Wraps a [`Translator`] with structural validation and up to
/// `max_correction_attempts` correction rounds.
///
/// The loop never fails on bad output: when every attempt stays invalid the
/// candidate with the highest validator confidence is returned and the
/// outcome is marked exhausted.
pub struct SelfCorrectingTranslator {
    translator: Arc<dyn Translator>,
    max_correction_attempts: usize,
}

impl SelfCorrectingTranslator {
    pub fn new(translator: Arc<dyn Translator>, max_correction_attempts: usize) -> Self {
        Self {
            translator,
            max_correction_attempts,
        }
    }

    pub fn model_id(&self) -> &str {
        self.translator.model_id()
    }

    /// Translate `text`, correcting structural mistakes.
    ///
    /// `item_type` overrides content detection on `text`. Only the first
    /// translation call can fail the whole operation; a failed correction
    /// call consumes its attempt and the loop continues.
    #[tracing::instrument(skip(self, text), fields(len = text.len(), item_type = ?item_type))]
    pub async fn translate_with_validation(
        &self,
        text: &str,
        target_language: &str,
        item_type: Option<ContentType>,
    ) -> Result<TranslationOutcome> {
        let content_type = item_type.unwrap_or_else(|| detect_content_type(text));

        let initial = self
            .translator
            .translate(text, target_language, Some(content_type.as_str()))
            .await?;
        let validation = validate_as(text, &initial, content_type);

        if validation.is_valid {
            return Ok(TranslationOutcome {
                confidence: validation.confidence,
                translation: initial,
                validation,
                attempts: Vec::new(),
                exhausted: false,
            });
        }

        let mut attempts: Vec<CorrectionAttempt> = Vec::new();
        let mut best: (String, ValidationResult) = (initial.clone(), validation.clone());
        let mut current = initial;
        let mut current_validation = validation;

        for attempt_number in 1..=self.max_correction_attempts {
            let prompt = build_correction_prompt(content_type, text, &current, &current_validation, target_language);

            let corrected = match self
                .translator
                .translate(&prompt, target_language, Some(CORRECTION_CONTEXT))
                .await
            {
                Ok(corrected) => corrected,
                Err(e) => {
                    tracing::warn!(attempt = attempt_number, error = %e, "Correction call failed");
                    continue;
                }
            };

            let corrected_validation = validate_as(text, &corrected, content_type);
            let success = corrected_validation.is_valid;

            attempts.push(CorrectionAttempt {
                attempt_number,
                previous_translation: current.clone(),
                corrected_translation: corrected.clone(),
                validation: corrected_validation.clone(),
                success,
            });

            if success {
                tracing::debug!(attempt = attempt_number, "Correction produced a valid translation");
                return Ok(TranslationOutcome {
                    confidence: corrected_validation.confidence,
                    translation: corrected,
                    validation: corrected_validation,
                    attempts,
                    exhausted: false,
                });
            }

            if corrected_validation.confidence > best.1.confidence {
                best = (corrected.clone(), corrected_validation.clone());
            }
            current = corrected;
            current_validation = corrected_validation;
        }

        let (translation, validation) = best;
        tracing::info!(
            content_type = %content_type,
            attempts = attempts.len(),
            confidence = validation.confidence,
            issues = ?validation.issues,
            "Correction attempts exhausted; returning best candidate"
        );

        Ok(TranslationOutcome {
            confidence: validation.confidence,
            translation,
            validation,
            attempts,
            exhausted: true,
        })
    }
}
