//! Document pipeline orchestration.
//!
//! Runs a document through the batch scheduler, splits the reassembled text
//! into items, and sends each item through the semantic cache and the
//! self-correcting translator:
//!
//! 1. OCR every page batch; quarantined batches leave gaps, recorded in stats
//! 2. Segment the text; blocks without letters pass through unchanged
//! 3. Per item: cache lookup, then translate-and-correct on a miss, then cache write
//! 4. Reassemble and aggregate statistics
//!
//! Cache failures are logged and counted; the item is translated as if the
//! cache were absent. A failed translation call keeps the source text for that
//! item. The only per-document failure is OCR producing nothing at all.

use crate::batch::{BatchScheduler, ResourceProbe};
use crate::cache::{HitKind, SemanticCache, embedder_from_config};
use crate::core::config::PipelineConfig;
use crate::core::segment::{Segment, join_segments, segment};
use crate::error::{FolioError, Result};
use crate::ocr::{OcrCoordinator, PageRangeOcr};
use crate::translation::{SelfCorrectingTranslator, Translator};
use crate::types::{DocumentSource, PipelineStats, ProcessedDocument, TranslationSource};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-item translation result.
struct TranslatedItem {
    text: String,
    source: TranslationSource,
    confidence: Option<f64>,
}

/// Sequences OCR, caching and translation for whole documents.
pub struct Pipeline {
    config: PipelineConfig,
    scheduler: BatchScheduler,
    translator: SelfCorrectingTranslator,
    cache: Option<SemanticCache>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        config: PipelineConfig,
        ocr: Arc<dyn PageRangeOcr>,
        translator: Arc<dyn Translator>,
        cache: Option<SemanticCache>,
    ) -> Result<Self> {
        config.validate()?;

        let scheduler = BatchScheduler::new(ocr, config.batch.clone());
        let translator = SelfCorrectingTranslator::new(translator, config.translation.max_correction_attempts);

        Ok(Self {
            config,
            scheduler,
            translator,
            cache,
        })
    }

    /// Build every collaborator from configuration: subprocess OCR engines,
    /// the HTTP translator and, when enabled, the on-disk semantic cache.
    ///
    /// A cache that cannot be opened is logged and the pipeline runs without one.
    #[cfg(feature = "http")]
    pub async fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let coordinator = OcrCoordinator::from_config(&config.ocr).await?;
        let translator = crate::translation::HttpTranslator::from_config(&config.translation)?;
        let cache = open_cache(&config);

        Self::new(config, Arc::new(coordinator), Arc::new(translator), cache)
    }

    /// Like [`Pipeline::from_config`] with a caller-supplied translator.
    pub async fn from_config_with_translator(config: PipelineConfig, translator: Arc<dyn Translator>) -> Result<Self> {
        config.validate()?;

        let coordinator = OcrCoordinator::from_config(&config.ocr).await?;
        let cache = open_cache(&config);

        Self::new(config, Arc::new(coordinator), translator, cache)
    }

    /// Replace the system resource probe used for worker planning.
    pub fn with_resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.scheduler = self.scheduler.with_probe(probe);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&SemanticCache> {
        self.cache.as_ref()
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    /// OCR and translate one document.
    #[tracing::instrument(skip(self, source), fields(path = %source.path.display(), pages = source.page_count))]
    pub async fn process_document(&mut self, source: &DocumentSource, target_language: &str) -> Result<ProcessedDocument> {
        let outcome = self.scheduler.process_document(source).await?;

        if outcome.batches_total > 0 && outcome.batches.is_empty() {
            return Err(FolioError::ocr(format!(
                "All {} batches of {} were quarantined",
                outcome.batches_total,
                source.path.display()
            )));
        }

        let mut stats = PipelineStats {
            batches_total: outcome.batches_total,
            batches_succeeded: outcome.batches.len(),
            batches_quarantined: outcome.quarantined.len(),
            batch_retries: outcome.retries,
            omitted_page_ranges: outcome.omitted_page_ranges.clone(),
            execution_mode: Some(outcome.mode),
            ..Default::default()
        };

        for batch in &outcome.batches {
            if !stats.engines_used.contains(&batch.engine) {
                stats.engines_used.push(batch.engine.clone());
            }
        }
        if !outcome.batches.is_empty() {
            stats.mean_ocr_quality =
                outcome.batches.iter().map(|b| b.quality_score).sum::<f64>() / outcome.batches.len() as f64;
        }

        let (translated_text, confidence) = self.translate_into(&outcome.content, target_language, &mut stats).await;

        self.flush_cache(&mut stats);

        let mut metadata = HashMap::new();
        metadata.insert(
            "translation_model".to_string(),
            serde_json::Value::String(self.translator.model_id().to_string()),
        );
        metadata.insert(
            "pages".to_string(),
            serde_json::Value::from(source.page_count as u64),
        );

        tracing::info!(
            batches = stats.batches_total,
            quarantined = stats.batches_quarantined,
            items = stats.items_total,
            confidence,
            "Document processed"
        );

        Ok(ProcessedDocument {
            source_path: source.path.clone(),
            target_language: target_language.to_string(),
            ocr_text: outcome.content,
            translated_text,
            confidence,
            stats,
            quarantined: outcome.quarantined,
            metadata,
        })
    }

    /// Translate already-extracted text through the cache and correction loop.
    ///
    /// Returns the translated text, its confidence and the translation stats.
    pub async fn translate_text(&self, text: &str, target_language: &str) -> (String, f64, PipelineStats) {
        let mut stats = PipelineStats::default();
        let (translated, confidence) = self.translate_into(text, target_language, &mut stats).await;
        (translated, confidence, stats)
    }

    async fn translate_into(&self, text: &str, target_language: &str, stats: &mut PipelineStats) -> (String, f64) {
        let segments = segment(text);
        stats.items_total = segments.len();

        let mut outputs: Vec<String> = Vec::with_capacity(segments.len());
        let mut confidences: Vec<f64> = Vec::new();
        let mut validation_confidences: Vec<f64> = Vec::new();

        for item in &segments {
            let translated = self.translate_item(item, target_language, stats, &mut validation_confidences).await;
            if let Some(confidence) = translated.confidence {
                confidences.push(confidence);
            }
            tracing::trace!(source = ?translated.source, content_type = %item.content_type, "Item done");
            outputs.push(translated.text);
        }

        if !validation_confidences.is_empty() {
            stats.mean_validation_confidence =
                validation_confidences.iter().sum::<f64>() / validation_confidences.len() as f64;
        }

        let confidence = if confidences.is_empty() {
            1.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        (join_segments(outputs.iter().map(String::as_str)), confidence)
    }

    async fn translate_item(
        &self,
        item: &Segment,
        target_language: &str,
        stats: &mut PipelineStats,
        validation_confidences: &mut Vec<f64>,
    ) -> TranslatedItem {
        if !item.translatable {
            stats.items_passthrough += 1;
            return TranslatedItem {
                text: item.content.clone(),
                source: TranslationSource::Passthrough,
                confidence: None,
            };
        }

        let model = self.translator.model_id();
        let context = Some(item.content_type.as_str());

        if let Some(cache) = &self.cache {
            match cache.get(&item.content, target_language, model, context) {
                Ok(Some(hit)) => {
                    let source = match hit.kind {
                        HitKind::Exact => {
                            stats.exact_cache_hits += 1;
                            TranslationSource::ExactCache
                        }
                        HitKind::Semantic => {
                            stats.semantic_cache_hits += 1;
                            TranslationSource::SemanticCache
                        }
                    };
                    return TranslatedItem {
                        text: hit.translation,
                        source,
                        confidence: Some(hit.quality_score),
                    };
                }
                Ok(None) => stats.cache_misses += 1,
                Err(e) => {
                    stats.cache_errors += 1;
                    tracing::warn!(error = %e, "Cache lookup failed, translating without cache");
                }
            }
        }

        let outcome = match self
            .translator
            .translate_with_validation(&item.content, target_language, Some(item.content_type))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                stats.translation_failures += 1;
                tracing::warn!(error = %e, content_type = %item.content_type, "Translation failed, keeping source text");
                return TranslatedItem {
                    text: item.content.clone(),
                    source: TranslationSource::Failed,
                    confidence: Some(0.0),
                };
            }
        };

        stats.items_translated += 1;
        stats.corrections_attempted += outcome.attempts.len();
        if !outcome.validation.is_valid {
            stats.items_still_invalid += 1;
        }
        validation_confidences.push(outcome.confidence);

        if outcome.validation.is_valid
            && let Some(cache) = &self.cache
            && let Err(e) = cache.put(
                &item.content,
                &outcome.translation,
                target_language,
                model,
                context,
                outcome.confidence,
            )
        {
            stats.cache_errors += 1;
            tracing::warn!(error = %e, "Cache write failed");
        }

        TranslatedItem {
            text: outcome.translation,
            source: TranslationSource::Translated,
            confidence: Some(outcome.confidence),
        }
    }

    fn flush_cache(&self, stats: &mut PipelineStats) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.flush()
        {
            stats.cache_errors += 1;
            tracing::warn!(error = %e, "Cache flush failed");
        }
    }
}

fn open_cache(config: &PipelineConfig) -> Option<SemanticCache> {
    if !config.cache.enabled {
        return None;
    }

    let opened = embedder_from_config(&config.cache).and_then(|embedder| SemanticCache::open(&config.cache, embedder));
    match opened {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!(error = %e, "Semantic cache unavailable, continuing without it");
            None
        }
    }
}
