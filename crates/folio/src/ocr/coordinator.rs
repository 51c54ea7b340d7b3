//! Multi-engine OCR with quality-scored fallback.
//!
//! The coordinator tries the preferred engine first and accepts its result if
//! the quality score reaches `quality_threshold`. Otherwise it walks the
//! remaining available engines in registration order, keeping the best
//! result, and stops at the first one that reaches the threshold. When none
//! does, the best result is returned if it clears `fallback_threshold`;
//! otherwise the caller receives an explicit exhausted result.
//!
//! Engine availability is probed once, when the coordinator is built.

use crate::core::config::OcrConfig;
use crate::error::{FolioError, Result};
use crate::ocr::engine::{OcrEngine, OcrRequest, SubprocessEngine};
use crate::ocr::quality;
use crate::types::{OcrResult, OcrStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

struct RegisteredEngine {
    engine: Arc<dyn OcrEngine>,
    available: bool,
}

/// Runs OCR for a page range. Implemented by [`OcrCoordinator`]; the batch
/// scheduler depends only on this trait.
#[async_trait]
pub trait PageRangeOcr: Send + Sync {
    /// Whether at least one engine can run.
    fn is_ready(&self) -> bool;

    /// OCR one request. Exhaustion of every engine is an error at this level.
    async fn ocr_pages(&self, request: &OcrRequest) -> Result<OcrResult>;
}

pub struct OcrCoordinator {
    engines: Vec<RegisteredEngine>,
    preferred: Option<String>,
    quality_threshold: f64,
    fallback_threshold: f64,
}

impl OcrCoordinator {
    /// Register engines in fallback order and probe each one once.
    pub async fn new(engines: Vec<Arc<dyn OcrEngine>>, config: &OcrConfig) -> Self {
        let mut registered = Vec::with_capacity(engines.len());
        for engine in engines {
            let available = engine.is_available().await;
            registered.push(RegisteredEngine { engine, available });
        }

        let coordinator = Self {
            engines: registered,
            preferred: config.preferred_engine.clone(),
            quality_threshold: config.quality_threshold,
            fallback_threshold: config.fallback_threshold,
        };

        tracing::info!(
            available = ?coordinator.available_engines(),
            preferred = ?coordinator.preferred,
            "OCR coordinator ready"
        );

        coordinator
    }

    /// Build subprocess engines from configuration.
    pub async fn from_config(config: &OcrConfig) -> Result<Self> {
        if config.engines.is_empty() {
            return Err(FolioError::configuration("No OCR engines configured"));
        }

        let engines = config
            .engines
            .iter()
            .cloned()
            .map(|c| Arc::new(SubprocessEngine::new(c)) as Arc<dyn OcrEngine>)
            .collect();

        Ok(Self::new(engines, config).await)
    }

    /// Names of engines that passed the startup probe, in fallback order.
    pub fn available_engines(&self) -> Vec<&str> {
        self.engines
            .iter()
            .filter(|e| e.available)
            .map(|e| e.engine.name())
            .collect()
    }

    pub fn engine_ready(&self) -> bool {
        self.engines.iter().any(|e| e.available)
    }

    fn preferred_index(&self) -> Option<usize> {
        match &self.preferred {
            Some(name) => self.engines.iter().position(|e| e.engine.name() == name),
            None if self.engines.is_empty() => None,
            None => Some(0),
        }
    }

    async fn attempt(&self, engine: &dyn OcrEngine, request: &OcrRequest) -> Option<OcrResult> {
        let request = request.for_engine(engine.name());
        let started = Instant::now();

        match engine.invoke(&request).await {
            Ok(output) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let result = OcrResult::new(output.text, output.confidence, engine.name(), elapsed);
                let assessment = quality::assess(&result);
                tracing::debug!(
                    engine = engine.name(),
                    score = assessment.overall_score,
                    issues = ?assessment.issues,
                    "OCR attempt assessed"
                );
                Some(result.with_quality(assessment))
            }
            Err(e) => {
                tracing::warn!(engine = engine.name(), error = %e, "OCR engine failed");
                None
            }
        }
    }

    /// Run the fallback state machine for one request.
    ///
    /// Never fails: engine errors are absorbed and exhaustion is reported as
    /// an [`OcrStatus::Exhausted`] result.
    #[tracing::instrument(skip(self, request), fields(input = %request.input_path.display(), pages = ?request.pages))]
    pub async fn process(&self, request: &OcrRequest) -> OcrResult {
        let mut attempted = Vec::new();
        let mut best: Option<OcrResult> = None;

        let preferred = self.preferred_index();

        // Preferred engine
        if let Some(index) = preferred {
            let entry = &self.engines[index];
            if entry.available {
                attempted.push(entry.engine.name().to_string());
                if let Some(result) = self.attempt(entry.engine.as_ref(), request).await {
                    if result.overall_score() >= self.quality_threshold {
                        return finish(result, OcrStatus::Accepted, attempted, false);
                    }
                    best = Some(result);
                }
            } else {
                tracing::debug!(engine = entry.engine.name(), "Preferred engine unavailable");
            }
        }

        // Fallbacks
        for (index, entry) in self.engines.iter().enumerate() {
            if Some(index) == preferred || !entry.available {
                continue;
            }

            tracing::info!(engine = entry.engine.name(), "Trying fallback OCR engine");
            attempted.push(entry.engine.name().to_string());

            let Some(result) = self.attempt(entry.engine.as_ref(), request).await else {
                continue;
            };

            if result.overall_score() >= self.quality_threshold {
                return finish(result, OcrStatus::Accepted, attempted, true);
            }

            let better = best
                .as_ref()
                .is_none_or(|current| result.overall_score() > current.overall_score());
            if better {
                best = Some(result);
            }
        }

        match best {
            Some(result) if result.overall_score() >= self.fallback_threshold => {
                tracing::info!(
                    engine = %result.engine,
                    score = result.overall_score(),
                    "No engine reached the quality threshold; returning best effort"
                );
                let fallback_used = attempted.len() > 1;
                finish(result, OcrStatus::BestEffort, attempted, fallback_used)
            }
            best => {
                let best_score = best.as_ref().map(|r| r.overall_score());
                tracing::warn!(attempted = ?attempted, best_score = ?best_score, "All OCR engines exhausted");
                OcrResult::exhausted(attempted, best_score)
            }
        }
    }
}

fn finish(result: OcrResult, status: OcrStatus, attempted: Vec<String>, fallback_used: bool) -> OcrResult {
    let mut result = result.with_status(status);
    result
        .metadata
        .insert("attempted_engines".to_string(), serde_json::Value::from(attempted));
    result
        .metadata
        .insert("fallback_used".to_string(), serde_json::Value::Bool(fallback_used));
    result
}

#[async_trait]
impl PageRangeOcr for OcrCoordinator {
    fn is_ready(&self) -> bool {
        self.engine_ready()
    }

    async fn ocr_pages(&self, request: &OcrRequest) -> Result<OcrResult> {
        if !self.engine_ready() {
            return Err(FolioError::engine_unavailable("all", "no OCR engine passed the availability probe"));
        }

        let result = self.process(request).await;
        if result.is_failure() {
            return Err(FolioError::ocr(format!(
                "All OCR engines exhausted for {}",
                request.input_path.display()
            )));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::engine::EngineOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GOOD_TEXT: &str = "# Annual Report\n\n\
        The board approved the consolidated statements after a detailed review of every regional office.\n\n\
        Operating income increased while administrative expenses were reduced across most business units.";

    struct MockEngine {
        name: String,
        available: bool,
        output: Option<EngineOutput>,
        calls: AtomicUsize,
    }

    impl MockEngine {
        fn new(name: &str, text: &str, confidence: f64) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: true,
                output: Some(EngineOutput {
                    text: text.to_string(),
                    confidence,
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: true,
                output: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn unavailable(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: false,
                output: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OcrEngine for MockEngine {
        fn name(&self) -> &str {
            &self.name
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn invoke(&self, _request: &OcrRequest) -> Result<EngineOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output
                .clone()
                .ok_or_else(|| FolioError::ocr(format!("{} crashed", self.name)))
        }
    }

    fn dyn_engines(engines: &[&Arc<MockEngine>]) -> Vec<Arc<dyn OcrEngine>> {
        engines.iter().map(|e| Arc::clone(e) as Arc<dyn OcrEngine>).collect()
    }

    fn request() -> OcrRequest {
        OcrRequest::new("doc.pdf", "/tmp/folio-test-out")
    }

    #[tokio::test]
    async fn test_preferred_engine_accepted() {
        let primary = MockEngine::new("primary", GOOD_TEXT, 0.95);
        let secondary = MockEngine::new("secondary", GOOD_TEXT, 0.95);
        let coordinator = OcrCoordinator::new(
            dyn_engines(&[&primary, &secondary]),
            &OcrConfig::default(),
        )
        .await;

        let result = coordinator.process(&request()).await;
        assert_eq!(result.engine, "primary");
        assert_eq!(result.status, OcrStatus::Accepted);
        assert_eq!(result.metadata["fallback_used"], serde_json::Value::Bool(false));
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_when_preferred_fails() {
        let primary = MockEngine::failing("primary");
        let secondary = MockEngine::new("secondary", GOOD_TEXT, 0.9);
        let coordinator = OcrCoordinator::new(
            dyn_engines(&[&primary, &secondary]),
            &OcrConfig::default(),
        )
        .await;

        let result = coordinator.process(&request()).await;
        assert_eq!(result.engine, "secondary");
        assert_eq!(result.status, OcrStatus::Accepted);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.metadata["fallback_used"], serde_json::Value::Bool(true));
    }

    #[tokio::test]
    async fn test_stops_at_first_fallback_reaching_threshold() {
        let primary = MockEngine::new("primary", "x", 0.1);
        let second = MockEngine::new("second", GOOD_TEXT, 0.9);
        let third = MockEngine::new("third", GOOD_TEXT, 0.99);
        let coordinator = OcrCoordinator::new(
            dyn_engines(&[&primary, &second, &third]),
            &OcrConfig::default(),
        )
        .await;

        let result = coordinator.process(&request()).await;
        assert_eq!(result.engine, "second");
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_best_effort_between_thresholds() {
        // No structure, low engine confidence: score between 0.4 and 0.7.
        let text = "plain sentence without structure";
        let primary = MockEngine::new("primary", text, 0.2);
        let secondary = MockEngine::new("secondary", text, 0.3);
        let coordinator = OcrCoordinator::new(
            dyn_engines(&[&primary, &secondary]),
            &OcrConfig::default(),
        )
        .await;

        let result = coordinator.process(&request()).await;
        assert_eq!(result.status, OcrStatus::BestEffort);
        assert_eq!(result.engine, "secondary");
        assert!(result.overall_score() >= 0.4 && result.overall_score() < 0.7);
    }

    #[tokio::test]
    async fn test_exhausted_when_everything_fails() {
        let coordinator = OcrCoordinator::new(
            dyn_engines(&[&MockEngine::failing("primary"), &MockEngine::failing("secondary")]),
            &OcrConfig::default(),
        )
        .await;

        let result = coordinator.process(&request()).await;
        assert!(result.is_failure());
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.metadata["exhausted"], serde_json::Value::Bool(true));

        let err = coordinator.ocr_pages(&request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unavailable_engines_are_skipped() {
        let missing = MockEngine::unavailable("missing");
        let present = MockEngine::new("present", GOOD_TEXT, 0.9);
        let config = OcrConfig {
            preferred_engine: Some("missing".to_string()),
            ..Default::default()
        };
        let coordinator = OcrCoordinator::new(dyn_engines(&[&missing, &present]), &config).await;

        assert_eq!(coordinator.available_engines(), vec!["present"]);
        assert!(coordinator.engine_ready());

        let result = coordinator.process(&request()).await;
        assert_eq!(result.engine, "present");
        assert_eq!(missing.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preferred_engine_by_name() {
        let first = MockEngine::new("first", GOOD_TEXT, 0.9);
        let second = MockEngine::new("second", GOOD_TEXT, 0.9);
        let config = OcrConfig {
            preferred_engine: Some("second".to_string()),
            ..Default::default()
        };
        let coordinator = OcrCoordinator::new(dyn_engines(&[&first, &second]), &config).await;

        let result = coordinator.process(&request()).await;
        assert_eq!(result.engine, "second");
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_ready_without_available_engines() {
        let coordinator =
            OcrCoordinator::new(dyn_engines(&[&MockEngine::unavailable("missing")]), &OcrConfig::default()).await;
        assert!(!coordinator.is_ready());
        let err = coordinator.ocr_pages(&request()).await.unwrap_err();
        assert!(matches!(err, FolioError::EngineUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_from_config_requires_engines() {
        assert!(OcrCoordinator::from_config(&OcrConfig::default()).await.is_err());
    }
}
