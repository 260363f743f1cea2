//! The divination engine.
//!
//! One reading at a time per engine: a second caller arriving while a reading
//! is in flight gets the busy message straight away instead of queuing.

use crate::aggregate::{KnowledgeAggregator, KnowledgeBundle};
use crate::config::TarotConfig;
use crate::generator::TextGenerator;
use crate::knowledge::{KnowledgeError, KnowledgeStore};
use crate::sampler::{CardSampler, PoolMode, SampleError};
use crate::spread::SpreadSelector;
use crate::synth::{clean_reply, prepare_question, reading_messages, QuestionError};
use ollama::Ollama;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Why a reading did not complete.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid question: {0}")]
    Question(#[from] QuestionError),

    #[error("Engine is busy")]
    Busy,

    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Sampling error: {0}")]
    Sample(#[from] SampleError),

    #[error("Generation error: {0}")]
    Generation(#[from] ollama::Error),
}

impl EngineError {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Question(QuestionError::Empty) => "empty_question",
            EngineError::Question(QuestionError::TooLong { .. }) => "question_too_long",
            EngineError::Busy => "busy",
            EngineError::Knowledge(_) => "knowledge",
            EngineError::Sample(_) => "sample",
            EngineError::Generation(_) => "generation",
        }
    }
}

/// The outcome of one `divinate` call.
///
/// Either complete, with every reading field set and no failure message, or
/// failed, with only the failure message set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DivinationResult {
    pub is_complete: bool,
    pub failure_message: Option<String>,
    pub spread: Option<String>,
    /// Drawn card keys in position order.
    pub cards: Vec<String>,
    pub reversed: Vec<bool>,
    pub elements: BTreeSet<String>,
    pub court_correspondences: BTreeSet<String>,
    pub zodiacs: BTreeSet<String>,
    pub modalities: BTreeSet<String>,
    /// The cleaned reading, one sentence per entry.
    pub sentences: Vec<String>,
    pub summary: Option<String>,
    pub completion_message: Option<String>,
    pub knowledge: Option<KnowledgeBundle>,
}

impl DivinationResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            failure_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Holds the busy flag for the lifetime of a reading.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    /// Take the flag, or `None` if someone else holds it.
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs readings against a knowledge store and a text generator.
pub struct DivinationEngine {
    store: KnowledgeStore,
    generator: RwLock<Arc<dyn TextGenerator>>,
    config: TarotConfig,
    sampler: CardSampler,
    selector: SpreadSelector,
    busy: AtomicBool,
}

impl DivinationEngine {
    /// Create an engine. Fails if the default spread is not in the store.
    pub fn new(
        store: KnowledgeStore,
        generator: Arc<dyn TextGenerator>,
        config: TarotConfig,
    ) -> Result<Self, EngineError> {
        store.snapshot().spread(&config.default_spread)?;

        Ok(Self {
            store,
            generator: RwLock::new(generator),
            selector: SpreadSelector::from_config(&config),
            sampler: CardSampler::new(),
            config,
            busy: AtomicBool::new(false),
        })
    }

    /// Load the dataset and connect to the configured service.
    pub async fn from_config(config: TarotConfig) -> Result<Self, EngineError> {
        let store = KnowledgeStore::load(&config.paths.data).await?;
        let client = Ollama::new(&config.service.host)?.with_model(&config.service.model);
        Self::new(store, Arc::new(client), config)
    }

    /// Run one reading.
    ///
    /// Never fails: every problem becomes a result carrying the matching
    /// user-facing message.
    pub async fn divinate(
        &self,
        question: &str,
        astrology: bool,
        pool: PoolMode,
    ) -> DivinationResult {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            tracing::info!("Reading rejected, engine busy");
            return DivinationResult::failure(self.failure_message(&EngineError::Busy));
        };

        match self.run(question, astrology, pool).await {
            Ok(result) => result,
            Err(e) => {
                match &e {
                    EngineError::Question(_) => {
                        tracing::info!(kind = e.kind(), error = %e, "Question rejected")
                    }
                    _ => tracing::error!(kind = e.kind(), error = %e, "Reading failed"),
                }
                DivinationResult::failure(self.failure_message(&e))
            }
        }
    }

    async fn run(
        &self,
        question: &str,
        astrology: bool,
        pool: PoolMode,
    ) -> Result<DivinationResult, EngineError> {
        let question = prepare_question(question, self.config.limits.max_question_length)?;

        // One snapshot and one client for the whole reading.
        let dataset = self.store.snapshot();
        let generator = self.generator();

        let spread_key = self
            .selector
            .select(generator.as_ref(), &dataset, &question)
            .await?;
        let spread = dataset.spread(&spread_key)?;

        let draw = self
            .sampler
            .draw(dataset.cards.keys(), pool, spread.card_count())?;
        tracing::info!(
            spread = %spread_key,
            %pool,
            cards = ?draw.cards,
            reversed = ?draw.reversed,
            "Drew cards"
        );

        let aggregation =
            KnowledgeAggregator::new(&dataset, astrology).aggregate(&spread_key, &draw)?;
        let knowledge = aggregation.bundle(&dataset, &spread_key, &draw)?;

        let messages = reading_messages(&self.config.prompts, &question, astrology, &aggregation);
        let reply = generator.generate(messages).await?;
        let sentences = clean_reply(&reply, &self.config.filler_phrases);
        tracing::debug!(
            generator = generator.name(),
            sentences = sentences.len(),
            "Reading generated"
        );

        Ok(DivinationResult {
            is_complete: true,
            failure_message: None,
            spread: Some(spread_key),
            cards: draw.cards,
            reversed: draw.reversed,
            elements: aggregation.elements,
            court_correspondences: aggregation.court_correspondences,
            zodiacs: aggregation.zodiacs,
            modalities: aggregation.modalities,
            sentences,
            summary: Some(aggregation.summary),
            completion_message: Some(self.config.messages.complete()),
            knowledge: Some(knowledge),
        })
    }

    fn failure_message(&self, error: &EngineError) -> String {
        let messages = &self.config.messages;
        match error {
            EngineError::Question(QuestionError::Empty) => messages.empty(),
            EngineError::Question(QuestionError::TooLong { .. }) => messages.too_long(),
            EngineError::Busy => messages.busy(),
            _ => messages.failure(),
        }
    }

    /// Re-read the dataset from disk. Readings already running keep the old one.
    pub async fn reload_knowledge(&self) -> Result<(), KnowledgeError> {
        self.store.reload().await?;
        if self.store.snapshot().spread(&self.config.default_spread).is_err() {
            tracing::warn!(
                spread = %self.config.default_spread,
                "Default spread missing from reloaded knowledge base"
            );
        }
        Ok(())
    }

    /// Swap the text generator used by subsequent readings.
    pub fn replace_generator(&self, generator: Arc<dyn TextGenerator>) {
        tracing::info!(generator = generator.name(), "Replacing text generator");
        *self.generator.write().unwrap_or_else(PoisonError::into_inner) = generator;
    }

    fn generator(&self) -> Arc<dyn TextGenerator> {
        self.generator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn config(&self) -> &TarotConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_store, ScriptedGenerator};

    #[test]
    fn test_busy_guard_is_exclusive_and_resets() {
        let flag = AtomicBool::new(false);
        {
            let guard = BusyGuard::acquire(&flag);
            assert!(guard.is_some());
            assert!(flag.load(Ordering::SeqCst));
            assert!(BusyGuard::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::SeqCst));
        assert!(BusyGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_unknown_default_spread_is_rejected() {
        let config = TarotConfig {
            default_spread: "Pentagram".to_string(),
            ..Default::default()
        };
        let result = DivinationEngine::new(
            sample_store(),
            Arc::new(ScriptedGenerator::default()),
            config,
        );
        assert!(matches!(
            result,
            Err(EngineError::Knowledge(KnowledgeError::KeyNotFound { .. }))
        ));
    }

    #[test]
    fn test_failure_messages_by_kind() {
        let config = TarotConfig {
            messages: crate::config::MessagesConfig {
                busy: vec!["busy".to_string()],
                empty: vec!["empty".to_string()],
                too_long: vec!["long".to_string()],
                failure: vec!["failed".to_string()],
                complete: vec!["done".to_string()],
            },
            ..Default::default()
        };
        let engine = DivinationEngine::new(
            sample_store(),
            Arc::new(ScriptedGenerator::default()),
            config,
        )
        .unwrap();

        assert_eq!(engine.failure_message(&EngineError::Busy), "busy");
        assert_eq!(
            engine.failure_message(&EngineError::Question(QuestionError::Empty)),
            "empty"
        );
        assert_eq!(
            engine.failure_message(&EngineError::Question(QuestionError::TooLong {
                length: 300,
                max: 200
            })),
            "long"
        );
        assert_eq!(
            engine.failure_message(&EngineError::Generation(ollama::Error::Network(
                "down".to_string()
            ))),
            "failed"
        );
        assert_eq!(
            engine.failure_message(&EngineError::Sample(SampleError::UnknownPool(
                "x".to_string()
            ))),
            "failed"
        );
    }

    #[test]
    fn test_failure_result_has_only_the_message() {
        let result = DivinationResult::failure("nope");
        assert!(!result.is_complete);
        assert_eq!(result.failure_message.as_deref(), Some("nope"));
        assert!(result.spread.is_none());
        assert!(result.cards.is_empty());
        assert!(result.sentences.is_empty());
        assert!(result.summary.is_none());
        assert!(result.knowledge.is_none());
    }

    #[tokio::test]
    async fn test_replace_generator_applies_to_next_reading() {
        let first = Arc::new(ScriptedGenerator::default());
        let engine =
            DivinationEngine::new(sample_store(), first.clone(), TarotConfig::default()).unwrap();

        let second = Arc::new(ScriptedGenerator::new(["SingleCard", "好。"]));
        engine.replace_generator(second.clone());

        let result = engine.divinate("今天运势如何", false, PoolMode::All).await;
        assert!(result.is_complete);
        assert_eq!(result.spread.as_deref(), Some("SingleCard"));
        assert_eq!(first.call_count(), 0);
        assert_eq!(second.call_count(), 2);
    }
}
