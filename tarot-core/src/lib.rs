//! Tarot reading engine with an AI reader.
//!
//! This crate provides:
//! - A typed, reloadable tarot knowledge base
//! - Spread selection and card drawing
//! - Knowledge aggregation and reading generation through an Ollama model
//! - A single-flight divination engine
//! - Concurrent composition of the drawn spread onto a canvas
//!
//! # Quick Start
//!
//! ```ignore
//! use tarot_core::{DivinationEngine, ImageComposer, PoolMode, TarotConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TarotConfig::load("tarot.toml").await?;
//!     let engine = DivinationEngine::from_config(config.clone()).await?;
//!
//!     let result = engine
//!         .divinate("What does my recurring dream mean?", false, PoolMode::All)
//!         .await;
//!     for sentence in &result.sentences {
//!         println!("{sentence}");
//!     }
//!
//!     if let Some(knowledge) = &result.knowledge {
//!         let image = ImageComposer::from_paths(&config.paths)
//!             .compose_reading(config.paths.canvas_path(), knowledge)
//!             .await?;
//!         image.save("reading.png")?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod compose;
pub mod config;
pub mod engine;
pub mod generator;
pub mod knowledge;
pub mod sampler;
pub mod spread;
pub mod synth;
pub mod testing;

// Primary public API
pub use aggregate::{Aggregation, KnowledgeAggregator, KnowledgeBundle, ZODIAC_KEYS};
pub use compose::{ComposeError, ImageComposer};
pub use config::{ConfigError, TarotConfig};
pub use engine::{DivinationEngine, DivinationResult, EngineError};
pub use generator::TextGenerator;
pub use knowledge::{Dataset, KnowledgeError, KnowledgeStore};
pub use sampler::{CardSampler, Draw, PoolMode, SampleError};
pub use spread::SpreadSelector;
pub use synth::QuestionError;
pub use testing::{FailingGenerator, GatedGenerator, ScriptedGenerator};
