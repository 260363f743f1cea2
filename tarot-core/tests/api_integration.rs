//! Integration tests that call a real Ollama server.
//!
//! These tests require OLLAMA_HOST to be set (via .env file or environment),
//! and optionally OLLAMA_MODEL.
//! Run with: `cargo test -p tarot-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid:
//! - Test failures when no server is running
//! - Slow test runs (generation takes seconds)

use std::sync::Arc;
use tarot_core::testing::sample_store;
use tarot_core::{DivinationEngine, PoolMode, SpreadSelector, TarotConfig, TextGenerator};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if a server is configured
fn has_host() -> bool {
    std::env::var("OLLAMA_HOST").is_ok()
}

#[tokio::test]
#[ignore] // Run with: cargo test -p tarot-core --test api_integration -- --ignored
async fn test_spread_selection_with_real_model() {
    setup();
    if !has_host() {
        eprintln!("Skipping test: OLLAMA_HOST not set");
        return;
    }

    let client = ollama::Ollama::from_env().expect("Failed to create client");
    let store = sample_store();
    let selector = SpreadSelector::new(
        TarotConfig::default().prompts.spread_instruction,
        "ThreeCard",
    );

    let key = selector
        .select(&client, &store.snapshot(), "我想全面了解今年的运势")
        .await
        .expect("Spread selection should succeed");

    println!("Selected spread: {key}");
    assert!(store.snapshot().spreads.contains(&key));
}

#[tokio::test]
#[ignore]
async fn test_full_reading_with_real_model() {
    setup();
    if !has_host() {
        eprintln!("Skipping test: OLLAMA_HOST not set");
        return;
    }

    let client = ollama::Ollama::from_env().expect("Failed to create client");
    println!("Using model: {}", client.name());
    let engine = DivinationEngine::new(sample_store(), Arc::new(client), TarotConfig::default())
        .expect("Failed to create engine");

    let result = engine
        .divinate("What does my recurring dream mean?", true, PoolMode::MajorOnly)
        .await;

    println!("Summary: {:?}", result.summary);
    for sentence in &result.sentences {
        println!("{sentence}");
    }

    assert!(result.is_complete, "failure: {:?}", result.failure_message);
    assert!(!result.sentences.is_empty());
    assert!(result
        .sentences
        .iter()
        .all(|s| !s.trim().is_empty() && !s.contains('\n')));
}
