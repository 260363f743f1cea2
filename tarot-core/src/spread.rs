//! Spread selection.
//!
//! Asks the generator which of the known spreads fits a question, using a
//! single system + user exchange, and validates the answer against the
//! dataset.

use crate::config::TarotConfig;
use crate::generator::TextGenerator;
use crate::knowledge::Dataset;
use ollama::Message;

/// Picks a spread for a question.
#[derive(Debug, Clone)]
pub struct SpreadSelector {
    instruction: String,
    default_spread: String,
}

impl SpreadSelector {
    pub fn new(instruction: impl Into<String>, default_spread: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            default_spread: default_spread.into(),
        }
    }

    pub fn from_config(config: &TarotConfig) -> Self {
        Self::new(
            config.prompts.spread_instruction.clone(),
            config.default_spread.clone(),
        )
    }

    pub fn default_spread(&self) -> &str {
        &self.default_spread
    }

    /// Ask the generator for a spread and return its key.
    ///
    /// A reply naming no known spread falls back to the default; a failed
    /// call is an error, not a fallback.
    pub async fn select(
        &self,
        generator: &dyn TextGenerator,
        dataset: &Dataset,
        question: &str,
    ) -> Result<String, ollama::Error> {
        let reply = generator.generate(self.messages(dataset, question)).await?;
        Ok(self.resolve(dataset, &reply))
    }

    /// The classification request.
    pub fn messages(&self, dataset: &Dataset, question: &str) -> Vec<Message> {
        let mut system = format!("{}可选的牌阵有:", self.instruction);
        for (key, spread) in dataset.spreads.iter() {
            system.push_str(&format!(
                "\n{key}: [\"{}\", \"{}\"]",
                spread.name, spread.description
            ));
        }
        vec![Message::system(system), Message::user(question)]
    }

    /// Map a raw reply onto a known spread key.
    pub fn resolve(&self, dataset: &Dataset, reply: &str) -> String {
        let candidate: String = reply.chars().filter(char::is_ascii_alphanumeric).collect();
        if dataset.spreads.contains(&candidate) {
            tracing::info!(spread = %candidate, "Selected spread");
            candidate
        } else {
            tracing::warn!(
                reply = %reply,
                fallback = %self.default_spread,
                "Reply names no known spread, using default"
            );
            self.default_spread.clone()
        }
    }
}
