//! Text-generation backend abstraction.

use async_trait::async_trait;
use ollama::{Message, Ollama, Request};

/// Anything that can turn a list of chat turns into a reply.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send the turns and return the reply text.
    async fn generate(&self, messages: Vec<Message>) -> Result<String, ollama::Error>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl TextGenerator for Ollama {
    async fn generate(&self, messages: Vec<Message>) -> Result<String, ollama::Error> {
        let response = self.chat(Request::new(messages)).await?;
        Ok(response.content)
    }

    fn name(&self) -> &str {
        self.model()
    }
}
