//! Minimal Ollama chat API client.
//!
//! This crate provides a focused client for the `/api/chat` endpoint of an
//! Ollama-compatible server:
//! - Non-streaming chat completions
//! - System, user and assistant turns
//! - Host normalization (`host:port` without a scheme is accepted)

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama3.2-vision:latest";

/// Errors that can occur when using the Ollama client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Ollama API client.
#[derive(Clone)]
pub struct Ollama {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl Ollama {
    /// Create a new client talking to the given host.
    ///
    /// The host may be a full URL (`http://localhost:11434`) or a bare
    /// `host:port` pair, in which case `http://` is assumed.
    pub fn new(host: impl AsRef<str>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            host: normalize_host(host.as_ref())?,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Create a client for a local server on the default port.
    pub fn local() -> Result<Self, Error> {
        Self::new(DEFAULT_HOST)
    }

    /// Create a client from the OLLAMA_HOST (and optional OLLAMA_MODEL)
    /// environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let host = std::env::var("OLLAMA_HOST")
            .map_err(|_| Error::Config("OLLAMA_HOST not set".to_string()))?;
        let client = Self::new(host)?;
        Ok(match std::env::var("OLLAMA_MODEL") {
            Ok(model) if !model.is_empty() => client.with_model(model),
            _ => client,
        })
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The normalized base URL requests are sent to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The default model for requests that do not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a chat request and return the full response.
    pub async fn chat(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(&request);

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .headers(build_headers())
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(parse_response(api_response))
    }

    fn build_api_request(&self, request: &Request) -> ApiRequest {
        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            options: request.temperature.map(|temperature| ApiOptions { temperature }),
        }
    }
}

fn build_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn normalize_host(host: &str) -> Result<String, Error> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(Error::Config("Empty host".to_string()));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        Ok(host.to_string())
    } else {
        Ok(format!("http://{host}"))
    }
}

fn parse_response(api_response: ApiResponse) -> Response {
    Response {
        model: api_response.model,
        content: api_response.message.content,
        done: api_response.done,
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A turn in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system turn.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    /// Create a user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A chat response.
#[derive(Debug, Clone)]
pub struct Response {
    pub model: String,
    pub content: String,
    pub done: bool,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    message: ApiMessage,
    #[serde(default)]
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Ollama::local().unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.host(), DEFAULT_HOST);
    }

    #[test]
    fn test_client_with_model() {
        let client = Ollama::local().unwrap().with_model("llama3.1:latest");
        assert_eq!(client.model(), "llama3.1:latest");
    }

    #[test]
    fn test_host_normalization() {
        let client = Ollama::new("192.168.0.106:11434").unwrap();
        assert_eq!(client.host(), "http://192.168.0.106:11434");

        let client = Ollama::new("https://example.com/").unwrap();
        assert_eq!(client.host(), "https://example.com");

        assert!(matches!(Ollama::new("  "), Err(Error::Config(_))));
    }

    #[test]
    fn test_request_serialization() {
        let client = Ollama::local().unwrap();
        let request = Request::new(vec![
            Message::system("You are a tarot reader"),
            Message::user("Hello"),
            Message::assistant(""),
        ])
        .with_temperature(0.5);

        let json = serde_json::to_value(client.build_api_request(&request)).unwrap();
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hello");
        assert_eq!(json["messages"][2]["role"], "assistant");
        assert_eq!(json["options"]["temperature"], 0.5);
    }

    #[test]
    fn test_request_model_override() {
        let client = Ollama::local().unwrap();
        let request = Request::new(vec![Message::user("Hi")]).with_model("qwen2.5");
        let json = serde_json::to_value(client.build_api_request(&request)).unwrap();
        assert_eq!(json["model"], "qwen2.5");
        assert!(json.get("options").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "model": "llama3.2",
            "created_at": "2024-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "Three of Cups"},
            "done": true
        }"#;
        let api: ApiResponse = serde_json::from_str(body).unwrap();
        let response = parse_response(api);
        assert_eq!(response.content, "Three of Cups");
        assert!(response.done);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = Ollama::new("http://127.0.0.1:1").unwrap();
        let result = client.chat(Request::new(vec![Message::user("Hi")])).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }
}
