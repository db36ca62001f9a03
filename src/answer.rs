//! Answer generation capability and prompt construction.
//!
//! The [`AnswerComposer`] trait is the generation counterpart of
//! [`Embedder`](crate::embedding::Embedder): given a question and the
//! assembled context it returns answer text. Providers:
//!
//! - [`DisabledComposer`]: always fails with `GenerationFailure`.
//! - [`OpenAIComposer`]: `POST {url}/v1/chat/completions`.
//! - [`OllamaComposer`]: `POST {url}/api/chat` with `stream = false`.
//!
//! Both HTTP providers share the retry classification used for embeddings
//! (429/5xx and transport errors are retryable).

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::embedding::http_client;
use crate::error::{RagError, Result};
use crate::upstream::{retryable_status, with_retry, RetryPolicy};

/// Returned verbatim when retrieval produced no usable evidence.
pub const INSUFFICIENT_EVIDENCE: &str =
    "I don't have enough information in the indexed documents to answer that question.";

const SYSTEM_PROMPT: &str = "You answer questions using only the provided context. \
If the context does not contain the answer, say that the context is insufficient. \
Never invent facts that are not in the context.";

/// Build the user prompt sent to the generator.
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question based on the provided context. \
Use only information from the context. If the context is empty or does not \
contain the answer, say that you don't have enough information.\n\n\
Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context,
        question.trim()
    )
}

#[async_trait]
pub trait AnswerComposer: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce an answer to `question` from `context`.
    ///
    /// # Errors
    ///
    /// [`RagError::GenerationFailure`] for any provider failure.
    async fn generate(&self, question: &str, context: &str) -> Result<String>;
}

pub struct DisabledComposer;

#[async_trait]
impl AnswerComposer for DisabledComposer {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _question: &str, _context: &str) -> Result<String> {
        Err(RagError::generation(
            "Generation provider is disabled. Set [generation] provider in config.",
        ))
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    stream: bool,
    options: OllamaOptions,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: AssistantMessage,
}

fn messages<'a>(prompt: &'a str) -> Vec<ChatMessage<'a>> {
    vec![
        ChatMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        },
        ChatMessage {
            role: "user",
            content: prompt,
        },
    ]
}

/// Send `body` and decode a successful JSON response as `T`.
async fn post_json<B, T>(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: Option<&str>,
    body: &B,
    provider: &str,
) -> Result<T>
where
    B: Serialize + Sync,
    T: DeserializeOwned,
{
    let mut request = client.post(endpoint).json(body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request.send().await.map_err(|e| RagError::GenerationFailure {
        message: format!("{} connection error: {}", provider, e),
        retryable: true,
    })?;

    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(RagError::GenerationFailure {
            message: format!("{} returned {}: {}", provider, status, text),
            retryable: retryable_status(status.as_u16()),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| RagError::generation(format!("failed to parse {} response: {}", provider, e)))
}

pub struct OpenAIComposer {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

impl OpenAIComposer {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            client: http_client(config.timeout())?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry: config.retry_policy(),
        })
    }
}

#[async_trait]
impl AnswerComposer for OpenAIComposer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let prompt = build_prompt(question, context);
        let body = OpenAIChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: messages(&prompt),
        };
        let endpoint = format!("{}/v1/chat/completions", self.url);

        let parsed: OpenAIChatResponse = with_retry("OpenAI chat", &self.retry, || {
            post_json(&self.client, &endpoint, Some(&self.api_key), &body, "OpenAI")
        })
        .await?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| RagError::generation("OpenAI response contained no choices"))
    }
}

pub struct OllamaComposer {
    client: reqwest::Client,
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

impl OllamaComposer {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config.timeout())?,
            model,
            url: url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry: config.retry_policy(),
        })
    }
}

#[async_trait]
impl AnswerComposer for OllamaComposer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let prompt = build_prompt(question, context);
        let body = OllamaChatRequest {
            model: &self.model,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
            messages: messages(&prompt),
        };
        let endpoint = format!("{}/api/chat", self.url);

        let parsed: OllamaChatResponse = with_retry("Ollama chat", &self.retry, || {
            post_json(&self.client, &endpoint, None, &body, "Ollama")
        })
        .await?;

        Ok(parsed.message.content.trim().to_string())
    }
}

pub fn create_composer(config: &GenerationConfig) -> anyhow::Result<Arc<dyn AnswerComposer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledComposer)),
        "openai" => Ok(Arc::new(OpenAIComposer::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaComposer::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_context_and_question() {
        let prompt = build_prompt("  What is self-attention? ", "alpha\n---\nbeta");
        assert!(prompt.starts_with("Answer the question based on the provided context."));
        assert!(prompt.contains("Context:\nalpha\n---\nbeta\n"));
        assert!(prompt.contains("Question: What is self-attention?\n"));
        assert!(prompt.ends_with("Answer:"));
        assert!(prompt.contains("don't have enough information"));
    }

    #[tokio::test]
    async fn test_disabled_composer_fails() {
        let err = DisabledComposer.generate("q", "c").await.unwrap_err();
        assert!(matches!(err, RagError::GenerationFailure { retryable: false, .. }));
    }

    #[test]
    fn test_ollama_request_shape() {
        let prompt = build_prompt("q", "c");
        let body = OllamaChatRequest {
            model: "llama3",
            stream: false,
            options: OllamaOptions {
                temperature: 0.1,
                num_predict: 500,
            },
            messages: messages(&prompt),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 500);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[test]
    fn test_openai_response_parse() {
        let parsed: OpenAIChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":" hi "}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content, " hi ");
    }

    #[test]
    fn test_create_composer() {
        assert_eq!(
            create_composer(&GenerationConfig::default())
                .unwrap()
                .model_name(),
            "disabled"
        );
        let config = GenerationConfig {
            provider: "ollama".into(),
            model: Some("llama3".into()),
            ..GenerationConfig::default()
        };
        assert_eq!(create_composer(&config).unwrap().model_name(), "llama3");
        let config = GenerationConfig {
            provider: "ollama".into(),
            ..GenerationConfig::default()
        };
        assert!(create_composer(&config).is_err());
        let config = GenerationConfig {
            provider: "mystery".into(),
            ..GenerationConfig::default()
        };
        assert!(create_composer(&config).is_err());
    }
}
