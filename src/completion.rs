//! Completion service abstraction.
//!
//! The tutor operations send a system prompt and a user prompt to a chat
//! model and, for question generation and grading, expect a JSON object
//! back. [`CompletionService`] is the seam; [`OpenAICompletion`] talks to
//! `POST {base_url}/chat/completions`. Replies are parsed into fixed-shape
//! structs with [`parse_json_reply`]; a reply that does not fit is a
//! [`RagError::MalformedUpstreamResponse`] and is not retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::{self, CompletionConfig};
use crate::error::{RagError, Result};

/// Shape the model is asked to reply in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run one chat completion and return the assistant message content.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        format: ResponseFormat,
        temperature: f32,
    ) -> Result<String>;
}

/// Always fails; used when no completion provider is configured.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionService for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _format: ResponseFormat,
        _temperature: f32,
    ) -> Result<String> {
        Err(RagError::CompletionServiceUnavailable(
            "completion provider is disabled".to_string(),
        ))
    }
}

pub struct OpenAICompletion {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = config::api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn request_body(
        &self,
        system: &str,
        user: &str,
        format: ResponseFormat,
        temperature: f32,
    ) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": user }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });
        if format == ResponseFormat::JsonObject {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl CompletionService for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        format: ResponseFormat,
        temperature: f32,
    ) -> Result<String> {
        let body = self.request_body(system, user, format, temperature);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::CompletionServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::CompletionServiceUnavailable(format!(
                "OpenAI API error {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::MalformedUpstreamResponse(e.to_string()))?;
        extract_message_content(&json)
    }
}

/// Pull `choices[0].message.content` out of a chat completion response.
fn extract_message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RagError::MalformedUpstreamResponse("no content found in completion response".into())
        })
}

/// Parse a model reply that was requested as a JSON object.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    serde_json::from_str(reply.trim()).map_err(|e| {
        RagError::MalformedUpstreamResponse(format!("reply does not match expected shape: {}", e))
    })
}

pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => Err(RagError::Configuration(format!(
            "unknown completion provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Reply {
        answer: String,
    }

    #[test]
    fn extracts_first_choice() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
        });
        assert_eq!(extract_message_content(&json).unwrap(), "hello");
    }

    #[test]
    fn missing_choices_is_malformed() {
        let err = extract_message_content(&serde_json::json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, RagError::MalformedUpstreamResponse(_)));
    }

    #[test]
    fn json_reply_parses_into_struct() {
        let reply: Reply = parse_json_reply("  {\"answer\": \"42\"}\n").unwrap();
        assert_eq!(reply.answer, "42");
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let err = parse_json_reply::<Reply>("{\"other\": 1}").unwrap_err();
        assert!(matches!(err, RagError::MalformedUpstreamResponse(_)));
    }

    #[test]
    fn json_format_sets_response_format() {
        let svc = OpenAICompletion {
            client: reqwest::Client::new(),
            api_key: "k".into(),
            base_url: "http://localhost".into(),
            model: "gpt-4o".into(),
        };
        assert_eq!(svc.model_name(), "gpt-4o");
        let body = svc.request_body("sys", "user", ResponseFormat::JsonObject, 0.3);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);

        let body = svc.request_body("", "user", ResponseFormat::Text, 0.0);
        assert!(body.get("response_format").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn disabled_provider_is_created_without_key() {
        let config = CompletionConfig {
            provider: "disabled".to_string(),
            ..CompletionConfig::default()
        };
        let svc = create_completion(&config).unwrap();
        assert_eq!(svc.model_name(), "disabled");
    }

    #[tokio::test]
    async fn disabled_completion_errors() {
        let err = DisabledCompletion
            .complete("s", "u", ResponseFormat::Text, 0.0)
            .await
            .unwrap_err();
        assert!(err.is_upstream_error());
    }
}
