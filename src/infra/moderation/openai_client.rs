// OpenAI HTTP client for the moderation and chat-completion endpoints.
//
// Makes exactly one request per call; retries live in the core
// `ModerationClient`.

use crate::core::moderation::{
    ChatMessage, CompletionProvider, ContentPart, ModerationProvider, ProviderError, ScoreMap,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODERATION_MODEL: &str = "omni-moderation-latest";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    moderation_model: String,
    chat_model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: Option<String>,
        base_url: String,
        moderation_model: String,
        chat_model: String,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            moderation_model,
            chat_model,
        }
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Value, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::InvalidResponse("missing API key".to_string()))?;

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%status, body = %body, "OpenAI request rejected");
            return Err(ProviderError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Request body for `/moderations`.
pub fn moderation_payload(model: &str, parts: &[ContentPart]) -> Value {
    let input: Vec<Value> = parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "type": "text", "text": text }),
            ContentPart::Image(url) => json!({ "type": "image_url", "image_url": { "url": url } }),
        })
        .collect();
    json!({ "model": model, "input": input })
}

/// `results[0].category_scores` as a score map.
pub fn parse_category_scores(body: &Value) -> Result<ScoreMap, ProviderError> {
    let scores = body["results"][0]["category_scores"]
        .as_object()
        .ok_or_else(|| ProviderError::InvalidResponse("missing category_scores".to_string()))?;

    Ok(scores
        .iter()
        .filter_map(|(category, score)| score.as_f64().map(|s| (category.clone(), s)))
        .collect())
}

/// Request body for `/chat/completions`.
pub fn chat_payload(model: &str, messages: &[ChatMessage]) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| json!({ "role": m.role, "content": m.content }))
        .collect();
    json!({ "model": model, "messages": messages })
}

/// `choices[0].message.content`.
pub fn parse_completion(body: &Value) -> Result<String, ProviderError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ProviderError::InvalidResponse("missing completion content".to_string()))
}

#[async_trait]
impl ModerationProvider for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn moderate(&self, parts: &[ContentPart]) -> Result<ScoreMap, ProviderError> {
        let body = self
            .post("moderations", &moderation_payload(&self.moderation_model, parts))
            .await?;
        parse_category_scores(&body)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn chat_complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let body = self
            .post("chat/completions", &chat_payload(&self.chat_model, messages))
            .await?;
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderation_payload_uses_typed_input_parts() {
        let payload = moderation_payload(
            "omni-moderation-latest",
            &[
                ContentPart::Text("hello".into()),
                ContentPart::Image("https://cdn/a.png".into()),
            ],
        );
        assert_eq!(
            payload,
            json!({
                "model": "omni-moderation-latest",
                "input": [
                    { "type": "text", "text": "hello" },
                    { "type": "image_url", "image_url": { "url": "https://cdn/a.png" } }
                ]
            })
        );
    }

    #[test]
    fn category_scores_are_read_from_first_result() {
        let body = json!({
            "id": "modr-1",
            "results": [{
                "flagged": true,
                "category_scores": { "harassment": 0.82, "hate/threatening": 0.01 }
            }]
        });
        let scores = parse_category_scores(&body).unwrap();
        assert_eq!(scores.get("harassment"), Some(&0.82));
        assert_eq!(scores.get("hate/threatening"), Some(&0.01));
    }

    #[test]
    fn malformed_moderation_body_is_invalid_response() {
        assert!(matches!(
            parse_category_scores(&json!({ "results": [] })),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn completion_content_is_extracted() {
        let body = json!({ "choices": [{ "message": { "role": "assistant", "content": " Hello \n" } }] });
        assert_eq!(parse_completion(&body).unwrap(), "Hello");
        assert!(parse_completion(&json!({})).is_err());
    }

    #[test]
    fn blank_api_key_means_unconfigured() {
        let client = OpenAiClient::new(
            Some("  ".into()),
            DEFAULT_BASE_URL.into(),
            DEFAULT_MODERATION_MODEL.into(),
            DEFAULT_CHAT_MODEL.into(),
        );
        assert!(!client.is_configured());
    }
}
