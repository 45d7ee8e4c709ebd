// Moderation client - wraps the external moderation and chat-completion APIs.
//
// The provider traits are the ports; `ModerationClient` owns the retry policy:
// HTTP error responses degrade to an empty score map, transport failures are
// surfaced to the caller once retries run out.

use super::moderation_models::ScoreMap;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub const MAX_ATTEMPTS: u32 = 5;
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Spacing between per-image classification calls.
pub const IMAGE_SPACING: Duration = Duration::from_secs(1);
/// Annotation used when retries ran out without a usable HTTP status.
pub const MAX_RETRIES_CODE: &str = "max_retries";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ClassificationError {
    #[error("Moderation request failed after {attempts} attempts: {last_error}")]
    TransportExhausted { attempts: u32, last_error: String },

    #[error("A moderation request may carry at most one image")]
    TooManyImages,
}

// ============================================================================
// PORTS
// ============================================================================

/// One piece of content sent to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image(String),
}

/// A chat-completion message (system/user/assistant).
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ModerationProvider: Send + Sync {
    /// Whether a credential is available. Without one the pipeline is inactive.
    fn is_configured(&self) -> bool;

    /// Perform a single classification request (no retries).
    async fn moderate(&self, parts: &[ContentPart]) -> Result<ScoreMap, ProviderError>;
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform a single chat completion and return the reply text.
    async fn chat_complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

// ============================================================================
// CLIENT
// ============================================================================

/// Scores for one request, plus an annotation when the API kept failing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationOutcome {
    pub scores: ScoreMap,
    /// Last HTTP status, or `max_retries`, when the scores are empty because
    /// every attempt failed.
    pub error_code: Option<String>,
}

pub struct ModerationClient<P> {
    provider: P,
    max_attempts: u32,
    base_delay: Duration,
    image_spacing: Duration,
}

impl<P: ModerationProvider + CompletionProvider> ModerationClient<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_RETRY_DELAY,
            image_spacing: IMAGE_SPACING,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    /// Classify text and at most one image in a single request, retrying with
    /// a linear backoff (`base_delay * attempt`).
    pub async fn classify(
        &self,
        parts: &[ContentPart],
    ) -> Result<ClassificationOutcome, ClassificationError> {
        let images = parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Image(_)))
            .count();
        if images > 1 {
            return Err(ClassificationError::TooManyImages);
        }

        let mut last_failure = None;
        for attempt in 1..=self.max_attempts {
            match self.provider.moderate(parts).await {
                Ok(scores) => {
                    return Ok(ClassificationOutcome {
                        scores,
                        error_code: None,
                    })
                }
                Err(err) => {
                    tracing::warn!(attempt, max = self.max_attempts, "Moderation request failed: {err}");
                    last_failure = Some(err);
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.base_delay * attempt).await;
            }
        }

        match last_failure {
            Some(ProviderError::Transport(last_error)) => {
                tracing::error!("Moderation transport failed after {} attempts", self.max_attempts);
                Err(ClassificationError::TransportExhausted {
                    attempts: self.max_attempts,
                    last_error,
                })
            }
            Some(ProviderError::Status(code)) => Ok(ClassificationOutcome {
                scores: ScoreMap::new(),
                error_code: Some(code.to_string()),
            }),
            _ => Ok(ClassificationOutcome {
                scores: ScoreMap::new(),
                error_code: Some(MAX_RETRIES_CODE.to_string()),
            }),
        }
    }

    /// Classify each image in its own request, sequentially, spaced by
    /// `IMAGE_SPACING`. Results keep the input order.
    pub async fn classify_images(
        &self,
        urls: &[String],
    ) -> Result<Vec<(String, ClassificationOutcome)>, ClassificationError> {
        let mut results = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.image_spacing).await;
            }
            let outcome = self.classify(&[ContentPart::Image(url.clone())]).await?;
            results.push((url.clone(), outcome));
        }
        Ok(results)
    }

    /// Translate `text` into `language` with the companion completion model.
    pub async fn translate(&self, text: &str, language: &str) -> Result<String, ProviderError> {
        let messages = [
            ChatMessage::system(format!(
                "You are a translator for a moderation team. Translate the user's message into {language}. \
                 If it is already in {language}, repeat it unchanged. Reply with the translation only."
            )),
            ChatMessage::user(text),
        ];
        self.provider.chat_complete(&messages).await
    }

    /// Ask the companion model why `text` received these scores.
    pub async fn explain(&self, text: &str, scores: &ScoreMap) -> Result<String, ProviderError> {
        let score_lines = scores
            .iter()
            .map(|(category, score)| format!("{category}: {:.0}%", score * 100.0))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = [
            ChatMessage::system(
                "You explain automated content-moderation results to server staff. \
                 Given a message and its category scores, explain briefly which parts of the \
                 message most likely drove the highest scores. Be concise and neutral.",
            ),
            ChatMessage::user(format!("Message:\n{text}\n\nScores:\n{score_lines}")),
        ];
        self.provider.chat_complete(&messages).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;
    use crate::core::moderation::moderation_models::test_support::scores;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn persistent_server_errors_make_five_attempts_then_degrade() {
        let client = ModerationClient::new(ScriptedProvider::always(Err(ProviderError::Status(500))));
        let started = Instant::now();

        let outcome = client
            .classify(&[ContentPart::Text("hello".into())])
            .await
            .unwrap();

        assert_eq!(client.provider.call_count(), 5);
        assert!(outcome.scores.is_empty());
        assert_eq!(outcome.error_code.as_deref(), Some("500"));
        // 2 + 4 + 6 + 8 seconds of backoff between the five attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_propagate_after_retries() {
        let client = ModerationClient::new(ScriptedProvider::always(Err(ProviderError::Transport(
            "connection reset".into(),
        ))));

        let err = client
            .classify(&[ContentPart::Text("hello".into())])
            .await
            .unwrap_err();

        assert_eq!(client.provider.call_count(), 5);
        assert!(matches!(err, ClassificationError::TransportExhausted { attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_responses_degrade_with_max_retries_code() {
        let client = ModerationClient::new(ScriptedProvider::always(Err(
            ProviderError::InvalidResponse("no results".into()),
        )));
        let outcome = client.classify(&[ContentPart::Text("x".into())]).await.unwrap();
        assert_eq!(outcome.error_code.as_deref(), Some(MAX_RETRIES_CODE));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_retry_succeeds() {
        let provider = ScriptedProvider::new(
            vec![Err(ProviderError::Status(429))],
            Ok(scores(&[("hate", 0.4)])),
        );
        let client = ModerationClient::new(provider);
        let started = Instant::now();

        let outcome = client.classify(&[ContentPart::Text("x".into())]).await.unwrap();

        assert_eq!(outcome.scores, scores(&[("hate", 0.4)]));
        assert!(outcome.error_code.is_none());
        assert_eq!(client.provider.call_count(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn rejects_more_than_one_image_per_request() {
        let client = ModerationClient::new(ScriptedProvider::always(Ok(ScoreMap::new())));
        let err = client
            .classify(&[
                ContentPart::Image("https://a/1.png".into()),
                ContentPart::Image("https://a/2.png".into()),
            ])
            .await
            .unwrap_err();
        assert_eq!(err, ClassificationError::TooManyImages);
        assert_eq!(client.provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn images_are_classified_one_per_call_with_spacing() {
        let provider = ScriptedProvider::new(
            vec![Ok(scores(&[("violence", 0.9)])), Ok(scores(&[("violence", 0.05)]))],
            Ok(ScoreMap::new()),
        );
        let client = ModerationClient::new(provider);
        let urls = vec!["https://a/1.png".to_string(), "https://a/2.png".to_string()];
        let started = Instant::now();

        let results = client.classify_images(&urls).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, urls[0]);
        assert_eq!(results[0].1.scores, scores(&[("violence", 0.9)]));
        assert_eq!(started.elapsed(), Duration::from_secs(1));

        let calls = client.provider.calls.lock().unwrap();
        assert_eq!(calls[0], vec![ContentPart::Image(urls[0].clone())]);
        assert_eq!(calls[1], vec![ContentPart::Image(urls[1].clone())]);
    }

    #[tokio::test]
    async fn translate_returns_completion_text() {
        let client = ModerationClient::new(ScriptedProvider::always(Ok(ScoreMap::new())));
        assert_eq!(client.translate("hola", "English").await.unwrap(), "translated");
    }
}
