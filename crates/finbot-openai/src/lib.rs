//! OpenAI adapter (transaction classification).
//!
//! Implements the core `Classifier` port over the `chat/completions`
//! endpoint. One HTTP call per classification, no retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use finbot_core::{
    classifier::{build_prompt, local_today, parse_record, Classifier, SYSTEM_PROMPT},
    config::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL},
    domain::ClassifiedRecord,
    errors::{ClassifyError, Error},
    Result,
};

/// Longest slice of an error body kept in `ClassifyError::BadStatus`.
const MAX_ERROR_BODY: usize = 500;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiClassifier {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
    today: fn() -> NaiveDate,
}

impl std::fmt::Debug for OpenAiClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClassifier")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiClassifier {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("reqwest client build: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            http,
            today: local_today,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at another OpenAI-compatible server (or a test double).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the clock used for the prompt's date anchors.
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, text: &str) -> std::result::Result<ClassifiedRecord, ClassifyError> {
        let today = (self.today)();
        let prompt = build_prompt(text, today);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassifyError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| ClassifyError::Network(e.to_string()))?;
        let envelope: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| ClassifyError::MalformedEnvelope(e.to_string()))?;

        let content = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ClassifyError::EmptyChoices)?;
        debug!(model = %self.model, chars = content.len(), "classifier replied");

        parse_record(&content, today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finbot_core::domain::{Category, TransactionKind};
    use mockito::Matcher;
    use rust_decimal_macros::dec;

    fn fixed_today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn classifier(server: &mockito::ServerGuard) -> OpenAiClassifier {
        OpenAiClassifier::new("sk-test", Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url())
            .with_today(fixed_today)
    }

    fn envelope(content: &str) -> String {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn classifies_lunch_expense() {
        let mut server = mockito::Server::new_async().await;
        let content = r#"{"tipo":"despesa","valor":25,"descricao":"almoço","data":"14/03/2025","categoria":"alimentação","retorno":"📉 R$25 no almoço"}"#;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(serde_json::json!({ "model": "gpt-3.5-turbo" })),
                Matcher::Regex(r#""role":"system""#.to_string()),
                Matcher::Regex(r#""role":"user""#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(envelope(content))
            .create_async()
            .await;

        let record = classifier(&server)
            .classify("Paguei o almoço hoje, foi 25 reais.")
            .await
            .unwrap();

        assert_eq!(record.kind, TransactionKind::Expense);
        assert_eq!(record.amount, dec!(25));
        assert_eq!(record.category, Category::Food);
        assert_eq!(record.occurred_on, fixed_today());
        assert_eq!(record.user_facing_summary, "📉 R$25 no almoço");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn prompt_includes_message_and_anchors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("uber 30".to_string()),
                Matcher::Regex("14/03/2025".to_string()),
                Matcher::Regex("07/03/2025".to_string()),
            ]))
            .with_status(200)
            .with_body(envelope(
                r#"{"tipo":"despesa","valor":30,"descricao":"uber","categoria":"transporte","retorno":"ok"}"#,
            ))
            .create_async()
            .await;

        classifier(&server).classify("uber 30").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
            .create_async()
            .await;

        let err = classifier(&server).classify("x").await.unwrap_err();
        match err {
            ClassifyError::BadStatus { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("Rate limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        assert_eq!(
            classifier(&server).classify("x").await.unwrap_err(),
            ClassifyError::EmptyChoices
        );
    }

    #[tokio::test]
    async fn broken_envelope_is_malformed_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        assert!(matches!(
            classifier(&server).classify("x").await,
            Err(ClassifyError::MalformedEnvelope(_))
        ));
    }

    #[tokio::test]
    async fn non_json_content_is_malformed_payload() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(envelope("Desculpe, não entendi."))
            .create_async()
            .await;

        assert!(matches!(
            classifier(&server).classify("x").await,
            Err(ClassifyError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        // Nothing listens on port 9 (discard) in test environments.
        let c = OpenAiClassifier::new("sk-test", Duration::from_secs(2))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        assert!(matches!(
            c.classify("x").await,
            Err(ClassifyError::Network(_))
        ));
    }
}
