//! Remote failure analysis.
//!
//! [`Analyzer`] is the seam between a session and the text-generation
//! provider; [`OpenAiAnalyzer`] is the production implementation. The
//! detached task that drives one analysis lives in [`run`].

use crate::{
    config::ProviderConfig,
    error::AnalysisError,
    models::openai::{ChatCompletionRequest, ChatMessage},
    prompt, providers,
    session::LogSession,
};
use futures::future::BoxFuture;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// System-role instruction sent with every analysis
pub const SYSTEM_INSTRUCTION: &str = "\
You are a senior backend engineer performing root-cause analysis of \
production failures. You receive the log of a single failed operation and \
possibly the source of the component that failed. Be concrete and concise.";

/// Produces an analysis for a prompt
pub trait Analyzer: Send + Sync {
    fn analyze(&self, prompt: String) -> BoxFuture<'_, Result<String, AnalysisError>>;
}

/// Analyzer backed by an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiAnalyzer {
    client: Client,
    config: ProviderConfig,
    timeout: Duration,
}

impl OpenAiAnalyzer {
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: ProviderConfig) -> Self {
        let timeout = config.timeout();
        Self {
            client,
            config,
            timeout,
        }
    }

    /// Override the end-to-end deadline taken from the config
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// One request, no retries. The whole exchange is bound to the deadline.
    pub async fn dispatch(&self, prompt: String) -> Result<String, AnalysisError> {
        if !self.config.has_credential() {
            return Err(AnalysisError::MissingCredential);
        }

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_INSTRUCTION),
                ChatMessage::user(prompt),
            ],
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
        };

        let response = tokio::time::timeout(
            self.timeout,
            providers::openai::chat_completions(&self.client, &self.config, &request),
        )
        .await
        .map_err(|_| AnalysisError::Timeout(self.timeout))??;

        response
            .first_content()
            .map(str::to_string)
            .ok_or_else(|| AnalysisError::NoContent("no choices or empty message content".to_string()))
    }
}

impl Analyzer for OpenAiAnalyzer {
    fn analyze(&self, prompt: String) -> BoxFuture<'_, Result<String, AnalysisError>> {
        Box::pin(self.dispatch(prompt))
    }
}

/// Body of the detached analysis task for one admitted session
pub(crate) async fn run(session: LogSession, analyzer: Arc<dyn Analyzer>, max_source_bytes: usize) {
    let excerpt = if session.reads_source() {
        prompt::read_source_excerpt(&session.source().file, max_source_bytes).await
    } else {
        None
    };

    let snapshot = session.snapshot();
    let prompt = prompt::build(&snapshot, excerpt.as_deref());
    let payload = prompt::strip_tag_markers(&prompt).to_string();

    let started = Instant::now();
    let result = analyzer.analyze(payload).await;
    let elapsed = started.elapsed();

    match result {
        Ok(text) => {
            crate::metrics::record_dispatch("success", elapsed);
            tracing::info!(
                session_id = %session.id(),
                source = %session.source(),
                duration_ms = elapsed.as_millis() as u64,
                "Failure analysis completed"
            );
            session.complete_analysis(&text);
        }
        Err(e) => {
            crate::metrics::record_dispatch(e.kind(), elapsed);
            tracing::warn!(
                session_id = %session.id(),
                source = %session.source(),
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "Failure analysis failed"
            );
        }
    }
}

/// Answers every prompt with the same text
#[cfg(test)]
pub(crate) struct StaticAnalyzer {
    text: String,
}

#[cfg(test)]
impl StaticAnalyzer {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[cfg(test)]
impl Analyzer for StaticAnalyzer {
    fn analyze(&self, _prompt: String) -> BoxFuture<'_, Result<String, AnalysisError>> {
        let text = self.text.clone();
        Box::pin(async move { Ok(text) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            api_key: "sk-test".to_string(),
            base_url,
            model: "gpt-4o-mini".to_string(),
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_returns_first_choice_verbatim() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("Authorization", "Bearer sk-test")
                    .body_includes("\"role\":\"system\"")
                    .body_includes("db timeout");
                then.status(200).json_body(json!({
                    "choices": [
                        {"index": 0, "message": {"role": "assistant", "content": "  root cause: pool exhausted\n"}},
                        {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
                    ]
                }));
            })
            .await;

        let analyzer = OpenAiAnalyzer::new(config(server.base_url())).unwrap();
        let text = analyzer.dispatch("db timeout".to_string()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "  root cause: pool exhausted\n");
    }

    #[tokio::test]
    async fn test_dispatch_empty_choices_is_no_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let analyzer = OpenAiAnalyzer::new(config(server.base_url())).unwrap();
        let err = analyzer.dispatch("prompt".to_string()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoContent(_)));
    }

    #[tokio::test]
    async fn test_dispatch_malformed_body_is_no_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).body("<html>gateway</html>");
            })
            .await;

        let analyzer = OpenAiAnalyzer::new(config(server.base_url())).unwrap();
        let err = analyzer.dispatch("prompt".to_string()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoContent(_)));
    }

    #[tokio::test]
    async fn test_dispatch_non_success_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body(r#"{"error": "rate limited"}"#);
            })
            .await;

        let analyzer = OpenAiAnalyzer::new(config(server.base_url())).unwrap();
        match analyzer.dispatch("prompt".to_string()).await.unwrap_err() {
            AnalysisError::Upstream { status, body } => {
                assert_eq!(status.as_u16(), 429);
                assert!(body.contains("rate limited"));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .json_body(json!({"choices": []}));
            })
            .await;

        let analyzer = OpenAiAnalyzer::new(config(server.base_url()))
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let err = analyzer.dispatch("prompt".to_string()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_dispatch_without_credential_makes_no_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200);
            })
            .await;

        let mut cfg = config(server.base_url());
        cfg.api_key.clear();
        let analyzer = OpenAiAnalyzer::new(cfg).unwrap();

        let err = analyzer.dispatch("prompt".to_string()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MissingCredential));
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let analyzer = OpenAiAnalyzer::new(config("http://127.0.0.1:1".to_string())).unwrap();
        let err = analyzer.dispatch("prompt".to_string()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Transport(_)));
    }
}
