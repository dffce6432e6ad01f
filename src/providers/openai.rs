use crate::{
    config::ProviderConfig,
    error::AnalysisError,
    models::openai::{ChatCompletionRequest, ChatCompletionResponse},
};
use reqwest::Client;

/// Upper bound on the response body echoed back in upstream errors
pub const ERROR_BODY_EXCERPT_BYTES: usize = 512;

/// Call an OpenAI-compatible Chat Completions API and decode the reply.
///
/// The body is read incrementally and abandoned once it exceeds
/// `config.max_response_bytes`. Deadlines are the caller's concern.
pub async fn chat_completions(
    client: &Client,
    config: &ProviderConfig,
    request: &ChatCompletionRequest,
) -> Result<ChatCompletionResponse, AnalysisError> {
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("Content-Type", "application/json")
        .json(request)
        .send()
        .await?;

    let status = response.status();
    let limit = config.max_response_bytes;

    if !status.is_success() {
        let (body, _) = read_body_capped(response, ERROR_BODY_EXCERPT_BYTES).await?;
        let text = String::from_utf8_lossy(&body);
        return Err(AnalysisError::Upstream {
            status,
            body: truncate_on_char_boundary(&text, ERROR_BODY_EXCERPT_BYTES).to_string(),
        });
    }

    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(AnalysisError::ResponseTooLarge { limit });
    }

    let (body, truncated) = read_body_capped(response, limit).await?;
    if truncated {
        return Err(AnalysisError::ResponseTooLarge { limit });
    }

    serde_json::from_slice(&body)
        .map_err(|e| AnalysisError::NoContent(format!("malformed response body: {}", e)))
}

/// Read at most `cap` bytes of the body. The flag is set when more data
/// was available than the cap allowed.
async fn read_body_capped(
    mut response: reqwest::Response,
    cap: usize,
) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut body = Vec::new();

    while let Some(chunk) = response.chunk().await? {
        let remaining = cap - body.len();
        if chunk.len() > remaining {
            body.extend_from_slice(&chunk[..remaining]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }

    Ok((body, false))
}

/// Cut `text` to at most `max_bytes` without splitting a UTF-8 sequence
pub fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }

    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
