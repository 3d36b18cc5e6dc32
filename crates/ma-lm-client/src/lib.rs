//! LM Client (spec §4.4): HTTP client to an inference endpoint.
//!
//! Grounded on `csa-memory/src/llm_client.rs`'s `ApiClient` — same
//! `reqwest::Client` + `bearer_auth` + `.json(...)` shape, generalized to
//! a single `call` entry point that takes an explicit deadline rather than
//! rotating across a configured model list.

use ma_core::AppError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct LmCallResult {
    pub content: String,
    pub duration_ms: u64,
}

pub struct LmClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl LmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// `call(model, messages[], temperature, timeout)` -> `{content, duration_ms}`.
    /// Cancellation is caller-driven: `timeout` bounds this single call, it
    /// does not retry or rotate models — that policy lives in the Persona
    /// Request Executor (§4.6), one layer up.
    pub async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        timeout: Duration,
    ) -> Result<LmCallResult, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });

        let started = Instant::now();
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(AppError::TransportError(e.to_string())),
            Err(_) => return Err(AppError::TransportTimeout(timeout.as_millis() as u64)),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            warn!(status, model, "LM call returned non-success status");
            return Err(AppError::TransportError(format!("status {status}: {text}")));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::TransportError(e.to_string()))?;
        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(LmCallResult {
            content,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = LmClient::new("https://inference.example.com/", "key");
        assert_eq!(client.base_url, "https://inference.example.com");
    }
}
