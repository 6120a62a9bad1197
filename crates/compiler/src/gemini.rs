//! REST client for a Gemini-style `generateContent` endpoint.
//!
//! The only production [`ReasoningService`] implementation. Wire details
//! stay inside this module; the rest of the compiler sees text in, text
//! out.

use async_trait::async_trait;
use serde::Deserialize;

use crate::runner::{DecodingConfig, ReasoningService, ServiceError};

/// HTTP client for one reasoning model.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    /// Create a client for one model.
    ///
    /// * `base_url` - e.g. `https://generativelanguage.googleapis.com`.
    /// * `model`    - e.g. `gemini-2.0-flash`.
    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            api_key,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        model: String,
        api_key: String,
    ) -> Self {
        Self {
            client,
            base_url,
            model,
            api_key,
        }
    }

    /// Flatten the first candidate's parts into one string. A response
    /// with no candidates yields an empty string; the runner turns that
    /// into `EmptyResponse`.
    fn candidate_text(response: GenerateResponse) -> String {
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    async fn generate(
        &self,
        system_instruction: &str,
        content: &str,
        config: &DecodingConfig,
        response_schema: Option<&serde_json::Value>,
    ) -> Result<String, ServiceError> {
        let mut generation_config = serde_json::json!({
            "temperature": config.temperature,
            "topP": config.top_p,
            "topK": config.top_k,
        });
        if let Some(schema) = response_schema {
            generation_config["responseMimeType"] = serde_json::json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }

        let body = serde_json::json!({
            "systemInstruction": {"parts": [{"text": system_instruction}]},
            "contents": [{"role": "user", "parts": [{"text": content}]}],
            "generationConfig": generation_config,
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ServiceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        Ok(Self::candidate_text(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": "hello "}, {"text": "world"}]}},
                {"content": {"parts": [{"text": "ignored second candidate"}]}},
            ],
        }))
        .unwrap();
        assert_eq!(GeminiClient::candidate_text(response), "hello world");
    }

    #[test]
    fn missing_candidates_yield_empty_text() {
        let response: GenerateResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert_eq!(GeminiClient::candidate_text(response), "");

        let response: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(GeminiClient::candidate_text(response), "");
    }
}
