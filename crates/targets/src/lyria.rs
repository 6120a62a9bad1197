//! Instrumental music generation adapter (synchronous).

use async_trait::async_trait;
use mediagen_core::schema::StructuredRequest;

use crate::{
    parse_json, AdapterError, GeneratedOutput, OperationStatus, StartOutcome, TargetAdapter,
};

/// Adapter for the `lyria` music generation target.
#[derive(Debug)]
pub struct LyriaAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl LyriaAdapter {
    pub fn new(client: reqwest::Client, base_url: String, model: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            model,
            api_key,
        }
    }
}

fn request_body(fields: &serde_json::Value) -> serde_json::Value {
    let mut instance = serde_json::Map::new();
    for (ours, theirs) in [
        ("prompt", "prompt"),
        ("negative_prompt", "negativePrompt"),
        ("seed", "seed"),
    ] {
        if let Some(value) = fields.get(ours) {
            instance.insert(theirs.into(), value.clone());
        }
    }

    let mut parameters = serde_json::Map::new();
    if let Some(count) = fields.get("sample_count") {
        parameters.insert("sampleCount".into(), count.clone());
    }

    serde_json::json!({
        "instances": [instance],
        "parameters": parameters,
    })
}

#[async_trait]
impl TargetAdapter for LyriaAdapter {
    fn target(&self) -> &'static str {
        "lyria"
    }

    async fn start(&self, request: &StructuredRequest) -> Result<StartOutcome, AdapterError> {
        let body = request_body(&request.fields);
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:predict",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Request(e.to_string()))?;
        let value = parse_json(response).await?;

        if value.pointer("/predictions/0").is_none() {
            return Err(AdapterError::Malformed("no predictions in response".into()));
        }
        tracing::info!(target = self.target(), "Music generation completed");
        Ok(StartOutcome::Completed(value))
    }

    async fn poll_status(&self, _handle: &str) -> Result<OperationStatus, AdapterError> {
        Err(AdapterError::Unsupported(
            "lyria completes synchronously and is never polled",
        ))
    }

    fn extract_output(&self, data: &serde_json::Value) -> Result<GeneratedOutput, AdapterError> {
        let predictions = data
            .get("predictions")
            .and_then(|p| p.as_array())
            .ok_or_else(|| AdapterError::Malformed("no predictions in response".into()))?;
        let first = predictions
            .first()
            .ok_or_else(|| AdapterError::Malformed("empty predictions array".into()))?;
        let uri = first
            .get("gcsUri")
            .and_then(|u| u.as_str())
            .map(str::to_string);
        let mime = first
            .get("mimeType")
            .and_then(|m| m.as_str())
            .unwrap_or("audio/wav");
        Ok(GeneratedOutput {
            uri,
            text: None,
            metadata: Some(serde_json::json!({
                "sample_count": predictions.len(),
                "mime_type": mime,
            })),
        })
    }
}
