//! Still-image generation adapter (synchronous).

use async_trait::async_trait;
use mediagen_core::schema::StructuredRequest;

use crate::{
    parse_json, AdapterError, GeneratedOutput, OperationStatus, StartOutcome, TargetAdapter,
};

/// Adapter for the `imagen` image generation target.
///
/// The predict endpoint answers with the finished images in the same
/// response, so `start` returns [`StartOutcome::Completed`] and polling
/// is never involved.
#[derive(Debug)]
pub struct ImagenAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ImagenAdapter {
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
    if let Some(prompt) = fields.get("prompt") {
        instance.insert("prompt".into(), prompt.clone());
    }

    let mut parameters = serde_json::Map::new();
    for (ours, theirs) in [
        ("sample_count", "sampleCount"),
        ("aspect_ratio", "aspectRatio"),
        ("negative_prompt", "negativePrompt"),
    ] {
        if let Some(value) = fields.get(ours) {
            parameters.insert(theirs.into(), value.clone());
        }
    }

    serde_json::json!({
        "instances": [instance],
        "parameters": parameters,
    })
}

#[async_trait]
impl TargetAdapter for ImagenAdapter {
    fn target(&self) -> &'static str {
        "imagen"
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
        tracing::info!(target = self.target(), "Image generation completed");
        Ok(StartOutcome::Completed(value))
    }

    async fn poll_status(&self, _handle: &str) -> Result<OperationStatus, AdapterError> {
        Err(AdapterError::Unsupported(
            "imagen completes synchronously and is never polled",
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
        Ok(GeneratedOutput {
            uri,
            text: None,
            metadata: Some(serde_json::json!({"sample_count": predictions.len()})),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_maps_parameters() {
        let fields = serde_json::json!({
            "prompt": "a lighthouse at dusk",
            "sample_count": 3,
            "aspect_ratio": "4:3",
            "negative_prompt": "fog",
        });
        let body = request_body(&fields);
        assert_eq!(body["instances"][0]["prompt"], "a lighthouse at dusk");
        assert_eq!(body["parameters"]["sampleCount"], 3);
        assert_eq!(body["parameters"]["aspectRatio"], "4:3");
        assert_eq!(body["parameters"]["negativePrompt"], "fog");
    }

    #[test]
    fn extract_output_prefers_stored_uri() {
        let adapter = ImagenAdapter::new(
            reqwest::Client::new(),
            "https://example.invalid".into(),
            "imagen-4".into(),
            "k".into(),
        );
        let data = serde_json::json!({
            "predictions": [
                {"gcsUri": "gs://out/image-0.png", "mimeType": "image/png"},
                {"gcsUri": "gs://out/image-1.png", "mimeType": "image/png"},
            ],
        });
        let output = adapter.extract_output(&data).unwrap();
        assert_eq!(output.uri.as_deref(), Some("gs://out/image-0.png"));
        assert_eq!(output.metadata.unwrap()["sample_count"], 2);
    }

    #[test]
    fn extract_output_tolerates_inline_only_predictions() {
        let adapter = ImagenAdapter::new(
            reqwest::Client::new(),
            "https://example.invalid".into(),
            "imagen-4".into(),
            "k".into(),
        );
        let data = serde_json::json!({
            "predictions": [{"bytesBase64Encoded": "aGk=", "mimeType": "image/png"}],
        });
        let output = adapter.extract_output(&data).unwrap();
        assert!(output.uri.is_none());
    }
}
