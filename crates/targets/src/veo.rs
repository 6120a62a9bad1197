//! Video generation adapter (long-running operation).

use async_trait::async_trait;
use mediagen_core::schema::StructuredRequest;

use crate::{
    parse_json, AdapterError, GeneratedOutput, OperationStatus, StartOutcome, TargetAdapter,
};

/// Adapter for the `veo` video generation target.
///
/// Submits a `predictLongRunning` request and reports the returned
/// operation name as the poll handle.
#[derive(Debug)]
pub struct VeoAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl VeoAdapter {
    pub fn new(client: reqwest::Client, base_url: String, model: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            model,
            api_key,
        }
    }
}

/// Map validated payload fields onto the wire request.
///
/// The payload uses snake_case field names from the schema registry; the
/// wire wants camelCase split across `instances` and `parameters`.
fn request_body(fields: &serde_json::Value) -> serde_json::Value {
    let mut instance = serde_json::Map::new();
    if let Some(prompt) = fields.get("prompt") {
        instance.insert("prompt".into(), prompt.clone());
    }
    if let Some(image) = fields.get("image") {
        // Restored media objects carry {uri, mime_type}; pass through a
        // bare locator string unchanged.
        let wire_image = match image.as_object() {
            Some(obj) => serde_json::json!({
                "gcsUri": obj.get("uri").cloned().unwrap_or_default(),
                "mimeType": obj.get("mime_type").cloned().unwrap_or_default(),
            }),
            None => serde_json::json!({"gcsUri": image}),
        };
        instance.insert("image".into(), wire_image);
    }

    let mut parameters = serde_json::Map::new();
    for (ours, theirs) in [
        ("duration_seconds", "durationSeconds"),
        ("aspect_ratio", "aspectRatio"),
        ("resolution", "resolution"),
        ("sample_count", "sampleCount"),
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

/// Interpret a long-running-operation record.
fn parse_operation(value: &serde_json::Value) -> OperationStatus {
    let done = value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    let error = value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string);
    let data = value.get("response").cloned();
    OperationStatus { done, error, data }
}

#[async_trait]
impl TargetAdapter for VeoAdapter {
    fn target(&self) -> &'static str {
        "veo"
    }

    async fn start(&self, request: &StructuredRequest) -> Result<StartOutcome, AdapterError> {
        let body = request_body(&request.fields);
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:predictLongRunning",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Request(e.to_string()))?;
        let value = parse_json(response).await?;

        let handle = value
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| AdapterError::Malformed("operation record has no name".into()))?;
        tracing::info!(target = self.target(), handle, "Video operation started");
        Ok(StartOutcome::Operation {
            handle: handle.to_string(),
        })
    }

    async fn poll_status(&self, handle: &str) -> Result<OperationStatus, AdapterError> {
        let response = self
            .client
            .get(format!("{}/v1beta/{handle}", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| AdapterError::Request(e.to_string()))?;
        let value = parse_json(response).await?;
        Ok(parse_operation(&value))
    }

    fn extract_output(&self, data: &serde_json::Value) -> Result<GeneratedOutput, AdapterError> {
        let samples = data
            .pointer("/generateVideoResponse/generatedSamples")
            .and_then(|s| s.as_array())
            .ok_or_else(|| AdapterError::Malformed("no generated samples in response".into()))?;
        let uri = samples
            .first()
            .and_then(|s| s.pointer("/video/uri"))
            .and_then(|u| u.as_str())
            .ok_or_else(|| AdapterError::Malformed("generated sample has no video uri".into()))?;
        Ok(GeneratedOutput {
            uri: Some(uri.to_string()),
            text: None,
            metadata: Some(serde_json::json!({"sample_count": samples.len()})),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn request_body_maps_fields_to_wire_names() {
        let fields = serde_json::json!({
            "prompt": "a red fox running",
            "image": {"uri": "gs://media/fox.jpg", "mime_type": "image/jpeg"},
            "duration_seconds": 6,
            "aspect_ratio": "16:9",
            "sample_count": 2,
        });
        let body = request_body(&fields);
        assert_eq!(body["instances"][0]["prompt"], "a red fox running");
        assert_eq!(body["instances"][0]["image"]["gcsUri"], "gs://media/fox.jpg");
        assert_eq!(body["instances"][0]["image"]["mimeType"], "image/jpeg");
        assert_eq!(body["parameters"]["durationSeconds"], 6);
        assert_eq!(body["parameters"]["aspectRatio"], "16:9");
        assert_eq!(body["parameters"]["sampleCount"], 2);
        assert!(body["parameters"].get("negativePrompt").is_none());
    }

    #[test]
    fn bare_locator_image_still_maps() {
        let fields = serde_json::json!({"prompt": "x", "image": "gs://media/fox.jpg"});
        let body = request_body(&fields);
        assert_eq!(body["instances"][0]["image"]["gcsUri"], "gs://media/fox.jpg");
    }

    #[test]
    fn pending_operation_parses_as_not_done() {
        let status = parse_operation(&serde_json::json!({"name": "operations/abc"}));
        assert!(!status.done);
        assert!(status.error.is_none());
        assert!(status.data.is_none());
    }

    #[test]
    fn failed_operation_carries_message() {
        let status = parse_operation(&serde_json::json!({
            "name": "operations/abc",
            "done": true,
            "error": {"code": 3, "message": "prompt was blocked"},
        }));
        assert!(status.done);
        assert_eq!(status.error.as_deref(), Some("prompt was blocked"));
    }

    #[test]
    fn completed_operation_carries_response_data() {
        let status = parse_operation(&serde_json::json!({
            "done": true,
            "response": {"generateVideoResponse": {}},
        }));
        assert!(status.done);
        assert!(status.error.is_none());
        assert!(status.data.is_some());
    }

    #[test]
    fn extract_output_reads_first_sample_uri() {
        let adapter = VeoAdapter::new(
            reqwest::Client::new(),
            "https://example.invalid".into(),
            "veo-3".into(),
            "k".into(),
        );
        let data = serde_json::json!({
            "generateVideoResponse": {
                "generatedSamples": [
                    {"video": {"uri": "gs://out/clip-0.mp4"}},
                    {"video": {"uri": "gs://out/clip-1.mp4"}},
                ],
            },
        });
        let output = adapter.extract_output(&data).unwrap();
        assert_eq!(output.uri.as_deref(), Some("gs://out/clip-0.mp4"));
        assert_eq!(output.metadata.unwrap()["sample_count"], 2);
    }

    #[test]
    fn extract_output_rejects_missing_samples() {
        let adapter = VeoAdapter::new(
            reqwest::Client::new(),
            "https://example.invalid".into(),
            "veo-3".into(),
            "k".into(),
        );
        assert_matches!(
            adapter.extract_output(&serde_json::json!({})),
            Err(AdapterError::Malformed(_))
        );
    }
}
