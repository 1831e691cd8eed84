//! Best-effort upload of capture records to the remote collection endpoint.
//!
//! The endpoint accepts a JSON POST and answers with JSON; a non-200 status
//! or an `error` field in the body means the upload was rejected. Transport
//! faults and endpoint rejections are kept apart for diagnosis but both
//! surface as a failed outcome, never as a propagated error.

use crate::config::UploadConfig;
use crate::recorder::CaptureRecord;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Why an upload failed.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("endpoint unreachable: {0}")]
    Transport(String),

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint returned an unintelligible response (HTTP {status}): {message}")]
    MalformedResponse { status: u16, message: String },

    #[error("endpoint rejected upload (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Result of one upload attempt. Reported for observability only; it never
/// affects the local record.
#[derive(Debug)]
pub enum UploadOutcome {
    /// The endpoint acknowledged the record.
    Accepted { remote_id: Option<String> },
    /// The attempt failed; the local record stands.
    Failed(UploadError),
}

impl UploadOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UploadOutcome::Accepted { .. })
    }
}

/// Wire payload for the collection endpoint. Field names are the remote
/// contract.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadPayload {
    image_base64: String,
    weight: String,
    veg_name: String,
    date_time: String,
    uploaded_at: String,
}

/// Response body of the collection endpoint.
#[derive(Debug, Default, Deserialize)]
struct RemoteResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the remote collection endpoint.
pub struct UploadClient {
    client: reqwest::Client,
    endpoint_url: String,
    request_timeout: Duration,
}

impl UploadClient {
    /// Create a new client with bounded connect and request timeouts.
    pub fn new(config: &UploadConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    fn build_payload(record: &CaptureRecord, image_data: &[u8]) -> UploadPayload {
        let stamp = record.timestamp.to_rfc3339();
        UploadPayload {
            image_base64: STANDARD.encode(image_data),
            weight: record.weight_grams.to_string(),
            veg_name: record.label.clone(),
            date_time: stamp.clone(),
            uploaded_at: stamp,
        }
    }

    /// Upload one capture record.
    ///
    /// Always returns an outcome; network faults, timeouts, and endpoint
    /// rejections are all folded into [`UploadOutcome::Failed`].
    #[instrument(skip(self, record, image_data), fields(record_id = %record.record_id))]
    pub async fn upload(&self, record: &CaptureRecord, image_data: &[u8]) -> UploadOutcome {
        let payload = Self::build_payload(record, image_data);

        let response = match self
            .client
            .post(&self.endpoint_url)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    UploadError::Timeout(self.request_timeout)
                } else {
                    UploadError::Transport(e.to_string())
                };
                warn!(error = %error, "upload transport failure");
                metrics::counter!("kiosk.uploads.transport_failed").increment(1);
                return UploadOutcome::Failed(error);
            }
        };

        let status = response.status();
        let body = match response.json::<RemoteResponse>().await {
            Ok(body) => body,
            Err(e) => {
                let error = UploadError::MalformedResponse {
                    status: status.as_u16(),
                    message: e.to_string(),
                };
                warn!(error = %error, "upload response could not be decoded");
                metrics::counter!("kiosk.uploads.transport_failed").increment(1);
                return UploadOutcome::Failed(error);
            }
        };

        let outcome = Self::interpret_response(status, body);
        match &outcome {
            UploadOutcome::Accepted { remote_id } => {
                metrics::counter!("kiosk.uploads.accepted").increment(1);
                info!(remote_id = ?remote_id, "upload accepted");
            }
            UploadOutcome::Failed(error) => {
                metrics::counter!("kiosk.uploads.rejected").increment(1);
                warn!(
                    status = status.as_u16(),
                    error = %error,
                    "endpoint rejected upload"
                );
            }
        }
        outcome
    }

    /// Map a decoded endpoint response to an outcome. A non-success status or
    /// an `error` field means rejection; the server message is carried along.
    fn interpret_response(status: reqwest::StatusCode, body: RemoteResponse) -> UploadOutcome {
        if !status.is_success() || body.error.is_some() {
            let message = body
                .error
                .or(body.message)
                .unwrap_or_else(|| "no error message supplied".to_string());
            return UploadOutcome::Failed(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        UploadOutcome::Accepted { remote_id: body.id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn test_record() -> CaptureRecord {
        CaptureRecord {
            record_id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            label: "Brinjal".to_string(),
            weight_grams: 152.5,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 45).unwrap(),
            image_path: PathBuf::from("data/captures/Brinjal_x.jpg"),
        }
    }

    fn test_config(endpoint_url: &str) -> UploadConfig {
        UploadConfig {
            endpoint_url: endpoint_url.to_string(),
            request_timeout_secs: 2,
            connect_timeout_secs: 1,
        }
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = UploadClient::build_payload(&test_record(), b"hello");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["imageBase64"], "aGVsbG8=");
        assert_eq!(json["weight"], "152.5");
        assert_eq!(json["vegName"], "Brinjal");
        assert_eq!(json["dateTime"], "2024-06-01T10:30:45+00:00");
        assert_eq!(json["uploadedAt"], json["dateTime"]);
    }

    #[test]
    fn test_response_error_field_parses() {
        let body: RemoteResponse = serde_json::from_str(r#"{"error": "db down"}"#).unwrap();
        assert_eq!(body.error.as_deref(), Some("db down"));
        assert_eq!(body.id, None);
    }

    #[test]
    fn test_server_error_becomes_rejection_with_message() {
        let body: RemoteResponse = serde_json::from_str(r#"{"error": "db down"}"#).unwrap();
        let outcome =
            UploadClient::interpret_response(reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);

        match outcome {
            UploadOutcome::Failed(UploadError::Rejected { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "db down");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_error_field_rejects_even_with_http_200() {
        let body: RemoteResponse =
            serde_json::from_str(r#"{"message": "partial", "error": "missing fields"}"#).unwrap();
        let outcome = UploadClient::interpret_response(reqwest::StatusCode::OK, body);

        assert!(matches!(
            outcome,
            UploadOutcome::Failed(UploadError::Rejected { .. })
        ));
    }

    #[test]
    fn test_success_response_carries_remote_id() {
        let body: RemoteResponse =
            serde_json::from_str(r#"{"message": "Upload successful", "id": "abc123"}"#).unwrap();
        let outcome = UploadClient::interpret_response(reqwest::StatusCode::OK, body);

        match outcome {
            UploadOutcome::Accepted { remote_id } => {
                assert_eq!(remote_id.as_deref(), Some("abc123"));
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_response_success_shape_parses() {
        let body: RemoteResponse = serde_json::from_str(
            r#"{"message": "Upload successful", "id": "abc123", "data": {"weight": "152.5"}}"#,
        )
        .unwrap();
        assert_eq!(body.id.as_deref(), Some("abc123"));
        assert_eq!(body.error, None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_returns_failure() {
        // Port 9 (discard) is closed on any sane test host.
        let client = UploadClient::new(&test_config("http://127.0.0.1:9/upload")).unwrap();

        let outcome = client.upload(&test_record(), b"image").await;
        match outcome {
            UploadOutcome::Failed(UploadError::Transport(_))
            | UploadOutcome::Failed(UploadError::Timeout(_)) => {}
            other => panic!("expected transport failure, got {other:?}"),
        }
    }
}
