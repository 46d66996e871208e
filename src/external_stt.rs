//! Remote transcription collaborator.
//!
//! Whispered audio that the platform recognizer could not handle is shipped
//! to an external HTTP service: a POST of `{audio, language}` (audio as
//! base64 little-endian f32 samples) answered by `{transcript}`. The
//! endpoint is a collaborator, not part of this crate's contract beyond
//! "non-2xx or timeout fails with `Service`/`Network`".

use crate::config::ExternalSttConfig;
use crate::error::{Result, VoiceError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Request body sent to the transcription endpoint.
#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    /// Base64-encoded little-endian f32 samples.
    audio: String,
    /// Full locale tag.
    language: &'a str,
}

/// Response body from the transcription endpoint.
#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    transcript: String,
}

/// HTTP client for the out-of-band transcription service.
pub struct RemoteTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteTranscriber {
    /// Build a client from config; `None` when no endpoint is configured.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the HTTP client cannot be constructed.
    pub fn from_config(config: &ExternalSttConfig) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| VoiceError::Config(format!("http client: {e}")))?;
        info!("remote transcription enabled: {endpoint}");
        Ok(Some(Self { client, endpoint }))
    }

    /// Transcribe raw audio samples.
    ///
    /// # Errors
    ///
    /// `Network` when the endpoint is unreachable or times out, `Service`
    /// on a non-2xx response or an unparseable body.
    pub async fn transcribe(&self, samples: &[f32], language: &str) -> Result<String> {
        let body = TranscribeRequest {
            audio: encode_samples(samples),
            language,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VoiceError::Network(format!("transcription request timed out: {e}"))
                } else {
                    VoiceError::Network(format!("transcription request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Service(format!(
                "transcription endpoint returned {status}: {detail}"
            )));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Service(format!("bad transcription response: {e}")))?;
        debug!(
            "remote transcription returned {} chars",
            parsed.transcript.len()
        );
        Ok(parsed.transcript)
    }
}

/// Encode samples as base64 over little-endian f32 bytes.
fn encode_samples(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    BASE64.encode(bytes)
}
