//! Warden Media
//!
//! Attachment resolution: download bytes through the transport, then hand
//! them to a blob sink for a durable URL. Sinks are interchangeable; the
//! resolver tries them in order (primary first, fallback on any failure)
//! with exactly one attempt each.

use anyhow::{anyhow, Result};
use base64::Engine as _;
use rand::Rng as _;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use warden_config::{BucketConfig, CloudinaryConfig};
use warden_transport::{MediaPayload, Transport};

pub const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub url: String,
    pub mime_type: String,
}

#[async_trait::async_trait]
pub trait BlobSink: Send + Sync {
    fn name(&self) -> &str;

    /// One upload attempt; returns a durable URL. No retries here.
    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<String>;
}

/// Storage key for sinks that need one: current time plus a short random
/// suffix to avoid collisions.
pub fn generate_key() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("media/{}_{}", millis, suffix)
}

/// Unsigned Cloudinary upload: the payload travels as a base64 data URI.
pub struct CloudinarySink {
    client: Client,
    cloud_name: String,
    upload_preset: String,
}

impl CloudinarySink {
    pub fn new(config: &CloudinaryConfig) -> Self {
        Self {
            client: Client::new(),
            cloud_name: config.cloud_name.clone(),
            upload_preset: config.upload_preset.clone(),
        }
    }
}

#[async_trait::async_trait]
impl BlobSink for CloudinarySink {
    fn name(&self) -> &str {
        "cloudinary"
    }

    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        #[derive(Debug, Deserialize)]
        struct UploadResponse {
            secure_url: String,
        }

        let url = format!(
            "https://api.cloudinary.com/v1_1/{}/auto/upload",
            self.cloud_name
        );
        let data_uri = format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        );

        let resp = self
            .client
            .post(&url)
            .form(&[
                ("file", data_uri.as_str()),
                ("upload_preset", self.upload_preset.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("cloudinary upload HTTP {}: {}", status, body));
        }

        let parsed: UploadResponse = resp.json().await?;
        Ok(parsed.secure_url)
    }
}

/// S3-compatible bucket endpoint: PUT raw bytes under a generated key.
pub struct BucketSink {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl BucketSink {
    pub fn new(config: &BucketConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        }
    }
}

#[async_trait::async_trait]
impl BlobSink for BucketSink {
    fn name(&self) -> &str {
        "bucket"
    }

    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        let key = generate_key();
        let url = format!("{}/{}", self.base_url, key);

        let mut request = self
            .client
            .put(&url)
            .header("Content-Type", mime_type)
            .body(bytes.to_vec());
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("bucket upload HTTP {}: {}", status, body));
        }

        Ok(url)
    }
}

pub struct MediaResolver {
    sinks: Vec<Arc<dyn BlobSink>>,
}

impl MediaResolver {
    /// Sinks in attempt order; `fallback` may be absent.
    pub fn new(primary: Arc<dyn BlobSink>, fallback: Option<Arc<dyn BlobSink>>) -> Self {
        let mut sinks = vec![primary];
        sinks.extend(fallback);
        Self { sinks }
    }

    /// A resolver with no sink configured; every attachment resolves to an
    /// error and messages persist without a media URL.
    pub fn disabled() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Fetch the attachment's bytes and obtain a durable URL. Failure here
    /// must not abort ingestion; callers log and continue without media.
    pub async fn resolve(
        &self,
        transport: &dyn Transport,
        media: &MediaPayload,
    ) -> Result<ResolvedMedia> {
        if self.sinks.is_empty() {
            return Err(anyhow!("no blob sink configured"));
        }

        let bytes = transport
            .download_media(media)
            .await
            .map_err(|e| anyhow!("media download failed: {}", e))?;
        let mime_type = media.mime_type.as_deref().unwrap_or(FALLBACK_MIME);

        let mut last_err = None;
        for sink in &self.sinks {
            match sink.upload(&bytes, mime_type).await {
                Ok(url) => {
                    return Ok(ResolvedMedia {
                        url,
                        mime_type: mime_type.to_string(),
                    })
                }
                Err(err) => {
                    warn!(sink = sink.name(), "blob upload failed: {}", err);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("no blob sink accepted the upload")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use warden_transport::{
        GroupMetadata, LoginMethod, OutboundPayload, ParticipantAction, TransportError,
    };

    struct StubTransport;

    #[async_trait::async_trait]
    impl Transport for StubTransport {
        async fn start_session(
            &self,
            _phone_number: &str,
            _method: LoginMethod,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_message(
            &self,
            _chat_id: &str,
            _payload: OutboundPayload,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn group_metadata(&self, _chat_id: &str) -> Result<GroupMetadata, TransportError> {
            Err(TransportError::Rejected("not a group".to_string()))
        }

        async fn group_participants_update(
            &self,
            _chat_id: &str,
            _members: &[String],
            _action: ParticipantAction,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn download_media(&self, _media: &MediaPayload) -> Result<Vec<u8>, TransportError> {
            Ok(b"bytes".to_vec())
        }

        async fn request_pairing_code(
            &self,
            _phone_number: &str,
        ) -> Result<String, TransportError> {
            Ok("CODE".to_string())
        }
    }

    struct RecordingSink {
        name: &'static str,
        fail: bool,
        seen_mimes: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                seen_mimes: Mutex::new(Vec::new()),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                fail: true,
                seen_mimes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl BlobSink for RecordingSink {
        fn name(&self) -> &str {
            self.name
        }

        async fn upload(&self, _bytes: &[u8], mime_type: &str) -> Result<String> {
            self.seen_mimes
                .lock()
                .expect("lock")
                .push(mime_type.to_string());
            if self.fail {
                Err(anyhow!("sink down"))
            } else {
                Ok(format!("https://{}.example/object", self.name))
            }
        }
    }

    fn payload(mime: Option<&str>) -> MediaPayload {
        MediaPayload {
            media_ref: "ref-1".to_string(),
            mime_type: mime.map(|m| m.to_string()),
            caption: None,
            file_name: None,
            file_size: None,
        }
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let primary = Arc::new(RecordingSink::ok("primary"));
        let fallback = Arc::new(RecordingSink::ok("fallback"));
        let resolver = MediaResolver::new(primary.clone(), Some(fallback.clone()));

        let resolved = resolver
            .resolve(&StubTransport, &payload(Some("image/jpeg")))
            .await
            .expect("resolve");

        assert_eq!(resolved.url, "https://primary.example/object");
        assert_eq!(resolved.mime_type, "image/jpeg");
        assert!(fallback.seen_mimes.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn primary_failure_falls_back_once() {
        let primary = Arc::new(RecordingSink::failing("primary"));
        let fallback = Arc::new(RecordingSink::ok("fallback"));
        let resolver = MediaResolver::new(primary.clone(), Some(fallback.clone()));

        let resolved = resolver
            .resolve(&StubTransport, &payload(None))
            .await
            .expect("resolve");

        assert_eq!(resolved.url, "https://fallback.example/object");
        assert_eq!(resolved.mime_type, FALLBACK_MIME);
        assert_eq!(primary.seen_mimes.lock().expect("lock").len(), 1);
        assert_eq!(fallback.seen_mimes.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn both_sinks_failing_surfaces_error() {
        let resolver = MediaResolver::new(
            Arc::new(RecordingSink::failing("primary")),
            Some(Arc::new(RecordingSink::failing("fallback"))),
        );

        assert!(resolver
            .resolve(&StubTransport, &payload(Some("video/mp4")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn disabled_resolver_always_errors() {
        let resolver = MediaResolver::disabled();
        assert!(resolver
            .resolve(&StubTransport, &payload(None))
            .await
            .is_err());
    }

    #[test]
    fn generated_keys_are_prefixed_and_unique() {
        let a = generate_key();
        let b = generate_key();
        assert!(a.starts_with("media/"));
        assert_ne!(a, b);
    }
}
