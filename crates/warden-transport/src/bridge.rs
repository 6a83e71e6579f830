//! HTTP client for the local messaging bridge.
//!
//! The platform client runs as a sidecar process; this adapter long-polls it
//! for event batches, posts outbound operations, and recreates its HTTP
//! client periodically to avoid stale pooled connections.

use crate::events::{GroupMetadata, MediaPayload, ParticipantAction, TransportEvent};
use crate::{LoginMethod, OutboundPayload, Transport, TransportError};
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use warden_config::BridgeConfig;

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CLIENT_RECREATE_SECS: u64 = 600;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: T,
}

pub struct BridgeTransport {
    client: Client,
    base_url: String,
    poll_timeout_secs: u64,
    client_recreate_interval_secs: u64,
}

impl BridgeTransport {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            client: Self::build_client(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_timeout_secs: config.poll_timeout_secs.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
            client_recreate_interval_secs: config
                .client_recreate_interval_secs
                .unwrap_or(DEFAULT_CLIENT_RECREATE_SECS),
        }
    }

    fn build_client() -> Client {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(180))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ApiResponse<T> = serde_json::from_str(&body)?;
        if !parsed.ok {
            return Err(TransportError::Rejected(body));
        }
        Ok(parsed.result)
    }

    async fn get_events(&self, client: &Client) -> Result<Vec<TransportEvent>, TransportError> {
        let resp = client
            .get(self.url("/events"))
            .query(&[("timeout", self.poll_timeout_secs)])
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Long-poll the bridge and forward event batches to the session.
    /// Poll errors back off briefly and polling continues; the loop ends
    /// when the session side drops the receiver.
    pub async fn poll(&self, events: mpsc::Sender<TransportEvent>) {
        info!(base_url = %self.base_url, "bridge polling started");

        let mut client = self.client.clone();
        let mut recreate_at =
            Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);

        loop {
            if Instant::now() >= recreate_at {
                info!("recreating HTTP client to prevent stale connections");
                client = Self::build_client();
                recreate_at =
                    Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);
            }

            let batch = match self.get_events(&client).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("bridge polling error: {}", err);
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            for event in batch {
                if events.send(event).await.is_err() {
                    info!("event receiver dropped, stopping bridge poll");
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for BridgeTransport {
    async fn start_session(
        &self,
        phone_number: &str,
        method: LoginMethod,
    ) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "phone_number": phone_number,
            "method": method,
        });
        self.post_json::<serde_json::Value>("/session", &body)
            .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: &str,
        payload: OutboundPayload,
    ) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "payload": payload,
        });
        self.post_json::<serde_json::Value>("/send", &body).await?;
        Ok(())
    }

    async fn group_metadata(&self, chat_id: &str) -> Result<GroupMetadata, TransportError> {
        let resp = self
            .client
            .get(self.url(&format!("/groups/{chat_id}")))
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn group_participants_update(
        &self,
        chat_id: &str,
        members: &[String],
        action: ParticipantAction,
    ) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "members": members,
            "action": action.as_str(),
        });
        self.post_json::<serde_json::Value>(&format!("/groups/{chat_id}/participants"), &body)
            .await?;
        Ok(())
    }

    async fn download_media(&self, media: &MediaPayload) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .client
            .get(self.url("/media"))
            .query(&[("ref", media.media_ref.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError> {
        #[derive(Debug, Deserialize)]
        struct Wire {
            code: String,
        }

        let body = serde_json::json!({ "phone_number": phone_number });
        let wire: Wire = self.post_json("/pairing-code", &body).await?;
        Ok(wire.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let config = BridgeConfig {
            base_url: "http://127.0.0.1:3001/".to_string(),
            poll_timeout_secs: None,
            client_recreate_interval_secs: None,
        };
        let bridge = BridgeTransport::new(&config);
        assert_eq!(bridge.url("/send"), "http://127.0.0.1:3001/send");
    }

    #[test]
    fn api_response_rejects_ok_false() {
        let raw = r#"{"ok": false, "result": null}"#;
        let parsed: ApiResponse<serde_json::Value> = serde_json::from_str(raw).expect("decode");
        assert!(!parsed.ok);
    }
}
