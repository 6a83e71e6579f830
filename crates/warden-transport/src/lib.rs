//! Warden Transport
//!
//! Messaging-client boundary: inbound event model, the `Transport` trait the
//! core dispatches against, connection-state signals, and the HTTP bridge
//! client that speaks to the sidecar platform process.

pub mod bridge;
pub mod events;

pub use events::{
    ConnectionUpdate, ExtendedText, GroupMetadata, GroupParticipant, MediaKind, MediaPayload,
    MessageBody, MessageContext, MessageKey, ParticipantAction, ProtocolNotice, RawMessage,
    TransportEvent, PROTOCOL_REVOKE,
};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bridge request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bridge HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("bridge response decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("bridge rejected operation: {0}")]
    Rejected(String),

    #[error("session logged out")]
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    QrCode,
    PairingCode,
}

impl std::str::FromStr for LoginMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qr" | "qr-code" | "qr_code" => Ok(Self::QrCode),
            "pairing" | "pairing-code" | "pairing_code" => Ok(Self::PairingCode),
            other => Err(format!("unknown login method '{other}'")),
        }
    }
}

/// Connection-state signals the session re-emits for the operator surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    QrCodeReady(String),
    PairingCodeReady(String),
    Connected,
    LoggedOut,
}

pub const SIGNAL_BUS_CAPACITY: usize = 64;

/// Broadcast fan-out for connection signals.
#[derive(Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<ConnectionSignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.sender.subscribe()
    }

    pub fn publish(&self, signal: ConnectionSignal) {
        // Nobody listening is fine; signals are advisory.
        let _ = self.sender.send(signal);
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One outbound send. Raw bytes travel base64-encoded over the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPayload {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<String>,
    },
    MediaUrl {
        kind: MediaKind,
        url: String,
    },
    MediaBytes {
        kind: MediaKind,
        data_base64: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    AudioUrl {
        url: String,
        mime_type: String,
        /// Push-to-talk: render as a voice note.
        ptt: bool,
    },
    Sticker {
        data_base64: String,
    },
    Contact {
        display_name: String,
        vcard: String,
    },
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            mentions: Vec::new(),
        }
    }

    pub fn text_with_mentions(text: impl Into<String>, mentions: Vec<String>) -> Self {
        Self::Text {
            text: text.into(),
            mentions,
        }
    }

    pub fn media_bytes(
        kind: MediaKind,
        bytes: &[u8],
        mime_type: Option<String>,
        file_name: Option<String>,
    ) -> Self {
        Self::MediaBytes {
            kind,
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type,
            file_name,
        }
    }

    pub fn sticker(bytes: &[u8]) -> Self {
        Self::Sticker {
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// The narrow surface the core uses to talk to the messaging platform.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Begin login for the account; QR/pairing progress arrives as
    /// `ConnectionUpdate` events on the inbound stream.
    async fn start_session(
        &self,
        phone_number: &str,
        method: LoginMethod,
    ) -> Result<(), TransportError>;

    async fn send_message(
        &self,
        chat_id: &str,
        payload: OutboundPayload,
    ) -> Result<(), TransportError>;

    async fn group_metadata(&self, chat_id: &str) -> Result<GroupMetadata, TransportError>;

    async fn group_participants_update(
        &self,
        chat_id: &str,
        members: &[String],
        action: ParticipantAction,
    ) -> Result<(), TransportError>;

    /// Fetch an attachment's bytes. Attachments are bounded; the whole
    /// buffer is returned at once.
    async fn download_media(&self, media: &MediaPayload) -> Result<Vec<u8>, TransportError>;

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError>;
}
