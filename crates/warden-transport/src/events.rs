//! Inbound event model for the messaging bridge.
//!
//! Mirrors the bridge's JSON wire shapes: a message body is a bag of
//! optional fields (text, captioned media, wrappers), and the normalizer
//! in warden-core is the single place that collapses them into one
//! canonical record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    ConnectionUpdate { update: ConnectionUpdate },
    MessagesUpsert { messages: Vec<RawMessage> },
    MessagesUpdate { updates: Vec<RawMessage> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionUpdate {
    QrCode { code: String },
    Open,
    Close {
        #[serde(default)]
        logged_out: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub content: Option<MessageBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageKey {
    pub id: String,
    /// Conversation jid; groups carry the `@g.us` suffix.
    pub remote_jid: String,
    /// Set in group chats; direct chats identify the sender by `remote_jid`.
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub from_me: bool,
}

impl MessageKey {
    pub fn sender(&self) -> &str {
        self.participant.as_deref().unwrap_or(&self.remote_jid)
    }

    pub fn is_group(&self) -> bool {
        self.remote_jid.ends_with("@g.us")
    }
}

/// One inbound message body. Several fields may be populated at once;
/// extraction precedence lives in the normalizer, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text: Option<ExtendedText>,
    #[serde(default)]
    pub image: Option<MediaPayload>,
    #[serde(default)]
    pub video: Option<MediaPayload>,
    #[serde(default)]
    pub document: Option<MediaPayload>,
    #[serde(default)]
    pub audio: Option<MediaPayload>,
    #[serde(default)]
    pub view_once: Option<Box<MessageBody>>,
    #[serde(default)]
    pub ephemeral: Option<Box<MessageBody>>,
    #[serde(default)]
    pub protocol: Option<ProtocolNotice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedText {
    pub text: String,
    #[serde(default)]
    pub context: Option<MessageContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContext {
    #[serde(default)]
    pub quoted: Option<Box<MessageBody>>,
    #[serde(default)]
    pub mentioned_jids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Opaque handle the bridge uses to fetch the attachment bytes.
    pub media_ref: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

/// Protocol-level notifications. Type 0 is a message revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolNotice {
    pub notice_type: i64,
    pub key: MessageKey,
}

pub const PROTOCOL_REVOKE: i64 = 0;

impl ProtocolNotice {
    pub fn is_revoke(&self) -> bool {
        self.notice_type == PROTOCOL_REVOKE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Document,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }

    /// Categorize a stored MIME type for re-sending; anything that is not
    /// image or video goes out as a document.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image") {
            Self::Image
        } else if mime.starts_with("video") {
            Self::Video
        } else {
            Self::Document
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Announcement-only groups restrict sending to admins.
    #[serde(default)]
    pub announce: bool,
    #[serde(default)]
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub jid: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAction {
    Promote,
    Demote,
    Remove,
}

impl ParticipantAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::Demote => "demote",
            Self::Remove => "remove",
        }
    }
}
