//! Message normalization: the single boundary that collapses the bridge's
//! heterogeneous message shapes into one canonical record.

use std::sync::Arc;
use tracing::warn;
use warden_media::MediaResolver;
use warden_storage::StoredMessage;
use warden_transport::{MediaKind, MediaPayload, MessageBody, RawMessage, Transport};

#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub from_me: bool,
    pub timestamp: i64,
    pub text: String,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub is_view_once: bool,
    /// The raw attachment descriptor, kept for handlers that need the
    /// bytes themselves (sticker conversion, save-to-owner).
    pub attachment: Option<Attachment>,
    /// Quoted message body from an extended-text reply, if any.
    pub quoted: Option<MessageBody>,
    pub mentioned_jids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: MediaKind,
    pub payload: MediaPayload,
}

impl NormalizedMessage {
    pub fn is_group(&self) -> bool {
        self.chat_id.ends_with("@g.us")
    }

    /// Persistence keeps exactly the messages that carried non-empty text
    /// or a resolved media URL.
    pub fn should_persist(&self) -> bool {
        !self.text.trim().is_empty() || self.media_url.is_some()
    }

    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage {
            message_id: self.message_id.clone(),
            chat_id: self.chat_id.clone(),
            sender_id: self.sender_id.clone(),
            timestamp: self.timestamp,
            text: self.text.clone(),
            media_url: self.media_url.clone(),
            mime_type: self.mime_type.clone(),
            is_view_once: self.is_view_once,
        }
    }
}

/// Unwrap transport envelopes: view-once first (flagged), then ephemeral.
/// Either may be absent; the nested combination applies both in that order.
pub fn unwrap_wrappers(body: &MessageBody) -> (&MessageBody, bool) {
    let mut current = body;
    let mut is_view_once = false;
    if let Some(inner) = &current.view_once {
        is_view_once = true;
        current = inner;
    }
    if let Some(inner) = &current.ephemeral {
        current = inner;
    }
    (current, is_view_once)
}

/// Text extraction precedence: conversation, extended text, image caption,
/// video caption. First non-empty match wins; never concatenated.
pub fn extract_text(body: &MessageBody) -> String {
    if let Some(text) = &body.conversation {
        if !text.is_empty() {
            return text.clone();
        }
    }
    if let Some(extended) = &body.extended_text {
        if !extended.text.is_empty() {
            return extended.text.clone();
        }
    }
    if let Some(caption) = body.image.as_ref().and_then(|m| m.caption.as_ref()) {
        if !caption.is_empty() {
            return caption.clone();
        }
    }
    if let Some(caption) = body.video.as_ref().and_then(|m| m.caption.as_ref()) {
        if !caption.is_empty() {
            return caption.clone();
        }
    }
    String::new()
}

/// One attachment per message is expected; when several are structurally
/// present the pick order image > video > document > audio is the defined
/// tie-break, not an error.
pub fn pick_attachment(body: &MessageBody) -> Option<(MediaKind, &MediaPayload)> {
    if let Some(media) = &body.image {
        return Some((MediaKind::Image, media));
    }
    if let Some(media) = &body.video {
        return Some((MediaKind::Video, media));
    }
    if let Some(media) = &body.document {
        return Some((MediaKind::Document, media));
    }
    if let Some(media) = &body.audio {
        return Some((MediaKind::Audio, media));
    }
    None
}

pub struct Normalizer {
    transport: Arc<dyn Transport>,
    resolver: Arc<MediaResolver>,
}

impl Normalizer {
    pub fn new(transport: Arc<dyn Transport>, resolver: Arc<MediaResolver>) -> Self {
        Self {
            transport,
            resolver,
        }
    }

    /// Produce the canonical record, or `None` for events with no message
    /// payload (including protocol notifications, which take the
    /// restoration path instead).
    pub async fn normalize(&self, raw: &RawMessage) -> Option<NormalizedMessage> {
        let body = raw.content.as_ref()?;
        if body.protocol.is_some() {
            return None;
        }

        let (inner, is_view_once) = unwrap_wrappers(body);
        let text = extract_text(inner);
        let attachment = pick_attachment(inner);

        let mut media_url = None;
        let mut mime_type = None;
        if let Some((_, payload)) = attachment {
            mime_type = payload.mime_type.clone();
            match self.resolver.resolve(self.transport.as_ref(), payload).await {
                Ok(resolved) => {
                    mime_type = Some(resolved.mime_type);
                    media_url = Some(resolved.url);
                }
                Err(err) => {
                    // Ingestion continues without a durable copy.
                    warn!(message_id = %raw.key.id, "media resolution failed: {}", err);
                }
            }
        }

        let context = inner
            .extended_text
            .as_ref()
            .and_then(|extended| extended.context.as_ref());
        let quoted = context
            .and_then(|ctx| ctx.quoted.as_ref())
            .map(|boxed| (**boxed).clone());
        let mentioned_jids = context
            .map(|ctx| ctx.mentioned_jids.clone())
            .unwrap_or_default();

        Some(NormalizedMessage {
            message_id: raw.key.id.clone(),
            chat_id: raw.key.remote_jid.clone(),
            sender_id: raw.key.sender().to_string(),
            from_me: raw.key.from_me,
            timestamp: raw
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            text,
            media_url,
            mime_type,
            is_view_once,
            attachment: attachment.map(|(kind, payload)| Attachment {
                kind,
                payload: payload.clone(),
            }),
            quoted,
            mentioned_jids,
        })
    }
}
