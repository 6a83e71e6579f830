//! Passive per-chat monitors: anti-link scanning, announcement-mode
//! checks, and deleted-message restoration. Monitors only act in chats
//! that opted in through a stored subscription.

use crate::normalize::NormalizedMessage;
use crate::router::parse_command;
use crate::session::SessionContext;
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};
use warden_storage::SubscriptionKind;
use warden_transport::{MediaKind, MessageKey, OutboundPayload};

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https?://\S+").expect("valid url pattern"))
}

/// Scheme-prefixed URLs plus the scheme-less invite shapes people
/// actually paste into group chats.
pub fn contains_link(text: &str) -> bool {
    url_pattern().is_match(text) || text.contains("wa.me/") || text.contains("chat.whatsapp.com/")
}

/// Strip mention decoration down to a full JID. Inputs that already carry
/// a server part (mentioned jids do) pass through unchanged; bare numbers
/// are reduced to digits and given the default server suffix.
pub fn normalize_jid(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('@');
    if trimmed.contains('@') {
        return trimmed.to_string();
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@s.whatsapp.net")
}

/// Warn on links posted in subscribed groups. Commands are exempt so
/// `.antilink off` cannot trip its own monitor. The offending message
/// itself stays up; retraction needs the sender's key, which inbound
/// events do not carry.
pub async fn anti_link_scan(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    if !msg.is_group() || msg.from_me {
        return Ok(());
    }
    if parse_command(&msg.text, ctx.prefix()).is_some() {
        return Ok(());
    }
    if !contains_link(&msg.text) {
        return Ok(());
    }
    let subscribed = ctx
        .storage
        .lock()
        .await
        .has_subscription(SubscriptionKind::AntiLink, &msg.chat_id)?;
    if !subscribed {
        return Ok(());
    }

    let local = msg.sender_id.split('@').next().unwrap_or(&msg.sender_id);
    ctx.transport
        .send_message(
            &msg.chat_id,
            OutboundPayload::text_with_mentions(
                format!("🚫 @{local}, links are not allowed in this group."),
                vec![msg.sender_id.clone()],
            ),
        )
        .await?;
    Ok(())
}

/// Announcement-mode groups reject sends from non-admins. Detecting the
/// state early keeps the failure out of the send path, but there is
/// nothing to do about it beyond noting it.
pub async fn announcement_check(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    if !msg.is_group() || msg.from_me {
        return Ok(());
    }
    let meta = ctx.transport.group_metadata(&msg.chat_id).await?;
    if !meta.announce {
        return Ok(());
    }
    let bot_is_admin = meta
        .participants
        .iter()
        .any(|p| p.is_admin && p.jid == ctx.bot_jid());
    if !bot_is_admin {
        debug!(chat = %msg.chat_id, "announcement-only group, replies will be rejected");
    }
    Ok(())
}

/// Repost a revoked message from the persisted copy. Silent when the chat
/// never subscribed or the original was never captured.
pub async fn restore_deleted(ctx: &SessionContext, key: &MessageKey) -> Result<()> {
    let subscribed = ctx
        .storage
        .lock()
        .await
        .has_subscription(SubscriptionKind::AntiDelete, &key.remote_jid)?;
    if !subscribed {
        return Ok(());
    }
    let Some(stored) = ctx.storage.lock().await.find_by_id(&key.id)? else {
        debug!(message_id = %key.id, "revoked message was never captured");
        return Ok(());
    };

    let deleter = key.sender().to_string();
    let local = deleter.split('@').next().unwrap_or(&deleter);
    let mut text = format!("📌 Message deleted by @{local} — restoring below:");
    if !stored.text.is_empty() {
        text.push_str("\n\n");
        text.push_str(&stored.text);
    }
    ctx.transport
        .send_message(
            &key.remote_jid,
            OutboundPayload::text_with_mentions(text, vec![deleter]),
        )
        .await?;

    if let Some(url) = stored.media_url {
        let kind = MediaKind::from_mime(stored.mime_type.as_deref().unwrap_or(""));
        if let Err(err) = ctx
            .transport
            .send_message(&key.remote_jid, OutboundPayload::MediaUrl { kind, url })
            .await
        {
            warn!(message_id = %key.id, "media restore failed: {}", err);
        }
    }
    Ok(())
}
