//! Command tokenization, authorization, and dispatch.
//!
//! Unmatched text is ordinary conversation, not an error. A handler error
//! is contained at the per-message scope: logged, answered with a generic
//! failure reply, and never allowed to stall the rest of the batch.

use crate::normalize::{extract_text, pick_attachment, unwrap_wrappers, NormalizedMessage};
use crate::session::SessionContext;
use crate::{broadcast, monitors};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, warn};
use warden_storage::SubscriptionKind;
use warden_transport::{MediaKind, OutboundPayload, ParticipantAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Lowercase the first whitespace token and strip the prefix; everything
/// after is ordered args.
pub fn parse_command(text: &str, prefix: char) -> Option<PendingCommand> {
    let mut tokens = text.split_whitespace();
    let first = tokens.next()?.to_lowercase();
    let name = first.strip_prefix(prefix)?;
    if name.is_empty() {
        return None;
    }
    Some(PendingCommand {
        name: name.to_string(),
        args: tokens.map(str::to_string).collect(),
    })
}

#[derive(Debug, Clone, Copy)]
struct CommandSpec {
    owner_only: bool,
    group_only: bool,
}

const OPEN: CommandSpec = CommandSpec {
    owner_only: false,
    group_only: false,
};
const GROUP: CommandSpec = CommandSpec {
    owner_only: false,
    group_only: true,
};
const OWNER: CommandSpec = CommandSpec {
    owner_only: true,
    group_only: false,
};
const OWNER_GROUP: CommandSpec = CommandSpec {
    owner_only: true,
    group_only: true,
};

fn command_spec(name: &str) -> Option<CommandSpec> {
    match name {
        "ping" | "info" | "help" | "menu" | "save" | "antidelete" | "vv" | "quote" | "say"
        | "tts" | "sticker" | "owner" => Some(OPEN),
        "tagall" | "ginfo" | "antilink" => Some(GROUP),
        "restart" => Some(OWNER),
        "promote" | "demote" | "kickall" => Some(OWNER_GROUP),
        _ => None,
    }
}

/// Route one normalized message. At most one handler body runs; predicate
/// failures answer with a rejection and skip the body entirely.
pub async fn dispatch(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let Some(cmd) = parse_command(&msg.text, ctx.prefix()) else {
        return Ok(());
    };
    let Some(spec) = command_spec(&cmd.name) else {
        return Ok(());
    };

    if spec.owner_only && !ctx.is_owner(msg) {
        ctx.reply(&msg.chat_id, "⛔ Only the owner can use this command.")
            .await?;
        return Ok(());
    }
    if spec.group_only && !msg.is_group() {
        ctx.reply(&msg.chat_id, "⚠️ This command only works in groups.")
            .await?;
        return Ok(());
    }

    if let Err(err) = invoke(ctx, msg, &cmd).await {
        error!(command = %cmd.name, chat = %msg.chat_id, "command handler failed: {}", err);
        let _ = ctx
            .reply(&msg.chat_id, "❌ Command failed, please try again later.")
            .await;
    }
    Ok(())
}

async fn invoke(ctx: &SessionContext, msg: &NormalizedMessage, cmd: &PendingCommand) -> Result<()> {
    match cmd.name.as_str() {
        "tagall" => tagall(ctx, msg).await,
        "ping" | "info" => ping(ctx, msg).await,
        "help" | "menu" => help(ctx, msg).await,
        "save" => save(ctx, msg).await,
        "antidelete" => toggle_subscription(ctx, msg, &cmd.args, SubscriptionKind::AntiDelete).await,
        "antilink" => toggle_subscription(ctx, msg, &cmd.args, SubscriptionKind::AntiLink).await,
        "vv" => view_once_replay(ctx, msg).await,
        "quote" => quote(ctx, msg).await,
        "say" => say(ctx, msg, &cmd.args).await,
        "tts" => tts(ctx, msg, &cmd.args).await,
        "sticker" => sticker(ctx, msg).await,
        "ginfo" => group_info(ctx, msg).await,
        "owner" => owner_card(ctx, msg).await,
        "restart" => restart(ctx, msg).await,
        "promote" => membership(ctx, msg, &cmd.args, ParticipantAction::Promote).await,
        "demote" => membership(ctx, msg, &cmd.args, ParticipantAction::Demote).await,
        "kickall" => kick_all(ctx, msg).await,
        _ => Ok(()),
    }
}

async fn tagall(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let meta = ctx.transport.group_metadata(&msg.chat_id).await?;
    let members: Vec<String> = meta.participants.iter().map(|p| p.jid.clone()).collect();
    let banner = format!("📣 {} — attention everyone!", ctx.config.bot_name());

    broadcast::broadcast_mentions(
        ctx.transport.as_ref(),
        &msg.chat_id,
        &banner,
        &members,
        ctx.config.pacing.mention_batch_size,
        Duration::from_millis(ctx.config.pacing.mention_pause_ms),
    )
    .await?;
    Ok(())
}

async fn ping(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let uptime = ctx.started.elapsed().as_secs();
    let text = format!(
        "🏓 {} uptime: {}h {}m {}s\nOwner: {}",
        ctx.config.bot_name(),
        uptime / 3600,
        (uptime % 3600) / 60,
        uptime % 60,
        ctx.owner_jid(),
    );
    ctx.reply(&msg.chat_id, &text).await
}

async fn help(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let p = ctx.prefix();
    let text = format!(
        "✨ {name} menu\n\
         Core: {p}tagall · {p}ping · {p}info · {p}help\n\
         Utility: {p}save (reply) · {p}vv · {p}antidelete on|off · {p}antilink on|off\n\
         Media: {p}sticker (reply image) · {p}tts <text>\n\
         Admin: {p}ginfo · {p}promote @number · {p}demote @number · {p}kickall (owner)\n\
         Fun: {p}quote · {p}say <text>\n\
         Owner: {p}restart",
        name = ctx.config.bot_name(),
    );
    ctx.reply(&msg.chat_id, &text).await
}

async fn save(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let Some(quoted) = &msg.quoted else {
        let p = ctx.prefix();
        return ctx
            .reply(
                &msg.chat_id,
                &format!("⚠️ Reply to the message you want to save with {p}save."),
            )
            .await;
    };

    let (inner, _) = unwrap_wrappers(quoted);
    let text = extract_text(inner);
    let owner = ctx.owner_jid();

    ctx.transport
        .send_message(
            &owner,
            OutboundPayload::text(format!(
                "💾 Saved from {} in {}",
                msg.sender_id, msg.chat_id
            )),
        )
        .await?;
    if !text.is_empty() {
        ctx.transport
            .send_message(&owner, OutboundPayload::text(text))
            .await?;
    }
    if let Some((kind, payload)) = pick_attachment(inner) {
        let bytes = ctx.transport.download_media(payload).await?;
        ctx.transport
            .send_message(
                &owner,
                OutboundPayload::media_bytes(
                    kind,
                    &bytes,
                    payload.mime_type.clone(),
                    payload.file_name.clone(),
                ),
            )
            .await?;
    }

    ctx.reply(&msg.chat_id, "✅ Saved and sent to owner.").await
}

async fn toggle_subscription(
    ctx: &SessionContext,
    msg: &NormalizedMessage,
    args: &[String],
    kind: SubscriptionKind,
) -> Result<()> {
    let action = args.first().map(|a| a.to_ascii_lowercase());
    match action.as_deref() {
        Some("on") => {
            ctx.storage
                .lock()
                .await
                .set_subscription(kind, &msg.chat_id)?;
            ctx.reply(
                &msg.chat_id,
                &format!("✅ {} enabled for this chat.", kind_label(kind)),
            )
            .await
        }
        Some("off") => {
            ctx.storage
                .lock()
                .await
                .clear_subscription(kind, &msg.chat_id)?;
            ctx.reply(
                &msg.chat_id,
                &format!("⛔ {} disabled for this chat.", kind_label(kind)),
            )
            .await
        }
        _ => {
            let p = ctx.prefix();
            let name = kind.as_str();
            ctx.reply(
                &msg.chat_id,
                &format!("Usage: {p}{name} on | {p}{name} off"),
            )
            .await
        }
    }
}

fn kind_label(kind: SubscriptionKind) -> &'static str {
    match kind {
        SubscriptionKind::AntiDelete => "Anti-delete",
        SubscriptionKind::AntiLink => "Anti-link",
    }
}

async fn view_once_replay(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let saved = ctx
        .storage
        .lock()
        .await
        .find_latest_view_once(&msg.chat_id)?;
    let Some(saved) = saved else {
        return ctx
            .reply(&msg.chat_id, "⚠️ No saved view-once found in this chat.")
            .await;
    };

    let mut text = "🔓 Resending saved view-once as a normal message:".to_string();
    if !saved.text.is_empty() {
        text.push_str("\n\n");
        text.push_str(&saved.text);
    }
    ctx.reply(&msg.chat_id, &text).await?;

    if let Some(url) = saved.media_url {
        let kind = MediaKind::from_mime(saved.mime_type.as_deref().unwrap_or(""));
        ctx.transport
            .send_message(&msg.chat_id, OutboundPayload::MediaUrl { kind, url })
            .await?;
    }
    Ok(())
}

async fn quote(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    #[derive(Debug, Deserialize)]
    struct Quote {
        q: String,
        a: String,
    }

    let quotes: Vec<Quote> = ctx
        .http
        .get("https://zenquotes.io/api/random")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let quote = quotes
        .first()
        .ok_or_else(|| anyhow!("quote API returned an empty list"))?;

    ctx.reply(&msg.chat_id, &format!("💭 \"{}\"\n— {}", quote.q, quote.a))
        .await
}

async fn say(ctx: &SessionContext, msg: &NormalizedMessage, args: &[String]) -> Result<()> {
    if args.is_empty() {
        let p = ctx.prefix();
        return ctx
            .reply(&msg.chat_id, &format!("Usage: {p}say <text>"))
            .await;
    }
    ctx.reply(&msg.chat_id, &args.join(" ")).await
}

async fn tts(ctx: &SessionContext, msg: &NormalizedMessage, args: &[String]) -> Result<()> {
    if args.is_empty() {
        let p = ctx.prefix();
        return ctx
            .reply(&msg.chat_id, &format!("Usage: {p}tts <text>"))
            .await;
    }

    let text = args.join(" ");
    let speech_url = url::Url::parse_with_params(
        "https://api.streamelements.com/kappa/v2/speech",
        &[("voice", "en-GB"), ("text", text.as_str())],
    )?;

    ctx.transport
        .send_message(
            &msg.chat_id,
            OutboundPayload::AudioUrl {
                url: speech_url.to_string(),
                mime_type: "audio/mp4".to_string(),
                ptt: true,
            },
        )
        .await?;
    Ok(())
}

async fn sticker(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    // A quoted image wins; otherwise the invoking message's own image.
    let quoted_image = msg.quoted.as_ref().and_then(|quoted| {
        let (inner, _) = unwrap_wrappers(quoted);
        inner.image.as_ref()
    });
    let own_image = msg
        .attachment
        .as_ref()
        .filter(|att| att.kind == MediaKind::Image)
        .map(|att| &att.payload);

    let Some(payload) = quoted_image.or(own_image) else {
        let p = ctx.prefix();
        return ctx
            .reply(
                &msg.chat_id,
                &format!("⚠️ Reply to an image with {p}sticker, or send one captioned {p}sticker."),
            )
            .await;
    };

    let bytes = ctx.transport.download_media(payload).await?;
    ctx.transport
        .send_message(&msg.chat_id, OutboundPayload::sticker(&bytes))
        .await?;
    Ok(())
}

async fn group_info(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let meta = ctx.transport.group_metadata(&msg.chat_id).await?;
    let admins = meta.participants.iter().filter(|p| p.is_admin).count();
    let text = format!(
        "👥 Group info\nName: {}\nMembers: {}\nAdmins: {}\nDescription: {}",
        meta.subject,
        meta.participants.len(),
        admins,
        meta.description.as_deref().unwrap_or("None"),
    );
    ctx.reply(&msg.chat_id, &text).await
}

async fn owner_card(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let owner = ctx.owner_jid();
    let number = owner.split('@').next().unwrap_or_default();
    let name = ctx.config.bot_name().to_string();
    let vcard = format!(
        "BEGIN:VCARD\nVERSION:3.0\nFN:{name}\nTEL;type=CELL;type=VOICE;waid={number}:{number}\nEND:VCARD"
    );

    ctx.transport
        .send_message(
            &msg.chat_id,
            OutboundPayload::Contact {
                display_name: name,
                vcard,
            },
        )
        .await?;
    Ok(())
}

async fn restart(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    ctx.reply(&msg.chat_id, "🔄 Restarting...").await?;

    // Delay lets the acknowledgment flush before the loop stops.
    let shutdown = ctx.shutdown.clone();
    let delay = Duration::from_millis(ctx.config.pacing.restart_delay_ms);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = shutdown.send(()).await;
    });
    Ok(())
}

async fn membership(
    ctx: &SessionContext,
    msg: &NormalizedMessage,
    args: &[String],
    action: ParticipantAction,
) -> Result<()> {
    let target = msg
        .mentioned_jids
        .first()
        .cloned()
        .or_else(|| args.first().cloned());
    let Some(target) = target else {
        let p = ctx.prefix();
        return ctx
            .reply(
                &msg.chat_id,
                &format!("Usage: mention a member or pass their number, then {p}promote / {p}demote."),
            )
            .await;
    };

    let jid = monitors::normalize_jid(&target);
    ctx.transport
        .group_participants_update(&msg.chat_id, &[jid.clone()], action)
        .await?;
    ctx.reply(&msg.chat_id, &format!("✅ Done: {} {}", action.as_str(), jid))
        .await
}

async fn kick_all(ctx: &SessionContext, msg: &NormalizedMessage) -> Result<()> {
    let meta = ctx.transport.group_metadata(&msg.chat_id).await?;
    let owner = ctx.owner_jid();
    let targets: Vec<String> = meta
        .participants
        .iter()
        .filter(|p| !p.is_admin && p.jid != owner)
        .map(|p| p.jid.clone())
        .collect();

    let pause = Duration::from_millis(ctx.config.pacing.kick_pause_ms);
    for (index, target) in targets.iter().enumerate() {
        if let Err(err) = ctx
            .transport
            .group_participants_update(&msg.chat_id, &[target.clone()], ParticipantAction::Remove)
            .await
        {
            // Partial failures never halt the sweep.
            warn!(member = %target, "removal failed: {}", err);
        }
        if index + 1 < targets.len() {
            tokio::time::sleep(pause).await;
        }
    }

    ctx.reply(
        &msg.chat_id,
        &format!("✅ Removed {} non-admin member(s) (attempted).", targets.len()),
    )
    .await
}
