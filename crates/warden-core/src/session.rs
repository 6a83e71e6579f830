//! Session lifecycle: owns the shared context, drives the inbound event
//! loop, and re-emits connection state on the signal bus.

use crate::monitors;
use crate::normalize::Normalizer;
use crate::router;
use anyhow::Result;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use warden_config::Config;
use warden_media::MediaResolver;
use warden_storage::Storage;
use warden_transport::{
    ConnectionSignal, ConnectionUpdate, LoginMethod, OutboundPayload, RawMessage, SignalBus,
    Transport, TransportEvent,
};

/// Everything a command handler or monitor needs, shared behind one `Arc`.
pub struct SessionContext {
    pub config: Config,
    pub storage: Arc<Mutex<Storage>>,
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<MediaResolver>,
    /// Client for third-party HTTP APIs, separate from the bridge client.
    pub http: reqwest::Client,
    pub signals: SignalBus,
    pub started: Instant,
    pub shutdown: mpsc::Sender<()>,
}

impl SessionContext {
    pub fn owner_jid(&self) -> String {
        self.config.owner_jid()
    }

    /// The account's own direct-chat jid, distinct from the owner's.
    pub fn bot_jid(&self) -> String {
        format!("{}@s.whatsapp.net", self.config.bot.phone_number)
    }

    pub fn prefix(&self) -> char {
        self.config.bot.command_prefix
    }

    /// Owner authority attaches to the sender in groups and to the chat
    /// itself in direct conversations.
    pub fn is_owner(&self, msg: &crate::normalize::NormalizedMessage) -> bool {
        let owner = self.owner_jid();
        msg.sender_id == owner || msg.chat_id == owner
    }

    pub async fn reply(&self, chat_id: &str, text: &str) -> Result<()> {
        self.transport
            .send_message(chat_id, OutboundPayload::text(text))
            .await?;
        Ok(())
    }
}

pub struct Session {
    ctx: Arc<SessionContext>,
    normalizer: Normalizer,
    shutdown_rx: mpsc::Receiver<()>,
    login: Option<(String, LoginMethod)>,
}

impl Session {
    pub fn new(
        config: Config,
        storage: Storage,
        transport: Arc<dyn Transport>,
        resolver: Arc<MediaResolver>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let ctx = Arc::new(SessionContext {
            config,
            storage: Arc::new(Mutex::new(storage)),
            transport: transport.clone(),
            resolver: resolver.clone(),
            http: reqwest::Client::new(),
            signals: SignalBus::new(),
            started: Instant::now(),
            shutdown: shutdown_tx,
        });
        Self {
            ctx,
            normalizer: Normalizer::new(transport, resolver),
            shutdown_rx,
            login: None,
        }
    }

    pub fn context(&self) -> Arc<SessionContext> {
        self.ctx.clone()
    }

    pub fn signals(&self) -> SignalBus {
        self.ctx.signals.clone()
    }

    /// Kick off login on the bridge. Progress arrives asynchronously as
    /// connection updates on the event stream.
    pub async fn connect(&mut self, phone_number: &str, method: LoginMethod) -> Result<()> {
        self.ctx
            .transport
            .start_session(phone_number, method)
            .await?;
        self.login = Some((phone_number.to_string(), method));
        Ok(())
    }

    /// Consume inbound events until logout or a shutdown request.
    pub async fn run(&mut self, mut events: mpsc::Receiver<TransportEvent>) -> Result<()> {
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        info!("event stream closed, stopping session");
                        return Ok(());
                    };
                    if let ControlFlow::Break(()) = self.process_event(event).await {
                        return Ok(());
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("shutdown requested, stopping session");
                    return Ok(());
                }
            }
        }
    }

    async fn process_event(&self, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::ConnectionUpdate { update } => self.handle_connection(update).await,
            TransportEvent::MessagesUpsert { messages } => {
                for raw in &messages {
                    self.handle_raw(raw).await;
                }
                ControlFlow::Continue(())
            }
            TransportEvent::MessagesUpdate { updates } => {
                // Revocations can surface on the update stream too.
                for raw in &updates {
                    if let Some(notice) = raw.content.as_ref().and_then(|c| c.protocol.as_ref()) {
                        if notice.is_revoke() {
                            self.restore(&notice.key).await;
                        }
                    }
                }
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle_connection(&self, update: ConnectionUpdate) -> ControlFlow<()> {
        match update {
            ConnectionUpdate::QrCode { code } => {
                match &self.login {
                    Some((phone, LoginMethod::PairingCode)) => {
                        match self.ctx.transport.request_pairing_code(phone).await {
                            Ok(pairing) => self
                                .ctx
                                .signals
                                .publish(ConnectionSignal::PairingCodeReady(pairing)),
                            Err(err) => error!("pairing code request failed: {}", err),
                        }
                    }
                    _ => self.ctx.signals.publish(ConnectionSignal::QrCodeReady(code)),
                }
                ControlFlow::Continue(())
            }
            ConnectionUpdate::Open => {
                info!("connection established");
                self.ctx.signals.publish(ConnectionSignal::Connected);
                let greeting = format!("🟢 {} is online.", self.ctx.config.bot_name());
                if let Err(err) = self.ctx.reply(&self.ctx.owner_jid(), &greeting).await {
                    warn!("owner notification failed: {}", err);
                }
                ControlFlow::Continue(())
            }
            ConnectionUpdate::Close { logged_out } => {
                if logged_out {
                    error!("session logged out, credentials must be relinked");
                    self.ctx.signals.publish(ConnectionSignal::LoggedOut);
                    ControlFlow::Break(())
                } else {
                    // Transient drop; the bridge reconnects on its own.
                    warn!("connection closed, awaiting bridge reconnect");
                    ControlFlow::Continue(())
                }
            }
        }
    }

    async fn handle_raw(&self, raw: &RawMessage) {
        if let Some(notice) = raw.content.as_ref().and_then(|c| c.protocol.as_ref()) {
            if notice.is_revoke() {
                self.restore(&notice.key).await;
            }
            return;
        }
        self.handle_inbound(raw).await;
    }

    /// Full pipeline for one message. Every stage is contained: a failure
    /// is logged and the remaining stages and messages still run.
    async fn handle_inbound(&self, raw: &RawMessage) {
        let Some(msg) = self.normalizer.normalize(raw).await else {
            return;
        };
        debug!(message_id = %msg.message_id, chat = %msg.chat_id, "inbound message");

        if msg.should_persist() {
            if let Err(err) = self.ctx.storage.lock().await.upsert_message(&msg.to_stored()) {
                warn!(message_id = %msg.message_id, "persistence failed: {}", err);
            }
        }

        if let Err(err) = router::dispatch(&self.ctx, &msg).await {
            error!(message_id = %msg.message_id, "dispatch failed: {}", err);
        }
        if let Err(err) = monitors::anti_link_scan(&self.ctx, &msg).await {
            warn!(message_id = %msg.message_id, "anti-link scan failed: {}", err);
        }
        if let Err(err) = monitors::announcement_check(&self.ctx, &msg).await {
            debug!(chat = %msg.chat_id, "announcement check failed: {}", err);
        }
    }

    async fn restore(&self, key: &warden_transport::MessageKey) {
        if let Err(err) = monitors::restore_deleted(&self.ctx, key).await {
            warn!(message_id = %key.id, "restoration failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ok_resolver, raw_message, temp_storage, test_config, MockTransport};
    use warden_storage::SubscriptionKind;
    use warden_transport::{MessageBody, MessageKey, ProtocolNotice, PROTOCOL_REVOKE};

    fn session(transport: Arc<MockTransport>) -> Session {
        Session::new(test_config(), temp_storage(), transport, ok_resolver())
    }

    fn text_body(text: &str) -> MessageBody {
        MessageBody {
            conversation: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn double_ingest_keeps_one_record() {
        let transport = MockTransport::shared();
        let session = session(transport.clone());
        let raw = raw_message("M1", "g1@g.us", Some("5@s.whatsapp.net"), text_body("hello"));

        session.handle_raw(&raw).await;
        session.handle_raw(&raw).await;

        let ctx = session.context();
        let stored = ctx
            .storage
            .lock()
            .await
            .find_by_id("M1")
            .expect("query")
            .expect("record");
        assert_eq!(stored.text, "hello");
        assert_eq!(stored.chat_id, "g1@g.us");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn revoke_event_triggers_restoration() {
        let transport = MockTransport::shared();
        let session = session(transport.clone());
        let ctx = session.context();
        ctx.storage
            .lock()
            .await
            .set_subscription(SubscriptionKind::AntiDelete, "g1@g.us")
            .expect("subscribe");

        let raw = raw_message("M1", "g1@g.us", Some("5@s.whatsapp.net"), text_body("oops"));
        session.handle_raw(&raw).await;

        let revoke = RawMessage {
            key: MessageKey {
                id: "R1".to_string(),
                remote_jid: "g1@g.us".to_string(),
                participant: Some("5@s.whatsapp.net".to_string()),
                from_me: false,
            },
            timestamp: None,
            content: Some(MessageBody {
                protocol: Some(ProtocolNotice {
                    notice_type: PROTOCOL_REVOKE,
                    key: MessageKey {
                        id: "M1".to_string(),
                        remote_jid: "g1@g.us".to_string(),
                        participant: Some("5@s.whatsapp.net".to_string()),
                        from_me: false,
                    },
                }),
                ..Default::default()
            }),
        };
        let _ = session
            .process_event(TransportEvent::MessagesUpsert {
                messages: vec![revoke],
            })
            .await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            OutboundPayload::Text { text, .. } => {
                assert!(text.contains("Message deleted by @5"));
                assert!(text.contains("oops"));
            }
            _ => panic!("expected text payload"),
        }
    }

    #[tokio::test]
    async fn one_failing_message_does_not_stall_the_batch() {
        let transport = MockTransport::shared();
        transport.fail_group_metadata();
        let session = session(transport.clone());

        let batch = TransportEvent::MessagesUpsert {
            messages: vec![
                raw_message("M1", "g1@g.us", Some("5@s.whatsapp.net"), text_body(".ginfo")),
                raw_message(
                    "M2",
                    "g1@g.us",
                    Some("5@s.whatsapp.net"),
                    text_body(".say still here"),
                ),
            ],
        };
        let _ = session.process_event(batch).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        match &sent[0].1 {
            OutboundPayload::Text { text, .. } => assert!(text.contains("Command failed")),
            _ => panic!("expected text payload"),
        }
        match &sent[1].1 {
            OutboundPayload::Text { text, .. } => assert_eq!(text, "still here"),
            _ => panic!("expected text payload"),
        }
    }

    #[tokio::test]
    async fn plain_group_text_still_checks_announcement_state() {
        let transport = MockTransport::shared();
        let session = session(transport.clone());

        let raw = raw_message(
            "M1",
            "g1@g.us",
            Some("5@s.whatsapp.net"),
            text_body("just chatting"),
        );
        session.handle_raw(&raw).await;
        assert_eq!(transport.group_metadata_calls(), 1);

        // Direct chats never need the group lookup.
        let direct = raw_message("M2", "5@s.whatsapp.net", None, text_body("hi"));
        session.handle_raw(&direct).await;
        assert_eq!(transport.group_metadata_calls(), 1);
    }

    #[tokio::test]
    async fn logout_breaks_the_event_loop() {
        let transport = MockTransport::shared();
        let session = session(transport.clone());
        let mut signals = session.signals().subscribe();

        let flow = session
            .process_event(TransportEvent::ConnectionUpdate {
                update: ConnectionUpdate::Close { logged_out: true },
            })
            .await;
        assert!(matches!(flow, ControlFlow::Break(())));
        assert_eq!(signals.try_recv().unwrap(), ConnectionSignal::LoggedOut);

        let flow = session
            .process_event(TransportEvent::ConnectionUpdate {
                update: ConnectionUpdate::Close { logged_out: false },
            })
            .await;
        assert!(matches!(flow, ControlFlow::Continue(())));
    }
}
