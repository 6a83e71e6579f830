//! Warden Core
//!
//! Inbound message pipeline: normalization, persistence, command dispatch,
//! and the passive chat monitors, driven by a session event loop.

pub mod broadcast;
pub mod monitors;
pub mod normalize;
pub mod router;
pub mod session;

pub use normalize::{NormalizedMessage, Normalizer};
pub use router::{dispatch, parse_command, PendingCommand};
pub use session::{Session, SessionContext};

#[cfg(test)]
pub(crate) mod testutil {
    use crate::normalize::NormalizedMessage;
    use crate::session::SessionContext;
    use anyhow::Result;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use tokio::sync::mpsc;
    use warden_config::{BotConfig, BridgeConfig, Config, PacingConfig};
    use warden_media::{BlobSink, MediaResolver};
    use warden_storage::Storage;
    use warden_transport::{
        GroupMetadata, GroupParticipant, LoginMethod, MediaPayload, MessageBody, MessageKey,
        OutboundPayload, ParticipantAction, RawMessage, SignalBus, Transport, TransportError,
    };

    /// Records every call; group metadata and failure modes are settable
    /// after construction.
    #[derive(Default)]
    pub struct MockTransport {
        sent: Mutex<Vec<(String, OutboundPayload)>>,
        updates: Mutex<Vec<(String, Vec<String>, ParticipantAction)>>,
        group_meta: Mutex<Option<GroupMetadata>>,
        meta_calls: AtomicUsize,
        fail_meta: AtomicBool,
    }

    impl MockTransport {
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn sent(&self) -> Vec<(String, OutboundPayload)> {
            self.sent.lock().expect("lock").clone()
        }

        pub fn participant_updates(&self) -> Vec<(String, Vec<String>, ParticipantAction)> {
            self.updates.lock().expect("lock").clone()
        }

        pub fn set_group_meta(&self, meta: GroupMetadata) {
            *self.group_meta.lock().expect("lock") = Some(meta);
        }

        pub fn fail_group_metadata(&self) {
            self.fail_meta.store(true, Ordering::SeqCst);
        }

        pub fn group_metadata_calls(&self) -> usize {
            self.meta_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn start_session(
            &self,
            _phone_number: &str,
            _method: LoginMethod,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_message(
            &self,
            chat_id: &str,
            payload: OutboundPayload,
        ) -> Result<(), TransportError> {
            self.sent
                .lock()
                .expect("lock")
                .push((chat_id.to_string(), payload));
            Ok(())
        }

        async fn group_metadata(&self, chat_id: &str) -> Result<GroupMetadata, TransportError> {
            self.meta_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_meta.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected("metadata unavailable".to_string()));
            }
            Ok(self
                .group_meta
                .lock()
                .expect("lock")
                .clone()
                .unwrap_or_else(|| GroupMetadata {
                    id: chat_id.to_string(),
                    subject: "Test Group".to_string(),
                    description: None,
                    announce: false,
                    participants: Vec::new(),
                }))
        }

        async fn group_participants_update(
            &self,
            chat_id: &str,
            members: &[String],
            action: ParticipantAction,
        ) -> Result<(), TransportError> {
            self.updates
                .lock()
                .expect("lock")
                .push((chat_id.to_string(), members.to_vec(), action));
            Ok(())
        }

        async fn download_media(&self, _media: &MediaPayload) -> Result<Vec<u8>, TransportError> {
            Ok(b"media-bytes".to_vec())
        }

        async fn request_pairing_code(
            &self,
            _phone_number: &str,
        ) -> Result<String, TransportError> {
            Ok("PAIR1234".to_string())
        }
    }

    struct OkSink;

    #[async_trait::async_trait]
    impl BlobSink for OkSink {
        fn name(&self) -> &str {
            "test"
        }

        async fn upload(&self, _bytes: &[u8], _mime_type: &str) -> Result<String> {
            Ok("https://blobs.example/object".to_string())
        }
    }

    pub fn ok_resolver() -> Arc<MediaResolver> {
        Arc::new(MediaResolver::new(Arc::new(OkSink), None))
    }

    pub fn test_config() -> Config {
        Config {
            core: Default::default(),
            bot: BotConfig {
                phone_number: "2349050000000".to_string(),
                owner_jid: Some("owner@s.whatsapp.net".to_string()),
                bot_name: None,
                command_prefix: '.',
            },
            bridge: BridgeConfig {
                base_url: "http://127.0.0.1:0".to_string(),
                poll_timeout_secs: None,
                client_recreate_interval_secs: None,
            },
            media: Default::default(),
            pacing: PacingConfig {
                mention_batch_size: 20,
                mention_pause_ms: 0,
                kick_pause_ms: 0,
                restart_delay_ms: 0,
            },
        }
    }

    pub fn temp_storage() -> Storage {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("warden-core-{}-{}.db", ts, n));
        Storage::new(path).expect("open storage")
    }

    pub fn test_ctx(transport: Arc<MockTransport>) -> SessionContext {
        test_ctx_with_config(transport, test_config())
    }

    pub fn test_ctx_with_config(transport: Arc<MockTransport>, config: Config) -> SessionContext {
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        SessionContext {
            config,
            storage: Arc::new(tokio::sync::Mutex::new(temp_storage())),
            transport,
            resolver: ok_resolver(),
            http: reqwest::Client::new(),
            signals: SignalBus::new(),
            started: Instant::now(),
            shutdown: shutdown_tx,
        }
    }

    pub fn raw_message(
        id: &str,
        chat: &str,
        participant: Option<&str>,
        body: MessageBody,
    ) -> RawMessage {
        RawMessage {
            key: MessageKey {
                id: id.to_string(),
                remote_jid: chat.to_string(),
                participant: participant.map(str::to_string),
                from_me: false,
            },
            timestamp: Some(1_700_000_000),
            content: Some(body),
        }
    }

    pub fn text_message(chat: &str, sender: &str, text: &str) -> NormalizedMessage {
        NormalizedMessage {
            message_id: format!("T-{}", text.len()),
            chat_id: chat.to_string(),
            sender_id: sender.to_string(),
            from_me: false,
            timestamp: 1_700_000_000,
            text: text.to_string(),
            media_url: None,
            mime_type: None,
            is_view_once: false,
            attachment: None,
            quoted: None,
            mentioned_jids: Vec::new(),
        }
    }

    pub fn group_meta(chat: &str, members: usize, announce: bool) -> GroupMetadata {
        GroupMetadata {
            id: chat.to_string(),
            subject: "Test Group".to_string(),
            description: Some("A test group".to_string()),
            announce,
            participants: (0..members)
                .map(|i| GroupParticipant {
                    jid: format!("{}@s.whatsapp.net", 1000 + i),
                    is_admin: false,
                })
                .collect(),
        }
    }
}
