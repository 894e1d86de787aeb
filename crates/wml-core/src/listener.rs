//! Connection lifecycle: connect, classify closes, reconnect on a fixed
//! delay, and feed live message batches through normalization into the log.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    credentials::CredentialStore,
    metadata::GroupMetadataCache,
    normalize::normalize,
    store::PersistenceStore,
    transport::{BatchKind, ChatTransport, DisconnectReason, QrSink, RawMessage, SessionEvent},
    Result,
};

/// Lifecycle state of the single listener session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Closed by a transient cause; a reconnect is scheduled.
    ClosedReconnectable,
    /// Closed by logout; the operator must re-authenticate via a fresh QR
    /// challenge before the listener can run again.
    ClosedTerminal,
}

/// Owns the connect/reconnect loop and dispatches session events.
pub struct Listener {
    cfg: Arc<Config>,
    transport: Arc<dyn ChatTransport>,
    qr: Arc<dyn QrSink>,
    credentials: CredentialStore,
    metadata: GroupMetadataCache,
    store: PersistenceStore,
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
}

impl Listener {
    pub fn new(cfg: Arc<Config>, transport: Arc<dyn ChatTransport>, qr: Arc<dyn QrSink>) -> Self {
        Self {
            credentials: CredentialStore::new(&cfg.auth_dir),
            metadata: GroupMetadataCache::new(transport.clone()),
            store: PersistenceStore::new(&cfg.messages_file),
            cfg,
            transport,
            qr,
            state: Mutex::new(ConnectionState::Disconnected),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Request shutdown: cancels a pending reconnect timer and makes
    /// `start()` return after the current event is handled.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the lifecycle until logout or shutdown. Transient closes are
    /// retried indefinitely on a fixed delay; logout is terminal. Calling
    /// this a second time on the same listener is not supported.
    pub async fn start(&self) -> Result<()> {
        loop {
            self.set_state(ConnectionState::Connecting).await;

            let creds = self.credentials.load()?;
            let mut rx = match self.transport.connect(creds).await {
                Ok(rx) => rx,
                Err(e) => {
                    eprintln!("[CONN] connect failed: {e}");
                    self.set_state(ConnectionState::ClosedReconnectable).await;
                    if !self.wait_for_reconnect().await {
                        return Ok(());
                    }
                    continue;
                }
            };

            // Channel dropped without a Closed event reads as an unknown,
            // retryable close.
            let mut reason = DisconnectReason::Unknown;
            loop {
                tokio::select! {
                  _ = self.cancel.cancelled() => {
                    self.set_state(ConnectionState::Disconnected).await;
                    return Ok(());
                  }
                  maybe = rx.recv() => {
                    let Some(ev) = maybe else { break; };
                    match ev {
                      SessionEvent::Open => {
                        println!("[CONN] session open");
                        self.set_state(ConnectionState::Open).await;
                      }
                      SessionEvent::QrChallenge(challenge) => {
                        println!("[CONN] QR challenge received; forwarding to renderer");
                        self.qr.render(&challenge);
                      }
                      SessionEvent::CredentialsUpdate(creds) => {
                        // Persist before touching the next event: credential
                        // loss on crash must not exceed one update cycle.
                        if let Err(e) = self.credentials.save(&creds) {
                          eprintln!("[CONN] credential save failed: {e}");
                        }
                      }
                      SessionEvent::MessageBatch { kind, messages } => {
                        if kind == BatchKind::Notify {
                          self.handle_notify_batch(messages).await;
                        }
                      }
                      SessionEvent::Closed(r) => {
                        reason = r;
                        break;
                      }
                    }
                  }
                }
            }

            if reason.is_terminal() {
                println!("[CONN] logged out; re-authentication required");
                self.set_state(ConnectionState::ClosedTerminal).await;
                return Ok(());
            }

            self.set_state(ConnectionState::ClosedReconnectable).await;
            println!(
                "[CONN] connection closed ({reason:?}); reconnecting in {:?}",
                self.cfg.reconnect_delay
            );
            if !self.wait_for_reconnect().await {
                return Ok(());
            }
        }
    }

    /// Returns false when shutdown arrived during the delay.
    async fn wait_for_reconnect(&self) -> bool {
        tokio::select! {
          _ = self.cancel.cancelled() => {
            self.set_state(ConnectionState::Disconnected).await;
            false
          }
          _ = sleep(self.cfg.reconnect_delay) => true,
        }
    }

    /// Normalize and append each live message in batch order. A failed
    /// append drops that record: persistence is at-most-once, best effort.
    async fn handle_notify_batch(&self, messages: Vec<RawMessage>) {
        for raw in messages {
            let metadata = self.metadata.get(&raw.key.remote_jid).await;
            let record = normalize(&raw, metadata.as_ref());
            println!(
                "[MSG] {} | {}: {}",
                record.chat_name, record.sender_name, record.text
            );
            if let Err(e) = self.store.append(&record) {
                eprintln!("[STORE] append failed, dropping record: {e}");
            }
        }
    }

    async fn set_state(&self, next: ConnectionState) {
        *self.state.lock().await = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SessionCredentials;
    use crate::domain::{GroupMetadata, Jid};
    use crate::transport::MessageKey;
    use crate::Error;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Transport whose sessions are scripted: each connect() pops the next
    /// event list and replays it.
    struct ScriptedTransport {
        sessions: StdMutex<VecDeque<Vec<SessionEvent>>>,
        connects: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(sessions: Vec<Vec<SessionEvent>>) -> Self {
            Self {
                sessions: StdMutex::new(sessions.into()),
                connects: AtomicUsize::new(0),
            }
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn connect(
            &self,
            _creds: SessionCredentials,
        ) -> Result<mpsc::Receiver<SessionEvent>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let events = self
                .sessions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Transport("no scripted session left".to_string()))?;
            let (tx, rx) = mpsc::channel(64);
            for ev in events {
                tx.send(ev).await.expect("scripted channel overflow");
            }
            Ok(rx)
        }

        async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata> {
            Ok(GroupMetadata {
                subject: format!("Group {}", jid.local_part()),
                participants: Vec::new(),
                avatar_url: None,
            })
        }
    }

    #[derive(Default)]
    struct CapturingQr {
        challenges: StdMutex<Vec<String>>,
    }

    impl QrSink for CapturingQr {
        fn render(&self, challenge: &str) {
            self.challenges.lock().unwrap().push(challenge.to_string());
        }
    }

    fn tmp_base(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"))
    }

    fn test_config(prefix: &str) -> Arc<Config> {
        let base = tmp_base(prefix);
        Arc::new(Config {
            auth_dir: base.join("auth"),
            messages_file: base.join("messages.json"),
            reconnect_delay: Duration::from_millis(0),
        })
    }

    fn notify(texts: &[&str]) -> SessionEvent {
        SessionEvent::MessageBatch {
            kind: BatchKind::Notify,
            messages: texts
                .iter()
                .map(|t| RawMessage {
                    key: MessageKey {
                        remote_jid: Jid::new("628111@s.whatsapp.net"),
                        from_me: false,
                        participant: None,
                    },
                    push_name: Some("Ana".to_string()),
                    message_timestamp: Some(1_700_000_000),
                    message: Some(json!({ "conversation": t })),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn logout_is_terminal_and_never_reconnects() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            SessionEvent::Open,
            SessionEvent::Closed(DisconnectReason::LoggedOut),
        ]]));
        let listener = Listener::new(
            test_config("wml-listener-logout"),
            transport.clone(),
            Arc::new(CapturingQr::default()),
        );

        listener.start().await.unwrap();
        assert_eq!(listener.state().await, ConnectionState::ClosedTerminal);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn transient_close_schedules_exactly_one_reconnect() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            vec![
                SessionEvent::Open,
                SessionEvent::Closed(DisconnectReason::ConnectionLost),
            ],
            vec![
                SessionEvent::Open,
                SessionEvent::Closed(DisconnectReason::LoggedOut),
            ],
        ]));
        let listener = Listener::new(
            test_config("wml-listener-reconnect"),
            transport.clone(),
            Arc::new(CapturingQr::default()),
        );

        listener.start().await.unwrap();
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(listener.state().await, ConnectionState::ClosedTerminal);
    }

    #[tokio::test]
    async fn dropped_channel_counts_as_retryable_close() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            vec![SessionEvent::Open], // sender dropped with no Closed event
            vec![SessionEvent::Closed(DisconnectReason::LoggedOut)],
        ]));
        let listener = Listener::new(
            test_config("wml-listener-dropped"),
            transport.clone(),
            Arc::new(CapturingQr::default()),
        );

        listener.start().await.unwrap();
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn notify_batches_are_appended_in_order_and_history_is_ignored() {
        let history = SessionEvent::MessageBatch {
            kind: BatchKind::Append,
            messages: vec![RawMessage {
                key: MessageKey {
                    remote_jid: Jid::new("999@s.whatsapp.net"),
                    from_me: false,
                    participant: None,
                },
                push_name: None,
                message_timestamp: None,
                message: Some(json!({ "conversation": "old history" })),
            }],
        };
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            SessionEvent::Open,
            history,
            notify(&["first", "second"]),
            SessionEvent::Closed(DisconnectReason::LoggedOut),
        ]]));

        let cfg = test_config("wml-listener-batch");
        let listener = Listener::new(cfg.clone(), transport, Arc::new(CapturingQr::default()));
        listener.start().await.unwrap();

        let snap = PersistenceStore::new(&cfg.messages_file).read_all();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.messages[0].text, "first");
        assert_eq!(snap.messages[1].text, "second");
        assert!(!snap.messages.iter().any(|m| m.text == "old history"));
    }

    #[tokio::test]
    async fn credentials_update_is_saved_before_close() {
        let mut creds = SessionCredentials::default();
        creds.parts.insert("creds".to_string(), json!({ "epoch": 7 }));

        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            SessionEvent::Open,
            SessionEvent::CredentialsUpdate(creds),
            SessionEvent::Closed(DisconnectReason::LoggedOut),
        ]]));

        let cfg = test_config("wml-listener-creds");
        let listener = Listener::new(cfg.clone(), transport, Arc::new(CapturingQr::default()));
        listener.start().await.unwrap();

        let loaded = CredentialStore::new(&cfg.auth_dir).load().unwrap();
        assert_eq!(loaded.parts["creds"], json!({ "epoch": 7 }));
    }

    #[tokio::test]
    async fn qr_challenge_is_forwarded_opaquely() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            SessionEvent::QrChallenge("2@abcdef==,base64stuff".to_string()),
            SessionEvent::Closed(DisconnectReason::LoggedOut),
        ]]));
        let qr = Arc::new(CapturingQr::default());
        let listener = Listener::new(test_config("wml-listener-qr"), transport, qr.clone());

        listener.start().await.unwrap();
        assert_eq!(
            qr.challenges.lock().unwrap().as_slice(),
            ["2@abcdef==,base64stuff"]
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_reconnect() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![SessionEvent::Closed(
            DisconnectReason::ConnectionLost,
        )]]));
        let cfg = Arc::new(Config {
            auth_dir: tmp_base("wml-listener-shutdown").join("auth"),
            messages_file: tmp_base("wml-listener-shutdown").join("messages.json"),
            reconnect_delay: Duration::from_secs(3600),
        });
        let listener = Arc::new(Listener::new(
            cfg,
            transport.clone(),
            Arc::new(CapturingQr::default()),
        ));

        let running = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.start().await })
        };

        // Let the first session close and the reconnect timer start.
        tokio::time::sleep(Duration::from_millis(50)).await;
        listener.shutdown();
        running.await.unwrap().unwrap();

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(listener.state().await, ConnectionState::Disconnected);
    }
}
