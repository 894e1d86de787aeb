use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    credentials::SessionCredentials,
    domain::{GroupMetadata, Jid},
    Result,
};

/// Why the transport closed the session.
///
/// The only policy hook the lifecycle loop needs: [`Self::is_terminal`]
/// decides terminal logout vs retryable close, and the two are never
/// conflated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The session was explicitly logged out; reconnecting cannot succeed
    /// until the operator re-authenticates via a fresh QR challenge.
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    RestartRequired,
    TimedOut,
    Unknown,
}

impl DisconnectReason {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Whether a message batch carries live messages or historical sync data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchKind {
    /// Live incoming messages ("notify").
    Notify,
    /// Backfill/history sync; ignored by the listener.
    Append,
}

/// Addressing key of a raw message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub from_me: bool,
    /// Sender within a group chat; absent in personal chats.
    pub participant: Option<Jid>,
}

/// One raw inbound message as delivered by the transport.
///
/// `message` is kept as raw JSON on purpose: payload shapes are heterogeneous
/// and versioned by the backend, so classification happens in `normalize`
/// rather than at the deserialization boundary.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub key: MessageKey,
    pub push_name: Option<String>,
    /// Epoch seconds; absent on some synthetic payloads.
    pub message_timestamp: Option<i64>,
    pub message: Option<Value>,
}

/// Events emitted by an open session, in delivery order.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Open,
    /// Opaque challenge string for the external QR renderer.
    QrChallenge(String),
    /// Updated credentials that must be persisted before further processing.
    CredentialsUpdate(SessionCredentials),
    MessageBatch {
        kind: BatchKind,
        messages: Vec<RawMessage>,
    },
    Closed(DisconnectReason),
}

/// Hexagonal port for the protocol capability.
///
/// The real implementation (socket handling, handshake, decryption) lives in
/// an adapter crate; this core only consumes session events and issues
/// metadata queries.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a session with the given credentials. The receiver yields session
    /// events until the session closes; a dropped channel without a `Closed`
    /// event is treated as an unknown (retryable) close.
    async fn connect(&self, creds: SessionCredentials) -> Result<mpsc::Receiver<SessionEvent>>;

    /// Fetch subject, participants, and avatar for a group chat.
    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata>;
}

/// Port for the external QR renderer. The challenge string is opaque here;
/// this core never interprets QR content.
pub trait QrSink: Send + Sync {
    fn render(&self, challenge: &str);
}
