use crate::error::{Error, StreamErrorKind};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;

// Type alias for user IDs (web layer converts its identifiers to String)
pub type UserId = String;

/// Frames the network side may hold before a write has to wait. Keeping this
/// at one makes writes block as soon as the peer stops reading.
const WRITER_BUFFER: usize = 1;

/// Last nanosecond timestamp handed out to a `ClientId`.
static LAST_CLIENT_NANOS: AtomicI64 = AtomicI64::new(0);

/// Identity of the caller, resolved by upstream middleware.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestContext {
    pub user_id: UserId,
    pub org_id: String,
    pub bu_id: String,
}

impl RequestContext {
    pub fn new(
        user_id: impl Into<String>,
        org_id: impl Into<String>,
        bu_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
            bu_id: bu_id.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.user_id.is_empty() && !self.org_id.is_empty() && !self.bu_id.is_empty()
    }
}

/// A stream name scoped to one tenant: `name:org:bu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantStreamKey {
    pub stream_key: String,
    pub org_id: String,
    pub bu_id: String,
}

impl TenantStreamKey {
    pub fn new(stream_key: &str, request_ctx: &RequestContext) -> Self {
        Self {
            stream_key: stream_key.to_string(),
            org_id: request_ctx.org_id.clone(),
            bu_id: request_ctx.bu_id.clone(),
        }
    }
}

impl fmt::Display for TenantStreamKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.stream_key, self.org_id, self.bu_id)
    }
}

/// Unique identifier for a client within a stream: `org|bu|user|nanos`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(request_ctx: &RequestContext) -> Self {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        // Strictly increasing, so two connections in the same nanosecond still differ
        let previous = LAST_CLIENT_NANOS
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let nanos = now.max(previous + 1);
        Self(format!(
            "{}|{}|{}|{}",
            request_ctx.org_id, request_ctx.bu_id, request_ctx.user_id, nanos
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write half of a client's network connection.
///
/// A completed `write` means the frame was handed to the HTTP body, which is
/// the flush point for an SSE response.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    sender: mpsc::Sender<Bytes>,
}

impl FrameWriter {
    /// Creates a writer and the receiving end the HTTP response body drains.
    pub fn channel() -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(WRITER_BUFFER);
        (Self { sender }, receiver)
    }

    pub async fn write(&self, frame: Bytes) -> Result<(), Error> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| Error::new(StreamErrorKind::ConnectionClosed))
    }

    /// Resolves once the peer has gone away.
    pub async fn closed(&self) {
        self.sender.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_stream_key_formats_as_name_org_bu() {
        let ctx = RequestContext::new("usr_1", "org_1", "bu_1");
        let key = TenantStreamKey::new("shipments-live", &ctx);

        assert_eq!(key.to_string(), "shipments-live:org_1:bu_1");
    }

    #[test]
    fn tenants_never_share_a_key() {
        let a = TenantStreamKey::new("shipments-live", &RequestContext::new("u", "org_1", "bu_1"));
        let b = TenantStreamKey::new("shipments-live", &RequestContext::new("u", "org_2", "bu_1"));

        assert_ne!(a, b);
    }

    #[test]
    fn client_ids_embed_the_tenant_and_user() {
        let ctx = RequestContext::new("usr_1", "org_1", "bu_1");
        let id = ClientId::new(&ctx);

        assert!(id.as_str().starts_with("org_1|bu_1|usr_1|"));
    }

    #[test]
    fn rapid_reconnects_get_distinct_ids() {
        let ctx = RequestContext::new("usr_1", "org_1", "bu_1");
        let ids: std::collections::HashSet<ClientId> =
            (0..1000).map(|_| ClientId::new(&ctx)).collect();

        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn incomplete_context_is_detected() {
        assert!(RequestContext::new("u", "o", "b").is_complete());
        assert!(!RequestContext::new("u", "", "b").is_complete());
        assert!(!RequestContext::new("", "o", "b").is_complete());
    }

    #[tokio::test]
    async fn write_fails_once_the_peer_is_gone() {
        let (writer, receiver) = FrameWriter::channel();
        drop(receiver);

        let err = writer.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(err.is_connection_closed());
        assert!(writer.is_closed());
    }
}
