//! Server-Sent Events (SSE) streaming core for tenant-scoped live data.
//!
//! A client asks for a named stream (for example `shipments-live`). The
//! `StreamingService` admits it under per-user and per-stream caps and hands
//! it to the `StreamManager` that owns that stream for the caller's tenant.
//! The manager runs a single poller per tenant stream: on every tick it asks
//! the caller supplied `DataSource` for the current items, filters out what
//! was already sent, and fans the new items out to every connected client as
//! `new-entry` events.
//!
//! # Architecture
//!
//! - **Tenant isolation**: streams are keyed by `(stream key, organization,
//!   business unit)`. Managers, pollers and ledgers are never shared between
//!   tenants.
//! - **Shared polling**: one fetch per tick per tenant stream, however many
//!   clients are connected. The poller stops when the last client leaves and
//!   restarts on the next connection.
//! - **Deduplication**: a timestamp watermark plus a bounded ledger of sent
//!   item identifiers.
//! - **Per-client back-pressure**: every client has a bounded send queue
//!   drained by its own writer task. A client that cannot keep up is flagged
//!   slow and skipped until it drains, so it never stalls the others.
//! - **Circuit breaker**: repeated fetch failures back off exponentially.
//!
//! # Wire format
//!
//! Every frame is `event: <type>\ndata: <json>\n\n`. Event types are
//! `connected`, `new-entry`, `heartbeat`, `ping` and `error`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sse::{RequestContext, StreamingService, StreamConfig};
//!
//! let streaming = StreamingService::new(StreamConfig::default());
//! let ctx = RequestContext::new(user_id, org_id, bu_id);
//! let response = streaming.stream(ctx, "shipments-live", board.clone())?;
//! // `response` implements axum's `IntoResponse`.
//! ```
//!
//! # Modules
//!
//! - `service`: process-wide registry, admission control and shutdown
//! - `manager`: per tenant stream poller, deduplication and fan-out
//! - `client`: per connection send queue and writer
//! - `message`: SSE framing and control events

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod item;
pub mod ledger;
pub mod manager;
pub mod message;
pub mod service;
pub mod source;

pub use config::StreamConfig;
pub use connection::{ClientId, FrameWriter, RequestContext, TenantStreamKey, UserId};
pub use error::{ConnectionLimit, Error, StreamErrorKind};
pub use item::Identifiable;
pub use manager::{StreamManager, StreamMetrics};
pub use service::{StreamResponse, StreamingService};
pub use source::DataSource;

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::StreamConfig;
    use crate::connection::RequestContext;
    use crate::error::Error;
    use crate::item::Identifiable;
    use crate::source::DataSource;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde::Serialize;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    pub const STREAM: &str = "entries-live";

    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    pub fn test_config() -> StreamConfig {
        StreamConfig {
            poll_interval: Duration::from_secs(1),
            stream_timeout: None,
            ..StreamConfig::default()
        }
    }

    pub fn request_ctx(user_id: &str, org_id: &str) -> RequestContext {
        RequestContext::new(user_id, org_id, "bu_1")
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct Entry {
        pub id: String,
        pub ts: i64,
    }

    impl Entry {
        pub fn new(id: &str, ts: i64) -> Self {
            Self {
                id: id.to_string(),
                ts,
            }
        }
    }

    impl Identifiable for Entry {
        fn identifier(&self) -> Option<String> {
            Some(self.id.clone())
        }
    }

    /// Returns the same items on every fetch, after failing a fixed number of times.
    pub struct ScriptedSource {
        items: Vec<Entry>,
        failures_left: AtomicU32,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        pub fn repeating(items: Vec<Entry>) -> Arc<Self> {
            Self::failing_then(0, items)
        }

        pub fn failing_then(failures: u32, items: Vec<Entry>) -> Arc<Self> {
            Arc::new(Self {
                items,
                failures_left: AtomicU32::new(failures),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn call_instants(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        type Item = Entry;

        async fn fetch(&self, _request_ctx: &RequestContext) -> Result<Vec<Entry>, Error> {
            self.calls.lock().unwrap().push(Instant::now());
            let failing = self
                .failures_left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(Error::fetch("upstream unavailable"));
            }
            Ok(self.items.clone())
        }

        fn timestamp_of(&self, item: &Entry) -> i64 {
            item.ts
        }
    }

    /// Echoes the caller's organization back as a JSON item.
    pub struct TenantEchoSource {
        pub base: i64,
    }

    #[async_trait]
    impl DataSource for TenantEchoSource {
        type Item = Value;

        async fn fetch(&self, request_ctx: &RequestContext) -> Result<Vec<Value>, Error> {
            Ok(vec![json!({
                "id": format!("{}-1", request_ctx.org_id),
                "org_id": request_ctx.org_id,
                "ts": self.base + 100,
            })])
        }

        fn timestamp_of(&self, item: &Value) -> i64 {
            item["ts"].as_i64().unwrap_or_default()
        }
    }

    /// Reads the next frame and splits it into its event type and JSON payload.
    /// Returns `None` once the connection has ended.
    pub async fn next_event(frames: &mut mpsc::Receiver<Bytes>) -> Option<(String, Value)> {
        let frame = frames.recv().await?;
        let text = std::str::from_utf8(&frame).unwrap();
        let mut event = None;
        let mut data = None;
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("event: ") {
                event = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("data: ") {
                data = Some(serde_json::from_str(value).unwrap());
            }
        }
        Some((event.unwrap(), data.unwrap()))
    }
}
