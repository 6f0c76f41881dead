//! Process-wide registry of tenant streams and admission control.

use crate::config::StreamConfig;
use crate::connection::{ClientId, FrameWriter, RequestContext, TenantStreamKey, UserId};
use crate::error::{ConnectionLimit, Error, StreamErrorKind};
use crate::manager::{ManagedStream, StreamManager, StreamMetrics};
use crate::source::DataSource;
use async_stream::stream;
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use dashmap::DashMap;
use log::*;
use std::any::Any;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long `shutdown` waits for pollers, sessions and writers to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct RegisteredStream {
    stream: Arc<dyn ManagedStream>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Owns every `StreamManager` in the process and enforces the per-user
/// connection quota. Construct one at startup and share it through app state.
pub struct StreamingService {
    config: StreamConfig,
    managers: DashMap<TenantStreamKey, RegisteredStream>,
    user_connections: Arc<DashMap<UserId, usize>>,
    root: CancellationToken,
    tracker: TaskTracker,
    shut_down: AtomicBool,
}

impl StreamingService {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            managers: DashMap::new(),
            user_connections: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Admits the caller onto the tenant stream `stream_key`, backed by
    /// `source`, and returns the SSE response that carries it.
    ///
    /// The first admission for a tenant stream binds `source` to it; later
    /// admissions reuse the bound source.
    pub fn stream<S: DataSource>(
        &self,
        request_ctx: RequestContext,
        stream_key: &str,
        source: Arc<S>,
    ) -> Result<StreamResponse, Error> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::new(StreamErrorKind::ShuttingDown));
        }
        if !request_ctx.is_complete() {
            warn!("Rejecting stream {stream_key}: incomplete request context");
            return Err(Error::new(StreamErrorKind::Unauthorized));
        }

        let key = TenantStreamKey::new(stream_key, &request_ctx);
        let permit = self.acquire_permit(&request_ctx.user_id)?;
        let manager = self.resolve_manager(&key, source)?;

        let (writer, frames) = FrameWriter::channel();
        let session = manager.register_client(&request_ctx, writer)?;
        let client_id = session.client_id().clone();
        info!("Accepted client {client_id} on stream {key}");

        self.tracker.spawn(async move {
            let _permit = permit;
            session.serve().await;
        });

        Ok(StreamResponse { client_id, frames })
    }

    /// Pushes items to a live tenant stream right away, through the same
    /// dedup and fan-out path the poller uses. Returns the number of items
    /// that were new to the stream.
    pub async fn publish<S: DataSource>(&self, key: &TenantStreamKey, items: &[S::Item]) -> usize {
        match self.manager::<S>(key) {
            Some(manager) => manager.publish(items).await,
            None => 0,
        }
    }

    /// Live client count across every tenant of `stream_key`.
    pub fn active_streams(&self, stream_key: &str) -> usize {
        self.managers
            .iter()
            .filter(|entry| entry.key().stream_key == stream_key)
            .map(|entry| entry.value().stream.client_count())
            .sum()
    }

    /// Live client count for a single tenant stream.
    pub fn active_clients(&self, key: &TenantStreamKey) -> usize {
        self.managers
            .get(key)
            .map(|entry| entry.stream.client_count())
            .unwrap_or(0)
    }

    pub fn stream_metrics(&self, key: &TenantStreamKey) -> Option<StreamMetrics> {
        self.managers.get(key).map(|entry| entry.stream.metrics())
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.user_connections
            .get(user_id)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// The typed manager of a tenant stream, if one exists for this data source type.
    pub fn manager<S: DataSource>(&self, key: &TenantStreamKey) -> Option<Arc<StreamManager<S>>> {
        let typed = self.managers.get(key)?.typed.clone();
        typed.downcast::<StreamManager<S>>().ok()
    }

    /// Cancels every stream, closes every client and empties the registry.
    /// Waits for pollers, sessions and writers to drain. Later calls return
    /// immediately.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down streaming service");

        self.root.cancel();
        let streams: Vec<RegisteredStream> = self
            .managers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.managers.clear();
        for registered in streams {
            registered.stream.shutdown();
        }

        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} streaming task(s) still running after shutdown grace period",
                self.tracker.len()
            );
        }
        info!("Streaming service stopped");
    }

    fn acquire_permit(&self, user_id: &UserId) -> Result<ConnectionPermit, Error> {
        let mut count = self.user_connections.entry(user_id.clone()).or_insert(0);
        if *count >= self.config.max_connections_per_user {
            drop(count); // Release the shard lock before removal
            self.user_connections
                .remove_if(user_id, |_, count| *count == 0);
            warn!(
                "User {user_id} is at the connection cap ({})",
                self.config.max_connections_per_user
            );
            return Err(Error::new(StreamErrorKind::TooManyConnections(
                ConnectionLimit::PerUser,
            )));
        }
        *count += 1;

        Ok(ConnectionPermit {
            user_id: user_id.clone(),
            counts: Arc::clone(&self.user_connections),
        })
    }

    fn resolve_manager<S: DataSource>(
        &self,
        key: &TenantStreamKey,
        source: Arc<S>,
    ) -> Result<Arc<StreamManager<S>>, Error> {
        let registered = self
            .managers
            .entry(key.clone())
            .or_insert_with(|| {
                info!("Creating stream manager for {key}");
                let manager = Arc::new(StreamManager::new(
                    key.clone(),
                    source,
                    self.config.clone(),
                    &self.root,
                    self.tracker.clone(),
                ));
                RegisteredStream {
                    stream: manager.clone(),
                    typed: manager,
                }
            })
            .clone();

        registered
            .typed
            .downcast::<StreamManager<S>>()
            .map_err(|_| {
                warn!("Stream {key} is bound to a different data source type");
                Error::new(StreamErrorKind::StreamTypeMismatch)
            })
    }
}

/// One slot of a user's connection quota. The slot is released exactly once,
/// when the permit is dropped.
struct ConnectionPermit {
    user_id: UserId,
    counts: Arc<DashMap<UserId, usize>>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        if let Some(mut count) = self.counts.get_mut(&self.user_id) {
            *count = count.saturating_sub(1);
        }
        self.counts.remove_if(&self.user_id, |_, count| *count == 0);
    }
}

/// An accepted stream: the frames bound for one client's HTTP response body.
#[derive(Debug)]
pub struct StreamResponse {
    client_id: ClientId,
    frames: mpsc::Receiver<Bytes>,
}

impl StreamResponse {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn into_frames(self) -> mpsc::Receiver<Bytes> {
        self.frames
    }
}

impl IntoResponse for StreamResponse {
    fn into_response(self) -> Response {
        let mut frames = self.frames;
        let body = Body::from_stream(stream! {
            while let Some(frame) = frames.recv().await {
                yield Ok::<_, Infallible>(frame);
            }
        });

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}
