use crate::client::{Client, Delivery};
use crate::config::StreamConfig;
use crate::connection::{ClientId, FrameWriter, RequestContext, TenantStreamKey};
use crate::error::{ConnectionLimit, Error, StreamErrorKind};
use crate::item::item_id;
use crate::ledger::SentLedger;
use crate::message::{encode_entry, unix_now, Event};
use crate::source::DataSource;
use bytes::Bytes;
use log::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Counters kept for every tenant stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetrics {
    pub active_connections: usize,
    pub total_connections: u64,
    pub data_fetch_errors: u64,
    /// Unix seconds of the last successful fetch, 0 before the first one.
    pub last_data_fetch: i64,
}

/// Type-erased view of a `StreamManager`, used by the service registry.
pub(crate) trait ManagedStream: Send + Sync {
    fn client_count(&self) -> usize;
    fn metrics(&self) -> StreamMetrics;
    fn shutdown(&self);
}

struct Registered {
    client: Arc<Client>,
    last_seen: Instant,
}

struct Poller {
    generation: u64,
    cancel: CancellationToken,
}

struct ManagerState {
    clients: HashMap<ClientId, Registered>,
    watermark: i64,
    ledger: SentLedger,
    poller: Option<Poller>,
    poller_generation: u64,
    consecutive_errors: u32,
    backoff: Duration,
    last_data_change: Instant,
    metrics: StreamMetrics,
}

/// Owns every client of one `(stream key, tenant)` pair together with the
/// shared poller that turns repeated fetches into `new-entry` events.
pub struct StreamManager<S: DataSource> {
    key: TenantStreamKey,
    source: Arc<S>,
    config: StreamConfig,
    root: CancellationToken,
    tracker: TaskTracker,
    state: RwLock<ManagerState>,
}

impl<S: DataSource> StreamManager<S> {
    pub(crate) fn new(
        key: TenantStreamKey,
        source: Arc<S>,
        config: StreamConfig,
        parent: &CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        let config = config.normalized();
        let state = ManagerState {
            clients: HashMap::new(),
            watermark: unix_now(),
            ledger: SentLedger::new(&config),
            poller: None,
            poller_generation: 0,
            consecutive_errors: 0,
            backoff: config.poll_interval,
            last_data_change: Instant::now(),
            metrics: StreamMetrics::default(),
        };
        Self {
            key,
            source,
            config,
            root: parent.child_token(),
            tracker,
            state: RwLock::new(state),
        }
    }

    pub fn client_count(&self) -> usize {
        self.read_state().clients.len()
    }

    pub fn metrics(&self) -> StreamMetrics {
        let state = self.read_state();
        StreamMetrics {
            active_connections: state.clients.len(),
            ..state.metrics.clone()
        }
    }

    /// Newest item timestamp already considered by this stream.
    pub fn watermark(&self) -> i64 {
        self.read_state().watermark
    }

    pub fn is_running(&self) -> bool {
        self.read_state().poller.is_some()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.read_state().consecutive_errors
    }

    pub fn sent_ledger_len(&self) -> usize {
        self.read_state().ledger.len()
    }

    pub fn slow_clients(&self) -> Vec<ClientId> {
        self.read_state()
            .clients
            .values()
            .filter(|registered| registered.client.is_slow())
            .map(|registered| registered.client.id.clone())
            .collect()
    }

    /// Admits a client, starting the poller if it is not running. Fails when
    /// the stream is already at its connection cap.
    pub(crate) fn register_client(
        self: &Arc<Self>,
        request_ctx: &RequestContext,
        writer: FrameWriter,
    ) -> Result<ClientSession<S>, Error> {
        let mut state = self.write_state();

        if state.clients.len() >= self.config.max_connections {
            warn!(
                "Stream {} is at its connection cap ({})",
                self.key, self.config.max_connections
            );
            return Err(Error::new(StreamErrorKind::TooManyConnections(
                ConnectionLimit::PerStream,
            )));
        }

        let (client, queue) = Client::new(
            ClientId::new(request_ctx),
            request_ctx,
            writer,
            self.root.child_token(),
            &self.config,
        );
        state.clients.insert(
            client.id.clone(),
            Registered {
                client: Arc::clone(&client),
                last_seen: Instant::now(),
            },
        );
        state.metrics.total_connections += 1;

        self.ensure_poller(&mut state, request_ctx);

        Ok(ClientSession {
            manager: Arc::clone(self),
            client,
            queue: Some(queue),
        })
    }

    /// Runs new and already-seen items through the sent ledger and fans the
    /// new ones out to every client that is not quarantined. Returns the number
    /// of new items.
    pub async fn publish(&self, items: &[S::Item]) -> usize {
        let (fresh, recipients) = {
            let mut state = self.write_state();
            let watermark = state.watermark;
            let mut max_timestamp = watermark;
            let mut fresh = Vec::new();

            for item in items {
                let timestamp = self.source.timestamp_of(item);
                let Some(id) = item_id(item, timestamp) else {
                    warn!("Skipping item without identifier on stream {}", self.key);
                    continue;
                };
                if timestamp >= watermark && !state.ledger.contains(&id) {
                    state.ledger.record(id, timestamp);
                    max_timestamp = max_timestamp.max(timestamp);
                    fresh.push(item);
                }
            }
            state.watermark = max_timestamp;

            let recipients: Vec<Arc<Client>> = state
                .clients
                .values()
                .filter(|registered| !registered.client.is_slow())
                .map(|registered| Arc::clone(&registered.client))
                .collect();
            (fresh, recipients)
        };

        if fresh.is_empty() {
            return 0;
        }

        let frames: Vec<Bytes> = fresh.iter().filter_map(|item| encode_entry(*item)).collect();
        for client in recipients {
            for frame in &frames {
                if client.is_slow() {
                    break;
                }
                if client.enqueue(frame.clone()).await == Delivery::Closed {
                    break;
                }
            }
        }

        trace!("Delivered {} new item(s) on stream {}", fresh.len(), self.key);
        fresh.len()
    }

    /// Starts the poller unless one is already running. Must be called with
    /// the state lock held so that a stopping poller and a new client cannot
    /// both conclude that the other one is responsible.
    fn ensure_poller(self: &Arc<Self>, state: &mut ManagerState, request_ctx: &RequestContext) {
        if state.poller.is_some() {
            return;
        }

        // A restarted poller does not replay what arrived while it was stopped.
        if state.poller_generation > 0 {
            state.watermark = state.watermark.max(unix_now());
        }
        state.poller_generation += 1;

        let cancel = self.root.child_token();
        state.poller = Some(Poller {
            generation: state.poller_generation,
            cancel: cancel.clone(),
        });

        info!("Starting data stream for {}", self.key);
        self.tracker.spawn(Arc::clone(self).run_poller(
            request_ctx.clone(),
            cancel,
            state.poller_generation,
        ));
    }

    async fn run_poller(
        self: Arc<Self>,
        request_ctx: RequestContext,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let period = self.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.stop_if_unattended(generation) {
                return;
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                fetched = self.source.fetch(&request_ctx) => fetched,
            };

            match fetched {
                Ok(items) => {
                    self.record_fetch_success();
                    self.publish(&items).await;
                }
                Err(err) => {
                    if let Some(delay) = self.record_fetch_error() {
                        warn!(
                            "Circuit breaker activated for stream {}, backing off for {delay:?}",
                            self.key
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    warn!("Failed to fetch data for stream {}: {err}", self.key);
                    self.broadcast(Event::error(format!("Failed to fetch data: {err}")))
                        .await;
                    continue;
                }
            }

            if self.config.enable_heartbeat {
                self.broadcast(Event::heartbeat()).await;
            }

            self.cleanup_idle_clients();
            self.scrub_ledger();
        }

        self.clear_poller(generation);
        info!("Data stream for {} cancelled", self.key);
    }

    /// Stops the poller when no client is left. The stream stays registered
    /// so the next client restarts it.
    fn stop_if_unattended(&self, generation: u64) -> bool {
        let mut state = self.write_state();
        if !state.clients.is_empty() {
            return false;
        }

        if state.last_data_change.elapsed() > self.config.idle_timeout {
            info!("Stream {} idle and no clients, shutting down", self.key);
        } else {
            info!("No clients connected to {}, stopping data stream", self.key);
        }
        Self::release_poller(&mut state, generation);
        true
    }

    fn clear_poller(&self, generation: u64) {
        Self::release_poller(&mut self.write_state(), generation);
    }

    fn release_poller(state: &mut ManagerState, generation: u64) {
        if state
            .poller
            .as_ref()
            .is_some_and(|poller| poller.generation == generation)
        {
            if let Some(poller) = state.poller.take() {
                poller.cancel.cancel();
            }
        }
    }

    fn record_fetch_success(&self) {
        let mut state = self.write_state();
        state.consecutive_errors = 0;
        state.backoff = self.config.poll_interval;
        state.metrics.last_data_fetch = unix_now();
        state.last_data_change = Instant::now();
    }

    /// Counts a failed fetch and returns the backoff to apply, if any.
    fn record_fetch_error(&self) -> Option<Duration> {
        let mut state = self.write_state();
        state.consecutive_errors += 1;
        state.metrics.data_fetch_errors += 1;
        self.config
            .backoff_for(state.backoff, state.consecutive_errors)
    }

    /// Best-effort delivery of a control event to every client through its queue.
    async fn broadcast(&self, event: Event) {
        let Some(frame) = event.encode() else {
            return;
        };
        let clients: Vec<Arc<Client>> = self
            .read_state()
            .clients
            .values()
            .map(|registered| Arc::clone(&registered.client))
            .collect();

        for client in clients {
            client.enqueue(frame.clone()).await;
        }
    }

    /// Drops clients that have not answered a ping for twice the heartbeat interval.
    fn cleanup_idle_clients(&self) {
        let threshold = self.config.idle_client_threshold();
        let mut state = self.write_state();
        let now = Instant::now();

        state.clients.retain(|id, registered| {
            if now.saturating_duration_since(registered.last_seen) > threshold {
                info!("Dropping unresponsive client {id} from {}", self.key);
                registered.client.close();
                false
            } else {
                true
            }
        });
    }

    fn scrub_ledger(&self) {
        self.write_state()
            .ledger
            .maybe_scrub(Instant::now(), unix_now());
    }

    fn touch(&self, client_id: &ClientId) {
        if let Some(registered) = self.write_state().clients.get_mut(client_id) {
            registered.last_seen = Instant::now();
        }
    }

    fn remove_client(&self, client_id: &ClientId) {
        if let Some(registered) = self.write_state().clients.remove(client_id) {
            registered.client.close();
            debug!("Removed client {client_id} from {}", self.key);
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: DataSource> ManagedStream for StreamManager<S> {
    fn client_count(&self) -> usize {
        StreamManager::client_count(self)
    }

    fn metrics(&self) -> StreamMetrics {
        StreamManager::metrics(self)
    }

    fn shutdown(&self) {
        self.root.cancel();
        let mut state = self.write_state();
        for (_, registered) in state.clients.drain() {
            registered.client.close();
        }
        state.poller = None;
        info!("Stream {} shut down", self.key);
    }
}

/// A registered client whose connection has not been served yet. Dropping it,
/// on any path, removes the client from its stream.
pub(crate) struct ClientSession<S: DataSource> {
    manager: Arc<StreamManager<S>>,
    client: Arc<Client>,
    queue: Option<mpsc::Receiver<Bytes>>,
}

impl<S: DataSource> ClientSession<S> {
    pub(crate) fn client_id(&self) -> &ClientId {
        &self.client.id
    }

    /// Serves the connection until it ends: the `connected` event goes out
    /// first, straight to the writer, and only then does the queued writer
    /// start. A liveness ping is written every heartbeat interval.
    ///
    /// The stream timeout bounds the whole session, including a ping stuck on
    /// a peer that stopped reading.
    pub(crate) async fn serve(mut self) {
        let client = Arc::clone(&self.client);
        let manager = Arc::clone(&self.manager);

        let deadline = manager
            .config
            .stream_timeout
            .map(|timeout| Instant::now() + timeout);
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let queue = self.queue.take();
        tokio::select! {
            _ = Self::run(&manager, &client, queue) => {}
            _ = expired => info!("Client {} reached the stream timeout", client.id),
        }

        client.close();
    }

    async fn run(
        manager: &Arc<StreamManager<S>>,
        client: &Arc<Client>,
        queue: Option<mpsc::Receiver<Bytes>>,
    ) {
        let Some(connected) = Event::connected().encode() else {
            return;
        };
        if let Err(err) = client.write_direct(connected).await {
            error!("Error flushing initial connection for client {}: {err}", client.id);
            return;
        }

        if let Some(queue) = queue {
            manager.tracker.spawn(Arc::clone(client).run_writer(queue));
        }

        let period = manager.config.heartbeat_interval;
        let ping_timeout = manager.config.idle_client_threshold();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = client.cancel_token().cancelled() => {
                    debug!("Client {} context cancelled", client.id);
                    return;
                }
                _ = client.writer().closed() => {
                    debug!("Client {} disconnected (normal)", client.id);
                    return;
                }
                _ = ticker.tick() => {}
            }

            let Some(ping) = Event::ping().encode() else {
                continue;
            };
            match tokio::time::timeout(ping_timeout, client.write_direct(ping)).await {
                Ok(Ok(())) => manager.touch(&client.id),
                Ok(Err(err)) if err.is_connection_closed() => {
                    debug!("Client {} disconnected (normal)", client.id);
                    return;
                }
                Ok(Err(err)) => {
                    warn!("Client {} connection error: {err}", client.id);
                    return;
                }
                Err(_) => {
                    warn!("Client {} did not accept a ping within {ping_timeout:?}", client.id);
                    return;
                }
            }
        }
    }
}

impl<S: DataSource> Drop for ClientSession<S> {
    fn drop(&mut self) {
        self.manager.remove_client(&self.client.id);
    }
}
