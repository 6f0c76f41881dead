//! Server-side state of one connected browser.

use crate::config::StreamConfig;
use crate::connection::{ClientId, FrameWriter, RequestContext, UserId};
use crate::error::{Error, StreamErrorKind};
use bytes::Bytes;
use log::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tokio_util::sync::CancellationToken;

/// Outcome of offering a frame to a client's send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue stayed full for the whole send timeout; the frame was dropped
    /// and the client is now quarantined as slow.
    Slow,
    Closed,
}

enum WriteOutcome {
    Written,
    Failed(Error),
    Cancelled,
}

pub struct Client {
    pub id: ClientId,
    pub user_id: UserId,
    pub org_id: String,
    pub bu_id: String,
    writer: FrameWriter,
    queue: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    send_timeout: Duration,
    max_write_errors: u32,
    slow: AtomicBool,
    error_count: AtomicU32,
    closed: AtomicBool,
}

impl Client {
    /// Builds a client and the receiving end of its send queue, which belongs
    /// to the writer task.
    pub(crate) fn new(
        id: ClientId,
        request_ctx: &RequestContext,
        writer: FrameWriter,
        cancel: CancellationToken,
        config: &StreamConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (queue, receiver) = mpsc::channel(config.send_queue_capacity);
        let client = Arc::new(Self {
            id,
            user_id: request_ctx.user_id.clone(),
            org_id: request_ctx.org_id.clone(),
            bu_id: request_ctx.bu_id.clone(),
            writer,
            queue,
            cancel,
            send_timeout: config.send_timeout,
            max_write_errors: config.max_write_errors,
            slow: AtomicBool::new(false),
            error_count: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });
        (client, receiver)
    }

    pub fn is_slow(&self) -> bool {
        self.slow.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn writer(&self) -> &FrameWriter {
        &self.writer
    }

    /// Stops any further sends and ends the client's session.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Offers `frame` to the send queue without ever blocking longer than the
    /// send timeout.
    pub(crate) async fn enqueue(&self, frame: Bytes) -> Delivery {
        if self.is_closed() || self.cancel.is_cancelled() {
            return Delivery::Closed;
        }

        let frame = match self.queue.try_send(frame) {
            Ok(()) => return Delivery::Queued,
            Err(TrySendError::Closed(_)) => return Delivery::Closed,
            Err(TrySendError::Full(frame)) => frame,
        };

        tokio::select! {
            result = self.queue.send_timeout(frame, self.send_timeout) => match result {
                Ok(()) => Delivery::Queued,
                Err(SendTimeoutError::Timeout(_)) => {
                    self.slow.store(true, Ordering::Release);
                    warn!("Client {} queue full, marked as slow", self.id);
                    Delivery::Slow
                }
                Err(SendTimeoutError::Closed(_)) => Delivery::Closed,
            },
            _ = self.cancel.cancelled() => Delivery::Closed,
        }
    }

    /// Writes straight to the connection, bypassing the send queue.
    pub(crate) async fn write_direct(&self, frame: Bytes) -> Result<(), Error> {
        tokio::select! {
            result = self.writer.write(frame) => result,
            _ = self.cancel.cancelled() => Err(Error::new(StreamErrorKind::ConnectionClosed)),
        }
    }

    /// Drains the send queue to the connection until the queue closes or the
    /// client is cancelled. Owns the queue's receiving end, so the queue is
    /// closed here and nowhere else.
    pub(crate) async fn run_writer(self: Arc<Self>, mut queue: mpsc::Receiver<Bytes>) {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = queue.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            match self.write_with_timeout(frame).await {
                WriteOutcome::Written => {
                    self.error_count.store(0, Ordering::Release);
                    if self.slow.swap(false, Ordering::AcqRel) {
                        debug!("Client {} caught up, no longer slow", self.id);
                    }
                }
                WriteOutcome::Failed(err) => {
                    let errors = self.error_count.fetch_add(1, Ordering::AcqRel) + 1;
                    if err.is_connection_closed() {
                        debug!("Client {} disconnected while sending", self.id);
                    } else {
                        warn!("Error sending to client {}: {err}", self.id);
                    }
                    if errors >= self.max_write_errors || self.is_slow() {
                        self.cancel.cancel();
                        break;
                    }
                }
                WriteOutcome::Cancelled => break,
            }
        }

        self.closed.store(true, Ordering::Release);
        queue.close();
        trace!("Writer for client {} exited", self.id);
    }

    /// Keeps waiting on a write that outlives the send timeout, but flags the
    /// client as slow once the timeout passes.
    async fn write_with_timeout(&self, frame: Bytes) -> WriteOutcome {
        let write = self.writer.write(frame);
        tokio::pin!(write);
        let timeout = tokio::time::sleep(self.send_timeout);
        tokio::pin!(timeout);
        let mut timed_out = false;

        loop {
            tokio::select! {
                result = &mut write => {
                    return match result {
                        Ok(()) => WriteOutcome::Written,
                        Err(err) => WriteOutcome::Failed(err),
                    };
                }
                _ = &mut timeout, if !timed_out => {
                    timed_out = true;
                    self.slow.store(true, Ordering::Release);
                    warn!("Client {} is slow, send timeout reached", self.id);
                }
                _ = self.cancel.cancelled() => return WriteOutcome::Cancelled,
            }
        }
    }
}
