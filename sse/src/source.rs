use crate::connection::RequestContext;
use crate::error::Error;
use crate::item::Identifiable;
use async_trait::async_trait;
use serde::Serialize;

/// The caller-supplied side of a stream: how to fetch the current items for a
/// tenant and how to read an item's timestamp.
///
/// `fetch` is never called re-entrantly for one stream; the poller waits for
/// it to return before the next tick. The poller abandons an in-flight fetch
/// when the stream is cancelled.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    type Item: Identifiable + Serialize + Send + Sync + 'static;

    async fn fetch(&self, request_ctx: &RequestContext) -> Result<Vec<Self::Item>, Error>;

    /// Epoch seconds, non-decreasing with respect to the source of truth
    /// (typically an `updated_at` column). Need not be unique.
    fn timestamp_of(&self, item: &Self::Item) -> i64;
}
