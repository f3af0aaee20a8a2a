use async_trait::async_trait;

use crate::config::H3_QUERY_MAX;
use crate::errors::DomainError;

/// One row of the index: `(h3_id, pk_and_model, polygon_payload)` (§3). Primary key
/// is the composite `(h3_id, pk_and_model)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row {
    pub h3_id: String,
    pub pk_and_model: String,
    pub polygon_payload: String,
}

/// The persistent key/value table the AOI Lifecycle and Compare Engine operate on
/// (§4.3). Implementations are expected to retry their own transient failures
/// internally and only surface `DomainError::StoreUnavailable` once the retry budget
/// is exhausted.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Idempotent insertion, already chunked to at most `INDEX_BATCH_MAX` rows by the
    /// caller (AOI Lifecycle, §4.4). Implementations must retry any rows reported as
    /// unprocessed by the backend until none remain or the retry budget is spent.
    async fn put_batch(&self, rows: &[Row]) -> Result<(), DomainError>;

    /// Returns every row whose `h3_id` is in `h3_ids`. The caller is not required to
    /// pre-chunk; implementations chunk to `H3_QUERY_MAX` per backend call and
    /// de-duplicate the concatenated results on primary key.
    async fn query_by_h3_set(&self, h3_ids: &[String]) -> Result<Vec<Row>, DomainError>;

    /// Returns every row for the given AOI key via the secondary index. May be
    /// eventually consistent (§4.3).
    async fn scan_by_aoi(&self, pk_and_model: &str) -> Result<Vec<Row>, DomainError>;

    /// Removes one row by primary key.
    async fn delete(&self, h3_id: &str, pk_and_model: &str) -> Result<(), DomainError>;
}

/// Split `items` into chunks of at most `size`, the shape used for both the
/// `INDEX_BATCH_MAX` put-batch chunking and the `H3_QUERY_MAX` query chunking (§4.3).
pub fn chunked<T: Clone>(items: &[T], size: usize) -> impl Iterator<Item = Vec<T>> + '_ {
    items.chunks(size.max(1)).map(|c| c.to_vec())
}

pub fn chunked_h3_query<T: Clone>(items: &[T]) -> impl Iterator<Item = Vec<T>> + '_ {
    chunked(items, H3_QUERY_MAX)
}
