use std::fmt;

/// Domain error kinds shared across the geometry engine and the dispatcher.
///
/// Mirrors the plain-enum-plus-manual-`Display` error idiom used throughout this
/// codebase rather than a derive-macro error crate: each variant maps directly to one
/// of the handling policies in the dispatcher (per-record failure notification,
/// work-item redelivery, or fatal startup error).
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Input geometry could not be parsed, or parsed to an empty/degenerate shape.
    InvalidGeometry(String),
    /// Index store call failed in a way that is expected to succeed on retry.
    StoreTransient(String),
    /// Index store call exhausted its retry budget.
    StoreUnavailable(String),
    /// Notification sink is not reachable or rejected the whole batch.
    SinkUnavailable(String),
    /// Object store (bulk payload) is not reachable.
    ObjectStoreUnavailable(String),
    /// Required configuration is missing or invalid at worker start.
    Config(String),
    /// A work item's payload could not be decoded into the expected envelope shape.
    PayloadMalformed(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::InvalidGeometry(msg) => write!(f, "invalid geometry: {msg}"),
            DomainError::StoreTransient(msg) => write!(f, "transient store error: {msg}"),
            DomainError::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            DomainError::SinkUnavailable(msg) => write!(f, "notification sink unavailable: {msg}"),
            DomainError::ObjectStoreUnavailable(msg) => {
                write!(f, "object store unavailable: {msg}")
            }
            DomainError::Config(msg) => write!(f, "configuration error: {msg}"),
            DomainError::PayloadMalformed(msg) => write!(f, "malformed payload: {msg}"),
        }
    }
}

impl std::error::Error for DomainError {}

impl DomainError {
    /// Whether this error kind should prevent acknowledging the enclosing work item,
    /// leaving it for redelivery by the host queue (§7). `PayloadMalformed` blocks ack
    /// on its first attempt too — the source's own dead-letter policy is what
    /// eventually stops redelivery, not an ack from this worker.
    pub fn blocks_ack(&self) -> bool {
        matches!(
            self,
            DomainError::StoreUnavailable(_)
                | DomainError::SinkUnavailable(_)
                | DomainError::ObjectStoreUnavailable(_)
                | DomainError::PayloadMalformed(_)
        )
    }
}

/// The outcome of processing a single record within a work item: either a value, or a
/// domain error to be reported as a failure notification while the dispatcher
/// continues with the remaining records. Replaces the exception-for-control-flow
/// pattern of the source system (§9).
pub enum RecordResult<T> {
    Ok(T),
    Fail(DomainError),
}

impl<T> RecordResult<T> {
    pub fn ok(value: T) -> Self {
        RecordResult::Ok(value)
    }

    pub fn fail(err: DomainError) -> Self {
        RecordResult::Fail(err)
    }
}
