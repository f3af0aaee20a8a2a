use std::sync::Arc;

use crate::index_store::IndexStore;
use crate::notification_sink::NotificationSink;
use crate::object_store::ObjectStore;
use crate::work_source::WorkSource;

/// The dispatcher's four collaborators, constructed once per worker process and
/// passed by reference rather than reached for through a process-wide singleton
/// (§9 Design Note). Each field is an `Arc<dyn Trait>` so the same context can be
/// cloned cheaply across concurrently running workers and swapped for in-memory
/// fakes in tests.
#[derive(Clone)]
pub struct WorkerContext {
    pub index_store: Arc<dyn IndexStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub notification_sink: Arc<dyn NotificationSink>,
    pub work_source: Arc<dyn WorkSource>,
}

impl WorkerContext {
    pub fn new(
        index_store: Arc<dyn IndexStore>,
        object_store: Arc<dyn ObjectStore>,
        notification_sink: Arc<dyn NotificationSink>,
        work_source: Arc<dyn WorkSource>,
    ) -> Self {
        Self {
            index_store,
            object_store,
            notification_sink,
            work_source,
        }
    }
}
