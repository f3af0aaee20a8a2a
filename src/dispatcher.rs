use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::aoi_lifecycle;
use crate::compare;
use crate::config::NOTIFY_BATCH_MAX;
use crate::errors::DomainError;
use crate::geometry::Geom;
use crate::index_store::chunked;
use crate::notification_sink::Notification;
use crate::object_store::GeometryRecord;
use crate::work_source::{EnvelopeContent, ObjectRef, WorkItemRecord, parse_envelope};
use crate::worker_context::WorkerContext;

/// Which per-record handler a dispatcher pass runs — the three entry points of §4.6,
/// sharing a single state machine shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Add,
    Delete,
    Compare,
}

/// Outcome of one `run_once` pass, surfaced to the CLI/caller for reporting.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub received: usize,
    pub acknowledged: usize,
    pub test_events_skipped: usize,
    pub failed: usize,
}

/// Receive up to `max_items` work items and drive each through
/// `Received → Loading → Processing → Publishing → Acknowledged` (§4.6). A work
/// item is acknowledged only once every notification for it has published
/// successfully; any earlier failure leaves it for redelivery.
#[instrument(skip(ctx, cancel), fields(kind = ?kind))]
pub async fn run_once(
    ctx: &WorkerContext,
    kind: HandlerKind,
    max_items: usize,
    cancel: &CancellationToken,
) -> Result<DispatchStats, DomainError> {
    let mut stats = DispatchStats::default();

    let items = ctx.work_source.receive_batch(max_items).await?;
    stats.received = items.len();
    metrics::counter!("work_items_received_total").increment(items.len() as u64);

    for item in items {
        if cancel.is_cancelled() {
            warn!("cancellation requested, leaving remaining work items unacknowledged");
            break;
        }

        let started = std::time::Instant::now();
        let outcome = process_item(ctx, kind, &item).await;
        metrics::histogram!("work_item_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(ProcessOutcome::TestEventSkipped) => {
                ctx.work_source.ack(&item.receipt).await?;
                stats.test_events_skipped += 1;
                stats.acknowledged += 1;
                metrics::counter!("work_items_test_event_skipped_total").increment(1);
                metrics::counter!("work_items_acknowledged_total").increment(1);
            }
            Ok(ProcessOutcome::Published) => {
                ctx.work_source.ack(&item.receipt).await?;
                stats.acknowledged += 1;
                metrics::counter!("work_items_acknowledged_total").increment(1);
            }
            Err(err) if err.blocks_ack() => {
                warn!(error = %err, "work item failed, leaving for redelivery");
                stats.failed += 1;
            }
            Err(err) => {
                // A non-blocking domain error reaching this far would never resolve on
                // redelivery, so ack it rather than leaving the source to retry forever.
                warn!(error = %err, "work item failed on a non-blocking error, acknowledging");
                ctx.work_source.ack(&item.receipt).await?;
                stats.acknowledged += 1;
                stats.failed += 1;
                metrics::counter!("work_items_acknowledged_total").increment(1);
            }
        }
    }

    info!(
        received = stats.received,
        acknowledged = stats.acknowledged,
        test_events_skipped = stats.test_events_skipped,
        failed = stats.failed,
        "dispatcher pass complete"
    );
    Ok(stats)
}

enum ProcessOutcome {
    TestEventSkipped,
    Published,
}

async fn process_item(
    ctx: &WorkerContext,
    kind: HandlerKind,
    item: &WorkItemRecord,
) -> Result<ProcessOutcome, DomainError> {
    // Loading
    let content = parse_envelope(&item.body)?;
    let refs = match content {
        EnvelopeContent::TestEvent => return Ok(ProcessOutcome::TestEventSkipped),
        EnvelopeContent::ObjectRefs(refs) => refs,
    };

    let mut records = Vec::new();
    for object_ref in &refs {
        records.extend(fetch(ctx, object_ref).await?);
    }

    // Processing
    let notifications = match kind {
        HandlerKind::Add => process_add(ctx, &records).await,
        HandlerKind::Delete => process_delete(ctx, &records).await,
        HandlerKind::Compare => {
            let source_file = refs.first().map(|r| r.key.as_str()).unwrap_or_default();
            process_compare(ctx, &records, source_file).await?
        }
    };

    // Publishing
    publish_all(ctx, &notifications).await?;
    Ok(ProcessOutcome::Published)
}

async fn fetch(ctx: &WorkerContext, object_ref: &ObjectRef) -> Result<Vec<GeometryRecord>, DomainError> {
    ctx.object_store
        .fetch_records(&object_ref.bucket, &object_ref.key)
        .await
}

async fn process_add(ctx: &WorkerContext, records: &[GeometryRecord]) -> Vec<Notification> {
    let mut notifications = Vec::with_capacity(records.len());
    for record in records {
        let notification = match Geom::from_wkb(&record.geometry_wkb) {
            Ok(geom) => {
                let payload = geom.to_geojson_string();
                match aoi_lifecycle::upsert(&ctx.index_store, &record.pk_and_model, &geom, &payload).await {
                    Ok(outcome) => outcome.notification,
                    Err(err) => {
                        metrics::counter!("records_add_failed_total").increment(1);
                        Notification::add_failed(&record.pk_and_model, &err)
                    }
                }
            }
            Err(err) => {
                metrics::counter!("records_add_failed_total").increment(1);
                Notification::add_failed(&record.pk_and_model, &err)
            }
        };
        notifications.push(notification);
    }
    notifications
}

async fn process_delete(ctx: &WorkerContext, records: &[GeometryRecord]) -> Vec<Notification> {
    let mut notifications = Vec::with_capacity(records.len());
    for record in records {
        let notification = match aoi_lifecycle::delete(&ctx.index_store, &record.pk_and_model).await {
            Ok(outcome) => outcome.notification,
            Err(err) => {
                metrics::counter!("records_delete_failed_total").increment(1);
                Notification::delete_failed(&record.pk_and_model, &err)
            }
        };
        notifications.push(notification);
    }
    notifications
}

async fn process_compare(
    ctx: &WorkerContext,
    records: &[GeometryRecord],
    source_file: &str,
) -> Result<Vec<Notification>, DomainError> {
    // One Compare Engine invocation per work item, accumulating every record's
    // tiles, per §4.6. `source_file` is the object key the tiles were loaded from
    // (§6), not a tile key.
    let outcome = compare::compare(&ctx.index_store, records, source_file).await?;
    Ok(outcome.notifications)
}

async fn publish_all(ctx: &WorkerContext, notifications: &[Notification]) -> Result<(), DomainError> {
    for batch in chunked(notifications, NOTIFY_BATCH_MAX) {
        let failed = ctx.notification_sink.publish_batch(&batch).await?;
        if !failed.is_empty() {
            metrics::counter!("notifications_publish_failed_total").increment(failed.len() as u64);
            return Err(DomainError::SinkUnavailable(format!(
                "{} of {} entries rejected",
                failed.len(),
                batch.len()
            )));
        }
        metrics::counter!("notifications_published_total").increment(batch.len() as u64);
    }
    Ok(())
}
