use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::INDEX_BATCH_MAX;
use crate::errors::DomainError;
use crate::geometry::Geom;
use crate::h3_cover::cover_ids;
use crate::index_store::{IndexStore, Row, chunked};
use crate::notification_sink::Notification;

/// Result of an upsert or delete, carried back to the dispatcher to build the
/// success/failure notification (§4.4).
pub struct LifecycleOutcome {
    pub notification: Notification,
}

/// `upsert(pk_and_model, polygon)` (§4.4): compute the new cover, delete every
/// existing row for this AOI, then insert the new cover. This is the delete-then-insert
/// policy; see DESIGN.md for why the two-phase (insert-then-reconcile) alternative was
/// not chosen.
#[instrument(skip(store, polygon_payload), fields(aoi = %pk_and_model))]
pub async fn upsert(
    store: &Arc<dyn IndexStore>,
    pk_and_model: &str,
    geom: &Geom,
    polygon_payload: &str,
) -> Result<LifecycleOutcome, DomainError> {
    let cells = cover_ids(geom)?;

    let existing = store.scan_by_aoi(pk_and_model).await?;
    for row in &existing {
        store.delete(&row.h3_id, &row.pk_and_model).await?;
    }

    let new_rows: Vec<Row> = cells
        .iter()
        .map(|h3_id| Row {
            h3_id: h3_id.clone(),
            pk_and_model: pk_and_model.to_string(),
            polygon_payload: polygon_payload.to_string(),
        })
        .collect();

    for chunk in chunked(&new_rows, INDEX_BATCH_MAX) {
        store.put_batch(&chunk).await?;
    }

    info!(cells = cells.len(), "AOI upserted");
    metrics::counter!("records_add_succeeded_total").increment(1);

    Ok(LifecycleOutcome {
        notification: Notification::add_succeeded(pk_and_model, cells),
    })
}

/// `delete(pk_and_model)` (§4.4): idempotent — deleting an AOI with no rows succeeds
/// without effect.
#[instrument(skip(store), fields(aoi = %pk_and_model))]
pub async fn delete(
    store: &Arc<dyn IndexStore>,
    pk_and_model: &str,
) -> Result<LifecycleOutcome, DomainError> {
    let existing = store.scan_by_aoi(pk_and_model).await?;
    if existing.is_empty() {
        info!("delete is a no-op, AOI not found");
        metrics::counter!("records_delete_succeeded_total").increment(1);
        return Ok(LifecycleOutcome {
            notification: Notification::delete_succeeded(pk_and_model),
        });
    }

    for row in &existing {
        store.delete(&row.h3_id, &row.pk_and_model).await?;
    }

    info!(rows_removed = existing.len(), "AOI deleted");
    metrics::counter!("records_delete_succeeded_total").increment(1);

    Ok(LifecycleOutcome {
        notification: Notification::delete_succeeded(pk_and_model),
    })
}
