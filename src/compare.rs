use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, instrument};

use crate::errors::{DomainError, RecordResult};
use crate::geometry::{self, Geom};
use crate::h3_cover::cover_ids;
use crate::index_store::{IndexStore, chunked_h3_query};
use crate::notification_sink::{Notification, split_compare_notifications};
use crate::object_store::GeometryRecord;

/// One compare query tile, decoded from an object payload record (§4.5), with its H3
/// cover precomputed so a tile whose cover fails (e.g. antimeridian-crossing) can be
/// reported as a per-tile failure before it ever reaches the query/intersect stages.
pub struct Tile {
    pub tile_key: String,
    pub geom: Geom,
    pub cells: HashSet<String>,
}

/// Outcome of comparing one work item's tiles against the index (§4.5): a
/// per-AOI list of intersecting tiles, plus a failure notification for any tile
/// whose geometry could not be decoded.
pub struct CompareOutcome {
    pub notifications: Vec<Notification>,
}

/// `compare(tiles, source_file) -> map<aoi_key, list<tile_key>>` (§4.5):
///
/// 1. Cover every decodable tile and collect the union of cells to query.
/// 2. Batch-query the index store for rows under any of those cells
///    (`chunked_h3_query`, `H3_QUERY_MAX` per call).
/// 3. Group the returned rows by AOI, since a single AOI's cover usually spans
///    many cells and the Compare Engine must test it against a tile only once.
/// 4. For each (AOI, tile) pair that shares at least one cell, run the exact
///    polygon intersects predicate; only confirmed intersections are reported.
/// 5. Tiles that failed to decode are reported individually rather than
///    failing the whole batch (§4.5 edge case).
#[instrument(skip(store, records), fields(source_file, tiles = records.len()))]
pub async fn compare(
    store: &Arc<dyn IndexStore>,
    records: &[GeometryRecord],
    source_file: &str,
) -> Result<CompareOutcome, DomainError> {
    let mut tiles = Vec::with_capacity(records.len());
    let mut notifications = Vec::new();

    for record in records {
        match decode_tile(record) {
            RecordResult::Ok(tile) => tiles.push(tile),
            RecordResult::Fail(err) => {
                metrics::counter!("records_compare_tile_failed_total").increment(1);
                notifications.push(Notification::compare_tile_failed(&record.pk_and_model, &err));
            }
        }
    }

    if tiles.is_empty() {
        return Ok(CompareOutcome { notifications });
    }

    let all_cells: HashSet<String> = tiles.iter().flat_map(|t| t.cells.iter().cloned()).collect();
    let all_cells: Vec<String> = all_cells.into_iter().collect();
    let mut aoi_rows: HashMap<String, (String, HashSet<String>)> = HashMap::new();
    for chunk in chunked_h3_query(&all_cells) {
        for row in store.query_by_h3_set(&chunk).await? {
            let entry = aoi_rows
                .entry(row.pk_and_model.clone())
                .or_insert_with(|| (row.polygon_payload.clone(), HashSet::new()));
            entry.1.insert(row.h3_id);
        }
    }

    // aoi_key -> list of intersecting tile keys
    let mut affected: HashMap<String, Vec<String>> = HashMap::new();
    for (aoi_key, (polygon_payload, hit_cells)) in &aoi_rows {
        let aoi_geom = match Geom::from_geojson_str(polygon_payload) {
            Ok(g) => g,
            Err(_) => continue,
        };
        for tile in &tiles {
            let shares_a_cell = tile.cells.intersection(hit_cells).next().is_some();
            if shares_a_cell && geometry::intersects(&aoi_geom, &tile.geom) {
                affected
                    .entry(aoi_key.clone())
                    .or_default()
                    .push(tile.tile_key.clone());
            }
        }
    }

    for (aoi_id, mut tile_keys) in affected {
        tile_keys.sort();
        notifications.extend(split_compare_notifications(&aoi_id, source_file, &tile_keys));
    }

    info!(
        tiles_decoded = tiles.len(),
        notifications = notifications.len(),
        "compare completed"
    );

    Ok(CompareOutcome { notifications })
}

fn decode_tile(record: &GeometryRecord) -> RecordResult<Tile> {
    let geom = match Geom::from_wkb(&record.geometry_wkb) {
        Ok(geom) => geom,
        Err(err) => return RecordResult::fail(err),
    };
    let cells = match cover_ids(&geom) {
        Ok(cells) => cells,
        Err(err) => return RecordResult::fail(err),
    };
    RecordResult::ok(Tile {
        tile_key: record.pk_and_model.clone(),
        geom,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aoi_lifecycle::upsert;
    use crate::index_store_memory::MemoryIndexStore;

    fn square_geojson(x0: f64, y0: f64, x1: f64, y1: f64) -> String {
        format!(
            r#"{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}"#
        )
    }

    fn square_wkb(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<u8> {
        let geom = Geom::from_geojson_str(&square_geojson(x0, y0, x1, y1)).unwrap();
        let Geom::Polygon(p) = geom else { unreachable!() };
        wkb::geom_to_wkb(&geo_types::Geometry::Polygon(p)).unwrap()
    }

    #[tokio::test]
    async fn intersecting_tile_is_reported() {
        let store: Arc<dyn IndexStore> = Arc::new(MemoryIndexStore::new());
        let aoi_geom = Geom::from_geojson_str(&square_geojson(-70.6, 41.3, -70.5, 41.4)).unwrap();
        let aoi_payload = square_geojson(-70.6, 41.3, -70.5, 41.4);
        upsert(&store, "raster_1234", &aoi_geom, &aoi_payload).await.unwrap();

        let tile_bytes = square_wkb(-70.59, 41.31, -70.58, 41.32);
        let records = vec![GeometryRecord {
            pk_and_model: "tile_a".into(),
            geometry_wkb: tile_bytes,
        }];

        let outcome = compare(&store, &records, "key.parquet").await.unwrap();
        assert!(!outcome.notifications.is_empty());
    }

    #[tokio::test]
    async fn disjoint_tile_yields_no_notification() {
        let store: Arc<dyn IndexStore> = Arc::new(MemoryIndexStore::new());
        let aoi_geom = Geom::from_geojson_str(&square_geojson(-70.6, 41.3, -70.5, 41.4)).unwrap();
        let aoi_payload = square_geojson(-70.6, 41.3, -70.5, 41.4);
        upsert(&store, "raster_1234", &aoi_geom, &aoi_payload).await.unwrap();

        let tile_bytes = square_wkb(-123.1, 44.0, -123.0, 44.1);
        let records = vec![GeometryRecord {
            pk_and_model: "tile_b".into(),
            geometry_wkb: tile_bytes,
        }];

        let outcome = compare(&store, &records, "key.parquet").await.unwrap();
        assert!(outcome.notifications.is_empty());
    }

    #[tokio::test]
    async fn malformed_tile_produces_per_tile_failure() {
        let store: Arc<dyn IndexStore> = Arc::new(MemoryIndexStore::new());
        let records = vec![GeometryRecord {
            pk_and_model: "tile_bad".into(),
            geometry_wkb: vec![1, 2, 3],
        }];

        let outcome = compare(&store, &records, "key.parquet").await.unwrap();
        assert_eq!(outcome.notifications.len(), 1);
    }

    #[tokio::test]
    async fn uncoverable_tile_does_not_abort_the_rest_of_the_batch() {
        let store: Arc<dyn IndexStore> = Arc::new(MemoryIndexStore::new());
        let aoi_geom = Geom::from_geojson_str(&square_geojson(-70.6, 41.3, -70.5, 41.4)).unwrap();
        let aoi_payload = square_geojson(-70.6, 41.3, -70.5, 41.4);
        upsert(&store, "raster_1234", &aoi_geom, &aoi_payload).await.unwrap();

        // Crosses the antimeridian, so its H3 cover fails rather than its WKB decode.
        let antimeridian_bytes = square_wkb(179.0, 0.0, -179.0, 1.0);
        let good_bytes = square_wkb(-70.59, 41.31, -70.58, 41.32);
        let records = vec![
            GeometryRecord {
                pk_and_model: "tile_antimeridian".into(),
                geometry_wkb: antimeridian_bytes,
            },
            GeometryRecord {
                pk_and_model: "tile_good".into(),
                geometry_wkb: good_bytes,
            },
        ];

        let outcome = compare(&store, &records, "key.parquet").await.unwrap();
        assert!(
            outcome.notifications.iter().any(|n| n.body.contains("tile_antimeridian")),
            "uncoverable tile must yield its own failure notification"
        );
        assert!(
            outcome
                .notifications
                .iter()
                .any(|n| n.attributes.iter().any(|(k, v)| k == "aoi_id"
                    && matches!(v, crate::notification_sink::AttributeValue::Str(s) if s == "raster_1234"))),
            "the remaining tile must still be compared against the index"
        );
    }
}
