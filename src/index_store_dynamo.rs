use std::collections::{HashMap, HashSet};

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{H3_QUERY_MAX, INDEX_BATCH_MAX};
use crate::errors::DomainError;
use crate::index_store::{IndexStore, Row, chunked};
use crate::retry::with_retry;

/// DynamoDB-backed `IndexStore`, the production implementation of §4.3. The table is
/// keyed on `(h3_id, pk_and_model)` with a `pk_and_model` global secondary index
/// (named `pk_and_model`, matching the original table layout).
pub struct DynamoIndexStore {
    client: Client,
    table_name: String,
}

impl DynamoIndexStore {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    fn classify_sdk_err<E: std::fmt::Display>(operation: &str, err: E) -> DomainError {
        // DynamoDB throttling/5xx surface as retryable SdkError variants; anything
        // else (validation, access denied) is not worth retrying.
        DomainError::StoreTransient(format!("{operation}: {err}"))
    }
}

#[async_trait]
impl IndexStore for DynamoIndexStore {
    async fn put_batch(&self, rows: &[Row]) -> Result<(), DomainError> {
        if rows.is_empty() {
            return Ok(());
        }
        assert!(
            rows.len() <= INDEX_BATCH_MAX,
            "put_batch called with more than INDEX_BATCH_MAX rows"
        );

        // A partial batch_write_item response enumerates rows DynamoDB didn't get to;
        // those are resubmitted as the next attempt's batch until none remain or the
        // retry budget (§4.3) is spent.
        let mut pending: Vec<Row> = rows.to_vec();

        while !pending.is_empty() {
            let batch = pending.clone();
            let unprocessed = with_retry("put_batch", || {
                let batch = batch.clone();
                async move {
                    let write_requests: Vec<WriteRequest> = batch.iter().map(to_write_request).collect();

                    let resp = self
                        .client
                        .batch_write_item()
                        .request_items(&self.table_name, write_requests)
                        .send()
                        .await
                        .map_err(|e| Self::classify_sdk_err("batch_write_item", e))?;

                    let unprocessed = resp
                        .unprocessed_items
                        .and_then(|mut m| m.remove(&self.table_name))
                        .unwrap_or_default();
                    Ok(unprocessed)
                }
            })
            .await?;

            pending = unprocessed
                .iter()
                .filter_map(|w| w.put_request.as_ref())
                .filter_map(|p| row_from_item(&p.item))
                .collect();
        }

        debug!(rows = rows.len(), table = %self.table_name, "put_batch complete");
        Ok(())
    }

    async fn query_by_h3_set(&self, h3_ids: &[String]) -> Result<Vec<Row>, DomainError> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut out = Vec::new();

        for chunk in chunked(h3_ids, H3_QUERY_MAX) {
            let chunk_owned = chunk.clone();
            let rows = with_retry("query_by_h3_set", || {
                let chunk = chunk_owned.clone();
                async move {
                    let placeholders: Vec<String> =
                        (0..chunk.len()).map(|i| format!(":h{i}")).collect();
                    let statement = format!(
                        "SELECT * FROM \"{}\" WHERE h3_id IN [{}]",
                        self.table_name,
                        placeholders.join(", ")
                    );
                    let params: Vec<AttributeValue> =
                        chunk.iter().map(|id| AttributeValue::S(id.clone())).collect();

                    let resp = self
                        .client
                        .execute_statement()
                        .statement(statement)
                        .set_parameters(Some(params))
                        .send()
                        .await
                        .map_err(|e| Self::classify_sdk_err("execute_statement", e))?;

                    let items = resp.items.unwrap_or_default();
                    let rows: Vec<Row> = items.iter().filter_map(row_from_item).collect();
                    Ok(rows)
                }
            })
            .await?;

            for row in rows {
                let key = (row.h3_id.clone(), row.pk_and_model.clone());
                if seen.insert(key) {
                    out.push(row);
                }
            }
        }

        info!(cells = h3_ids.len(), rows = out.len(), "query_by_h3_set complete");
        Ok(out)
    }

    async fn scan_by_aoi(&self, pk_and_model: &str) -> Result<Vec<Row>, DomainError> {
        let pk_and_model = pk_and_model.to_string();
        with_retry("scan_by_aoi", || {
            let pk_and_model = pk_and_model.clone();
            async move {
                let resp = self
                    .client
                    .scan()
                    .table_name(&self.table_name)
                    .index_name("pk_and_model")
                    .filter_expression("pk_and_model = :pk_and_model")
                    .expression_attribute_values(":pk_and_model", AttributeValue::S(pk_and_model))
                    .send()
                    .await
                    .map_err(|e| Self::classify_sdk_err("scan", e))?;

                let items = resp.items.unwrap_or_default();
                Ok(items.iter().filter_map(row_from_item).collect::<Vec<Row>>())
            }
        })
        .await
    }

    async fn delete(&self, h3_id: &str, pk_and_model: &str) -> Result<(), DomainError> {
        let h3_id = h3_id.to_string();
        let pk_and_model = pk_and_model.to_string();
        with_retry("delete_item", || {
            let h3_id = h3_id.clone();
            let pk_and_model = pk_and_model.clone();
            async move {
                self.client
                    .delete_item()
                    .table_name(&self.table_name)
                    .key("h3_id", AttributeValue::S(h3_id))
                    .key("pk_and_model", AttributeValue::S(pk_and_model))
                    .send()
                    .await
                    .map_err(|e| Self::classify_sdk_err("delete_item", e))?;
                Ok(())
            }
        })
        .await
    }
}

fn to_write_request(row: &Row) -> WriteRequest {
    let item = HashMap::from([
        ("h3_id".to_string(), AttributeValue::S(row.h3_id.clone())),
        (
            "pk_and_model".to_string(),
            AttributeValue::S(row.pk_and_model.clone()),
        ),
        (
            "polygon".to_string(),
            AttributeValue::S(row.polygon_payload.clone()),
        ),
    ]);
    WriteRequest::builder()
        .put_request(PutRequest::builder().set_item(Some(item)).build().unwrap())
        .build()
}

fn row_from_item(item: &HashMap<String, AttributeValue>) -> Option<Row> {
    let h3_id = item.get("h3_id")?.as_s().ok()?.clone();
    let pk_and_model = item.get("pk_and_model")?.as_s().ok()?.clone();
    let polygon_payload = item.get("polygon")?.as_s().ok()?.clone();
    Some(Row {
        h3_id,
        pk_and_model,
        polygon_payload,
    })
}
