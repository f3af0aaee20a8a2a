use std::collections::HashSet;

use async_trait::async_trait;
use aws_sdk_sns::Client;
use aws_sdk_sns::types::{MessageAttributeValue, PublishBatchRequestEntry};
use tracing::info;

use crate::errors::DomainError;
use crate::retry::with_retry;

/// One outbound notification (§6). `status` is always either `"succeeded"` or
/// `"failed"`; the remaining attributes vary by which handler produced it.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub body: String,
    pub message_group_id: Option<String>,
    pub attributes: Vec<(String, AttributeValue)>,
}

#[derive(Debug, Clone)]
pub enum AttributeValue {
    Str(String),
    StrArray(Vec<String>),
}

impl Notification {
    pub fn add_succeeded(aoi: &str, h3_indices: HashSet<String>) -> Self {
        let mut indices: Vec<String> = h3_indices.into_iter().collect();
        indices.sort();
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            body: format!("AOI: {aoi} added"),
            message_group_id: None,
            attributes: vec![
                ("aoi".into(), AttributeValue::Str(aoi.to_string())),
                ("h3_indices".into(), AttributeValue::StrArray(indices)),
                ("status".into(), AttributeValue::Str("succeeded".into())),
            ],
        }
    }

    pub fn add_failed(aoi: &str, error: &DomainError) -> Self {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            body: format!("Failed to add AOI: {aoi}"),
            message_group_id: None,
            attributes: vec![
                ("aoi".into(), AttributeValue::Str(aoi.to_string())),
                ("status".into(), AttributeValue::Str("failed".into())),
                ("error".into(), AttributeValue::Str(error.to_string())),
            ],
        }
    }

    pub fn delete_succeeded(aoi: &str) -> Self {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            body: format!("AOI: {aoi} deleted"),
            message_group_id: None,
            attributes: vec![
                ("aoi".into(), AttributeValue::Str(aoi.to_string())),
                ("status".into(), AttributeValue::Str("succeeded".into())),
            ],
        }
    }

    pub fn delete_failed(aoi: &str, error: &DomainError) -> Self {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            body: format!("Failed to delete AOI: {aoi}"),
            message_group_id: None,
            attributes: vec![
                ("aoi".into(), AttributeValue::Str(aoi.to_string())),
                ("status".into(), AttributeValue::Str("failed".into())),
                ("error".into(), AttributeValue::Str(error.to_string())),
            ],
        }
    }

    /// One compare-result notification, split across multiple instances by
    /// `split_compare_notifications` when `tiles` is too large (§4.5).
    pub fn compare_succeeded(aoi_id: &str, source_file: &str, tiles: &[String]) -> Self {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            body: format!("{aoi_id}: {} intersecting tiles", tiles.len()),
            message_group_id: Some("compare".into()),
            attributes: vec![
                ("aoi_id".into(), AttributeValue::Str(aoi_id.to_string())),
                (
                    "source_file".into(),
                    AttributeValue::Str(source_file.to_string()),
                ),
                ("tiles".into(), AttributeValue::StrArray(tiles.to_vec())),
                ("status".into(), AttributeValue::Str("succeeded".into())),
            ],
        }
    }

    pub fn compare_tile_failed(tile_key: &str, error: &DomainError) -> Self {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            body: format!("Failed to compare tile: {tile_key}"),
            message_group_id: Some("compare".into()),
            attributes: vec![
                ("status".into(), AttributeValue::Str("failed".into())),
                ("error".into(), AttributeValue::Str(error.to_string())),
            ],
        }
    }

    /// Rough size of the attributes, used to decide whether a compare notification
    /// must be split (§4.5).
    pub fn attributes_size(&self) -> usize {
        self.attributes
            .iter()
            .map(|(k, v)| {
                k.len()
                    + match v {
                        AttributeValue::Str(s) => s.len(),
                        AttributeValue::StrArray(items) => items.iter().map(String::len).sum(),
                    }
            })
            .sum()
    }
}

/// Publishes result batches with per-message attributes (§6); an abstract interface,
/// one work-item-less dependency of the Dispatcher.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish a batch of at most `NOTIFY_BATCH_MAX` notifications. Returns the ids of
    /// entries the sink failed to accept; a non-empty return causes the enclosing
    /// work item to fail (not-acked) per §4.6.
    async fn publish_batch(&self, notifications: &[Notification]) -> Result<Vec<String>, DomainError>;
}

pub struct SnsNotificationSink {
    client: Client,
    topic_arn: String,
}

impl SnsNotificationSink {
    pub fn new(client: Client, topic_arn: String) -> Self {
        Self { client, topic_arn }
    }
}

#[async_trait]
impl NotificationSink for SnsNotificationSink {
    async fn publish_batch(&self, notifications: &[Notification]) -> Result<Vec<String>, DomainError> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<PublishBatchRequestEntry> = notifications
            .iter()
            .map(|n| {
                let mut builder = PublishBatchRequestEntry::builder()
                    .id(&n.id)
                    .message(&n.body);
                if let Some(group) = &n.message_group_id {
                    builder = builder.message_group_id(group);
                }
                for (key, value) in &n.attributes {
                    let attr = match value {
                        AttributeValue::Str(s) => MessageAttributeValue::builder()
                            .data_type("String")
                            .string_value(s)
                            .build()
                            .unwrap(),
                        AttributeValue::StrArray(items) => MessageAttributeValue::builder()
                            .data_type("String.Array")
                            .string_value(serde_json::to_string(items).unwrap_or_default())
                            .build()
                            .unwrap(),
                    };
                    builder = builder.message_attributes(key, attr);
                }
                builder.build().unwrap()
            })
            .collect();

        let total = notifications.len();
        let resp = with_retry("publish_batch", || {
            let entries = entries.clone();
            async move {
                self.client
                    .publish_batch()
                    .topic_arn(&self.topic_arn)
                    .publish_batch_request_entries(entries)
                    .send()
                    .await
                    .map_err(|e| DomainError::SinkUnavailable(format!("publish_batch: {e}")))
            }
        })
        .await?;

        let failed: Vec<String> = resp
            .failed
            .unwrap_or_default()
            .into_iter()
            .filter_map(|f| f.id)
            .collect();

        info!(
            sent = total - failed.len(),
            failed = failed.len(),
            "published notification batch"
        );

        Ok(failed)
    }
}

/// Split a compare result's tile list across multiple notifications so each stays
/// under the attribute-size limit (§4.5 edge case).
pub fn split_compare_notifications(
    aoi_id: &str,
    source_file: &str,
    tiles: &[String],
) -> Vec<Notification> {
    use crate::config::NOTIFY_PAYLOAD_MAX_BYTES;

    let mut out = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_size = 0usize;

    for tile in tiles {
        let added = tile.len() + 1;
        if !current.is_empty() && current_size + added > NOTIFY_PAYLOAD_MAX_BYTES {
            out.push(Notification::compare_succeeded(aoi_id, source_file, &current));
            current = Vec::new();
            current_size = 0;
        }
        current.push(tile.clone());
        current_size += added;
    }
    if !current.is_empty() {
        out.push(Notification::compare_succeeded(aoi_id, source_file, &current));
    }
    out
}
