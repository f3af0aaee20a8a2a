use async_trait::async_trait;
use aws_sdk_sqs::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::DomainError;

/// One delivered work item, opaque except for what's needed to decode and
/// acknowledge it (§6).
#[derive(Debug, Clone)]
pub struct WorkItemRecord {
    pub body: String,
    pub receipt: String,
    #[allow(dead_code)]
    pub source: String,
}

/// A bulk payload reference extracted from a work item's decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

/// What a single work item's body decodes to: either bulk payload references to
/// process, or a control message to acknowledge and skip (§4.6, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeContent {
    ObjectRefs(Vec<ObjectRef>),
    TestEvent,
}

#[derive(Deserialize)]
struct Body {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Deserialize)]
struct MessageTestEvent {
    #[serde(rename = "Event")]
    event: Option<String>,
}

#[derive(Deserialize)]
struct MessageRecords {
    #[serde(rename = "Records")]
    records: Vec<S3EventRecord>,
}

#[derive(Deserialize)]
struct S3EventRecord {
    s3: S3Ref,
}

#[derive(Deserialize)]
struct S3Ref {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
}

/// Decode a work item body: `{Message: <string>}` where `Message` itself decodes
/// either to `{Event: "s3:TestEvent"}` (skip and ack) or to
/// `{Records: [{s3: {bucket: {name}, object: {key}}}]}` (§6).
pub fn parse_envelope(body: &str) -> Result<EnvelopeContent, DomainError> {
    let outer: Body = serde_json::from_str(body)
        .map_err(|e| DomainError::PayloadMalformed(format!("body envelope: {e}")))?;

    if let Ok(test_event) = serde_json::from_str::<MessageTestEvent>(&outer.message)
        && test_event.event.as_deref() == Some("s3:TestEvent")
    {
        return Ok(EnvelopeContent::TestEvent);
    }

    let records: MessageRecords = serde_json::from_str(&outer.message)
        .map_err(|e| DomainError::PayloadMalformed(format!("message envelope: {e}")))?;

    let refs = records
        .records
        .into_iter()
        .map(|r| ObjectRef {
            bucket: r.s3.bucket.name,
            key: r.s3.object.key,
        })
        .collect();

    Ok(EnvelopeContent::ObjectRefs(refs))
}

/// Delivers batched work items and lets the dispatcher acknowledge them once
/// processing is complete (§4.6, §5). An abstract interface over the host queue.
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn receive_batch(&self, max_items: usize) -> Result<Vec<WorkItemRecord>, DomainError>;
    async fn ack(&self, receipt: &str) -> Result<(), DomainError>;
}

pub struct SqsWorkSource {
    client: Client,
    queue_url: String,
}

impl SqsWorkSource {
    pub fn new(client: Client, queue_url: String) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl WorkSource for SqsWorkSource {
    async fn receive_batch(&self, max_items: usize) -> Result<Vec<WorkItemRecord>, DomainError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_items.min(10) as i32)
            .send()
            .await
            .map_err(|e| DomainError::StoreTransient(format!("receive_message: {e}")))?;

        let items = resp
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                Some(WorkItemRecord {
                    body: m.body?,
                    receipt: m.receipt_handle?,
                    source: self.queue_url.clone(),
                })
            })
            .collect::<Vec<_>>();

        debug!(count = items.len(), "received work items");
        Ok(items)
    }

    async fn ack(&self, receipt: &str) -> Result<(), DomainError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| DomainError::StoreTransient(format!("delete_message: {e}")))?;
        info!("acknowledged work item");
        Ok(())
    }
}
