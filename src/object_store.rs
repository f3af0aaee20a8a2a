use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::RowAccessor;
use tracing::info;

use crate::errors::DomainError;

/// One decoded record from a bulk geometry payload (§3, §6): an opaque AOI/tile key
/// paired with its WKB-encoded polygon.
#[derive(Debug, Clone)]
pub struct GeometryRecord {
    pub pk_and_model: String,
    pub geometry_wkb: Vec<u8>,
}

/// Fetches bulk geometry payloads by `(bucket, key)` reference (§6). An abstract
/// interface; the object container format (a columnar file with `pk_and_model` and
/// `geometry` columns) is fixed by the spec, but the transport is not.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch_records(&self, bucket: &str, key: &str) -> Result<Vec<GeometryRecord>, DomainError>;
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn fetch_records(&self, bucket: &str, key: &str) -> Result<Vec<GeometryRecord>, DomainError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DomainError::ObjectStoreUnavailable(format!("get_object: {e}")))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| DomainError::ObjectStoreUnavailable(format!("reading body: {e}")))?
            .into_bytes();

        info!(bucket, key, bytes = data.len(), "fetched payload object");
        parse_parquet(data)
    }
}

fn parse_parquet(data: Bytes) -> Result<Vec<GeometryRecord>, DomainError> {
    let reader = SerializedFileReader::new(data)
        .map_err(|e| DomainError::PayloadMalformed(format!("bad parquet file: {e}")))?;

    let mut out = Vec::new();
    for row in reader
        .get_row_iter(None)
        .map_err(|e| DomainError::PayloadMalformed(format!("row iterator: {e}")))?
    {
        let row = row.map_err(|e| DomainError::PayloadMalformed(format!("reading row: {e}")))?;
        let pk_idx = row
            .get_column_iter()
            .position(|(n, _)| n == "pk_and_model")
            .ok_or_else(|| DomainError::PayloadMalformed("missing pk_and_model column".into()))?;
        let geometry_idx = row
            .get_column_iter()
            .position(|(n, _)| n == "geometry")
            .ok_or_else(|| DomainError::PayloadMalformed("missing geometry column".into()))?;
        let pk_and_model = row
            .get_string(pk_idx)
            .map_err(|e| DomainError::PayloadMalformed(format!("pk_and_model: {e}")))?
            .clone();
        let geometry_wkb = row
            .get_bytes(geometry_idx)
            .map_err(|e| DomainError::PayloadMalformed(format!("geometry: {e}")))?
            .data()
            .to_vec();

        out.push(GeometryRecord {
            pk_and_model,
            geometry_wkb,
        });
    }

    Ok(out)
}
