use crate::errors::DomainError;

/// Process-wide tunables that the algorithm contracts in §4 depend on. Kept as
/// `const`s rather than environment-configurable since the spec fixes them (H3
/// resolution, batch sizes); only the cloud-resource identifiers vary per deployment.
pub const H3_RESOLUTION: u8 = 3;
pub const INDEX_BATCH_MAX: usize = 25;
pub const H3_QUERY_MAX: usize = 50;
pub const NOTIFY_BATCH_MAX: usize = 10;
pub const STORE_MAX_ATTEMPTS: u32 = 8;
/// Soft cap on a notification's attribute payload, matched to SNS's message
/// attribute budget (§4.5).
pub const NOTIFY_PAYLOAD_MAX_BYTES: usize = 256 * 1024;

/// Worker configuration loaded once at process start. Absent required variables are a
/// fatal `DomainError::Config`, not a panic, so the caller can decide how to report it
/// (§7).
#[derive(Debug, Clone)]
pub struct Config {
    pub aws_region: String,
    pub sns_out_arn: String,
    pub db_table_name: String,
    pub work_source_queue_url: String,
    pub metrics_addr: String,
}

impl Config {
    /// Load configuration from the environment, the way worker entry points load
    /// `EmailConfig`/`CloudConfig` equivalents: read every variable up front, collect
    /// into a single typed value, and fail fast with a descriptive error rather than
    /// discovering a missing variable mid-run.
    pub fn from_env() -> Result<Self, DomainError> {
        let aws_region =
            std::env::var("AWS_REGION").unwrap_or_else(|_| "us-west-2".to_string());

        let sns_out_arn = std::env::var("SNS_OUT_ARN")
            .map_err(|_| DomainError::Config("SNS_OUT_ARN not set".to_string()))?;

        let db_table_name = std::env::var("DB_TABLE_NAME")
            .map_err(|_| DomainError::Config("DB_TABLE_NAME not set".to_string()))?;

        let work_source_queue_url = std::env::var("WORK_SOURCE_QUEUE_URL")
            .map_err(|_| DomainError::Config("WORK_SOURCE_QUEUE_URL not set".to_string()))?;

        let metrics_addr =
            std::env::var("METRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:9401".to_string());

        Ok(Config {
            aws_region,
            sns_out_arn,
            db_table_name,
            work_source_queue_url,
            metrics_addr,
        })
    }
}
