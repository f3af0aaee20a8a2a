//! AOI Watch - geospatial AOI publish/subscribe notification service.
//!
//! Tracks areas of interest (AOIs) against an H3-indexed grid and dispatches
//! ADD/DELETE/COMPARE notifications as new geometry tiles arrive.

pub mod aoi_lifecycle;
pub mod compare;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod geometry;
pub mod h3_cover;
pub mod index_store;
pub mod index_store_dynamo;
pub mod index_store_memory;
pub mod log_format;
pub mod metrics;
pub mod notification_sink;
pub mod object_store;
pub mod retry;
pub mod work_source;
pub mod worker_context;

pub use config::Config;
pub use dispatcher::{DispatchStats, HandlerKind};
pub use errors::DomainError;
pub use worker_context::WorkerContext;
