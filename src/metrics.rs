use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus exporter. Buckets are sized for the worker's own
/// processing latency rather than an inbound HTTP request, since this service has
/// no request/response surface of its own (§2 ambient stack).
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("work_item_duration_seconds".to_string()),
            &[
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .expect("failed to set buckets for work_item_duration_seconds")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Background task reporting process uptime, matched to the teacher's own
/// process-metrics loop.
pub async fn process_metrics_task() {
    let start_time = Instant::now();
    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Zero-initialize counters so they appear in Prometheus queries before the first
/// work item is processed.
pub fn initialize_dispatcher_metrics() {
    metrics::counter!("work_items_received_total").absolute(0);
    metrics::counter!("work_items_acknowledged_total").absolute(0);
    metrics::counter!("work_items_test_event_skipped_total").absolute(0);
    metrics::counter!("records_add_succeeded_total").absolute(0);
    metrics::counter!("records_add_failed_total").absolute(0);
    metrics::counter!("records_delete_succeeded_total").absolute(0);
    metrics::counter!("records_delete_failed_total").absolute(0);
    metrics::counter!("records_compare_tile_failed_total").absolute(0);
    metrics::counter!("notifications_published_total").absolute(0);
    metrics::counter!("notifications_publish_failed_total").absolute(0);
    metrics::counter!("index_store_retries_total").absolute(0);
}

/// Start a standalone metrics server exposing `/metrics` for scraping (§2 ambient
/// stack). Profiling endpoints are not carried over; this service has no
/// latency-sensitive request path worth flame-graphing.
pub async fn start_metrics_server(addr: SocketAddr) {
    let handle = init_metrics();
    METRICS_HANDLE
        .set(handle)
        .expect("metrics handle already initialized");
    initialize_dispatcher_metrics();

    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(|| async {
            let handle = METRICS_HANDLE
                .get()
                .expect("metrics handle not initialized");
            handle.render()
        }),
    );

    info!("starting metrics server on http://{}/metrics", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind metrics server");

    axum::serve(listener, app)
        .await
        .expect("metrics server failed");
}
