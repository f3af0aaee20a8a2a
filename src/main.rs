use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aoi_watch::dispatcher::{self, HandlerKind};
use aoi_watch::index_store_dynamo::DynamoIndexStore;
use aoi_watch::notification_sink::SnsNotificationSink;
use aoi_watch::object_store::S3ObjectStore;
use aoi_watch::work_source::SqsWorkSource;
use aoi_watch::{Config, WorkerContext};

#[derive(Parser)]
#[command(name = "aoi-watch", about = "Geospatial AOI publish/subscribe notification service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Maximum work items to receive in this pass.
    #[arg(long, global = true, default_value_t = 10)]
    max_items: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a single AOI Lifecycle upsert pass over pending work items.
    Add,
    /// Drive a single AOI Lifecycle delete pass over pending work items.
    Delete,
    /// Drive a single Compare Engine pass over pending work items.
    Compare,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .context("parsing METRICS_ADDR")?;
    tokio::spawn(aoi_watch::metrics::start_metrics_server(metrics_addr));

    let ctx = build_worker_context(&config).await?;
    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, finishing in-flight work items");
            shutdown_cancel.cancel();
        }
    });

    let kind = match cli.command {
        Commands::Add => HandlerKind::Add,
        Commands::Delete => HandlerKind::Delete,
        Commands::Compare => HandlerKind::Compare,
    };

    let stats = dispatcher::run_once(&ctx, kind, cli.max_items, &cancel)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("dispatcher pass failed")?;

    info!(
        received = stats.received,
        acknowledged = stats.acknowledged,
        test_events_skipped = stats.test_events_skipped,
        failed = stats.failed,
        "run complete"
    );

    if stats.failed > 0 {
        error!(failed = stats.failed, "one or more work items were left for redelivery");
        std::process::exit(1);
    }

    Ok(())
}

async fn build_worker_context(config: &Config) -> Result<WorkerContext> {
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await;

    let index_store = Arc::new(DynamoIndexStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        config.db_table_name.clone(),
    ));
    let object_store = Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config)));
    let notification_sink = Arc::new(SnsNotificationSink::new(
        aws_sdk_sns::Client::new(&aws_config),
        config.sns_out_arn.clone(),
    ));
    let work_source = Arc::new(SqsWorkSource::new(
        aws_sdk_sqs::Client::new(&aws_config),
        config.work_source_queue_url.clone(),
    ));

    Ok(WorkerContext::new(
        index_store,
        object_store,
        notification_sink,
        work_source,
    ))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .event_format(aoi_watch::log_format::TargetFirstFormat)
        .with_span_events(FmtSpan::NONE)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
