//! Mailcast Worker - campaign delivery consumer.
//!
//! This worker consumes campaign jobs from the email_campaign queue, sends the
//! campaign to every recipient through the mail service, uploads a delivery
//! report and moves the campaign to its terminal status.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailcast::blob::HttpBlobStorage;
use mailcast::mailer::HttpMailer;
use mailcast::shutdown::shutdown_signal;
use mailcast::worker::{self, WorkerContext};
use mailcast::{Config, MongoDatabase, RabbitQueue};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        mongodb_database = %config.mongodb_database,
        send_interval_ms = config.send_interval_ms,
        send_burst = config.send_burst,
        scratch_dir = %config.scratch_dir.display(),
        "config_loaded"
    );

    let db = MongoDatabase::connect(&config.mongodb_uri, &config.mongodb_database)
        .await
        .context("Failed to connect to MongoDB")?;

    // Create a shared HTTP client for all requests
    let http = Client::builder()
        .pool_max_idle_per_host(16)
        .timeout(config.request_timeout())
        .build()
        .context("Failed to create HTTP client")?;

    let ctx = Arc::new(WorkerContext {
        db: Arc::new(db),
        mailer: Arc::new(HttpMailer::new(
            http.clone(),
            config.mailer_url.clone(),
            config.request_timeout(),
        )),
        blobs: Arc::new(HttpBlobStorage::new(
            http.clone(),
            config.blob_storage_url.clone(),
            config.request_timeout(),
        )),
        http,
        throttle: Arc::new(config.throttle()),
        settings: config.delivery_settings(),
    });

    let queue = RabbitQueue::new(config.cloudamqp_url.clone());

    worker::run(ctx, Arc::new(queue.clone()), shutdown_signal()).await;

    queue.close().await;

    Ok(())
}
