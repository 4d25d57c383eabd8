//! RabbitMQ-backed campaign queue.
//!
//! Jobs are published to a durable `x-delayed-message` exchange with an
//! `x-delay` header; the broker routes them into the durable
//! `email_campaign` queue once the delay has elapsed. Requires the
//! `rabbitmq_delayed_message_exchange` plugin on the broker.
//!
//! The consumer uses manual acknowledgements with a prefetch of one, so each
//! worker process holds at most one job and an unacked job is redelivered if
//! the worker dies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use super::{
    delay_until, Acknowledge, CampaignJob, ClaimedJob, JobQueue, CAMPAIGN_EXCHANGE, CAMPAIGN_QUEUE,
};

/// Consumer tag prefix used by delivery workers.
const CONSUMER_TAG_PREFIX: &str = "mailcast-worker";

/// RabbitMQ job queue with lazy connection management.
///
/// The handle is cheap to clone and is meant to be created once per process
/// and shared between producers and the worker loop.
#[derive(Clone)]
pub struct RabbitQueue {
    inner: Arc<RabbitInner>,
}

struct RabbitInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    consumer: Mutex<Option<Consumer>>,
    consumer_generation: AtomicU64,
}

impl RabbitQueue {
    /// Create a new queue handle for the given RabbitMQ URL.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(RabbitInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
                consumer: Mutex::new(None),
                consumer_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Ensure we have a valid connection and channel with topology declared.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_connected");

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        let mut exchange_args = FieldTable::default();
        exchange_args.insert(
            "x-delayed-type".into(),
            AMQPValue::LongString("direct".into()),
        );

        ch.exchange_declare(
            CAMPAIGN_EXCHANGE,
            ExchangeKind::Custom("x-delayed-message".to_string()),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            exchange_args,
        )
        .await
        .context("Failed to declare delayed exchange")?;

        ch.queue_declare(
            CAMPAIGN_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare campaign queue")?;

        ch.queue_bind(
            CAMPAIGN_QUEUE,
            CAMPAIGN_EXCHANGE,
            CAMPAIGN_QUEUE,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to bind campaign queue")?;

        // One job in flight per worker process
        ch.basic_qos(1, BasicQosOptions::default())
            .await
            .context("Failed to set QoS")?;

        info!(
            exchange = CAMPAIGN_EXCHANGE,
            queue = CAMPAIGN_QUEUE,
            "rabbitmq_topology_declared"
        );

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Tag for the next consumer. A restarted consumer never reuses a tag
    /// the broker may still hold on an open channel.
    fn next_consumer_tag(&self) -> String {
        let generation = self.inner.consumer_generation.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", CONSUMER_TAG_PREFIX, std::process::id(), generation)
    }

    async fn start_consumer(&self) -> Result<Consumer> {
        let channel = self.ensure_connected().await?;
        let tag = self.next_consumer_tag();
        let consumer = channel
            .basic_consume(
                CAMPAIGN_QUEUE,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to start consumer")?;

        info!(queue = CAMPAIGN_QUEUE, consumer_tag = %tag, "rabbitmq_consumer_started");
        Ok(consumer)
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        self.inner.consumer.lock().await.take();

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_queue_closed");
    }
}

/// Message headers carrying the broker-side delay.
fn delay_headers(delay: Duration) -> FieldTable {
    let mut headers = FieldTable::default();
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    headers.insert("x-delay".into(), AMQPValue::LongLongInt(delay_ms));
    headers
}

#[async_trait]
impl JobQueue for RabbitQueue {
    async fn enqueue(&self, job: &CampaignJob, fire_at: Option<DateTime<Utc>>) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let body = serde_json::to_vec(job).context("Failed to serialize job")?;
        let delay = delay_until(fire_at, Utc::now());

        channel
            .basic_publish(
                CAMPAIGN_EXCHANGE,
                CAMPAIGN_QUEUE,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(job.campaign_id.as_str().into())
                    .with_headers(delay_headers(delay)),
            )
            .await
            .context("Failed to publish campaign job")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            exchange = CAMPAIGN_EXCHANGE,
            campaign_id = %job.campaign_id,
            delay_ms = delay.as_millis() as u64,
            body_length = body.len(),
            "rabbitmq_job_published"
        );

        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ClaimedJob>> {
        let mut consumer = self.inner.consumer.lock().await;

        loop {
            let mut stream = match consumer.take() {
                Some(stream) => stream,
                None => self.start_consumer().await?,
            };

            let delivery = match stream.next().await {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    // Drop the broken consumer and start a fresh one
                    error!(error = %e, "rabbitmq_delivery_error");
                    continue;
                }
                None => {
                    warn!("rabbitmq_consumer_closed");
                    return Ok(None);
                }
            };
            *consumer = Some(stream);

            let message_id = delivery
                .properties
                .message_id()
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());

            match serde_json::from_slice::<CampaignJob>(&delivery.data) {
                Ok(job) => {
                    info!(
                        queue = CAMPAIGN_QUEUE,
                        message_id = %message_id,
                        delivery_tag = delivery.delivery_tag,
                        "rabbitmq_job_received"
                    );
                    let ack = RabbitAck {
                        acker: delivery.acker,
                    };
                    return Ok(Some(ClaimedJob::new(job, Box::new(ack))));
                }
                Err(e) => {
                    // Undecodable payloads would fail forever, so they are
                    // dropped rather than requeued.
                    error!(
                        message_id = %message_id,
                        error = %e,
                        "rabbitmq_job_parse_failed"
                    );
                    if let Err(reject_err) = delivery
                        .acker
                        .reject(BasicRejectOptions { requeue: false })
                        .await
                    {
                        error!(error = %reject_err, "rabbitmq_reject_failed");
                    }
                }
            }
        }
    }
}

struct RabbitAck {
    acker: Acker,
}

#[async_trait]
impl Acknowledge for RabbitAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .context("Failed to acknowledge job")?;
        Ok(())
    }
}
