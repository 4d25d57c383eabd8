//! Process-local delay queue.
//!
//! Jobs are kept in a min-heap ordered by the instant they become eligible.
//! Consumers sleep until the earliest deadline or until a new job arrives.
//! A claimed job that is dropped without being completed goes back to the
//! front of the queue, mirroring broker redelivery after a consumer crash.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::{delay_until, Acknowledge, CampaignJob, ClaimedJob, JobQueue};

#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<BinaryHeap<Pending>>,
    notify: Notify,
    closed: AtomicBool,
    sequence: AtomicU64,
}

struct Pending {
    ready_at: Instant,
    sequence: u64,
    job: CampaignJob,
}

// Reversed so the max-heap yields the earliest deadline first.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.sequence == other.sequence
    }
}

impl Eq for Pending {}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, BinaryHeap<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, job: CampaignJob, ready_at: Instant) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.pending().push(Pending {
            ready_at,
            sequence,
            job,
        });
        self.notify.notify_one();
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs not currently claimed, eligible or not.
    pub fn len(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out jobs once nothing is eligible.
    ///
    /// Consumers drain jobs that are already due and then receive `None`.
    pub fn close(&self) {
        self.inner.closed.store(true, AtomicOrdering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &CampaignJob, fire_at: Option<DateTime<Utc>>) -> Result<()> {
        let delay = delay_until(fire_at, Utc::now());
        debug!(
            campaign_id = %job.campaign_id,
            delay_ms = delay.as_millis() as u64,
            "memory_queue_enqueued"
        );
        self.inner.push(job.clone(), Instant::now() + delay);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ClaimedJob>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting the heap so a concurrent push or
            // close cannot slip between the check and the wait.
            notified.as_mut().enable();

            let (claimed, next_ready) = {
                let mut pending = self.inner.pending();
                match pending.peek().map(|next| next.ready_at) {
                    Some(ready_at) if ready_at <= Instant::now() => (pending.pop(), None),
                    other => (None, other),
                }
            };

            if let Some(pending) = claimed {
                let ack = MemoryAck {
                    inner: Arc::clone(&self.inner),
                    job: Some(pending.job.clone()),
                };
                return Ok(Some(ClaimedJob::new(pending.job, Box::new(ack))));
            }

            if self.inner.closed.load(AtomicOrdering::SeqCst) {
                return Ok(None);
            }

            match next_ready {
                Some(ready_at) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = sleep_until(ready_at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

struct MemoryAck {
    inner: Arc<Inner>,
    job: Option<CampaignJob>,
}

#[async_trait]
impl Acknowledge for MemoryAck {
    async fn ack(mut self: Box<Self>) -> Result<()> {
        self.job = None;
        Ok(())
    }
}

impl Drop for MemoryAck {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            warn!(campaign_id = %job.campaign_id, "memory_queue_job_requeued");
            self.inner.push(job, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::campaign::CampaignId;
    use crate::queue::Recipient;
    use chrono::Duration as ChronoDuration;
    use tokio::time::timeout;

    fn job(campaign: &str) -> CampaignJob {
        CampaignJob {
            recipients: vec![Recipient::new("1", "Dee", "dee@example.com")],
            custom_link_base: None,
            template_id: "tpl".to_string(),
            schedule_time: None,
            campaign_id: CampaignId::from(campaign),
            subject: "Subject".to_string(),
        }
    }

    #[tokio::test]
    async fn test_immediate_job_is_delivered() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("c-1"), None).await.unwrap();

        let claimed = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.job.campaign_id.as_str(), "c-1");
        claimed.complete().await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_past_fire_time_is_immediately_eligible() {
        let queue = MemoryQueue::new();
        let past = Utc::now() - ChronoDuration::hours(3);
        queue.enqueue(&job("c-past"), Some(past)).await.unwrap();

        let claimed = timeout(Duration::from_millis(50), queue.dequeue())
            .await
            .expect("past job should be eligible")
            .unwrap()
            .unwrap();
        assert_eq!(claimed.job.campaign_id.as_str(), "c-past");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_job_not_delivered_early() {
        let queue = MemoryQueue::new();
        let fire_at = Utc::now() + ChronoDuration::hours(2);
        queue.enqueue(&job("c-later"), Some(fire_at)).await.unwrap();

        let early = timeout(Duration::from_secs(2 * 60 * 60 - 5), queue.dequeue()).await;
        assert!(early.is_err(), "job delivered before its fire time");

        let claimed = timeout(Duration::from_secs(10), queue.dequeue())
            .await
            .expect("job should be delivered once due")
            .unwrap()
            .unwrap();
        assert_eq!(claimed.job.campaign_id.as_str(), "c-later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_job_overtakes_later_one() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue
            .enqueue(&job("c-late"), Some(now + ChronoDuration::minutes(30)))
            .await
            .unwrap();
        queue
            .enqueue(&job("c-soon"), Some(now + ChronoDuration::minutes(1)))
            .await
            .unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.job.campaign_id.as_str(), "c-soon");
    }

    #[tokio::test]
    async fn test_each_job_claimed_once() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("c-only"), None).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        let second = timeout(Duration::from_millis(50), queue.dequeue()).await;
        assert!(second.is_err(), "claimed job handed to a second consumer");
        first.complete().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_claim_is_redelivered() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("c-crash"), None).await.unwrap();

        let claimed = queue.dequeue().await.unwrap().unwrap();
        drop(claimed);
        assert_eq!(queue.len(), 1);

        let again = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.job.campaign_id.as_str(), "c-crash");
        again.complete().await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = MemoryQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::task::yield_now().await;
        queue.close();

        let result = timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
