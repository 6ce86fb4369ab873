//! Durable job queues over the `jobs` table.
//!
//! Two named queues (`payments`, `webhooks`) with at-least-once delivery:
//! claims take a lease, a completed job is deleted, a released or
//! stale-leased job is handed out again. The job id is the dedup key, so
//! re-enqueueing on intake retry is a no-op. Enqueue composes with the
//! caller's transaction; an in-process `Notify` wakes consumers after
//! commit, and consumers poll on a short interval as the fallback (the
//! outbox row, not the queue, is authoritative for webhook retries).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::db::DbPool;
use crate::error::Result;

/// Lease duration before an in-flight job is considered abandoned and
/// redelivered to another worker.
const JOB_LEASE_SECS: i64 = 300;

/// Delay applied when a job is released back after a handler error.
pub const RELEASE_DELAY_SECS: i64 = 5;

/// The named queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    Payments,
    Webhooks,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::Webhooks => "webhooks",
        }
    }
}

/// Work item payloads. Serialized as the job's JSON payload; `kind` in the
/// table mirrors the variant for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    ProcessPayment { payment_id: String },
    DeliverWebhook { event_id: String },
}

impl JobKind {
    fn kind_str(&self) -> &'static str {
        match self {
            Self::ProcessPayment { .. } => "process_payment",
            Self::DeliverWebhook { .. } => "deliver_webhook",
        }
    }
}

/// A claimed job handed to a consumer.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub attempts: i64,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Insert a job row inside the caller's transaction.
///
/// `job_id` is the stable dedup key (e.g. the payment or event id); an
/// existing id makes this a no-op and returns `false`. Remember to call
/// `JobQueue::wake` after the transaction commits.
pub fn enqueue(conn: &Connection, queue: QueueName, job_id: &str, kind: &JobKind) -> Result<bool> {
    enqueue_delayed(conn, queue, job_id, kind, 0)
}

/// Like [`enqueue`] but the job only becomes claimable after `delay_secs`.
pub fn enqueue_delayed(
    conn: &Connection,
    queue: QueueName,
    job_id: &str,
    kind: &JobKind,
    delay_secs: i64,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO jobs (id, queue, kind, payload, run_at, attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            job_id,
            queue.as_str(),
            kind.kind_str(),
            serde_json::to_string(kind)?,
            now + delay_secs,
            now,
        ],
    )?;
    Ok(affected > 0)
}

/// Per-queue counts for the job-status endpoint.
#[derive(Debug, Serialize)]
pub struct QueueCounts {
    /// Due and unclaimed.
    pub ready: i64,
    /// Scheduled in the future.
    pub delayed: i64,
    /// Claimed by a worker.
    pub in_flight: i64,
}

/// Handle to one named queue. Cheap to clone; all clones share the wakeup
/// channel.
#[derive(Clone)]
pub struct JobQueue {
    pool: DbPool,
    name: QueueName,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(pool: DbPool, name: QueueName) -> Self {
        Self {
            pool,
            name,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    /// Wake every consumer (and the poller, for the webhooks queue) after a
    /// transaction that enqueued work has committed.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Wait for a wakeup, or until `max_idle` elapses. Consumers re-check
    /// the table after either, so a lost wakeup only costs latency.
    pub async fn idle(&self, max_idle: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(max_idle) => {}
        }
    }

    /// Claim up to `limit` due jobs, taking a lease on each.
    pub fn claim(&self, limit: i64) -> Result<Vec<Job>> {
        let conn = self.pool.get()?;
        let now = now();
        let stale_before = now - JOB_LEASE_SECS;

        let mut stmt = conn.prepare(
            "UPDATE jobs SET claimed_at = ?1, attempts = attempts + 1
             WHERE id IN (
                 SELECT id FROM jobs
                 WHERE queue = ?2 AND run_at <= ?1
                   AND (claimed_at IS NULL OR claimed_at <= ?3)
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?4
             )
             RETURNING id, payload, attempts",
        )?;
        let rows = stmt
            .query_map(params![now, self.name.as_str(), stale_before, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, payload, attempts) in rows {
            let kind: JobKind = serde_json::from_str(&payload)?;
            jobs.push(Job { id, kind, attempts });
        }
        Ok(jobs)
    }

    /// Ack: the job is done (or permanently moot) and its row is removed.
    pub fn complete(&self, job_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])?;
        Ok(())
    }

    /// Nack: release the lease so the job is redelivered after a short
    /// delay.
    pub fn release(&self, job_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE jobs SET claimed_at = NULL, run_at = ?1 WHERE id = ?2",
            params![now() + RELEASE_DELAY_SECS, job_id],
        )?;
        Ok(())
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let conn = self.pool.get()?;
        let now = now();
        let stale_before = now - JOB_LEASE_SECS;
        let queue = self.name.as_str();

        let ready: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND run_at <= ?2
             AND (claimed_at IS NULL OR claimed_at <= ?3)",
            params![queue, now, stale_before],
            |row| row.get(0),
        )?;
        let delayed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND run_at > ?2",
            params![queue, now],
            |row| row.get(0),
        )?;
        let in_flight: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND claimed_at > ?2",
            params![queue, stale_before],
            |row| row.get(0),
        )?;

        Ok(QueueCounts {
            ready,
            delayed,
            in_flight,
        })
    }
}

/// Both named queues, as carried in [`crate::db::AppState`].
#[derive(Clone)]
pub struct Queues {
    pub payments: JobQueue,
    pub webhooks: JobQueue,
}

impl Queues {
    pub fn new(pool: DbPool) -> Self {
        Self {
            payments: JobQueue::new(pool.clone(), QueueName::Payments),
            webhooks: JobQueue::new(pool, QueueName::Webhooks),
        }
    }
}
