use chrono::Utc;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use crate::error::{msg, AppError, OptionExt, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, FromRow, EVENT_COLS, IDEMPOTENCY_COLS, PAYMENT_COLS, REFUND_COLS,
    WEBHOOK_COLS,
};

/// How long a dispatch lease on an outbox row is honored before the poller
/// may hand the row to another worker (crash recovery).
pub const EVENT_LEASE_SECS: i64 = 300;

fn now() -> i64 {
    Utc::now().timestamp()
}

/// True when the error is a UNIQUE / PRIMARY KEY constraint violation.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

// ============ Payments ============

/// Insert a new payment in `pending` status.
///
/// A UNIQUE violation on the idempotency key maps to `DuplicateKey` so the
/// intake handler can replay the existing payment instead of failing.
pub fn create_payment(
    conn: &Connection,
    input: &CreatePayment,
    idempotency_key: &str,
) -> Result<Payment> {
    let id = EntityType::Payment.gen_id();
    let now = now();
    let metadata = input.metadata.to_string();

    let inserted = conn.execute(
        "INSERT INTO payments (id, idempotency_key, amount, currency, status, customer_email,
                               customer_name, description, payment_method, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            &id,
            idempotency_key,
            input.amount.to_string(),
            &input.currency,
            &input.customer_email,
            &input.customer_name,
            &input.description,
            &input.payment_method,
            &metadata,
            now,
        ],
    );

    match inserted {
        Ok(_) => Ok(Payment {
            id,
            idempotency_key: Some(idempotency_key.to_string()),
            amount: input.amount,
            currency: input.currency.clone(),
            status: PaymentStatus::Pending,
            customer_email: input.customer_email.clone(),
            customer_name: input.customer_name.clone(),
            description: input.description.clone(),
            payment_method: input.payment_method.clone(),
            metadata: input.metadata.clone(),
            created_at: now,
            updated_at: now,
        }),
        Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateKey),
        Err(e) => Err(e.into()),
    }
}

pub fn get_payment(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

pub fn get_payment_by_idempotency_key(conn: &Connection, key: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE idempotency_key = ?1",
            PAYMENT_COLS
        ),
        &[&key],
    )
}

/// Compare-and-set status transition.
///
/// The UPDATE carries the expected current status, so a concurrent worker
/// that already moved the payment makes this a no-op (`Ok(false)`). Workers
/// treat `false` as "someone else did the work" and ack.
pub fn mark_payment_status(
    conn: &Connection,
    id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(AppError::InvalidState(format!(
            "payment cannot move from {} to {}",
            from, to
        )));
    }

    let affected = conn.execute(
        "UPDATE payments SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), now(), id, from.as_str()],
    )?;
    Ok(affected > 0)
}

// ============ Refunds ============

/// Sum of refund amounts that count against the payment's budget
/// (everything except failed refunds). Summed in Rust to keep decimal
/// arithmetic exact.
pub fn refunded_total(conn: &Connection, payment_id: &str) -> Result<Decimal> {
    let mut stmt = conn.prepare(
        "SELECT amount FROM refunds WHERE payment_id = ?1 AND status != 'failed'",
    )?;
    let amounts = stmt
        .query_map(params![payment_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut total = Decimal::ZERO;
    for raw in amounts {
        let amount: Decimal = raw
            .parse()
            .map_err(|_| AppError::Internal(format!("unparseable refund amount: {}", raw)))?;
        total += amount;
    }
    Ok(total)
}

/// Create a refund and settle it synchronously.
///
/// Runs entirely inside the caller's transaction: validates the parent
/// payment's status and the cumulative refund budget, inserts the refund as
/// `processed`, and moves the parent to `partial_refunded` or `refunded`
/// depending on whether the budget is now exhausted.
///
/// `amount` of `None` refunds the remaining balance.
pub fn create_refund(
    conn: &Connection,
    payment_id: &str,
    amount: Option<Decimal>,
    reason: Option<&str>,
) -> Result<(Refund, Payment)> {
    let payment = get_payment(conn, payment_id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;

    if !matches!(
        payment.status,
        PaymentStatus::Completed | PaymentStatus::PartialRefunded
    ) {
        return Err(AppError::InvalidState(msg::PAYMENT_NOT_REFUNDABLE.into()));
    }

    let remaining = payment.amount - refunded_total(conn, payment_id)?;
    let amount = amount.unwrap_or(remaining);

    if amount <= Decimal::ZERO {
        return Err(AppError::Validation(msg::AMOUNT_NOT_POSITIVE.into()));
    }
    if amount > remaining {
        return Err(AppError::InvalidState(msg::AMOUNT_EXCEEDS_REMAINING.into()));
    }

    let id = EntityType::Refund.gen_id();
    let created = now();
    conn.execute(
        "INSERT INTO refunds (id, payment_id, amount, reason, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'processed', ?5, ?5)",
        params![&id, payment_id, amount.to_string(), reason, created],
    )?;

    let new_status = if amount == remaining {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartialRefunded
    };
    if !mark_payment_status(conn, payment_id, payment.status, new_status)? {
        // The row moved under us inside our own transaction: nothing else
        // can commit concurrently, so this is a programming error.
        return Err(AppError::Internal(format!(
            "payment {} changed status during refund",
            payment_id
        )));
    }

    let refund = Refund {
        id,
        payment_id: payment_id.to_string(),
        amount,
        reason: reason.map(String::from),
        status: RefundStatus::Processed,
        created_at: created,
        updated_at: created,
    };
    let payment = Payment {
        status: new_status,
        updated_at: created,
        ..payment
    };
    Ok((refund, payment))
}

pub fn list_refunds_for_payment(conn: &Connection, payment_id: &str) -> Result<Vec<Refund>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM refunds WHERE payment_id = ?1 ORDER BY created_at DESC, id DESC",
            REFUND_COLS
        ),
        &[&payment_id],
    )
}

// ============ Webhook subscriptions ============

pub fn create_webhook(
    conn: &Connection,
    input: &CreateWebhookRequest,
    secret: &str,
) -> Result<WebhookSubscription> {
    // Set semantics: duplicates collapse, first occurrence wins.
    let mut events: Vec<String> = Vec::new();
    for event in &input.events {
        if !events.contains(event) {
            events.push(event.clone());
        }
    }

    let id = EntityType::Webhook.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO webhooks (id, url, events, active, secret, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            &id,
            &input.url,
            serde_json::to_string(&events)?,
            input.active as i64,
            secret,
            now,
        ],
    )?;

    Ok(WebhookSubscription {
        id,
        url: input.url.clone(),
        events,
        active: input.active,
        secret: secret.to_string(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_webhook(conn: &Connection, id: &str) -> Result<Option<WebhookSubscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhooks WHERE id = ?1", WEBHOOK_COLS),
        &[&id],
    )
}

pub fn list_webhooks(conn: &Connection) -> Result<Vec<WebhookSubscription>> {
    query_all(
        conn,
        &format!("SELECT {} FROM webhooks ORDER BY created_at DESC", WEBHOOK_COLS),
        &[],
    )
}

pub fn list_active_webhooks(conn: &Connection) -> Result<Vec<WebhookSubscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM webhooks WHERE active = 1 ORDER BY created_at",
            WEBHOOK_COLS
        ),
        &[],
    )
}

/// Apply a partial update; returns the updated subscription, or `None` if
/// the id does not exist.
pub fn update_webhook(
    conn: &Connection,
    id: &str,
    changes: &UpdateWebhookRequest,
) -> Result<Option<WebhookSubscription>> {
    let Some(existing) = get_webhook(conn, id)? else {
        return Ok(None);
    };

    let url = changes.url.clone().unwrap_or(existing.url);
    let events = match &changes.events {
        Some(events) => {
            let mut deduped: Vec<String> = Vec::new();
            for event in events {
                if !deduped.contains(event) {
                    deduped.push(event.clone());
                }
            }
            deduped
        }
        None => existing.events,
    };
    let active = changes.active.unwrap_or(existing.active);
    let updated = now();

    conn.execute(
        "UPDATE webhooks SET url = ?1, events = ?2, active = ?3, updated_at = ?4 WHERE id = ?5",
        params![&url, serde_json::to_string(&events)?, active as i64, updated, id],
    )?;

    Ok(Some(WebhookSubscription {
        id: existing.id,
        url,
        events,
        active,
        secret: existing.secret,
        created_at: existing.created_at,
        updated_at: updated,
    }))
}

/// Delete a subscription. Its outbox rows go with it (FK cascade).
pub fn delete_webhook(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM webhooks WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

// ============ Outbox ============

/// Fan an event out to every active subscription that listens for its type.
///
/// Must run inside the same transaction as the state change that produced
/// the event; that shared commit is the outbox guarantee. Each row's
/// payload is serialized here, once, with the row's own `event_id` added
/// so receivers can deduplicate redeliveries; the stored string is the
/// canonical body the dispatcher will sign and post.
pub fn insert_outbox_events(
    conn: &Connection,
    event_type: &str,
    payload: &serde_json::Value,
    max_retries: i64,
) -> Result<Vec<String>> {
    let now = now();
    let mut ids = Vec::new();

    for sub in list_active_webhooks(conn)? {
        if !sub.subscribes_to(event_type) {
            continue;
        }
        let id = EntityType::Event.gen_id();

        let mut enriched = payload.clone();
        if let Some(object) = enriched.as_object_mut() {
            object.insert("event_id".to_string(), serde_json::json!(id));
        }
        let body = enriched.to_string();

        conn.execute(
            "INSERT INTO webhook_events (id, webhook_id, event_type, payload, status,
                                         retry_count, max_retries, next_retry, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, NULL, ?6, ?6)",
            params![&id, &sub.id, event_type, &body, max_retries, now],
        )?;
        ids.push(id);
    }
    Ok(ids)
}

pub fn get_event(conn: &Connection, id: &str) -> Result<Option<WebhookEvent>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhook_events WHERE id = ?1", EVENT_COLS),
        &[&id],
    )
}

/// Lease up to `limit` due outbox rows for dispatch.
///
/// Due means pending with `next_retry` null or in the past; rows already
/// leased within `EVENT_LEASE_SECS` are skipped so concurrent pollers never
/// hand out the same row twice. Ordered oldest-due first.
pub fn claim_due_events(conn: &Connection, now: i64, limit: i64) -> Result<Vec<WebhookEvent>> {
    let stale_before = now - EVENT_LEASE_SECS;
    let mut stmt = conn.prepare(&format!(
        "UPDATE webhook_events SET claimed_at = ?1
         WHERE id IN (
             SELECT id FROM webhook_events
             WHERE status = 'pending'
               AND (next_retry IS NULL OR next_retry <= ?1)
               AND (claimed_at IS NULL OR claimed_at <= ?2)
             ORDER BY COALESCE(next_retry, created_at) ASC, id ASC
             LIMIT ?3
         )
         RETURNING {}",
        EVENT_COLS
    ))?;
    let rows = stmt
        .query_map(params![now, stale_before, limit], WebhookEvent::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Record a successful delivery: the row becomes terminally `completed`.
pub fn record_event_delivered(conn: &Connection, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhook_events SET status = 'completed', claimed_at = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'pending'",
        params![now(), event_id],
    )?;
    Ok(affected > 0)
}

/// Record a failed delivery attempt.
///
/// Bumps `retry_count`; if that exhausts the budget the row becomes
/// terminally `failed`, otherwise it returns to `pending` with the supplied
/// `next_retry`. The lease is released either way. Returns the updated row
/// (`None` if the row was not pending).
pub fn record_event_failure(
    conn: &Connection,
    event_id: &str,
    error: &str,
    next_retry: i64,
) -> Result<Option<WebhookEvent>> {
    let mut stmt = conn.prepare(&format!(
        "UPDATE webhook_events SET
             retry_count = retry_count + 1,
             status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
             next_retry = CASE WHEN retry_count + 1 >= max_retries THEN NULL ELSE ?1 END,
             last_error = ?2,
             claimed_at = NULL,
             updated_at = ?3
         WHERE id = ?4 AND status = 'pending'
         RETURNING {}",
        EVENT_COLS
    ))?;
    let mut rows = stmt
        .query_map(params![next_retry, error, now(), event_id], WebhookEvent::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.pop())
}

/// Terminally fail an event whose subscription is gone or inactive. No
/// retry budget applies; there is nowhere to deliver to.
pub fn mark_event_undeliverable(conn: &Connection, event_id: &str, error: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhook_events SET status = 'failed', last_error = ?1, claimed_at = NULL, updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![error, now(), event_id],
    )?;
    Ok(affected > 0)
}

/// Paginated event listing for `GET /webhooks/{id}/events`.
pub fn list_webhook_events(
    conn: &Connection,
    webhook_id: &str,
    status: Option<EventStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<WebhookEvent>, i64)> {
    let (filter, count_sql): (String, String) = match status {
        Some(_) => (
            format!(
                "SELECT {} FROM webhook_events WHERE webhook_id = ?1 AND status = ?2
                 ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
                EVENT_COLS
            ),
            "SELECT COUNT(*) FROM webhook_events WHERE webhook_id = ?1 AND status = ?2".into(),
        ),
        None => (
            format!(
                "SELECT {} FROM webhook_events WHERE webhook_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
                EVENT_COLS
            ),
            "SELECT COUNT(*) FROM webhook_events WHERE webhook_id = ?1".into(),
        ),
    };

    match status {
        Some(s) => {
            let status_str = s.as_str();
            let total: i64 =
                conn.query_row(&count_sql, params![webhook_id, status_str], |row| row.get(0))?;
            let items = query_all(conn, &filter, &[&webhook_id, &status_str, &limit, &offset])?;
            Ok((items, total))
        }
        None => {
            let total: i64 = conn.query_row(&count_sql, params![webhook_id], |row| row.get(0))?;
            let items = query_all(conn, &filter, &[&webhook_id, &limit, &offset])?;
            Ok((items, total))
        }
    }
}

/// Outbox row counts by status, for the job-status endpoint.
pub fn count_events_by_status(conn: &Connection) -> Result<(i64, i64, i64)> {
    let count = |status: &str| -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM webhook_events WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )
        .map_err(Into::into)
    };
    Ok((count("pending")?, count("completed")?, count("failed")?))
}

// ============ Idempotency ============

/// Record the canonical response for a key. Shares the intake transaction
/// so the payment and its replay record commit or roll back together.
pub fn put_idempotency_record(
    conn: &Connection,
    key: &str,
    payment_id: &str,
    response: &str,
    ttl_secs: i64,
) -> Result<()> {
    let created = now();
    let inserted = conn.execute(
        "INSERT INTO idempotency_keys (key, payment_id, response, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![key, payment_id, response, created, created + ttl_secs],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateKey),
        Err(e) => Err(e.into()),
    }
}

/// Recorded response for a key, if present and not expired.
pub fn lookup_idempotent(conn: &Connection, key: &str, now: i64) -> Result<Option<String>> {
    let record: Option<IdempotencyRecord> = query_one(
        conn,
        &format!(
            "SELECT {} FROM idempotency_keys WHERE key = ?1 AND expires_at > ?2",
            IDEMPOTENCY_COLS
        ),
        &[&key, &now],
    )?;
    Ok(record.map(|r| r.response))
}

/// Purge expired records. Called by the background cleanup task.
pub fn cleanup_expired_idempotency_keys(conn: &Connection, now: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
        params![now],
    )
    .map_err(Into::into)
}
