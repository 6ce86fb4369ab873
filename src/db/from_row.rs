//! Row mapping trait and helpers for reducing boilerplate in queries.

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use rust_decimal::Decimal;

use crate::models::*;

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Parse a TEXT column into a typed value, mapping parse failures to a
/// rusqlite conversion error instead of panicking.
fn parse_column<T: FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unparseable value: {}", raw).into(),
        )
    })
}

fn parse_decimal(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

fn parse_json(row: &Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

fn parse_string_array(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

// ============ SQL SELECT Constants ============

pub const PAYMENT_COLS: &str =
    "id, idempotency_key, amount, currency, status, customer_email, customer_name, description, payment_method, metadata, created_at, updated_at";

pub const REFUND_COLS: &str = "id, payment_id, amount, reason, status, created_at, updated_at";

pub const WEBHOOK_COLS: &str = "id, url, events, active, secret, created_at, updated_at";

pub const EVENT_COLS: &str =
    "id, webhook_id, event_type, payload, status, retry_count, max_retries, next_retry, last_error, created_at, updated_at";

pub const IDEMPOTENCY_COLS: &str = "key, payment_id, response, created_at, expires_at";

// ============ FromRow Implementations ============

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            idempotency_key: row.get(1)?,
            amount: parse_decimal(row, 2)?,
            currency: row.get(3)?,
            status: parse_column(row, 4)?,
            customer_email: row.get(5)?,
            customer_name: row.get(6)?,
            description: row.get(7)?,
            payment_method: row.get(8)?,
            metadata: parse_json(row, 9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for Refund {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Refund {
            id: row.get(0)?,
            payment_id: row.get(1)?,
            amount: parse_decimal(row, 2)?,
            reason: row.get(3)?,
            status: parse_column(row, 4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for WebhookSubscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookSubscription {
            id: row.get(0)?,
            url: row.get(1)?,
            events: parse_string_array(row, 2)?,
            active: row.get::<_, i64>(3)? != 0,
            secret: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for WebhookEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEvent {
            id: row.get(0)?,
            webhook_id: row.get(1)?,
            event_type: row.get(2)?,
            payload: row.get(3)?,
            status: parse_column(row, 4)?,
            retry_count: row.get(5)?,
            max_retries: row.get(6)?,
            next_retry: row.get(7)?,
            last_error: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for IdempotencyRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(IdempotencyRecord {
            key: row.get(0)?,
            payment_id: row.get(1)?,
            response: row.get(2)?,
            created_at: row.get(3)?,
            expires_at: row.get(4)?,
        })
    }
}
