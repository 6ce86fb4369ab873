//! Idempotency record tests: replay lookup, expiry, duplicate-key mapping,
//! and cleanup.

mod common;

use chrono::Utc;
use common::*;
use paygate::error::AppError;

#[test]
fn test_record_round_trip() {
    let pool = test_pool();
    let conn = pool.get().unwrap();
    let payment = create_test_payment(&conn, "10.00", "a@b.c");

    let body = r#"{"id":"pg_pay_x","status":"pending"}"#;
    queries::put_idempotency_record(&conn, "K1", &payment.id, body, 24 * 3600).unwrap();

    let now = Utc::now().timestamp();
    let stored = queries::lookup_idempotent(&conn, "K1", now).unwrap();
    assert_eq!(stored.as_deref(), Some(body));
}

#[test]
fn test_unknown_key_is_absent() {
    let pool = test_pool();
    let conn = pool.get().unwrap();

    let now = Utc::now().timestamp();
    assert!(queries::lookup_idempotent(&conn, "nope", now).unwrap().is_none());
}

#[test]
fn test_expired_record_is_absent() {
    let pool = test_pool();
    let conn = pool.get().unwrap();
    let payment = create_test_payment(&conn, "10.00", "a@b.c");

    // TTL of zero: expires_at == created_at, so it is already expired
    queries::put_idempotency_record(&conn, "K1", &payment.id, "{}", 0).unwrap();

    let now = Utc::now().timestamp();
    assert!(queries::lookup_idempotent(&conn, "K1", now).unwrap().is_none());
}

#[test]
fn test_duplicate_record_maps_to_duplicate_key() {
    let pool = test_pool();
    let conn = pool.get().unwrap();
    let payment = create_test_payment(&conn, "10.00", "a@b.c");

    queries::put_idempotency_record(&conn, "K1", &payment.id, "{}", 3600).unwrap();
    let result = queries::put_idempotency_record(&conn, "K1", &payment.id, "{}", 3600);
    assert!(matches!(result, Err(AppError::DuplicateKey)));
}

#[test]
fn test_duplicate_payment_key_maps_to_duplicate_key() {
    let pool = test_pool();
    let conn = pool.get().unwrap();

    let input = CreatePayment {
        amount: dec("10.00"),
        currency: "USD".to_string(),
        customer_email: "a@b.c".to_string(),
        customer_name: None,
        description: None,
        payment_method: None,
        metadata: serde_json::json!({}),
    };

    let first = queries::create_payment(&conn, &input, "K1").unwrap();
    let second = queries::create_payment(&conn, &input, "K1");
    assert!(matches!(second, Err(AppError::DuplicateKey)));

    // Exactly one payment row exists for the key
    let found = queries::get_payment_by_idempotency_key(&conn, "K1").unwrap().unwrap();
    assert_eq!(found.id, first.id);
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM payments", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_cleanup_purges_only_expired_records() {
    let pool = test_pool();
    let conn = pool.get().unwrap();
    let payment = create_test_payment(&conn, "10.00", "a@b.c");

    queries::put_idempotency_record(&conn, "expired", &payment.id, "{}", 0).unwrap();
    queries::put_idempotency_record(&conn, "live", &payment.id, "{}", 3600).unwrap();

    let now = Utc::now().timestamp();
    let purged = queries::cleanup_expired_idempotency_keys(&conn, now).unwrap();
    assert_eq!(purged, 1);

    assert!(queries::lookup_idempotent(&conn, "live", now).unwrap().is_some());
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM idempotency_keys", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 1);
}
