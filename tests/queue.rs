//! Job queue tests: dedup by job id, delayed delivery, lease-based
//! at-least-once redelivery.

mod common;

use common::*;

#[test]
fn test_enqueue_dedups_by_job_id() {
    let state = test_state();
    let conn = state.db.get().unwrap();

    let kind = JobKind::ProcessPayment {
        payment_id: "pg_pay_1".to_string(),
    };
    assert!(queue::enqueue(&conn, QueueName::Payments, "pg_pay_1", &kind).unwrap());
    // Intake retry re-enqueues the same job id: no-op
    assert!(!queue::enqueue(&conn, QueueName::Payments, "pg_pay_1", &kind).unwrap());

    assert_eq!(count_jobs(&conn, "payments"), 1);
}

#[test]
fn test_claim_round_trips_the_job_kind() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        let kind = JobKind::DeliverWebhook {
            event_id: "pg_evt_1".to_string(),
        };
        queue::enqueue(&conn, QueueName::Webhooks, "pg_evt_1", &kind).unwrap();
    }

    let jobs = state.queues.webhooks.claim(10).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, "pg_evt_1");
    assert_eq!(jobs[0].attempts, 1);
    match &jobs[0].kind {
        JobKind::DeliverWebhook { event_id } => assert_eq!(event_id, "pg_evt_1"),
        other => panic!("wrong kind: {:?}", other),
    }
}

#[test]
fn test_claimed_job_is_leased() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        let kind = JobKind::ProcessPayment {
            payment_id: "pg_pay_1".to_string(),
        };
        queue::enqueue(&conn, QueueName::Payments, "pg_pay_1", &kind).unwrap();
    }

    assert_eq!(state.queues.payments.claim(10).unwrap().len(), 1);
    // Still leased: nothing to hand out
    assert!(state.queues.payments.claim(10).unwrap().is_empty());
}

#[test]
fn test_queues_are_isolated() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        let kind = JobKind::ProcessPayment {
            payment_id: "pg_pay_1".to_string(),
        };
        queue::enqueue(&conn, QueueName::Payments, "pg_pay_1", &kind).unwrap();
    }

    assert!(state.queues.webhooks.claim(10).unwrap().is_empty());
    assert_eq!(state.queues.payments.claim(10).unwrap().len(), 1);
}

#[test]
fn test_complete_removes_the_job() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        let kind = JobKind::ProcessPayment {
            payment_id: "pg_pay_1".to_string(),
        };
        queue::enqueue(&conn, QueueName::Payments, "pg_pay_1", &kind).unwrap();
    }

    let jobs = state.queues.payments.claim(1).unwrap();
    state.queues.payments.complete(&jobs[0].id).unwrap();

    let conn = state.db.get().unwrap();
    assert_eq!(count_jobs(&conn, "payments"), 0);

    // Once completed, the same id may be enqueued again (webhook retries
    // re-enqueue the event id after the prior job finished).
    let kind = JobKind::ProcessPayment {
        payment_id: "pg_pay_1".to_string(),
    };
    assert!(queue::enqueue(&conn, QueueName::Payments, "pg_pay_1", &kind).unwrap());
}

#[test]
fn test_released_job_is_redelivered() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        let kind = JobKind::ProcessPayment {
            payment_id: "pg_pay_1".to_string(),
        };
        queue::enqueue(&conn, QueueName::Payments, "pg_pay_1", &kind).unwrap();
    }

    let jobs = state.queues.payments.claim(1).unwrap();
    state.queues.payments.release(&jobs[0].id).unwrap();

    // Release schedules a short redelivery delay; collapse it
    {
        let conn = state.db.get().unwrap();
        conn.execute("UPDATE jobs SET run_at = run_at - 10", []).unwrap();
    }

    let redelivered = state.queues.payments.claim(1).unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].id, "pg_pay_1");
    assert_eq!(redelivered[0].attempts, 2);
}

#[test]
fn test_delayed_job_not_claimable_until_due() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        let kind = JobKind::DeliverWebhook {
            event_id: "pg_evt_1".to_string(),
        };
        queue::enqueue_delayed(&conn, QueueName::Webhooks, "pg_evt_1", &kind, 3600).unwrap();
    }

    assert!(state.queues.webhooks.claim(10).unwrap().is_empty());

    {
        let conn = state.db.get().unwrap();
        conn.execute("UPDATE jobs SET run_at = run_at - 3601", []).unwrap();
    }
    assert_eq!(state.queues.webhooks.claim(10).unwrap().len(), 1);
}

#[test]
fn test_counts_reflect_job_states() {
    let state = test_state();
    {
        let conn = state.db.get().unwrap();
        for (id, delay) in [("a", 0), ("b", 0), ("c", 3600)] {
            let kind = JobKind::ProcessPayment {
                payment_id: id.to_string(),
            };
            queue::enqueue_delayed(&conn, QueueName::Payments, id, &kind, delay).unwrap();
        }
    }

    let counts = state.queues.payments.counts().unwrap();
    assert_eq!(counts.ready, 2);
    assert_eq!(counts.delayed, 1);
    assert_eq!(counts.in_flight, 0);

    state.queues.payments.claim(1).unwrap();
    let counts = state.queues.payments.counts().unwrap();
    assert_eq!(counts.ready, 1);
    assert_eq!(counts.in_flight, 1);
}
