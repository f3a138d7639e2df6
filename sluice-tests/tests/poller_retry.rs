//! Bounded polling against a warehouse with scripted latency
//!
//! A job that needs N polls to finish must succeed whenever the ceiling is
//! at least N and fail with `Exhausted` otherwise, never polling more than
//! the ceiling allows.

use sluice_core::{sql, Cell};
use sluice_runtime::{JobStatus, PollError, StatementError};
use sluice_tests::{session, MockWarehouse};
use std::sync::Arc;
use std::time::Duration;

/// Warehouse whose jobs finish on poll `polls_needed`
fn slow_warehouse(polls_needed: u32) -> Arc<MockWarehouse> {
    let warehouse = Arc::new(MockWarehouse::new());
    warehouse.set_transient_polls(polls_needed - 1);
    warehouse
}

#[tokio::test(start_paused = true)]
async fn ceiling_decides_success_for_every_latency() {
    for polls_needed in 1..=5u32 {
        for ceiling in 1..=6u32 {
            let warehouse = slow_warehouse(polls_needed);
            let session = session(&warehouse, ceiling);

            let handle = session
                .executor()
                .submit(&sql::schema_exists("public"))
                .await
                .unwrap();
            let result = session.poller().await_completion(&handle).await;

            if ceiling >= polls_needed {
                assert_eq!(
                    result,
                    Ok(JobStatus::Finished),
                    "needed {} polls with ceiling {}",
                    polls_needed,
                    ceiling
                );
                assert_eq!(warehouse.poll_count(), polls_needed);
            } else {
                assert_eq!(
                    result,
                    Err(PollError::Exhausted {
                        handle: handle.clone(),
                        attempts: ceiling
                    }),
                    "needed {} polls with ceiling {}",
                    polls_needed,
                    ceiling
                );
                assert_eq!(warehouse.poll_count(), ceiling);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn waits_the_fixed_delay_between_polls() {
    let warehouse = slow_warehouse(3);
    let session = session(&warehouse, 5);

    let started = tokio::time::Instant::now();
    session.execute(&sql::schema_exists("public")).await.unwrap();

    // Two 30s sleeps separate three polls; none follows the last
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn exhausted_wait_is_bounded_by_the_policy() {
    let warehouse = slow_warehouse(10);
    let session = session(&warehouse, 4);

    let started = tokio::time::Instant::now();
    let err = session.execute(&sql::schema_exists("public")).await.unwrap_err();

    assert!(matches!(
        err,
        StatementError::Poll(PollError::Exhausted { attempts: 4, .. })
    ));
    assert_eq!(started.elapsed(), session.poller().policy().max_wait());
    assert_eq!(started.elapsed(), Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn query_result_is_read_after_latency() {
    let warehouse = slow_warehouse(3);
    let session = session(&warehouse, 3);

    let probe = session.query(&sql::schema_exists("public")).await.unwrap();

    assert_eq!(probe.rows(), &[vec![Cell::Integer(1)]]);
    assert_eq!(warehouse.poll_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn paired_wait_reports_the_failed_job() {
    let warehouse = slow_warehouse(2);
    warehouse.fail_statements_matching(r"^CREATE SCHEMA broken$", "permission denied");
    let session = session(&warehouse, 5);

    let ok = session
        .executor()
        .submit(&sql::schema_exists("public"))
        .await
        .unwrap();
    let bad = session
        .executor()
        .submit(&sql::create_schema("broken"))
        .await
        .unwrap();

    let err = session.poller().await_both(&ok, &bad).await.unwrap_err();

    match err {
        PollError::JobFailed { handle, reason } => {
            assert_eq!(handle, bad);
            assert_eq!(reason, "permission denied");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Both jobs were polled to a terminal state
    assert_eq!(warehouse.poll_count(), 4);
    assert!(!warehouse.has_schema("broken"));
}

#[tokio::test(start_paused = true)]
async fn paired_wait_runs_concurrently() {
    let warehouse = slow_warehouse(3);
    let session = session(&warehouse, 5);

    let started = tokio::time::Instant::now();
    session
        .execute_pair(&sql::schema_exists("public"), &sql::create_schema("stages"))
        .await
        .unwrap();

    // Each job sleeps 60s; concurrent pollers overlap those sleeps
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert!(warehouse.has_schema("stages"));
}
