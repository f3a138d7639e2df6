//! Prometheus metrics for statement execution and pipeline progress

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    /// Total number of statement submissions
    ///
    /// Labels:
    /// - status: "accepted", "rejected"
    pub static ref STATEMENTS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sluice_statements_submitted_total",
        "Total number of statements submitted to the warehouse",
        &["status"]
    )
    .expect("sluice_statements_submitted_total metric registration");

    /// Total number of status polls
    ///
    /// Labels:
    /// - response: "submitted", "running", "finished", "failed", "unavailable", "error"
    pub static ref POLL_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sluice_poll_attempts_total",
        "Total number of statement status polls",
        &["response"]
    )
    .expect("sluice_poll_attempts_total metric registration");

    /// Time from first poll to terminal state or exhaustion, in seconds
    ///
    /// Labels:
    /// - outcome: "finished", "failed", "exhausted", "error"
    pub static ref STATEMENT_WAIT_DURATION: HistogramVec = register_histogram_vec!(
        "sluice_statement_wait_duration_seconds",
        "Time spent waiting for statements to reach a terminal state",
        &["outcome"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .expect("sluice_statement_wait_duration_seconds metric registration");

    /// Total number of data quality findings
    ///
    /// Labels:
    /// - kind: "null_violation", "pk_duplicate", "fk_orphan"
    pub static ref VALIDATION_FINDINGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sluice_validation_findings_total",
        "Total number of data quality findings",
        &["kind"]
    )
    .expect("sluice_validation_findings_total metric registration");

    /// Total number of pipeline stage transitions
    ///
    /// Labels:
    /// - stage: target state name
    /// - status: "success", "failure"
    pub static ref PIPELINE_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sluice_pipeline_transitions_total",
        "Total number of pipeline stage transitions",
        &["stage", "status"]
    )
    .expect("sluice_pipeline_transitions_total metric registration");
}
