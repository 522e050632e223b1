//! Integration tests for the workflow execution engine.
//!
//! These run entire workflows through the façade with `MockJob`/`FnJob`
//! doubles and an in-memory tracker — no external services required.
//! Within-layer completion order is deliberately never asserted.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use jobs::func::FnJob;
use jobs::mock::{MockBehaviour, MockJob};
use serde_json::{json, Value};
use tracker::MemoryTracker;

use crate::decider::CompareOp;
use crate::error::EngineError;
use crate::models::{InputRef, InputSpec, RouteDecision, StepStatus, WorkflowStatus};
use crate::retry::RetryPolicy;
use crate::snapshot::ContextSnapshot;
use crate::workflow::Workflow;

/// Capture the final snapshot through the summary callback.
fn capture() -> (
    Arc<Mutex<Option<ContextSnapshot>>>,
    impl FnOnce(&ContextSnapshot) + Send + 'static,
) {
    let slot: Arc<Mutex<Option<ContextSnapshot>>> = Arc::new(Mutex::new(None));
    let writer = slot.clone();
    (slot, move |snapshot: &ContextSnapshot| {
        *writer.lock().unwrap() = Some(snapshot.clone());
    })
}

fn spec(entries: Vec<(&str, InputRef)>) -> InputSpec {
    entries
        .into_iter()
        .map(|(name, input_ref)| (name.to_string(), input_ref))
        .collect()
}

// ============================================================
// Scenario: linear fetch-then-process
// ============================================================

#[tokio::test]
async fn linear_fetch_then_sum() {
    let fetch = Arc::new(MockJob::returning("fetch", json!({ "items": [1, 2, 3] })));
    let sum = Arc::new(FnJob::new("sum", |inputs, _ctx| {
        let total: i64 = inputs["total"]
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_i64).sum())
            .unwrap_or(0);
        Ok(json!({ "total": total }))
    }));

    let (snapshot, on_summary) = capture();
    let workflow = Workflow::new("linear")
        .add_step("fetch", fetch.clone())
        .add_step_with_inputs("sum", sum, spec(vec![("total", InputRef::dep("fetch", "items"))]))
        .connect("fetch", "sum")
        .on_summary(on_summary);

    assert_eq!(workflow.plan().layers, vec![vec!["fetch"], vec!["sum"]]);

    let results = workflow.execute().await.unwrap();
    assert_eq!(results["fetch"], json!({ "items": [1, 2, 3] }));
    assert_eq!(results["sum"], json!({ "total": 6 }));
    assert_eq!(fetch.call_count(), 1);

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Success);
    assert_eq!(snapshot.step_status("fetch"), Some(StepStatus::Success));
    assert_eq!(snapshot.step_status("sum"), Some(StepStatus::Success));
}

// ============================================================
// Scenario: parallel fan-out
// ============================================================

#[tokio::test]
async fn parallel_fan_out_joins_all_outputs() {
    let workflow = Workflow::new("fan-out")
        .add_step("a", Arc::new(MockJob::returning("a", json!({ "v": "a" }))))
        .add_step("b", Arc::new(MockJob::returning("b", json!({ "v": "b" }))))
        .add_step("c", Arc::new(MockJob::returning("c", json!({ "v": "c" }))))
        .add_step_with_inputs(
            "d",
            Arc::new(FnJob::new("d", |inputs, _ctx| {
                Ok(json!({
                    "joined": format!(
                        "{}{}{}",
                        inputs["from_a"].as_str().unwrap_or("?"),
                        inputs["from_b"].as_str().unwrap_or("?"),
                        inputs["from_c"].as_str().unwrap_or("?"),
                    )
                }))
            })),
            spec(vec![
                ("from_a", InputRef::dep("a", "v")),
                ("from_b", InputRef::dep("b", "v")),
                ("from_c", InputRef::dep("c", "v")),
            ]),
        )
        .connect("a", "d")
        .connect("b", "d")
        .connect("c", "d");

    assert_eq!(workflow.plan().layers, vec![vec!["a", "b", "c"], vec!["d"]]);

    let results = workflow.execute().await.unwrap();
    assert_eq!(results["d"], json!({ "joined": "abc" }));
    assert_eq!(results.len(), 4);
}

// ============================================================
// Scenario: retry with exponential backoff
// ============================================================

#[tokio::test]
async fn retry_with_backoff_recovers() {
    let flaky = Arc::new(MockJob::flaky("flaky", 2, json!({ "ok": true })));

    let (snapshot, on_summary) = capture();
    let started = Instant::now();
    let results = Workflow::new("retry")
        .add_step("flaky", flaky.clone())
        .with_retry(RetryPolicy::new(3, 0.01, 2.0, 60.0))
        .on_summary(on_summary)
        .execute()
        .await
        .unwrap();

    // Two failed attempts sleep 0.01s + 0.02s before the third succeeds.
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(flaky.call_count(), 3);
    assert_eq!(results["flaky"], json!({ "ok": true }));

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    let record = snapshot.execution("flaky").unwrap();
    assert_eq!(record.status, StepStatus::Success);
    assert_eq!(record.attempts, 3);
    assert!(record.logs.iter().any(|l| l.contains("Attempt 1 failed")));
    assert!(record.logs.iter().any(|l| l.contains("Attempt 2 failed")));
}

#[tokio::test]
async fn exhausted_retries_keep_every_error() {
    let (snapshot, on_summary) = capture();
    let result = Workflow::new("exhausted")
        .add_step("bad", Arc::new(MockJob::failing("bad", "connection refused")))
        .with_retry(RetryPolicy::new(2, 0.0, 1.0, 60.0))
        .on_summary(on_summary)
        .execute()
        .await;

    assert!(matches!(
        result,
        Err(EngineError::StepFailed { step_id, attempts: 2, .. }) if step_id == "bad"
    ));

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    let record = snapshot.execution("bad").unwrap();
    assert_eq!(record.status, StepStatus::Fail);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.errors.len(), 2);
    assert_eq!(snapshot.status, WorkflowStatus::Fail);
}

// ============================================================
// Scenario: stop-on-fail abort
// ============================================================

#[tokio::test]
async fn stop_on_fail_aborts_downstream() {
    let never = Arc::new(MockJob::returning("never", json!({ "ran": true })));

    let (snapshot, on_summary) = capture();
    let result = Workflow::new("abort")
        .add_step("fail", Arc::new(MockJob::failing("fail", "always broken")))
        .add_step("never", never.clone())
        .connect("fail", "never")
        .on_summary(on_summary)
        .execute()
        .await;

    assert!(matches!(result, Err(EngineError::StepFailed { .. })));
    assert_eq!(never.call_count(), 0);

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Fail);
    assert_eq!(snapshot.step_status("fail"), Some(StepStatus::Fail));
    assert_eq!(snapshot.step_status("never"), Some(StepStatus::Pending));
    assert!(snapshot.results.is_empty());
}

#[tokio::test]
async fn non_fatal_failure_feeds_null_downstream() {
    let (snapshot, on_summary) = capture();
    let results = Workflow::new("soft-fail")
        .add_step("shaky", Arc::new(MockJob::failing("shaky", "flapping")))
        .stop_on_fail(false)
        .add_step_with_inputs(
            "after",
            Arc::new(FnJob::new("after", |inputs, _ctx| {
                Ok(json!({ "saw_null": inputs["upstream"].is_null() }))
            })),
            spec(vec![("upstream", InputRef::dep("shaky", "value"))]),
        )
        .connect("shaky", "after")
        .on_summary(on_summary)
        .execute()
        .await
        .unwrap();

    // Downstream ran with null inputs; the workflow still succeeds.
    assert_eq!(results["after"], json!({ "saw_null": true }));
    assert!(!results.contains_key("shaky"));

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Success);
    assert_eq!(snapshot.step_status("shaky"), Some(StepStatus::Fail));
    assert_eq!(snapshot.step_status("after"), Some(StepStatus::Success));
}

// ============================================================
// Scenario: decider routing
// ============================================================

#[tokio::test]
async fn decider_routes_to_matching_branch_only() {
    let high = Arc::new(MockJob::returning("high", json!({ "path": "high" })));
    let low = Arc::new(MockJob::returning("low", json!({ "path": "low" })));

    let (snapshot, on_summary) = capture();
    let results = Workflow::new("routing")
        .add_step("classify", Arc::new(MockJob::returning("classify", json!({ "score": 0.9 }))))
        .route("score", CompareOp::Ge, 0.8, "high")
        .otherwise("low")
        .add_step("high", high.clone())
        .add_step("low", low.clone())
        .connect("classify", "high")
        .connect("classify", "low")
        .on_summary(on_summary)
        .execute()
        .await
        .unwrap();

    assert_eq!(high.call_count(), 1);
    assert_eq!(low.call_count(), 0);
    assert!(results.contains_key("high"));
    assert!(!results.contains_key("low"));

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot.step_status("high"), Some(StepStatus::Success));
    assert_eq!(snapshot.step_status("low"), Some(StepStatus::Pending));
    assert_eq!(snapshot.status, WorkflowStatus::Success);
}

#[tokio::test]
async fn routing_callback_can_fan_out() {
    let left = Arc::new(MockJob::returning("left", json!({})));
    let right = Arc::new(MockJob::returning("right", json!({})));
    let stray = Arc::new(MockJob::returning("stray", json!({})));

    let results = Workflow::new("fan-routing")
        .add_step("src", Arc::new(MockJob::returning("src", json!({ "n": 2 }))))
        .with_router(|_output| {
            RouteDecision::Fan(vec!["left".to_string(), "right".to_string()])
        })
        .add_step("left", left.clone())
        .add_step("right", right.clone())
        .add_step("stray", stray.clone())
        .connect("src", "left")
        .connect("src", "right")
        .connect("src", "stray")
        .execute()
        .await
        .unwrap();

    assert_eq!(left.call_count(), 1);
    assert_eq!(right.call_count(), 1);
    // The static edge to `stray` was cleared by the routing decision.
    assert_eq!(stray.call_count(), 0);
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn unknown_route_fails_a_stopping_step() {
    let result = Workflow::new("bad-route")
        .add_step("src", Arc::new(MockJob::returning("src", json!({}))))
        .with_router(|_output| RouteDecision::To("ghost".to_string()))
        .execute()
        .await;

    assert!(matches!(
        result,
        Err(EngineError::UnknownRoute { step_id, target })
            if step_id == "src" && target == "ghost"
    ));
}

#[tokio::test]
async fn unknown_route_is_dropped_on_non_stopping_step() {
    let results = Workflow::new("lenient-route")
        .add_step("src", Arc::new(MockJob::returning("src", json!({}))))
        .stop_on_fail(false)
        .with_router(|_output| RouteDecision::To("ghost".to_string()))
        .execute()
        .await
        .unwrap();

    assert!(results.contains_key("src"));
}

// ============================================================
// Scenario: timeout then recovery
// ============================================================

#[tokio::test]
async fn timeout_fails_attempt_then_recovery_succeeds() {
    // First attempt sleeps past the timeout; the retry sleeps well
    // under it and succeeds.
    let sleepy = Arc::new(MockJob::sleepy(
        "sleepy",
        Duration::from_millis(200),
        Duration::from_millis(5),
        json!({ "woke": true }),
    ));

    let (snapshot, on_summary) = capture();
    let results = Workflow::new("timeout")
        .add_step("sleepy", sleepy.clone())
        .with_timeout(Duration::from_millis(50))
        .with_retry(RetryPolicy::new(2, 0.0, 1.0, 60.0))
        .on_summary(on_summary)
        .execute()
        .await
        .unwrap();

    assert_eq!(results["sleepy"], json!({ "woke": true }));

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    let record = snapshot.execution("sleepy").unwrap();
    assert_eq!(record.status, StepStatus::Success);
    assert_eq!(record.attempts, 2);
    assert!(record.logs.iter().any(|l| l.contains("timed out")));
}

// ============================================================
// Boundary cases
// ============================================================

#[tokio::test]
async fn empty_graph_succeeds_with_empty_results() {
    let (snapshot, on_summary) = capture();
    let results = Workflow::new("empty").on_summary(on_summary).execute().await.unwrap();
    assert!(results.is_empty());

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Success);
}

#[tokio::test]
async fn single_step_runs_once() {
    let solo = Arc::new(MockJob::returning("solo", json!({ "n": 1 })));
    let results = Workflow::new("solo")
        .add_step("solo", solo.clone())
        .execute()
        .await
        .unwrap();
    assert_eq!(solo.call_count(), 1);
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn cycle_members_still_run_as_singletons() {
    let x = Arc::new(MockJob::returning("x", json!({})));
    let y = Arc::new(MockJob::returning("y", json!({})));

    let (snapshot, on_summary) = capture();
    let results = Workflow::new("cycle")
        .add_step("a", Arc::new(MockJob::returning("a", json!({}))))
        .add_step("x", x.clone())
        .add_step("y", y.clone())
        .connect("x", "y")
        .connect("y", "x")
        .on_summary(on_summary)
        .execute()
        .await
        .unwrap();

    // The workflow terminates and every step ran exactly once.
    assert_eq!(results.len(), 3);
    assert_eq!(x.call_count(), 1);
    assert_eq!(y.call_count(), 1);

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    let record = snapshot.execution("x").unwrap();
    assert!(record.logs.iter().any(|l| l.contains("cycle")));
}

#[tokio::test]
async fn fully_cyclic_graph_is_a_fatal_error() {
    let result = Workflow::new("deadlock")
        .add_step("x", Arc::new(MockJob::returning("x", json!({}))))
        .add_step("y", Arc::new(MockJob::returning("y", json!({}))))
        .connect("x", "y")
        .connect("y", "x")
        .execute()
        .await;

    assert!(matches!(result, Err(EngineError::DeadlockedGraph)));
}

#[tokio::test]
async fn validation_rejection_skips_the_step() {
    let picky = Arc::new(MockJob::new(
        "picky",
        MockBehaviour::RejectValidation("inputs must not be empty".into()),
    ));

    let (snapshot, on_summary) = capture();
    let results = Workflow::new("validation")
        .add_step("picky", picky.clone())
        .on_summary(on_summary)
        .execute()
        .await
        .unwrap();

    assert_eq!(picky.call_count(), 0);
    assert!(!results.contains_key("picky"));

    let snapshot = snapshot.lock().unwrap().clone().unwrap();
    let record = snapshot.execution("picky").unwrap();
    assert_eq!(record.status, StepStatus::Skipped);
    assert_eq!(record.skip_reason.as_deref(), Some("validation_failed"));
    assert_eq!(snapshot.status, WorkflowStatus::Success);
}

#[tokio::test]
async fn globals_reach_jobs_but_inputs_win() {
    let mut globals = IndexMap::new();
    globals.insert("region".to_string(), json!("eu-west-1"));
    globals.insert("limit".to_string(), json!(999));

    let results = Workflow::new("globals")
        .add_step_with_inputs(
            "probe",
            Arc::new(FnJob::new("probe", |inputs, ctx| {
                Ok(json!({
                    "region": inputs["region"],
                    "limit": inputs["limit"],
                    "ctx_region": ctx.globals["region"],
                }))
            })),
            spec(vec![("limit", InputRef::literal(10))]),
        )
        .globals(globals)
        .execute()
        .await
        .unwrap();

    assert_eq!(
        results["probe"],
        json!({ "region": "eu-west-1", "limit": 10, "ctx_region": "eu-west-1" })
    );
}

#[tokio::test]
async fn max_parallelism_one_still_completes_a_wide_layer() {
    let workflow = Workflow::new("bounded")
        .add_step("a", Arc::new(MockJob::returning("a", json!({ "v": 1 }))))
        .add_step("b", Arc::new(MockJob::returning("b", json!({ "v": 2 }))))
        .add_step("c", Arc::new(MockJob::returning("c", json!({ "v": 3 }))))
        .max_parallelism(1);

    let results = workflow.execute().await.unwrap();
    assert_eq!(results.len(), 3);
}

// ============================================================
// Tracker stream
// ============================================================

#[tokio::test]
async fn tracker_sees_mutations_in_causal_order() {
    let tracker = MemoryTracker::new();
    Workflow::new("tracked")
        .add_step("a", Arc::new(MockJob::returning("a", json!({ "v": 1 }))))
        .add_step_with_inputs(
            "b",
            Arc::new(MockJob::returning("b", json!({ "v": 2 }))),
            spec(vec![("upstream", InputRef::dep("a", "v"))]),
        )
        .tracker(Arc::new(tracker.clone()))
        .execute()
        .await
        .unwrap();

    let payloads = tracker.payloads();
    assert!(!payloads.is_empty());

    // Workflow statuses only ever move forward through the stream.
    let rank = |status: &str| match status {
        "pending" => 0,
        "running" => 1,
        _ => 2,
    };
    let mut last_rank = 0;
    for payload in &payloads {
        let status = payload["status"].as_str().unwrap();
        assert!(rank(status) >= last_rank, "status regressed to {status}");
        last_rank = rank(status);
    }

    // Step `a` completes before step `b` starts anywhere in the stream.
    let a_success_index = payloads
        .iter()
        .position(|p| p["executed_jobs"]["a"]["status"] == "success")
        .expect("a success snapshot");
    let b_running_index = payloads
        .iter()
        .position(|p| p["executed_jobs"]["b"]["status"] == "running")
        .expect("b running snapshot");
    assert!(a_success_index < b_running_index);

    // Final payload is terminal and carries the results.
    let last = payloads.last().unwrap();
    assert_eq!(last["status"], "success");
    assert_eq!(last["results"]["b"]["v"], 2);
}

// ============================================================
// Determinism
// ============================================================

#[tokio::test]
async fn identical_definitions_yield_identical_results() {
    async fn run_once() -> IndexMap<String, Value> {
        Workflow::new("repeat")
            .add_step("a", Arc::new(MockJob::returning("a", json!({ "v": [1, 2] }))))
            .add_step_with_inputs(
                "b",
                Arc::new(FnJob::new("b", |inputs, _ctx| {
                    Ok(json!({ "echo": inputs["v"] }))
                })),
                spec(vec![("v", InputRef::dep("a", "v"))]),
            )
            .execute()
            .await
            .unwrap()
    }

    let first = run_once().await;
    let second = run_once().await;
    assert_eq!(first, second);
}
