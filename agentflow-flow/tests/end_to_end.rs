//! End-to-end flow combinator scenarios (SPEC_FULL.md §8, spec.md §8
//! scenarios 2-7): exercised as whole-pipeline tests rather than unit tests
//! of a single method, matching how `agentflow-tool/tests/end_to_end.rs`
//! covers its own scenarios.

use agentflow_core::{Argument, Context};
use agentflow_flow::{CompletionStrategy, DoWhile, ErrorStrategy, Linear, ParallelList};
use agentflow_tool::{FnTool, Tool, ToolError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn step1() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "step1",
        "step1",
        "x * 2",
        vec![Argument::required("x", "input", "int")],
        |_ctx, kwargs| {
            Box::pin(async move {
                let x = kwargs["x"].as_i64().unwrap_or(0);
                Ok(json!({ "result": x * 2 }))
            })
        },
    ))
}

fn step2() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "step2",
        "step2",
        "result + 10",
        vec![Argument::required("result", "input", "int")],
        |_ctx, kwargs| {
            Box::pin(async move {
                let r = kwargs["result"].as_i64().unwrap_or(0);
                Ok(json!({ "final": r + 10 }))
            })
        },
    ))
}

/// Scenario 2: Linear of two tools, `step1(x)=x*2`, `step2(r)=r+10`.
#[tokio::test]
async fn scenario_linear_of_two_tools() {
    let linear = Linear::new("pipe", "pipe", "double then add ten", vec![step1(), step2()], None);
    let out = linear.call(None, json!({ "x": 5 })).await.unwrap();
    assert_eq!(out, json!({ "final": 20 }));
}

/// Scenario 3: second step fails the first time, succeeds on retry; the
/// failing step runs exactly twice in total across the initial call and the
/// retry.
#[tokio::test]
async fn scenario_linear_resume_after_failure() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let flaky_step2: Arc<dyn Tool> = {
        let attempts = attempts.clone();
        Arc::new(FnTool::new(
            "flaky_step2",
            "flaky_step2",
            "fails once, then behaves like step2",
            vec![Argument::required("result", "input", "int")],
            move |_ctx, kwargs| {
                let attempts = attempts.clone();
                Box::pin(async move {
                    let seen = attempts.fetch_add(1, Ordering::SeqCst);
                    if seen == 0 {
                        return Err(ToolError::Other("transient failure".into()));
                    }
                    let r = kwargs["result"].as_i64().unwrap_or(0);
                    Ok(json!({ "final": r + 10 }))
                })
            },
        ))
    };

    let linear = Arc::new(Linear::new(
        "pipe",
        "pipe",
        "double, flake, add ten",
        vec![step1(), flaky_step2],
        None,
    ));
    let ctx = Context::new();
    let first = linear.clone().call(Some(ctx.clone()), json!({ "x": 5 })).await;
    assert!(first.is_err());
    assert_eq!(ctx.get("step"), Some(json!(1)));

    let second = linear.retry(&ctx).await.unwrap();
    assert_eq!(second, json!({ "final": 20 }));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

fn sleep_echo() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "sleep",
        "sleep",
        "sleeps `duration` seconds, then returns it",
        vec![Argument::required("duration", "seconds to sleep", "float")],
        |_ctx, kwargs| {
            Box::pin(async move {
                let duration = kwargs["duration"].as_f64().unwrap_or(0.0);
                tokio::time::sleep(std::time::Duration::from_secs_f64(duration)).await;
                Ok(kwargs["duration"].clone())
            })
        },
    ))
}

/// Scenario 4: `all` completion strategy preserves order regardless of
/// per-item completion order.
#[tokio::test]
async fn scenario_parallel_list_all_strategy_preserves_order() {
    let parallel = ParallelList::new("sleepers", "sleepers", "sleeps every item", vec![], sleep_echo()).unwrap();
    let out = parallel
        .call(None, json!({ "duration": [0.05, 0.01] }))
        .await
        .unwrap();
    assert_eq!(out, json!([0.05, 0.01]));
}

/// Scenario 5: with 4 durations and `completion_count=2`, exactly 2 items
/// are non-null and 2 are null, at their original indices.
#[tokio::test]
async fn scenario_parallel_list_n_strategy_leaves_the_rest_null() {
    let parallel = ParallelList::new("sleepers", "sleepers", "stops at two", vec![], sleep_echo())
        .unwrap()
        .with_completion_strategy(CompletionStrategy::N(2))
        .unwrap();
    let out = parallel
        .call(None, json!({ "duration": [0.0, 0.0, 0.5, 0.5] }))
        .await
        .unwrap();
    let arr = out.as_array().unwrap();
    assert_eq!(arr.len(), 4);
    let non_null = arr.iter().filter(|v| !v.is_null()).count();
    assert_eq!(non_null, 2);
    // the two fast items are the ones that complete before the target is met
    assert_eq!(arr[0], json!(0.0));
    assert_eq!(arr[1], json!(0.0));
}

/// Scenario 6: inner tool fails on even values exactly once (each even value
/// fails its first invocation, then succeeds); `ignore` strategy records the
/// error at each failing index, `retry` fills both in, and the inner tool is
/// invoked exactly 5 times total (3 initial + 2 retried failures).
#[tokio::test]
async fn scenario_parallel_list_partial_retry_fixes_only_failed_indices() {
    let failed_once: Arc<std::sync::Mutex<std::collections::HashSet<i64>>> =
        Arc::new(std::sync::Mutex::new(std::collections::HashSet::new()));
    let total_calls = Arc::new(AtomicUsize::new(0));
    let flaky_square: Arc<dyn Tool> = {
        let failed_once = failed_once.clone();
        let total_calls = total_calls.clone();
        Arc::new(FnTool::new(
            "flaky_square",
            "flaky_square",
            "squares n, failing on each even value's first call only",
            vec![Argument::required("n", "input", "int")],
            move |_ctx, kwargs| {
                let failed_once = failed_once.clone();
                let total_calls = total_calls.clone();
                Box::pin(async move {
                    total_calls.fetch_add(1, Ordering::SeqCst);
                    let n = kwargs["n"].as_i64().unwrap_or(0);
                    if n % 2 == 0 && failed_once.lock().unwrap().insert(n) {
                        return Err(ToolError::Other("boom".into()));
                    }
                    Ok(json!(n * n))
                })
            },
        ))
    };

    let parallel = Arc::new(
        ParallelList::new("sq", "sq", "squares, ignoring failures", vec![], flaky_square)
            .unwrap()
            .with_error_strategy(ErrorStrategy::Ignore),
    );
    let ctx = Context::new();
    let first = parallel
        .clone()
        .call(Some(ctx.clone()), json!([{ "n": 2 }, { "n": 3 }, { "n": 4 }]))
        .await
        .unwrap();
    assert_eq!(first, json!([{ "error": "boom" }, 9, { "error": "boom" }]));

    let second = parallel.retry(&ctx).await.unwrap();
    assert_eq!(second, json!([4, 9, 16]));
    assert_eq!(total_calls.load(Ordering::SeqCst), 5);
}

/// Scenario 7: increment-by-one tool with `stop_condition: out >= 5`
/// terminates in 5 iterations with output 5.
#[tokio::test]
async fn scenario_do_while_to_threshold() {
    let incrementer: Arc<dyn Tool> = Arc::new(FnTool::new(
        "inc",
        "inc",
        "increments n by one",
        vec![Argument::required("n", "input", "int")],
        |_ctx, kwargs| {
            Box::pin(async move {
                let n = kwargs["n"].as_i64().unwrap_or(0);
                Ok(json!({ "n": n + 1 }))
            })
        },
    ));
    let loop_tool = DoWhile::new(
        "count_to_five",
        "count_to_five",
        "increments until n >= 5",
        vec![Argument::required("start", "starting n", "int")],
        incrementer,
        Box::new(|ctx, original| {
            let n = ctx
                .get("outputs")
                .and_then(|v| v.as_array().and_then(|a| a.last().cloned()))
                .and_then(|v| v["n"].as_i64())
                .unwrap_or_else(|| original["start"].as_i64().unwrap_or(0));
            json!({ "n": n })
        }),
        Box::new(|_ctx, out| out["n"].as_i64().unwrap_or(0) >= 5),
    );
    let out = loop_tool.call(None, json!({ "start": 0 })).await.unwrap();
    assert_eq!(out, json!({ "n": 5 }));
}
