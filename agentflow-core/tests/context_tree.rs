//! End-to-end coverage of the context tree: propagation, snapshotting, and
//! the wait/future completion signal, exercised together rather than one
//! unit at a time.

use agentflow_core::{kind, Context, Event};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn deep_tree_propagates_to_every_ancestor() {
    let root = Context::new();
    let mid = root.child_context();
    let leaf = mid.child_context();

    let root_seen = Arc::new(AtomicUsize::new(0));
    let mid_seen = Arc::new(AtomicUsize::new(0));
    {
        let c = root_seen.clone();
        root.on_event("progress", false, move |_src, _ev| {
            c.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let c = mid_seen.clone();
        mid.on_event("progress", false, move |_src, _ev| {
            c.fetch_add(1, Ordering::SeqCst);
        });
    }

    leaf.broadcast(Event::new("progress", json!({"pct": 50})));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(mid_seen.load(Ordering::SeqCst), 1);
    assert_eq!(root_seen.load(Ordering::SeqCst), 1);
    assert_eq!(leaf.history().len(), 1);
    // mid and root did not originate the event, so it is not in their own
    // history, only forwarded to their propagating listeners.
    assert!(mid.history().is_empty());
    assert!(root.history().is_empty());
}

#[tokio::test]
async fn lifecycle_listeners_fire_once_on_completion() {
    let ctx = Context::new();
    let outputs = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));
    {
        let c = outputs.clone();
        ctx.on_output(move |_ctx, _value| {
            c.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let c = ends.clone();
        ctx.on_end(move |_ctx| {
            c.fetch_add(1, Ordering::SeqCst);
        });
    }
    ctx.set_output(json!("done")).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(outputs.load(Ordering::SeqCst), 1);
    assert_eq!(ends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exception_broadcasts_tool_exception_event() {
    let ctx = Context::new();
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let c = seen.clone();
        ctx.on_event(kind::TOOL_EXCEPTION, false, move |_src, ev| {
            assert_eq!(ev.data["error"], json!("kaboom"));
            c.fetch_add(1, Ordering::SeqCst);
        });
    }
    ctx.set_exception(agentflow_core::ContextException::from_message("kaboom"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn to_json_round_trips_a_whole_tree() {
    let root = Context::new();
    root.set("count", json!(3));
    root.x().set("shared", json!("s"));
    let child = root.child_context();
    child.set_args(json!({"n": 1})).unwrap();
    child.set_output(json!(9)).unwrap();
    root.set_output(json!("root-out")).unwrap();

    let snapshot = root.to_json();
    let restored = Context::from_json(&snapshot).unwrap();

    assert_eq!(restored.get("count"), Some(json!(3)));
    assert_eq!(restored.x().get("shared"), Some(json!("s")));
    assert_eq!(restored.output(), Some(json!("root-out")));
    let restored_child = &restored.children()[0];
    assert_eq!(restored_child.args(), Some(json!({"n": 1})));
    assert_eq!(restored_child.output(), Some(json!(9)));
    // execution scope still resolves to the restored root from the child
    assert_eq!(restored_child.x().get("shared"), Some(json!("s")));
}
