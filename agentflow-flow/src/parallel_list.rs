//! Fan-out-over-a-list combinator.

use crate::error::FlowError;
use agentflow_core::{kind, AttachedKind, Argument, Context, ContextException, Event};
use agentflow_tool::{derive_context, Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// How many of the fanned-out calls must succeed before `ParallelList`
/// returns, rather than waiting for every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStrategy {
    /// Wait for every item.
    All,
    /// Return as soon as one item succeeds.
    Any,
    /// Return once exactly `usize` items have succeeded.
    N(usize),
    /// Return once more than half the items have succeeded
    /// (`len / 2 + 1`, the majority tie-break).
    Majority,
}

/// What to do when an item's call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Count a failure the same as any other completion and keep going.
    Ignore,
    /// Abort the remaining items and fail the whole call.
    Fail,
}

type ArgsTransform = Box<dyn Fn(Value) -> Value + Send + Sync>;
type ResultFormatter = Box<dyn Fn(&Context, &[Value]) -> Value + Send + Sync>;

/// Calls one inner [`Tool`] once per item of a reshaped list input,
/// concurrently, bounded by an optional worker cap, and reduces the
/// per-item results according to a [`CompletionStrategy`] and
/// [`ErrorStrategy`].
pub struct ParallelList {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    inner: Arc<dyn Tool>,
    rename: HashMap<String, String>,
    single_input_arg: Option<String>,
    args_transform: Option<ArgsTransform>,
    completion_strategy: CompletionStrategy,
    error_strategy: ErrorStrategy,
    max_workers: Option<usize>,
    result_formatter: Option<ResultFormatter>,
}

impl ParallelList {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        args: Vec<Argument>,
        inner: Arc<dyn Tool>,
    ) -> Result<Self, FlowError> {
        Ok(Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            args,
            inner,
            rename: HashMap::new(),
            single_input_arg: None,
            args_transform: None,
            completion_strategy: CompletionStrategy::All,
            error_strategy: ErrorStrategy::Ignore,
            max_workers: None,
            result_formatter: None,
        })
    }

    /// Maps caller-facing column/argument names onto the inner tool's own
    /// argument names after reshaping.
    pub fn with_rename(mut self, rename: HashMap<String, String>) -> Self {
        self.rename = rename;
        self
    }

    /// Reads items from `raw[name]` instead of inferring a shape from
    /// `raw` itself.
    pub fn with_single_input_arg(mut self, name: impl Into<String>) -> Self {
        self.single_input_arg = Some(name.into());
        self
    }

    /// Runs before reshaping, letting the caller preprocess raw input into
    /// one of the recognized shapes.
    pub fn with_args_transform(mut self, f: ArgsTransform) -> Self {
        self.args_transform = Some(f);
        self
    }

    pub fn with_completion_strategy(mut self, strategy: CompletionStrategy) -> Result<Self, FlowError> {
        if let CompletionStrategy::N(0) = strategy {
            return Err(FlowError::InvalidConfiguration(
                "completion_count must be at least 1 for the N strategy".into(),
            ));
        }
        self.completion_strategy = strategy;
        Ok(self)
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_result_formatter(mut self, f: ResultFormatter) -> Self {
        self.result_formatter = Some(f);
        self
    }

    fn completion_target(&self, n: usize) -> usize {
        match self.completion_strategy {
            CompletionStrategy::All => n,
            CompletionStrategy::Any => 1.min(n),
            CompletionStrategy::N(k) => k.min(n),
            CompletionStrategy::Majority => (n / 2 + 1).min(n),
        }
    }

    fn apply_rename(&self, mut item: Value) -> Value {
        if self.rename.is_empty() {
            return item;
        }
        if let Some(obj) = item.as_object_mut() {
            for (outer, inner) in &self.rename {
                if let Some(v) = obj.remove(outer) {
                    obj.insert(inner.clone(), v);
                }
            }
        }
        item
    }

    fn rows_from_columns<'a>(
        &self,
        columns: impl Iterator<Item = (String, &'a Value)>,
    ) -> Result<Vec<Value>, FlowError> {
        let columns: Vec<(String, &Value)> = columns.collect();
        let n = columns
            .iter()
            .filter_map(|(_, v)| v.as_array().map(|a| a.len()))
            .max()
            .ok_or_else(|| {
                FlowError::InvalidConfiguration("no per-item list found among input columns".into())
            })?;
        let mut rows: Vec<Map<String, Value>> = (0..n).map(|_| Map::new()).collect();
        for (key, column) in columns {
            match column.as_array() {
                Some(values) if values.len() == n => {
                    for (row, value) in rows.iter_mut().zip(values.iter()) {
                        row.insert(key.clone(), value.clone());
                    }
                }
                Some(values) => {
                    return Err(FlowError::InvalidConfiguration(format!(
                        "column `{key}` has {} items, expected {n}",
                        values.len()
                    )))
                }
                None => {
                    for row in rows.iter_mut() {
                        row.insert(key.clone(), column.clone());
                    }
                }
            }
        }
        Ok(rows
            .into_iter()
            .map(|r| self.apply_rename(Value::Object(r)))
            .collect())
    }

    /// Reshapes whatever the caller supplied into one kwargs object per
    /// item. Defaults from the inner tool's own schema are never consulted
    /// here: a missing value stays missing until `Tool::call` fills it.
    fn normalize(&self, raw: &Value) -> Result<Vec<Value>, FlowError> {
        let transformed;
        let raw = match &self.args_transform {
            Some(f) => {
                transformed = f(raw.clone());
                &transformed
            }
            None => raw,
        };

        if let Some(single) = &self.single_input_arg {
            let items = raw
                .get(single)
                .and_then(|v| v.as_array())
                .ok_or_else(|| FlowError::InvalidConfiguration(format!("expected `{single}` to be a list")))?;
            let sole_param = self.inner.args().first().map(|a| a.name.clone());
            return items
                .iter()
                .map(|item| {
                    if item.is_object() {
                        Ok(self.apply_rename(item.clone()))
                    } else if let Some(param) = &sole_param {
                        Ok(self.apply_rename(json!({ param: item })))
                    } else {
                        Err(FlowError::InvalidConfiguration(
                            "inner tool has no arguments to receive a scalar item".into(),
                        ))
                    }
                })
                .collect();
        }

        match raw {
            Value::Array(items) if items.iter().all(|v| v.is_object()) => {
                Ok(items.iter().map(|v| self.apply_rename(v.clone())).collect())
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(|v| v.is_array()) => {
                let names: Vec<String> = self.inner.args().iter().map(|a| a.name.clone()).collect();
                items
                    .iter()
                    .map(|row| {
                        let row = row.as_array().expect("checked above");
                        let mut obj = Map::new();
                        for (name, value) in names.iter().zip(row.iter()) {
                            obj.insert(name.clone(), value.clone());
                        }
                        Ok(self.apply_rename(Value::Object(obj)))
                    })
                    .collect()
            }
            Value::Array(positional) => {
                let names: Vec<String> = self.inner.args().iter().map(|a| a.name.clone()).collect();
                if positional.len() > names.len() {
                    return Err(FlowError::InvalidConfiguration(
                        "more positional columns than the inner tool has arguments".into(),
                    ));
                }
                self.rows_from_columns(names.into_iter().zip(positional.iter()))
            }
            Value::Object(map) => {
                self.rows_from_columns(map.iter().map(|(k, v)| (k.clone(), v)))
            }
            other => Err(FlowError::InvalidConfiguration(format!(
                "unsupported ParallelList input shape: {other}"
            ))),
        }
    }

    async fn run_items(
        &self,
        ctx: &Context,
        indexed_items: Vec<(usize, Value)>,
        target: usize,
    ) -> Result<Value, FlowError> {
        if indexed_items.is_empty() {
            let results = ctx.get("results").unwrap_or_else(|| json!([]));
            return Ok(match &self.result_formatter {
                Some(f) => f(ctx, results.as_array().map(|a| a.as_slice()).unwrap_or(&[])),
                None => results,
            });
        }

        let semaphore = self
            .max_workers
            .map(|m| Arc::new(tokio::sync::Semaphore::new(m.max(1))));
        let mut handles: Vec<tokio::task::JoinHandle<(usize, Result<Value, ToolError>)>> = indexed_items
            .into_iter()
            .map(|(index, item)| {
                let inner = self.inner.clone();
                let child_ctx = ctx.child_context();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(s) => Some(s.acquire_owned().await.expect("semaphore is never closed")),
                        None => None,
                    };
                    (index, inner.call(Some(child_ctx), item).await)
                })
            })
            .collect();

        let mut completed = 0usize;
        while !handles.is_empty() {
            let (joined, _, remaining) = futures::future::select_all(handles).await;
            handles = remaining;
            let (index, result) = joined.expect("ParallelList worker task panicked");
            match result {
                Ok(value) => {
                    ctx.update("results", |existing| {
                        let mut arr = existing.and_then(|v| v.as_array().cloned()).unwrap_or_default();
                        if index < arr.len() {
                            arr[index] = value.clone();
                        }
                        Value::Array(arr)
                    });
                    // only a success retires an index from "pending": an
                    // error recorded by an ignored failure is still
                    // eligible for a future retry.
                    remove_pending(ctx, index);
                    ctx.decrement("to_go_count", 1);
                    completed += 1;
                }
                Err(err) => match self.error_strategy {
                    ErrorStrategy::Fail => {
                        tracing::warn!(
                            tool = %self.name,
                            index,
                            error = %err,
                            "parallel_list item failed, aborting the rest"
                        );
                        for handle in &handles {
                            handle.abort();
                        }
                        return Err(FlowError::ItemException {
                            index,
                            cause: Box::new(err),
                        });
                    }
                    ErrorStrategy::Ignore => {
                        tracing::debug!(tool = %self.name, index, error = %err, "parallel_list item failed, ignoring");
                        let message = err.to_string();
                        ctx.update("results", |existing| {
                            let mut arr = existing.and_then(|v| v.as_array().cloned()).unwrap_or_default();
                            if index < arr.len() {
                                arr[index] = json!({ "error": message });
                            }
                            Value::Array(arr)
                        });
                        ctx.decrement("to_go_count", 1);
                        completed += 1;
                    }
                },
            }
            if completed >= target {
                for handle in &handles {
                    handle.abort();
                }
                break;
            }
        }

        let results = ctx.get("results").unwrap_or_else(|| json!([]));
        Ok(match &self.result_formatter {
            Some(f) => f(ctx, results.as_array().map(|a| a.as_slice()).unwrap_or(&[])),
            None => results,
        })
    }
}

fn remove_pending(ctx: &Context, index: usize) {
    ctx.update("pending", |existing| {
        let mut arr = existing.and_then(|v| v.as_array().cloned()).unwrap_or_default();
        arr.retain(|v| v.as_u64() != Some(index as u64));
        Value::Array(arr)
    });
}

#[async_trait]
impl Tool for ParallelList {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn args(&self) -> &[Argument] {
        &self.args
    }

    // `ParallelList` overrides `call` rather than relying on the default
    // body: its natural input is list- or dict-of-lists-shaped, not the
    // single JSON object `Tool::run_prepared` assumes everywhere else, so
    // default-filling/validating against `self.args()` doesn't apply here.
    async fn call(&self, ctx: Option<Context>, kwargs: Value) -> Result<Value, ToolError> {
        let ctx = derive_context(ctx, AttachedKind::Tool, self.id(), self.name())?;
        if ctx.args().is_none() {
            let _ = ctx.set_args(kwargs.clone());
        }
        ctx.broadcast(Event::new(
            kind::TOOL_CALLED,
            json!({ "tool": self.name(), "args": kwargs }),
        ));
        match self.invoke(&ctx, &kwargs).await {
            Ok(value) => {
                ctx.set_output(value.clone()).map_err(ToolError::Core)?;
                ctx.broadcast(Event::new(
                    kind::TOOL_RETURN,
                    json!({ "tool": self.name(), "output": value }),
                ));
                Ok(value)
            }
            Err(err) => {
                let _ = ctx.set_exception(ContextException::from_message(err.to_string()));
                Err(err)
            }
        }
    }

    async fn invoke(&self, ctx: &Context, kwargs: &Value) -> Result<Value, ToolError> {
        let items = self.normalize(kwargs).map_err(|e| ToolError::Other(Box::new(e)))?;
        let n = items.len();
        ctx.x().init("items", Value::Array(items.clone()));
        ctx.init("results", Value::Array(vec![Value::Null; n]));
        ctx.init(
            "pending",
            Value::Array((0..n as u64).map(Value::from).collect()),
        );
        let target = self.completion_target(n);
        ctx.init("to_go_count", json!(target));
        let indexed_items: Vec<(usize, Value)> = items.into_iter().enumerate().collect();
        self.run_items(ctx, indexed_items, target)
            .await
            .map_err(|e| ToolError::Other(Box::new(e)))
    }

    async fn retry(&self, ctx: &Context) -> Result<Value, ToolError> {
        ctx.clear(true, false);
        let items = ctx
            .x()
            .get("items")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        let pending: Vec<usize> = ctx
            .get("pending")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_u64().map(|n| n as usize))
            .collect();
        let already_succeeded = items.len().saturating_sub(pending.len());
        let indexed_items: Vec<(usize, Value)> = pending
            .into_iter()
            .filter_map(|index| items.get(index).cloned().map(|item| (index, item)))
            .collect();
        // `all`/`any` only ever look at the items being retried; `n` and
        // `majority` carry the original completion target forward, crediting
        // whatever already succeeded on the first pass.
        let target = match self.completion_strategy {
            CompletionStrategy::All => indexed_items.len(),
            CompletionStrategy::Any => 1.min(indexed_items.len()),
            CompletionStrategy::N(k) => k.saturating_sub(already_succeeded),
            CompletionStrategy::Majority => {
                (indexed_items.len() / 2 + 1).saturating_sub(already_succeeded)
            }
        };
        self.run_items(ctx, indexed_items, target)
            .await
            .map_err(|e| ToolError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_tool::FnTool;

    fn square() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            "square",
            "square",
            "squares n",
            vec![Argument::required("n", "input", "int")],
            |_ctx, kwargs| {
                Box::pin(async move {
                    let n = kwargs["n"].as_i64().unwrap_or(0);
                    Ok(json!(n * n))
                })
            },
        ))
    }

    fn fails_on(bad: i64) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            "square_but_flaky",
            "square_but_flaky",
            "squares n, failing on one specific value",
            vec![Argument::required("n", "input", "int")],
            move |_ctx, kwargs| {
                Box::pin(async move {
                    let n = kwargs["n"].as_i64().unwrap_or(0);
                    if n == bad {
                        return Err(ToolError::Other("boom".into()));
                    }
                    Ok(json!(n * n))
                })
            },
        ))
    }

    #[tokio::test]
    async fn all_strategy_runs_every_item_from_a_list_of_dicts() {
        let parallel = ParallelList::new("sq", "sq", "squares a list", vec![], square()).unwrap();
        let out = parallel
            .call(
                None,
                json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]),
            )
            .await
            .unwrap();
        assert_eq!(out, json!([1, 4, 9]));
    }

    #[tokio::test]
    async fn list_of_lists_is_reshaped_positionally() {
        let parallel = ParallelList::new("sq", "sq", "squares a list", vec![], square()).unwrap();
        let out = parallel.call(None, json!([[1], [2], [3]])).await.unwrap();
        assert_eq!(out, json!([1, 4, 9]));
    }

    #[tokio::test]
    async fn dict_of_lists_broadcasts_scalars() {
        let doubled: Arc<dyn Tool> = Arc::new(FnTool::new(
            "scale",
            "scale",
            "n * factor",
            vec![
                Argument::required("n", "input", "int"),
                Argument::required("factor", "multiplier", "int"),
            ],
            |_ctx, kwargs| {
                Box::pin(async move {
                    let n = kwargs["n"].as_i64().unwrap_or(0);
                    let factor = kwargs["factor"].as_i64().unwrap_or(1);
                    Ok(json!(n * factor))
                })
            },
        ));
        let parallel = ParallelList::new("scale_all", "scale_all", "scales a list", vec![], doubled).unwrap();
        let out = parallel
            .call(None, json!({ "n": [1, 2, 3], "factor": 10 }))
            .await
            .unwrap();
        assert_eq!(out, json!([10, 20, 30]));
    }

    #[tokio::test]
    async fn n_strategy_stops_after_the_requested_count() {
        // The third item sleeps far longer than the first two, so the
        // completion target is always reached (and the slow item aborted)
        // before it has a chance to write its own result.
        let slow_echo: Arc<dyn Tool> = Arc::new(FnTool::new(
            "slow_echo",
            "slow_echo",
            "sleeps proportionally to n, then echoes it",
            vec![Argument::required("n", "input", "int")],
            |_ctx, kwargs| {
                Box::pin(async move {
                    let n = kwargs["n"].as_i64().unwrap_or(0);
                    let millis = if n >= 3 { 200 } else { 0 };
                    tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
                    Ok(kwargs["n"].clone())
                })
            },
        ));
        let parallel = ParallelList::new("first_two", "first_two", "stops at 2", vec![], slow_echo)
            .unwrap()
            .with_completion_strategy(CompletionStrategy::N(2))
            .unwrap();
        let out = parallel
            .call(None, json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]))
            .await
            .unwrap();
        let completed = out.as_array().unwrap().iter().filter(|v| !v.is_null()).count();
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn ignore_error_strategy_keeps_going_past_a_failure() {
        let parallel = ParallelList::new("sq", "sq", "squares, ignoring failures", vec![], fails_on(2))
            .unwrap()
            .with_error_strategy(ErrorStrategy::Ignore);
        let out = parallel
            .call(None, json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]))
            .await
            .unwrap();
        assert_eq!(out, json!([1, { "error": "boom" }, 9]));
    }

    #[tokio::test]
    async fn retry_with_n_strategy_only_needs_the_shortfall() {
        // Simulate a prior run that already satisfied completion_count=2
        // via indices 0 and 2, leaving index 1's failure recorded and
        // pending. Retry must credit those two successes rather than
        // demanding every pending index succeed again - here there's
        // only one pending index, so the shortfall is trivially met by
        // fixing it, but the target passed to `run_items` is what this
        // test is really pinning down (see the `completion_strategy`
        // match in `retry`).
        let parallel = ParallelList::new("sq", "sq", "squares, stop at two", vec![], square())
            .unwrap()
            .with_completion_strategy(CompletionStrategy::N(2))
            .unwrap()
            .with_error_strategy(ErrorStrategy::Ignore);

        let ctx = Context::new();
        ctx.x().init("items", json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]));
        ctx.init("results", json!([1, { "error": "boom" }, 9]));
        ctx.init("pending", json!([1]));

        let out = parallel.retry(&ctx).await.unwrap();
        assert_eq!(out, json!([1, 4, 9]));
    }

    #[tokio::test]
    async fn fail_error_strategy_aborts_the_whole_call() {
        let parallel = ParallelList::new("sq", "sq", "squares, failing fast", vec![], fails_on(2))
            .unwrap()
            .with_error_strategy(ErrorStrategy::Fail);
        let err = parallel
            .call(None, json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("item"));
    }

    #[tokio::test]
    async fn n_zero_is_rejected_at_construction() {
        let err = ParallelList::new("x", "x", "x", vec![], square())
            .unwrap()
            .with_completion_strategy(CompletionStrategy::N(0));
        assert!(err.is_err());
    }
}
