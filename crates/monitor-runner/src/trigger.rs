//! Compiles and evaluates a trigger's scripted boolean condition over the
//! results an input run produced.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};
use tracing::warn;

use crate::model::{InputRunResult, Trigger};

/// Flattened input results plus monitor metadata, exposed to a trigger's
/// condition script as top-level variables.
pub struct TriggerExecutionContext<'a> {
    pub monitor_id: &'a str,
    pub trigger_id: &'a str,
    pub period_start_millis: i64,
    pub period_end_millis: i64,
    pub input_results: &'a [InputRunResult],
}

impl<'a> TriggerExecutionContext<'a> {
    /// Render-friendly view of this context, nested under the `"ctx"` key
    /// of an action's template vars (spec.md §4.6). Exposes the documents
    /// each input collected so a message template can walk `ctx.results`.
    #[must_use]
    pub fn as_template_arg(&self) -> serde_json::Value {
        serde_json::json!({
            "monitor_id": self.monitor_id,
            "trigger_id": self.trigger_id,
            "period_start": self.period_start_millis,
            "period_end": self.period_end_millis,
            "results": self.input_results.iter().map(|r| serde_json::json!({
                "documents": r.results,
                "error": r.error,
            })).collect::<Vec<_>>(),
        })
    }
}

fn json_to_evalexpr(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        _ => None,
    }
}

fn build_context(ctx: &TriggerExecutionContext<'_>) -> HashMapContext {
    let mut evalctx = HashMapContext::new();

    let _ = evalctx.set_value("period_start".to_string(), Value::Int(ctx.period_start_millis));
    let _ = evalctx.set_value("period_end".to_string(), Value::Int(ctx.period_end_millis));

    // Only the first input's top-level scalar fields are exposed directly
    // (`hits_total`, `doc_count`, ...); richer access patterns (nested
    // fields, multiple inputs) are left for a future expression dialect.
    if let Some(first) = ctx.input_results.first() {
        for (key, value) in &first.results.first().cloned().unwrap_or_default() {
            if let Some(evalvalue) = json_to_evalexpr(value) {
                let _ = evalctx.set_value(key.clone(), evalvalue);
            }
        }
        let _ = evalctx.set_value("hits_total".to_string(), Value::Int(first.results.len() as i64));
    } else {
        let _ = evalctx.set_value("hits_total".to_string(), Value::Int(0));
    }

    evalctx
}

/// Evaluate `trigger.condition`, returning `(triggered, error)`. Compile or
/// runtime failure yields `triggered = true` with the error captured: the
/// failure must be visible, not silently swallowed.
///
/// Re-parses the condition on every call. Prefer [`TriggerCompiler`] when
/// the same trigger is evaluated repeatedly (e.g. a `run_monitor_loop`
/// driving one monitor across many periods), which parses each distinct
/// condition text once and reuses the compiled tree afterward.
#[must_use]
pub fn evaluate(trigger: &Trigger, ctx: &TriggerExecutionContext<'_>) -> (bool, Option<String>) {
    let tree = match build_operator_tree(&trigger.condition) {
        Ok(tree) => tree,
        Err(e) => {
            warn!(trigger = %trigger.id, error = %e, "trigger condition failed to compile");
            return (true, Some(format!("condition compile error: {e}")));
        }
    };
    eval_tree(trigger, &tree, ctx)
}

fn eval_tree(trigger: &Trigger, tree: &Node, ctx: &TriggerExecutionContext<'_>) -> (bool, Option<String>) {
    let evalctx = build_context(ctx);
    match tree.eval_boolean_with_context(&evalctx) {
        Ok(result) => (result, None),
        Err(e) => {
            warn!(trigger = %trigger.id, error = %e, "trigger condition failed to evaluate");
            (true, Some(format!("condition evaluation error: {e}")))
        }
    }
}

/// Caches compiled trigger condition trees, keyed by the condition text
/// itself (so two triggers sharing a condition share one compile, and a
/// monitor whose definition changed recompiles without stale reuse).
/// Parsing happens once per distinct condition; evaluation never needs the
/// source text again.
#[derive(Default)]
pub struct TriggerCompiler {
    cache: RwLock<HashMap<String, Arc<Node>>>,
}

impl TriggerCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, condition: &str) -> Result<Arc<Node>, evalexpr::EvalexprError> {
        if let Some(tree) = self
            .cache
            .read()
            .expect("trigger compiler cache lock poisoned")
            .get(condition)
        {
            return Ok(Arc::clone(tree));
        }

        let tree = Arc::new(build_operator_tree(condition)?);
        self.cache
            .write()
            .expect("trigger compiler cache lock poisoned")
            .insert(condition.to_string(), Arc::clone(&tree));
        Ok(tree)
    }

    /// Evaluate `trigger.condition`, compiling it once and reusing the
    /// compiled tree on every subsequent call with the same condition text.
    #[must_use]
    pub fn evaluate(&self, trigger: &Trigger, ctx: &TriggerExecutionContext<'_>) -> (bool, Option<String>) {
        match self.compiled(&trigger.condition) {
            Ok(tree) => eval_tree(trigger, &tree, ctx),
            Err(e) => {
                warn!(trigger = %trigger.id, error = %e, "trigger condition failed to compile");
                (true, Some(format!("condition compile error: {e}")))
            }
        }
    }
}
