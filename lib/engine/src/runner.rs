//! Node runners.
//!
//! A runner is the code behind a node kind: given the node and its
//! delivered inputs, it produces the node's output. The registry maps
//! kind/subtype pairs to runners and is resolved once per execution
//! plan, so a missing runner is caught before anything starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use switchyard_workflow::{DEFAULT_PORT, Node, NodeKind};

use crate::convert::ConversionEvaluator;

/// Failure inside a node runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerError {
    /// What went wrong, for the execution record.
    pub message: String,
}

impl RunnerError {
    /// Creates a runner error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RunnerError {}

/// The code behind a node kind.
///
/// `inputs` is a JSON object keyed by input port. The returned value is
/// the node's output map keyed by output port; a non-object return is
/// wrapped under the default port by the engine.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn run(&self, node: &Node, inputs: JsonValue) -> Result<JsonValue, RunnerError>;
}

/// Runner that echoes its inputs back under the default output port.
///
/// Useful as a stand-in for kinds whose real runner lives elsewhere, and
/// as the workhorse of engine tests.
pub struct EchoRunner;

#[async_trait]
impl NodeRunner for EchoRunner {
    async fn run(&self, _node: &Node, inputs: JsonValue) -> Result<JsonValue, RunnerError> {
        Ok(json!({ DEFAULT_PORT: inputs }))
    }
}

/// Runner for `action/transform` nodes: applies the node's `script`
/// parameter, a `fn convert(input)` snippet, to the default input.
pub struct TransformRunner {
    evaluator: Arc<ConversionEvaluator>,
}

impl TransformRunner {
    /// Creates a transform runner sharing the engine's evaluator.
    #[must_use]
    pub fn new(evaluator: Arc<ConversionEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl NodeRunner for TransformRunner {
    async fn run(&self, node: &Node, inputs: JsonValue) -> Result<JsonValue, RunnerError> {
        let script = node
            .configuration
            .get("script")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| RunnerError::new("transform node has no `script` parameter"))?;

        let compiled = self
            .evaluator
            .compile(script)
            .map_err(|e| RunnerError::new(e.to_string()))?;

        let input = inputs.get(DEFAULT_PORT).cloned().unwrap_or(inputs);
        let output = self
            .evaluator
            .apply(&compiled, &input)
            .map_err(|e| RunnerError::new(e.to_string()))?;
        Ok(json!({ DEFAULT_PORT: output }))
    }
}

/// Registry mapping node kind/subtype pairs to runners.
#[derive(Default, Clone)]
pub struct RunnerRegistry {
    runners: HashMap<(NodeKind, Option<String>), Arc<dyn NodeRunner>>,
}

impl RunnerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runner for a specific kind/subtype pair.
    pub fn register(
        &mut self,
        kind: NodeKind,
        subtype: impl Into<String>,
        runner: Arc<dyn NodeRunner>,
    ) {
        self.runners.insert((kind, Some(subtype.into())), runner);
    }

    /// Registers a runner for every subtype of a kind that has no more
    /// specific runner.
    pub fn register_kind(&mut self, kind: NodeKind, runner: Arc<dyn NodeRunner>) {
        self.runners.insert((kind, None), runner);
    }

    /// Resolves the runner for a node: the exact kind/subtype entry if
    /// present, otherwise the kind-wide entry.
    #[must_use]
    pub fn resolve(&self, node: &Node) -> Option<Arc<dyn NodeRunner>> {
        self.runners
            .get(&(node.kind, node.subtype.clone()))
            .or_else(|| self.runners.get(&(node.kind, None)))
            .cloned()
    }

    /// Returns a registry with the built-in runners: the transform
    /// runner for `action/transform` and echo runners for every other
    /// runnable kind.
    #[must_use]
    pub fn with_defaults(evaluator: Arc<ConversionEvaluator>) -> Self {
        let mut registry = Self::new();
        registry.register(
            NodeKind::Action,
            "transform",
            Arc::new(TransformRunner::new(evaluator)),
        );
        let echo: Arc<dyn NodeRunner> = Arc::new(EchoRunner);
        for kind in [
            NodeKind::Action,
            NodeKind::AiAgent,
            NodeKind::ExternalAction,
            NodeKind::Flow,
            NodeKind::HumanInLoop,
            NodeKind::Tool,
            NodeKind::Memory,
        ] {
            registry.register_kind(kind, echo.clone());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform_node(script: &str) -> Node {
        Node::new("transform", NodeKind::Action)
            .with_subtype("transform")
            .with_parameter("script", json!(script))
    }

    #[tokio::test]
    async fn echo_runner_wraps_inputs_under_main() {
        let node = Node::new("echo", NodeKind::Tool).with_subtype("function");
        let output = EchoRunner
            .run(&node, json!({"main": {"a": 1}}))
            .await
            .expect("run");
        assert_eq!(output, json!({"main": {"main": {"a": 1}}}));
    }

    #[tokio::test]
    async fn transform_runner_applies_script_to_main_input() {
        let evaluator = Arc::new(ConversionEvaluator::new());
        let runner = TransformRunner::new(evaluator);
        let node = transform_node("fn convert(input) { #{ doubled: input.n * 2 } }");
        let output = runner
            .run(&node, json!({"main": {"n": 21}}))
            .await
            .expect("run");
        assert_eq!(output, json!({"main": {"doubled": 42}}));
    }

    #[tokio::test]
    async fn transform_runner_without_script_fails() {
        let evaluator = Arc::new(ConversionEvaluator::new());
        let runner = TransformRunner::new(evaluator);
        let node = Node::new("bare", NodeKind::Action).with_subtype("transform");
        let err = runner
            .run(&node, json!({}))
            .await
            .expect_err("missing script");
        assert!(err.message.contains("script"));
    }

    #[test]
    fn resolve_prefers_exact_subtype_over_kind_fallback() {
        let evaluator = Arc::new(ConversionEvaluator::new());
        let registry = RunnerRegistry::with_defaults(evaluator);

        let transform = transform_node("fn convert(input) { input }");
        assert!(registry.resolve(&transform).is_some());

        let other = Node::new("call", NodeKind::ExternalAction).with_subtype("service_call");
        assert!(registry.resolve(&other).is_some());

        let trigger = Node::new("start", NodeKind::Trigger).with_subtype("manual");
        assert!(registry.resolve(&trigger).is_none());
    }
}
