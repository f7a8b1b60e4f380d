//! Node spec registry.
//!
//! A spec describes what a node of a given kind and subtype looks like:
//! which configuration parameters it takes and which ports it exposes.
//! The validator checks every node in a document against its spec.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SpecNotFound;
use crate::node::NodeKind;
use crate::port::{Port, PortDataType};

/// The expected JSON type of a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    /// Returns true if the JSON value matches this parameter type.
    #[must_use]
    pub fn matches(&self, value: &JsonValue) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        };
        write!(f, "{name}")
    }
}

/// Declaration of a single configuration parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Configuration key.
    pub key: String,
    /// Expected JSON type of the value.
    pub value_type: ParameterType,
    /// Whether the key must be present.
    pub required: bool,
    /// Closed set of allowed values, for string parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    /// Regex the full string value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ParameterSpec {
    /// Declares a required parameter.
    #[must_use]
    pub fn required(key: impl Into<String>, value_type: ParameterType) -> Self {
        Self {
            key: key.into(),
            value_type,
            required: true,
            allowed_values: None,
            pattern: None,
        }
    }

    /// Declares an optional parameter.
    #[must_use]
    pub fn optional(key: impl Into<String>, value_type: ParameterType) -> Self {
        Self {
            key: key.into(),
            value_type,
            required: false,
            allowed_values: None,
            pattern: None,
        }
    }

    /// Restricts the value to a closed set.
    #[must_use]
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Requires the full string value to match a regex.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// A violation found while checking a node's configuration against its
/// spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    /// A required key is absent.
    MissingKey { key: String },
    /// The value has the wrong JSON type.
    WrongType {
        key: String,
        expected: ParameterType,
    },
    /// The value is outside the allowed set.
    NotAllowed { key: String, value: String },
    /// The string value does not match the declared pattern.
    PatternMismatch { key: String, value: String },
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey { key } => write!(f, "required parameter `{key}` is missing"),
            Self::WrongType { key, expected } => {
                write!(f, "parameter `{key}` must be a {expected}")
            }
            Self::NotAllowed { key, value } => {
                write!(f, "parameter `{key}` has disallowed value `{value}`")
            }
            Self::PatternMismatch { key, value } => {
                write!(f, "parameter `{key}` value `{value}` does not match pattern")
            }
        }
    }
}

/// The spec for one node kind/subtype pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// The node kind this spec applies to.
    pub kind: NodeKind,
    /// The subtype this spec applies to, if any.
    pub subtype: Option<String>,
    /// Declared configuration parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Input ports a node of this spec exposes.
    #[serde(default)]
    pub inputs: Vec<Port>,
    /// Output ports a node of this spec exposes.
    #[serde(default)]
    pub outputs: Vec<Port>,
}

impl NodeSpec {
    /// Creates a spec for a kind/subtype pair.
    #[must_use]
    pub fn new(kind: NodeKind, subtype: impl Into<String>) -> Self {
        Self {
            kind,
            subtype: Some(subtype.into()),
            parameters: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Adds a parameter declaration.
    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn with_output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    /// Checks a configuration map against the declared parameters and
    /// returns every violation found, not just the first.
    #[must_use]
    pub fn validate_configuration(
        &self,
        configuration: &HashMap<String, JsonValue>,
    ) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        for parameter in &self.parameters {
            let Some(value) = configuration.get(&parameter.key) else {
                if parameter.required {
                    violations.push(ConfigViolation::MissingKey {
                        key: parameter.key.clone(),
                    });
                }
                continue;
            };

            if !parameter.value_type.matches(value) {
                violations.push(ConfigViolation::WrongType {
                    key: parameter.key.clone(),
                    expected: parameter.value_type,
                });
                continue;
            }

            let Some(text) = value.as_str() else {
                continue;
            };

            if let Some(allowed) = &parameter.allowed_values
                && !allowed.iter().any(|candidate| candidate == text)
            {
                violations.push(ConfigViolation::NotAllowed {
                    key: parameter.key.clone(),
                    value: text.to_string(),
                });
            }

            if let Some(pattern) = &parameter.pattern {
                let anchored = format!("^(?:{pattern})$");
                let matched = Regex::new(&anchored)
                    .map(|regex| regex.is_match(text))
                    .unwrap_or(false);
                if !matched {
                    violations.push(ConfigViolation::PatternMismatch {
                        key: parameter.key.clone(),
                        value: text.to_string(),
                    });
                }
            }
        }

        violations
    }
}

/// Registry mapping kind/subtype pairs to their node specs.
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    specs: HashMap<(NodeKind, Option<String>), NodeSpec>,
}

impl SpecRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a spec, replacing any existing spec for the same
    /// kind/subtype pair.
    pub fn register(&mut self, spec: NodeSpec) {
        self.specs.insert((spec.kind, spec.subtype.clone()), spec);
    }

    /// Looks up the spec for a kind/subtype pair.
    pub fn get(&self, kind: NodeKind, subtype: Option<&str>) -> Result<&NodeSpec, SpecNotFound> {
        self.specs
            .get(&(kind, subtype.map(String::from)))
            .ok_or_else(|| SpecNotFound {
                kind,
                subtype: subtype.map(String::from),
            })
    }

    /// Returns true if a spec is registered for the pair.
    #[must_use]
    pub fn contains(&self, kind: NodeKind, subtype: Option<&str>) -> bool {
        self.specs.contains_key(&(kind, subtype.map(String::from)))
    }

    /// Returns the registry pre-populated with the built-in node catalog.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            NodeSpec::new(NodeKind::Trigger, "schedule")
                .with_parameter(
                    ParameterSpec::required("cron", ParameterType::String)
                        .with_pattern(r"\S+(?:\s+\S+){4,5}"),
                )
                .with_parameter(ParameterSpec::optional("timezone", ParameterType::String))
                .with_output(Port::main()),
        );
        registry.register(
            NodeSpec::new(NodeKind::Trigger, "webhook")
                .with_parameter(
                    ParameterSpec::required("path", ParameterType::String).with_pattern("/.*"),
                )
                .with_parameter(
                    ParameterSpec::optional("method", ParameterType::String)
                        .with_allowed_values(["GET", "POST", "PUT", "DELETE"]),
                )
                .with_output(Port::main()),
        );
        registry.register(
            NodeSpec::new(NodeKind::Trigger, "chat_message")
                .with_parameter(ParameterSpec::required("workspace", ParameterType::String))
                .with_parameter(ParameterSpec::optional("channel", ParameterType::String))
                .with_output(Port::main()),
        );
        registry.register(
            NodeSpec::new(NodeKind::Trigger, "repository_push")
                .with_parameter(
                    ParameterSpec::required("repository", ParameterType::String)
                        .with_pattern("[^/\\s]+/[^/\\s]+"),
                )
                .with_parameter(ParameterSpec::optional("branch", ParameterType::String))
                .with_output(Port::main()),
        );
        registry.register(
            NodeSpec::new(NodeKind::Trigger, "mailbox_message")
                .with_parameter(ParameterSpec::required("address", ParameterType::String))
                .with_output(Port::main()),
        );
        registry.register(NodeSpec::new(NodeKind::Trigger, "manual").with_output(Port::main()));

        registry.register(
            NodeSpec::new(NodeKind::Action, "transform")
                .with_parameter(ParameterSpec::required("script", ParameterType::String))
                .with_input(Port::main())
                .with_output(Port::main()),
        );
        registry.register(
            NodeSpec::new(NodeKind::Action, "http_request")
                .with_parameter(ParameterSpec::required("url", ParameterType::String))
                .with_parameter(
                    ParameterSpec::optional("method", ParameterType::String)
                        .with_allowed_values(["GET", "POST", "PUT", "DELETE", "PATCH"]),
                )
                .with_parameter(ParameterSpec::optional("headers", ParameterType::Object))
                .with_input(Port::main())
                .with_output(Port::main()),
        );

        registry.register(
            NodeSpec::new(NodeKind::AiAgent, "agent")
                .with_parameter(ParameterSpec::required("model", ParameterType::String))
                .with_parameter(ParameterSpec::required("prompt", ParameterType::String))
                .with_parameter(ParameterSpec::optional("temperature", ParameterType::Number))
                .with_input(Port::main())
                .with_input(Port::optional("context", PortDataType::Any))
                .with_output(Port::main()),
        );

        registry.register(
            NodeSpec::new(NodeKind::ExternalAction, "service_call")
                .with_parameter(ParameterSpec::required("service", ParameterType::String))
                .with_parameter(ParameterSpec::required("operation", ParameterType::String))
                .with_parameter(ParameterSpec::optional("arguments", ParameterType::Object))
                .with_input(Port::main())
                .with_output(Port::main()),
        );

        registry.register(
            NodeSpec::new(NodeKind::Flow, "branch")
                .with_parameter(ParameterSpec::required("condition", ParameterType::String))
                .with_input(Port::main())
                .with_output(Port::optional("true", PortDataType::Any))
                .with_output(Port::optional("false", PortDataType::Any)),
        );
        registry.register(
            NodeSpec::new(NodeKind::Flow, "merge")
                .with_input(Port::main())
                .with_output(Port::main()),
        );

        registry.register(
            NodeSpec::new(NodeKind::HumanInLoop, "approval")
                .with_parameter(ParameterSpec::required("approver", ParameterType::String))
                .with_parameter(ParameterSpec::optional("timeout_seconds", ParameterType::Number))
                .with_input(Port::main())
                .with_output(Port::optional("approved", PortDataType::Any))
                .with_output(Port::optional("rejected", PortDataType::Any)),
        );

        registry.register(
            NodeSpec::new(NodeKind::Tool, "function")
                .with_parameter(ParameterSpec::required("name", ParameterType::String))
                .with_input(Port::main())
                .with_output(Port::main()),
        );

        registry.register(
            NodeSpec::new(NodeKind::Memory, "buffer")
                .with_parameter(ParameterSpec::required("key", ParameterType::String))
                .with_parameter(ParameterSpec::optional("max_items", ParameterType::Number))
                .with_input(Port::main())
                .with_output(Port::main()),
        );

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_catalog_covers_all_kinds() {
        let registry = SpecRegistry::builtin();
        assert!(registry.contains(NodeKind::Trigger, Some("webhook")));
        assert!(registry.contains(NodeKind::Trigger, Some("manual")));
        assert!(registry.contains(NodeKind::Action, Some("transform")));
        assert!(registry.contains(NodeKind::AiAgent, Some("agent")));
        assert!(registry.contains(NodeKind::ExternalAction, Some("service_call")));
        assert!(registry.contains(NodeKind::Flow, Some("branch")));
        assert!(registry.contains(NodeKind::HumanInLoop, Some("approval")));
        assert!(registry.contains(NodeKind::Tool, Some("function")));
        assert!(registry.contains(NodeKind::Memory, Some("buffer")));
        assert!(!registry.contains(NodeKind::Action, Some("nonexistent")));
    }

    #[test]
    fn missing_required_key_is_reported() {
        let registry = SpecRegistry::builtin();
        let spec = registry
            .get(NodeKind::Action, Some("transform"))
            .expect("spec");
        let violations = spec.validate_configuration(&HashMap::new());
        assert_eq!(
            violations,
            vec![ConfigViolation::MissingKey {
                key: "script".into()
            }]
        );
    }

    #[test]
    fn wrong_type_is_reported() {
        let registry = SpecRegistry::builtin();
        let spec = registry
            .get(NodeKind::Action, Some("transform"))
            .expect("spec");
        let config = HashMap::from([("script".to_string(), json!(42))]);
        let violations = spec.validate_configuration(&config);
        assert_eq!(
            violations,
            vec![ConfigViolation::WrongType {
                key: "script".into(),
                expected: ParameterType::String,
            }]
        );
    }

    #[test]
    fn allowed_values_are_enforced() {
        let registry = SpecRegistry::builtin();
        let spec = registry
            .get(NodeKind::Action, Some("http_request"))
            .expect("spec");
        let config = HashMap::from([
            ("url".to_string(), json!("https://example.com")),
            ("method".to_string(), json!("TRACE")),
        ]);
        let violations = spec.validate_configuration(&config);
        assert_eq!(
            violations,
            vec![ConfigViolation::NotAllowed {
                key: "method".into(),
                value: "TRACE".into(),
            }]
        );
    }

    #[test]
    fn pattern_is_anchored_to_full_value() {
        let registry = SpecRegistry::builtin();
        let spec = registry
            .get(NodeKind::Trigger, Some("repository_push"))
            .expect("spec");

        let ok = HashMap::from([("repository".to_string(), json!("octo/widgets"))]);
        assert!(spec.validate_configuration(&ok).is_empty());

        let bad = HashMap::from([("repository".to_string(), json!("not-a-repo"))]);
        let violations = spec.validate_configuration(&bad);
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            violations[0],
            ConfigViolation::PatternMismatch { .. }
        ));
    }

    #[test]
    fn all_violations_are_collected_not_just_first() {
        let registry = SpecRegistry::builtin();
        let spec = registry.get(NodeKind::AiAgent, Some("agent")).expect("spec");
        let config = HashMap::from([("temperature".to_string(), json!("hot"))]);
        let violations = spec.validate_configuration(&config);
        // model and prompt missing, temperature wrong type
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn unknown_spec_lookup_fails() {
        let registry = SpecRegistry::builtin();
        let err = registry
            .get(NodeKind::Trigger, Some("carrier_pigeon"))
            .expect_err("unknown subtype");
        assert_eq!(err.kind, NodeKind::Trigger);
        assert_eq!(err.subtype.as_deref(), Some("carrier_pigeon"));
    }
}
