//! Conversion snippets applied to values crossing a connection.
//!
//! A connection may carry a script defining `fn convert(input)`. The
//! engine compiles every snippet once when the execution plan is built
//! and applies the compiled form each time a value crosses the
//! connection. Without a snippet the value is routed unchanged.

use std::fmt;

use rhai::{AST, Dynamic, Engine, Scope};
use serde_json::Value as JsonValue;

/// Failure while compiling or applying a conversion snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// The snippet failed to compile.
    Compile { message: String },
    /// The snippet raised an error while running.
    Eval { message: String },
    /// The snippet result could not be represented as JSON.
    InvalidShape { message: String },
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile { message } => write!(f, "conversion failed to compile: {message}"),
            Self::Eval { message } => write!(f, "conversion failed: {message}"),
            Self::InvalidShape { message } => {
                write!(f, "conversion produced an unusable value: {message}")
            }
        }
    }
}

impl std::error::Error for ConversionError {}

/// A conversion snippet compiled and ready to apply.
#[derive(Debug, Clone)]
pub struct CompiledConversion {
    ast: AST,
}

/// Sandboxed evaluator for conversion snippets.
///
/// The embedded script engine runs with operation and depth limits so a
/// runaway snippet cannot stall an execution.
pub struct ConversionEvaluator {
    engine: Engine,
}

impl ConversionEvaluator {
    const ENTRY_POINT: &'static str = "convert";

    /// Creates an evaluator with sandbox limits applied.
    #[must_use]
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(100_000);
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_string_size(1024 * 1024);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(10_000);
        Self { engine }
    }

    /// Compiles a snippet, checking that it defines `fn convert(input)`.
    pub fn compile(&self, snippet: &str) -> Result<CompiledConversion, ConversionError> {
        let ast = self
            .engine
            .compile(snippet)
            .map_err(|e| ConversionError::Compile {
                message: e.to_string(),
            })?;

        let defines_entry = ast
            .iter_functions()
            .any(|f| f.name == Self::ENTRY_POINT && f.params.len() == 1);
        if !defines_entry {
            return Err(ConversionError::Compile {
                message: format!("snippet must define `fn {}(input)`", Self::ENTRY_POINT),
            });
        }

        Ok(CompiledConversion { ast })
    }

    /// Applies a compiled conversion to a JSON value.
    pub fn apply(
        &self,
        conversion: &CompiledConversion,
        input: &JsonValue,
    ) -> Result<JsonValue, ConversionError> {
        let input: Dynamic =
            rhai::serde::to_dynamic(input).map_err(|e| ConversionError::InvalidShape {
                message: e.to_string(),
            })?;

        let mut scope = Scope::new();
        let result: Dynamic = self
            .engine
            .call_fn(&mut scope, &conversion.ast, Self::ENTRY_POINT, (input,))
            .map_err(|e| ConversionError::Eval {
                message: e.to_string(),
            })?;

        rhai::serde::from_dynamic(&result).map_err(|e| ConversionError::InvalidShape {
            message: e.to_string(),
        })
    }
}

impl Default for ConversionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
