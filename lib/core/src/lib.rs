//! Core domain types and utilities for the switchyard workflow platform.
//!
//! This crate provides the foundational ID types and error handling used
//! throughout the switchyard workflow execution core.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ExecutionId, NodeExecutionId, ParseIdError, TriggerId, WorkflowId};
