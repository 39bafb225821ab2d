//! Error Types
//!
//! One enum per layer. Expression and binding errors are recovered inside
//! the engine (logged and degraded), so they rarely cross the public API;
//! DOM and queue errors surface through mutation handles.

use thiserror::Error;

use crate::dom::NodeHandle;
use crate::queue::MutationId;

/// Failure while compiling or running a bind expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("empty expression")]
    Empty,

    #[error("forbidden pattern `{0}` in expression")]
    Forbidden(String),

    #[error("syntax error at offset {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl EvalError {
    pub(crate) fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            position,
        }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

/// Failure of a host render tree operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    NodeNotFound(NodeHandle),

    #[error("node {0:?} is not an element")]
    NotAnElement(NodeHandle),

    #[error("node {0:?} is not a text node")]
    NotText(NodeHandle),

    #[error("cannot insert {child:?} into {parent:?}: would create a cycle")]
    HierarchyRequest { parent: NodeHandle, child: NodeHandle },

    #[error("reference {reference:?} is not a child of {parent:?}")]
    NotAChild {
        parent: NodeHandle,
        reference: NodeHandle,
    },

    #[error("markup error at offset {position}: {message}")]
    Parse { message: String, position: usize },
}

/// Why a queued mutation did not complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("mutation {0} dropped: queue capacity exceeded")]
    Overflow(MutationId),

    #[error("mutation {0} cancelled")]
    Cancelled(MutationId),

    #[error("mutation queue cleared")]
    Cleared,

    #[error("mutation failed: {0}")]
    Failed(#[from] DomError),

    #[error("mutation panicked: {0}")]
    Panicked(String),

    #[error("mutation dropped before completion")]
    Dropped,
}

/// Structurally invalid directive usage. Always logged, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("list item {index} is a primitive but no wrapper argument is configured")]
    PrimitiveWithoutArgument { index: usize },

    #[error("bind declaration must evaluate to an object, got {0}")]
    InvalidBindData(&'static str),

    #[error("repetition source must be a list or object, got {0}")]
    InvalidList(&'static str),
}

/// Invalid engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
