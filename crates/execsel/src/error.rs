//! Error taxonomy surfaced by factories, dispatchers and fallback adapters.

use thiserror::Error;

use crate::executor::ShapeSignature;
use crate::memory::{ArgPort, ReorderError};

/// Errors raised while selecting, constructing or running executors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// No registered implementation applies to the node. Raised at factory construction.
    #[error("no suitable implementation for {op}: {reason}")]
    Configuration { op: &'static str, reason: String },

    /// A deferred executor found no candidate for the concrete operands of a call.
    #[error("no implementation of {op} applies to shape signature {signature}")]
    NoApplicableImplementation {
        op: &'static str,
        signature: ShapeSignature,
    },

    /// A candidate's constructor failed.
    #[error("implementation {implementation} failed to create an executor")]
    ImplementationConstruction {
        implementation: String,
        #[source]
        source: anyhow::Error,
    },

    /// A fallback adapter could not convert an operand into the layout its kernel needs.
    #[error("cannot convert operand {port}")]
    Conversion {
        port: ArgPort,
        #[source]
        source: ReorderError,
    },

    #[error("invalid memory: {reason}")]
    Memory { reason: String },

    #[error("implementation {name} is already registered for {op}")]
    DuplicateImplementation { op: &'static str, name: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A kernel failed while running.
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl ExecutorError {
    pub fn configuration(op: &'static str, reason: impl Into<String>) -> Self {
        ExecutorError::Configuration {
            op,
            reason: reason.into(),
        }
    }

    pub fn construction(implementation: impl Into<String>, source: anyhow::Error) -> Self {
        ExecutorError::ImplementationConstruction {
            implementation: implementation.into(),
            source,
        }
    }

    pub fn conversion(port: ArgPort, source: ReorderError) -> Self {
        ExecutorError::Conversion { port, source }
    }

    pub fn memory(reason: impl Into<String>) -> Self {
        ExecutorError::Memory {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ExecutorError::Config(message.into())
    }

    /// Whether the error reports that no implementation could be selected.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ExecutorError::Configuration { .. } | ExecutorError::NoApplicableImplementation { .. }
        )
    }
}

/// Convenience alias for results returned by the engine.
pub type ExecutorResult<T> = Result<T, ExecutorError>;
