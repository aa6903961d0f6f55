//! Error types for the reactive runtime.
//!
//! Failures are isolated per computation: a panicking body is caught, turned
//! into a [`ReactiveError`], and routed to the nearest error boundary on the
//! failing node's owner chain. Errors nobody handles are returned to the
//! caller that started the flush.

use std::any::Any;

use thiserror::Error;

use crate::graph::NodeId;

/// Errors produced while propagating updates through the reactive graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computation body or cleanup panicked.
    #[error("computation {node:?} panicked: {message}")]
    Panicked {
        /// The node whose body (or cleanup) failed.
        node: NodeId,
        /// The panic payload, rendered as text.
        message: String,
    },

    /// An error boundary's handler panicked while handling another error.
    #[error("error handler of {node:?} panicked: {message}")]
    ErrorHandlerPanicked {
        /// The boundary owner whose handler failed.
        node: NodeId,
        /// The panic payload, rendered as text.
        message: String,
    },

    /// A flush ran more computations than the configured limit allows.
    ///
    /// This almost always means a computation writes a signal it also reads.
    #[error("flush exceeded {limit} computation runs; potential infinite loop")]
    InfiniteLoop {
        /// The configured `max_flush_iterations`.
        limit: usize,
    },

    /// A memo was read before its first run completed.
    #[error("memo {0:?} has no value; its first run did not complete")]
    Uninitialized(NodeId),

    /// More than one unhandled failure occurred during a single flush.
    #[error("{} computations failed during flush", .0.len())]
    Multiple(Vec<ReactiveError>),
}

impl ReactiveError {
    /// Build a [`ReactiveError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(node: NodeId, payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked {
            node,
            message: panic_message(payload.as_ref()),
        }
    }

    /// Collapse a list of unhandled errors into a single result.
    pub(crate) fn collapse(mut errors: Vec<ReactiveError>) -> Result<(), ReactiveError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
