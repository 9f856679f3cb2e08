//! Error types shared by the reactive graph and the sync layer.

use thiserror::Error;

/// Errors raised while reading or evaluating reactive nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A derived node read itself, directly or through other derived nodes.
    #[error("dependency cycle detected while evaluating {node}")]
    Cycle {
        /// Label (or `node#N`) of the node that was re-entered.
        node: String,
    },

    /// The node was disposed before it was read.
    #[error("{node} has been disposed")]
    Disposed { node: String },

    /// The runtime owning the node no longer exists.
    #[error("the reactive runtime has been dropped")]
    RuntimeDropped,

    /// A user evaluation function reported a failure.
    #[error("evaluation failed: {message}")]
    Evaluation { message: String },
}

impl ReactiveError {
    /// Build an evaluation error from any displayable message.
    ///
    /// Intended for use inside `Derived` and `Effect` closures:
    ///
    /// ```rust,ignore
    /// let parsed = Derived::new(&rt, move || {
    ///     input.get().parse::<i64>().map_err(ReactiveError::evaluation)
    /// });
    /// ```
    pub fn evaluation(message: impl std::fmt::Display) -> Self {
        Self::Evaluation {
            message: message.to_string(),
        }
    }
}

/// Errors raised by the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Reactive(#[from] ReactiveError),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    /// A value cannot be represented faithfully on the wire.
    #[error("invalid value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },
}

pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
