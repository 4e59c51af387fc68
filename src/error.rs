//! Error taxonomy shared across the store, search, game-state and session
//! layers. Mirrors the split the teacher draws between a typed domain
//! error and `anyhow` glue at the infra edges: infrastructure setup (KV
//! open, config load, network bootstrap) returns `anyhow::Result`, while
//! anything a connected client can trigger returns `KansasError` so the
//! dispatch loop can map it onto an outbound frame.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KansasError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("redirect: {message}")]
    Redirect { message: String, url: String },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("state error: {0}")]
    State(String),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("broken stream")]
    BrokenStream,

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl KansasError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        KansasError::Protocol(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        KansasError::State(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        KansasError::Upstream(msg.into())
    }

    pub fn redirect(message: impl Into<String>, url: impl Into<String>) -> Self {
        KansasError::Redirect {
            message: message.into(),
            url: url.into(),
        }
    }

    /// Classifies the error into the outbound frame shape that should be
    /// sent to the triggering client, per the wire protocol's error/redirect
    /// split. `BrokenStream` has no wire representation: callers must
    /// never route it to `to_frame`, since a broken stream by definition
    /// cannot receive a frame.
    pub fn to_frame(&self) -> OutboundErrorFrame {
        match self {
            KansasError::Redirect { message, url } => OutboundErrorFrame::Redirect {
                msg: message.clone(),
                url: url.clone(),
            },
            other => OutboundErrorFrame::Error {
                msg: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundErrorFrame {
    Error { msg: String },
    Redirect { msg: String, url: String },
}
