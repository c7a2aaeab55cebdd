//! Error types for mirror operations

use crate::types::NodeHandle;
use std::io;
use thiserror::Error;

pub type HostResult<T> = std::result::Result<T, HostError>;

pub type MirrorResult<T> = std::result::Result<T, MirrorError>;

/// Failures reported by the host tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The handle no longer designates a valid element. This is the liveness
    /// signal used to detect renames and silent deletions.
    #[error("stale handle: {0}")]
    Stale(NodeHandle),

    /// The host failed for an unrelated reason (e.g. a concurrent edit).
    #[error("host failure during {operation}: {message}")]
    Failure {
        operation: &'static str,
        message: String,
    },
}

impl HostError {
    pub fn failure(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Failure {
            operation,
            message: message.into(),
        }
    }

    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("failed to subscribe namespace {namespace}: {message}")]
    Subscription { namespace: String, message: String },

    #[error("mirror has been disposed")]
    Disposed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
