use std::io;
use symsync_core::HostError;
use symsync_core::MirrorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("no element named {0} in the scenario tree")]
    UnknownTarget(String),

    #[error("malformed scenario: {0}")]
    Scenario(#[from] toml::de::Error),

    #[error("step {step} failed: {source}")]
    Step { step: usize, source: HostError },

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
