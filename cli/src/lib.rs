//! Scenario replay for the symsync mirror.

pub mod error;
pub mod replay;
pub mod scenario;

pub use error::CliError;
pub use error::Result;
pub use replay::Replay;
pub use replay::run;
pub use scenario::HostOptions;
pub use scenario::Scenario;
pub use scenario::Step;
