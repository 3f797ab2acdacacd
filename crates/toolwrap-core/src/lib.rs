#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod bootstrap;
pub mod config;
pub mod effects;
pub mod environment;
pub mod error;
pub mod process;
pub mod provision;
pub mod summary;
pub mod wrapper;

pub use bootstrap::run_bootstrap;
pub use config::{
    BootstrapConfig, BootstrapOptions, EnvSnapshot, MissingAction, LOG_FILENAME,
};
pub use effects::{CommandRunner, Effects, SystemEffects};
pub use environment::{EnvLayout, EnvironmentRecord, EnvironmentState};
pub use error::BootstrapError;
pub use summary::{display_path, EnvironmentAction, ProvisioningOutcome, RunSummary};
