//! nslaunch core - shared types, errors, and launch events
//!
//! This crate provides the vocabulary shared by the launcher and the CLI.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod types;

pub use error::{
    ConfigError, CreationCause, CreationError, CreationStage, Error, LaunchError, Result,
};
pub use events::LaunchEvent;
pub use types::{LaunchResult, ProcessId};
