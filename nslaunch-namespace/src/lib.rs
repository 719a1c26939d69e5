//! Launching processes inside fresh Linux namespaces
//!
//! This crate creates a child in new namespaces at the moment it is cloned
//! and execs a target program there:
//! - UTS namespace - Hostname isolation
//! - PID namespace - Process isolation
//! - Mount namespace - Filesystem isolation
//! - Network namespace - Network isolation
//! - IPC namespace - Inter-process communication isolation
//! - User namespace - UID/GID mapping
//! - Cgroup namespace - Cgroup root isolation

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod clone;
pub mod config;
pub mod info;
pub mod launcher;
pub mod request;
pub mod spawner;

pub use clone::CloneSpawner;
pub use config::{IdMapRange, Namespace, NamespaceSet, UserMapping, UtsNames, ValidatedSet};
pub use info::NamespaceInfo;
pub use launcher::{ChildSignaller, LaunchHandle, Launcher};
pub use request::{LaunchRequest, Stdio};
pub use spawner::{PreparedChild, ProcessSpawner, RecordingSpawner, SpawnRecord};
