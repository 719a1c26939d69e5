//! Error types for nslaunch
//!
//! Launch failures are classified into closed enums at the OS boundary so
//! callers can branch on the kind of failure instead of matching strings.

use nix::errno::Errno;
use std::fmt;
use thiserror::Error;

/// A namespace request that cannot be launched as given
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// USER namespace requested without uid/gid mappings
    #[error("user namespace requested without uid/gid mapping")]
    MissingUserMapping,

    /// A mapping range that maps nothing
    #[error("invalid id mapping {inside}:{outside}:{count}")]
    InvalidIdMapping {
        /// First id inside the namespace
        inside: u32,
        /// First id outside the namespace
        outside: u32,
        /// Number of ids in the range
        count: u32,
    },

    /// Hostname or domain name given but no UTS namespace requested
    #[error("{field} requires a UTS namespace")]
    UtsNotRequested {
        /// Which name was supplied
        field: &'static str,
    },

    /// Hostname or domain name the kernel would reject
    #[error("invalid {field}: {value:?}")]
    InvalidHostname {
        /// Which name was supplied
        field: &'static str,
        /// The rejected value
        value: String,
    },
}

/// Why the OS refused to create or start the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationCause {
    /// Namespace creation needs a capability the caller lacks
    PermissionDenied,
    /// The running kernel does not support a requested namespace type
    UnsupportedNamespace,
    /// A process, memory, or namespace count limit was hit
    ResourceLimit,
    /// Anything else
    Unknown,
}

impl CreationCause {
    /// Classify an errno returned by clone(2), execve(2) and friends
    #[must_use]
    pub const fn from_errno(errno: Errno) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied,
            Errno::EINVAL => Self::UnsupportedNamespace,
            Errno::ENOSPC
            | Errno::EAGAIN
            | Errno::ENOMEM
            | Errno::EUSERS
            | Errno::EMFILE
            | Errno::ENFILE => Self::ResourceLimit,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CreationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission denied",
            Self::UnsupportedNamespace => "unsupported namespace",
            Self::ResourceLimit => "resource limit reached",
            Self::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// Step of child creation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CreationStage {
    /// clone(2) itself
    Clone = 1,
    /// Binding stdin/stdout/stderr in the child
    Stdio = 2,
    /// Writing uid_map/gid_map for a user namespace
    UserMapping = 3,
    /// Setting hostname or domain name in the new UTS namespace
    Hostname = 4,
    /// execve(2) of the target program
    Exec = 5,
}

impl CreationStage {
    /// Decode the stage tag sent back by a failed child
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Clone),
            2 => Some(Self::Stdio),
            3 => Some(Self::UserMapping),
            4 => Some(Self::Hostname),
            5 => Some(Self::Exec),
            _ => None,
        }
    }
}

impl fmt::Display for CreationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Clone => "clone",
            Self::Stdio => "stdio setup",
            Self::UserMapping => "uid/gid mapping",
            Self::Hostname => "hostname setup",
            Self::Exec => "exec",
        };
        f.write_str(s)
    }
}

/// The OS refused process or namespace creation
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{stage} failed: {cause} ({errno})")]
pub struct CreationError {
    /// Classified cause
    pub cause: CreationCause,
    /// Where it happened
    pub stage: CreationStage,
    /// Raw errno, kept for diagnostics
    pub errno: Errno,
}

impl CreationError {
    /// Build an error, classifying `errno`
    #[must_use]
    pub const fn new(stage: CreationStage, errno: Errno) -> Self {
        Self {
            cause: CreationCause::from_errno(errno),
            stage,
            errno,
        }
    }
}

/// Errors returned by a launch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LaunchError {
    /// The request was rejected before any OS interaction
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The target program could not be resolved
    #[error("executable not found: {program:?}")]
    ExecutableNotFound {
        /// Program as given by the caller
        program: String,
    },

    /// The OS refused to create the child
    #[error("process creation failed: {0}")]
    CreationFailed(#[from] CreationError),

    /// An argument or environment entry cannot be passed to execve
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// Waiting for the child failed
    #[error("wait failed: {0}")]
    WaitFailed(Errno),
}

impl LaunchError {
    /// Whether the failure happened before the OS was asked to create anything
    #[must_use]
    pub const fn is_pre_launch(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::ExecutableNotFound { .. } | Self::InvalidArgument { .. }
        )
    }
}

/// nslaunch error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Launch failed
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Namespace inspection failed
    #[error("Namespace error: {message}")]
    Namespace {
        /// Error message
        message: String,
    },

    /// Invalid launch profile
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Profile (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result type alias for nslaunch operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_classification() {
        assert_eq!(
            CreationCause::from_errno(Errno::EPERM),
            CreationCause::PermissionDenied
        );
        assert_eq!(
            CreationCause::from_errno(Errno::EINVAL),
            CreationCause::UnsupportedNamespace
        );
        assert_eq!(
            CreationCause::from_errno(Errno::ENOSPC),
            CreationCause::ResourceLimit
        );
        assert_eq!(
            CreationCause::from_errno(Errno::EUSERS),
            CreationCause::ResourceLimit
        );
        assert_eq!(
            CreationCause::from_errno(Errno::ENOEXEC),
            CreationCause::Unknown
        );
    }

    #[test]
    fn test_stage_tag_roundtrip() {
        for stage in [
            CreationStage::Clone,
            CreationStage::Stdio,
            CreationStage::UserMapping,
            CreationStage::Hostname,
            CreationStage::Exec,
        ] {
            assert_eq!(CreationStage::from_tag(stage as u8), Some(stage));
        }
        assert_eq!(CreationStage::from_tag(0), None);
        assert_eq!(CreationStage::from_tag(42), None);
    }

    #[test]
    fn test_creation_error_display() {
        let err = CreationError::new(CreationStage::Clone, Errno::EPERM);
        let msg = err.to_string();
        assert!(msg.contains("clone failed"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_pre_launch_errors() {
        assert!(LaunchError::from(ConfigError::MissingUserMapping).is_pre_launch());
        assert!(
            LaunchError::ExecutableNotFound {
                program: String::new()
            }
            .is_pre_launch()
        );
        let creation = CreationError::new(CreationStage::Exec, Errno::ENOENT);
        assert!(!LaunchError::from(creation).is_pre_launch());
    }
}
