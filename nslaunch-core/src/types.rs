//! Core type definitions for launched processes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process identifier of a launched child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        Self::from(nix::unistd::getpid())
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}

/// How a launched child terminated
///
/// Exactly one of exit code or terminating signal exists, so this is an enum
/// rather than a pair of options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LaunchResult {
    /// Normal exit with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
}

impl LaunchResult {
    /// Exit code, if the child exited normally
    #[must_use]
    pub const fn exit_code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) => None,
        }
    }

    /// Signal number, if the child was killed by a signal
    #[must_use]
    pub const fn terminating_signal(self) -> Option<i32> {
        match self {
            Self::Exited(_) => None,
            Self::Signaled(sig) => Some(sig),
        }
    }

    /// Whether the child exited with status 0
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Status as a shell would report it (128 + signal on signal death)
    #[must_use]
    pub const fn shell_status(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(sig) => 128 + sig,
        }
    }
}

impl fmt::Display for LaunchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(sig) => write!(f, "terminated by signal {sig}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);

        let nix_pid = pid.as_nix_pid();
        assert_eq!(nix_pid.as_raw(), 123);
        assert_eq!(ProcessId::from(nix_pid), pid);
    }

    #[test]
    fn test_current_pid() {
        #[allow(clippy::cast_possible_wrap)]
        let expected = std::process::id() as i32;
        assert_eq!(ProcessId::current().as_raw(), expected);
    }

    #[test]
    fn test_launch_result_exactly_one() {
        let exited = LaunchResult::Exited(3);
        assert_eq!(exited.exit_code(), Some(3));
        assert_eq!(exited.terminating_signal(), None);
        assert!(!exited.success());

        let signaled = LaunchResult::Signaled(9);
        assert_eq!(signaled.exit_code(), None);
        assert_eq!(signaled.terminating_signal(), Some(9));
        assert_eq!(signaled.shell_status(), 137);
    }

    #[test]
    fn test_launch_result_serde() {
        let json = serde_json::to_string(&LaunchResult::Signaled(15)).unwrap();
        assert_eq!(json, r#"{"kind":"signaled","value":15}"#);

        let back: LaunchResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LaunchResult::Signaled(15));
    }
}
