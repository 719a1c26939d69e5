//! Launch lifecycle events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::{LaunchResult, ProcessId};

/// Events emitted while launching a child
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaunchEvent {
    /// Child created inside its namespaces
    Spawned {
        /// Child PID (as seen from the parent)
        pid: ProcessId,
        /// Resolved program path
        program: String,
        /// Names of the namespaces the child was created in
        namespaces: Vec<String>,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Child reaped
    Exited {
        /// Child PID
        pid: ProcessId,
        /// How it terminated
        result: LaunchResult,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Launch failed before or during creation
    Failed {
        /// Program as given by the caller
        program: String,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl LaunchEvent {
    /// Child spawned now
    #[must_use]
    pub fn spawned(pid: ProcessId, program: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self::Spawned {
            pid,
            program: program.into(),
            namespaces,
            timestamp: SystemTime::now(),
        }
    }

    /// Child reaped now
    #[must_use]
    pub fn exited(pid: ProcessId, result: LaunchResult) -> Self {
        Self::Exited {
            pid,
            result,
            timestamp: SystemTime::now(),
        }
    }

    /// Launch failed now
    #[must_use]
    pub fn failed(program: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Failed {
            program: program.into(),
            message: message.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// PID of the child, if one was created
    #[must_use]
    pub const fn pid(&self) -> Option<ProcessId> {
        match self {
            Self::Spawned { pid, .. } | Self::Exited { pid, .. } => Some(*pid),
            Self::Failed { .. } => None,
        }
    }

    /// Get the timestamp from any event
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::Spawned { timestamp, .. }
            | Self::Exited { timestamp, .. }
            | Self::Failed { timestamp, .. } => *timestamp,
        }
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::Spawned {
                pid,
                program,
                namespaces,
                ..
            } => {
                tracing::info!(
                    pid = %pid,
                    program = %program,
                    namespaces = ?namespaces,
                    event = "spawned",
                    "Child spawned"
                );
            }
            Self::Exited { pid, result, .. } => match result {
                LaunchResult::Exited(code) => {
                    tracing::info!(
                        pid = %pid,
                        exit_code = code,
                        event = "exited",
                        "Child exited"
                    );
                }
                LaunchResult::Signaled(sig) => {
                    tracing::warn!(
                        pid = %pid,
                        signal = sig,
                        event = "signaled",
                        "Child terminated by signal"
                    );
                }
            },
            Self::Failed {
                program, message, ..
            } => {
                tracing::error!(
                    program = %program,
                    message = %message,
                    event = "failed",
                    "Launch failed"
                );
            }
        }
    }
}

impl fmt::Display for LaunchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawned {
                pid,
                program,
                namespaces,
                ..
            } => {
                write!(f, "{program} spawned as PID {pid}")?;
                if !namespaces.is_empty() {
                    write!(f, " in [{}]", namespaces.join(", "))?;
                }
                Ok(())
            }
            Self::Exited { pid, result, .. } => write!(f, "PID {pid} {result}"),
            Self::Failed {
                program, message, ..
            } => write!(f, "launching {program} failed: {message}"),
        }
    }
}

mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_pid() {
        let pid = ProcessId::from_raw(42);
        let event = LaunchEvent::spawned(pid, "/bin/true", vec!["uts".to_string()]);
        assert_eq!(event.pid(), Some(pid));

        let event = LaunchEvent::failed("/bin/true", "boom");
        assert_eq!(event.pid(), None);
    }

    #[test]
    fn test_event_display() {
        let pid = ProcessId::from_raw(7);
        let event = LaunchEvent::spawned(pid, "/bin/bash", vec!["uts".into(), "pid".into()]);
        assert_eq!(event.to_string(), "/bin/bash spawned as PID 7 in [uts, pid]");

        let event = LaunchEvent::exited(pid, LaunchResult::Signaled(9));
        assert_eq!(event.to_string(), "PID 7 terminated by signal 9");
    }

    #[test]
    fn test_event_serde() {
        let pid = ProcessId::from_raw(99);
        let event = LaunchEvent::exited(pid, LaunchResult::Exited(0));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"exited""#));

        let deserialized: LaunchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.pid(), Some(pid));
    }
}
