//! Namespace identity of running processes

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use nslaunch_core::{Error, ProcessId, Result};

use crate::config::Namespace;

/// Namespace identities of one process, read from `/proc/<pid>/ns`
///
/// Identities look like `uts:[4026531838]`; two processes share a
/// namespace exactly when their identities are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    ids: BTreeMap<Namespace, String>,
}

impl NamespaceInfo {
    /// Get namespace identities of the current process
    ///
    /// # Errors
    /// Returns error if `/proc/self/ns` cannot be read
    pub fn current() -> Result<Self> {
        Self::for_pid(ProcessId::current())
    }

    /// Get namespace identities for a specific PID
    ///
    /// Kinds the kernel does not expose are left out.
    ///
    /// # Errors
    /// Returns error if the process does not exist or none of its
    /// namespaces are readable
    pub fn for_pid(pid: ProcessId) -> Result<Self> {
        let base_path = format!("/proc/{pid}/ns");

        let mut ids = BTreeMap::new();
        let mut last_error = None;
        for ns in Namespace::ALL {
            let path = format!("{base_path}/{}", ns.proc_name());
            match fs::read_link(&path) {
                Ok(link) => {
                    ids.insert(ns, link.to_string_lossy().into_owned());
                }
                Err(e) => last_error = Some((ns, e)),
            }
        }

        match last_error {
            Some((ns, e)) if ids.is_empty() => Err(Error::Namespace {
                message: format!("Failed to read {ns} namespace of PID {pid}: {e}"),
            }),
            _ => Ok(Self { ids }),
        }
    }

    /// Identity of one namespace kind
    #[must_use]
    pub fn get(&self, ns: Namespace) -> Option<&str> {
        self.ids.get(&ns).map(String::as_str)
    }

    /// Kinds in which `self` and `other` are in different namespaces
    ///
    /// Kinds missing on either side are not compared.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> Vec<Namespace> {
        self.ids
            .iter()
            .filter(|(ns, id)| other.get(**ns).is_some_and(|theirs| theirs != id.as_str()))
            .map(|(ns, _)| *ns)
            .collect()
    }

    /// Check if in different namespaces than init (PID 1)
    ///
    /// # Errors
    /// Returns error if init's namespaces cannot be read (usually needs root)
    pub fn is_isolated(&self) -> Result<bool> {
        let init_ns = Self::for_pid(ProcessId::from_raw(1))?;
        Ok(!self.differs_from(&init_ns).is_empty())
    }
}

impl fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Namespace Info:")?;
        for (ns, id) in &self.ids {
            let label = format!("{}:", ns.proc_name().to_uppercase());
            writeln!(f, "  {label:<8}{id}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(entries: &[(Namespace, &str)]) -> NamespaceInfo {
        NamespaceInfo {
            ids: entries
                .iter()
                .map(|(ns, id)| (*ns, (*id).to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_current_namespaces() {
        let info = NamespaceInfo::current().unwrap();
        assert!(info.get(Namespace::Uts).is_some());
        assert!(info.get(Namespace::Pid).is_some());
    }

    #[test]
    fn test_same_process_does_not_differ() {
        let a = NamespaceInfo::current().unwrap();
        let b = NamespaceInfo::current().unwrap();
        assert!(a.differs_from(&b).is_empty());
    }

    #[test]
    fn test_differs_from() {
        let host = info(&[
            (Namespace::Uts, "uts:[1]"),
            (Namespace::Pid, "pid:[2]"),
            (Namespace::Network, "net:[3]"),
        ]);
        let child = info(&[(Namespace::Uts, "uts:[9]"), (Namespace::Pid, "pid:[2]")]);

        assert_eq!(child.differs_from(&host), vec![Namespace::Uts]);
    }

    #[test]
    fn test_missing_process() {
        assert!(NamespaceInfo::for_pid(ProcessId::from_raw(i32::MAX)).is_err());
    }

    #[test]
    fn test_namespace_info_display() {
        let info = info(&[
            (Namespace::Pid, "pid:[4026531836]"),
            (Namespace::Network, "net:[4026531905]"),
        ]);

        let display = format!("{info}");
        assert!(display.contains("PID:"));
        assert!(display.contains("NET:"));
        assert!(display.contains("pid:[4026531836]"));
    }
}
