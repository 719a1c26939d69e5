//! Namespace flag set and its validation

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use nslaunch_core::ConfigError;

/// Longest hostname or domain name the kernel accepts
pub const HOST_NAME_MAX: usize = 64;

/// A kind of Linux namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    /// Hostname and NIS domain name
    #[serde(rename = "uts")]
    Uts,
    /// Process IDs
    #[serde(rename = "pid")]
    Pid,
    /// Mount table
    #[serde(rename = "mnt", alias = "mount")]
    Mount,
    /// Network stack
    #[serde(rename = "net", alias = "network")]
    Network,
    /// System V IPC and POSIX message queues
    #[serde(rename = "ipc")]
    Ipc,
    /// User and group IDs
    #[serde(rename = "user")]
    User,
    /// Cgroup root directory
    #[serde(rename = "cgroup")]
    Cgroup,
}

impl Namespace {
    /// Every namespace kind, in bit order
    pub const ALL: [Self; 7] = [
        Self::Uts,
        Self::Pid,
        Self::Mount,
        Self::Network,
        Self::Ipc,
        Self::User,
        Self::Cgroup,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// The clone(2) flag creating this namespace
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }

    /// Name of the entry under `/proc/<pid>/ns`
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Uts => "uts",
            Self::Pid => "pid",
            Self::Mount => "mnt",
            Self::Network => "net",
            Self::Ipc => "ipc",
            Self::User => "user",
            Self::Cgroup => "cgroup",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Unknown namespace name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown namespace {0:?} (expected uts, pid, mnt, net, ipc, user or cgroup)")]
pub struct ParseNamespaceError(String);

impl FromStr for Namespace {
    type Err = ParseNamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uts" => Ok(Self::Uts),
            "pid" => Ok(Self::Pid),
            "mnt" | "mount" => Ok(Self::Mount),
            "net" | "network" => Ok(Self::Network),
            "ipc" => Ok(Self::Ipc),
            "user" => Ok(Self::User),
            "cgroup" => Ok(Self::Cgroup),
            _ => Err(ParseNamespaceError(s.to_string())),
        }
    }
}

/// Set of namespaces to create for a child
///
/// The empty set is legal and means "no isolation".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Namespace>", into = "Vec<Namespace>")]
pub struct NamespaceSet(u8);

impl NamespaceSet {
    /// No namespaces
    pub const NONE: Self = Self(0);

    /// Every namespace kind
    #[must_use]
    pub const fn all() -> Self {
        Self(0b0111_1111)
    }

    /// Empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self::NONE
    }

    /// Add a namespace
    #[must_use]
    pub const fn with(self, ns: Namespace) -> Self {
        Self(self.0 | ns.bit())
    }

    /// Add a namespace in place
    pub fn insert(&mut self, ns: Namespace) {
        self.0 |= ns.bit();
    }

    /// Remove a namespace in place
    pub fn remove(&mut self, ns: Namespace) {
        self.0 &= !ns.bit();
    }

    /// Check if a namespace is in the set
    #[must_use]
    pub const fn contains(self, ns: Namespace) -> bool {
        self.0 & ns.bit() != 0
    }

    /// Check if no namespaces are requested
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of namespaces requested
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over the requested namespaces
    pub fn iter(self) -> impl Iterator<Item = Namespace> {
        Namespace::ALL.into_iter().filter(move |ns| self.contains(*ns))
    }

    /// Get list of requested namespace names
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(Namespace::proc_name).collect()
    }

    /// Convert to clone flags for clone(2)
    #[must_use]
    pub fn to_clone_flags(self) -> CloneFlags {
        self.iter()
            .fold(CloneFlags::empty(), |flags, ns| flags | ns.clone_flag())
    }

    /// Check the set against the rest of the request and map it to clone flags
    ///
    /// Kernel support for each namespace is not probed here; an unsupported
    /// kind surfaces as a creation failure at launch.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the combination cannot be launched
    pub fn validate(
        self,
        user_mapping: Option<&UserMapping>,
        uts: &UtsNames,
    ) -> Result<ValidatedSet, ConfigError> {
        if self.contains(Namespace::User) {
            let mapping = user_mapping.ok_or(ConfigError::MissingUserMapping)?;
            if mapping.uid.is_empty() || mapping.gid.is_empty() {
                return Err(ConfigError::MissingUserMapping);
            }
            if let Some(bad) = mapping
                .uid
                .iter()
                .chain(&mapping.gid)
                .find(|range| range.count == 0)
            {
                return Err(ConfigError::InvalidIdMapping {
                    inside: bad.inside,
                    outside: bad.outside,
                    count: bad.count,
                });
            }
        }

        for (field, value) in [("hostname", &uts.hostname), ("domainname", &uts.domainname)] {
            let Some(value) = value else { continue };
            if !self.contains(Namespace::Uts) {
                return Err(ConfigError::UtsNotRequested { field });
            }
            if value.is_empty() || value.len() > HOST_NAME_MAX || value.contains('\0') {
                return Err(ConfigError::InvalidHostname {
                    field,
                    value: value.clone(),
                });
            }
        }

        Ok(ValidatedSet {
            set: self,
            flags: self.to_clone_flags(),
        })
    }
}

impl From<Namespace> for NamespaceSet {
    fn from(ns: Namespace) -> Self {
        Self(ns.bit())
    }
}

impl FromIterator<Namespace> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = Namespace>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl From<Vec<Namespace>> for NamespaceSet {
    fn from(list: Vec<Namespace>) -> Self {
        list.into_iter().collect()
    }
}

impl From<NamespaceSet> for Vec<Namespace> {
    fn from(set: NamespaceSet) -> Self {
        set.iter().collect()
    }
}

impl FromStr for NamespaceSet {
    type Err = ParseNamespaceError;

    /// Parse a comma separated list such as `uts,pid,mnt`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Namespace::from_str)
            .collect()
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join(","))
    }
}

impl std::ops::BitOr for NamespaceSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<Namespace> for NamespaceSet {
    type Output = Self;

    fn bitor(self, rhs: Namespace) -> Self {
        self.with(rhs)
    }
}

impl std::ops::BitOr for Namespace {
    type Output = NamespaceSet;

    fn bitor(self, rhs: Self) -> NamespaceSet {
        NamespaceSet::from(self).with(rhs)
    }
}

impl std::ops::BitOrAssign<Namespace> for NamespaceSet {
    fn bitor_assign(&mut self, rhs: Namespace) {
        self.insert(rhs);
    }
}

/// A namespace set that passed validation, with its clone flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedSet {
    set: NamespaceSet,
    flags: CloneFlags,
}

impl ValidatedSet {
    /// The validated set
    #[must_use]
    pub const fn namespaces(&self) -> NamespaceSet {
        self.set
    }

    /// Flags to pass to clone(2)
    #[must_use]
    pub const fn clone_flags(&self) -> CloneFlags {
        self.flags
    }
}

/// One line of a `uid_map` or `gid_map`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapRange {
    /// First id inside the namespace
    pub inside: u32,
    /// First id in the parent namespace
    pub outside: u32,
    /// Length of the range
    pub count: u32,
}

impl IdMapRange {
    /// Create a mapping range
    #[must_use]
    pub const fn new(inside: u32, outside: u32, count: u32) -> Self {
        Self {
            inside,
            outside,
            count,
        }
    }
}

impl fmt::Display for IdMapRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.inside, self.outside, self.count)
    }
}

/// UID/GID mappings written for a new user namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    /// Lines of `/proc/<pid>/uid_map`
    pub uid: Vec<IdMapRange>,
    /// Lines of `/proc/<pid>/gid_map`
    pub gid: Vec<IdMapRange>,
}

impl UserMapping {
    /// Map the caller's real uid and gid to root inside the namespace
    ///
    /// This is the only mapping an unprivileged caller may write.
    #[must_use]
    pub fn current_user_as_root() -> Self {
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        Self {
            uid: vec![IdMapRange::new(0, uid, 1)],
            gid: vec![IdMapRange::new(0, gid, 1)],
        }
    }

    /// Contents for `uid_map`
    #[must_use]
    pub fn uid_map(&self) -> String {
        Self::render(&self.uid)
    }

    /// Contents for `gid_map`
    #[must_use]
    pub fn gid_map(&self) -> String {
        Self::render(&self.gid)
    }

    fn render(ranges: &[IdMapRange]) -> String {
        ranges
            .iter()
            .map(|range| format!("{range}\n"))
            .collect()
    }
}

/// Names applied inside a new UTS namespace before exec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtsNames {
    /// Hostname for the child
    pub hostname: Option<String>,
    /// NIS domain name for the child
    pub domainname: Option<String>,
}

impl UtsNames {
    /// Check if neither name is set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.domainname.is_none()
    }
}
