//! Launch requests

use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use crate::config::{Namespace, NamespaceSet, UserMapping, UtsNames};

/// Where a child's standard stream comes from
#[derive(Debug, Default)]
pub enum Stdio {
    /// Share the caller's own stream
    #[default]
    Inherit,
    /// Connect to `/dev/null`
    Null,
    /// Use this descriptor, e.g. one end of a pipe
    Fd(OwnedFd),
}

impl Stdio {
    /// Check if the stream is inherited from the caller
    #[must_use]
    pub const fn is_inherit(&self) -> bool {
        matches!(self, Self::Inherit)
    }
}

impl From<OwnedFd> for Stdio {
    fn from(fd: OwnedFd) -> Self {
        Self::Fd(fd)
    }
}

impl From<File> for Stdio {
    fn from(file: File) -> Self {
        Self::Fd(file.into())
    }
}

impl From<std::io::PipeWriter> for Stdio {
    fn from(pipe: std::io::PipeWriter) -> Self {
        Self::Fd(pipe.into())
    }
}

impl From<std::io::PipeReader> for Stdio {
    fn from(pipe: std::io::PipeReader) -> Self {
        Self::Fd(pipe.into())
    }
}

/// Everything needed to launch one child
///
/// A request is consumed by a single launch.
#[derive(Debug, Default)]
pub struct LaunchRequest {
    /// Program to run, absolute or looked up on the search path
    pub program: String,

    /// Arguments after `argv[0]`
    pub args: Vec<String>,

    /// Override for `argv[0]` (defaults to `program` as given)
    pub arg0: Option<String>,

    /// Full environment for the child; `None` inherits the caller's
    pub env: Option<BTreeMap<String, String>>,

    /// Namespaces the child is created in
    pub namespaces: NamespaceSet,

    /// UID/GID mappings, required with a user namespace
    pub user_mapping: Option<UserMapping>,

    /// Hostname and domain name set inside a new UTS namespace
    pub uts: UtsNames,

    /// Directories searched for a bare program name; `None` uses `PATH`
    pub search_path: Option<Vec<PathBuf>>,

    /// Child stdin
    pub stdin: Stdio,

    /// Child stdout
    pub stdout: Stdio,

    /// Child stderr
    pub stderr: Stdio,
}

impl LaunchRequest {
    /// Create a request for `program` with no isolation and inherited stdio
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Build a request from a command line (`argv[0]` is the program)
    ///
    /// An empty command yields an empty program, which launch rejects.
    #[must_use]
    pub fn from_command(command: &[String]) -> Self {
        match command.split_first() {
            Some((program, args)) => Self::new(program.clone()).with_args(args.iter().cloned()),
            None => Self::new(String::new()),
        }
    }

    /// Append one argument
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override `argv[0]`
    #[must_use]
    pub fn with_arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    /// Set one environment variable
    ///
    /// The first call snapshots the caller's environment, so the child sees
    /// the inherited variables plus this one.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(inherited_env)
            .insert(key.into(), value.into());
        self
    }

    /// Start the child with an empty environment
    #[must_use]
    pub fn with_env_clear(mut self) -> Self {
        self.env = Some(BTreeMap::new());
        self
    }

    /// Replace the namespace set
    #[must_use]
    pub fn with_namespaces(mut self, namespaces: NamespaceSet) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Add one namespace
    #[must_use]
    pub fn with_namespace(mut self, ns: Namespace) -> Self {
        self.namespaces.insert(ns);
        self
    }

    /// Set UID/GID mappings for a user namespace
    #[must_use]
    pub fn with_user_mapping(mut self, mapping: UserMapping) -> Self {
        self.user_mapping = Some(mapping);
        self
    }

    /// Set hostname for UTS namespace
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.uts.hostname = Some(hostname.into());
        self
    }

    /// Set domain name for UTS namespace
    #[must_use]
    pub fn with_domainname(mut self, domainname: impl Into<String>) -> Self {
        self.uts.domainname = Some(domainname.into());
        self
    }

    /// Directories to search for a bare program name
    #[must_use]
    pub fn with_search_path<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_path = Some(dirs.into_iter().map(Into::into).collect());
        self
    }

    /// Bind stdin
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<Stdio>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Bind stdout
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<Stdio>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Bind stderr
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<Stdio>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// Snapshot of the caller's environment, skipping non UTF-8 entries
#[must_use]
pub fn inherited_env() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request = LaunchRequest::new("/bin/true");
        assert_eq!(request.program, "/bin/true");
        assert!(request.args.is_empty());
        assert!(request.env.is_none());
        assert!(request.namespaces.is_empty());
        assert!(request.stdin.is_inherit());
        assert!(request.stdout.is_inherit());
        assert!(request.stderr.is_inherit());
    }

    #[test]
    fn test_from_command() {
        let cmd = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo hi".to_string(),
        ];
        let request = LaunchRequest::from_command(&cmd);
        assert_eq!(request.program, "/bin/sh");
        assert_eq!(request.args, vec!["-c", "echo hi"]);

        assert!(LaunchRequest::from_command(&[]).program.is_empty());
    }

    #[test]
    fn test_builder_pattern() {
        let request = LaunchRequest::new("/bin/bash")
            .with_namespace(Namespace::Uts)
            .with_namespace(Namespace::Pid)
            .with_hostname("test-box")
            .with_env_clear()
            .with_env("TERM", "xterm");

        assert!(request.namespaces.contains(Namespace::Uts));
        assert!(request.namespaces.contains(Namespace::Pid));
        assert_eq!(request.uts.hostname.as_deref(), Some("test-box"));

        let env = request.env.unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("TERM").map(String::as_str), Some("xterm"));
    }

    #[test]
    fn test_with_env_keeps_inherited() {
        let inherited = inherited_env();
        let request = LaunchRequest::new("/bin/true").with_env("NSLAUNCH_EXTRA", "yes");
        let env = request.env.unwrap();

        for key in inherited.keys() {
            assert!(env.contains_key(key), "lost {key}");
        }
        assert_eq!(env.get("NSLAUNCH_EXTRA").map(String::as_str), Some("yes"));
    }
}
