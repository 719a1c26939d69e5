//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use nslaunch_namespace::NamespaceSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nslaunch")]
#[command(about = "Launch programs in new Linux namespaces", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program in new namespaces
    Run(RunArgs),

    /// Show namespace information
    Namespaces {
        /// Process ID (default: current process)
        #[arg(short, long)]
        pid: Option<i32>,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// New UTS namespace (hostname, domain name)
    #[arg(long)]
    pub uts: bool,

    /// New PID namespace
    #[arg(long)]
    pub pid: bool,

    /// New mount namespace
    #[arg(long)]
    pub mount: bool,

    /// New network namespace
    #[arg(long)]
    pub net: bool,

    /// New IPC namespace
    #[arg(long)]
    pub ipc: bool,

    /// New user namespace (needs a mapping, see --map-root)
    #[arg(long)]
    pub user: bool,

    /// New cgroup namespace
    #[arg(long)]
    pub cgroup: bool,

    /// Comma separated namespaces, e.g. "uts,pid,mnt" ("none" for no isolation)
    #[arg(long, value_name = "LIST", value_parser = parse_namespace_list)]
    pub ns: Option<NamespaceSet>,

    /// Hostname inside the new UTS namespace
    #[arg(long)]
    pub hostname: Option<String>,

    /// Domain name inside the new UTS namespace
    #[arg(long)]
    pub domainname: Option<String>,

    /// Map the current user to root in a new user namespace (implies --user)
    #[arg(long)]
    pub map_root: bool,

    /// JSON launch profile; flags override its settings
    #[arg(long, value_name = "FILE")]
    pub profile: Option<PathBuf>,

    /// Program and arguments (default: /bin/bash)
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Namespaces selected with flags, `None` if none were given
    pub fn selected_namespaces(&self) -> Option<NamespaceSet> {
        use nslaunch_namespace::Namespace;

        let flags = [
            (self.uts, Namespace::Uts),
            (self.pid, Namespace::Pid),
            (self.mount, Namespace::Mount),
            (self.net, Namespace::Network),
            (self.ipc, Namespace::Ipc),
            (self.user, Namespace::User),
            (self.cgroup, Namespace::Cgroup),
        ];
        let from_flags: NamespaceSet = flags
            .into_iter()
            .filter_map(|(on, ns)| on.then_some(ns))
            .collect();

        match self.ns {
            Some(list) => Some(list | from_flags),
            None if from_flags.is_empty() => None,
            None => Some(from_flags),
        }
    }
}

fn parse_namespace_list(s: &str) -> Result<NamespaceSet, String> {
    if s.trim().eq_ignore_ascii_case("none") {
        return Ok(NamespaceSet::empty());
    }
    s.parse().map_err(|e| format!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nslaunch_namespace::Namespace;

    #[test]
    fn test_no_flags_selects_nothing() {
        assert_eq!(RunArgs::default().selected_namespaces(), None);
    }

    #[test]
    fn test_flags_and_list_combine() {
        let args = RunArgs {
            pid: true,
            ns: Some(NamespaceSet::from(Namespace::Uts)),
            ..RunArgs::default()
        };
        assert_eq!(
            args.selected_namespaces(),
            Some(Namespace::Uts | Namespace::Pid)
        );
    }

    #[test]
    fn test_explicit_empty_list() {
        let args = RunArgs {
            ns: Some(parse_namespace_list("none").unwrap()),
            ..RunArgs::default()
        };
        assert_eq!(args.selected_namespaces(), Some(NamespaceSet::empty()));
    }

    #[test]
    fn test_parse_namespace_list() {
        assert_eq!(
            parse_namespace_list("uts,mnt").unwrap(),
            Namespace::Uts | Namespace::Mount
        );
        assert!(parse_namespace_list("uts,bogus").is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
