//! Run command implementation

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nslaunch_namespace::{
    ChildSignaller, LaunchRequest, Launcher, Namespace, NamespaceSet, UserMapping,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::cli::RunArgs;
use crate::profile::Profile;

/// Program run when neither the command line nor the profile names one
const DEFAULT_COMMAND: &str = "/bin/bash";

pub async fn execute(args: RunArgs) -> Result<i32> {
    let profile = match &args.profile {
        Some(path) => Profile::load(path)?,
        None => Profile::default(),
    };

    let request = build_request(&args, profile);
    info!(
        program = %request.program,
        namespaces = %request.namespaces,
        "Launching"
    );

    // Register before the child exists so an early Ctrl-C is not lost
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to watch SIGINT")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to watch SIGTERM")?;

    let program = request.program.clone();
    let handle = Launcher::new()
        .spawn(request)
        .with_context(|| format!("Failed to launch {program}"))?;
    let pid = handle.pid();
    let signaller = handle.signaller();

    let wait = handle.wait_async();
    tokio::pin!(wait);

    let result = loop {
        tokio::select! {
            result = &mut wait => break result.context("Failed to wait for child")?,
            _ = interrupt.recv() => forward(&signaller, "SIGINT"),
            _ = terminate.recv() => forward(&signaller, "SIGTERM"),
        }
    };

    debug!(pid = %pid, %result, "Child finished");
    Ok(result.shell_status())
}

/// Merge the profile with the command line, flags taking precedence
fn build_request(args: &RunArgs, profile: Profile) -> LaunchRequest {
    let map_root = args.map_root || profile.map_root;

    let mut namespaces = args
        .selected_namespaces()
        .or(profile.namespaces)
        .unwrap_or_else(|| NamespaceSet::from(Namespace::Uts));
    if map_root {
        namespaces.insert(Namespace::User);
    }

    let command = if args.command.is_empty() {
        profile.command
    } else {
        args.command.clone()
    };
    let mut request = if command.is_empty() {
        LaunchRequest::new(DEFAULT_COMMAND)
    } else {
        LaunchRequest::from_command(&command)
    };

    request = request.with_namespaces(namespaces);
    if map_root {
        request = request.with_user_mapping(UserMapping::current_user_as_root());
    }
    if let Some(hostname) = args.hostname.clone().or(profile.hostname) {
        request = request.with_hostname(hostname);
    }
    if let Some(domainname) = args.domainname.clone().or(profile.domainname) {
        request = request.with_domainname(domainname);
    }
    for (key, value) in profile.env {
        request = request.with_env(key, value);
    }

    request
}

fn forward(signaller: &ChildSignaller, received: &str) {
    let pid = signaller.pid();
    info!(pid = %pid, signal = received, "Forwarding SIGTERM to child");
    match signaller.signal(Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => debug!(pid = %pid, "Child already gone"),
        Err(e) => warn!(pid = %pid, error = %e, "Failed to signal child"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_defaults() {
        let request = build_request(&RunArgs::default(), Profile::default());
        assert_eq!(request.program, DEFAULT_COMMAND);
        assert!(request.args.is_empty());
        assert_eq!(request.namespaces, NamespaceSet::from(Namespace::Uts));
        assert!(request.user_mapping.is_none());
    }

    #[test]
    fn test_flags_override_profile() {
        let args = RunArgs {
            pid: true,
            hostname: Some("from-flag".to_string()),
            command: vec!["/bin/echo".to_string(), "hi".to_string()],
            ..RunArgs::default()
        };
        let profile = Profile {
            namespaces: Some(Namespace::Uts | Namespace::Network),
            hostname: Some("from-profile".to_string()),
            domainname: Some("example".to_string()),
            command: vec!["/bin/sh".to_string()],
            ..Profile::default()
        };

        let request = build_request(&args, profile);
        assert_eq!(request.program, "/bin/echo");
        assert_eq!(request.args, vec!["hi"]);
        assert_eq!(request.namespaces, NamespaceSet::from(Namespace::Pid));
        assert_eq!(request.uts.hostname.as_deref(), Some("from-flag"));
        assert_eq!(request.uts.domainname.as_deref(), Some("example"));
    }

    #[test]
    fn test_profile_used_without_flags() {
        let profile = Profile {
            namespaces: Some(NamespaceSet::empty()),
            env: BTreeMap::from([("NSLAUNCH_TEST".to_string(), "1".to_string())]),
            command: vec!["/bin/true".to_string()],
            ..Profile::default()
        };

        let request = build_request(&RunArgs::default(), profile);
        assert_eq!(request.program, "/bin/true");
        assert!(request.namespaces.is_empty());
        let env = request.env.unwrap();
        assert_eq!(env.get("NSLAUNCH_TEST").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_map_root_implies_user_namespace() {
        let args = RunArgs {
            map_root: true,
            ..RunArgs::default()
        };
        let request = build_request(&args, Profile::default());
        assert!(request.namespaces.contains(Namespace::User));
        assert!(request.namespaces.contains(Namespace::Uts));
        assert!(request.user_mapping.is_some());
    }
}
