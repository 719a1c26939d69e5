use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Check if running as root
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn nslaunch() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nslaunch"))
}

#[test]
fn test_help_command() {
    nslaunch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Launch programs in new Linux namespaces"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("namespaces"));
}

#[test]
fn test_run_help_lists_namespace_flags() {
    nslaunch()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--uts"))
        .stdout(predicate::str::contains("--map-root"))
        .stdout(predicate::str::contains("--profile"));
}

#[test]
fn test_version_command() {
    nslaunch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nslaunch"));
}

#[test]
fn test_invalid_command() {
    nslaunch()
        .arg("invalid")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_unknown_namespace_rejected() {
    nslaunch()
        .args(["run", "--ns", "uts,bogus", "--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown namespace"));
}

#[test]
fn test_namespaces_no_root_needed() {
    nslaunch()
        .arg("namespaces")
        .assert()
        .success()
        .stdout(predicate::str::contains("Namespace"))
        .stdout(predicate::str::contains("UTS:"));
}

#[test]
fn test_namespaces_for_missing_pid() {
    nslaunch()
        .args(["namespaces", "--pid", "2147483647"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to get namespace information"));
}

#[test]
fn test_run_without_namespaces() {
    nslaunch()
        .args(["run", "--ns", "none", "--", "/bin/true"])
        .assert()
        .success();
}

#[test]
fn test_run_passes_exit_code_through() {
    nslaunch()
        .args(["run", "--ns", "none", "--", "/bin/sh", "-c", "exit 3"])
        .assert()
        .code(3);
}

#[test]
fn test_run_reports_signal_like_a_shell() {
    nslaunch()
        .args(["run", "--ns", "none", "--", "/bin/sh", "-c", "kill -KILL $$"])
        .assert()
        .code(137);
}

#[test]
fn test_run_child_owns_stdout() {
    nslaunch()
        .args(["run", "--ns", "none", "--", "/bin/echo", "hello from the child"])
        .assert()
        .success()
        .stdout("hello from the child\n");
}

#[test]
fn test_run_missing_executable() {
    nslaunch()
        .args(["run", "--ns", "none", "--", "nslaunch-no-such-program"])
        .assert()
        .code(127)
        .stderr(predicate::str::contains("executable not found"));
}

#[test]
fn test_run_user_namespace_without_mapping() {
    nslaunch()
        .args(["run", "--user", "--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("without uid/gid mapping"));
}

#[test]
fn test_run_hostname_without_uts() {
    nslaunch()
        .args(["run", "--ns", "none", "--hostname", "box", "--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hostname requires a UTS namespace"));
}

#[test]
fn test_run_requires_privilege_for_uts() {
    // Root can create the namespace, nothing to check
    if is_root() {
        return;
    }

    nslaunch()
        .args(["run", "--", "/bin/true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("permission denied"));
}

#[test]
fn test_run_from_profile() {
    let mut profile = tempfile::NamedTempFile::new().unwrap();
    write!(
        profile,
        r#"{{"namespaces": [], "env": {{"GREETING": "hi"}}, "command": ["/bin/sh", "-c", "echo $GREETING"]}}"#
    )
    .unwrap();

    nslaunch()
        .arg("run")
        .arg("--profile")
        .arg(profile.path())
        .assert()
        .success()
        .stdout("hi\n");
}

#[test]
fn test_run_bad_profile() {
    let mut profile = tempfile::NamedTempFile::new().unwrap();
    write!(profile, "not json").unwrap();

    nslaunch()
        .arg("run")
        .arg("--profile")
        .arg(profile.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid profile"));
}

#[test]
#[ignore] // Requires root
fn test_run_with_hostname() {
    if !is_root() {
        return;
    }

    nslaunch()
        .args(["run", "--hostname", "nslaunch-cli-test", "--", "/bin/cat", "/proc/sys/kernel/hostname"])
        .assert()
        .success()
        .stdout("nslaunch-cli-test\n");
}

#[test]
#[ignore] // Requires root
fn test_run_in_pid_namespace() {
    if !is_root() {
        return;
    }

    nslaunch()
        .args(["run", "--pid", "--", "/bin/sh", "-c", "echo $$"])
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
#[ignore] // Requires unprivileged user namespaces
fn test_run_rootless_with_map_root() {
    nslaunch()
        .args(["run", "--map-root", "--hostname", "rootless", "--", "/bin/sh", "-c", "id -u; cat /proc/sys/kernel/hostname"])
        .assert()
        .success()
        .stdout("0\nrootless\n");
}
