//! Namespace launch demonstration
//!
//! Run with: cargo run --example namespace_demo
//! Run as root: sudo cargo run --example namespace_demo

use std::io::Read;

use nslaunch_namespace::{
    LaunchRequest, Launcher, Namespace, NamespaceInfo, NamespaceSet, UserMapping,
};

/// Check if running as root
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn main() {
    println!("nslaunch namespace demo\n");

    tracing_subscriber::fmt::init();

    demo_current_namespaces();
    demo_namespace_sets();
    demo_plain_launch();

    if is_root() {
        println!("\nRunning with root privileges, demonstrating isolation\n");
        demo_isolated_launch();
    } else {
        println!("\nRun with sudo to see namespace isolation demos");
        demo_rootless_launch();
    }
}

fn demo_current_namespaces() {
    println!("Current process namespaces:");
    println!("{:-<60}", "");

    match NamespaceInfo::current() {
        Ok(ns_info) => {
            print!("{ns_info}");

            match ns_info.is_isolated() {
                Ok(true) => println!("Process is isolated"),
                Ok(false) => println!("Process is in host namespaces"),
                Err(e) => println!("Failed to check: {e}"),
            }
        }
        Err(e) => println!("Failed to get namespaces: {e}"),
    }
    println!();
}

fn demo_namespace_sets() {
    println!("Namespace sets:\n");

    let sets = [
        ("Empty", NamespaceSet::empty()),
        ("UTS only", NamespaceSet::from(Namespace::Uts)),
        ("Parsed", "uts,pid,mnt".parse().unwrap_or_default()),
        ("All", NamespaceSet::all()),
    ];

    for (name, set) in sets {
        println!("  {name}: {set} -> {:?}", set.to_clone_flags());
    }
    println!();
}

fn demo_plain_launch() {
    println!("Launching without new namespaces:");

    let (mut reader, writer) = match std::io::pipe() {
        Ok(pipe) => pipe,
        Err(e) => {
            println!("  Failed to create pipe: {e}");
            return;
        }
    };
    let request = LaunchRequest::new("/bin/echo")
        .with_arg("Hello from a launched child!")
        .with_stdout(writer);

    match Launcher::new().launch(request) {
        Ok(result) => {
            let mut output = String::new();
            let _ = reader.read_to_string(&mut output);
            println!("  Output: {}", output.trim());
            println!("  Child {result}");
        }
        Err(e) => println!("  Failed: {e}"),
    }
}

fn demo_isolated_launch() {
    println!("Launching in new UTS and PID namespaces:");
    println!("{:-<60}", "");

    let request = LaunchRequest::new("/bin/sh")
        .with_args(["-c", "echo \"  hostname: $(hostname), PID: $$\""])
        .with_namespaces(Namespace::Uts | Namespace::Pid)
        .with_hostname("demo-sandbox");

    match Launcher::new().launch(request) {
        Ok(result) => println!("  Child {result}"),
        Err(e) => println!("  Failed: {e}"),
    }
    println!();
}

fn demo_rootless_launch() {
    println!("Launching in new user and UTS namespaces:");

    let request = LaunchRequest::new("/bin/sh")
        .with_args(["-c", "echo \"  uid: $(id -u), hostname: $(hostname)\""])
        .with_namespaces(Namespace::User | Namespace::Uts)
        .with_user_mapping(UserMapping::current_user_as_root())
        .with_hostname("rootless-sandbox");

    match Launcher::new().launch(request) {
        Ok(result) => println!("  Child {result}"),
        Err(e) => println!("  Failed (unprivileged user namespaces may be disabled): {e}"),
    }
}
