//! Start a shell in its own UTS namespace
//!
//! Run with: sudo cargo run --example uts_shell
//!
//! Change the hostname inside the shell and check from another terminal
//! that the host kept its own.

use nslaunch_namespace::{LaunchRequest, Launcher, Namespace};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("debug").init();

    println!("Host hostname: {}", nix::unistd::gethostname()?.to_string_lossy());

    let request = LaunchRequest::new("/bin/bash").with_namespace(Namespace::Uts);
    let result = Launcher::new().launch(request)?;

    println!("Shell {result}");
    println!("Host hostname: {}", nix::unistd::gethostname()?.to_string_lossy());
    std::process::exit(result.shell_status());
}
