//! Namespaces command implementation

use anyhow::{Context, Result};
use nslaunch_core::ProcessId;
use nslaunch_namespace::{Namespace, NamespaceInfo};

pub fn execute(pid: Option<i32>) -> Result<()> {
    let target_pid = pid.map_or_else(ProcessId::current, ProcessId::from_raw);

    println!("Namespace information for PID {target_pid}");
    println!("{:-<60}", "");

    let ns_info =
        NamespaceInfo::for_pid(target_pid).context("Failed to get namespace information")?;

    print!("{ns_info}");

    // Check if isolated
    match ns_info.is_isolated() {
        Ok(true) => println!("\nProcess is in isolated namespaces"),
        Ok(false) => println!("\nProcess is in host namespaces"),
        Err(e) => println!("\nFailed to check isolation: {e}"),
    }

    if pid.is_some() {
        let ours = NamespaceInfo::current().context("Failed to get own namespaces")?;
        let differing = ns_info.differs_from(&ours);
        if differing.is_empty() {
            println!("Shares all namespaces with nslaunch");
        } else {
            let names: Vec<String> = differing.iter().map(Namespace::to_string).collect();
            println!("Differs from nslaunch in: {}", names.join(", "));
        }
    }

    Ok(())
}
