//! Launch profiles
//!
//! A profile is a JSON file holding launch settings, for example:
//!
//! ```json
//! {
//!   "namespaces": ["uts", "pid"],
//!   "hostname": "sandbox",
//!   "env": { "PS1": "sandbox$ " },
//!   "command": ["/bin/sh"]
//! }
//! ```

use anyhow::{Context, Result};
use nslaunch_namespace::NamespaceSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub namespaces: Option<NamespaceSet>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub map_root: bool,
    /// Variables added to the inherited environment
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
}

impl Profile {
    /// Load a profile from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid profile {}", path.display()))
    }
}
