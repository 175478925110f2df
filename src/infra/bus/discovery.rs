//! I2C adapter discovery (Linux).
//!
//! Scans `/dev` for `i2c-N` character devices and `/sys/class/i2c-adapter`
//! for adapter names, so a deployment can check its manifest's bus numbers
//! against the hardware before registering devices.
//! [`CorePorts::with_discovered_buses`](crate::builders::CorePorts::with_discovered_buses)
//! turns the accessible adapters into arbiter buses.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One I2C adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredBus {
    /// Bus number (N in `i2c-N`).
    pub id: u8,
    /// Device node, present only when `/dev/i2c-N` exists.
    pub device_path: Option<PathBuf>,
    /// Adapter name from sysfs.
    pub adapter_name: Option<String>,
    /// Whether the device node can be opened for reading.
    pub accessible: bool,
}

/// I2C discovery rooted at configurable directories.
#[derive(Debug, Clone)]
pub struct I2cDiscovery {
    dev_root: PathBuf,
    sys_root: PathBuf,
}

impl Default for I2cDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cDiscovery {
    /// Scan the standard locations.
    #[must_use]
    pub fn new() -> Self {
        Self::with_roots("/dev", "/sys/class/i2c-adapter")
    }

    /// Scan alternative roots.
    pub fn with_roots(dev_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            sys_root: sys_root.into(),
        }
    }

    /// Enumerate adapters, sorted by bus number.
    #[must_use]
    pub fn enumerate(&self) -> Vec<DiscoveredBus> {
        let mut found: BTreeMap<u8, Option<PathBuf>> = BTreeMap::new();

        for (id, path) in scan(&self.dev_root) {
            found.insert(id, Some(path));
        }
        for (id, _) in scan(&self.sys_root) {
            found.entry(id).or_insert(None);
        }

        found
            .into_iter()
            .map(|(id, device_path)| {
                let accessible = device_path
                    .as_deref()
                    .is_some_and(|p| fs::OpenOptions::new().read(true).open(p).is_ok());
                DiscoveredBus {
                    id,
                    adapter_name: self.adapter_name(id),
                    device_path,
                    accessible,
                }
            })
            .collect()
    }

    fn adapter_name(&self, id: u8) -> Option<String> {
        let raw = fs::read_to_string(self.sys_root.join(format!("i2c-{id}")).join("name")).ok()?;
        let name = raw.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

fn scan(root: &Path) -> Vec<(u8, PathBuf)> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            parse_i2c_name(&name).map(|id| (id, entry.path()))
        })
        .collect()
}

/// Parse `i2c-N` into `N`.
#[must_use]
pub fn parse_i2c_name(name: &str) -> Option<u8> {
    name.strip_prefix("i2c-")?.parse().ok()
}
