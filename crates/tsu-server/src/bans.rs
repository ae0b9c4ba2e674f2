//! Ban list: banned IP addresses and device tokens.
//!
//! Persisted as a single pretty-printed JSON file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A ban entry with a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BanFile {
    #[serde(default)]
    ips: HashMap<String, BanEntry>,
    #[serde(default)]
    hdids: HashMap<String, BanEntry>,
}

pub struct BanStore {
    path: Option<PathBuf>,
    /// Banned IPs: IP string → ban entry.
    ips: HashMap<String, BanEntry>,
    /// Banned device tokens: hdid → ban entry.
    hdids: HashMap<String, BanEntry>,
}

impl BanStore {
    /// Load the ban list from `path`. A missing or unreadable file yields an
    /// empty list.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let file = read_ban_file(path);
        Self {
            path: Some(path.to_path_buf()),
            ips: file.ips,
            hdids: file.hdids,
        }
    }

    /// A ban list that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ips: HashMap::new(),
            hdids: HashMap::new(),
        }
    }

    pub fn is_banned(&self, ip: &str, hdid: &str) -> bool {
        self.ips.contains_key(ip) || (!hdid.is_empty() && self.hdids.contains_key(hdid))
    }

    /// Ban an IP address. Returns `false` if it was already banned.
    pub fn ban_ip(&mut self, ip: &str, reason: &str) -> bool {
        if self.ips.contains_key(ip) {
            return false;
        }
        self.ips.insert(
            ip.to_string(),
            BanEntry {
                reason: reason.to_string(),
            },
        );
        self.save();
        true
    }

    /// Ban a device token. Returns `false` if it was already banned.
    pub fn ban_hdid(&mut self, hdid: &str, reason: &str) -> bool {
        if hdid.is_empty() || self.hdids.contains_key(hdid) {
            return false;
        }
        self.hdids.insert(
            hdid.to_string(),
            BanEntry {
                reason: reason.to_string(),
            },
        );
        self.save();
        true
    }

    /// Lift an IP ban. Returns `false` if the address was not banned.
    pub fn unban_ip(&mut self, ip: &str) -> bool {
        if self.ips.remove(ip).is_none() {
            return false;
        }
        self.save();
        true
    }

    pub fn len(&self) -> usize {
        self.ips.len() + self.hdids.len()
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let file = BanFile {
            ips: self.ips.clone(),
            hdids: self.hdids.clone(),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("Failed to write {}: {e}", path.display());
                }
            }
            Err(e) => warn!("Failed to serialize ban list: {e}"),
        }
    }
}

fn read_ban_file(path: &Path) -> BanFile {
    if !path.exists() {
        return BanFile::default();
    }
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<BanFile>(&contents) {
            Ok(file) => {
                info!(
                    "Loaded {} IP and {} device bans from {}",
                    file.ips.len(),
                    file.hdids.len(),
                    path.display()
                );
                file
            }
            Err(e) => {
                warn!("Failed to parse {}: {e}", path.display());
                BanFile::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {e}", path.display());
            BanFile::default()
        }
    }
}
