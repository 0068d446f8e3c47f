// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Host paths the tool operates on. Defaults match a stock Debian-style
/// Samba/vsftpd install; every path is injectable so tests can run against
/// a temp tree without root.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Samba daemon configuration.
    pub smb_conf: PathBuf,

    /// vsftpd daemon configuration.
    pub vsftpd_conf: PathBuf,

    /// vsftpd user list file (one username per line).
    pub ftp_userlist: PathBuf,

    /// Root under which shares are exposed as `<root>/<owner>/<name>`.
    pub home_root: PathBuf,

    /// Static mount table rewritten by the reconciler.
    pub fstab: PathBuf,

    /// Kernel mount table snapshot consulted for ground truth.
    pub mountinfo: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            smb_conf: PathBuf::from("/etc/samba/smb.conf"),
            vsftpd_conf: PathBuf::from("/etc/vsftpd.conf"),
            ftp_userlist: PathBuf::from("/etc/vsftpd.userlist"),
            home_root: PathBuf::from("/home"),
            fstab: PathBuf::from("/etc/fstab"),
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        serde_json::from_slice(&data).context("Failed to parse settings JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_point_at_the_stock_locations() {
        let settings = Settings::default();
        assert_eq!(settings.smb_conf, PathBuf::from("/etc/samba/smb.conf"));
        assert_eq!(settings.vsftpd_conf, PathBuf::from("/etc/vsftpd.conf"));
        assert_eq!(settings.home_root, PathBuf::from("/home"));
        assert_eq!(settings.mountinfo, PathBuf::from("/proc/self/mountinfo"));
    }

    #[test]
    fn partial_json_keeps_defaults_for_absent_keys() {
        let json = r#"{ "homeRoot": "/tmp/home", "fstab": "/tmp/fstab" }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.home_root, PathBuf::from("/tmp/home"));
        assert_eq!(settings.fstab, PathBuf::from("/tmp/fstab"));
        assert_eq!(settings.smb_conf, PathBuf::from("/etc/samba/smb.conf"));
    }
}
