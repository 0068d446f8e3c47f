// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon configuration stores.
//!
//! Two formats are managed here: the flat `key=value` file used by vsftpd
//! and the sectioned smb.conf format. Both stores keep an ordered in-memory
//! document, skip comments and malformed lines on parse, and persist with a
//! backup-then-overwrite discipline: the current on-disk file is copied to
//! `<path>.bak` before the original is rewritten. If the backup copy fails
//! the original is left untouched.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, ShareError};

/// Reserved smb.conf key holding the share's user set.
const VALID_USERS_KEY: &str = "valid users";

// =============================================================================
// Shared helpers
// =============================================================================

/// Split a config line into a trimmed `(key, value)` pair.
/// Returns `None` for blank lines, comments and lines without `=`.
fn split_pair(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim().to_string(), value.trim().to_string()))
}

/// Case-insensitive in-place upsert preserving the pair's original position.
fn upsert_pair(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    for (k, v) in pairs.iter_mut() {
        if k.eq_ignore_ascii_case(key) {
            *v = value.to_string();
            return;
        }
    }
    pairs.push((key.to_string(), value.to_string()));
}

fn remove_pairs(pairs: &mut Vec<(String, String)>, key: &str) {
    pairs.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = OsString::from(path.as_os_str());
    os.push(".bak");
    PathBuf::from(os)
}

/// Copy the current file to `<path>.bak`, then overwrite it with `contents`.
/// The copy must complete before the original is truncated; a failed copy
/// aborts the call with the original untouched.
fn backup_then_write(path: &Path, contents: &str) -> Result<()> {
    let backup = backup_path(path);
    fs::copy(path, &backup).map_err(|source| ShareError::BackupFailed {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("backed up {} to {}", path.display(), backup.display());
    fs::write(path, contents)?;
    Ok(())
}

// =============================================================================
// Flat key=value store (vsftpd)
// =============================================================================

/// Ordered `key=value` document bound to a file on disk.
#[derive(Debug, Clone)]
pub struct FlatConfig {
    path: PathBuf,
    pairs: Vec<(String, String)>,
}

impl FlatConfig {
    /// Load the config file. Fails with [`ShareError::ConfigNotFound`] if the
    /// file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(ShareError::ConfigNotFound(path));
        }
        let text = fs::read_to_string(&path)?;
        let mut config = Self {
            path,
            pairs: Vec::new(),
        };
        config.reparse(&text);
        Ok(config)
    }

    /// Replace the in-memory document by parsing `text`. The file on disk is
    /// not touched; used by the raw-text editing surface.
    pub fn reparse(&mut self, text: &str) {
        self.pairs = text.lines().filter_map(split_pair).collect();
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the value of an existing key in place, or append a new pair.
    pub fn upsert(&mut self, key: &str, value: &str) {
        upsert_pair(&mut self.pairs, key, value);
    }

    /// Delete all pairs with a matching key.
    pub fn remove(&mut self, key: &str) {
        remove_pairs(&mut self.pairs, key);
    }

    /// Render the document as `key=value` lines. Comments and blank lines
    /// from the parsed input are not preserved.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.pairs {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }

    /// Back up the on-disk file and write the current document over it.
    pub fn persist(&self) -> Result<()> {
        backup_then_write(&self.path, &self.format())
    }
}

// =============================================================================
// Samba share bean
// =============================================================================

/// One named smb.conf share section: ordered properties plus the
/// `valid users` set, which is parsed out of the property list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbShare {
    name: String,
    properties: Vec<(String, String)>,
    valid_users: Vec<String>,
}

impl SmbShare {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            valid_users: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Last-write-wins upsert; an existing key keeps its position.
    pub fn set_property(&mut self, key: &str, value: &str) {
        upsert_pair(&mut self.properties, key, value);
    }

    pub fn remove_property(&mut self, key: &str) {
        remove_pairs(&mut self.properties, key);
    }

    #[must_use]
    pub fn valid_users(&self) -> &[String] {
        &self.valid_users
    }

    #[must_use]
    pub fn has_valid_user(&self, username: &str) -> bool {
        self.valid_users.iter().any(|u| u == username)
    }

    /// Add a user to the set; duplicates are ignored, insertion order kept.
    pub fn add_valid_user(&mut self, username: &str) {
        if !self.has_valid_user(username) {
            self.valid_users.push(username.to_string());
        }
    }

    pub fn remove_valid_user(&mut self, username: &str) {
        self.valid_users.retain(|u| u != username);
    }

    /// Render as `[name]` followed by properties and the valid-users line.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = format!("[{}]\n", self.name);
        for (key, value) in &self.properties {
            let _ = writeln!(out, "{key} = {value}");
        }
        if !self.valid_users.is_empty() {
            let _ = writeln!(out, "{VALID_USERS_KEY} = {}", self.valid_users.join(", "));
        }
        out
    }
}

// =============================================================================
// Sectioned store (smb.conf)
// =============================================================================

/// Section parser state: pairs before the first header, or under `[global]`,
/// belong to the global block.
enum Section {
    Global,
    Homes,
    Named(SmbShare),
}

/// smb.conf document: a `[global]` block, a `[homes]` block and an ordered
/// list of named shares, bound to a file on disk.
#[derive(Debug, Clone)]
pub struct SmbConfig {
    path: PathBuf,
    global: Vec<(String, String)>,
    homes: Vec<(String, String)>,
    shares: Vec<SmbShare>,
}

impl SmbConfig {
    /// Load the config file. Fails with [`ShareError::ConfigNotFound`] if the
    /// file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(ShareError::ConfigNotFound(path));
        }
        let text = fs::read_to_string(&path)?;
        let mut config = Self {
            path,
            global: Vec::new(),
            homes: Vec::new(),
            shares: Vec::new(),
        };
        config.reparse(&text);
        Ok(config)
    }

    /// Re-run the section state machine against `text`, replacing the whole
    /// in-memory document. The file on disk is not touched.
    pub fn reparse(&mut self, text: &str) {
        self.global.clear();
        self.homes.clear();
        self.shares.clear();

        let mut section = Section::Global;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                // A header commits the previously open named share, if any.
                if let Section::Named(share) = std::mem::replace(&mut section, Section::Global) {
                    self.shares.push(share);
                }
                section = if name.eq_ignore_ascii_case("global") {
                    Section::Global
                } else if name.eq_ignore_ascii_case("homes") {
                    Section::Homes
                } else {
                    Section::Named(SmbShare::new(name))
                };
                continue;
            }

            let Some((key, value)) = split_pair(line) else {
                continue;
            };
            match &mut section {
                Section::Global => self.global.push((key, value)),
                Section::Homes => self.homes.push((key, value)),
                Section::Named(share) => {
                    if key.eq_ignore_ascii_case(VALID_USERS_KEY) {
                        for user in value.split(',') {
                            let user = user.trim();
                            if !user.is_empty() {
                                share.add_valid_user(user);
                            }
                        }
                    } else {
                        share.set_property(&key, &value);
                    }
                }
            }
        }

        // End of input commits a still-open named share.
        if let Section::Named(share) = section {
            self.shares.push(share);
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn shares(&self) -> &[SmbShare] {
        &self.shares
    }

    #[must_use]
    pub fn global(&self) -> &[(String, String)] {
        &self.global
    }

    #[must_use]
    pub fn homes(&self) -> &[(String, String)] {
        &self.homes
    }

    pub fn upsert_global(&mut self, key: &str, value: &str) {
        upsert_pair(&mut self.global, key, value);
    }

    pub fn remove_global(&mut self, key: &str) {
        remove_pairs(&mut self.global, key);
    }

    pub fn upsert_homes(&mut self, key: &str, value: &str) {
        upsert_pair(&mut self.homes, key, value);
    }

    pub fn remove_homes(&mut self, key: &str) {
        remove_pairs(&mut self.homes, key);
    }

    /// Case-insensitive share lookup.
    #[must_use]
    pub fn get_share(&self, name: &str) -> Option<&SmbShare> {
        self.shares
            .iter()
            .find(|share| share.name.eq_ignore_ascii_case(name))
    }

    pub fn add_share(&mut self, share: SmbShare) {
        self.shares.push(share);
    }

    /// Replace the named share. A replacement with an empty valid-user set
    /// removes the share instead: a share nobody can reach is dropped, not
    /// retained as an empty section.
    pub fn modify_share(&mut self, name: &str, updated: SmbShare) -> Result<()> {
        let index = self
            .shares
            .iter()
            .position(|share| share.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ShareError::ShareNotFound(name.to_string()))?;
        if updated.valid_users.is_empty() {
            self.shares.remove(index);
        } else {
            self.shares[index] = updated;
        }
        Ok(())
    }

    pub fn remove_share(&mut self, name: &str) {
        self.shares
            .retain(|share| !share.name.eq_ignore_ascii_case(name));
    }

    /// All shares whose valid-user set contains `username`, order-preserving.
    #[must_use]
    pub fn shares_by_user(&self, username: &str) -> Vec<&SmbShare> {
        self.shares
            .iter()
            .filter(|share| share.has_valid_user(username))
            .collect()
    }

    /// Render the full document: global block, homes block, then each share
    /// in registry order, separated by blank lines.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = String::from("[global]\n");
        for (key, value) in &self.global {
            let _ = writeln!(out, "{key} = {value}");
        }
        out.push_str("\n[homes]\n");
        for (key, value) in &self.homes {
            let _ = writeln!(out, "{key} = {value}");
        }
        out.push('\n');
        for share in &self.shares {
            out.push_str(&share.format());
            out.push('\n');
        }
        out
    }

    /// Back up the on-disk file and write the current document over it.
    /// Every share must carry a `path` property.
    pub fn persist(&self) -> Result<()> {
        for share in &self.shares {
            if share.property("path").is_none() {
                return Err(ShareError::MissingPath(share.name.clone()));
            }
        }
        backup_then_write(&self.path, &self.format())
    }
}

// =============================================================================
// Tests
// =============================================================================
