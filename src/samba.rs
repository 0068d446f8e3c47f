// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

//! Samba protocol manager: composes the smb.conf store, the share registry
//! and the reconciler.
//!
//! Unlike the FTP side, exposing a directory here has two halves: the bind
//! mount under the owner's home, and a share section in smb.conf granting
//! the owner access. A source path that is already shared does not get a
//! second section; the requesting user is added to the existing section's
//! valid users instead.

use std::path::Path;

use log::{debug, info, warn};

use crate::config::{SmbConfig, SmbShare};
use crate::error::Result;
use crate::mount::{Fstab, MountBackend, MountTable, SystemMounter};
use crate::reconciler::{ApplyReport, Reconciler};
use crate::registry::{validate_share_name, ShareEntry, ShareRegistry};
use crate::settings::Settings;

/// Property template for a freshly created share section.
const SHARE_DEFAULTS: &[(&str, &str)] = &[
    ("browsable", "yes"),
    ("writable", "yes"),
    ("guest ok", "no"),
    ("create mask", "0664"),
    ("directory mask", "0775"),
];

pub struct SambaManager {
    config: SmbConfig,
    settings: Settings,
    registry: ShareRegistry,
    /// Share set as of the last reconciliation; the next apply diffs the
    /// registry against this.
    applied: Vec<ShareEntry>,
    table: MountTable,
    reconciler: Reconciler,
}

impl SambaManager {
    /// Construct against the real mount/umount binaries. Fails with
    /// [`crate::ShareError::ConfigNotFound`] if smb.conf is absent.
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_backend(settings, Box::new(SystemMounter))
    }

    /// Construct with an injected mount backend (tests).
    pub fn with_backend(settings: &Settings, backend: Box<dyn MountBackend>) -> Result<Self> {
        let config = SmbConfig::load(&settings.smb_conf)?;
        let table = MountTable::with_source(&settings.mountinfo);
        let reconciler = Reconciler::new(
            &settings.home_root,
            table.clone(),
            Fstab::new(&settings.fstab),
            backend,
        );

        let mut manager = Self {
            config,
            settings: settings.clone(),
            registry: ShareRegistry::default(),
            applied: Vec::new(),
            table,
            reconciler,
        };
        manager
            .registry
            .discover(&manager.settings.home_root, &manager.table)?;
        manager.applied = manager.registry.entries().to_vec();
        info!(
            "samba manager ready: {} config shares, {} mounted shares",
            manager.config.shares().len(),
            manager.applied.len()
        );
        Ok(manager)
    }

    // -------------------------------------------------------------------------
    // Shares
    // -------------------------------------------------------------------------

    /// All mounted share entries.
    #[must_use]
    pub fn shares(&self) -> &[ShareEntry] {
        self.registry.entries()
    }

    #[must_use]
    pub fn list_shares(&self, owner: &str) -> Vec<&ShareEntry> {
        self.registry.by_user(owner)
    }

    #[must_use]
    pub fn all_shares(&self) -> &[SmbShare] {
        self.config.shares()
    }

    #[must_use]
    pub fn get_share(&self, name: &str) -> Option<&SmbShare> {
        self.config.get_share(name)
    }

    /// Shares in smb.conf whose valid-user set contains `username`.
    #[must_use]
    pub fn shares_by_user(&self, username: &str) -> Vec<&SmbShare> {
        self.config.shares_by_user(username)
    }

    /// Queue a share for `owner`. If a section already exposes `source`
    /// (matching `path` property), the owner joins its valid users instead
    /// of getting a duplicate section; otherwise a new section is created
    /// from the conventional template. The bind mount target is queued in
    /// the registry either way; nothing is applied until
    /// [`Self::update_config`].
    pub fn add_share(&mut self, owner: &str, name: &str, source: &Path) -> Result<()> {
        validate_share_name(name)?;

        let existing = self
            .config
            .shares()
            .iter()
            .find(|share| share.property("path").is_some_and(|p| Path::new(p) == source))
            .map(|share| (share.name().to_string(), share.clone()));

        if let Some((section, mut updated)) = existing {
            updated.add_valid_user(owner);
            self.config.modify_share(&section, updated)?;
            debug!("samba: added {owner} to existing section [{section}]");
        } else {
            let mut share = SmbShare::new(name);
            share.set_property("comment", &format!("{name} shared by {owner}"));
            share.set_property("path", &source.to_string_lossy());
            for &(key, value) in SHARE_DEFAULTS {
                share.set_property(key, value);
            }
            share.add_valid_user(owner);
            self.config.add_share(share);
            debug!("samba: created section [{name}] for {owner}");
        }

        self.registry.add(owner, name, source);
        Ok(())
    }

    /// Drop `entry.owner` from the matching section's valid users (the
    /// section itself is pruned when its user set empties) and remove the
    /// entry from the desired list. Nothing is unmounted until
    /// [`Self::update_config`].
    pub fn remove_share(&mut self, entry: &ShareEntry) -> Result<()> {
        // Prefer matching the section by its path property; fall back to the
        // section name. A discovered entry's source is its mount point, so
        // the path match only works for entries added this session.
        let section = self
            .config
            .shares()
            .iter()
            .find(|share| {
                share
                    .property("path")
                    .is_some_and(|p| Path::new(p) == entry.source)
            })
            .or_else(|| self.config.get_share(&entry.name))
            .map(|share| (share.name().to_string(), share.clone()));

        if let Some((name, mut updated)) = section {
            updated.remove_valid_user(&entry.owner);
            self.config.modify_share(&name, updated)?;
        } else {
            warn!(
                "samba: no smb.conf section found for share '{}' of {}",
                entry.name, entry.owner
            );
        }

        self.registry.remove(entry);
        Ok(())
    }

    /// Reconcile bind mounts and fstab, re-discover ground truth from the
    /// mount table, then back up and persist smb.conf.
    pub fn update_config(&mut self) -> Result<ApplyReport> {
        let report = self
            .reconciler
            .apply(self.registry.entries(), &self.applied)?;
        self.registry
            .discover(&self.settings.home_root, &self.table)?;
        self.applied = self.registry.entries().to_vec();
        self.config.persist()?;
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Config blocks
    // -------------------------------------------------------------------------

    pub fn upsert_global(&mut self, key: &str, value: &str) {
        self.config.upsert_global(key, value);
    }

    pub fn remove_global(&mut self, key: &str) {
        self.config.remove_global(key);
    }

    pub fn upsert_homes(&mut self, key: &str, value: &str) {
        self.config.upsert_homes(key, value);
    }

    pub fn remove_homes(&mut self, key: &str) {
        self.config.remove_homes(key);
    }

    /// Current in-memory config as text, for display or raw editing.
    #[must_use]
    pub fn formatted_config(&self) -> String {
        self.config.format()
    }

    /// Re-ingest raw edited config text; the file is untouched until
    /// [`Self::update_config`].
    pub fn read_config_from_text(&mut self, text: &str) {
        self.config.reparse(text);
    }
}

// =============================================================================
// Tests
// =============================================================================
