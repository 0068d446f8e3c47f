// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

//! FTP protocol manager: composes the vsftpd config store, the share
//! registry and the reconciler into the surface consumed by external
//! callers.
//!
//! All mutating methods take `&mut self`; exclusive ownership of the
//! manager is what serializes reconciliation runs, there is no internal
//! locking.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::config::FlatConfig;
use crate::error::Result;
use crate::mount::{Fstab, MountBackend, MountTable, SystemMounter};
use crate::reconciler::{ApplyReport, Reconciler};
use crate::registry::{validate_share_name, ShareEntry, ShareRegistry};
use crate::settings::Settings;

pub struct FtpManager {
    config: FlatConfig,
    settings: Settings,
    ftp_users: Vec<String>,
    registry: ShareRegistry,
    /// Snapshot of the share set as of the last reconciliation; the next
    /// apply diffs the registry against this.
    applied: Vec<ShareEntry>,
    table: MountTable,
    reconciler: Reconciler,
}

impl FtpManager {
    /// Construct against the real mount/umount binaries. Fails with
    /// [`crate::ShareError::ConfigNotFound`] if the vsftpd config is absent.
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_backend(settings, Box::new(SystemMounter))
    }

    /// Construct with an injected mount backend (tests).
    pub fn with_backend(settings: &Settings, backend: Box<dyn MountBackend>) -> Result<Self> {
        let config = FlatConfig::load(&settings.vsftpd_conf)?;
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
            ftp_users: Vec::new(),
            registry: ShareRegistry::default(),
            applied: Vec::new(),
            table,
            reconciler,
        };
        manager.load_ftp_users()?;
        manager
            .registry
            .discover(&manager.settings.home_root, &manager.table)?;
        manager.applied = manager.registry.entries().to_vec();
        info!(
            "ftp manager ready: {} users, {} shares",
            manager.ftp_users.len(),
            manager.applied.len()
        );
        Ok(manager)
    }

    // -------------------------------------------------------------------------
    // FTP user list
    // -------------------------------------------------------------------------

    fn load_ftp_users(&mut self) -> Result<()> {
        self.ftp_users.clear();
        if self.settings.ftp_userlist.exists() {
            let text = fs::read_to_string(&self.settings.ftp_userlist)?;
            self.ftp_users
                .extend(text.lines().map(str::to_string).filter(|l| !l.is_empty()));
        }
        Ok(())
    }

    fn write_ftp_users(&self) -> Result<()> {
        let mut text = self.ftp_users.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(&self.settings.ftp_userlist, text)?;
        Ok(())
    }

    #[must_use]
    pub fn ftp_users(&self) -> &[String] {
        &self.ftp_users
    }

    /// Add a user to the vsftpd user list file. A name already present is
    /// left alone.
    pub fn add_ftp_user(&mut self, username: &str) -> Result<()> {
        if self.ftp_users.iter().any(|u| u == username) {
            return Ok(());
        }
        self.ftp_users.push(username.to_string());
        self.write_ftp_users()
    }

    /// Remove a user from the list file, drop every share they own and
    /// reconcile immediately. The userlist entry is matched exactly, like
    /// [`Self::add_ftp_user`]; share ownership is matched case-insensitively.
    pub fn remove_ftp_user(&mut self, username: &str) -> Result<ApplyReport> {
        self.ftp_users.retain(|u| u != username);
        self.write_ftp_users()?;
        self.registry.remove_user(username);
        self.save_shares_on_disk()
    }

    // -------------------------------------------------------------------------
    // Shares
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn shares(&self) -> &[ShareEntry] {
        self.registry.entries()
    }

    #[must_use]
    pub fn list_shares(&self, owner: &str) -> Vec<&ShareEntry> {
        self.registry.by_user(owner)
    }

    /// Add to the desired list only; nothing is mounted until
    /// [`Self::save_shares_on_disk`]. Duplicate detection against existing
    /// entries is the caller's responsibility.
    pub fn add_share(&mut self, owner: &str, name: &str, source: &Path) -> Result<()> {
        validate_share_name(name)?;
        self.registry.add(owner, name, source);
        debug!("ftp: queued share '{name}' for {owner} -> {}", source.display());
        Ok(())
    }

    /// Remove from the desired list only. Returns true if the entry was
    /// present.
    pub fn remove_share(&mut self, entry: &ShareEntry) -> bool {
        self.registry.remove(entry)
    }

    /// Reconcile bind mounts and fstab against the desired list, then
    /// re-discover from the mount table so the registry reflects ground
    /// truth rather than the just-applied intent.
    pub fn save_shares_on_disk(&mut self) -> Result<ApplyReport> {
        let report = self
            .reconciler
            .apply(self.registry.entries(), &self.applied)?;
        self.registry
            .discover(&self.settings.home_root, &self.table)?;
        self.applied = self.registry.entries().to_vec();
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // vsftpd config
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key)
    }

    pub fn upsert_config(&mut self, key: &str, value: &str) {
        self.config.upsert(key, value);
    }

    pub fn remove_config(&mut self, key: &str) {
        self.config.remove(key);
    }

    /// Back up and rewrite the vsftpd config, then reload it from disk.
    pub fn update_config(&mut self) -> Result<()> {
        self.config.persist()?;
        let path = self.config.path().to_path_buf();
        self.config = FlatConfig::load(path)?;
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::testing::FakeMounts;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        settings: Settings,
        calls: Rc<RefCell<Vec<String>>>,
        manager: FtpManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("home/u")).unwrap();
        fs::create_dir_all(root.join("srv/docs")).unwrap();
        fs::write(root.join("vsftpd.conf"), "listen=YES\nwrite_enable=YES\n").unwrap();
        fs::write(root.join("fstab"), "").unwrap();

        let settings = Settings {
            smb_conf: root.join("smb.conf"),
            vsftpd_conf: root.join("vsftpd.conf"),
            ftp_userlist: root.join("vsftpd.userlist"),
            home_root: root.join("home"),
            fstab: root.join("fstab"),
            mountinfo: root.join("mountinfo"),
        };

        let backend = FakeMounts::new(&settings.mountinfo);
        let calls = Rc::clone(&backend.calls);
        let manager = FtpManager::with_backend(&settings, Box::new(backend)).unwrap();

        Fixture {
            _dir: dir,
            settings,
            calls,
            manager,
        }
    }

    #[test]
    fn construction_fails_without_the_daemon_config() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            vsftpd_conf: dir.path().join("missing.conf"),
            ..Settings::default()
        };
        assert!(FtpManager::new(&settings).is_err());
    }

    #[test]
    fn add_save_remove_share_round_trip() {
        let mut fx = fixture();
        let source = fx.settings.home_root.parent().unwrap().join("srv/docs");
        let target = fx.settings.home_root.join("u/docs");

        // Add and apply.
        fx.manager.add_share("u", "docs", &source).unwrap();
        let report = fx.manager.save_shares_on_disk().unwrap();
        assert!(report.ok(), "report: {report:?}");

        let shares = fx.manager.list_shares("u");
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].name, "docs");
        // Discovery re-derived the entry from the mount table; its source
        // is the mount point.
        assert_eq!(shares[0].source, target);
        let fstab = fs::read_to_string(&fx.settings.fstab).unwrap();
        assert!(fstab.contains(&format!("{} {} none bind 0 0", source.display(), target.display())));

        // Remove and apply.
        let entry = shares[0].clone();
        assert!(fx.manager.remove_share(&entry));
        let report = fx.manager.save_shares_on_disk().unwrap();
        assert!(report.ok(), "report: {report:?}");

        assert!(fx.manager.list_shares("u").is_empty());
        assert!(!target.exists());
        assert_eq!(fs::read_to_string(&fx.settings.fstab).unwrap(), "");
        assert_eq!(
            *fx.calls.borrow(),
            vec![
                format!("mount {} {}", source.display(), target.display()),
                format!("umount {}", target.display()),
            ]
        );
    }

    #[test]
    fn save_is_idempotent() {
        let mut fx = fixture();
        let source = fx.settings.home_root.parent().unwrap().join("srv/docs");
        fx.manager.add_share("u", "docs", &source).unwrap();
        fx.manager.save_shares_on_disk().unwrap();
        fx.calls.borrow_mut().clear();

        let report = fx.manager.save_shares_on_disk().unwrap();

        assert!(report.ok());
        assert!(fx.calls.borrow().is_empty());
    }

    #[test]
    fn invalid_share_name_is_rejected() {
        let mut fx = fixture();
        let err = fx
            .manager
            .add_share("u", "../escape", Path::new("/srv/x"))
            .unwrap_err();
        assert!(matches!(err, crate::ShareError::InvalidShareName(_)));
    }

    #[test]
    fn ftp_user_list_is_persisted_and_deduplicated() {
        let mut fx = fixture();
        fx.manager.add_ftp_user("alice").unwrap();
        fx.manager.add_ftp_user("bob").unwrap();
        fx.manager.add_ftp_user("alice").unwrap();

        assert_eq!(fx.manager.ftp_users(), &["alice", "bob"]);
        assert_eq!(
            fs::read_to_string(&fx.settings.ftp_userlist).unwrap(),
            "alice\nbob\n"
        );
    }

    #[test]
    fn removing_a_user_tears_down_their_shares() {
        let mut fx = fixture();
        let source = fx.settings.home_root.parent().unwrap().join("srv/docs");
        fx.manager.add_ftp_user("u").unwrap();
        fx.manager.add_share("u", "docs", &source).unwrap();
        fx.manager.save_shares_on_disk().unwrap();

        let report = fx.manager.remove_ftp_user("u").unwrap();

        assert!(report.ok(), "report: {report:?}");
        assert!(fx.manager.ftp_users().is_empty());
        assert!(fx.manager.list_shares("u").is_empty());
        assert!(!fx.settings.home_root.join("u/docs").exists());
    }

    #[test]
    fn userlist_removal_matches_exact_case() {
        let mut fx = fixture();
        fx.manager.add_ftp_user("Alice").unwrap();

        fx.manager.remove_ftp_user("alice").unwrap();

        // A differently-cased entry is not silently dropped.
        assert_eq!(fx.manager.ftp_users(), &["Alice"]);
        assert_eq!(
            fs::read_to_string(&fx.settings.ftp_userlist).unwrap(),
            "Alice\n"
        );
    }

    #[test]
    fn raw_text_edit_round_trip() {
        let mut fx = fixture();
        assert_eq!(fx.manager.formatted_config(), "listen=YES\nwrite_enable=YES\n");

        fx.manager.read_config_from_text("listen=NO\n# new\nanon=NO\n");
        fx.manager.update_config().unwrap();

        assert_eq!(
            fs::read_to_string(&fx.settings.vsftpd_conf).unwrap(),
            "listen=NO\nanon=NO\n"
        );
        // Backup holds the previous contents.
        let backup = fs::read_to_string(fx.settings.vsftpd_conf.with_extension("conf.bak")).unwrap();
        assert_eq!(backup, "listen=YES\nwrite_enable=YES\n");
        assert_eq!(fx.manager.config_value("anon"), Some("NO"));
    }
}
