// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

//! Desired-state share list and its discovery from the live mount table.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;

use crate::error::{Result, ShareError};
use crate::mount::MountTable;

/// One exposed directory: `source` is bind mounted at
/// `<home root>/<owner>/<name>`.
///
/// Identity is the exact triple; two entries describe the same share only if
/// owner, name and source all match. A path change without a name change is
/// a different share (remove-then-add), not a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareEntry {
    pub owner: String,
    pub name: String,
    pub source: PathBuf,
}

impl ShareEntry {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            source: source.into(),
        }
    }

    /// Where this share is exposed under the given home root.
    #[must_use]
    pub fn target(&self, home_root: &Path) -> PathBuf {
        home_root.join(&self.owner).join(&self.name)
    }
}

/// Reject share names that would escape the owner's home directory. The
/// name becomes a child directory, so it must be a single normal path
/// segment.
pub fn validate_share_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    if ok {
        Ok(())
    } else {
        Err(ShareError::InvalidShareName(name.to_string()))
    }
}

/// Desired-state list of shares for one protocol.
///
/// Mutations here never touch the filesystem; the reconciler is the only
/// component that mounts, unmounts or edits fstab.
#[derive(Debug, Default)]
pub struct ShareRegistry {
    entries: Vec<ShareEntry>,
}

impl ShareRegistry {
    /// Rebuild the list from the filesystem: every immediate child directory
    /// of every user directory under `home_root` is accepted iff it is
    /// currently a mount point. Plain subdirectories never become shares,
    /// and a stale fstab line does not resurrect one.
    ///
    /// This fully replaces the list and is the only way entries enter the
    /// registry at startup. A discovered entry's source is its mount point;
    /// the original bind source is not recoverable from the mount table walk.
    pub fn discover(&mut self, home_root: &Path, table: &MountTable) -> Result<()> {
        self.entries.clear();
        if !home_root.is_dir() {
            return Ok(());
        }
        for user in fs::read_dir(home_root)?.flatten() {
            let user_dir = user.path();
            if !user_dir.is_dir() {
                continue;
            }
            let Ok(children) = fs::read_dir(&user_dir) else {
                continue;
            };
            for child in children.flatten() {
                let child_path = child.path();
                if child_path.is_dir() && table.is_mounted(&child_path)? {
                    self.entries.push(ShareEntry::new(
                        user.file_name().to_string_lossy().into_owned(),
                        child.file_name().to_string_lossy().into_owned(),
                        child_path,
                    ));
                }
            }
        }
        debug!("discovered {} mounted shares", self.entries.len());
        Ok(())
    }

    /// Insert unconditionally; duplicate detection is the caller's job.
    pub fn add(&mut self, owner: &str, name: &str, source: &Path) {
        self.entries
            .push(ShareEntry::new(owner, name, source.to_path_buf()));
    }

    /// Remove by exact triple identity. Returns true if an entry was removed.
    pub fn remove(&mut self, entry: &ShareEntry) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e != entry);
        before != self.entries.len()
    }

    /// Drop every entry owned by `owner` (case-insensitive).
    pub fn remove_user(&mut self, owner: &str) {
        self.entries
            .retain(|e| !e.owner.eq_ignore_ascii_case(owner));
    }

    /// Case-insensitive owner filter, order-preserving.
    #[must_use]
    pub fn by_user(&self, owner: &str) -> Vec<&ShareEntry> {
        self.entries
            .iter()
            .filter(|e| e.owner.eq_ignore_ascii_case(owner))
            .collect()
    }

    #[must_use]
    pub fn entries(&self) -> &[ShareEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn share_names_must_be_single_segments() {
        assert!(validate_share_name("docs").is_ok());
        assert!(validate_share_name("my-docs.2").is_ok());
        assert_matches!(
            validate_share_name("a/b"),
            Err(ShareError::InvalidShareName(_))
        );
        assert_matches!(validate_share_name(""), Err(ShareError::InvalidShareName(_)));
        assert_matches!(
            validate_share_name(".."),
            Err(ShareError::InvalidShareName(_))
        );
    }

    #[test]
    fn target_is_home_owner_name() {
        let entry = ShareEntry::new("u", "docs", "/srv/docs");
        assert_eq!(
            entry.target(Path::new("/home")),
            PathBuf::from("/home/u/docs")
        );
    }

    #[test]
    fn by_user_is_case_insensitive_and_ordered() {
        let mut registry = ShareRegistry::default();
        registry.add("Alice", "a", Path::new("/srv/a"));
        registry.add("bob", "b", Path::new("/srv/b"));
        registry.add("alice", "c", Path::new("/srv/c"));

        let names: Vec<&str> = registry
            .by_user("ALICE")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn remove_matches_the_exact_triple() {
        let mut registry = ShareRegistry::default();
        registry.add("u", "docs", Path::new("/srv/docs"));

        // Same owner and name, different source: not the same share.
        assert!(!registry.remove(&ShareEntry::new("u", "docs", "/srv/other")));
        assert!(registry.remove(&ShareEntry::new("u", "docs", "/srv/docs")));
        assert!(registry.entries().is_empty());
    }

    #[test]
    fn discovery_accepts_only_mounted_children() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        let mounted = home.join("u").join("docs");
        let plain = home.join("u").join("notes");
        std::fs::create_dir_all(&mounted).unwrap();
        std::fs::create_dir_all(&plain).unwrap();

        let mountinfo = dir.path().join("mountinfo");
        std::fs::write(
            &mountinfo,
            format!(
                "36 35 98:0 /srv/docs {} rw shared:1 - ext4 /dev/sda1 rw\n",
                mounted.display()
            ),
        )
        .unwrap();
        let table = MountTable::with_source(&mountinfo);

        let mut registry = ShareRegistry::default();
        // Pre-existing entries are replaced, not merged.
        registry.add("stale", "gone", Path::new("/x"));
        registry.discover(&home, &table).unwrap();

        assert_eq!(registry.entries().len(), 1);
        let entry = &registry.entries()[0];
        assert_eq!(entry.owner, "u");
        assert_eq!(entry.name, "docs");
        assert_eq!(entry.source, mounted);
    }

    #[test]
    fn discovery_of_missing_home_root_yields_empty_list() {
        let table = MountTable::with_source("/dev/null");
        let mut registry = ShareRegistry::default();
        registry.add("u", "docs", Path::new("/srv/docs"));
        registry
            .discover(Path::new("/definitely/not/here"), &table)
            .unwrap();
        assert!(registry.entries().is_empty());
    }
}
