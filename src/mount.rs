// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel mount state and `/etc/fstab` plumbing.
//!
//! [`MountTable`] answers "is this path currently a mount point" from a
//! fresh `/proc/self/mountinfo` snapshot on every query; the desired-state
//! list is never trusted for that fact. Matching is done on the parsed
//! mount-point field, octal escapes decoded, compared exactly - a path that
//! is a prefix of another mount point does not match.
//!
//! [`Fstab`] owns the bind-entry grammar `<source> <target> none bind 0 0`:
//! it appends entries idempotently and prunes every bind line for a target.
//!
//! [`MountBackend`] is the seam for the actual mount/umount subprocesses so
//! the reconciler can be exercised without root.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::{Result, ShareError};

/// Default mountinfo source.
const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

// =============================================================================
// Mount table
// =============================================================================

/// Read-only view over the kernel mount table. The source file is re-read
/// on every query, trading performance for freshness.
#[derive(Debug, Clone)]
pub struct MountTable {
    source: PathBuf,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(MOUNTINFO_PATH)
    }

    /// Use an alternative mountinfo file. Intended for tests.
    pub fn with_source(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// True iff `path` appears as a mount point in the current snapshot.
    pub fn is_mounted(&self, path: &Path) -> Result<bool> {
        let text = fs::read_to_string(&self.source)?;
        let want = path.to_string_lossy();
        Ok(text
            .lines()
            .filter_map(mount_point)
            .any(|point| point == want))
    }
}

/// Extract the mount-point field (the fifth) from a mountinfo line.
fn mount_point(line: &str) -> Option<String> {
    line.split_whitespace().nth(4).map(unescape)
}

/// Decode the octal escapes the kernel uses in mountinfo path fields
/// (`\040` space, `\011` tab, `\012` newline, `\134` backslash).
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = &field[i + 1..i + 4];
            if let Ok(value) = u8::from_str_radix(octal, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// =============================================================================
// fstab
// =============================================================================

/// Editor for the bind-mount entries this tool owns in `/etc/fstab`.
#[derive(Debug, Clone)]
pub struct Fstab {
    path: PathBuf,
}

/// The exact line recorded for a bind mount.
#[must_use]
pub fn entry_line(source: &Path, target: &Path) -> String {
    format!("{} {} none bind 0 0", source.display(), target.display())
}

/// True iff `line` is a bind entry for `target`, whatever its source. Used
/// for pruning: discovery rewrites a share's source to its mount point, so
/// teardown cannot rely on knowing the original source path.
fn is_entry_for_target(line: &str, target: &str) -> bool {
    let fields: Vec<&str> = line.split_whitespace().collect();
    fields.len() == 6 && fields[1] == target && fields[2..] == ["none", "bind", "0", "0"]
}

impl Fstab {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append the entry for `(source, target)` unless a line with that exact
    /// text is already present. Returns true if a line was appended.
    pub fn ensure_entry(&self, source: &Path, target: &Path) -> Result<bool> {
        let entry = entry_line(source, target);
        let mut text = self.read()?;
        if text.lines().any(|line| line.trim() == entry) {
            return Ok(false);
        }
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&entry);
        text.push('\n');
        fs::write(&self.path, text)?;
        debug!("fstab: appended '{entry}'");
        Ok(true)
    }

    /// Remove every bind entry whose target matches. Returns true if any
    /// line was removed.
    pub fn remove_entries_for(&self, target: &Path) -> Result<bool> {
        let want = target.to_string_lossy();
        let text = self.read()?;
        let kept: Vec<&str> = text
            .lines()
            .filter(|line| !is_entry_for_target(line.trim(), &want))
            .collect();
        if kept.len() == text.lines().count() {
            return Ok(false);
        }
        let mut out = kept.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        fs::write(&self.path, out)?;
        debug!("fstab: pruned entries for {}", target.display());
        Ok(true)
    }
}

// =============================================================================
// Mount backend
// =============================================================================

/// The subprocess seam for mount operations. Calls block until the
/// subprocess exits; a non-zero exit surfaces as
/// [`ShareError::CommandFailed`].
pub trait MountBackend {
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()>;
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Production backend running the system `mount`/`umount` binaries.
/// Expects to run with enough privilege to mount (the tool rewrites
/// /etc/fstab anyway).
pub struct SystemMounter;

fn run(program: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(program).args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(ShareError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            status,
        })
    }
}

impl MountBackend for SystemMounter {
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
        run(
            "mount",
            &[
                "--bind",
                &source.to_string_lossy(),
                &target.to_string_lossy(),
            ],
        )
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        run("umount", &[&target.to_string_lossy()])
    }
}

// =============================================================================
// Test support
// =============================================================================


// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mount_point_is_the_fifth_field() {
        let line = "36 35 98:0 /srv/docs /home/u/docs rw,relatime shared:1 - ext4 /dev/sda1 rw";
        assert_eq!(mount_point(line), Some("/home/u/docs".to_string()));
    }

    #[test]
    fn unescape_decodes_kernel_octal_escapes() {
        assert_eq!(unescape(r"/mnt/with\040space"), "/mnt/with space");
        assert_eq!(unescape(r"/tab\011here"), "/tab\there");
        assert_eq!(unescape(r"/back\134slash"), "/back\\slash");
        assert_eq!(unescape("/plain"), "/plain");
    }

    #[test]
    fn is_mounted_matches_the_mount_point_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let mountinfo = dir.path().join("mountinfo");
        fs::write(
            &mountinfo,
            "36 35 98:0 / /home/u/docs rw shared:1 - ext4 /dev/sda1 rw\n",
        )
        .unwrap();
        let table = MountTable::with_source(&mountinfo);

        assert!(table.is_mounted(Path::new("/home/u/docs")).unwrap());
        // Prefixes and extensions of a mount point do not match.
        assert!(!table.is_mounted(Path::new("/home/u")).unwrap());
        assert!(!table.is_mounted(Path::new("/home/u/docs2")).unwrap());
        // The source field alone is not a mount point.
        assert!(!table.is_mounted(Path::new("/dev/sda1")).unwrap());
    }

    #[test]
    fn entry_line_uses_the_bind_grammar() {
        assert_eq!(
            entry_line(Path::new("/data"), Path::new("/home/u/s")),
            "/data /home/u/s none bind 0 0"
        );
    }

    #[test]
    fn ensure_entry_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, "/dev/sda1 / ext4 defaults 0 1\n").unwrap();
        let fstab = Fstab::new(&path);

        assert!(fstab
            .ensure_entry(Path::new("/data"), Path::new("/home/u/s"))
            .unwrap());
        assert!(!fstab
            .ensure_entry(Path::new("/data"), Path::new("/home/u/s"))
            .unwrap());

        let text = fs::read_to_string(&path).unwrap();
        let hits = text
            .lines()
            .filter(|l| *l == "/data /home/u/s none bind 0 0")
            .count();
        assert_eq!(hits, 1);
        assert!(text.starts_with("/dev/sda1"), "existing lines kept");
    }

    #[test]
    fn remove_entries_prunes_by_target_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(
            &path,
            "/dev/sda1 / ext4 defaults 0 1\n\
             /data /home/u/s none bind 0 0\n\
             /other /home/u/s none bind 0 0\n\
             /data /home/u/s2 none bind 0 0\n",
        )
        .unwrap();
        let fstab = Fstab::new(&path);

        assert!(fstab.remove_entries_for(Path::new("/home/u/s")).unwrap());
        assert!(!fstab.remove_entries_for(Path::new("/home/u/s")).unwrap());

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "/dev/sda1 / ext4 defaults 0 1\n/data /home/u/s2 none bind 0 0\n"
        );
    }

    #[test]
    fn remove_entries_ignores_non_bind_lines_for_the_same_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, "/dev/sdb1 /home/u/s ext4 defaults 0 1\n").unwrap();
        let fstab = Fstab::new(&path);

        assert!(!fstab.remove_entries_for(Path::new("/home/u/s")).unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "/dev/sdb1 /home/u/s ext4 defaults 0 1\n"
        );
    }

    #[test]
    fn missing_fstab_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        let fstab = Fstab::new(&path);

        assert!(fstab
            .ensure_entry(Path::new("/data"), Path::new("/home/u/s"))
            .unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "/data /home/u/s none bind 0 0\n"
        );
    }
}
