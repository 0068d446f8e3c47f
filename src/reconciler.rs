// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

//! Bind mount reconciliation.
//!
//! [`Reconciler::apply`] compares the previously applied share set against
//! the current desired set and issues the minimal teardown/setup operations,
//! keeping the matching fstab entries in step. It is the only component that
//! mounts, unmounts, creates or deletes share directories, or edits fstab.
//!
//! The apply is best-effort, not transactional: per-entry failures are
//! accumulated in the [`ApplyReport`] and the passes run to completion, so
//! one stuck share cannot block cleanup of the others and there is no
//! rollback of entries already applied. After both passes the reconciler
//! polls the mount table until it reflects the expected state, bounded by a
//! timeout; the caller is expected to re-discover from the table afterwards
//! rather than trusting the plan.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Result, ShareError};
use crate::mount::{Fstab, MountBackend, MountTable};
use crate::registry::ShareEntry;

// =============================================================================
// Constants
// =============================================================================

/// Bound on the post-apply convergence poll.
const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the mount table to settle.
const CONVERGE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Report types
// =============================================================================

/// What the reconciler did (or tried to do) for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Teardown pass: the entry left the desired set.
    Unmounted,
    /// Setup pass: the entry's target was bind mounted.
    Mounted,
    /// Setup pass: the target was already mounted, nothing to do.
    AlreadyMounted,
}

/// Per-entry apply result. `error` carries the first failure encountered
/// while processing the entry; later steps for that entry may still have
/// run (teardown always attempts directory and fstab cleanup).
#[derive(Debug)]
pub struct EntryOutcome {
    pub entry: ShareEntry,
    pub action: Action,
    pub error: Option<ShareError>,
}

impl EntryOutcome {
    #[must_use]
    pub const fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of one `apply` invocation: one outcome per touched entry, plus
/// the convergence verdict. No rollback is implied by a failure.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<EntryOutcome>,
    /// `Some(ConvergenceTimeout)` if the mount table did not settle in time.
    pub convergence: Option<ShareError>,
}

impl ApplyReport {
    /// True iff every entry succeeded and the mount table converged.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.convergence.is_none() && self.outcomes.iter().all(|o| !o.is_err())
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes.iter().filter(|o| o.is_err())
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Stateless between calls: everything is derived from the argument lists,
/// the fstab file and the live mount table on each invocation.
pub struct Reconciler {
    home_root: PathBuf,
    table: MountTable,
    fstab: Fstab,
    backend: Box<dyn MountBackend>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(
        home_root: impl Into<PathBuf>,
        table: MountTable,
        fstab: Fstab,
        backend: Box<dyn MountBackend>,
    ) -> Self {
        Self {
            home_root: home_root.into(),
            table,
            fstab,
            backend,
            timeout: CONVERGE_TIMEOUT,
            poll_interval: CONVERGE_POLL_INTERVAL,
        }
    }

    /// Shrink the convergence bounds. Intended for tests.
    #[must_use]
    pub fn with_convergence(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Reconcile `desired` against `previously_applied`.
    ///
    /// Teardown first: entries that left the desired set are unmounted,
    /// their empty target directories removed and their fstab lines pruned.
    /// Then setup: desired entries whose targets are not mounted get their
    /// target created, bind mounted and recorded in fstab. Identity is the
    /// exact (owner, name, source) triple, so a source change is a
    /// remove-then-add.
    ///
    /// `Err` is returned only for infrastructure failures (the mount table
    /// itself being unreadable); per-entry failures land in the report.
    pub fn apply(
        &self,
        desired: &[ShareEntry],
        previously_applied: &[ShareEntry],
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        let mut expect_unmounted: Vec<PathBuf> = Vec::new();
        let mut expect_mounted: Vec<PathBuf> = Vec::new();

        // Teardown pass.
        for entry in previously_applied {
            if desired.contains(entry) {
                continue;
            }
            let target = entry.target(&self.home_root);
            let mut outcome = EntryOutcome {
                entry: entry.clone(),
                action: Action::Unmounted,
                error: None,
            };

            if self.table.is_mounted(&target)? {
                match self.backend.unmount(&target) {
                    Ok(()) => {
                        info!("unmounted {}", target.display());
                        expect_unmounted.push(target.clone());
                    }
                    Err(e) => {
                        // Keep going: one stuck share must not block the
                        // cleanup of all others.
                        warn!("failed to unmount {}: {e}", target.display());
                        outcome.error = Some(e);
                    }
                }
            }

            // Directory and fstab cleanup run regardless of the unmount
            // result.
            if target.is_dir() {
                if let Err(e) = fs::remove_dir(&target) {
                    debug!("leaving {} in place: {e}", target.display());
                }
            }
            match self.fstab.remove_entries_for(&target) {
                Ok(true) => debug!("pruned fstab entry for {}", target.display()),
                Ok(false) => {}
                Err(e) => {
                    warn!("fstab prune for {} failed: {e}", target.display());
                    if outcome.error.is_none() {
                        outcome.error = Some(e);
                    }
                }
            }
            report.outcomes.push(outcome);
        }

        // Setup pass.
        for entry in desired {
            let target = entry.target(&self.home_root);
            if self.table.is_mounted(&target)? {
                report.outcomes.push(EntryOutcome {
                    entry: entry.clone(),
                    action: Action::AlreadyMounted,
                    error: None,
                });
                continue;
            }

            let mut outcome = EntryOutcome {
                entry: entry.clone(),
                action: Action::Mounted,
                error: None,
            };
            // The source is not pre-validated; a missing source surfaces as
            // the mount command's failure.
            if let Err(e) = fs::create_dir_all(&target) {
                warn!("failed to create {}: {e}", target.display());
                outcome.error = Some(e.into());
            } else if let Err(e) = self.backend.bind_mount(&entry.source, &target) {
                warn!(
                    "failed to bind mount {} at {}: {e}",
                    entry.source.display(),
                    target.display()
                );
                outcome.error = Some(e);
            } else {
                info!(
                    "mounted {} at {}",
                    entry.source.display(),
                    target.display()
                );
                expect_mounted.push(target.clone());
                if let Err(e) = self.fstab.ensure_entry(&entry.source, &target) {
                    warn!("fstab append for {} failed: {e}", target.display());
                    outcome.error = Some(e);
                }
            }
            report.outcomes.push(outcome);
        }

        // Setup runs after teardown, so a target unmounted and remounted in
        // the same apply (a source change) is expected to end up mounted.
        expect_unmounted.retain(|target| !expect_mounted.contains(target));

        // Trust the kernel, not the plan: wait until the table reflects what
        // the successful operations claim, with a bounded timeout instead of
        // a fixed settle delay.
        report.convergence = self.wait_for_convergence(&expect_mounted, &expect_unmounted)?;
        Ok(report)
    }

    fn wait_for_convergence(
        &self,
        expect_mounted: &[PathBuf],
        expect_unmounted: &[PathBuf],
    ) -> Result<Option<ShareError>> {
        if expect_mounted.is_empty() && expect_unmounted.is_empty() {
            return Ok(None);
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            let mut pending = Vec::new();
            for target in expect_mounted {
                if !self.table.is_mounted(target)? {
                    pending.push(target.clone());
                }
            }
            for target in expect_unmounted {
                if self.table.is_mounted(target)? {
                    pending.push(target.clone());
                }
            }
            if pending.is_empty() {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                warn!("mount table did not converge; pending: {pending:?}");
                return Ok(Some(ShareError::ConvergenceTimeout { pending }));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
