// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors surfaced by the share administration library.
///
/// Parse-time anomalies (malformed config lines) are not represented here:
/// they are skipped during parsing. Filesystem and subprocess anomalies
/// during reconciliation are accumulated per entry rather than aborting the
/// whole pass; see [`crate::reconciler::ApplyReport`].
#[derive(Debug, Error)]
pub enum ShareError {
    /// Config file missing at manager construction. Fatal to the manager.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Named share absent on modify.
    #[error("share not found: {0}")]
    ShareNotFound(String),

    /// Share names become a child directory of the owner's home, so they
    /// must be a single path segment.
    #[error("invalid share name '{0}': must be a single path segment")]
    InvalidShareName(String),

    /// A Samba share must carry a `path` property before it can be persisted.
    #[error("share '{0}' has no path property")]
    MissingPath(String),

    /// The backup copy failed before the original was touched. The persist
    /// call is aborted and the original file is left as it was.
    #[error("backup of {path} failed: {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// mount/umount exited non-zero.
    #[error("command '{command}' failed with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    /// The mount table did not reach the expected state within the
    /// convergence timeout.
    #[error("mount state did not converge; pending targets: {pending:?}")]
    ConvergenceTimeout { pending: Vec<PathBuf> },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ShareError>;
