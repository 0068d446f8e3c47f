// SPDX-FileCopyrightText: 2026 the homeshare-tools contributors
// SPDX-License-Identifier: Apache-2.0

//! Share administration library for Samba and FTP exposure of home
//! directories on a single host.
//!
//! The core is a reconciliation engine keeping three sources of truth
//! consistent: the in-memory desired share list, the daemon configuration
//! files on disk, and the kernel mount table. Shares are exposed by bind
//! mounting a source directory into `/home/<owner>/<name>` and recorded in
//! `/etc/fstab` so they survive reboots.
//!
//! # Modules
//!
//! - [`config`] - vsftpd (`key=value`) and smb.conf (sectioned) stores
//! - [`mount`] - mount table snapshot, fstab editor, mount backend
//! - [`registry`] - desired-state share list with mount-table discovery
//! - [`reconciler`] - bind mount / fstab reconciliation with per-entry results
//! - [`ftp`] / [`samba`] - protocol manager façades

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod ftp;
pub mod mount;
pub mod reconciler;
pub mod registry;
pub mod samba;
pub mod settings;
pub mod util;

pub use error::ShareError;
