// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential blob management.
//!
//! Provider session artifacts are opaque files written by the protocol
//! client itself; this store only derives their names, hands out paths,
//! and guarantees deletion on provisioning abort so no orphaned
//! credentials survive a cancel.

use std::fs;
use std::io;
use std::path::PathBuf;

use super::StoragePaths;

/// Manages the on-disk credential blobs referenced by account rows.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    paths: StoragePaths,
}

impl CredentialStore {
    /// Create a store over the given layout and ensure the sessions
    /// directory exists. Safe to call repeatedly.
    pub fn open(paths: StoragePaths) -> io::Result<Self> {
        fs::create_dir_all(paths.sessions_dir())?;
        Ok(Self { paths })
    }

    /// Derive the credential filename for a phone number: its digits plus
    /// a `.session` suffix.
    pub fn credential_ref_for(phone: &str) -> String {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        format!("{digits}.session")
    }

    /// Absolute path for a credential blob.
    pub fn path(&self, credential_ref: &str) -> PathBuf {
        self.paths.session(credential_ref)
    }

    /// Whether the blob exists on disk.
    pub fn exists(&self, credential_ref: &str) -> bool {
        self.path(credential_ref).exists()
    }

    /// Delete a credential blob. Deleting a missing blob is not an error.
    pub fn delete(&self, credential_ref: &str) -> io::Result<()> {
        match fs::remove_file(self.path(credential_ref)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
