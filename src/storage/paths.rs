// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the data-directory layout.

use std::path::{Path, PathBuf};

/// Default base directory for all persistent storage.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all persistent data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the embedded database file.
    pub fn database(&self) -> PathBuf {
        self.root.join("shop.redb")
    }

    /// Directory containing credential session blobs.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Path to a specific credential blob.
    pub fn session(&self, credential_ref: &str) -> PathBuf {
        self.sessions_dir().join(credential_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_root() {
        let paths = StoragePaths::new("/tmp/shop-test");
        assert_eq!(paths.database(), PathBuf::from("/tmp/shop-test/shop.redb"));
        assert_eq!(
            paths.session("15550001111.session"),
            PathBuf::from("/tmp/shop-test/sessions/15550001111.session")
        );
    }
}
