// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Storage
//!
//! Two stores under one data directory:
//!
//! - [`ShopDatabase`]: users, accounts, and the transaction ledger in an
//!   embedded redb database. Every status transition is a single write
//!   transaction, so a check-then-write can never interleave with another
//!   writer.
//! - [`CredentialStore`]: opaque provider session blobs, one file per
//!   provisioned account, referenced from account rows by filename.
//!
//! ## Layout
//!
//! ```text
//! {DATA_DIR}/
//!   shop.redb            # users / accounts / transactions / state
//!   sessions/
//!     {digits}.session   # opaque credential blobs
//! ```

pub mod credentials;
pub mod db;
pub mod paths;

pub use credentials::CredentialStore;
pub use db::{ShopDatabase, StoreError, StoreResult};
pub use paths::StoragePaths;
