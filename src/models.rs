// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Core Data Models
//!
//! Persistent row types for the shop: provisioned accounts, buyers, and the
//! append-only transaction ledger, plus the reservation metadata blob that
//! rides on a reserved account.
//!
//! ## Reservation metadata
//!
//! Reservation metadata is persisted on the account row as a raw JSON string
//! rather than a typed field. A reserved row with a missing or unparseable
//! blob is treated as expired by the sweeper, so corruption can never leave
//! an account stuck in `reserved`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Principal Type
// =============================================================================

/// Numeric identity of a buyer or operator on the messaging gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrincipalId(pub i64);

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PrincipalId {
    fn from(value: i64) -> Self {
        PrincipalId(value)
    }
}

// =============================================================================
// Account Models
// =============================================================================

/// Lifecycle status of a provisioned account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Listed and purchasable
    Available,
    /// Temporarily held for one buyer, with an expiry deadline
    Reserved,
    /// Purchased; never offered again
    Sold,
}

/// Reservation metadata stored (as JSON text) on a reserved account row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    /// Buyer holding the reservation.
    pub reserved_by: PrincipalId,
    /// When the hold was taken.
    pub reserved_at: DateTime<Utc>,
    /// Deadline after which the sweeper releases the hold.
    pub reserved_until: DateTime<Utc>,
}

impl Reservation {
    /// Build a reservation for `buyer` expiring `ttl_minutes` from now.
    pub fn for_buyer(buyer: PrincipalId, ttl_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            reserved_by: buyer,
            reserved_at: now,
            reserved_until: now + chrono::Duration::minutes(ttl_minutes),
        }
    }

    /// Whether the reservation deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.reserved_until < Utc::now()
    }
}

/// A provisioned network identity held for sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: u64,
    /// ISO country code the phone number belongs to.
    pub country: String,
    /// Phone identifier in international format.
    pub phone: String,
    /// Filename of the opaque credential blob in the credential store.
    pub credential_ref: String,
    /// Optional second-factor password, stored verbatim.
    pub second_factor: Option<String>,
    /// Operator who provisioned the account.
    pub uploaded_by: Option<PrincipalId>,
    /// Current lifecycle status.
    pub status: AccountStatus,
    /// Sale price, fixed at provisioning time.
    pub price: f64,
    /// Raw reservation metadata JSON; `Some` only while reserved.
    pub metadata: Option<String>,
    /// When the account was provisioned.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Parse the reservation metadata blob, if present and well-formed.
    pub fn reservation(&self) -> Option<Reservation> {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

// =============================================================================
// User Model
// =============================================================================

/// A buyer or operator identity with a monetary balance.
///
/// Users are created lazily on first interaction with a zero balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Gateway principal id.
    pub id: PrincipalId,
    /// Last known gateway username.
    pub username: Option<String>,
    /// Spendable balance.
    pub balance: f64,
    /// When the user first interacted.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Transaction Ledger
// =============================================================================

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Buyer purchased an account
    Purchase,
    /// Operator credited a balance
    AdminTopup,
    /// Operator debited a balance
    AdminDeduction,
}

/// Immutable audit ledger entry. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique ledger entry id.
    pub id: uuid::Uuid,
    /// User the entry applies to.
    pub user_id: PrincipalId,
    /// Account involved, when the entry is a purchase.
    pub account_id: Option<u64>,
    /// Signed amount (negative for deductions).
    pub amount: f64,
    /// Entry kind.
    pub kind: TxKind,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Record a new ledger entry stamped with the current time.
    pub fn new(user_id: PrincipalId, account_id: Option<u64>, amount: f64, kind: TxKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id,
            account_id,
            amount,
            kind,
            created_at: Utc::now(),
        }
    }
}
