// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy for the shop core.
//!
//! Every failure maps to a category a caller can act on: bad input, a
//! provider rejection of a specific step, a state conflict, exhausted
//! stock or retries, or a transient I/O failure. Nothing here is fatal to
//! the process; each path leaves the affected session or account in a
//! well-defined state.

use crate::provider::ProviderError;
use crate::storage::StoreError;

/// Top-level error returned by the provisioning, reservation, and purchase
/// components.
#[derive(Debug, thiserror::Error)]
pub enum ShopError {
    /// Malformed caller input (phone, code, amount). No state changed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The provider rejected the submitted phone number.
    #[error("provider rejected phone number")]
    InvalidPhone,

    /// The provider rejected the verification code; the session stays in
    /// the code step.
    #[error("provider rejected verification code")]
    InvalidCode,

    /// The provider rejected the second-factor password; the session stays
    /// in the second-factor step.
    #[error("provider rejected second-factor password")]
    IncorrectPassword,

    /// An operation was invoked with no matching in-progress session.
    #[error("no provisioning session in progress")]
    NoSession,

    /// Too many failed code or password attempts; the session was aborted
    /// and its credential artifact deleted.
    #[error("retry limit exceeded, session aborted")]
    RetryLimitExceeded,

    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A status transition was requested from the wrong current status
    /// (reserve-when-unavailable, sell-when-not-reserved).
    #[error("account {id} is not {expected}")]
    StatusConflict { id: u64, expected: &'static str },

    /// No available account for the requested country.
    #[error("no available account for country {0}")]
    OutOfStock(String),

    /// Buyer balance does not cover the price.
    #[error("insufficient balance: required {required}, have {balance}")]
    InsufficientBalance { required: f64, balance: f64 },

    /// Transient provider connect/send failure; the caller may retry the
    /// same step.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Persistent store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type ShopResult<T> = Result<T, ShopError>;

impl ShopError {
    /// Lift a store failure, surfacing the caller-actionable categories as
    /// their own variants instead of wrapping them.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ShopError::NotFound(what),
            StoreError::StatusConflict { id, expected } => {
                ShopError::StatusConflict { id, expected }
            }
            StoreError::InsufficientBalance { required, balance } => {
                ShopError::InsufficientBalance { required, balance }
            }
            other => ShopError::Store(other),
        }
    }
}
