// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Reservation Lifecycle
//!
//! Accounts move `available` → `reserved` → (`sold` | back to `available`).
//! Reservations carry a deadline; the background sweeper returns overdue
//! ones to stock so an abandoned checkout can never hold inventory
//! indefinitely. All transitions are single store transactions, so two
//! buyers racing for the last account cannot both win.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{ShopError, ShopResult};
use crate::models::{Account, PrincipalId};
use crate::storage::ShopDatabase;

/// Reservation transitions over the account store.
pub struct ReservationManager {
    db: Arc<ShopDatabase>,
    ttl_minutes: i64,
}

impl ReservationManager {
    pub fn new(db: Arc<ShopDatabase>, ttl_minutes: i64) -> Self {
        Self { db, ttl_minutes }
    }

    /// Reserve a specific available account for a buyer.
    pub fn reserve(&self, id: u64, buyer: PrincipalId) -> ShopResult<Account> {
        let account = self
            .db
            .reserve(id, buyer, self.ttl_minutes)
            .map_err(ShopError::from_store)?;
        info!(account_id = id, buyer = %buyer, "Account reserved");
        Ok(account)
    }

    /// Reserve any available account for a country, or report out-of-stock.
    pub fn reserve_any(&self, country: &str, buyer: PrincipalId) -> ShopResult<Account> {
        let reserved = self
            .db
            .reserve_any(country, buyer, self.ttl_minutes)
            .map_err(ShopError::from_store)?;
        match reserved {
            Some(account) => {
                info!(
                    account_id = account.id,
                    country,
                    buyer = %buyer,
                    "Account reserved"
                );
                Ok(account)
            }
            None => Err(ShopError::OutOfStock(country.to_string())),
        }
    }

    /// Return an account to stock, clearing its reservation. Releasing an
    /// account that is already available is a no-op.
    pub fn release(&self, id: u64) -> ShopResult<Account> {
        let account = self.db.release(id).map_err(ShopError::from_store)?;
        info!(account_id = id, "Account released");
        Ok(account)
    }

    /// Transition a reserved account to sold.
    pub fn mark_sold(&self, id: u64) -> ShopResult<Account> {
        let account = self.db.mark_sold(id).map_err(ShopError::from_store)?;
        info!(account_id = id, "Account marked sold");
        Ok(account)
    }
}

// =============================================================================
// Expired-Reservation Sweeper
// =============================================================================

/// Background task that periodically releases overdue reservations.
pub struct ReservationSweeper {
    db: Arc<ShopDatabase>,
    interval: Duration,
}

impl ReservationSweeper {
    pub fn new(db: Arc<ShopDatabase>, interval: Duration) -> Self {
        Self { db, interval }
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Reservation sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_step();
                }
                _ = shutdown.cancelled() => {
                    info!("Reservation sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// One sweep pass. Store failures are logged and retried next tick.
    fn sweep_step(&self) {
        match self.db.sweep_expired() {
            Ok(0) => debug!("Sweep found no expired reservations"),
            Ok(released) => info!(released, "Sweep released expired reservations"),
            Err(e) => error!(error = %e, "Reservation sweep failed"),
        }
    }
}
