// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Purchase Orchestration
//!
//! Ties the buyer-facing checkout together: balance gate, reservation,
//! OTP capture monitor, and the final settle-or-release decision.
//!
//! Money only moves at confirmation time, inside one store transaction.
//! The reservation merely holds the account while the buyer works through
//! the login on their own device; a buyer whose balance shrank between
//! reserve and confirm gets the account released, not a negative balance.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ShopConfig;
use crate::error::{ShopError, ShopResult};
use crate::gateway::{MessagingGateway, OutboundMessage};
use crate::models::{Account, PrincipalId, Transaction};
use crate::otp::{MonitorRegistry, OtpMonitor};
use crate::provider::Provider;
use crate::reservations::ReservationManager;
use crate::storage::{CredentialStore, ShopDatabase};

/// A live reservation handed back to the dispatch layer for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseTicket {
    pub account_id: u64,
    pub phone: String,
    pub price: f64,
    pub balance: f64,
}

/// Buyer-facing checkout flow.
pub struct PurchaseOrchestrator {
    db: Arc<ShopDatabase>,
    credentials: CredentialStore,
    provider: Arc<dyn Provider>,
    gateway: Arc<dyn MessagingGateway>,
    reservations: ReservationManager,
    monitors: Arc<MonitorRegistry>,
    config: Arc<ShopConfig>,
}

impl PurchaseOrchestrator {
    pub fn new(
        db: Arc<ShopDatabase>,
        credentials: CredentialStore,
        provider: Arc<dyn Provider>,
        gateway: Arc<dyn MessagingGateway>,
        monitors: Arc<MonitorRegistry>,
        config: Arc<ShopConfig>,
    ) -> Self {
        let reservations = ReservationManager::new(Arc::clone(&db), config.reserve_minutes);
        Self {
            db,
            credentials,
            provider,
            gateway,
            reservations,
            monitors,
            config,
        }
    }

    /// Start a checkout: gate on balance, reserve an account for the
    /// country, and arm its OTP monitor.
    ///
    /// The buyer row is created on first sight with a zero balance, so an
    /// unknown buyer fails the balance gate rather than erroring.
    pub async fn select_country(
        &self,
        buyer: PrincipalId,
        username: Option<&str>,
        country: &str,
    ) -> ShopResult<PurchaseTicket> {
        let user = self
            .db
            .get_or_create_user(buyer, username)
            .map_err(ShopError::from_store)?;

        let price = self.config.price(country);
        if user.balance < price {
            return Err(ShopError::InsufficientBalance {
                required: price,
                balance: user.balance,
            });
        }

        let account = self.reservations.reserve_any(country, buyer)?;
        self.arm_monitor(buyer, &account);

        info!(
            buyer = %buyer,
            account_id = account.id,
            country,
            price,
            "Checkout started"
        );
        Ok(PurchaseTicket {
            account_id: account.id,
            phone: account.phone,
            price,
            balance: user.balance,
        })
    }

    /// Re-arm the OTP monitor for an account the buyer holds, superseding
    /// the previous monitor task.
    pub fn request_new_code(&self, buyer: PrincipalId, account_id: u64) -> ShopResult<()> {
        let account = self.held_account(buyer, account_id)?;
        self.arm_monitor(buyer, &account);
        info!(buyer = %buyer, account_id, "OTP monitor re-armed");
        Ok(())
    }

    /// Settle the purchase: stop the monitor, re-check the balance, and
    /// either finalize the sale or release the account.
    pub async fn confirm_done(
        &self,
        buyer: PrincipalId,
        account_id: u64,
    ) -> ShopResult<Transaction> {
        let account = self.held_account(buyer, account_id)?;
        self.monitors.stop(account_id);

        // Balance may have been spent elsewhere since the reservation.
        let balance = self
            .db
            .get_user(buyer)
            .map_err(ShopError::from_store)?
            .map(|user| user.balance)
            .unwrap_or(0.0);
        if balance < account.price {
            self.reservations.release(account_id)?;
            warn!(
                buyer = %buyer,
                account_id,
                balance,
                price = account.price,
                "Balance shortfall at confirmation, account released"
            );
            return Err(ShopError::InsufficientBalance {
                required: account.price,
                balance,
            });
        }

        let entry = self
            .db
            .finalize_sale(buyer, account_id)
            .map_err(ShopError::from_store)?;
        info!(
            buyer = %buyer,
            account_id,
            amount = entry.amount,
            "Sale finalized"
        );

        self.notify_operators(buyer, &account).await;
        Ok(entry)
    }

    /// Abandon a checkout: cancel the monitor and return the account to
    /// stock.
    pub fn abandon(&self, buyer: PrincipalId, account_id: u64) -> ShopResult<()> {
        let _ = self.held_account(buyer, account_id)?;
        self.monitors.stop(account_id);
        self.reservations.release(account_id)?;
        info!(buyer = %buyer, account_id, "Checkout abandoned");
        Ok(())
    }

    /// The account, checked to be currently reserved by this buyer.
    fn held_account(&self, buyer: PrincipalId, account_id: u64) -> ShopResult<Account> {
        let account = self
            .db
            .get_account(account_id)
            .map_err(ShopError::from_store)?
            .ok_or_else(|| ShopError::NotFound(format!("account {account_id}")))?;
        match account.reservation() {
            Some(reservation) if reservation.reserved_by == buyer => Ok(account),
            _ => Err(ShopError::StatusConflict {
                id: account_id,
                expected: "reserved",
            }),
        }
    }

    fn arm_monitor(&self, buyer: PrincipalId, account: &Account) {
        let monitor = OtpMonitor::new(
            Arc::clone(&self.db),
            Arc::clone(&self.provider),
            Arc::clone(&self.gateway),
            buyer,
            account.id,
            account.phone.clone(),
            self.credentials.path(&account.credential_ref),
            self.config.otp_wait,
        );
        self.monitors.start(monitor);
    }

    /// Tell every configured operator about a completed sale. Gateway
    /// failures are logged, never propagated.
    async fn notify_operators(&self, buyer: PrincipalId, account: &Account) {
        let text = format!(
            "💰 **Account Sold**\n\n📱 **Number:** `{}`\n🌍 **Country:** {}\n💵 **Price:** ${:.2}\n👤 **Buyer:** `{}`",
            account.phone, account.country, account.price, buyer
        );
        for operator in &self.config.operators {
            if let Err(e) = self
                .gateway
                .send_message(*operator, OutboundMessage::text(text.clone()))
                .await
            {
                warn!(operator = %operator, error = %e, "Failed to notify operator of sale");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountStatus, TxKind};
    use crate::storage::StoragePaths;
    use crate::testkit::{system_message, MockProvider, RecordingGateway};

    const BUYER: PrincipalId = PrincipalId(700);
    const OPERATOR: PrincipalId = PrincipalId(100);

    struct Harness {
        _dir: tempfile::TempDir,
        db: Arc<ShopDatabase>,
        provider: Arc<MockProvider>,
        gateway: Arc<RecordingGateway>,
        monitors: Arc<MonitorRegistry>,
        shop: PurchaseOrchestrator,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(dir.path());
        let db = Arc::new(ShopDatabase::open(&paths.database()).unwrap());
        let credentials = CredentialStore::open(paths).unwrap();
        let provider = MockProvider::new();
        let gateway = RecordingGateway::new();
        let monitors = Arc::new(MonitorRegistry::new());
        let config = Arc::new(ShopConfig {
            operators: vec![OPERATOR],
            ..ShopConfig::default()
        });
        let shop = PurchaseOrchestrator::new(
            Arc::clone(&db),
            credentials,
            provider.clone() as Arc<dyn Provider>,
            gateway.clone() as Arc<dyn MessagingGateway>,
            Arc::clone(&monitors),
            config,
        );
        Harness {
            _dir: dir,
            db,
            provider,
            gateway,
            monitors,
            shop,
        }
    }

    fn seed_account(db: &ShopDatabase, country: &str, price: f64) -> u64 {
        db.insert_account(country, "+12025550123", "12025550123.session", None, None, price)
            .unwrap()
            .id
    }

    fn fund(db: &ShopDatabase, buyer: PrincipalId, amount: f64) {
        db.get_or_create_user(buyer, Some("buyer")).unwrap();
        db.adjust_balance(buyer, amount, TxKind::AdminTopup).unwrap();
    }

    #[tokio::test]
    async fn checkout_and_confirm_settles_the_sale() {
        let h = harness();
        let id = seed_account(&h.db, "US", 40.0);
        fund(&h.db, BUYER, 100.0);

        let ticket = h
            .shop
            .select_country(BUYER, Some("buyer"), "US")
            .await
            .unwrap();
        assert_eq!(ticket.account_id, id);
        assert_eq!(ticket.price, 40.0);
        assert_eq!(h.monitors.len(), 1);

        let entry = h.shop.confirm_done(BUYER, id).await.unwrap();
        assert_eq!(entry.amount, 40.0);
        assert_eq!(entry.kind, TxKind::Purchase);
        assert_eq!(entry.account_id, Some(id));

        let user = h.db.get_user(BUYER).unwrap().unwrap();
        assert_eq!(user.balance, 60.0);
        let account = h.db.get_account(id).unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Sold);
        assert!(h.monitors.is_empty());

        // Exactly one purchase entry in the ledger
        let purchases: Vec<_> = h
            .db
            .list_transactions()
            .unwrap()
            .into_iter()
            .filter(|entry| entry.kind == TxKind::Purchase)
            .collect();
        assert_eq!(purchases.len(), 1);

        // Operator got the sale notice
        assert_eq!(h.gateway.sent_to(OPERATOR).len(), 1);
    }

    #[tokio::test]
    async fn unknown_buyer_fails_the_balance_gate() {
        let h = harness();
        seed_account(&h.db, "US", 40.0);

        let err = h
            .shop
            .select_country(BUYER, Some("buyer"), "US")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShopError::InsufficientBalance {
                required,
                balance
            } if required == 40.0 && balance == 0.0
        ));
        // Nothing was reserved
        assert!(h.monitors.is_empty());
    }

    #[tokio::test]
    async fn stockout_reports_the_country() {
        let h = harness();
        fund(&h.db, BUYER, 100.0);

        let err = h
            .shop
            .select_country(BUYER, Some("buyer"), "US")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::OutOfStock(country) if country == "US"));
    }

    #[tokio::test]
    async fn shortfall_at_confirmation_releases_the_account() {
        let h = harness();
        let id = seed_account(&h.db, "US", 40.0);
        fund(&h.db, BUYER, 50.0);

        h.shop
            .select_country(BUYER, Some("buyer"), "US")
            .await
            .unwrap();

        // Balance drained between reserve and confirm
        h.db.adjust_balance(BUYER, -45.0, TxKind::AdminDeduction)
            .unwrap();

        let err = h.shop.confirm_done(BUYER, id).await.unwrap_err();
        assert!(matches!(err, ShopError::InsufficientBalance { .. }));

        let account = h.db.get_account(id).unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Available);
        // No purchase was recorded
        assert!(h
            .db
            .list_transactions()
            .unwrap()
            .iter()
            .all(|entry| entry.kind != TxKind::Purchase));
    }

    #[tokio::test]
    async fn confirm_by_someone_else_is_rejected() {
        let h = harness();
        let id = seed_account(&h.db, "US", 40.0);
        fund(&h.db, BUYER, 100.0);
        fund(&h.db, PrincipalId(701), 100.0);

        h.shop
            .select_country(BUYER, Some("buyer"), "US")
            .await
            .unwrap();

        let err = h.shop.confirm_done(PrincipalId(701), id).await.unwrap_err();
        assert!(matches!(
            err,
            ShopError::StatusConflict {
                expected: "reserved",
                ..
            }
        ));
        // Still held by the original buyer
        let account = h.db.get_account(id).unwrap().unwrap();
        assert_eq!(account.reservation().unwrap().reserved_by, BUYER);
    }

    #[tokio::test]
    async fn request_new_code_requires_a_held_reservation() {
        let h = harness();
        let id = seed_account(&h.db, "US", 40.0);

        let err = h.shop.request_new_code(BUYER, id).unwrap_err();
        assert!(matches!(err, ShopError::StatusConflict { .. }));
        let err = h.shop.request_new_code(BUYER, 999).unwrap_err();
        assert!(matches!(err, ShopError::NotFound(_)));
    }

    #[tokio::test]
    async fn abandon_returns_the_account_to_stock() {
        let h = harness();
        let id = seed_account(&h.db, "US", 40.0);
        fund(&h.db, BUYER, 100.0);

        h.shop
            .select_country(BUYER, Some("buyer"), "US")
            .await
            .unwrap();
        h.shop.abandon(BUYER, id).unwrap();

        let account = h.db.get_account(id).unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Available);
        assert!(h.monitors.is_empty());
    }

    #[tokio::test]
    async fn armed_monitor_forwards_a_captured_code() {
        let h = harness();
        let id = seed_account(&h.db, "US", 40.0);
        fund(&h.db, BUYER, 100.0);

        h.provider.queue_message(system_message("Login Code: 45441"));
        h.shop
            .select_country(BUYER, Some("buyer"), "US")
            .await
            .unwrap();

        // Give the spawned monitor a chance to run
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let sent = h.gateway.sent_to(BUYER);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("45441"));
        assert!(sent[0].buttons[0]
            .iter()
            .any(|button| button.action == format!("done_{id}")));
    }
}
