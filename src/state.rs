// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wiring of the shop components over one storage root.

use std::sync::Arc;

use crate::config::ShopConfig;
use crate::dispatch::Dispatcher;
use crate::error::ShopResult;
use crate::gateway::MessagingGateway;
use crate::otp::MonitorRegistry;
use crate::provider::Provider;
use crate::provisioning::{InMemorySessionStore, ProvisioningMachine};
use crate::purchase::PurchaseOrchestrator;
use crate::reservations::ReservationSweeper;
use crate::storage::{CredentialStore, ShopDatabase, StoragePaths};

/// Fully wired shop: storage, monitors, and the dispatcher, sharing one
/// configuration. The provider protocol client and the chat gateway are
/// injected by the embedding deployment.
#[derive(Clone)]
pub struct ShopState {
    pub config: Arc<ShopConfig>,
    pub db: Arc<ShopDatabase>,
    pub credentials: CredentialStore,
    pub monitors: Arc<MonitorRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl ShopState {
    /// Open storage under the configured data directory and wire every
    /// component against the given provider and gateway.
    pub fn new(
        config: ShopConfig,
        provider: Arc<dyn Provider>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> ShopResult<Self> {
        let config = Arc::new(config);
        let paths = StoragePaths::new(&config.data_dir);
        let db = Arc::new(ShopDatabase::open(&paths.database())?);
        let credentials = CredentialStore::open(paths).map_err(crate::storage::StoreError::from)?;
        let monitors = Arc::new(MonitorRegistry::new());

        let provisioning = ProvisioningMachine::new(
            Arc::clone(&db),
            credentials.clone(),
            Arc::clone(&provider),
            Arc::new(InMemorySessionStore::new()),
            Arc::clone(&config),
        );
        let purchase = PurchaseOrchestrator::new(
            Arc::clone(&db),
            credentials.clone(),
            provider,
            gateway,
            Arc::clone(&monitors),
            Arc::clone(&config),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&db),
            provisioning,
            purchase,
            Arc::clone(&config),
        ));

        Ok(Self {
            config,
            db,
            credentials,
            monitors,
            dispatcher,
        })
    }

    /// Build the expired-reservation sweeper for this state's store.
    pub fn sweeper(&self) -> ReservationSweeper {
        ReservationSweeper::new(Arc::clone(&self.db), self.config.sweep_interval)
    }
}
