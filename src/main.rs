// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Maintenance daemon: runs the expired-reservation sweeper over the shop
//! store until interrupted. The interactive surfaces (chat gateway,
//! provider client) are bound by the embedding deployment; this binary only
//! needs the storage side.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use otp_shop::reservations::ReservationSweeper;
use otp_shop::storage::{ShopDatabase, StoragePaths};
use otp_shop::ShopConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ShopConfig::from_env();
    info!(
        data_dir = %config.data_dir.display(),
        reserve_minutes = config.reserve_minutes,
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "Starting OTP shop maintenance daemon"
    );

    let paths = StoragePaths::new(&config.data_dir);
    let db = match ShopDatabase::open(&paths.database()) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "Failed to open the shop database");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let sweeper = ReservationSweeper::new(Arc::clone(&db), config.sweep_interval);
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for interrupt"),
    }

    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        error!(error = %e, "Sweeper task failed");
    }
    info!("Shutdown complete");
}
