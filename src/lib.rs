// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OTP Shop
//!
//! Core service for selling pre-registered messaging-network accounts:
//!
//! - **Provisioning** ([`provisioning`]): operators sign numbers in through
//!   an interactive phone → code → second-factor flow that produces an
//!   account row plus an on-disk credential blob.
//! - **Reservations** ([`reservations`]): buyers hold an account for a
//!   bounded time; a background sweeper returns overdue holds to stock.
//! - **OTP capture** ([`otp`]): each live reservation gets a one-shot
//!   monitor that forwards the first login code from the network's
//!   system-notification peer to the buyer.
//! - **Purchase** ([`purchase`]): settlement happens at confirmation time
//!   in a single store transaction, debit and ledger entry included.
//!
//! The chat front end and the provider protocol client are deployment
//! concerns, injected behind the [`gateway::MessagingGateway`] and
//! [`provider::Provider`] traits. Everything persistent lives in one
//! embedded redb database plus a directory of credential blobs
//! ([`storage`]).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod models;
pub mod otp;
pub mod provider;
pub mod provisioning;
pub mod purchase;
pub mod reservations;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::ShopConfig;
pub use error::{ShopError, ShopResult};
pub use state::ShopState;
