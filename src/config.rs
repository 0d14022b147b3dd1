// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for the database and credential blobs | `/data` |
//! | `RESERVE_MINUTES` | Reservation time-to-live | `10` |
//! | `OTP_WAIT_SECS` | OTP monitor wall-clock deadline | `600` |
//! | `SWEEP_INTERVAL_SECS` | Expired-reservation sweep interval | `60` |
//! | `OPERATOR_IDS` | Comma-separated operator principal ids | empty |
//! | `DEFAULT_PRICE` | Price for countries without an explicit entry | `40` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::PrincipalId;

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Countries sold by default and their prices, matching the launch catalog.
const DEFAULT_COUNTRY_PRICES: &[(&str, f64)] = &[
    ("US", 40.0),
    ("ET", 35.0),
    ("VN", 35.0),
    ("IN", 40.0),
    ("NP", 40.0),
    ("SV", 55.0),
    ("PH", 80.0),
    ("CN", 80.0),
];

/// Runtime configuration for the shop core.
#[derive(Debug, Clone)]
pub struct ShopConfig {
    /// Root directory holding the redb database and session blobs.
    pub data_dir: PathBuf,
    /// Reservation time-to-live in minutes.
    pub reserve_minutes: i64,
    /// Wall-clock deadline for each OTP capture monitor.
    pub otp_wait: Duration,
    /// Interval between expired-reservation sweeps.
    pub sweep_interval: Duration,
    /// Principals allowed to provision accounts and notified of sales.
    pub operators: Vec<PrincipalId>,
    /// Per-country sale prices.
    pub country_prices: HashMap<String, f64>,
    /// Fallback price for countries not in the map.
    pub default_price: f64,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data"),
            reserve_minutes: 10,
            otp_wait: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            operators: Vec::new(),
            country_prices: DEFAULT_COUNTRY_PRICES
                .iter()
                .map(|(code, price)| (code.to_string(), *price))
                .collect(),
            default_price: 40.0,
        }
    }
}

impl ShopConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let reserve_minutes = env_parse("RESERVE_MINUTES", defaults.reserve_minutes);
        let otp_wait = Duration::from_secs(env_parse("OTP_WAIT_SECS", 600));
        let sweep_interval = Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 60));
        let default_price = env_parse("DEFAULT_PRICE", defaults.default_price);

        let operators = std::env::var("OPERATOR_IDS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .map(PrincipalId)
            .collect();

        Self {
            data_dir,
            reserve_minutes,
            otp_wait,
            sweep_interval,
            operators,
            default_price,
            ..defaults
        }
    }

    /// Price for a country, falling back to the default price.
    pub fn price(&self, country: &str) -> f64 {
        self.country_prices
            .get(country)
            .copied()
            .unwrap_or(self.default_price)
    }

    /// Whether a principal is a configured operator.
    pub fn is_operator(&self, principal: PrincipalId) -> bool {
        self.operators.contains(&principal)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
