// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OTP Capture
//!
//! - `extract`: pure text → code extraction (no network, no state).
//! - `monitor`: the per-reservation listener task that watches the
//!   system-notification peer and forwards the first extracted code to the
//!   buyer, at most once.

pub mod extract;
pub mod monitor;

pub use extract::extract_code;
pub use monitor::{MonitorRegistry, OtpMonitor};
