// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login-code extraction from free-form notification text.
//!
//! An ordered cascade of three independent matchers, tried in sequence;
//! the first rule that produces a code wins:
//!
//! 1. A labeled pattern (`Login Code: 4 5 4 4 1`): take the digits, accept
//!    the first five.
//! 2. A run of exactly five digits with space/dash separators. Runs butted
//!    against further digits (`12345678`) do not count; the `regex` crate
//!    has no lookarounds, so the digit boundary is checked around the match.
//! 3. A bare standalone five-digit number.
//!
//! Pure function, unit-testable without any provider connection.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Rule 1: label followed by 5-20 digits/spaces/dashes.
    static ref LABELED: Regex =
        Regex::new(r"(?i)Login Code:\s*([\d\s\-]{5,20})").expect("valid regex");

    /// Rule 2: five digits, each optionally followed by spaces/dashes.
    static ref SPACED_FIVE: Regex =
        Regex::new(r"(?:\d[\s\-]*){4}\d").expect("valid regex");

    /// Rule 3: standalone five-digit number.
    static ref BARE_FIVE: Regex = Regex::new(r"\b(\d{5})\b").expect("valid regex");
}

/// Extract a five-digit login code from notification text, if present.
pub fn extract_code(text: &str) -> Option<String> {
    if let Some(captures) = LABELED.captures(text) {
        let digits: String = captures[1].chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 5 {
            return Some(digits[..5].to_string());
        }
    }

    for found in SPACED_FIVE.find_iter(text) {
        if digit_adjacent(text, found.start(), found.end()) {
            continue;
        }
        let digits: String = found.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() == 5 {
            return Some(digits);
        }
    }

    BARE_FIVE
        .captures(text)
        .map(|captures| captures[1].to_string())
}

/// Whether the match at `[start, end)` touches another digit on either side.
fn digit_adjacent(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    matches!(before, Some(c) if c.is_ascii_digit()) || matches!(after, Some(c) if c.is_ascii_digit())
}
