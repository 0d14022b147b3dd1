// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-shot OTP capture monitor.
//!
//! Each active reservation gets its own monitor task. The task opens a
//! provider connection under the account's credential, watches the
//! system-notification peer in both directions, and forwards the first
//! extracted code to the buyer together with the account's second-factor
//! secret if one is stored. It forwards **at most once** per invocation and
//! then exits; hitting the wall-clock deadline is normal termination, not
//! an error.
//!
//! A buyer can re-arm monitoring ("get a new code"); the registry cancels
//! the previous task for the account before starting the next one, so only
//! the most recent task can reach the buyer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gateway::{Button, MessagingGateway, OutboundMessage};
use crate::models::PrincipalId;
use crate::otp::extract_code;
use crate::provider::Provider;
use crate::storage::ShopDatabase;

/// A per-reservation listener that forwards one login code to its buyer.
pub struct OtpMonitor {
    db: Arc<ShopDatabase>,
    provider: Arc<dyn Provider>,
    gateway: Arc<dyn MessagingGateway>,
    buyer: PrincipalId,
    account_id: u64,
    phone: String,
    credential_path: PathBuf,
    deadline: Duration,
}

impl OtpMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<ShopDatabase>,
        provider: Arc<dyn Provider>,
        gateway: Arc<dyn MessagingGateway>,
        buyer: PrincipalId,
        account_id: u64,
        phone: impl Into<String>,
        credential_path: PathBuf,
        deadline: Duration,
    ) -> Self {
        Self {
            db,
            provider,
            gateway,
            buyer,
            account_id,
            phone: phone.into(),
            credential_path,
            deadline,
        }
    }

    /// Run the monitor until it forwards a code, the deadline passes, or
    /// the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut conn = match self.provider.connect(&self.credential_path).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    account_id = self.account_id,
                    error = %e,
                    "Monitor: failed to open provider connection"
                );
                return;
            }
        };

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    info!(account_id = self.account_id, "Monitor timed out without a code");
                    break;
                }
                _ = cancel.cancelled() => {
                    info!(account_id = self.account_id, "Monitor cancelled");
                    break;
                }
                message = conn.next_message() => {
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(
                                account_id = self.account_id,
                                error = %e,
                                "Monitor: message stream ended"
                            );
                            break;
                        }
                    };

                    if !message.involves_system_notifications() {
                        continue;
                    }

                    match extract_code(&message.text) {
                        Some(code) => {
                            self.forward(&code).await;
                            // Single fire: stop listening after the first match
                            break;
                        }
                        None => continue,
                    }
                }
            }
        }

        conn.close().await;
    }

    /// Compose and deliver the forwarding message to the buyer.
    async fn forward(&self, code: &str) {
        let second_factor = self
            .db
            .get_account(self.account_id)
            .ok()
            .flatten()
            .and_then(|account| account.second_factor);

        let mut text = format!(
            "🔐 **OTP Received**\n\n📱 **Number:** `{}`\n🔢 **OTP Code:** `{code}`\n",
            self.phone
        );
        if let Some(password) = &second_factor {
            text.push_str(&format!("\n🔐 **2FA Password:** `{password}`\n"));
        }
        text.push_str("\nUse this code to continue login.");

        let buttons = vec![vec![
            Button::new("🔄 Get New OTP", format!("getotp_{}", self.account_id)),
            Button::new("✅ Done", format!("done_{}", self.account_id)),
        ]];

        match self
            .gateway
            .send_message(self.buyer, OutboundMessage::with_buttons(text, buttons))
            .await
        {
            Ok(()) => info!(
                account_id = self.account_id,
                buyer = %self.buyer,
                "Monitor forwarded login code"
            ),
            Err(e) => warn!(
                account_id = self.account_id,
                error = %e,
                "Monitor failed to forward login code"
            ),
        }
    }
}

// =============================================================================
// Monitor Registry
// =============================================================================

struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Tracks the active monitor per account so a re-arm supersedes cleanly.
#[derive(Default)]
pub struct MonitorRegistry {
    active: Mutex<HashMap<u64, MonitorHandle>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a monitor for an account, cancelling any previous one.
    pub fn start(&self, monitor: OtpMonitor) -> CancellationToken {
        let account_id = monitor.account_id;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));

        let mut active = self.active.lock().expect("monitor registry poisoned");
        if let Some(previous) = active.insert(
            account_id,
            MonitorHandle {
                cancel: cancel.clone(),
                task,
            },
        ) {
            previous.cancel.cancel();
        }
        cancel
    }

    /// Cancel and drop the active monitor for an account, if any.
    pub fn stop(&self, account_id: u64) {
        let handle = {
            let mut active = self.active.lock().expect("monitor registry poisoned");
            active.remove(&account_id)
        };
        if let Some(handle) = handle {
            handle.cancel.cancel();
            handle.task.abort();
        }
    }

    /// Number of tracked monitor entries (superseded entries included until
    /// replaced or stopped).
    pub fn len(&self) -> usize {
        self.active.lock().expect("monitor registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
