// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Inbound Dispatch
//!
//! Translates gateway events (text messages, button presses) into calls on
//! the provisioning machine and the purchase orchestrator, and renders
//! their outcomes as outbound messages. Every path returns a reply; errors
//! become user-facing text, never a dropped update.
//!
//! Text routing precedence for an operator with an in-progress upload:
//! second-factor password, then the post-sign-in choice, then the code,
//! then the phone number. Free text from anyone else is treated as a
//! command.

use std::sync::Arc;

use tracing::warn;

use crate::config::ShopConfig;
use crate::error::ShopError;
use crate::gateway::{Button, OutboundMessage};
use crate::models::PrincipalId;
use crate::provisioning::{ProvisionReply, ProvisioningMachine, UploadStep};
use crate::purchase::PurchaseOrchestrator;
use crate::storage::ShopDatabase;

/// Routes inbound chat events to the shop components.
pub struct Dispatcher {
    db: Arc<ShopDatabase>,
    provisioning: ProvisioningMachine,
    purchase: PurchaseOrchestrator,
    config: Arc<ShopConfig>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<ShopDatabase>,
        provisioning: ProvisioningMachine,
        purchase: PurchaseOrchestrator,
        config: Arc<ShopConfig>,
    ) -> Self {
        Self {
            db,
            provisioning,
            purchase,
            config,
        }
    }

    /// Handle a free-text message.
    pub async fn handle_text(
        &self,
        principal: PrincipalId,
        username: Option<&str>,
        text: &str,
    ) -> OutboundMessage {
        let text = text.trim();

        // Commands always win; an operator mid-upload gets any other text
        // routed into the flow.
        if !text.starts_with('/') {
            if self.config.is_operator(principal) {
                if let Some(step) = self.provisioning.current_step(principal) {
                    return self.handle_upload_text(principal, step, text).await;
                }
            }
            return OutboundMessage::text(
                "Use /start to browse accounts or /balance to check your balance.",
            );
        }

        match text {
            "/start" => self.render_catalog(),
            "/balance" => self.render_balance(principal, username),
            "/stock" => self.render_stock(),
            "/upload" => {
                if self.config.is_operator(principal) {
                    self.render_upload_menu()
                } else {
                    OutboundMessage::text("⛔ You are not authorized to upload accounts.")
                }
            }
            "/cancel" => match self.provisioning.cancel(principal) {
                Ok(_) => OutboundMessage::text("❌ Upload cancelled."),
                Err(_) => OutboundMessage::text("Nothing to cancel."),
            },
            _ => OutboundMessage::text(
                "Unknown command. Use /start to browse accounts or /balance to check your balance.",
            ),
        }
    }

    /// Handle a button press identified by its action token.
    pub async fn handle_button(
        &self,
        principal: PrincipalId,
        username: Option<&str>,
        action: &str,
    ) -> OutboundMessage {
        if let Some(country) = action.strip_prefix("upload_country_") {
            if !self.config.is_operator(principal) {
                return OutboundMessage::text("⛔ You are not authorized to upload accounts.");
            }
            return match self.provisioning.start(principal, country) {
                Ok(ProvisionReply::PhonePrompt { country }) => OutboundMessage::text(format!(
                    "📤 Uploading a {country} account.\n\nSend the phone number in international format (e.g. `+12025550123`)."
                )),
                Ok(other) => self.render_provision_reply(other),
                Err(e) => self.render_error(e),
            };
        }

        if let Some(country) = action.strip_prefix("country_") {
            return match self.purchase.select_country(principal, username, country).await {
                Ok(ticket) => OutboundMessage::text(format!(
                    "✅ **Number Reserved**\n\n📱 **Number:** `{}`\n💵 **Price:** ${:.2}\n\nLog in with this number on your device; the OTP will be forwarded here when it arrives.",
                    ticket.phone, ticket.price
                )),
                Err(e) => self.render_error(e),
            };
        }

        if let Some(id) = parse_account_action(action, "getotp_") {
            return match self.purchase.request_new_code(principal, id) {
                Ok(()) => OutboundMessage::text(
                    "🔄 Waiting for a new OTP. Request the code on your device now.",
                ),
                Err(e) => self.render_error(e),
            };
        }

        if let Some(id) = parse_account_action(action, "done_") {
            return match self.purchase.confirm_done(principal, id).await {
                Ok(entry) => OutboundMessage::text(format!(
                    "🎉 **Purchase Complete**\n\n💵 **Charged:** ${:.2}\n\nThe account is now yours.",
                    entry.amount
                )),
                Err(e) => self.render_error(e),
            };
        }

        warn!(principal = %principal, action, "Unrecognized button action");
        OutboundMessage::text("This button is no longer valid.")
    }

    async fn handle_upload_text(
        &self,
        operator: PrincipalId,
        step: UploadStep,
        text: &str,
    ) -> OutboundMessage {
        let outcome = match step {
            UploadStep::AwaitingSecondFactor => {
                self.provisioning.submit_second_factor(operator, text).await
            }
            UploadStep::AwaitingSecondFactorChoice { .. } => {
                self.provisioning.submit_second_factor_choice(operator, text)
            }
            UploadStep::AwaitingCode => self.provisioning.submit_code(operator, text).await,
            UploadStep::AwaitingPhone => self.provisioning.submit_phone(operator, text).await,
        };
        match outcome {
            Ok(reply) => self.render_provision_reply(reply),
            Err(e) => self.render_error(e),
        }
    }

    fn render_provision_reply(&self, reply: ProvisionReply) -> OutboundMessage {
        match reply {
            ProvisionReply::PhonePrompt { country } => OutboundMessage::text(format!(
                "📤 Uploading a {country} account.\n\nSend the phone number in international format."
            )),
            ProvisionReply::CodeRequested { phone } => OutboundMessage::text(format!(
                "📨 Verification code sent to `{phone}`.\n\nSend the code here once it arrives."
            )),
            ProvisionReply::SecondFactorPrompt => OutboundMessage::text(
                "🔐 This account has a 2FA password.\n\nSend it here, or send `cancel` to abort.",
            ),
            ProvisionReply::SecondFactorPending => {
                OutboundMessage::text("🔐 Still waiting for the 2FA password.")
            }
            ProvisionReply::SignedIn { phone, .. } => OutboundMessage::text(format!(
                "✅ Signed in to `{phone}` and saved it as available.\n\nSend the 2FA password to store it, `skip` to leave it unset, or `cancel` to discard the account."
            )),
            ProvisionReply::Finalized {
                phone,
                second_factor_set,
                ..
            } => {
                if second_factor_set {
                    OutboundMessage::text(format!(
                        "✅ Account `{phone}` uploaded with its 2FA password."
                    ))
                } else {
                    OutboundMessage::text(format!("✅ Account `{phone}` uploaded."))
                }
            }
            ProvisionReply::Aborted => OutboundMessage::text("❌ Upload cancelled."),
        }
    }

    fn render_catalog(&self) -> OutboundMessage {
        let mut countries: Vec<(&String, &f64)> = self.config.country_prices.iter().collect();
        countries.sort_by(|a, b| a.0.cmp(b.0));

        let buttons = countries
            .chunks(2)
            .map(|pair| {
                pair.iter()
                    .map(|(code, price)| {
                        Button::new(format!("{code} (${price:.0})"), format!("country_{code}"))
                    })
                    .collect()
            })
            .collect();
        OutboundMessage::with_buttons(
            "🛒 **Account Shop**\n\nPick a country to buy a number:",
            buttons,
        )
    }

    fn render_upload_menu(&self) -> OutboundMessage {
        let mut countries: Vec<&String> = self.config.country_prices.keys().collect();
        countries.sort();

        let buttons = countries
            .chunks(2)
            .map(|pair| {
                pair.iter()
                    .map(|code| Button::new((*code).clone(), format!("upload_country_{code}")))
                    .collect()
            })
            .collect();
        OutboundMessage::with_buttons("📤 Pick the country of the account to upload:", buttons)
    }

    fn render_balance(&self, principal: PrincipalId, username: Option<&str>) -> OutboundMessage {
        match self.db.get_or_create_user(principal, username) {
            Ok(user) => {
                OutboundMessage::text(format!("💰 **Balance:** ${:.2}", user.balance))
            }
            Err(e) => {
                warn!(principal = %principal, error = %e, "Balance lookup failed");
                OutboundMessage::text("⚠️ Could not load your balance. Try again.")
            }
        }
    }

    fn render_stock(&self) -> OutboundMessage {
        match self.db.list_accounts() {
            Ok(accounts) => {
                let mut per_country: std::collections::BTreeMap<String, usize> =
                    std::collections::BTreeMap::new();
                for account in accounts {
                    if account.status == crate::models::AccountStatus::Available {
                        *per_country.entry(account.country).or_default() += 1;
                    }
                }
                if per_country.is_empty() {
                    return OutboundMessage::text("📦 No accounts in stock right now.");
                }
                let mut text = String::from("📦 **In Stock**\n");
                for (country, count) in per_country {
                    text.push_str(&format!("\n{country}: {count}"));
                }
                OutboundMessage::text(text)
            }
            Err(e) => {
                warn!(error = %e, "Stock listing failed");
                OutboundMessage::text("⚠️ Could not load stock. Try again.")
            }
        }
    }

    fn render_error(&self, err: ShopError) -> OutboundMessage {
        let text = match &err {
            ShopError::InvalidInput(reason) => format!("⚠️ {reason}."),
            ShopError::InvalidPhone => {
                "⚠️ The provider rejected that phone number. Send a different one.".into()
            }
            ShopError::InvalidCode => "⚠️ Wrong code. Try again.".into(),
            ShopError::IncorrectPassword => "⚠️ Wrong 2FA password. Try again.".into(),
            ShopError::NoSession => "⚠️ No upload in progress. Use /upload to start one.".into(),
            ShopError::RetryLimitExceeded => {
                "❌ Too many failed attempts. The upload was cancelled.".into()
            }
            ShopError::NotFound(what) => format!("⚠️ {what} no longer exists."),
            ShopError::StatusConflict { .. } => {
                "⚠️ That account is not held by you anymore.".into()
            }
            ShopError::OutOfStock(country) => {
                format!("😔 No {country} numbers in stock right now. Check back later.")
            }
            ShopError::InsufficientBalance { required, balance } => format!(
                "💸 Insufficient balance: this costs ${required:.2}, you have ${balance:.2}."
            ),
            ShopError::Provider(_) | ShopError::Store(_) => {
                warn!(error = %err, "Dispatch hit an internal failure");
                "⚠️ Something went wrong. Try again in a moment.".into()
            }
        };
        OutboundMessage::text(text)
    }
}

/// Parse `prefix` + account id tokens like `getotp_17`.
fn parse_account_action(action: &str, prefix: &str) -> Option<u64> {
    action.strip_prefix(prefix)?.parse().ok()
}
