// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Provider Protocol Seam
//!
//! The messaging network itself is an external collaborator: the core opens
//! one connection per credential, requests verification codes, performs
//! sign-in, and subscribes to new-message events scoped to that connection's
//! account. This module defines the trait surface the core programs against;
//! the concrete protocol client is injected by the embedding deployment, and
//! tests use scripted doubles.
//!
//! Connections are never shared: each provisioning step and each OTP monitor
//! opens its own connection and closes it before returning.

use std::path::Path;

use async_trait::async_trait;

/// The network's fixed peer that delivers login verification codes.
pub const SYSTEM_NOTIFICATION_ID: i64 = 777_000;

/// Errors surfaced by the provider protocol.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The phone number is not registered or malformed for the network.
    #[error("invalid phone number")]
    InvalidPhone,

    /// The verification code was wrong.
    #[error("invalid verification code")]
    InvalidCode,

    /// Sign-in requires a second-factor password.
    #[error("second factor required")]
    SecondFactorRequired,

    /// The second-factor password was wrong.
    #[error("incorrect second-factor password")]
    IncorrectPassword,

    /// Transport-level failure (connect, send, receive).
    #[error("provider I/O: {0}")]
    Io(String),

    /// The connection's event stream ended.
    #[error("provider connection closed")]
    Closed,
}

/// A message observed on a connection's account.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    /// Sender peer id, when known.
    pub sender: Option<i64>,
    /// Destination peer id, when known.
    pub peer: Option<i64>,
    /// Whether the account itself sent the message.
    pub outgoing: bool,
    /// Message text.
    pub text: String,
}

impl ProviderMessage {
    /// Whether this message involves the system-notification peer, in
    /// either direction.
    pub fn involves_system_notifications(&self) -> bool {
        self.sender == Some(SYSTEM_NOTIFICATION_ID) || self.peer == Some(SYSTEM_NOTIFICATION_ID)
    }
}

/// Factory for provider connections, one per credential blob.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open a connection backed by the credential blob at `credential_path`.
    ///
    /// A blob is created at the path on first connect (fresh sign-in) and
    /// reused afterwards.
    async fn connect(
        &self,
        credential_path: &Path,
    ) -> Result<Box<dyn ProviderConnection>, ProviderError>;
}

/// One live connection to the provider under a single credential.
#[async_trait]
pub trait ProviderConnection: Send {
    /// Ask the provider to deliver a verification code to `phone`.
    ///
    /// Returns an opaque verification handle that must accompany the
    /// subsequent code sign-in.
    async fn request_code(&mut self, phone: &str) -> Result<String, ProviderError>;

    /// Attempt sign-in with a verification code.
    async fn sign_in_code(
        &mut self,
        phone: &str,
        code: &str,
        verification_handle: &str,
    ) -> Result<(), ProviderError>;

    /// Attempt sign-in with a second-factor password.
    async fn sign_in_password(&mut self, password: &str) -> Result<(), ProviderError>;

    /// Wait for the next message visible to this connection's account.
    async fn next_message(&mut self) -> Result<ProviderMessage, ProviderError>;

    /// Close the connection. Errors are swallowed; close is best-effort.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_covers_both_directions() {
        let incoming = ProviderMessage {
            sender: Some(SYSTEM_NOTIFICATION_ID),
            peer: Some(1),
            outgoing: false,
            text: "code".into(),
        };
        assert!(incoming.involves_system_notifications());

        let outgoing = ProviderMessage {
            sender: Some(1),
            peer: Some(SYSTEM_NOTIFICATION_ID),
            outgoing: true,
            text: "hi".into(),
        };
        assert!(outgoing.involves_system_notifications());

        let unrelated = ProviderMessage {
            sender: Some(12345),
            peer: Some(1),
            outgoing: false,
            text: "spam".into(),
        };
        assert!(!unrelated.involves_system_notifications());
    }
}
