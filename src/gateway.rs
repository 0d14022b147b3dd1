// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Messaging Gateway Seam
//!
//! Outbound half of the chat front end: the core sends markdown text with
//! optional button layouts to a principal's chat, or edits a message it sent
//! earlier. Inbound events (text, button presses) arrive through
//! [`crate::dispatch`]. Rate limiting is the gateway's concern, not ours.

use async_trait::async_trait;

use crate::models::PrincipalId;

/// An inline button: label plus an opaque action token echoed back on press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

/// Outbound message: markdown text plus button rows.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub text: String,
    pub buttons: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(text: impl Into<String>, buttons: Vec<Vec<Button>>) -> Self {
        Self {
            text: text.into(),
            buttons,
        }
    }
}

/// Gateway transport error, opaque to the core.
#[derive(Debug, thiserror::Error)]
#[error("gateway error: {0}")]
pub struct GatewayError(pub String);

/// Outbound messaging surface of the chat gateway.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a message to a principal's chat.
    async fn send_message(
        &self,
        chat: PrincipalId,
        message: OutboundMessage,
    ) -> Result<(), GatewayError>;

    /// Replace the text and buttons of a previously sent message.
    async fn edit_message(
        &self,
        chat: PrincipalId,
        message_id: i64,
        message: OutboundMessage,
    ) -> Result<(), GatewayError>;
}
