// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared test doubles: a scripted provider and a recording gateway.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::gateway::{GatewayError, MessagingGateway, OutboundMessage};
use crate::models::PrincipalId;
use crate::provider::{Provider, ProviderConnection, ProviderError, ProviderMessage};

/// Scripted provider: queued results per operation, shared by every
/// connection it hands out. Connecting creates the credential blob on disk,
/// the way a real protocol client materialises a session file.
#[derive(Default)]
pub(crate) struct MockProvider {
    pub fail_connect: Mutex<bool>,
    pub code_results: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    pub sign_in_results: Arc<Mutex<VecDeque<Result<(), ProviderError>>>>,
    pub password_results: Arc<Mutex<VecDeque<Result<(), ProviderError>>>>,
    pub messages: Arc<Mutex<VecDeque<ProviderMessage>>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_code_result(&self, result: Result<String, ProviderError>) {
        self.code_results.lock().unwrap().push_back(result);
    }

    pub fn queue_sign_in(&self, result: Result<(), ProviderError>) {
        self.sign_in_results.lock().unwrap().push_back(result);
    }

    pub fn queue_password(&self, result: Result<(), ProviderError>) {
        self.password_results.lock().unwrap().push_back(result);
    }

    pub fn queue_message(&self, message: ProviderMessage) {
        self.messages.lock().unwrap().push_back(message);
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn connect(
        &self,
        credential_path: &Path,
    ) -> Result<Box<dyn ProviderConnection>, ProviderError> {
        if *self.fail_connect.lock().unwrap() {
            return Err(ProviderError::Io("connect refused".into()));
        }
        if let Some(parent) = credential_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        std::fs::write(credential_path, b"session-blob")
            .map_err(|e| ProviderError::Io(e.to_string()))?;
        Ok(Box::new(MockConnection {
            code_results: Arc::clone(&self.code_results),
            sign_in_results: Arc::clone(&self.sign_in_results),
            password_results: Arc::clone(&self.password_results),
            messages: Arc::clone(&self.messages),
        }))
    }
}

pub(crate) struct MockConnection {
    code_results: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    sign_in_results: Arc<Mutex<VecDeque<Result<(), ProviderError>>>>,
    password_results: Arc<Mutex<VecDeque<Result<(), ProviderError>>>>,
    messages: Arc<Mutex<VecDeque<ProviderMessage>>>,
}

#[async_trait]
impl ProviderConnection for MockConnection {
    async fn request_code(&mut self, _phone: &str) -> Result<String, ProviderError> {
        self.code_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok("handle-1".into()))
    }

    async fn sign_in_code(
        &mut self,
        _phone: &str,
        _code: &str,
        _verification_handle: &str,
    ) -> Result<(), ProviderError> {
        self.sign_in_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn sign_in_password(&mut self, _password: &str) -> Result<(), ProviderError> {
        self.password_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn next_message(&mut self) -> Result<ProviderMessage, ProviderError> {
        let next = self.messages.lock().unwrap().pop_front();
        match next {
            Some(message) => Ok(message),
            // Keep the listener waiting, as a live connection would
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Gateway double that records every outbound message.
#[derive(Default)]
pub(crate) struct RecordingGateway {
    pub sent: Mutex<Vec<(PrincipalId, OutboundMessage)>>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_to(&self, chat: PrincipalId) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| *target == chat)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_message(
        &self,
        chat: PrincipalId,
        message: OutboundMessage,
    ) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push((chat, message));
        Ok(())
    }

    async fn edit_message(
        &self,
        chat: PrincipalId,
        _message_id: i64,
        message: OutboundMessage,
    ) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push((chat, message));
        Ok(())
    }
}

/// A provider message from the system-notification peer.
pub(crate) fn system_message(text: &str) -> ProviderMessage {
    ProviderMessage {
        sender: Some(crate::provider::SYSTEM_NOTIFICATION_ID),
        peer: Some(1),
        outgoing: false,
        text: text.to_string(),
    }
}

/// A provider message from an unrelated peer.
pub(crate) fn unrelated_message(text: &str) -> ProviderMessage {
    ProviderMessage {
        sender: Some(4242),
        peer: Some(1),
        outgoing: false,
        text: text.to_string(),
    }
}
