// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Provisioning
//!
//! Operator-driven sign-in flow that turns a phone number into a sellable
//! account row plus an on-disk credential blob. Each operator has at most
//! one in-progress session; starting a new one supersedes the old.
//!
//! The flow walks a fixed ladder of steps:
//!
//! `AwaitingPhone` → `AwaitingCode` → (`AwaitingSecondFactor`) →
//! `AwaitingSecondFactorChoice`
//!
//! Code and password submissions are each capped at five attempts; the
//! sixth deletes the partial credential blob and resets the session to the
//! phone step, so no orphaned artifact survives. Success at the code step
//! already persists
//! the account as `available` — the remaining steps only attach or decline
//! the second-factor secret.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::ShopConfig;
use crate::error::{ShopError, ShopResult};
use crate::models::PrincipalId;
use crate::provider::{Provider, ProviderError};
use crate::storage::{CredentialStore, ShopDatabase};

/// Maximum accepted verification-code submissions per session.
pub const MAX_CODE_ATTEMPTS: u32 = 5;

/// Maximum accepted second-factor submissions per session.
pub const MAX_PASSWORD_ATTEMPTS: u32 = 5;

/// Where an upload session currently is in the sign-in ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStep {
    /// Waiting for the operator to send the phone number.
    AwaitingPhone,
    /// Code requested from the provider; waiting for the operator to relay it.
    AwaitingCode,
    /// Code accepted but the account has a second-factor password.
    AwaitingSecondFactor,
    /// Signed in; waiting for the operator to store, skip, or cancel the
    /// second-factor secret for the already-persisted account.
    AwaitingSecondFactorChoice { account_id: u64 },
}

/// One operator's in-progress provisioning flow.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub operator: PrincipalId,
    pub country: String,
    pub phone: String,
    pub credential_ref: String,
    /// Opaque provider token tying the code submission to the code request.
    pub verification_handle: Option<String>,
    pub step: UploadStep,
    pub code_attempts: u32,
    pub password_attempts: u32,
    /// The second-factor prompt is sent once; retries reuse it.
    pub prompt_sent: bool,
}

impl UploadSession {
    fn new(operator: PrincipalId, country: String) -> Self {
        Self {
            operator,
            country,
            phone: String::new(),
            credential_ref: String::new(),
            verification_handle: None,
            step: UploadStep::AwaitingPhone,
            code_attempts: 0,
            password_attempts: 0,
            prompt_sent: false,
        }
    }
}

/// Session persistence seam. The in-memory implementation is the default;
/// a durable one only needs these three operations.
pub trait SessionStore: Send + Sync {
    fn get(&self, operator: PrincipalId) -> Option<UploadSession>;
    fn put(&self, session: UploadSession);
    fn remove(&self, operator: PrincipalId) -> Option<UploadSession>;
}

/// Process-local session store keyed by operator.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<i64, UploadSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, operator: PrincipalId) -> Option<UploadSession> {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .get(&operator.0)
            .cloned()
    }

    fn put(&self, session: UploadSession) {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .insert(session.operator.0, session);
    }

    fn remove(&self, operator: PrincipalId) -> Option<UploadSession> {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .remove(&operator.0)
    }
}

/// Outcome of a provisioning submission, rendered by the dispatch layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionReply {
    /// Session opened; the operator should send the phone number next.
    PhonePrompt { country: String },
    /// Code requested from the provider for this phone.
    CodeRequested { phone: String },
    /// The account needs a second-factor password; prompt the operator.
    SecondFactorPrompt,
    /// Still waiting for the second factor after a rejected code retry.
    SecondFactorPending,
    /// Signed in without a second factor; account persisted, operator must
    /// now choose what to do about a second-factor secret.
    SignedIn { phone: String, account_id: u64 },
    /// Session finished and the account row is complete.
    Finalized {
        phone: String,
        account_id: u64,
        second_factor_set: bool,
    },
    /// Session cancelled by the operator; partial state cleaned up.
    Aborted,
}

/// The provisioning state machine shared by all operators.
pub struct ProvisioningMachine {
    db: Arc<ShopDatabase>,
    credentials: CredentialStore,
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionStore>,
    config: Arc<ShopConfig>,
}

impl ProvisioningMachine {
    pub fn new(
        db: Arc<ShopDatabase>,
        credentials: CredentialStore,
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionStore>,
        config: Arc<ShopConfig>,
    ) -> Self {
        Self {
            db,
            credentials,
            provider,
            sessions,
            config,
        }
    }

    /// The current step of an operator's session, if one is in progress.
    pub fn current_step(&self, operator: PrincipalId) -> Option<UploadStep> {
        self.sessions.get(operator).map(|session| session.step)
    }

    /// Open a fresh session for `operator` and `country`, superseding any
    /// in-progress one.
    pub fn start(&self, operator: PrincipalId, country: &str) -> ShopResult<ProvisionReply> {
        if let Some(previous) = self.sessions.remove(operator) {
            self.discard(&previous)?;
            info!(
                operator = %operator,
                phone = %previous.phone,
                "Superseded in-progress upload session"
            );
        }

        self.sessions
            .put(UploadSession::new(operator, country.to_string()));
        Ok(ProvisionReply::PhonePrompt {
            country: country.to_string(),
        })
    }

    /// Cancel an operator's session outright, cleaning up partial state.
    pub fn cancel(&self, operator: PrincipalId) -> ShopResult<ProvisionReply> {
        match self.sessions.remove(operator) {
            Some(session) => {
                self.discard(&session)?;
                info!(operator = %operator, "Upload session cancelled");
                Ok(ProvisionReply::Aborted)
            }
            None => Err(ShopError::NoSession),
        }
    }

    /// Handle the phone-number submission.
    ///
    /// Validation is syntactic first (leading `+`, at least eight
    /// characters), then the provider is asked to send a verification code.
    /// On rejection the session stays in the phone step so the operator can
    /// retry with a different number.
    pub async fn submit_phone(
        &self,
        operator: PrincipalId,
        phone: &str,
    ) -> ShopResult<ProvisionReply> {
        let mut session = self.step_session(operator, |step| *step == UploadStep::AwaitingPhone)?;

        let phone = phone.trim();
        if !phone.starts_with('+') || phone.len() < 8 {
            return Err(ShopError::InvalidInput(
                "phone number must start with '+' and contain at least 8 characters".into(),
            ));
        }

        let credential_ref = CredentialStore::credential_ref_for(phone);
        let credential_path = self.credentials.path(&credential_ref);

        let mut conn = self.provider.connect(&credential_path).await?;
        let requested = conn.request_code(phone).await;
        conn.close().await;

        let handle = match requested {
            Ok(handle) => handle,
            Err(ProviderError::InvalidPhone) => return Err(ShopError::InvalidPhone),
            Err(e) => return Err(e.into()),
        };

        session.phone = phone.to_string();
        session.credential_ref = credential_ref;
        session.verification_handle = Some(handle);
        session.step = UploadStep::AwaitingCode;
        self.sessions.put(session);

        info!(operator = %operator, phone, "Verification code requested");
        Ok(ProvisionReply::CodeRequested {
            phone: phone.to_string(),
        })
    }

    /// Handle a verification-code submission.
    ///
    /// Non-digit characters are stripped before use. Every non-empty
    /// submission counts against the attempt cap, including ones the
    /// provider never sees because of connect failures.
    pub async fn submit_code(
        &self,
        operator: PrincipalId,
        raw_code: &str,
    ) -> ShopResult<ProvisionReply> {
        let mut session = self.step_session(operator, |step| *step == UploadStep::AwaitingCode)?;

        let code: String = raw_code.chars().filter(|c| c.is_ascii_digit()).collect();
        if code.is_empty() {
            return Err(ShopError::InvalidInput(
                "verification code must contain digits".into(),
            ));
        }

        session.code_attempts += 1;
        if session.code_attempts > MAX_CODE_ATTEMPTS {
            self.restart(session)?;
            return Err(ShopError::RetryLimitExceeded);
        }
        self.sessions.put(session.clone());

        let handle = session
            .verification_handle
            .clone()
            .ok_or(ShopError::NoSession)?;
        let credential_path = self.credentials.path(&session.credential_ref);

        let mut conn = self.provider.connect(&credential_path).await?;
        let signed_in = conn.sign_in_code(&session.phone, &code, &handle).await;
        conn.close().await;

        match signed_in {
            Ok(()) => {
                let account = self.db.insert_account(
                    &session.country,
                    &session.phone,
                    &session.credential_ref,
                    None,
                    Some(operator),
                    self.config.price(&session.country),
                )?;
                session.step = UploadStep::AwaitingSecondFactorChoice {
                    account_id: account.id,
                };
                self.sessions.put(session.clone());

                info!(
                    operator = %operator,
                    phone = %session.phone,
                    account_id = account.id,
                    "Account signed in and persisted"
                );
                Ok(ProvisionReply::SignedIn {
                    phone: session.phone,
                    account_id: account.id,
                })
            }
            Err(ProviderError::SecondFactorRequired) => {
                session.step = UploadStep::AwaitingSecondFactor;
                let first_prompt = !session.prompt_sent;
                session.prompt_sent = true;
                self.sessions.put(session);

                if first_prompt {
                    Ok(ProvisionReply::SecondFactorPrompt)
                } else {
                    Ok(ProvisionReply::SecondFactorPending)
                }
            }
            Err(ProviderError::InvalidCode) => Err(ShopError::InvalidCode),
            Err(e) => Err(e.into()),
        }
    }

    /// Handle a second-factor password submission. The literal `cancel`
    /// (any case) aborts the session instead.
    pub async fn submit_second_factor(
        &self,
        operator: PrincipalId,
        password: &str,
    ) -> ShopResult<ProvisionReply> {
        let mut session =
            self.step_session(operator, |step| *step == UploadStep::AwaitingSecondFactor)?;

        let password = password.trim();
        if password.eq_ignore_ascii_case("cancel") {
            self.abort(session)?;
            return Ok(ProvisionReply::Aborted);
        }

        session.password_attempts += 1;
        if session.password_attempts > MAX_PASSWORD_ATTEMPTS {
            self.restart(session)?;
            return Err(ShopError::RetryLimitExceeded);
        }
        self.sessions.put(session.clone());

        let credential_path = self.credentials.path(&session.credential_ref);
        let mut conn = self.provider.connect(&credential_path).await?;
        let signed_in = conn.sign_in_password(password).await;
        conn.close().await;

        match signed_in {
            Ok(()) => {
                let account = self.db.insert_account(
                    &session.country,
                    &session.phone,
                    &session.credential_ref,
                    Some(password),
                    Some(operator),
                    self.config.price(&session.country),
                )?;
                self.sessions.remove(operator);

                info!(
                    operator = %operator,
                    phone = %session.phone,
                    account_id = account.id,
                    "Account signed in with second factor and persisted"
                );
                Ok(ProvisionReply::Finalized {
                    phone: session.phone,
                    account_id: account.id,
                    second_factor_set: true,
                })
            }
            Err(ProviderError::IncorrectPassword) => Err(ShopError::IncorrectPassword),
            Err(e) => Err(e.into()),
        }
    }

    /// Handle the post-sign-in second-factor choice: `skip` leaves the
    /// account without a secret, `cancel` removes the account entirely, any
    /// other text is stored as the secret.
    pub fn submit_second_factor_choice(
        &self,
        operator: PrincipalId,
        text: &str,
    ) -> ShopResult<ProvisionReply> {
        let session = self.step_session(operator, |step| {
            matches!(step, UploadStep::AwaitingSecondFactorChoice { .. })
        })?;
        let UploadStep::AwaitingSecondFactorChoice { account_id } = session.step else {
            return Err(ShopError::NoSession);
        };

        let text = text.trim();
        if text.eq_ignore_ascii_case("cancel") {
            self.db.delete_account(account_id)?;
            if let Err(e) = self.credentials.delete(&session.credential_ref) {
                warn!(
                    credential_ref = %session.credential_ref,
                    error = %e,
                    "Failed to delete credential blob"
                );
            }
            self.sessions.remove(operator);
            info!(
                operator = %operator,
                account_id,
                "Signed-in upload cancelled, account removed"
            );
            return Ok(ProvisionReply::Aborted);
        }

        let second_factor_set = if text.eq_ignore_ascii_case("skip") {
            false
        } else {
            self.db.set_second_factor(account_id, Some(text))?;
            true
        };
        self.sessions.remove(operator);

        info!(
            operator = %operator,
            account_id,
            second_factor_set,
            "Upload session finalized"
        );
        Ok(ProvisionReply::Finalized {
            phone: session.phone,
            account_id,
            second_factor_set,
        })
    }

    /// Fetch the operator's session if it is at an accepted step.
    fn step_session(
        &self,
        operator: PrincipalId,
        accepts: impl Fn(&UploadStep) -> bool,
    ) -> ShopResult<UploadSession> {
        match self.sessions.get(operator) {
            Some(session) if accepts(&session.step) => Ok(session),
            _ => Err(ShopError::NoSession),
        }
    }

    /// Abort a session mid-flow: drop it and delete the partial credential.
    fn abort(&self, session: UploadSession) -> ShopResult<()> {
        self.sessions.remove(session.operator);
        self.discard(&session)
    }

    /// Retry-limit exhaustion: delete the partial credential and reset the
    /// session to a fresh phone step, so the operator's next phone
    /// submission starts over without re-opening the flow.
    fn restart(&self, session: UploadSession) -> ShopResult<()> {
        self.discard(&session)?;
        self.sessions
            .put(UploadSession::new(session.operator, session.country));
        Ok(())
    }

    /// Clean up a session's partial on-disk state. A session that already
    /// persisted its account keeps both the row and the blob; everything
    /// earlier only ever produced the credential file.
    fn discard(&self, session: &UploadSession) -> ShopResult<()> {
        if matches!(session.step, UploadStep::AwaitingSecondFactorChoice { .. }) {
            return Ok(());
        }
        if !session.credential_ref.is_empty() {
            if let Err(e) = self.credentials.delete(&session.credential_ref) {
                warn!(
                    credential_ref = %session.credential_ref,
                    error = %e,
                    "Failed to delete credential blob"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountStatus;
    use crate::storage::StoragePaths;
    use crate::testkit::MockProvider;

    const OP: PrincipalId = PrincipalId(100);

    struct Harness {
        _dir: tempfile::TempDir,
        provider: Arc<MockProvider>,
        machine: ProvisioningMachine,
        db: Arc<ShopDatabase>,
        credentials: CredentialStore,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(dir.path());
        let db = Arc::new(ShopDatabase::open(&paths.database()).unwrap());
        let credentials = CredentialStore::open(paths).unwrap();
        let provider = MockProvider::new();
        let machine = ProvisioningMachine::new(
            Arc::clone(&db),
            credentials.clone(),
            provider.clone() as Arc<dyn Provider>,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(ShopConfig::default()),
        );
        Harness {
            _dir: dir,
            provider,
            machine,
            db,
            credentials,
        }
    }

    async fn advance_to_code_step(h: &Harness) {
        h.machine.start(OP, "US").unwrap();
        h.provider.queue_code_result(Ok("handle-1".into()));
        h.machine.submit_phone(OP, "+12025550123").await.unwrap();
    }

    #[tokio::test]
    async fn full_flow_without_second_factor() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider.queue_sign_in(Ok(()));
        let reply = h.machine.submit_code(OP, "45441").await.unwrap();
        let ProvisionReply::SignedIn { account_id, .. } = reply else {
            panic!("expected SignedIn, got {reply:?}");
        };

        let reply = h.machine.submit_second_factor_choice(OP, "skip").unwrap();
        assert_eq!(
            reply,
            ProvisionReply::Finalized {
                phone: "+12025550123".into(),
                account_id,
                second_factor_set: false,
            }
        );

        let account = h.db.get_account(account_id).unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Available);
        assert_eq!(account.price, 40.0);
        assert_eq!(account.second_factor, None);
        assert_eq!(account.uploaded_by, Some(OP));
        assert!(h.credentials.exists(&account.credential_ref));
        assert!(h.machine.current_step(OP).is_none());
    }

    #[tokio::test]
    async fn invalid_phone_syntax_is_rejected_before_the_provider() {
        let h = harness();
        h.machine.start(OP, "US").unwrap();

        let err = h.machine.submit_phone(OP, "12025550123").await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidInput(_)));
        let err = h.machine.submit_phone(OP, "+1202").await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidInput(_)));

        // Session still accepts a corrected number
        assert_eq!(h.machine.current_step(OP), Some(UploadStep::AwaitingPhone));
    }

    #[tokio::test]
    async fn provider_rejected_phone_keeps_the_phone_step() {
        let h = harness();
        h.machine.start(OP, "US").unwrap();

        h.provider
            .queue_code_result(Err(ProviderError::InvalidPhone));
        let err = h
            .machine
            .submit_phone(OP, "+12025550123")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::InvalidPhone));
        assert_eq!(h.machine.current_step(OP), Some(UploadStep::AwaitingPhone));
    }

    #[tokio::test]
    async fn code_is_digit_stripped_and_empty_rejected() {
        let h = harness();
        advance_to_code_step(&h).await;

        let err = h.machine.submit_code(OP, "no digits").await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidInput(_)));

        h.provider.queue_sign_in(Ok(()));
        let reply = h.machine.submit_code(OP, "4-5-4 41").await.unwrap();
        assert!(matches!(reply, ProvisionReply::SignedIn { .. }));
    }

    #[tokio::test]
    async fn sixth_code_attempt_aborts_and_deletes_credential() {
        let h = harness();
        advance_to_code_step(&h).await;
        let credential_ref = CredentialStore::credential_ref_for("+12025550123");
        assert!(h.credentials.exists(&credential_ref));

        for _ in 0..MAX_CODE_ATTEMPTS {
            h.provider.queue_sign_in(Err(ProviderError::InvalidCode));
            let err = h.machine.submit_code(OP, "00000").await.unwrap_err();
            assert!(matches!(err, ShopError::InvalidCode));
        }

        let err = h.machine.submit_code(OP, "00000").await.unwrap_err();
        assert!(matches!(err, ShopError::RetryLimitExceeded));
        assert!(!h.credentials.exists(&credential_ref));

        // The operator can start over with a phone number right away
        assert_eq!(h.machine.current_step(OP), Some(UploadStep::AwaitingPhone));
        h.provider.queue_code_result(Ok("handle-2".into()));
        let reply = h.machine.submit_phone(OP, "+12025550199").await.unwrap();
        assert!(matches!(reply, ProvisionReply::CodeRequested { .. }));
    }

    #[tokio::test]
    async fn second_factor_prompt_is_sent_once() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider
            .queue_sign_in(Err(ProviderError::SecondFactorRequired));
        let reply = h.machine.submit_code(OP, "45441").await.unwrap();
        assert_eq!(reply, ProvisionReply::SecondFactorPrompt);
        assert_eq!(
            h.machine.current_step(OP),
            Some(UploadStep::AwaitingSecondFactor)
        );
    }

    #[tokio::test]
    async fn second_factor_success_persists_the_secret() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider
            .queue_sign_in(Err(ProviderError::SecondFactorRequired));
        h.machine.submit_code(OP, "45441").await.unwrap();

        h.provider.queue_password(Ok(()));
        let reply = h
            .machine
            .submit_second_factor(OP, "hunter2")
            .await
            .unwrap();
        let ProvisionReply::Finalized {
            account_id,
            second_factor_set,
            ..
        } = reply
        else {
            panic!("expected Finalized, got {reply:?}");
        };
        assert!(second_factor_set);

        let account = h.db.get_account(account_id).unwrap().unwrap();
        assert_eq!(account.second_factor.as_deref(), Some("hunter2"));
        assert!(h.machine.current_step(OP).is_none());
    }

    #[tokio::test]
    async fn wrong_password_keeps_the_step_without_reprompting() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider
            .queue_sign_in(Err(ProviderError::SecondFactorRequired));
        h.machine.submit_code(OP, "45441").await.unwrap();

        h.provider
            .queue_password(Err(ProviderError::IncorrectPassword));
        let err = h
            .machine
            .submit_second_factor(OP, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::IncorrectPassword));
        assert_eq!(
            h.machine.current_step(OP),
            Some(UploadStep::AwaitingSecondFactor)
        );
    }

    #[tokio::test]
    async fn cancel_word_at_second_factor_aborts() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider
            .queue_sign_in(Err(ProviderError::SecondFactorRequired));
        h.machine.submit_code(OP, "45441").await.unwrap();

        let reply = h.machine.submit_second_factor(OP, "CANCEL").await.unwrap();
        assert_eq!(reply, ProvisionReply::Aborted);
        assert!(h.machine.current_step(OP).is_none());
        assert!(!h
            .credentials
            .exists(&CredentialStore::credential_ref_for("+12025550123")));
    }

    #[tokio::test]
    async fn sixth_password_attempt_aborts() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider
            .queue_sign_in(Err(ProviderError::SecondFactorRequired));
        h.machine.submit_code(OP, "45441").await.unwrap();

        for _ in 0..MAX_PASSWORD_ATTEMPTS {
            h.provider
                .queue_password(Err(ProviderError::IncorrectPassword));
            h.machine.submit_second_factor(OP, "wrong").await.unwrap_err();
        }

        let err = h
            .machine
            .submit_second_factor(OP, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::RetryLimitExceeded));
        assert_eq!(h.machine.current_step(OP), Some(UploadStep::AwaitingPhone));
    }

    #[tokio::test]
    async fn choice_cancel_removes_the_persisted_account() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider.queue_sign_in(Ok(()));
        let ProvisionReply::SignedIn { account_id, .. } =
            h.machine.submit_code(OP, "45441").await.unwrap()
        else {
            panic!("expected SignedIn");
        };

        let reply = h.machine.submit_second_factor_choice(OP, "cancel").unwrap();
        assert_eq!(reply, ProvisionReply::Aborted);
        assert!(h.db.get_account(account_id).unwrap().is_none());
        assert!(!h
            .credentials
            .exists(&CredentialStore::credential_ref_for("+12025550123")));
    }

    #[tokio::test]
    async fn choice_text_is_stored_as_second_factor() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider.queue_sign_in(Ok(()));
        let ProvisionReply::SignedIn { account_id, .. } =
            h.machine.submit_code(OP, "45441").await.unwrap()
        else {
            panic!("expected SignedIn");
        };

        h.machine
            .submit_second_factor_choice(OP, "s3cret")
            .unwrap();
        let account = h.db.get_account(account_id).unwrap().unwrap();
        assert_eq!(account.second_factor.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn starting_again_supersedes_and_cleans_the_old_session() {
        let h = harness();
        advance_to_code_step(&h).await;
        let credential_ref = CredentialStore::credential_ref_for("+12025550123");
        assert!(h.credentials.exists(&credential_ref));

        h.machine.start(OP, "VN").unwrap();
        assert_eq!(h.machine.current_step(OP), Some(UploadStep::AwaitingPhone));
        // The superseded session's partial credential is gone
        assert!(!h.credentials.exists(&credential_ref));
    }

    #[tokio::test]
    async fn supersede_after_sign_in_keeps_the_account() {
        let h = harness();
        advance_to_code_step(&h).await;

        h.provider.queue_sign_in(Ok(()));
        let ProvisionReply::SignedIn { account_id, .. } =
            h.machine.submit_code(OP, "45441").await.unwrap()
        else {
            panic!("expected SignedIn");
        };

        h.machine.start(OP, "VN").unwrap();
        // The persisted account survives a supersede; only its secret choice
        // was left unanswered
        let account = h.db.get_account(account_id).unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Available);
    }

    #[tokio::test]
    async fn submissions_without_a_session_are_rejected() {
        let h = harness();
        let err = h
            .machine
            .submit_phone(OP, "+12025550123")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::NoSession));
        let err = h.machine.submit_code(OP, "45441").await.unwrap_err();
        assert!(matches!(err, ShopError::NoSession));
        let err = h.machine.cancel(OP).unwrap_err();
        assert!(matches!(err, ShopError::NoSession));
    }
}
