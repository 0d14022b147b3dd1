// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded shop database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: principal id → serialized User
//! - `accounts`: account id → serialized Account
//! - `transactions`: ledger id → serialized Transaction (append-only)
//! - `state`: key → value bytes (account id counter)
//!
//! ## Transactions and races
//!
//! Every status transition here is a single redb write transaction that
//! re-reads the row before writing, so two concurrent buyers can never both
//! reserve the same account: whoever commits second sees the row already
//! reserved and fails with `StatusConflict`.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::models::{Account, AccountStatus, PrincipalId, Reservation, Transaction, TxKind, User};

// =============================================================================
// Table Definitions
// =============================================================================

/// Principal id → serialized User (JSON bytes).
const USERS: TableDefinition<i64, &[u8]> = TableDefinition::new("users");

/// Account id → serialized Account (JSON bytes).
const ACCOUNTS: TableDefinition<u64, &[u8]> = TableDefinition::new("accounts");

/// Ledger id (UUID string) → serialized Transaction (JSON bytes).
const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// Internal state: key → value bytes (e.g. "next_account_id" → u64 big-endian).
const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("account {id} is not {expected}")]
    StatusConflict { id: u64, expected: &'static str },

    #[error("balance {balance} does not cover {required}")]
    InsufficientBalance { required: f64, balance: f64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// ShopDatabase
// =============================================================================

/// Embedded ACID store for users, accounts, and the transaction ledger.
pub struct ShopDatabase {
    db: Database,
}

impl ShopDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(ACCOUNTS)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(STATE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Fetch a user, creating them with a zero balance on first sight.
    pub fn get_or_create_user(
        &self,
        id: PrincipalId,
        username: Option<&str>,
    ) -> StoreResult<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut table = write_txn.open_table(USERS)?;
            let existing = match table.get(id.0)? {
                Some(value) => Some(serde_json::from_slice::<User>(value.value())?),
                None => None,
            };
            match existing {
                Some(user) => user,
                None => {
                    let user = User {
                        id,
                        username: username.map(str::to_string),
                        balance: 0.0,
                        created_at: chrono::Utc::now(),
                    };
                    table.insert(id.0, serde_json::to_vec(&user)?.as_slice())?;
                    user
                }
            }
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Look up a user by id.
    pub fn get_user(&self, id: PrincipalId) -> StoreResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        match table.get(id.0)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Adjust a user's balance by `delta` and append the matching ledger
    /// entry, atomically.
    ///
    /// Fails with `InsufficientBalance` if the adjustment would take the
    /// balance below zero; no mutation happens in that case.
    pub fn adjust_balance(
        &self,
        id: PrincipalId,
        delta: f64,
        kind: TxKind,
    ) -> StoreResult<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let mut user: User = match users.get(id.0)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(format!("user {id}"))),
            };

            if user.balance + delta < 0.0 {
                return Err(StoreError::InsufficientBalance {
                    required: -delta,
                    balance: user.balance,
                });
            }
            user.balance += delta;
            users.insert(id.0, serde_json::to_vec(&user)?.as_slice())?;

            let entry = Transaction::new(id, None, delta, kind);
            let mut ledger = write_txn.open_table(TRANSACTIONS)?;
            let key = entry.id.to_string();
            ledger.insert(key.as_str(), serde_json::to_vec(&entry)?.as_slice())?;

            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert a freshly provisioned account with status `available`.
    ///
    /// Returns the stored row including its allocated id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_account(
        &self,
        country: &str,
        phone: &str,
        credential_ref: &str,
        second_factor: Option<&str>,
        uploaded_by: Option<PrincipalId>,
        price: f64,
    ) -> StoreResult<Account> {
        let write_txn = self.db.begin_write()?;
        let account = {
            let id = {
                let mut state = write_txn.open_table(STATE)?;
                let next = match state.get("next_account_id")? {
                    Some(v) if v.value().len() >= 8 => {
                        u64::from_be_bytes(v.value()[..8].try_into().expect("8 bytes"))
                    }
                    _ => 1,
                };
                state.insert("next_account_id", (next + 1).to_be_bytes().as_slice())?;
                next
            };

            let account = Account {
                id,
                country: country.to_string(),
                phone: phone.to_string(),
                credential_ref: credential_ref.to_string(),
                second_factor: second_factor.map(str::to_string),
                uploaded_by,
                status: AccountStatus::Available,
                price,
                metadata: None,
                created_at: chrono::Utc::now(),
            };

            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            accounts.insert(id, serde_json::to_vec(&account)?.as_slice())?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    /// Look up an account by id.
    pub fn get_account(&self, id: u64) -> StoreResult<Option<Account>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Physically delete an account row (provisioning abort only).
    pub fn delete_account(&self, id: u64) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            if table.remove(id)?.is_none() {
                return Err(StoreError::NotFound(format!("account {id}")));
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Store or clear an account's second-factor secret.
    pub fn set_second_factor(&self, id: u64, secret: Option<&str>) -> StoreResult<()> {
        self.mutate_account(id, |account| {
            account.second_factor = secret.map(str::to_string);
            Ok(())
        })
    }

    /// List every account row. Used by sweeps and statistics.
    pub fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        let mut accounts = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            accounts.push(serde_json::from_slice(value.value())?);
        }
        Ok(accounts)
    }

    // =========================================================================
    // Reservation transitions
    // =========================================================================

    /// Reserve a specific available account for a buyer.
    pub fn reserve(
        &self,
        id: u64,
        buyer: PrincipalId,
        ttl_minutes: i64,
    ) -> StoreResult<Account> {
        let write_txn = self.db.begin_write()?;
        let account = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let mut account: Account = match table.get(id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(format!("account {id}"))),
            };
            if account.status != AccountStatus::Available {
                return Err(StoreError::StatusConflict {
                    id,
                    expected: "available",
                });
            }

            let reservation = Reservation::for_buyer(buyer, ttl_minutes);
            account.status = AccountStatus::Reserved;
            account.metadata = Some(serde_json::to_string(&reservation)?);
            table.insert(id, serde_json::to_vec(&account)?.as_slice())?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    /// Atomically find any available account for `country` and reserve it.
    ///
    /// Which account is picked is unspecified beyond "some available row
    /// for the country"; scan order means lowest id in practice.
    pub fn reserve_any(
        &self,
        country: &str,
        buyer: PrincipalId,
        ttl_minutes: i64,
    ) -> StoreResult<Option<Account>> {
        let write_txn = self.db.begin_write()?;
        let reserved = {
            let mut table = write_txn.open_table(ACCOUNTS)?;

            let mut candidate: Option<Account> = None;
            for entry in table.iter()? {
                let (_, value) = entry?;
                let account: Account = serde_json::from_slice(value.value())?;
                if account.status == AccountStatus::Available && account.country == country {
                    candidate = Some(account);
                    break;
                }
            }

            match candidate {
                Some(mut account) => {
                    let reservation = Reservation::for_buyer(buyer, ttl_minutes);
                    account.status = AccountStatus::Reserved;
                    account.metadata = Some(serde_json::to_string(&reservation)?);
                    table.insert(account.id, serde_json::to_vec(&account)?.as_slice())?;
                    Some(account)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(reserved)
    }

    /// Release an account back to `available`, clearing its reservation.
    ///
    /// Idempotent over status: releasing an already-available account is a
    /// no-op. Unknown ids still error.
    pub fn release(&self, id: u64) -> StoreResult<Account> {
        let write_txn = self.db.begin_write()?;
        let account = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let mut account: Account = match table.get(id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(format!("account {id}"))),
            };
            account.status = AccountStatus::Available;
            account.metadata = None;
            table.insert(id, serde_json::to_vec(&account)?.as_slice())?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    /// Transition a reserved account to `sold`, clearing its reservation.
    pub fn mark_sold(&self, id: u64) -> StoreResult<Account> {
        let write_txn = self.db.begin_write()?;
        let account = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let mut account: Account = match table.get(id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(format!("account {id}"))),
            };
            if account.status != AccountStatus::Reserved {
                return Err(StoreError::StatusConflict {
                    id,
                    expected: "reserved",
                });
            }
            account.status = AccountStatus::Sold;
            account.metadata = None;
            table.insert(id, serde_json::to_vec(&account)?.as_slice())?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    /// Release every reserved account whose deadline has passed or whose
    /// reservation metadata is absent or unparseable.
    ///
    /// Returns the number of accounts released. Running it again with no
    /// time passing releases nothing further.
    pub fn sweep_expired(&self) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let released = {
            let mut table = write_txn.open_table(ACCOUNTS)?;

            let mut expired: Vec<Account> = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let account: Account = serde_json::from_slice(value.value())?;
                if account.status != AccountStatus::Reserved {
                    continue;
                }
                // Missing or corrupt metadata releases the account rather
                // than leaving it stuck as reserved.
                match account.reservation() {
                    Some(reservation) if !reservation.is_expired() => {}
                    _ => expired.push(account),
                }
            }

            let count = expired.len();
            for mut account in expired {
                account.status = AccountStatus::Available;
                account.metadata = None;
                table.insert(account.id, serde_json::to_vec(&account)?.as_slice())?;
            }
            count
        };
        write_txn.commit()?;
        Ok(released)
    }

    // =========================================================================
    // Sale finalization
    // =========================================================================

    /// Finalize a sale in one transaction: debit the buyer, mark the
    /// account sold, and append the purchase ledger entry.
    ///
    /// Fails without mutating anything if the buyer is unknown, the balance
    /// does not cover the price, or the account is not reserved.
    pub fn finalize_sale(&self, buyer: PrincipalId, account_id: u64) -> StoreResult<Transaction> {
        let write_txn = self.db.begin_write()?;
        let entry = {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let mut account: Account = match accounts.get(account_id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(format!("account {account_id}"))),
            };
            if account.status != AccountStatus::Reserved {
                return Err(StoreError::StatusConflict {
                    id: account_id,
                    expected: "reserved",
                });
            }

            let mut users = write_txn.open_table(USERS)?;
            let mut user: User = match users.get(buyer.0)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(format!("user {buyer}"))),
            };
            if user.balance < account.price {
                return Err(StoreError::InsufficientBalance {
                    required: account.price,
                    balance: user.balance,
                });
            }

            user.balance -= account.price;
            users.insert(buyer.0, serde_json::to_vec(&user)?.as_slice())?;

            account.status = AccountStatus::Sold;
            account.metadata = None;
            accounts.insert(account_id, serde_json::to_vec(&account)?.as_slice())?;

            let entry = Transaction::new(buyer, Some(account_id), account.price, TxKind::Purchase);
            let mut ledger = write_txn.open_table(TRANSACTIONS)?;
            let key = entry.id.to_string();
            ledger.insert(key.as_str(), serde_json::to_vec(&entry)?.as_slice())?;
            entry
        };
        write_txn.commit()?;
        Ok(entry)
    }

    /// List all ledger entries. Order is by ledger id, not time.
    pub fn list_transactions(&self) -> StoreResult<Vec<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn mutate_account(
        &self,
        id: u64,
        apply: impl FnOnce(&mut Account) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let mut account: Account = match table.get(id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StoreError::NotFound(format!("account {id}"))),
            };
            apply(&mut account)?;
            table.insert(id, serde_json::to_vec(&account)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Overwrite an account row verbatim. Test fixture hook.
    #[cfg(test)]
    pub(crate) fn put_account_row(&self, account: &Account) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            table.insert(account.id, serde_json::to_vec(account)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
