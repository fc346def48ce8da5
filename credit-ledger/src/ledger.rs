//! Ledger engine
//!
//! Atomic earn/spend over the ledger store. Each posting locks the owner's
//! `CreditAccount` row, checks the balance, updates the account and appends
//! exactly one immutable [`CreditTransaction`], all inside one store
//! transaction. These are the only code paths that change balances.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger::{Config, CreditLedger, PostingRequest, Storage, TransactionType, UserId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> credit_ledger::Result<()> {
//!     let config = Config::default();
//!     let storage = Arc::new(Storage::open(&config)?);
//!     let ledger = CreditLedger::new(storage, &config)?;
//!
//!     let user = UserId::new();
//!     ledger
//!         .earn(PostingRequest::new(user, 500, TransactionType::AdminAdjust, "opening balance"))
//!         .await?;
//!     let tx = ledger
//!         .spend(PostingRequest::new(user, 200, TransactionType::SpendPurchase, "purchase"))
//!         .await?;
//!     assert_eq!(tx.balance_after, 300);
//!     Ok(())
//! }
//! ```

use crate::{
    config::HistoryConfig,
    metrics::LedgerMetrics,
    storage::{keys, ScanOrder, StoreTxn, CF_ACCOUNTS, CF_LEDGER_INDICES, CF_SETTINGS, CF_TRANSACTIONS},
    task::run_blocking,
    types::{
        ChainReport, ConfigEntry, CreditAccount, CreditTransaction, HistoryPage, PostingRequest,
        Reference, TransactionType, UserId,
    },
    Config, Error, Result, Storage,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Earn,
    Spend,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Earn => "earn",
            Direction::Spend => "spend",
        }
    }
}

/// Main ledger interface
#[derive(Clone, Debug)]
pub struct CreditLedger {
    /// Shared store handle
    storage: Arc<Storage>,

    /// Metrics
    metrics: Arc<LedgerMetrics>,

    /// History paging limits
    history: HistoryConfig,
}

impl CreditLedger {
    /// Create a ledger over an opened store
    pub fn new(storage: Arc<Storage>, config: &Config) -> Result<Self> {
        let metrics = LedgerMetrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;
        Ok(Self::with_metrics(storage, config, Arc::new(metrics)))
    }

    /// Create a ledger with an existing metrics collector
    pub fn with_metrics(storage: Arc<Storage>, config: &Config, metrics: Arc<LedgerMetrics>) -> Self {
        Self {
            storage,
            metrics,
            history: config.history.clone(),
        }
    }

    /// Store handle
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Metrics collector
    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    // Accounts

    /// Get the account, creating a zero-balance one if absent
    pub async fn get_or_create_account(&self, user_id: UserId) -> Result<CreditAccount> {
        let storage = self.storage.clone();
        run_blocking(move || storage.atomically(|txn| Self::lock_account(txn, user_id))).await
    }

    /// Get the account without creating it
    pub async fn get_account(&self, user_id: UserId) -> Result<Option<CreditAccount>> {
        let storage = self.storage.clone();
        run_blocking(move || storage.get_account(user_id)).await
    }

    /// Lock the account row for the rest of `txn`, creating it if absent
    pub fn lock_account(txn: &StoreTxn<'_>, user_id: UserId) -> Result<CreditAccount> {
        if let Some(account) = txn.get_for_update::<CreditAccount>(CF_ACCOUNTS, user_id.as_bytes())? {
            return Ok(account);
        }

        let account = CreditAccount::new(user_id, Utc::now());
        txn.put(CF_ACCOUNTS, user_id.as_bytes(), &account)?;
        tracing::debug!(user_id = %user_id, "Credit account created");
        Ok(account)
    }

    // Postings

    /// Credit `request.amount` to the account
    pub async fn earn(&self, request: PostingRequest) -> Result<CreditTransaction> {
        self.post_atomically(request, Direction::Earn).await
    }

    /// Debit `request.amount` from the account.
    ///
    /// Fails with [`Error::InsufficientBalance`] without writing anything when
    /// the spendable balance is too low.
    pub async fn spend(&self, request: PostingRequest) -> Result<CreditTransaction> {
        self.post_atomically(request, Direction::Spend).await
    }

    /// Earn inside a caller-owned transaction
    pub fn earn_in(&self, txn: &StoreTxn<'_>, request: &PostingRequest) -> Result<CreditTransaction> {
        self.post(txn, request, Direction::Earn)
    }

    /// Spend inside a caller-owned transaction
    pub fn spend_in(&self, txn: &StoreTxn<'_>, request: &PostingRequest) -> Result<CreditTransaction> {
        self.post(txn, request, Direction::Spend)
    }

    /// Signed administrative correction.
    ///
    /// Negative deltas take the spend path and cannot overdraw the account.
    pub async fn admin_adjust(
        &self,
        user_id: UserId,
        delta: i64,
        reason: impl Into<String>,
        actor: UserId,
    ) -> Result<CreditTransaction> {
        let direction = match delta {
            0 => return Err(Error::InvalidAmount(0)),
            d if d > 0 => Direction::Earn,
            _ => Direction::Spend,
        };
        let amount = delta.checked_abs().ok_or(Error::InvalidAmount(delta))?;

        let request = PostingRequest::new(user_id, amount, TransactionType::AdminAdjust, reason)
            .with_reference(Reference::Admin)
            .created_by(actor);

        self.post_atomically(request, direction).await
    }

    async fn post_atomically(
        &self,
        request: PostingRequest,
        direction: Direction,
    ) -> Result<CreditTransaction> {
        let started = Instant::now();
        let ledger = self.clone();
        let user_id = request.user_id;

        let result = run_blocking(move || {
            ledger
                .storage
                .atomically(|txn| ledger.post(txn, &request, direction))
        })
        .await;

        self.metrics
            .observe_duration(direction.as_str(), started.elapsed().as_secs_f64());

        match &result {
            Ok(tx) => tracing::info!(
                user_id = %tx.user_id,
                transaction_id = %tx.id,
                transaction_type = %tx.transaction_type,
                amount = tx.amount,
                balance_after = tx.balance_after,
                "Ledger posting committed"
            ),
            Err(err) => tracing::warn!(
                user_id = %user_id,
                direction = direction.as_str(),
                error = %err,
                "Ledger posting rejected"
            ),
        }

        result
    }

    fn post(
        &self,
        txn: &StoreTxn<'_>,
        request: &PostingRequest,
        direction: Direction,
    ) -> Result<CreditTransaction> {
        if request.amount <= 0 {
            self.metrics.record_rejection("invalid_amount");
            return Err(Error::InvalidAmount(request.amount));
        }

        let type_allowed = match direction {
            Direction::Earn => request.transaction_type.allows_earn(),
            Direction::Spend => request.transaction_type.allows_spend(),
        };
        if !type_allowed {
            return Err(Error::InvalidTransactionType {
                transaction_type: request.transaction_type,
                direction: direction.as_str(),
            });
        }

        let signed_amount = match direction {
            Direction::Earn => request.amount,
            Direction::Spend => -request.amount,
        };

        // Serialization point for this user
        let mut account = Self::lock_account(txn, request.user_id)?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = Self::find_by_idempotency_key(txn, request.user_id, key)? {
                if existing.amount != signed_amount
                    || existing.transaction_type != request.transaction_type
                {
                    return Err(Error::IdempotencyConflict { key: key.clone() });
                }
                tracing::debug!(
                    user_id = %request.user_id,
                    transaction_id = %existing.id,
                    "Idempotent replay"
                );
                return Ok(existing);
            }
        }

        let balance_before = account.available_credits;
        match direction {
            Direction::Earn => {
                account.total_credits = account
                    .total_credits
                    .checked_add(request.amount)
                    .ok_or(Error::InvalidAmount(request.amount))?;
                account.available_credits = balance_before
                    .checked_add(request.amount)
                    .ok_or(Error::InvalidAmount(request.amount))?;
            }
            Direction::Spend => {
                if balance_before < request.amount {
                    self.metrics.record_rejection("insufficient_balance");
                    return Err(Error::InsufficientBalance {
                        user_id: request.user_id,
                        available: balance_before,
                        required: request.amount,
                    });
                }
                account.total_credits -= request.amount;
                account.available_credits = balance_before - request.amount;
            }
        }

        let now = Utc::now();
        account.sequence += 1;
        account.updated_at = now;
        account.check_invariants()?;

        let tx = CreditTransaction {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            sequence: account.sequence,
            transaction_type: request.transaction_type,
            amount: signed_amount,
            balance_before,
            balance_after: account.available_credits,
            description: request.description.clone(),
            reference: request.reference,
            created_by: request.created_by,
            idempotency_key: request.idempotency_key.clone(),
            created_at: now,
        };

        let row_key = keys::transaction_row(tx.user_id, tx.sequence);
        txn.put(CF_ACCOUNTS, tx.user_id.as_bytes(), &account)?;
        txn.put(CF_TRANSACTIONS, &row_key, &tx)?;
        txn.put_raw(CF_LEDGER_INDICES, &keys::transaction_index(tx.id), &row_key)?;

        if let Some(key) = &tx.idempotency_key {
            txn.put_raw(
                CF_LEDGER_INDICES,
                &keys::idempotency(tx.user_id, key),
                tx.id.as_bytes(),
            )?;
        }

        if let Some(reference_key) = tx.reference.and_then(|r| r.index_key()) {
            txn.put_raw(
                CF_LEDGER_INDICES,
                &keys::reference(&reference_key, tx.id),
                &row_key,
            )?;
        }

        let metrics = self.metrics.clone();
        let committed = tx.clone();
        txn.on_commit(move || metrics.record_posting(&committed));
        Ok(tx)
    }

    fn find_by_idempotency_key(
        txn: &StoreTxn<'_>,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<CreditTransaction>> {
        let Some(id_bytes) = txn.get_raw(CF_LEDGER_INDICES, &keys::idempotency(user_id, key))? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&id_bytes)
            .map_err(|e| Error::InvariantViolation(format!("corrupt idempotency index: {}", e)))?;
        let row_key = txn
            .get_raw(CF_LEDGER_INDICES, &keys::transaction_index(id))?
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;
        txn.get(CF_TRANSACTIONS, &row_key)
    }

    // Reads

    /// Transaction history, newest first.
    ///
    /// `page` is 1-based; `limit` 0 selects the default page size and larger
    /// values are clamped to the configured maximum.
    pub async fn get_history(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
        type_filter: Option<TransactionType>,
    ) -> Result<HistoryPage> {
        let page = page.max(1);
        let limit = match limit {
            0 => self.history.default_page_size,
            l => l.min(self.history.max_page_size),
        };
        let storage = self.storage.clone();

        run_blocking(move || {
            let skip = u64::from(page - 1) * u64::from(limit);
            let mut transactions = Vec::with_capacity(limit as usize);
            let mut matched = 0u64;

            storage.scan_prefix(
                CF_TRANSACTIONS,
                &keys::transaction_prefix(user_id),
                ScanOrder::Newest,
                |_, value| {
                    let tx: CreditTransaction = bincode::deserialize(value)?;
                    if type_filter.map_or(true, |t| t == tx.transaction_type) {
                        if matched >= skip && transactions.len() < limit as usize {
                            transactions.push(tx);
                        }
                        matched += 1;
                    }
                    // Without a filter the total comes from the account row
                    Ok(type_filter.is_some() || transactions.len() < limit as usize)
                },
            )?;

            let total = match type_filter {
                Some(_) => matched,
                None => storage
                    .get_account(user_id)?
                    .map(|a| a.sequence)
                    .unwrap_or(0),
            };

            Ok(HistoryPage {
                transactions,
                total,
                page,
                limit,
            })
        })
        .await
    }

    /// Get transaction by ID
    pub async fn get_transaction(&self, id: Uuid) -> Result<CreditTransaction> {
        let storage = self.storage.clone();
        run_blocking(move || {
            storage
                .get_transaction(id)?
                .ok_or_else(|| Error::TransactionNotFound(id.to_string()))
        })
        .await
    }

    /// Committed entries caused by `reference`
    pub async fn transactions_for_reference(
        &self,
        reference: Reference,
    ) -> Result<Vec<CreditTransaction>> {
        let storage = self.storage.clone();
        run_blocking(move || storage.transactions_for_reference(reference)).await
    }

    // Settings

    /// Look up an active tunable
    pub async fn get_config(&self, key: &str) -> Result<i64> {
        let storage = self.storage.clone();
        let key = key.to_string();
        run_blocking(move || Self::config_value(&storage, &key)).await
    }

    /// Blocking variant of [`CreditLedger::get_config`]
    pub fn config_value(storage: &Storage, key: &str) -> Result<i64> {
        match storage.get_setting(key)? {
            Some(entry) if entry.is_active => Ok(entry.value),
            _ => Err(Error::ConfigNotFound(key.to_string())),
        }
    }

    /// Insert or replace a tunable
    pub async fn set_config(
        &self,
        key: &str,
        value: i64,
        description: &str,
        is_active: bool,
    ) -> Result<ConfigEntry> {
        let storage = self.storage.clone();
        let entry = ConfigEntry {
            key: key.to_string(),
            value,
            description: description.to_string(),
            is_active,
            updated_at: Utc::now(),
        };

        let stored = run_blocking(move || {
            storage.atomically(|txn| {
                txn.lock_raw(CF_SETTINGS, entry.key.as_bytes())?;
                txn.put(CF_SETTINGS, entry.key.as_bytes(), &entry)?;
                Ok::<_, Error>(entry)
            })
        })
        .await?;

        tracing::info!(key = %stored.key, value = stored.value, active = stored.is_active, "Setting updated");
        Ok(stored)
    }

    /// Insert reward defaults that are not present yet; returns how many were added
    pub async fn seed_defaults(&self, rewards: &crate::config::RewardsConfig) -> Result<usize> {
        let storage = self.storage.clone();
        let entries: Vec<(String, i64, String)> = rewards
            .entries()
            .into_iter()
            .map(|(k, v, d)| (k.to_string(), v, d.to_string()))
            .collect();

        let inserted = run_blocking(move || {
            storage.atomically(|txn| {
                let mut inserted = 0;
                for (key, value, description) in &entries {
                    if txn.lock_raw(CF_SETTINGS, key.as_bytes())?.is_some() {
                        continue;
                    }
                    let entry = ConfigEntry {
                        key: key.clone(),
                        value: *value,
                        description: description.clone(),
                        is_active: true,
                        updated_at: Utc::now(),
                    };
                    txn.put(CF_SETTINGS, key.as_bytes(), &entry)?;
                    inserted += 1;
                }
                Ok::<_, Error>(inserted)
            })
        })
        .await?;

        tracing::info!(inserted, "Reward defaults seeded");
        Ok(inserted)
    }

    // Audit

    /// Walk a user's chain and check every ledger invariant
    pub async fn verify_chain(&self, user_id: UserId) -> Result<ChainReport> {
        let storage = self.storage.clone();
        run_blocking(move || Self::verify_chain_blocking(&storage, user_id)).await
    }

    fn verify_chain_blocking(storage: &Storage, user_id: UserId) -> Result<ChainReport> {
        let account = storage
            .get_account(user_id)?
            .unwrap_or_else(|| CreditAccount::new(user_id, Utc::now()));
        account.check_invariants()?;

        let mut expected_sequence = 1u64;
        let mut previous_after = 0i64;
        let mut net_amount = 0i64;

        storage.scan_prefix(
            CF_TRANSACTIONS,
            &keys::transaction_prefix(user_id),
            ScanOrder::Oldest,
            |_, value| {
                let tx: CreditTransaction = bincode::deserialize(value)?;
                if tx.sequence != expected_sequence {
                    return Err(Error::InvariantViolation(format!(
                        "gap in chain for {}: expected sequence {}, found {}",
                        user_id, expected_sequence, tx.sequence
                    )));
                }
                if tx.balance_before != previous_after {
                    return Err(Error::InvariantViolation(format!(
                        "chain break for {} at sequence {}: balance_before {} != previous balance_after {}",
                        user_id, tx.sequence, tx.balance_before, previous_after
                    )));
                }
                if tx.balance_after != tx.balance_before + tx.amount {
                    return Err(Error::InvariantViolation(format!(
                        "entry {} does not add up: {} + {} != {}",
                        tx.id, tx.balance_before, tx.amount, tx.balance_after
                    )));
                }
                if tx.balance_after < 0 {
                    return Err(Error::InvariantViolation(format!(
                        "entry {} leaves a negative balance",
                        tx.id
                    )));
                }
                previous_after = tx.balance_after;
                net_amount += tx.amount;
                expected_sequence += 1;
                Ok(true)
            },
        )?;

        let transaction_count = expected_sequence - 1;
        if transaction_count != account.sequence {
            return Err(Error::InvariantViolation(format!(
                "account {} records {} entries but the log holds {}",
                user_id, account.sequence, transaction_count
            )));
        }
        if previous_after != account.available_credits {
            return Err(Error::InvariantViolation(format!(
                "account {} available {} != last balance_after {}",
                user_id, account.available_credits, previous_after
            )));
        }

        Ok(ChainReport {
            user_id,
            transaction_count,
            available_credits: account.available_credits,
            net_amount,
        })
    }
}
