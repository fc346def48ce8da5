//! Storage layer using RocksDB
//!
//! The store is a pessimistic `TransactionDB`. Every mutation runs inside one
//! RocksDB transaction; `get_for_update` takes an exclusive lock on the key so
//! check-then-write sequences cannot interleave with another writer.
//!
//! # Column Families
//!
//! - `accounts` - Credit accounts (key: user_id)
//! - `transactions` - Append-only log (key: user_id || sequence)
//! - `ledger_indices` - Secondary indices (tx id, idempotency key, reference)
//! - `settings` - Tunables (key: setting name)
//!
//! Other crates register extra families at open time (see
//! [`Storage::open_with_families`]).

use crate::{
    error::{Error, Result},
    types::{ConfigEntry, CreditAccount, CreditTransaction, Reference, UserId},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, MultiThreaded, Options,
    Transaction, TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
pub const CF_ACCOUNTS: &str = "accounts";
/// Transaction log
pub const CF_TRANSACTIONS: &str = "transactions";
/// Ledger secondary indices
pub const CF_LEDGER_INDICES: &str = "ledger_indices";
/// Tunables
pub const CF_SETTINGS: &str = "settings";

const LEDGER_FAMILIES: [&str; 4] = [CF_ACCOUNTS, CF_TRANSACTIONS, CF_LEDGER_INDICES, CF_SETTINGS];

type Db = TransactionDB<MultiThreaded>;

/// Scan direction for prefix iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Ascending key order
    Oldest,
    /// Descending key order
    Newest,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Db,
    path: PathBuf,
    families: Vec<String>,
    lock_timeout_ms: i64,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.path)
            .field("families", &self.families)
            .finish()
    }
}

impl Storage {
    /// Open or create the ledger database
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with_families(config, &[])
    }

    /// Open or create the database with extra column families
    pub fn open_with_families(config: &Config, extra: &[&str]) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.rocksdb.lock_timeout_ms);

        let mut families: Vec<String> = Vec::new();
        for name in LEDGER_FAMILIES.iter().chain(extra.iter()) {
            if !families.iter().any(|f| f == name) {
                families.push(name.to_string());
            }
        }

        // Every existing family has to be opened, including ones this caller
        // did not ask for.
        if let Ok(existing) = DB::list_cf(&db_opts, path) {
            for name in existing {
                if name != rocksdb::DEFAULT_COLUMN_FAMILY_NAME && !families.contains(&name) {
                    families.push(name);
                }
            }
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = families
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Self::cf_options(name)))
            .collect();

        let db: Db = TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            families = families.len(),
            "Opened ledger store"
        );

        Ok(Self {
            db,
            path: path.clone(),
            families,
            lock_timeout_ms: config.rocksdb.lock_timeout_ms,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            CF_TRANSACTIONS => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
                opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            CF_LEDGER_INDICES => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                // Point lookups dominate
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a column family was opened
    pub fn has_family(&self, name: &str) -> bool {
        self.families.iter().any(|f| f == name)
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Transactions

    /// Begin a pessimistic transaction
    pub fn begin(&self) -> StoreTxn<'_> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.lock_timeout_ms);
        txn_opts.set_deadlock_detect(true);

        StoreTxn {
            storage: self,
            inner: self.db.transaction_opt(&write_opts, &txn_opts),
            on_commit: RefCell::new(Vec::new()),
        }
    }

    /// Run `f` in one transaction, committing iff it returns `Ok`.
    ///
    /// On `Err` every write made through the transaction is discarded.
    pub fn atomically<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<Error>,
        F: FnOnce(&StoreTxn<'_>) -> std::result::Result<T, E>,
    {
        let txn = self.begin();
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    // Committed reads

    /// Read raw bytes
    pub fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.cf(cf)?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    /// Read and decode a value
    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        decode(self.get_raw(cf, key)?)
    }

    /// Whether a key exists
    pub fn contains(&self, cf: &str, key: &[u8]) -> Result<bool> {
        Ok(self.get_raw(cf, key)?.is_some())
    }

    /// Visit every entry whose key starts with `prefix`.
    ///
    /// The visitor returns `false` to stop early.
    pub fn scan_prefix<F>(&self, cf: &str, prefix: &[u8], order: ScanOrder, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let handle = self.cf(cf)?;

        // Reverse scans seek to the last possible key under the prefix
        let upper = prefix_upper_bound(prefix);
        let mode = match order {
            ScanOrder::Oldest => IteratorMode::From(prefix, Direction::Forward),
            ScanOrder::Newest => IteratorMode::From(upper.as_slice(), Direction::Reverse),
        };

        for item in self.db.iterator_cf(&handle, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(&key[..], &value[..])? {
                break;
            }
        }

        Ok(())
    }

    /// Decode every value under `prefix`
    pub fn collect_prefix<T: DeserializeOwned>(
        &self,
        cf: &str,
        prefix: &[u8],
        order: ScanOrder,
    ) -> Result<Vec<T>> {
        let mut values = Vec::new();
        self.scan_prefix(cf, prefix, order, |_, value| {
            values.push(bincode::deserialize(value)?);
            Ok(true)
        })?;
        Ok(values)
    }

    // Ledger reads

    /// Get account by user
    pub fn get_account(&self, user_id: UserId) -> Result<Option<CreditAccount>> {
        self.get(CF_ACCOUNTS, user_id.as_bytes())
    }

    /// Get transaction by ID (via index)
    pub fn get_transaction(&self, id: Uuid) -> Result<Option<CreditTransaction>> {
        match self.get_raw(CF_LEDGER_INDICES, &keys::transaction_index(id))? {
            Some(row_key) => self.get(CF_TRANSACTIONS, &row_key),
            None => Ok(None),
        }
    }

    /// Committed entries that carry `reference`, in index order
    pub fn transactions_for_reference(&self, reference: Reference) -> Result<Vec<CreditTransaction>> {
        let Some(reference_key) = reference.index_key() else {
            return Ok(Vec::new());
        };

        let mut row_keys = Vec::new();
        self.scan_prefix(
            CF_LEDGER_INDICES,
            &keys::reference_prefix(&reference_key),
            ScanOrder::Oldest,
            |_, row_key| {
                row_keys.push(row_key.to_vec());
                Ok(true)
            },
        )?;

        let mut transactions = Vec::with_capacity(row_keys.len());
        for row_key in row_keys {
            let tx = self.get(CF_TRANSACTIONS, &row_key)?.ok_or_else(|| {
                Error::InvariantViolation("reference index points at a missing entry".to_string())
            })?;
            transactions.push(tx);
        }
        Ok(transactions)
    }

    /// Get setting by key
    pub fn get_setting(&self, key: &str) -> Result<Option<ConfigEntry>> {
        self.get(CF_SETTINGS, key.as_bytes())
    }

    /// All settings, ordered by key
    pub fn list_settings(&self) -> Result<Vec<ConfigEntry>> {
        self.collect_prefix(CF_SETTINGS, &[], ScanOrder::Oldest)
    }

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        self.scan_prefix(CF_ACCOUNTS, &[], ScanOrder::Oldest, |_, value| {
            let account: CreditAccount = bincode::deserialize(value)?;
            stats.total_accounts += 1;
            stats.total_transactions += account.sequence;
            stats.total_available += account.available_credits;
            Ok(true)
        })?;
        Ok(stats)
    }
}

/// Open transaction against the store
pub struct StoreTxn<'a> {
    storage: &'a Storage,
    inner: Transaction<'a, Db>,
    on_commit: RefCell<Vec<Box<dyn FnOnce() + 'a>>>,
}

impl std::fmt::Debug for StoreTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTxn")
            .field("path", &self.storage.path)
            .field("on_commit", &self.on_commit.borrow().len())
            .finish()
    }
}

impl<'a> StoreTxn<'a> {
    /// Store this transaction belongs to
    pub fn storage(&self) -> &'a Storage {
        self.storage
    }

    /// Read without locking (sees this transaction's own writes)
    pub fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.storage.cf(cf)?;
        Ok(self.inner.get_cf(&handle, key)?)
    }

    /// Read and exclusively lock `key` until commit/rollback.
    ///
    /// The lock is taken even when the key does not exist, which is how
    /// uniqueness keys are serialized.
    pub fn lock_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.storage.cf(cf)?;
        Ok(self.inner.get_for_update_cf(&handle, key, true)?)
    }

    /// Read and decode without locking
    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        decode(self.get_raw(cf, key)?)
    }

    /// Read, decode and exclusively lock
    pub fn get_for_update<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        decode(self.lock_raw(cf, key)?)
    }

    /// Write raw bytes
    pub fn put_raw(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let handle = self.storage.cf(cf)?;
        self.inner.put_cf(&handle, key, value)?;
        Ok(())
    }

    /// Encode and write
    pub fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.put_raw(cf, key, &bytes)
    }

    /// Delete a key
    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        let handle = self.storage.cf(cf)?;
        self.inner.delete_cf(&handle, key)?;
        Ok(())
    }

    /// Run `hook` once this transaction has committed.
    ///
    /// Hooks are dropped unrun on rollback or a failed commit.
    pub fn on_commit(&self, hook: impl FnOnce() + 'a) {
        self.on_commit.borrow_mut().push(Box::new(hook));
    }

    /// Commit all writes atomically, then run the commit hooks in order
    pub fn commit(self) -> Result<()> {
        let hooks = self.on_commit.into_inner();
        self.inner.commit()?;
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    /// Discard all writes
    pub fn rollback(&self) -> Result<()> {
        self.inner.rollback()?;
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    /// Number of accounts
    pub total_accounts: u64,
    /// Number of ledger entries
    pub total_transactions: u64,
    /// Sum of spendable balances
    pub total_available: i64,
}

fn decode<T: DeserializeOwned>(bytes: Option<Vec<u8>>) -> Result<Option<T>> {
    bytes
        .map(|b| bincode::deserialize(&b))
        .transpose()
        .map_err(Error::from)
}

fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut upper = prefix.to_vec();
    upper.extend_from_slice(&[0xFF; 64]);
    upper
}

/// Key layouts for the ledger families
pub mod keys {
    use crate::types::UserId;
    use uuid::Uuid;

    const TAG_TRANSACTION: u8 = b't';
    const TAG_IDEMPOTENCY: u8 = b'i';
    const TAG_REFERENCE: u8 = b'r';

    /// `transactions` row: user_id || sequence (big-endian)
    pub fn transaction_row(user_id: UserId, sequence: u64) -> Vec<u8> {
        let mut key = user_id.as_bytes().to_vec();
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    /// Prefix of every `transactions` row for a user
    pub fn transaction_prefix(user_id: UserId) -> Vec<u8> {
        user_id.as_bytes().to_vec()
    }

    /// Index: tx id -> row key
    pub fn transaction_index(id: Uuid) -> Vec<u8> {
        let mut key = vec![TAG_TRANSACTION];
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Index: user || idempotency key -> tx id
    pub fn idempotency(user_id: UserId, idempotency_key: &str) -> Vec<u8> {
        let mut key = vec![TAG_IDEMPOTENCY];
        key.extend_from_slice(user_id.as_bytes());
        key.extend_from_slice(idempotency_key.as_bytes());
        key
    }

    /// Index prefix for a reference
    pub fn reference_prefix(reference: &[u8; 17]) -> Vec<u8> {
        let mut key = vec![TAG_REFERENCE];
        key.extend_from_slice(reference);
        key
    }

    /// Index: reference || tx id -> row key
    pub fn reference(reference: &[u8; 17], id: Uuid) -> Vec<u8> {
        let mut key = reference_prefix(reference);
        key.extend_from_slice(id.as_bytes());
        key
    }
}
