//! SrcMarket Credit Ledger
//!
//! Per-user credit accounts backed by an append-only transaction log.
//!
//! # Architecture
//!
//! - **Row locks**: every posting locks the owner's account row inside a
//!   RocksDB pessimistic transaction, so concurrent spends serialize
//! - **Append-only**: entries are written once and never updated or deleted
//! - **Composable**: `earn_in` / `spend_in` let another engine fold a posting
//!   into its own atomic unit
//!
//! # Invariants
//!
//! - `available_credits >= 0` at every commit
//! - `balance_after = balance_before + amount` for every entry
//! - The newest entry's `balance_after` equals the account's
//!   `available_credits`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod rewards;
pub mod error;
pub mod config;
pub mod metrics;
pub mod task;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    ChainReport, ConfigEntry, CreditAccount, CreditTransaction, HistoryPage, OrderId,
    PostingRequest, ProjectId, Reference, TransactionType, UserId,
};
pub use storage::{Storage, StoreTxn};
pub use ledger::CreditLedger;
pub use config::Config;
pub use metrics::LedgerMetrics;
pub use task::run_blocking;
