//! Order number allocation
//!
//! Numbers look like `EC2026101912345678`: prefix, UTC date, eight random
//! digits. A candidate is reserved by locking and writing its index key in
//! the caller's transaction; collisions retry up to a fixed cap.

use crate::{
    store::{keys, CF_ORDER_INDICES},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use credit_ledger::{OrderId, StoreTxn};
use rand::Rng;

const RANDOM_DIGITS: u32 = 8;

/// Generates and reserves order numbers
#[derive(Debug, Clone)]
pub struct OrderNumberAllocator {
    prefix: String,
    max_attempts: u32,
    digits: u32,
}

impl OrderNumberAllocator {
    /// Allocator with the configured prefix and retry cap
    pub fn new(config: &Config) -> Self {
        Self {
            prefix: config.order_number_prefix.clone(),
            max_attempts: config.order_number_max_attempts,
            digits: RANDOM_DIGITS,
        }
    }

    /// Candidate number for `now`; not yet reserved
    pub fn generate(&self, now: DateTime<Utc>) -> String {
        let upper = 10u64.pow(self.digits);
        let suffix = rand::thread_rng().gen_range(0..upper);
        format!(
            "{}{}{:0width$}",
            self.prefix,
            now.format("%Y%m%d"),
            suffix,
            width = self.digits as usize
        )
    }

    /// Reserve an unused number for `order_id` inside `txn`.
    ///
    /// Fails with a storage error once the retry cap is exhausted.
    pub fn reserve_in(&self, txn: &StoreTxn<'_>, order_id: OrderId, now: DateTime<Utc>) -> Result<String> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generate(now);
            let key = keys::order_number(&candidate);

            // Locks the key even when absent, so two writers cannot both claim it
            if txn.lock_raw(CF_ORDER_INDICES, &key)?.is_some() {
                tracing::debug!(order_number = %candidate, attempt, "Order number collision");
                continue;
            }

            txn.put_raw(CF_ORDER_INDICES, &key, order_id.as_bytes())?;
            return Ok(candidate);
        }

        tracing::warn!(attempts = self.max_attempts, "Order number allocation exhausted");
        Err(Error::Ledger(credit_ledger::Error::Storage(format!(
            "no unused order number after {} attempts",
            self.max_attempts
        ))))
    }

    #[cfg(test)]
    fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits;
        self
    }
}
