//! Order column families and key layouts
//!
//! # Column Families
//!
//! - `orders` - Orders (key: order_id)
//! - `order_indices` - Number, buyer, seller and completed-purchase indices
//! - `downloads` - Download records (key: order_id || created_at || download_id)
//!
//! Buyer, seller and download keys embed the creation time, so prefix scans
//! follow creation order.

use crate::{types::Order, Error, Result};
use credit_ledger::{
    storage::ScanOrder, Config as LedgerConfig, OrderId, ProjectId, Storage, StoreTxn, UserId,
};

/// Orders
pub const CF_ORDERS: &str = "orders";
/// Order secondary indices
pub const CF_ORDER_INDICES: &str = "order_indices";
/// Download records
pub const CF_DOWNLOADS: &str = "downloads";

/// Families the order engine needs in the shared store
pub const COLUMN_FAMILIES: [&str; 3] = [CF_ORDERS, CF_ORDER_INDICES, CF_DOWNLOADS];

/// Open the shared store with the ledger and order families
pub fn open_storage(config: &LedgerConfig) -> credit_ledger::Result<Storage> {
    Storage::open_with_families(config, &COLUMN_FAMILIES)
}

/// Key layouts
pub mod keys {
    use chrono::{DateTime, Utc};
    use credit_ledger::{OrderId, ProjectId, UserId};

    const TAG_NUMBER: u8 = b'n';
    const TAG_BUYER: u8 = b'b';
    const TAG_SELLER: u8 = b's';
    const TAG_PURCHASE: u8 = b'p';

    /// `orders` row
    pub fn order(id: OrderId) -> Vec<u8> {
        id.as_bytes().to_vec()
    }

    /// Index: order number -> order id
    pub fn order_number(number: &str) -> Vec<u8> {
        let mut key = vec![TAG_NUMBER];
        key.extend_from_slice(number.as_bytes());
        key
    }

    /// Prefix of a buyer's orders
    pub fn buyer_prefix(buyer_id: UserId) -> Vec<u8> {
        let mut key = vec![TAG_BUYER];
        key.extend_from_slice(buyer_id.as_bytes());
        key
    }

    /// Index: buyer || created_at (µs, BE) || order id
    pub fn buyer_order(buyer_id: UserId, created_at: DateTime<Utc>, id: OrderId) -> Vec<u8> {
        let mut key = buyer_prefix(buyer_id);
        push_timestamp(&mut key, created_at);
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Prefix of a seller's orders
    pub fn seller_prefix(seller_id: UserId) -> Vec<u8> {
        let mut key = vec![TAG_SELLER];
        key.extend_from_slice(seller_id.as_bytes());
        key
    }

    /// Index: seller || created_at (µs, BE) || order id
    pub fn seller_order(seller_id: UserId, created_at: DateTime<Utc>, id: OrderId) -> Vec<u8> {
        let mut key = seller_prefix(seller_id);
        push_timestamp(&mut key, created_at);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn push_timestamp(key: &mut Vec<u8>, at: DateTime<Utc>) {
        let micros = u64::try_from(at.timestamp_micros()).unwrap_or(0);
        key.extend_from_slice(&micros.to_be_bytes());
    }

    /// Completed purchase of a project by a buyer -> completed order id.
    ///
    /// Also the lock that serializes order creation for the pair.
    pub fn purchase(buyer_id: UserId, project_id: ProjectId) -> Vec<u8> {
        let mut key = vec![TAG_PURCHASE];
        key.extend_from_slice(buyer_id.as_bytes());
        key.extend_from_slice(project_id.as_bytes());
        key
    }

    /// Prefix of an order's downloads
    pub fn download_prefix(order_id: OrderId) -> Vec<u8> {
        order_id.as_bytes().to_vec()
    }

    /// `downloads` row: order id || created_at (µs, BE) || download id
    pub fn download(order_id: OrderId, created_at: DateTime<Utc>, download_id: uuid::Uuid) -> Vec<u8> {
        let mut key = download_prefix(order_id);
        push_timestamp(&mut key, created_at);
        key.extend_from_slice(download_id.as_bytes());
        key
    }
}

pub(crate) fn decode_order_id(bytes: &[u8]) -> Result<OrderId> {
    uuid::Uuid::from_slice(bytes)
        .map(OrderId::from_uuid)
        .map_err(|e| {
            Error::Ledger(credit_ledger::Error::InvariantViolation(format!(
                "corrupt order index entry: {}",
                e
            )))
        })
}

/// Lock the order row for the rest of `txn`
pub(crate) fn lock_order(txn: &StoreTxn<'_>, id: OrderId) -> Result<Order> {
    txn.get_for_update(CF_ORDERS, &keys::order(id))?
        .ok_or_else(|| Error::OrderNotFound(id.to_string()))
}

/// Lock the completed-purchase key; returns the completed order holding it
pub(crate) fn lock_purchase(
    txn: &StoreTxn<'_>,
    buyer_id: UserId,
    project_id: ProjectId,
) -> Result<Option<OrderId>> {
    txn.lock_raw(CF_ORDER_INDICES, &keys::purchase(buyer_id, project_id))?
        .map(|bytes| decode_order_id(&bytes))
        .transpose()
}

pub(crate) fn put_order(txn: &StoreTxn<'_>, order: &Order) -> Result<()> {
    txn.put(CF_ORDERS, &keys::order(order.id), order)?;
    Ok(())
}

/// Committed read of an order
pub(crate) fn load_order(storage: &Storage, id: OrderId) -> Result<Order> {
    storage
        .get(CF_ORDERS, &keys::order(id))?
        .ok_or_else(|| Error::OrderNotFound(id.to_string()))
}

/// Order ids under an index prefix, newest first
pub(crate) fn indexed_order_ids(storage: &Storage, prefix: &[u8]) -> Result<Vec<OrderId>> {
    let mut ids = Vec::new();
    storage.scan_prefix(CF_ORDER_INDICES, prefix, ScanOrder::Newest, |key, _| {
        // The order id is the key's last 16 bytes
        let id_bytes = key.get(key.len().saturating_sub(16)..).unwrap_or_default();
        match uuid::Uuid::from_slice(id_bytes) {
            Ok(id) => {
                ids.push(OrderId::from_uuid(id));
                Ok(true)
            }
            Err(e) => Err(credit_ledger::Error::InvariantViolation(format!(
                "corrupt order index key: {}",
                e
            ))),
        }
    })?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_keys_are_disjoint() {
        let user = UserId::new();
        let order = OrderId::new();
        let now = chrono::Utc::now();
        assert_ne!(keys::buyer_order(user, now, order), keys::seller_order(user, now, order));
        assert!(keys::buyer_order(user, now, order).starts_with(&keys::buyer_prefix(user)));

        let earlier = now - chrono::Duration::seconds(1);
        assert!(keys::buyer_order(user, earlier, OrderId::new()) < keys::buyer_order(user, now, order));
        assert_eq!(keys::purchase(user, ProjectId::new()).len(), 33);
    }

    #[test]
    fn test_open_storage_registers_families() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = LedgerConfig::default();
        config.data_dir = temp.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        let storage = open_storage(&config).unwrap();
        for cf in COLUMN_FAMILIES {
            assert!(storage.has_family(cf));
        }
    }
}
