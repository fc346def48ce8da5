//! Read-only order queries

use crate::{
    engine::OrderEngine,
    store::{self, keys, CF_ORDER_INDICES},
    types::{Order, OrderStatus, SellerSalesStats},
    Error, Result,
};
use credit_ledger::{run_blocking, OrderId, ProjectId, UserId};
use std::collections::HashSet;

impl OrderEngine {
    /// Get order by ID
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let storage = self.storage.clone();
        run_blocking(move || store::load_order(&storage, order_id)).await
    }

    /// Get order by its human-readable number
    pub async fn get_order_by_number(&self, order_number: &str) -> Result<Order> {
        let storage = self.storage.clone();
        let order_number = order_number.to_string();
        run_blocking(move || {
            let bytes = storage
                .get_raw(CF_ORDER_INDICES, &keys::order_number(&order_number))?
                .ok_or_else(|| Error::OrderNotFound(order_number.clone()))?;
            let order_id = store::decode_order_id(&bytes)?;
            store::load_order(&storage, order_id)
        })
        .await
    }

    /// A buyer's orders, newest first.
    ///
    /// `limit` 0 selects the default page size and larger values are clamped
    /// to the configured maximum.
    pub async fn get_user_purchase_history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Order>> {
        let storage = self.storage.clone();
        let limit = match limit {
            0 => self.config.default_history_page_size,
            l => l.min(self.config.max_history_page_size),
        } as usize;

        run_blocking(move || {
            let ids = store::indexed_order_ids(&storage, &keys::buyer_prefix(user_id))?;
            let orders = ids
                .into_iter()
                .skip(offset as usize)
                .take(limit)
                .map(|id| store::load_order(&storage, id))
                .collect::<Result<Vec<_>>>()?;
            tracing::debug!(user_id = %user_id, count = orders.len(), "Loaded purchase history");
            Ok(orders)
        })
        .await
    }

    /// Order counts per status, completed revenue and distinct paying buyers
    pub async fn get_seller_sales_stats(&self, seller_id: UserId) -> Result<SellerSalesStats> {
        let storage = self.storage.clone();

        run_blocking(move || {
            let mut stats = SellerSalesStats::default();
            let mut buyers = HashSet::new();

            for id in store::indexed_order_ids(&storage, &keys::seller_prefix(seller_id))? {
                let order = store::load_order(&storage, id)?;
                stats.total_orders += 1;
                match order.status {
                    OrderStatus::Pending => stats.pending_orders += 1,
                    OrderStatus::Processing => stats.processing_orders += 1,
                    OrderStatus::Completed => {
                        stats.completed_orders += 1;
                        stats.total_revenue += order.final_amount;
                        buyers.insert(order.buyer_id);
                    }
                    OrderStatus::Cancelled => stats.cancelled_orders += 1,
                    OrderStatus::Refunded => stats.refunded_orders += 1,
                }
            }

            stats.unique_buyers = buyers.len() as u64;
            Ok(stats)
        })
        .await
    }

    /// Whether the user holds a completed purchase of the project
    pub async fn check_user_purchased(&self, user_id: UserId, project_id: ProjectId) -> Result<bool> {
        let storage = self.storage.clone();
        run_blocking(move || {
            Ok(storage.contains(CF_ORDER_INDICES, &keys::purchase(user_id, project_id))?)
        })
        .await
    }
}
