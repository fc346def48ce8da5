//! Fulfillment records

use crate::{
    engine::OrderEngine,
    store::{self, keys, CF_DOWNLOADS},
    types::{NewDownload, Order, OrderDownload, OrderStatus},
    Error, Result,
};
use chrono::Utc;
use credit_ledger::{run_blocking, storage::ScanOrder, OrderId, UserId};
use uuid::Uuid;

fn ensure_buyer(order: &Order, user_id: UserId) -> Result<()> {
    if order.buyer_id != user_id {
        return Err(Error::PermissionDenied(format!(
            "user {} is not the buyer of order {}",
            user_id, order.id
        )));
    }
    Ok(())
}

impl OrderEngine {
    /// Record a file access for a completed order.
    ///
    /// Only the buyer of a `completed` order may download; anything else is
    /// [`Error::PermissionDenied`].
    pub async fn record_download(
        &self,
        order_id: OrderId,
        user_id: UserId,
        download: NewDownload,
    ) -> Result<OrderDownload> {
        self.instrumented("record_download", async {
            let storage = self.storage.clone();
            let record = run_blocking(move || {
                storage.atomically(|txn| {
                    // Shared with refunds, so a refunded order cannot be downloaded
                    let order = store::lock_order(txn, order_id)?;
                    ensure_buyer(&order, user_id)?;
                    if order.status != OrderStatus::Completed {
                        return Err(Error::PermissionDenied(format!(
                            "order {} is {}",
                            order.id, order.status
                        )));
                    }

                    let record = OrderDownload {
                        id: Uuid::now_v7(),
                        order_id,
                        user_id,
                        file_url: download.file_url,
                        file_name: download.file_name,
                        file_size: download.file_size,
                        download_ip: download.download_ip,
                        user_agent: download.user_agent,
                        created_at: Utc::now(),
                    };
                    txn.put(
                        CF_DOWNLOADS,
                        &keys::download(order_id, record.created_at, record.id),
                        &record,
                    )?;
                    Ok::<_, Error>(record)
                })
            })
            .await?;

            self.metrics.downloads_total.inc();
            tracing::info!(
                order_id = %record.order_id,
                user_id = %record.user_id,
                file_name = %record.file_name,
                "Download recorded"
            );
            Ok::<_, Error>(record)
        })
        .await
    }

    /// Downloads for an order, oldest first; buyer only
    pub async fn list_downloads(&self, order_id: OrderId, requester: UserId) -> Result<Vec<OrderDownload>> {
        self.instrumented("list_downloads", async {
            let storage = self.storage.clone();
            run_blocking(move || {
                let order = store::load_order(&storage, order_id)?;
                ensure_buyer(&order, requester)?;
                let downloads: Vec<OrderDownload> = storage.collect_prefix(
                    CF_DOWNLOADS,
                    &keys::download_prefix(order_id),
                    ScanOrder::Oldest,
                )?;
                tracing::debug!(order_id = %order_id, count = downloads.len(), "Listed downloads");
                Ok::<_, Error>(downloads)
            })
            .await
        })
        .await
    }
}
