//! Order state machine
//!
//! Every mutation is one store transaction. Lock order is fixed: order row,
//! then the buyer/project purchase key, then the buyer's ledger account, then
//! order-number keys. Ledger postings go through the ledger's `*_in`
//! operations so they commit or roll back together with the order row.

use crate::{
    catalog::ProjectCatalog,
    metrics::OrderMetrics,
    order_number::OrderNumberAllocator,
    store::{self, keys, CF_ORDER_INDICES, COLUMN_FAMILIES},
    types::{Order, OrderStatus, PaymentMethod, ProjectListing},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use credit_ledger::{
    run_blocking, CreditLedger, OrderId, PostingRequest, ProjectId, Reference, Storage, StoreTxn,
    TransactionType, UserId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Result of a settlement attempt. A rejection still commits: the order is
/// cancelled with a reason rather than left open.
enum Settled {
    Completed(Order),
    Rejected(Order, Error),
}

/// Main order interface
#[derive(Clone, Debug)]
pub struct OrderEngine {
    pub(crate) storage: Arc<Storage>,
    pub(crate) ledger: CreditLedger,
    pub(crate) catalog: Arc<dyn ProjectCatalog>,
    pub(crate) numbers: OrderNumberAllocator,
    pub(crate) metrics: Arc<OrderMetrics>,
    pub(crate) config: Config,
}

impl OrderEngine {
    /// Create an engine sharing the ledger's store.
    ///
    /// The store must have been opened with [`store::open_storage`].
    pub fn new(ledger: CreditLedger, catalog: Arc<dyn ProjectCatalog>, config: &Config) -> Result<Self> {
        config.validate()?;

        let storage = ledger.storage().clone();
        if let Some(missing) = COLUMN_FAMILIES.iter().find(|cf| !storage.has_family(cf)) {
            return Err(Error::Config(format!(
                "store at {} has no {} column family; open it with order_engine::open_storage",
                storage.path().display(),
                missing
            )));
        }

        let metrics = OrderMetrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        Ok(Self {
            storage,
            ledger,
            catalog,
            numbers: OrderNumberAllocator::new(config),
            metrics: Arc::new(metrics),
            config: config.clone(),
        })
    }

    /// Ledger this engine settles against
    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// Metrics collector
    pub fn metrics(&self) -> &OrderMetrics {
        &self.metrics
    }

    /// Order number allocator
    pub fn order_numbers(&self) -> &OrderNumberAllocator {
        &self.numbers
    }

    pub(crate) async fn instrumented<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.metrics
            .observe_duration(operation, started.elapsed().as_secs_f64());

        if let Err(err) = &result {
            self.metrics.record_rejection(rejection_reason(err));
            tracing::warn!(operation, error = %err, "Order action rejected");
        }
        result
    }

    // Creation

    /// Place an order for a published project.
    ///
    /// Credits orders start in `processing` after a balance pre-check; other
    /// methods start in `pending`. Creation is serialized per buyer and
    /// project by the purchase key lock.
    pub async fn create_order(
        &self,
        buyer_id: UserId,
        project_id: ProjectId,
        payment_method: PaymentMethod,
        buyer_note: Option<String>,
    ) -> Result<Order> {
        self.instrumented("create_order", async {
            let project = self
                .catalog
                .project(project_id)
                .filter(|p| p.status.is_purchasable())
                .ok_or(Error::ProjectNotFound(project_id))?;

            if project.seller_id == buyer_id {
                return Err(Error::SelfPurchaseForbidden {
                    buyer_id,
                    project_id,
                });
            }
            if project.price < 0 {
                return Err(credit_ledger::Error::InvalidAmount(project.price).into());
            }

            let engine = self.clone();
            let order = run_blocking(move || {
                engine.storage.atomically(|txn| {
                    engine.create_in(txn, buyer_id, &project, payment_method, buyer_note)
                })
            })
            .await?;

            self.metrics.record_created(order.payment_method);
            tracing::info!(
                order_id = %order.id,
                order_number = %order.order_number,
                buyer_id = %order.buyer_id,
                project_id = %order.project_id,
                amount = order.final_amount,
                payment_method = %order.payment_method,
                status = %order.status,
                "Order created"
            );
            Ok::<_, Error>(order)
        })
        .await
    }

    fn create_in(
        &self,
        txn: &StoreTxn<'_>,
        buyer_id: UserId,
        project: &ProjectListing,
        payment_method: PaymentMethod,
        buyer_note: Option<String>,
    ) -> Result<Order> {
        if store::lock_purchase(txn, buyer_id, project.id)?.is_some() {
            return Err(Error::AlreadyPurchased {
                buyer_id,
                project_id: project.id,
            });
        }

        let original_price = project.price;
        let discount_amount = 0;
        let final_amount = original_price - discount_amount;

        // Advisory only; settlement re-checks under the account lock
        if payment_method == PaymentMethod::Credits && final_amount > 0 {
            let available = self
                .storage
                .get_account(buyer_id)?
                .map(|a| a.available_credits)
                .unwrap_or(0);
            if available < final_amount {
                return Err(credit_ledger::Error::InsufficientBalance {
                    user_id: buyer_id,
                    available,
                    required: final_amount,
                }
                .into());
            }
        }

        let now = Utc::now();
        let id = OrderId::new();
        let order_number = self.numbers.reserve_in(txn, id, now)?;
        let status = match payment_method {
            PaymentMethod::Credits => OrderStatus::Processing,
            _ => OrderStatus::Pending,
        };

        let order = Order {
            id,
            order_number,
            buyer_id,
            seller_id: project.seller_id,
            project_id: project.id,
            original_price,
            discount_amount,
            final_amount,
            payment_method,
            status,
            buyer_note,
            seller_note: None,
            admin_note: None,
            cancel_reason: None,
            settlement_transaction_id: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
            cancelled_at: None,
            refunded_at: None,
        };

        store::put_order(txn, &order)?;
        txn.put_raw(CF_ORDER_INDICES, &keys::buyer_order(buyer_id, now, id), &[])?;
        txn.put_raw(CF_ORDER_INDICES, &keys::seller_order(order.seller_id, now, id), &[])?;
        Ok(order)
    }

    // Settlement

    /// Settle a `processing` credits order by spending the buyer's credits.
    ///
    /// If the buyer can no longer pay, or another order for the same project
    /// completed first, the order is cancelled with a reason and the error is
    /// returned.
    pub async fn complete_credits_order(&self, order_id: OrderId) -> Result<Order> {
        self.instrumented("complete_credits_order", async {
            let engine = self.clone();
            let outcome = run_blocking(move || {
                engine
                    .storage
                    .atomically(|txn| engine.settle_credits_in(txn, order_id))
            })
            .await?;
            self.finish_settlement(outcome)
        })
        .await
    }

    fn settle_credits_in(&self, txn: &StoreTxn<'_>, order_id: OrderId) -> Result<Settled> {
        let mut order = store::lock_order(txn, order_id)?;
        // Only credits orders sit in `processing`
        if order.payment_method != PaymentMethod::Credits || order.status != OrderStatus::Processing {
            return Err(invalid_transition(&order, OrderStatus::Completed));
        }
        ensure_transition(&order, OrderStatus::Completed)?;

        let now = Utc::now();
        if let Some(rejected) = self.purchase_backstop(txn, &mut order, now)? {
            return Ok(rejected);
        }

        if order.final_amount > 0 {
            let request = PostingRequest::new(
                order.buyer_id,
                order.final_amount,
                TransactionType::SpendPurchase,
                format!("Purchase of project {} (order {})", order.project_id, order.order_number),
            )
            .with_reference(Reference::Order(order.id))
            .created_by(order.buyer_id)
            .idempotency_key(format!("order:{}", order.id));

            match self.ledger.spend_in(txn, &request) {
                Ok(tx) => order.settlement_transaction_id = Some(tx.id),
                Err(err @ credit_ledger::Error::InsufficientBalance { .. }) => {
                    order.cancel_reason = Some(err.to_string());
                    order.transition(OrderStatus::Cancelled, now);
                    store::put_order(txn, &order)?;
                    return Ok(Settled::Rejected(order, err.into()));
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.complete_in(txn, &mut order, now)?;
        Ok(Settled::Completed(order))
    }

    /// Confirm payment from an external provider for a `pending` order.
    ///
    /// No ledger posting; the same purchase backstop applies.
    pub async fn confirm_external_payment(&self, order_id: OrderId) -> Result<Order> {
        self.instrumented("confirm_external_payment", async {
            let engine = self.clone();
            let outcome = run_blocking(move || {
                engine
                    .storage
                    .atomically(|txn| engine.confirm_external_in(txn, order_id))
            })
            .await?;
            self.finish_settlement(outcome)
        })
        .await
    }

    fn confirm_external_in(&self, txn: &StoreTxn<'_>, order_id: OrderId) -> Result<Settled> {
        let mut order = store::lock_order(txn, order_id)?;
        if !order.payment_method.is_external() || order.status != OrderStatus::Pending {
            return Err(invalid_transition(&order, OrderStatus::Completed));
        }
        ensure_transition(&order, OrderStatus::Completed)?;

        let now = Utc::now();
        if let Some(rejected) = self.purchase_backstop(txn, &mut order, now)? {
            return Ok(rejected);
        }

        self.complete_in(txn, &mut order, now)?;
        Ok(Settled::Completed(order))
    }

    /// Cancel `order` when another order already holds the purchase key
    fn purchase_backstop(
        &self,
        txn: &StoreTxn<'_>,
        order: &mut Order,
        now: DateTime<Utc>,
    ) -> Result<Option<Settled>> {
        match store::lock_purchase(txn, order.buyer_id, order.project_id)? {
            Some(holder) if holder != order.id => {
                let err = Error::AlreadyPurchased {
                    buyer_id: order.buyer_id,
                    project_id: order.project_id,
                };
                order.cancel_reason = Some(format!("already purchased by order {}", holder));
                order.transition(OrderStatus::Cancelled, now);
                store::put_order(txn, order)?;
                Ok(Some(Settled::Rejected(order.clone(), err)))
            }
            _ => Ok(None),
        }
    }

    fn complete_in(&self, txn: &StoreTxn<'_>, order: &mut Order, now: DateTime<Utc>) -> Result<()> {
        order.transition(OrderStatus::Completed, now);
        store::put_order(txn, order)?;
        txn.put_raw(
            CF_ORDER_INDICES,
            &keys::purchase(order.buyer_id, order.project_id),
            order.id.as_bytes(),
        )?;
        Ok(())
    }

    fn finish_settlement(&self, outcome: Settled) -> Result<Order> {
        match outcome {
            Settled::Completed(order) => {
                self.metrics.record_transition(OrderStatus::Completed);
                tracing::info!(
                    order_id = %order.id,
                    buyer_id = %order.buyer_id,
                    project_id = %order.project_id,
                    amount = order.final_amount,
                    settlement_transaction_id = ?order.settlement_transaction_id,
                    "Order completed"
                );
                Ok(order)
            }
            Settled::Rejected(order, err) => {
                self.metrics.record_transition(OrderStatus::Cancelled);
                tracing::warn!(
                    order_id = %order.id,
                    buyer_id = %order.buyer_id,
                    reason = ?order.cancel_reason,
                    "Order cancelled during settlement"
                );
                Err(err)
            }
        }
    }

    // Reversal

    /// Cancel a `pending` or `processing` order.
    ///
    /// Credits already posted against the order (net of refunds) are returned
    /// with a `refund_purchase` entry in the same transaction.
    pub async fn cancel_order(&self, order_id: OrderId, reason: Option<String>) -> Result<Order> {
        self.instrumented("cancel_order", async {
            let engine = self.clone();
            let order = run_blocking(move || {
                engine
                    .storage
                    .atomically(|txn| engine.cancel_in(txn, order_id, reason))
            })
            .await?;

            self.metrics.record_transition(OrderStatus::Cancelled);
            tracing::info!(
                order_id = %order.id,
                buyer_id = %order.buyer_id,
                reason = ?order.cancel_reason,
                "Order cancelled"
            );
            Ok::<_, Error>(order)
        })
        .await
    }

    fn cancel_in(&self, txn: &StoreTxn<'_>, order_id: OrderId, reason: Option<String>) -> Result<Order> {
        let mut order = store::lock_order(txn, order_id)?;
        ensure_transition(&order, OrderStatus::Cancelled)?;

        let spent = self.net_spent(order.id)?;
        if spent > 0 {
            let request = PostingRequest::new(
                order.buyer_id,
                spent,
                TransactionType::RefundPurchase,
                format!("Refund for cancelled order {}", order.order_number),
            )
            .with_reference(Reference::Order(order.id))
            .idempotency_key(format!("cancel:{}", order.id));
            let tx = self.ledger.earn_in(txn, &request)?;
            tracing::info!(
                order_id = %order.id,
                transaction_id = %tx.id,
                amount = spent,
                "Credits returned for cancelled order"
            );
        }

        order.cancel_reason = reason;
        order.transition(OrderStatus::Cancelled, Utc::now());
        store::put_order(txn, &order)?;
        Ok(order)
    }

    /// Reverse a completed order.
    ///
    /// Returns the net settled credits to the buyer and releases the purchase
    /// key so the project can be bought again.
    pub async fn refund_order(&self, order_id: OrderId, reason: String, actor: UserId) -> Result<Order> {
        self.instrumented("refund_order", async {
            let engine = self.clone();
            let order = run_blocking(move || {
                engine
                    .storage
                    .atomically(|txn| engine.refund_in(txn, order_id, reason, actor))
            })
            .await?;

            self.metrics.record_transition(OrderStatus::Refunded);
            tracing::info!(
                order_id = %order.id,
                buyer_id = %order.buyer_id,
                actor = %actor,
                "Order refunded"
            );
            Ok::<_, Error>(order)
        })
        .await
    }

    fn refund_in(
        &self,
        txn: &StoreTxn<'_>,
        order_id: OrderId,
        reason: String,
        actor: UserId,
    ) -> Result<Order> {
        let mut order = store::lock_order(txn, order_id)?;
        ensure_transition(&order, OrderStatus::Refunded)?;
        let holder = store::lock_purchase(txn, order.buyer_id, order.project_id)?;

        let settled = self.net_spent(order.id)?;
        if settled > 0 {
            let request = PostingRequest::new(
                order.buyer_id,
                settled,
                TransactionType::RefundPurchase,
                format!("Refund for order {}: {}", order.order_number, reason),
            )
            .with_reference(Reference::Order(order.id))
            .created_by(actor)
            .idempotency_key(format!("refund:{}", order.id));
            self.ledger.earn_in(txn, &request)?;
        }

        if holder == Some(order.id) {
            txn.delete(CF_ORDER_INDICES, &keys::purchase(order.buyer_id, order.project_id))?;
        }

        order.admin_note = Some(reason);
        order.transition(OrderStatus::Refunded, Utc::now());
        store::put_order(txn, &order)?;
        Ok(order)
    }

    /// Credits spent on an order net of refunds, from the ledger's reference
    /// index. Read under the order lock, which every posting for the order
    /// holds.
    fn net_spent(&self, order_id: OrderId) -> Result<i64> {
        let net: i64 = self
            .storage
            .transactions_for_reference(Reference::Order(order_id))?
            .iter()
            .map(|tx| tx.amount)
            .sum();
        Ok((-net).max(0))
    }
}

fn invalid_transition(order: &Order, to: OrderStatus) -> Error {
    Error::InvalidStateTransition {
        order_id: order.id,
        from: order.status,
        to,
    }
}

fn ensure_transition(order: &Order, to: OrderStatus) -> Result<()> {
    if order.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(invalid_transition(order, to))
    }
}

fn rejection_reason(err: &Error) -> &'static str {
    match err {
        Error::ProjectNotFound(_) => "project_not_found",
        Error::SelfPurchaseForbidden { .. } => "self_purchase",
        Error::AlreadyPurchased { .. } => "already_purchased",
        Error::PermissionDenied(_) => "permission_denied",
        Error::InvalidStateTransition { .. } => "invalid_state_transition",
        Error::OrderNotFound(_) => "order_not_found",
        Error::Config(_) => "config",
        Error::Ledger(credit_ledger::Error::InsufficientBalance { .. }) => "insufficient_balance",
        Error::Ledger(_) => "ledger",
    }
}
