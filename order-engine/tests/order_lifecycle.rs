//! Order lifecycle tests against a real store

use credit_ledger::{
    run_blocking, Config as LedgerConfig, CreditLedger, OrderId, PostingRequest, ProjectId,
    Reference, TransactionType, UserId,
};
use order_engine::{
    open_storage, Config, Error, InMemoryCatalog, NewDownload, OrderEngine, OrderStatus,
    PaymentMethod, ProjectListing, ProjectStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    engine: OrderEngine,
    catalog: Arc<InMemoryCatalog>,
    _temp: TempDir,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = LedgerConfig::default();
        config.data_dir = temp.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        let storage = Arc::new(open_storage(&config).unwrap());
        let ledger = CreditLedger::new(storage, &config).unwrap();
        let catalog = Arc::new(InMemoryCatalog::new());
        let engine = OrderEngine::new(ledger, catalog.clone(), &Config::default()).unwrap();

        Self {
            engine,
            catalog,
            _temp: temp,
        }
    }

    fn ledger(&self) -> &CreditLedger {
        self.engine.ledger()
    }

    fn publish(&self, price: i64) -> ProjectListing {
        let listing = ProjectListing {
            id: ProjectId::new(),
            seller_id: UserId::new(),
            price,
            status: ProjectStatus::Published,
            title: "Inventory management system".into(),
        };
        self.catalog.upsert(listing.clone());
        listing
    }

    async fn fund(&self, user: UserId, amount: i64) {
        self.ledger()
            .earn(PostingRequest::new(user, amount, TransactionType::AdminAdjust, "funding"))
            .await
            .unwrap();
    }

    async fn balance(&self, user: UserId) -> i64 {
        self.ledger()
            .get_account(user)
            .await
            .unwrap()
            .map(|a| a.available_credits)
            .unwrap_or(0)
    }
}

#[tokio::test]
async fn test_credits_order_lifecycle() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(100);
    h.fund(buyer, 150).await;

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, Some("for the team".into()))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.original_price, 100);
    assert_eq!(order.final_amount, 100);
    assert_eq!(order.seller_id, project.seller_id);
    assert!(order.order_number.starts_with("EC"));
    assert_eq!(order.order_number.len(), 18);

    let completed = h.engine.complete_credits_order(order.id).await.unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert!(completed.paid_at.is_some());
    assert_eq!(h.balance(buyer).await, 50);

    let settlement = h
        .ledger()
        .get_transaction(completed.settlement_transaction_id.unwrap())
        .await
        .unwrap();
    assert_eq!(settlement.amount, -100);
    assert_eq!(settlement.transaction_type, TransactionType::SpendPurchase);
    assert_eq!(settlement.reference, Some(Reference::Order(order.id)));

    assert!(h.engine.check_user_purchased(buyer, project.id).await.unwrap());

    let download = h
        .engine
        .record_download(
            order.id,
            buyer,
            NewDownload::new("https://cdn.example.com/p/1.zip", "1.zip")
                .file_size(2048)
                .client("10.0.0.1", "curl/8.0"),
        )
        .await
        .unwrap();
    assert_eq!(download.user_id, buyer);

    let stranger = UserId::new();
    let err = h
        .engine
        .record_download(order.id, stranger, NewDownload::new("https://cdn.example.com/p/1.zip", "1.zip"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    let downloads = h.engine.list_downloads(order.id, buyer).await.unwrap();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].file_size, Some(2048));
    assert!(matches!(
        h.engine.list_downloads(order.id, stranger).await.unwrap_err(),
        Error::PermissionDenied(_)
    ));
}

#[tokio::test]
async fn test_duplicate_purchase_rejected() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(40);
    h.fund(buyer, 200).await;

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    h.engine.complete_credits_order(order.id).await.unwrap();

    let err = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyPurchased { .. }));
    assert_eq!(h.balance(buyer).await, 160);
}

#[tokio::test]
async fn test_creation_rejections_touch_nothing() {
    let h = Harness::new();
    let project = h.publish(100);

    let err = h
        .engine
        .create_order(project.seller_id, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SelfPurchaseForbidden { .. }));

    let err = h
        .engine
        .create_order(UserId::new(), ProjectId::new(), PaymentMethod::Credits, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProjectNotFound(_)));

    let draft = h.publish(10);
    h.catalog.set_status(draft.id, ProjectStatus::Draft);
    let err = h
        .engine
        .create_order(UserId::new(), draft.id, PaymentMethod::Stripe, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProjectNotFound(_)));

    let poor = UserId::new();
    h.fund(poor, 99).await;
    let err = h
        .engine
        .create_order(poor, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap_err();
    assert!(err.is_insufficient_balance());
    assert!(h.engine.get_user_purchase_history(poor, 10, 0).await.unwrap().is_empty());
    assert_eq!(h.balance(poor).await, 99);
}

#[tokio::test]
async fn test_insufficient_balance_at_settlement_cancels_order() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(100);
    h.fund(buyer, 150).await;

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();

    // Balance drops between creation and settlement
    h.ledger()
        .spend(PostingRequest::new(buyer, 100, TransactionType::SpendFeature, "featured listing"))
        .await
        .unwrap();

    let err = h.engine.complete_credits_order(order.id).await.unwrap_err();
    assert!(err.is_insufficient_balance());

    let order = h.engine.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.cancel_reason.is_some());
    assert!(order.cancelled_at.is_some());
    assert_eq!(h.balance(buyer).await, 50);
    assert!(!h.engine.check_user_purchased(buyer, project.id).await.unwrap());
}

#[tokio::test]
async fn test_cancellation_refunds_spent_credits() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(100);
    h.fund(buyer, 300).await;

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();

    // Credits posted against the order outside settlement
    h.ledger()
        .spend(
            PostingRequest::new(buyer, 100, TransactionType::SpendPurchase, "early capture")
                .with_reference(Reference::Order(order.id)),
        )
        .await
        .unwrap();
    assert_eq!(h.balance(buyer).await, 200);

    let cancelled = h
        .engine
        .cancel_order(order.id, Some("buyer changed their mind".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("buyer changed their mind"));
    assert_eq!(h.balance(buyer).await, 300);

    let linked = h
        .ledger()
        .transactions_for_reference(Reference::Order(order.id))
        .await
        .unwrap();
    assert_eq!(linked.len(), 2);
    let refund = linked
        .iter()
        .find(|tx| tx.transaction_type == TransactionType::RefundPurchase)
        .unwrap();
    assert_eq!(refund.amount, 100);

    // Terminal
    let err = h.engine.cancel_order(order.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidStateTransition { from: OrderStatus::Cancelled, to: OrderStatus::Cancelled, .. }
    ));
}

#[tokio::test]
async fn test_cancel_without_spend_posts_nothing() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(30);

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Alipay, None)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    h.engine.cancel_order(order.id, None).await.unwrap();
    assert!(h.ledger().get_account(buyer).await.unwrap().is_none());
}

#[tokio::test]
async fn test_completed_order_cannot_be_cancelled() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(10);
    h.fund(buyer, 10).await;

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    h.engine.complete_credits_order(order.id).await.unwrap();

    let err = h.engine.cancel_order(order.id, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));
    let err = h.engine.complete_credits_order(order.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));
    assert_eq!(h.balance(buyer).await, 0);
}

#[tokio::test]
async fn test_purchase_backstop_cancels_second_order() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(60);
    h.fund(buyer, 200).await;

    // Both pass creation: neither has completed yet
    let first = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    let second = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    assert_ne!(first.order_number, second.order_number);

    h.engine.complete_credits_order(first.id).await.unwrap();
    let err = h.engine.complete_credits_order(second.id).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyPurchased { .. }));

    let second = h.engine.get_order(second.id).await.unwrap();
    assert_eq!(second.status, OrderStatus::Cancelled);
    assert_eq!(h.balance(buyer).await, 140);
}

#[tokio::test]
async fn test_external_payment_confirmation() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(500);

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Stripe, None)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let err = h.engine.complete_credits_order(order.id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidStateTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Completed,
            ..
        }
    ));

    let completed = h.engine.confirm_external_payment(order.id).await.unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(completed.settlement_transaction_id.is_none());
    assert!(h.engine.check_user_purchased(buyer, project.id).await.unwrap());
    assert!(h.ledger().get_account(buyer).await.unwrap().is_none());

    let err = h.engine.confirm_external_payment(order.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_refund_restores_credits_and_allows_repurchase() {
    let h = Harness::new();
    let buyer = UserId::new();
    let admin = UserId::new();
    let project = h.publish(80);
    h.fund(buyer, 100).await;

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    h.engine.complete_credits_order(order.id).await.unwrap();
    assert_eq!(h.balance(buyer).await, 20);

    let refunded = h
        .engine
        .refund_order(order.id, "broken archive".into(), admin)
        .await
        .unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert!(refunded.refunded_at.is_some());
    assert_eq!(refunded.admin_note.as_deref(), Some("broken archive"));
    assert_eq!(h.balance(buyer).await, 100);
    assert!(!h.engine.check_user_purchased(buyer, project.id).await.unwrap());

    // Refunded orders are no longer downloadable
    let err = h
        .engine
        .record_download(order.id, buyer, NewDownload::new("https://cdn.example.com/x", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    let err = h
        .engine
        .refund_order(order.id, "again".into(), admin)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));

    let again = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    h.engine.complete_credits_order(again.id).await.unwrap();
    assert_eq!(h.balance(buyer).await, 20);

    let report = h.ledger().verify_chain(buyer).await.unwrap();
    assert_eq!(report.transaction_count, 4);
}

#[tokio::test]
async fn test_free_project_settles_without_posting() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(0);

    let order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    let completed = h.engine.complete_credits_order(order.id).await.unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(completed.settlement_transaction_id.is_none());
    assert!(h.ledger().get_account(buyer).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queries() {
    let h = Harness::new();
    let buyer = UserId::new();
    let other_buyer = UserId::new();
    let seller = UserId::new();
    h.fund(buyer, 1_000).await;
    h.fund(other_buyer, 1_000).await;

    let mut projects = Vec::new();
    for price in [100, 200, 300] {
        let listing = ProjectListing {
            id: ProjectId::new(),
            seller_id: seller,
            price,
            status: ProjectStatus::Approved,
            title: format!("project {}", price),
        };
        h.catalog.upsert(listing.clone());
        projects.push(listing);
    }

    let mut orders = Vec::new();
    for project in &projects {
        orders.push(
            h.engine
                .create_order(buyer, project.id, PaymentMethod::Credits, None)
                .await
                .unwrap(),
        );
    }
    h.engine.complete_credits_order(orders[0].id).await.unwrap();
    h.engine.complete_credits_order(orders[1].id).await.unwrap();
    h.engine.cancel_order(orders[2].id, None).await.unwrap();

    let other = h
        .engine
        .create_order(other_buyer, projects[0].id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    h.engine.complete_credits_order(other.id).await.unwrap();
    h.engine
        .create_order(other_buyer, projects[1].id, PaymentMethod::Paypal, None)
        .await
        .unwrap();

    let stats = h.engine.get_seller_sales_stats(seller).await.unwrap();
    assert_eq!(stats.total_orders, 5);
    assert_eq!(stats.completed_orders, 3);
    assert_eq!(stats.cancelled_orders, 1);
    assert_eq!(stats.pending_orders, 1);
    assert_eq!(stats.processing_orders, 0);
    assert_eq!(stats.total_revenue, 400);
    assert_eq!(stats.unique_buyers, 2);

    // Newest first
    let history = h.engine.get_user_purchase_history(buyer, 2, 0).await.unwrap();
    let ids: Vec<OrderId> = history.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![orders[2].id, orders[1].id]);
    let rest = h.engine.get_user_purchase_history(buyer, 10, 2).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, orders[0].id);

    // 0 selects the default page size, as in ledger history
    let default_page = h.engine.get_user_purchase_history(buyer, 0, 0).await.unwrap();
    assert_eq!(default_page.len(), 3);

    let by_number = h
        .engine
        .get_order_by_number(&orders[1].order_number)
        .await
        .unwrap();
    assert_eq!(by_number.id, orders[1].id);
    assert!(matches!(
        h.engine.get_order_by_number("EC2026010100000000").await.unwrap_err(),
        Error::OrderNotFound(_)
    ));
    assert!(matches!(
        h.engine.get_order(OrderId::new()).await.unwrap_err(),
        Error::OrderNotFound(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_purchases_complete_once() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(50);
    h.fund(buyer, 1_000).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            let order = engine
                .create_order(buyer, project.id, PaymentMethod::Credits, None)
                .await?;
            engine.complete_credits_order(order.id).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(Error::AlreadyPurchased { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(h.balance(buyer).await, 950);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_order_numbers_unique_under_concurrency() {
    let h = Harness::new();
    let storage = h.ledger().storage().clone();
    let allocator = h.engine.order_numbers().clone();

    let mut handles = Vec::with_capacity(10_000);
    for _ in 0..10_000 {
        let storage = storage.clone();
        let allocator = allocator.clone();
        handles.push(tokio::spawn(async move {
            run_blocking(move || {
                storage.atomically(|txn| {
                    allocator.reserve_in(txn, OrderId::new(), chrono::Utc::now())
                })
            })
            .await
        }));
    }

    let mut numbers = HashSet::new();
    for handle in handles {
        let number: String = handle.await.unwrap().unwrap();
        assert!(numbers.insert(number));
    }
    assert_eq!(numbers.len(), 10_000);
}

#[tokio::test]
async fn test_downloads_require_completed_order() {
    let h = Harness::new();
    let buyer = UserId::new();
    let project = h.publish(60);
    let other_project = h.publish(90);
    h.fund(buyer, 100).await;

    let credits_order = h
        .engine
        .create_order(buyer, project.id, PaymentMethod::Credits, None)
        .await
        .unwrap();
    assert_eq!(credits_order.status, OrderStatus::Processing);
    let alipay_order = h
        .engine
        .create_order(buyer, other_project.id, PaymentMethod::Alipay, None)
        .await
        .unwrap();
    assert_eq!(alipay_order.status, OrderStatus::Pending);

    let download = || NewDownload::new("https://cdn.example.com/src.zip", "src.zip");

    for order_id in [credits_order.id, alipay_order.id] {
        let err = h
            .engine
            .record_download(order_id, buyer, download())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    h.engine
        .cancel_order(alipay_order.id, Some("changed my mind".into()))
        .await
        .unwrap();
    let err = h
        .engine
        .record_download(alipay_order.id, buyer, download())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    // Nothing was recorded for either order
    for order_id in [credits_order.id, alipay_order.id] {
        assert!(h.engine.list_downloads(order_id, buyer).await.unwrap().is_empty());
    }

    // Credits orders are never confirmed externally
    let err = h
        .engine
        .confirm_external_payment(credits_order.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidStateTransition {
            from: OrderStatus::Processing,
            to: OrderStatus::Completed,
            ..
        }
    ));

    h.engine.complete_credits_order(credits_order.id).await.unwrap();
    h.engine
        .record_download(credits_order.id, buyer, download())
        .await
        .unwrap();
    assert_eq!(h.engine.list_downloads(credits_order.id, buyer).await.unwrap().len(), 1);
}
