//! Order, download and catalog types

use chrono::{DateTime, Utc};
use credit_ledger::{OrderId, ProjectId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting for external payment confirmation
    Pending,
    /// Credits order awaiting settlement
    Processing,
    /// Paid and fulfilled
    Completed,
    /// Abandoned before completion
    Cancelled,
    /// Reversed after completion
    Refunded,
}

impl OrderStatus {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Allowed transitions. Every mutation consults this table.
    ///
    /// `completed` only moves on through a refund.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Cancelled)
                | (Completed, Refunded)
        )
    }

    /// `completed`, `cancelled` and `refunded`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the buyer pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Platform credits, settled through the ledger
    Credits,
    /// Alipay
    Alipay,
    /// WeChat Pay
    Wechat,
    /// Stripe
    Stripe,
    /// PayPal
    Paypal,
}

impl PaymentMethod {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Credits => "credits",
            PaymentMethod::Alipay => "alipay",
            PaymentMethod::Wechat => "wechat",
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Paypal => "paypal",
        }
    }

    /// Needs confirmation from an external payment provider
    pub fn is_external(&self) -> bool {
        !matches!(self, PaymentMethod::Credits)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchase attempt. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID (UUIDv7)
    pub id: OrderId,
    /// Human-readable unique number, e.g. `EC2026101912345678`
    pub order_number: String,
    /// Buyer
    pub buyer_id: UserId,
    /// Seller (project owner at purchase time)
    pub seller_id: UserId,
    /// Purchased project
    pub project_id: ProjectId,
    /// Catalog price at purchase time
    pub original_price: i64,
    /// Discount applied
    pub discount_amount: i64,
    /// `original_price - discount_amount`
    pub final_amount: i64,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Buyer's note
    pub buyer_note: Option<String>,
    /// Seller's note
    pub seller_note: Option<String>,
    /// Administrator's note (refund reason)
    pub admin_note: Option<String>,
    /// Why the order was cancelled
    pub cancel_reason: Option<String>,
    /// Ledger entry that settled the order
    pub settlement_transaction_id: Option<Uuid>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Payment received
    pub paid_at: Option<DateTime<Utc>>,
    /// Completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Refunded
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Move to `next`, stamping `updated_at`. Callers check
    /// [`OrderStatus::can_transition_to`] first.
    pub(crate) fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) {
        self.status = next;
        self.updated_at = now;
        match next {
            OrderStatus::Completed => {
                self.paid_at = Some(now);
                self.completed_at = Some(now);
            }
            OrderStatus::Cancelled => self.cancelled_at = Some(now),
            OrderStatus::Refunded => self.refunded_at = Some(now),
            OrderStatus::Pending | OrderStatus::Processing => {}
        }
    }
}

/// One file access for a completed order. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDownload {
    /// Download ID (UUIDv7)
    pub id: Uuid,
    /// Owning order
    pub order_id: OrderId,
    /// Downloading user (always the buyer)
    pub user_id: UserId,
    /// File location
    pub file_url: String,
    /// File name
    pub file_name: String,
    /// Size in bytes
    pub file_size: Option<u64>,
    /// Client address
    pub download_ip: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Input to `record_download`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewDownload {
    /// File location
    pub file_url: String,
    /// File name
    pub file_name: String,
    /// Size in bytes
    pub file_size: Option<u64>,
    /// Client address
    pub download_ip: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
}

impl NewDownload {
    /// Download of `file_name` at `file_url`
    pub fn new(file_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_url: file_url.into(),
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    /// Record the file size
    pub fn file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(bytes);
        self
    }

    /// Record client details
    pub fn client(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.download_ip = Some(ip.into());
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Catalog project status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Not submitted
    Draft,
    /// Awaiting review
    PendingReview,
    /// Approved by review
    Approved,
    /// Listed publicly
    Published,
    /// Rejected by review
    Rejected,
    /// Withdrawn
    Archived,
}

impl ProjectStatus {
    /// Whether orders may be placed
    pub fn is_purchasable(&self) -> bool {
        matches!(self, ProjectStatus::Approved | ProjectStatus::Published)
    }
}

/// What the order engine needs to know about a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectListing {
    /// Project ID
    pub id: ProjectId,
    /// Owner
    pub seller_id: UserId,
    /// Price in credits
    pub price: i64,
    /// Catalog status
    pub status: ProjectStatus,
    /// Display title
    pub title: String,
}

/// Seller dashboard figures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerSalesStats {
    /// All orders for the seller's projects
    pub total_orders: u64,
    /// Orders awaiting external payment
    pub pending_orders: u64,
    /// Credits orders awaiting settlement
    pub processing_orders: u64,
    /// Completed orders
    pub completed_orders: u64,
    /// Cancelled orders
    pub cancelled_orders: u64,
    /// Refunded orders
    pub refunded_orders: u64,
    /// Sum of `final_amount` over completed orders
    pub total_revenue: i64,
    /// Distinct buyers with a completed order
    pub unique_buyers: u64,
}
