//! Error types for the order engine

use crate::types::OrderStatus;
use credit_ledger::{OrderId, ProjectId, UserId};
use thiserror::Error;

/// Result type for order operations
pub type Result<T> = std::result::Result<T, Error>;

/// Order engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Project missing or not purchasable
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// Buyer is the project's seller
    #[error("User {buyer_id} cannot purchase their own project {project_id}")]
    SelfPurchaseForbidden {
        /// Buyer
        buyer_id: UserId,
        /// Project
        project_id: ProjectId,
    },

    /// A completed order already exists for this buyer and project
    #[error("User {buyer_id} already purchased project {project_id}")]
    AlreadyPurchased {
        /// Buyer
        buyer_id: UserId,
        /// Project
        project_id: ProjectId,
    },

    /// Caller may not access this order
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Order is not in a state that allows the requested transition
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        /// Order
        order_id: OrderId,
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// Order not found (by id or number)
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger or storage failure
    #[error(transparent)]
    Ledger(#[from] credit_ledger::Error),
}

impl Error {
    /// Whether the caller may retry (with idempotency awareness)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether this is the ledger's insufficient-balance rejection
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(
            self,
            Error::Ledger(credit_ledger::Error::InsufficientBalance { .. })
        )
    }
}
