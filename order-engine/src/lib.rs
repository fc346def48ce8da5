//! SrcMarket Order Engine
//!
//! Purchase orders for catalog projects, settled against the credit ledger.
//!
//! # Lifecycle
//!
//! ```text
//! pending ──────────────┬──> completed ──> refunded
//! processing (credits) ─┤
//!                       └──> cancelled
//! ```
//!
//! # Invariants
//!
//! - A buyer holds at most one `completed` order per project
//! - No transition out of `cancelled` or `refunded`
//! - A credits order completes only together with its ledger spend

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod catalog;
pub mod store;
pub mod order_number;
pub mod engine;
pub mod downloads;
pub mod queries;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    NewDownload, Order, OrderDownload, OrderStatus, PaymentMethod, ProjectListing, ProjectStatus,
    SellerSalesStats,
};
pub use catalog::{InMemoryCatalog, ProjectCatalog};
pub use store::{open_storage, COLUMN_FAMILIES};
pub use order_number::OrderNumberAllocator;
pub use engine::OrderEngine;
pub use config::Config;
pub use metrics::OrderMetrics;
