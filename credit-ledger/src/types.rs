//! Core types for the credit ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Integer credits only (no fractional amounts)
//! - Immutable transaction records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh, time-ordered identifier
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Raw bytes, used as storage key material
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// User identifier, supplied by the identity provider
    UserId
);
uuid_id!(
    /// Catalog project identifier
    ProjectId
);
uuid_id!(
    /// Order identifier
    OrderId
);

/// Kind of ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Registration bonus
    EarnRegister,
    /// Project upload bonus
    EarnUpload,
    /// Review bonus
    EarnReview,
    /// Referral bonus
    EarnReferral,
    /// Daily check-in bonus
    EarnDaily,
    /// Upload bonus for a dockerized project
    EarnDocker,
    /// Project purchase
    SpendPurchase,
    /// Paid listing feature
    SpendFeature,
    /// Purchase refund
    RefundPurchase,
    /// Administrative correction (either direction)
    AdminAdjust,
}

impl TransactionType {
    /// Every variant, in declaration order
    pub const ALL: [TransactionType; 10] = [
        TransactionType::EarnRegister,
        TransactionType::EarnUpload,
        TransactionType::EarnReview,
        TransactionType::EarnReferral,
        TransactionType::EarnDaily,
        TransactionType::EarnDocker,
        TransactionType::SpendPurchase,
        TransactionType::SpendFeature,
        TransactionType::RefundPurchase,
        TransactionType::AdminAdjust,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::EarnRegister => "earn_register",
            TransactionType::EarnUpload => "earn_upload",
            TransactionType::EarnReview => "earn_review",
            TransactionType::EarnReferral => "earn_referral",
            TransactionType::EarnDaily => "earn_daily",
            TransactionType::EarnDocker => "earn_docker",
            TransactionType::SpendPurchase => "spend_purchase",
            TransactionType::SpendFeature => "spend_feature",
            TransactionType::RefundPurchase => "refund_purchase",
            TransactionType::AdminAdjust => "admin_adjust",
        }
    }

    /// Allowed on the earn (credit) path
    pub fn allows_earn(&self) -> bool {
        !matches!(
            self,
            TransactionType::SpendPurchase | TransactionType::SpendFeature
        )
    }

    /// Allowed on the spend (debit) path
    pub fn allows_spend(&self) -> bool {
        matches!(
            self,
            TransactionType::SpendPurchase
                | TransactionType::SpendFeature
                | TransactionType::AdminAdjust
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown transaction type: {}", s))
    }
}

/// What caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reference {
    /// A catalog project (upload/review bonuses)
    Project(ProjectId),
    /// An order (purchases and refunds)
    Order(OrderId),
    /// System-generated, no linked record
    System,
    /// Manual administrative action
    Admin,
}

impl Reference {
    /// Reference type as exposed to readers
    pub fn reference_type(&self) -> &'static str {
        match self {
            Reference::Project(_) => "project",
            Reference::Order(_) => "order",
            Reference::System => "system",
            Reference::Admin => "admin",
        }
    }

    /// Linked record id, if any
    pub fn reference_id(&self) -> Option<Uuid> {
        match self {
            Reference::Project(id) => Some(id.as_uuid()),
            Reference::Order(id) => Some(id.as_uuid()),
            Reference::System | Reference::Admin => None,
        }
    }

    /// Index key material for references that point at a record
    pub(crate) fn index_key(&self) -> Option<[u8; 17]> {
        let (tag, id) = match self {
            Reference::Project(id) => (b'p', id.as_bytes()),
            Reference::Order(id) => (b'o', id.as_bytes()),
            Reference::System | Reference::Admin => return None,
        };
        let mut key = [0u8; 17];
        key[0] = tag;
        key[1..].copy_from_slice(id);
        Some(key)
    }
}

/// Per-user credit account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    /// Account owner
    pub user_id: UserId,

    /// Lifetime credited minus spent
    pub total_credits: i64,

    /// Spendable now (never negative)
    pub available_credits: i64,

    /// Reserved; no operation writes it (see DESIGN.md)
    pub frozen_credits: i64,

    /// Sequence number of the latest transaction (0 = none yet)
    pub sequence: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// Fresh zero-balance account
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_credits: 0,
            available_credits: 0,
            frozen_credits: 0,
            sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check balance invariants
    pub fn check_invariants(&self) -> crate::Result<()> {
        if self.available_credits < 0 || self.frozen_credits < 0 {
            return Err(crate::Error::InvariantViolation(format!(
                "negative balance on account {}: available={}, frozen={}",
                self.user_id, self.available_credits, self.frozen_credits
            )));
        }
        if self.total_credits < self.available_credits + self.frozen_credits {
            return Err(crate::Error::InvariantViolation(format!(
                "total {} below available {} + frozen {} on account {}",
                self.total_credits, self.available_credits, self.frozen_credits, self.user_id
            )));
        }
        Ok(())
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Transaction ID (UUIDv7)
    pub id: Uuid,

    /// Account owner
    pub user_id: UserId,

    /// Position in the owner's chain, starting at 1
    pub sequence: u64,

    /// Kind of movement
    pub transaction_type: TransactionType,

    /// Signed amount: positive credit, negative debit
    pub amount: i64,

    /// `available_credits` before this entry
    pub balance_before: i64,

    /// `available_credits` after this entry
    pub balance_after: i64,

    /// Human-readable description
    pub description: String,

    /// What caused this entry
    pub reference: Option<Reference>,

    /// Acting user; `None` for system-generated entries
    pub created_by: Option<UserId>,

    /// Caller-supplied deduplication key
    pub idempotency_key: Option<String>,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Reference type, if any
    pub fn reference_type(&self) -> Option<&'static str> {
        self.reference.map(|r| r.reference_type())
    }

    /// Referenced record id, if any
    pub fn reference_id(&self) -> Option<Uuid> {
        self.reference.and_then(|r| r.reference_id())
    }
}

/// Input to `earn` / `spend`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingRequest {
    /// Account owner
    pub user_id: UserId,
    /// Unsigned amount; must be positive
    pub amount: i64,
    /// Kind of movement
    pub transaction_type: TransactionType,
    /// Human-readable description
    pub description: String,
    /// What caused this posting
    pub reference: Option<Reference>,
    /// Acting user
    pub created_by: Option<UserId>,
    /// Deduplication key, unique per user
    pub idempotency_key: Option<String>,
}

impl PostingRequest {
    /// New request without reference, actor or idempotency key
    pub fn new(
        user_id: UserId,
        amount: i64,
        transaction_type: TransactionType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            transaction_type,
            description: description.into(),
            reference: None,
            created_by: None,
            idempotency_key: None,
        }
    }

    /// Attach a reference
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Record the acting user
    pub fn created_by(mut self, actor: UserId) -> Self {
        self.created_by = Some(actor);
        self
    }

    /// Make the posting idempotent under `key`
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Named tunable in the settings table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Lookup key, e.g. `register_bonus`
    pub key: String,
    /// Integer value
    pub value: i64,
    /// Operator-facing description
    pub description: String,
    /// Inactive entries behave as missing
    pub is_active: bool,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// One page of transaction history, newest first
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    /// Entries on this page
    pub transactions: Vec<CreditTransaction>,
    /// Total entries matching the filter
    pub total: u64,
    /// 1-based page number
    pub page: u32,
    /// Page size actually applied
    pub limit: u32,
}

/// Result of a chain audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Audited account
    pub user_id: UserId,
    /// Number of entries walked
    pub transaction_count: u64,
    /// Current spendable balance
    pub available_credits: i64,
    /// Sum of all entry amounts
    pub net_amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_round_trip_names() {
        for t in TransactionType::ALL {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
        }
        assert!("earn_everything".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_transaction_type_direction() {
        assert!(TransactionType::EarnDocker.allows_earn());
        assert!(!TransactionType::EarnDocker.allows_spend());
        assert!(TransactionType::RefundPurchase.allows_earn());
        assert!(!TransactionType::SpendPurchase.allows_earn());
        assert!(TransactionType::AdminAdjust.allows_earn());
        assert!(TransactionType::AdminAdjust.allows_spend());
    }

    #[test]
    fn test_reference_accessors() {
        let order = OrderId::new();
        let reference = Reference::Order(order);
        assert_eq!(reference.reference_type(), "order");
        assert_eq!(reference.reference_id(), Some(order.as_uuid()));
        assert!(reference.index_key().is_some());

        assert_eq!(Reference::System.reference_id(), None);
        assert!(Reference::Admin.index_key().is_none());
    }

    #[test]
    fn test_account_invariants() {
        let mut account = CreditAccount::new(UserId::new(), Utc::now());
        assert!(account.check_invariants().is_ok());

        account.available_credits = -1;
        assert!(account.check_invariants().is_err());

        account.available_credits = 10;
        account.total_credits = 5;
        assert!(account.check_invariants().is_err());
    }
}
