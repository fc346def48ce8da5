//! Reward policies
//!
//! Thin compositions of [`CreditLedger::get_config`] and
//! [`CreditLedger::earn`]. Every reward posts under a deterministic
//! idempotency key, so retrying a grant never pays twice.

use crate::{
    types::{CreditTransaction, PostingRequest, ProjectId, Reference, TransactionType, UserId},
    CreditLedger, Error, Result,
};
use chrono::NaiveDate;

/// Settings keys read by the reward policies
pub mod keys {
    /// Registration bonus
    pub const REGISTER_BONUS: &str = "register_bonus";
    /// Upload bonus
    pub const UPLOAD_BONUS: &str = "upload_bonus";
    /// Dockerized upload multiplier
    pub const DOCKER_MULTIPLIER: &str = "docker_multiplier";
    /// Daily check-in bonus
    pub const DAILY_BONUS: &str = "daily_bonus";
    /// Referral bonus
    pub const REFERRAL_BONUS: &str = "referral_bonus";
    /// Review bonus
    pub const REVIEW_BONUS: &str = "review_bonus";
}

impl CreditLedger {
    /// Grant the registration bonus.
    ///
    /// Never fails: registration must go through even when the reward
    /// cannot be paid, so errors are logged and `None` is returned.
    pub async fn grant_registration_bonus(&self, user_id: UserId) -> Option<CreditTransaction> {
        let result = async {
            let amount = self.get_config(keys::REGISTER_BONUS).await?;
            self.earn(
                PostingRequest::new(user_id, amount, TransactionType::EarnRegister, "Registration bonus")
                    .with_reference(Reference::System)
                    .idempotency_key("register"),
            )
            .await
        }
        .await;

        match result {
            Ok(tx) => Some(tx),
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "Registration bonus not granted");
                None
            }
        }
    }

    /// Grant the bonus for an approved upload.
    ///
    /// Dockerized projects earn `upload_bonus * docker_multiplier` as
    /// `earn_docker`.
    pub async fn grant_upload_bonus(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        is_dockerized: bool,
    ) -> Result<CreditTransaction> {
        let base = self.get_config(keys::UPLOAD_BONUS).await?;

        let (amount, transaction_type, description) = if is_dockerized {
            let multiplier = self.get_config(keys::DOCKER_MULTIPLIER).await?;
            let amount = base
                .checked_mul(multiplier)
                .ok_or(Error::InvalidAmount(base))?;
            (amount, TransactionType::EarnDocker, "Dockerized project upload bonus")
        } else {
            (base, TransactionType::EarnUpload, "Project upload bonus")
        };

        self.earn(
            PostingRequest::new(user_id, amount, transaction_type, description)
                .with_reference(Reference::Project(project_id))
                .idempotency_key(format!("upload:{}", project_id)),
        )
        .await
    }

    /// Grant the daily check-in bonus, at most once per calendar date
    pub async fn grant_daily_bonus(&self, user_id: UserId, date: NaiveDate) -> Result<CreditTransaction> {
        let amount = self.get_config(keys::DAILY_BONUS).await?;
        self.earn(
            PostingRequest::new(user_id, amount, TransactionType::EarnDaily, format!("Daily check-in {}", date))
                .with_reference(Reference::System)
                .idempotency_key(format!("daily:{}", date)),
        )
        .await
    }

    /// Pay the referrer once per referee
    pub async fn grant_referral_bonus(
        &self,
        referrer_id: UserId,
        referee_id: UserId,
    ) -> Result<CreditTransaction> {
        if referrer_id == referee_id {
            return Err(Error::SelfReferral(referrer_id));
        }

        let amount = self.get_config(keys::REFERRAL_BONUS).await?;
        self.earn(
            PostingRequest::new(referrer_id, amount, TransactionType::EarnReferral, "Referral bonus")
                .with_reference(Reference::System)
                .idempotency_key(format!("referral:{}", referee_id)),
        )
        .await
    }

    /// Grant the review bonus once per reviewed project
    pub async fn grant_review_bonus(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> Result<CreditTransaction> {
        let amount = self.get_config(keys::REVIEW_BONUS).await?;
        self.earn(
            PostingRequest::new(user_id, amount, TransactionType::EarnReview, "Review bonus")
                .with_reference(Reference::Project(project_id))
                .idempotency_key(format!("review:{}", project_id)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RewardsConfig, Config, Storage};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn seeded_ledger() -> (CreditLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        let storage = Arc::new(Storage::open(&config).unwrap());
        let ledger = CreditLedger::new(storage, &config).unwrap();
        ledger.seed_defaults(&RewardsConfig::default()).await.unwrap();
        (ledger, temp_dir)
    }

    #[tokio::test]
    async fn test_registration_bonus_pays_once() {
        let (ledger, _temp) = seeded_ledger().await;
        let user = UserId::new();

        let tx = ledger.grant_registration_bonus(user).await.unwrap();
        assert_eq!(tx.amount, 100);
        assert_eq!(tx.transaction_type, TransactionType::EarnRegister);

        let again = ledger.grant_registration_bonus(user).await.unwrap();
        assert_eq!(again.id, tx.id);
        let account = ledger.get_account(user).await.unwrap().unwrap();
        assert_eq!(account.available_credits, 100);
    }

    #[tokio::test]
    async fn test_registration_bonus_swallows_missing_config() {
        let (ledger, _temp) = seeded_ledger().await;
        ledger
            .set_config(keys::REGISTER_BONUS, 100, "off", false)
            .await
            .unwrap();

        let user = UserId::new();
        assert!(ledger.grant_registration_bonus(user).await.is_none());
        assert!(ledger.get_account(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_bonus_plain_and_dockerized() {
        let (ledger, _temp) = seeded_ledger().await;
        let user = UserId::new();

        let plain = ledger
            .grant_upload_bonus(user, ProjectId::new(), false)
            .await
            .unwrap();
        assert_eq!(plain.amount, 50);
        assert_eq!(plain.transaction_type, TransactionType::EarnUpload);

        let project = ProjectId::new();
        let docker = ledger.grant_upload_bonus(user, project, true).await.unwrap();
        assert_eq!(docker.amount, 100);
        assert_eq!(docker.transaction_type, TransactionType::EarnDocker);
        assert_eq!(docker.reference, Some(Reference::Project(project)));
        assert_eq!(docker.balance_after, 150);
    }

    #[tokio::test]
    async fn test_upload_bonus_surfaces_missing_config() {
        let (ledger, _temp) = seeded_ledger().await;
        ledger
            .set_config(keys::UPLOAD_BONUS, 50, "off", false)
            .await
            .unwrap();

        let err = ledger
            .grant_upload_bonus(UserId::new(), ProjectId::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(key) if key == "upload_bonus"));
    }

    #[tokio::test]
    async fn test_daily_bonus_once_per_date() {
        let (ledger, _temp) = seeded_ledger().await;
        let user = UserId::new();
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let tomorrow = today.succ_opt().unwrap();

        ledger.grant_daily_bonus(user, today).await.unwrap();
        ledger.grant_daily_bonus(user, today).await.unwrap();
        ledger.grant_daily_bonus(user, tomorrow).await.unwrap();

        let account = ledger.get_account(user).await.unwrap().unwrap();
        assert_eq!(account.available_credits, 10);
        assert_eq!(account.sequence, 2);
    }

    #[tokio::test]
    async fn test_referral_bonus() {
        let (ledger, _temp) = seeded_ledger().await;
        let referrer = UserId::new();

        assert!(matches!(
            ledger.grant_referral_bonus(referrer, referrer).await.unwrap_err(),
            Error::SelfReferral(_)
        ));

        let referee = UserId::new();
        let tx = ledger.grant_referral_bonus(referrer, referee).await.unwrap();
        assert_eq!(tx.amount, 20);
        let replay = ledger.grant_referral_bonus(referrer, referee).await.unwrap();
        assert_eq!(replay.id, tx.id);

        ledger
            .grant_referral_bonus(referrer, UserId::new())
            .await
            .unwrap();
        let account = ledger.get_account(referrer).await.unwrap().unwrap();
        assert_eq!(account.available_credits, 40);
    }

    #[tokio::test]
    async fn test_review_bonus_once_per_project() {
        let (ledger, _temp) = seeded_ledger().await;
        let user = UserId::new();
        let project = ProjectId::new();

        ledger.grant_review_bonus(user, project).await.unwrap();
        ledger.grant_review_bonus(user, project).await.unwrap();

        let linked = ledger
            .transactions_for_reference(Reference::Project(project))
            .await
            .unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].amount, 10);
    }
}
