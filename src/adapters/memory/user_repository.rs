//! In-memory user repository.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::billing::{BillingUser, SubscriptionSnapshot};
use crate::domain::foundation::{DomainError, ErrorCode, PlanId, UserId};
use crate::ports::{ConditionalWrite, UserRepository};

#[derive(Debug, Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<UserId, BillingUser>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn save(&self, user: &BillingUser) -> Result<(), DomainError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("User {} already exists", user.id),
            ));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<BillingUser>, DomainError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_provider_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<BillingUser>, DomainError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.provider_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn set_provider_customer_id_if_absent(
        &self,
        id: &UserId,
        customer_id: &str,
    ) -> Result<ConditionalWrite, DomainError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| DomainError::user_not_found(id))?;
        match &user.provider_customer_id {
            Some(existing) => Ok(ConditionalWrite::AlreadySet(existing.clone())),
            None => {
                user.provider_customer_id = Some(customer_id.to_string());
                user.version += 1;
                Ok(ConditionalWrite::Applied)
            }
        }
    }

    async fn attach_subscription_if_absent(
        &self,
        id: &UserId,
        expected_plan: &PlanId,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<ConditionalWrite, DomainError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| DomainError::user_not_found(id))?;
        if let Some(existing) = &user.provider_subscription_id {
            return Ok(ConditionalWrite::AlreadySet(existing.clone()));
        }
        if &user.plan_id != expected_plan {
            return Err(DomainError::concurrency_conflict("User", id));
        }
        user.attach_subscription(snapshot);
        user.version += 1;
        Ok(ConditionalWrite::Applied)
    }

    async fn update(&self, user: &BillingUser) -> Result<BillingUser, DomainError> {
        let mut users = self.users.write().await;
        let stored = users
            .get_mut(&user.id)
            .ok_or_else(|| DomainError::user_not_found(&user.id))?;
        if stored.version != user.version {
            return Err(DomainError::concurrency_conflict("User", &user.id));
        }
        let mut updated = user.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::fixtures::{pro_plan, snapshot, user_on};

    #[tokio::test]
    async fn customer_id_is_set_once() {
        let repo = InMemoryUserRepository::new();
        let user = user_on("u1", &pro_plan());
        repo.save(&user).await.unwrap();

        let first = repo.set_provider_customer_id_if_absent(&user.id, "cus_a").await.unwrap();
        let second = repo.set_provider_customer_id_if_absent(&user.id, "cus_b").await.unwrap();

        assert_eq!(first, ConditionalWrite::Applied);
        assert_eq!(second, ConditionalWrite::AlreadySet("cus_a".into()));
        let found = repo.find_by_provider_customer_id("cus_a").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let repo = InMemoryUserRepository::new();
        let user = user_on("u1", &pro_plan());
        repo.save(&user).await.unwrap();

        let updated = repo.update(&user).await.unwrap();
        let err = repo.update(&user).await.unwrap_err();

        assert_eq!(updated.version, user.version + 1);
        assert!(err.is_concurrency_conflict());
    }

    #[tokio::test]
    async fn attach_requires_expected_plan() {
        let repo = InMemoryUserRepository::new();
        let user = user_on("u1", &pro_plan());
        repo.save(&user).await.unwrap();
        let other_plan = PlanId::new("team").unwrap();

        let err = repo
            .attach_subscription_if_absent(&user.id, &other_plan, &snapshot("sub_1", "active", 1, 2))
            .await
            .unwrap_err();

        assert!(err.is_concurrency_conflict());
    }

    #[tokio::test]
    async fn attach_keeps_existing_subscription() {
        let repo = InMemoryUserRepository::new();
        let user = user_on("u1", &pro_plan());
        repo.save(&user).await.unwrap();
        let plan_id = user.plan_id.clone();

        repo.attach_subscription_if_absent(&user.id, &plan_id, &snapshot("sub_1", "active", 1, 2))
            .await
            .unwrap();
        let second = repo
            .attach_subscription_if_absent(&user.id, &plan_id, &snapshot("sub_2", "active", 1, 2))
            .await
            .unwrap();

        assert_eq!(second, ConditionalWrite::AlreadySet("sub_1".into()));
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let repo = InMemoryUserRepository::new();
        let err = repo
            .set_provider_customer_id_if_absent(&UserId::new("ghost").unwrap(), "cus_1")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UserNotFound);
    }
}
