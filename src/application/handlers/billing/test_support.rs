//! Shared wiring for billing handler tests.

use std::sync::Arc;

use crate::adapters::memory::{
    InMemoryAuditLog, InMemoryPlanRepository, InMemoryProviderEventStore,
    InMemoryTransactionRepository, InMemoryUserRepository,
};
use crate::adapters::stripe::MockProviderGateway;
use crate::domain::billing::fixtures::pro_plan;
use crate::domain::billing::{BillingUser, IdempotentWebhookProcessor, Plan, Transaction};
use crate::domain::foundation::{PlanId, UserId};
use crate::ports::{
    AuditLog, PlanRepository, ProviderGateway, ProviderPrice, ProviderProduct,
    TransactionRepository, UserRepository,
};

use super::{
    AssignPlanHandler, BillingEventDispatcher, EnsureCustomerHandler, SyncPlanHandler,
    UpdatePlanPricingHandler, ValidatePlanHandler,
};

/// In-memory adapters plus the mock gateway, with handler builders.
#[derive(Clone)]
pub struct Harness {
    pub users: InMemoryUserRepository,
    pub plans: InMemoryPlanRepository,
    pub transactions: InMemoryTransactionRepository,
    pub audit: InMemoryAuditLog,
    pub events: InMemoryProviderEventStore,
    pub gateway: MockProviderGateway,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            users: InMemoryUserRepository::new(),
            plans: InMemoryPlanRepository::new(),
            transactions: InMemoryTransactionRepository::new(),
            audit: InMemoryAuditLog::new(),
            events: InMemoryProviderEventStore::new(),
            gateway: MockProviderGateway::new(),
        }
    }

    fn user_repo(&self) -> Arc<dyn UserRepository> {
        Arc::new(self.users.clone())
    }

    fn plan_repo(&self) -> Arc<dyn PlanRepository> {
        Arc::new(self.plans.clone())
    }

    fn transaction_repo(&self) -> Arc<dyn TransactionRepository> {
        Arc::new(self.transactions.clone())
    }

    fn audit_log(&self) -> Arc<dyn AuditLog> {
        Arc::new(self.audit.clone())
    }

    fn provider(&self) -> Arc<dyn ProviderGateway> {
        Arc::new(self.gateway.clone())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Seeding and inspection
    // ════════════════════════════════════════════════════════════════════════════

    pub async fn seed_plan(&self, plan: &Plan) {
        self.plans.save(plan).await.unwrap();
    }

    pub async fn seed_user(&self, user: &BillingUser) {
        self.users.save(user).await.unwrap();
    }

    /// Saves the pro plan already linked to `prod_pro` / `price_pro`, with
    /// matching objects on the mock provider.
    pub async fn seed_synced_pro_plan(&self) -> Plan {
        let mut plan = pro_plan();
        self.gateway.insert_product(ProviderProduct {
            id: "prod_pro".into(),
            name: plan.name.clone(),
            active: true,
        });
        self.gateway.insert_price(ProviderPrice {
            id: "price_pro".into(),
            product_id: "prod_pro".into(),
            unit_amount: Some(plan.price),
            currency: plan.currency.clone(),
            interval: Some(plan.interval.as_str().to_string()),
            active: true,
        });
        plan.provider_product_id = Some("prod_pro".into());
        plan.provider_price_id = Some("price_pro".into());
        self.seed_plan(&plan).await;
        plan
    }

    pub async fn record(&self, transaction: &Transaction) {
        self.transactions.record(transaction).await.unwrap();
    }

    pub async fn plan(&self, id: &str) -> Plan {
        self.plans
            .find_by_id(&PlanId::new(id).unwrap())
            .await
            .unwrap()
            .expect("plan exists")
    }

    pub async fn user(&self, id: &str) -> BillingUser {
        self.users
            .find_by_id(&UserId::new(id).unwrap())
            .await
            .unwrap()
            .expect("user exists")
    }

    pub async fn transaction(&self, source_ref: &str) -> Option<Transaction> {
        self.transactions.find_by_source_ref(source_ref).await.unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Handlers
    // ════════════════════════════════════════════════════════════════════════════

    pub fn sync_handler(&self) -> SyncPlanHandler {
        SyncPlanHandler::new(self.plan_repo(), self.provider(), self.audit_log())
    }

    pub fn ensure_handler(&self) -> EnsureCustomerHandler {
        EnsureCustomerHandler::new(
            self.user_repo(),
            self.plan_repo(),
            self.transaction_repo(),
            self.provider(),
            self.audit_log(),
        )
    }

    pub fn validate_handler(&self) -> ValidatePlanHandler {
        ValidatePlanHandler::new(self.plan_repo(), self.provider())
    }

    pub fn assign_handler(&self) -> AssignPlanHandler {
        AssignPlanHandler::new(
            self.user_repo(),
            self.plan_repo(),
            self.provider(),
            self.audit_log(),
            Arc::new(self.sync_handler()),
            Arc::new(self.validate_handler()),
            Arc::new(self.ensure_handler()),
        )
    }

    pub fn pricing_handler(&self) -> UpdatePlanPricingHandler {
        UpdatePlanPricingHandler::new(self.plan_repo(), self.provider(), self.audit_log())
    }

    pub fn dispatcher(&self) -> BillingEventDispatcher {
        BillingEventDispatcher::new(
            self.user_repo(),
            self.plan_repo(),
            self.transaction_repo(),
            self.provider(),
            self.audit_log(),
        )
    }

    pub fn processor(&self) -> IdempotentWebhookProcessor {
        IdempotentWebhookProcessor::new(Arc::new(self.events.clone()), Arc::new(self.dispatcher()))
    }
}
