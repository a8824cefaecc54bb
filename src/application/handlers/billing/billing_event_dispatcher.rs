//! BillingEventDispatcher - Applies verified provider events to local billing state.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::billing::{
    payment_source_ref, AuditAction, AuditLogEntry, AuditObjectType, BillingError, BillingUser,
    CheckoutSessionObject, InvoiceObject, PaymentIntentObject, Plan, ProviderEvent,
    ProviderEventKind, SubscriptionObject, SubscriptionSnapshot, Transaction, TransitionOutcome,
    WebhookDispatcher, WebhookError, PROVIDER_ACTOR,
};
use crate::domain::foundation::{PlanId, UserId};
use crate::ports::{
    AuditLog, ConditionalWrite, PlanRepository, ProviderGateway, SaveResult,
    TransactionRepository, UserRepository,
};

const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Routes each event kind to the state change it implies.
///
/// Runs behind `IdempotentWebhookProcessor`, which guarantees a given event
/// id is dispatched to completion at most once. Errors follow the webhook
/// taxonomy: retryable failures make the provider redeliver, anything else
/// is acknowledged and recorded as rejected.
pub struct BillingEventDispatcher {
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn PlanRepository>,
    transactions: Arc<dyn TransactionRepository>,
    gateway: Arc<dyn ProviderGateway>,
    audit: Arc<dyn AuditLog>,
}

/// A payment as reported by an invoice or payment intent.
struct PaymentRecord<'a> {
    source_ref: String,
    customer_id: Option<&'a str>,
    amount: i64,
    currency: &'a str,
    status: &'a str,
    subscription_id: Option<&'a str>,
}

#[async_trait]
impl WebhookDispatcher for BillingEventDispatcher {
    async fn dispatch(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        match event.kind()? {
            ProviderEventKind::CheckoutSessionCompleted(session) => {
                self.on_checkout_completed(event, &session).await
            }
            ProviderEventKind::SubscriptionCreated(subscription)
            | ProviderEventKind::SubscriptionUpdated(subscription) => {
                self.on_subscription_changed(event, &subscription).await
            }
            ProviderEventKind::SubscriptionDeleted(subscription) => {
                self.on_subscription_deleted(event, &subscription).await
            }
            ProviderEventKind::InvoicePaymentSucceeded(invoice) => {
                self.record_payment(event, invoice_payment(&invoice)).await
            }
            ProviderEventKind::PaymentIntentSucceeded(intent) => {
                self.record_payment(event, intent_payment(&intent)).await
            }
            ProviderEventKind::Unrecognized(event_type) => {
                tracing::info!(event_id = %event.id, event_type = %event_type, "Ignoring unhandled event type");
                Err(WebhookError::Ignored(format!("unhandled event type {}", event_type)))
            }
        }
    }
}

impl BillingEventDispatcher {
    pub fn new(
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn PlanRepository>,
        transactions: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn ProviderGateway>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            users,
            plans,
            transactions,
            gateway,
            audit,
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // checkout.session.completed
    // ════════════════════════════════════════════════════════════════════════════

    async fn on_checkout_completed(
        &self,
        event: &ProviderEvent,
        session: &CheckoutSessionObject,
    ) -> Result<(), WebhookError> {
        // 1. Metadata names the user and plan
        let user_id = session.user_id().ok_or(WebhookError::MissingMetadata("userId"))?;
        let plan_id = session.plan_id().ok_or(WebhookError::MissingMetadata("planId"))?;
        let user_id = UserId::new(user_id)
            .map_err(|e| WebhookError::Rejected(format!("invalid userId metadata: {}", e)))?;
        let plan_id = PlanId::new(plan_id)
            .map_err(|e| WebhookError::Rejected(format!("invalid planId metadata: {}", e)))?;

        let user = self
            .users
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| WebhookError::Rejected(format!("user {} not found", user_id)))?;
        let plan = self
            .plans
            .find_by_id(&plan_id)
            .await?
            .ok_or_else(|| WebhookError::Rejected(format!("plan {} not found", plan_id)))?;

        // 2. Billing period comes from the subscription itself
        let snapshot = match &session.subscription {
            Some(sub_id) => self.fetch_snapshot(event, sub_id).await,
            None => None,
        };

        // 3. Apply to the user
        let customer_id = session.customer.as_deref();
        let subscription_id = session.subscription.as_deref();
        let updated = self
            .update_user(user, |user| {
                user.apply_checkout(&plan, customer_id, snapshot.as_ref(), subscription_id)
            })
            .await?;

        // 4. Record the payment
        let customer_for_payment = session
            .customer
            .clone()
            .or_else(|| updated.provider_customer_id.clone());
        let recorded = match customer_for_payment {
            Some(customer) => {
                let transaction = Transaction::new(
                    payment_source_ref(
                        session.invoice.as_deref(),
                        session.payment_intent.as_deref(),
                        &session.id,
                    ),
                    customer,
                    session.amount_total.unwrap_or(plan.price),
                    session.currency.as_deref().unwrap_or(&plan.currency),
                    session.payment_status.as_deref().unwrap_or("paid"),
                )
                .with_user(Some(updated.id.clone()))
                .with_subscription(session.subscription.clone());
                self.transactions.record(&transaction).await? == SaveResult::Inserted
            }
            None => {
                tracing::warn!(
                    event_id = %event.id,
                    user_id = %updated.id,
                    "Checkout has no customer; payment not recorded"
                );
                false
            }
        };

        // 5. Payments seen before the customer was linked now belong to the user
        let backfilled = match &updated.provider_customer_id {
            Some(customer) => self.backfill_payments(customer, &updated.id).await?,
            None => 0,
        };

        // 6. Audit
        let entry = AuditLogEntry::builder(
            AuditAction::CheckoutCompleted,
            AuditObjectType::User,
            &updated.id,
        )
        .actor(PROVIDER_ACTOR)
        .detail("event_id", &event.id)
        .detail("plan_id", &plan.id)
        .detail("customer_id", &updated.provider_customer_id)
        .detail("subscription_id", &updated.provider_subscription_id)
        .detail("transaction_recorded", recorded)
        .detail("transactions_backfilled", backfilled)
        .build();
        self.audit.append(&entry).await?;

        tracing::info!(
            event_id = %event.id,
            user_id = %updated.id,
            plan_id = %plan.id,
            "Checkout applied"
        );
        Ok(())
    }

    async fn fetch_snapshot(
        &self,
        event: &ProviderEvent,
        subscription_id: &str,
    ) -> Option<SubscriptionSnapshot> {
        match self.gateway.get_subscription(subscription_id).await {
            Ok(Some(subscription)) => Some(subscription.snapshot()),
            Ok(None) => {
                tracing::warn!(event_id = %event.id, subscription_id, "Checkout subscription not found upstream");
                None
            }
            Err(e) => {
                // The subscription events that follow carry the periods.
                tracing::warn!(
                    event_id = %event.id,
                    subscription_id,
                    error = %e,
                    "Could not fetch checkout subscription; periods left unset"
                );
                None
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // customer.subscription.*
    // ════════════════════════════════════════════════════════════════════════════

    async fn on_subscription_changed(
        &self,
        event: &ProviderEvent,
        subscription: &SubscriptionObject,
    ) -> Result<(), WebhookError> {
        let user = self.resolve_subscriber(subscription).await?;
        let current_plan = self.current_plan(&user).await?;
        let target_plan = self.target_plan(event, subscription).await?;
        let snapshot = subscription.snapshot();

        let before = user.clone();
        let updated = self
            .update_user(user, |user| {
                if user.plan_id != current_plan.id && target_plan.is_none() {
                    return Err(BillingError::ConcurrentModification(format!(
                        "user {} changed plan while applying subscription {}",
                        user.id, snapshot.subscription_id
                    )));
                }
                user.apply_subscription_update(&snapshot, &current_plan, target_plan.as_ref())
            })
            .await?;

        if updated.version == before.version {
            tracing::debug!(event_id = %event.id, user_id = %updated.id, "Subscription event changed nothing");
            return Ok(());
        }

        let entry = AuditLogEntry::builder(
            AuditAction::SubscriptionSynced,
            AuditObjectType::User,
            &updated.id,
        )
        .actor(PROVIDER_ACTOR)
        .detail("event_id", &event.id)
        .detail("event_type", &event.event_type)
        .detail("subscription_id", &subscription.id)
        .detail("provider_status", &subscription.status)
        .detail("status", updated.subscription_status.as_str())
        .detail("from_plan_id", &before.plan_id)
        .detail("plan_id", &updated.plan_id)
        .build();
        self.audit.append(&entry).await?;

        tracing::info!(
            event_id = %event.id,
            user_id = %updated.id,
            subscription_id = %subscription.id,
            status = %updated.subscription_status,
            "Subscription state applied"
        );
        Ok(())
    }

    async fn on_subscription_deleted(
        &self,
        event: &ProviderEvent,
        subscription: &SubscriptionObject,
    ) -> Result<(), WebhookError> {
        // Unresolved customers are retried: checkout may still be in flight.
        let user = self.resolve_subscriber(subscription).await?;
        let canceled_at = subscription.snapshot().canceled_at;

        let version = user.version;
        let updated = self
            .update_user(user, |user| {
                Ok(user.apply_subscription_deleted(&subscription.id, canceled_at))
            })
            .await?;
        if updated.version == version {
            return Ok(());
        }

        let entry = AuditLogEntry::builder(
            AuditAction::SubscriptionCanceled,
            AuditObjectType::User,
            &updated.id,
        )
        .actor(PROVIDER_ACTOR)
        .detail("event_id", &event.id)
        .detail("subscription_id", &subscription.id)
        .detail("plan_id", &updated.plan_id)
        .detail("canceled_at", updated.subscription_canceled_at.map(|t| t.as_unix_secs()))
        .build();
        self.audit.append(&entry).await?;

        tracing::info!(
            event_id = %event.id,
            user_id = %updated.id,
            subscription_id = %subscription.id,
            "Subscription canceled"
        );
        Ok(())
    }

    /// Finds the local user behind a subscription.
    ///
    /// The stored customer id wins. Subscriptions created through
    /// provisioning also carry `userId` metadata, which links the customer
    /// when the checkout event has not arrived yet.
    async fn resolve_subscriber(
        &self,
        subscription: &SubscriptionObject,
    ) -> Result<BillingUser, WebhookError> {
        if let Some(customer) = &subscription.customer {
            if let Some(user) = self.users.find_by_provider_customer_id(customer).await? {
                return Ok(user);
            }
        }

        let unresolved = || {
            WebhookError::CustomerNotResolved(
                subscription
                    .customer
                    .clone()
                    .unwrap_or_else(|| subscription.id.clone()),
            )
        };

        let user_id = match subscription.user_id().map(UserId::new) {
            Some(Ok(id)) => id,
            _ => return Err(unresolved()),
        };
        let user = self.users.find_by_id(&user_id).await?.ok_or_else(unresolved)?;

        if let Some(customer) = &subscription.customer {
            if self
                .users
                .set_provider_customer_id_if_absent(&user.id, customer)
                .await?
                == ConditionalWrite::Applied
            {
                tracing::info!(
                    user_id = %user.id,
                    customer_id = %customer,
                    "Linked customer from subscription metadata"
                );
                self.backfill_payments(customer, &user.id).await?;
            }
            return self.users.find_by_id(&user_id).await?.ok_or_else(unresolved);
        }
        Ok(user)
    }

    async fn backfill_payments(&self, customer_id: &str, user_id: &UserId) -> Result<u64, WebhookError> {
        let count = self.transactions.backfill_user_id(customer_id, user_id).await?;
        if count > 0 {
            tracing::info!(
                user_id = %user_id,
                customer_id,
                count,
                "Backfilled user on earlier payments"
            );
        }
        Ok(count)
    }

    async fn current_plan(&self, user: &BillingUser) -> Result<Plan, WebhookError> {
        self.plans.find_by_id(&user.plan_id).await?.ok_or_else(|| {
            WebhookError::Rejected(format!(
                "user {} refers to missing plan {}",
                user.id, user.plan_id
            ))
        })
    }

    /// Plan named by metadata, else the plan owning the subscribed product.
    async fn target_plan(
        &self,
        event: &ProviderEvent,
        subscription: &SubscriptionObject,
    ) -> Result<Option<Plan>, WebhookError> {
        if let Some(Ok(plan_id)) = subscription.plan_id().map(PlanId::new) {
            if let Some(plan) = self.plans.find_by_id(&plan_id).await? {
                return Ok(Some(plan));
            }
            tracing::warn!(event_id = %event.id, plan_id = %plan_id, "planId metadata names an unknown plan");
        }
        match subscription.product_id() {
            Some(product_id) => Ok(self.plans.find_by_provider_product_id(product_id).await?),
            None => Ok(None),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Payments
    // ════════════════════════════════════════════════════════════════════════════

    async fn record_payment(
        &self,
        event: &ProviderEvent,
        payment: PaymentRecord<'_>,
    ) -> Result<(), WebhookError> {
        let customer_id = payment.customer_id.ok_or_else(|| {
            WebhookError::Ignored(format!("payment {} has no customer", payment.source_ref))
        })?;

        // Unknown customers are recorded anyway; provisioning backfills the user.
        let user_id = self
            .users
            .find_by_provider_customer_id(customer_id)
            .await?
            .map(|user| user.id);

        let transaction = Transaction::new(
            payment.source_ref,
            customer_id,
            payment.amount,
            payment.currency,
            payment.status,
        )
        .with_user(user_id.clone())
        .with_subscription(payment.subscription_id.map(str::to_string));

        match self.transactions.record(&transaction).await? {
            SaveResult::Inserted => {
                let entry = AuditLogEntry::builder(
                    AuditAction::PaymentRecorded,
                    AuditObjectType::Transaction,
                    &transaction.id,
                )
                .actor(PROVIDER_ACTOR)
                .detail("event_id", &event.id)
                .detail("source_ref", &transaction.source_ref)
                .detail("customer_id", customer_id)
                .detail("user_id", &user_id)
                .detail("amount", transaction.amount)
                .detail("currency", &transaction.currency)
                .build();
                self.audit.append(&entry).await?;

                tracing::info!(
                    event_id = %event.id,
                    source_ref = %transaction.source_ref,
                    customer_id,
                    amount = transaction.amount,
                    "Payment recorded"
                );
            }
            SaveResult::AlreadyExists => {
                tracing::debug!(
                    event_id = %event.id,
                    source_ref = %transaction.source_ref,
                    "Payment already recorded"
                );
            }
        }
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Helpers
    // ════════════════════════════════════════════════════════════════════════════

    /// Applies `apply` and persists, reloading on version conflicts.
    ///
    /// Returns the stored user; unchanged users are returned as loaded.
    async fn update_user<F>(&self, mut user: BillingUser, mut apply: F) -> Result<BillingUser, WebhookError>
    where
        F: FnMut(&mut BillingUser) -> Result<TransitionOutcome, BillingError> + Send,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let snapshot = user.clone();
            if !apply(&mut user)?.is_changed() {
                return Ok(snapshot);
            }
            match self.users.update(&user).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_concurrency_conflict() && attempt < MAX_UPDATE_ATTEMPTS => {
                    tracing::debug!(user_id = %user.id, attempt, "User changed concurrently, reloading");
                    user = self.users.find_by_id(&user.id).await?.ok_or_else(|| {
                        WebhookError::Rejected(format!("user {} disappeared", snapshot.id))
                    })?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(WebhookError::Database(format!(
            "user {} kept changing while applying event",
            user.id
        )))
    }
}

fn invoice_payment(invoice: &InvoiceObject) -> PaymentRecord<'_> {
    PaymentRecord {
        source_ref: payment_source_ref(Some(&invoice.id), invoice.payment_intent.as_deref(), &invoice.id),
        customer_id: invoice.customer.as_deref(),
        amount: invoice.amount_paid,
        currency: &invoice.currency,
        status: invoice.status.as_deref().unwrap_or("paid"),
        subscription_id: invoice.subscription.as_deref(),
    }
}

fn intent_payment(intent: &PaymentIntentObject) -> PaymentRecord<'_> {
    PaymentRecord {
        source_ref: payment_source_ref(intent.invoice.as_deref(), Some(&intent.id), &intent.id),
        customer_id: intent.customer.as_deref(),
        amount: intent.settled_amount(),
        currency: &intent.currency,
        status: intent.status.as_deref().unwrap_or("succeeded"),
        subscription_id: None,
    }
}
