//! Subscription provisioning
//!
//! The only write in the upgrade workflow. Runs after every check has passed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    CancelSubscription, CreateSubscription, CreateSubscriptionItems, CustomerId, Subscription,
    SubscriptionId,
};
use tierlift_shared::PlanType;
use uuid::Uuid;

use crate::catalog::PlanDefinition;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::query::Organization;
use crate::upgrade::UpgradeRequest;

/// Everything needed to create the subscription for an upgrade
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub organization: Organization,
    /// Base product definition of the target plan
    pub plan: PlanDefinition,
    /// Secrets add-on definition, present when add-on billing applies
    pub secrets_plan: Option<PlanDefinition>,
    pub upgrade: UpgradeRequest,
}

impl ProvisionRequest {
    pub fn target_plan(&self) -> PlanType {
        self.plan.plan_type
    }

    /// Billed base seats (at least one)
    pub fn base_seat_quantity(&self) -> u64 {
        (u64::from(self.plan.base_seats) + u64::from(self.upgrade.additional_seats)).max(1)
    }

    pub fn secrets_seat_quantity(&self) -> Option<u64> {
        self.secrets_plan.as_ref().map(|plan| {
            let total =
                i64::from(plan.base_seats) + i64::from(self.upgrade.secrets_seats.unwrap_or(0));
            u64::try_from(total).unwrap_or(0)
        })
    }

    /// Service accounts billed beyond the add-on allotment
    pub fn additional_service_account_quantity(&self) -> Option<u64> {
        self.secrets_plan.as_ref()?;
        self.upgrade
            .additional_service_accounts
            .and_then(|n| u64::try_from(n).ok())
            .filter(|n| *n > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedSubscription {
    pub subscription_id: String,
}

#[async_trait]
pub trait SubscriptionProvisioner: Send + Sync {
    /// Create the gateway subscription and record it on the organization.
    /// Returns `SubscriptionConflict` if another subscription was recorded
    /// first.
    async fn provision(&self, request: ProvisionRequest) -> BillingResult<ProvisionedSubscription>;
}

/// Subscription operations at the payment provider
#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Create the subscription and return its provider id
    async fn create_subscription(&self, request: &ProvisionRequest) -> BillingResult<String>;

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()>;
}

/// Records a created subscription against its organization
#[async_trait]
pub trait SubscriptionLedger: Send + Sync {
    /// Returns false when the organization already carried a subscription
    async fn record_subscription(
        &self,
        request: &ProvisionRequest,
        subscription_id: &str,
    ) -> BillingResult<bool>;
}

/// Stripe subscriptions priced from `PriceIds`
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn subscription_items(
        &self,
        request: &ProvisionRequest,
    ) -> BillingResult<Vec<CreateSubscriptionItems>> {
        let prices = &self.stripe.config().price_ids;
        let plan = request.target_plan();

        let seat_price = prices.seat_price_for(plan).ok_or_else(|| {
            BillingError::Config(format!(
                "STRIPE_PRICE_{}_SEAT not configured",
                plan.env_key()
            ))
        })?;

        let mut items = vec![CreateSubscriptionItems {
            price: Some(seat_price.to_string()),
            quantity: Some(request.base_seat_quantity()),
            ..Default::default()
        }];

        if let Some(quantity) = request.secrets_seat_quantity() {
            let price = prices.secrets_seat_price_for(plan).ok_or_else(|| {
                BillingError::Config(format!(
                    "STRIPE_PRICE_{}_SECRETS_SEAT not configured",
                    plan.env_key()
                ))
            })?;
            items.push(CreateSubscriptionItems {
                price: Some(price.to_string()),
                quantity: Some(quantity),
                ..Default::default()
            });
        }

        if let Some(quantity) = request.additional_service_account_quantity() {
            let price = prices.service_account_price_for(plan).ok_or_else(|| {
                BillingError::Config(format!(
                    "STRIPE_PRICE_{}_SERVICE_ACCOUNT not configured",
                    plan.env_key()
                ))
            })?;
            items.push(CreateSubscriptionItems {
                price: Some(price.to_string()),
                quantity: Some(quantity),
                ..Default::default()
            });
        }

        Ok(items)
    }
}

#[async_trait]
impl SubscriptionGateway for StripeGateway {
    async fn create_subscription(&self, request: &ProvisionRequest) -> BillingResult<String> {
        let org_id = request.organization.id;
        let customer_id = request
            .organization
            .gateway_customer_id
            .as_deref()
            .ok_or_else(|| {
                BillingError::PaymentMethodRequired(format!(
                    "Organization {} has no billing customer",
                    org_id
                ))
            })?
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("org_id".to_string(), org_id.to_string());
        metadata.insert("plan".to_string(), request.target_plan().to_string());

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(self.subscription_items(request)?);
        params.metadata = Some(metadata);

        let subscription = Subscription::create(self.stripe.inner(), params).await?;
        Ok(subscription.id.to_string())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?;

        let params = CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };

        Subscription::cancel(self.stripe.inner(), &id, params).await?;
        Ok(())
    }
}

/// Writes the subscription onto `organizations` unless one is already there
#[derive(Clone)]
pub struct PgSubscriptionLedger {
    pool: PgPool,
}

impl PgSubscriptionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionLedger for PgSubscriptionLedger {
    async fn record_subscription(
        &self,
        request: &ProvisionRequest,
        subscription_id: &str,
    ) -> BillingResult<bool> {
        let seats = i32::try_from(request.base_seat_quantity()).unwrap_or(i32::MAX);
        let use_secrets = request.secrets_plan.is_some() || request.organization.use_secrets;

        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET plan_type = $2,
                seats = $3,
                gateway_subscription_id = $4,
                use_secrets = $5,
                updated_at = NOW()
            WHERE id = $1 AND gateway_subscription_id IS NULL
            "#,
        )
        .bind(request.organization.id)
        .bind(request.target_plan())
        .bind(seats)
        .bind(subscription_id)
        .bind(use_secrets)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}

/// Creates the provider subscription, then records it.
/// A subscription that cannot be recorded is cancelled again.
#[derive(Clone)]
pub struct StripeProvisioner {
    gateway: Arc<dyn SubscriptionGateway>,
    ledger: Arc<dyn SubscriptionLedger>,
}

impl StripeProvisioner {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self::with_parts(
            Arc::new(StripeGateway::new(stripe)),
            Arc::new(PgSubscriptionLedger::new(pool)),
        )
    }

    pub fn with_parts(
        gateway: Arc<dyn SubscriptionGateway>,
        ledger: Arc<dyn SubscriptionLedger>,
    ) -> Self {
        Self { gateway, ledger }
    }

    async fn cancel_orphaned(&self, org_id: Uuid, subscription_id: &str) {
        if let Err(e) = self.gateway.cancel_subscription(subscription_id).await {
            tracing::error!(
                org_id = %org_id,
                subscription_id = %subscription_id,
                error = %e,
                "Failed to cancel orphaned subscription, manual cleanup required"
            );
        }
    }
}

#[async_trait]
impl SubscriptionProvisioner for StripeProvisioner {
    async fn provision(&self, request: ProvisionRequest) -> BillingResult<ProvisionedSubscription> {
        let org_id = request.organization.id;
        let subscription_id = self.gateway.create_subscription(&request).await?;

        match self
            .ledger
            .record_subscription(&request, &subscription_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    org_id = %org_id,
                    subscription_id = %subscription_id,
                    "Organization gained a subscription while provisioning, cancelling the new one"
                );
                self.cancel_orphaned(org_id, &subscription_id).await;
                return Err(BillingError::SubscriptionConflict(org_id));
            }
            Err(e) => {
                tracing::error!(
                    org_id = %org_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Failed to record subscription, cancelling it"
                );
                self.cancel_orphaned(org_id, &subscription_id).await;
                return Err(e);
            }
        }

        tracing::info!(
            org_id = %org_id,
            subscription_id = %subscription_id,
            plan = %request.target_plan(),
            "Created subscription"
        );

        Ok(ProvisionedSubscription { subscription_id })
    }
}
