// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries entitlement quantities and plan keys
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tierlift Billing Module
//!
//! Decision and orchestration logic for upgrading an organization's plan.
//!
//! ## Features
//!
//! - **Plan Catalog**: Plan definitions keyed by plan type and product category
//! - **Upgrade Query**: Organization, plan, and usage lookups (Postgres)
//! - **Entitlements**: Secrets add-on seat and service account validation
//! - **Feature Flags**: Release gating of Secrets add-on billing
//! - **Provisioning**: Stripe subscription creation, recorded once per organization
//! - **Events**: Completed upgrades written to the billing event log

pub mod catalog;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod features;
pub mod provisioning;
pub mod query;
pub mod upgrade;

#[cfg(test)]
mod testing;

// Catalog
pub use catalog::{CandidatePlans, PlanCatalog, PlanDefinition};

// Client
pub use client::{PlanPrices, PriceIds, StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{EntitlementValidator, PlanEntitlementValidator};

// Error
pub use error::{BillingError, BillingResult, Entitlement, ErrorKind};

// Events
pub use events::{
    ActorType, BillingEvent, BillingEventBuilder, BillingEventLogger, BillingEventSink,
    BillingEventType,
};

// Features
pub use features::{EnvFeatureService, FeatureService, StaticFeatureService, SECRETS_BILLING};

// Provisioning
pub use provisioning::{
    PgSubscriptionLedger, ProvisionRequest, ProvisionedSubscription, StripeGateway,
    StripeProvisioner, SubscriptionGateway, SubscriptionLedger, SubscriptionProvisioner,
};

// Query
pub use query::{
    EntitlementUsage, Organization, OrganizationUpgradeQuery, PgOrganizationUpgradeQuery,
};

// Upgrade
pub use upgrade::{
    UpgradeGuard, UpgradeLocks, UpgradeOrchestrator, UpgradeOutcome, UpgradeRequest, UpgradeState,
};

use std::sync::Arc;

use sqlx::PgPool;

/// Upgrade workflow wired to Postgres, Stripe, and environment flags
pub struct BillingService {
    pub catalog: Arc<PlanCatalog>,
    pub upgrades: UpgradeOrchestrator,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_features(
            stripe,
            pool,
            Arc::new(EnvFeatureService::from_env()),
        ))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_features(
            StripeClient::new(config),
            pool,
            Arc::new(EnvFeatureService::from_env()),
        )
    }

    pub fn with_features(
        stripe: StripeClient,
        pool: PgPool,
        features: Arc<dyn FeatureService>,
    ) -> Self {
        let catalog = Arc::new(PlanCatalog::standard());
        let query: Arc<dyn OrganizationUpgradeQuery> = Arc::new(PgOrganizationUpgradeQuery::new(
            pool.clone(),
            catalog.clone(),
        ));

        let upgrades = UpgradeOrchestrator::new(
            query.clone(),
            Arc::new(PlanEntitlementValidator::new(query)),
            Arc::new(StripeProvisioner::new(stripe, pool.clone())),
            Arc::new(BillingEventLogger::new(pool)),
            features,
        );

        Self { catalog, upgrades }
    }
}
