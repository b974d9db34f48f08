//! Read side of the upgrade workflow
//!
//! Resolves organizations, their current plan, candidate plans for a requested
//! plan type, and the usage counts entitlement checks compare against. Nothing
//! here writes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tierlift_shared::{PlanType, ProductCategory};
use uuid::Uuid;

use crate::catalog::{CandidatePlans, PlanCatalog, PlanDefinition};
use crate::error::{BillingError, BillingResult};

/// Billing view of an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub plan_type: PlanType,
    /// Base product seats currently billed
    pub seats: Option<i32>,
    /// Payment gateway customer. Present when a payment method is on file.
    pub gateway_customer_id: Option<String>,
    /// Payment gateway subscription. Present when a paid subscription is live.
    pub gateway_subscription_id: Option<String>,
    /// Whether the Secrets add-on is enabled
    pub use_secrets: bool,
}

impl Organization {
    pub fn has_active_subscription(&self) -> bool {
        self.gateway_subscription_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    pub fn has_payment_method(&self) -> bool {
        self.gateway_customer_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }
}

/// Committed usage of add-on entitlements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntitlementUsage {
    /// Members with access to the Secrets add-on
    pub occupied_secrets_seats: i64,
    /// Service accounts created in the Secrets add-on
    pub service_accounts: i64,
}

#[async_trait]
pub trait OrganizationUpgradeQuery: Send + Sync {
    async fn resolve_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>>;

    /// Base product definition for the organization's current plan type
    async fn resolve_current_plan(&self, plan_type: PlanType) -> BillingResult<PlanDefinition>;

    /// One definition per product category sold under `plan_type`
    async fn resolve_candidate_plans(&self, plan_type: PlanType)
        -> BillingResult<CandidatePlans>;

    async fn resolve_usage(&self, org_id: Uuid) -> BillingResult<EntitlementUsage>;
}

/// Postgres-backed query. Plan definitions come from the in-memory catalog.
#[derive(Clone)]
pub struct PgOrganizationUpgradeQuery {
    pool: PgPool,
    catalog: Arc<PlanCatalog>,
}

impl PgOrganizationUpgradeQuery {
    pub fn new(pool: PgPool, catalog: Arc<PlanCatalog>) -> Self {
        Self { pool, catalog }
    }
}

#[async_trait]
impl OrganizationUpgradeQuery for PgOrganizationUpgradeQuery {
    async fn resolve_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>> {
        let org: Option<Organization> = sqlx::query_as(
            r#"
            SELECT id, name, plan_type, seats, gateway_customer_id,
                   gateway_subscription_id, use_secrets
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(org)
    }

    async fn resolve_current_plan(&self, plan_type: PlanType) -> BillingResult<PlanDefinition> {
        self.catalog
            .get(plan_type, ProductCategory::Base)
            .cloned()
            .ok_or(BillingError::PlanNotFound {
                plan_type,
                product: ProductCategory::Base,
            })
    }

    async fn resolve_candidate_plans(
        &self,
        plan_type: PlanType,
    ) -> BillingResult<CandidatePlans> {
        CandidatePlans::from_definitions(
            plan_type,
            self.catalog.plans_for(plan_type).into_iter().cloned(),
        )
    }

    async fn resolve_usage(&self, org_id: Uuid) -> BillingResult<EntitlementUsage> {
        let (occupied_secrets_seats,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM organization_users
            WHERE organization_id = $1
              AND access_secrets = TRUE
              AND status <> 'revoked'
            "#,
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let (service_accounts,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM service_accounts WHERE organization_id = $1")
                .bind(org_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(EntitlementUsage {
            occupied_secrets_seats,
            service_accounts,
        })
    }
}
