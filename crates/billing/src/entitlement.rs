//! Entitlement validation for plan upgrades
//!
//! Checks that the add-on quantities an upgrade would leave an organization
//! with are allowed by the target plan and do not drop below what the
//! organization already uses.

use std::sync::Arc;

use async_trait::async_trait;
use tierlift_shared::ProductCategory;

use crate::catalog::PlanDefinition;
use crate::error::{BillingError, BillingResult, Entitlement};
use crate::query::{Organization, OrganizationUpgradeQuery};
use crate::upgrade::UpgradeRequest;

#[async_trait]
pub trait EntitlementValidator: Send + Sync {
    /// Validate add-on seats against `plan`
    async fn validate_seats(
        &self,
        org: &Organization,
        plan: &PlanDefinition,
        request: &UpgradeRequest,
    ) -> BillingResult<()>;

    /// Validate add-on units (service accounts) against `plan`
    async fn validate_add_on_units(
        &self,
        org: &Organization,
        plan: &PlanDefinition,
        request: &UpgradeRequest,
    ) -> BillingResult<()>;
}

/// Limits for one entitlement, taken from a plan definition
#[derive(Debug, Clone, Copy)]
struct Allotment {
    entitlement: Entitlement,
    base: i64,
    allows_additional: bool,
    max_additional: Option<u32>,
}

impl Allotment {
    fn seats(plan: &PlanDefinition) -> Self {
        Self {
            entitlement: Entitlement::Seats,
            base: i64::from(plan.base_seats),
            allows_additional: plan.allows_additional_seats,
            max_additional: plan.max_additional_seats,
        }
    }

    fn service_accounts(plan: &PlanDefinition) -> Self {
        Self {
            entitlement: Entitlement::ServiceAccounts,
            base: i64::from(plan.base_service_accounts),
            allows_additional: plan.allows_additional_service_accounts,
            max_additional: plan.max_additional_service_accounts,
        }
    }

    /// Check `additional` on top of the base allotment against the plan and
    /// against `in_use`.
    fn check(&self, additional: i64, in_use: i64) -> BillingResult<()> {
        let requested = self.base + additional;

        if additional > 0 {
            if !self.allows_additional {
                return Err(BillingError::EntitlementLimitExceeded {
                    entitlement: self.entitlement,
                    requested,
                    maximum: self.base,
                });
            }
            if let Some(max) = self.max_additional {
                let maximum = self.base + i64::from(max);
                if requested > maximum {
                    return Err(BillingError::EntitlementLimitExceeded {
                        entitlement: self.entitlement,
                        requested,
                        maximum,
                    });
                }
            }
        }

        let minimum = self.base.max(in_use);
        if requested < minimum {
            return Err(BillingError::EntitlementViolation {
                entitlement: self.entitlement,
                requested,
                minimum,
            });
        }

        Ok(())
    }
}

/// Validator that compares requests against plan limits and current usage
#[derive(Clone)]
pub struct PlanEntitlementValidator {
    query: Arc<dyn OrganizationUpgradeQuery>,
}

impl PlanEntitlementValidator {
    pub fn new(query: Arc<dyn OrganizationUpgradeQuery>) -> Self {
        Self { query }
    }

    fn ensure_secrets_plan(plan: &PlanDefinition) -> BillingResult<()> {
        if plan.product != ProductCategory::Secrets {
            return Err(BillingError::Internal(format!(
                "Add-on entitlements validated against a {} plan definition",
                plan.product
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementValidator for PlanEntitlementValidator {
    async fn validate_seats(
        &self,
        org: &Organization,
        plan: &PlanDefinition,
        request: &UpgradeRequest,
    ) -> BillingResult<()> {
        Self::ensure_secrets_plan(plan)?;
        let usage = self.query.resolve_usage(org.id).await?;
        let additional = i64::from(request.secrets_seats.unwrap_or(0));

        Allotment::seats(plan)
            .check(additional, usage.occupied_secrets_seats)
            .inspect_err(|e| {
                tracing::debug!(org_id = %org.id, plan = %plan.plan_type, error = %e, "Seat validation failed");
            })
    }

    async fn validate_add_on_units(
        &self,
        org: &Organization,
        plan: &PlanDefinition,
        request: &UpgradeRequest,
    ) -> BillingResult<()> {
        Self::ensure_secrets_plan(plan)?;
        let usage = self.query.resolve_usage(org.id).await?;
        let additional = i64::from(request.additional_service_accounts.unwrap_or(0));

        Allotment::service_accounts(plan)
            .check(additional, usage.service_accounts)
            .inspect_err(|e| {
                tracing::debug!(org_id = %org.id, plan = %plan.plan_type, error = %e, "Service account validation failed");
            })
    }
}
