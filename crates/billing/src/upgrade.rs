//! Organization plan upgrades
//!
//! `UpgradeOrchestrator::upgrade_plan` is the single entry point for moving an
//! organization without a live subscription onto a paid plan. It runs:
//!
//! 1. organization lookup
//! 2. conflict check (no live subscription)
//! 3. payment method check
//! 4. current/candidate plan resolution and upgrade-path checks
//! 5. Secrets add-on entitlement checks, only when the org uses the add-on
//!    and the `secrets-billing` flag is on
//! 6. provisioning, then a `plan_upgraded` billing event
//!
//! Every rejection happens before step 6, so a rejected call leaves the
//! organization untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tierlift_shared::{PlanType, ProductCategory, RequestContext};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::entitlement::EntitlementValidator;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventSink, BillingEventType};
use crate::features::{FeatureService, SECRETS_BILLING};
use crate::provisioning::{ProvisionRequest, SubscriptionProvisioner};
use crate::query::OrganizationUpgradeQuery;

/// Parameters of a requested upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    /// Target plan type
    pub plan: PlanType,
    /// Base product seats on top of the plan allotment
    #[serde(default)]
    pub additional_seats: u32,
    /// Secrets add-on seats on top of the plan allotment
    #[serde(default)]
    pub secrets_seats: Option<i32>,
    /// Service accounts on top of the add-on allotment
    #[serde(default)]
    pub additional_service_accounts: Option<i32>,
}

impl UpgradeRequest {
    pub fn new(plan: PlanType) -> Self {
        Self {
            plan,
            additional_seats: 0,
            secrets_seats: None,
            additional_service_accounts: None,
        }
    }
}

/// Progress of a single upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeState {
    Initiated,
    PreconditionsChecked,
    EntitlementsValidated,
    Provisioned,
    Completed,
    Rejected,
}

impl UpgradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradeState::Completed | UpgradeState::Rejected)
    }
}

impl std::fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpgradeState::Initiated => "initiated",
            UpgradeState::PreconditionsChecked => "preconditions_checked",
            UpgradeState::EntitlementsValidated => "entitlements_validated",
            UpgradeState::Provisioned => "provisioned",
            UpgradeState::Completed => "completed",
            UpgradeState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// Result of a completed upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeOutcome {
    pub org_id: Uuid,
    pub previous_plan: PlanType,
    pub new_plan: PlanType,
    pub subscription_id: String,
    pub products: Vec<ProductCategory>,
    pub state: UpgradeState,
}

/// Per-organization critical sections.
///
/// Holding an organization's guard serializes upgrades of that organization
/// within this process. Entries are dropped once no caller holds or waits on
/// them, including callers whose future was cancelled.
#[derive(Default)]
pub struct UpgradeLocks {
    locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl UpgradeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, org_id: Uuid) -> UpgradeGuard<'_> {
        // Declared before the wait so a cancelled wait releases its entry
        let mut held = UpgradeGuard {
            locks: self,
            org_id,
            guard: None,
        };
        let pending = self.entry(org_id).lock_owned();
        held.guard = Some(pending.await);
        held
    }

    pub fn tracked(&self) -> usize {
        self.map().len()
    }

    fn entry(&self, org_id: Uuid) -> Arc<Mutex<()>> {
        self.map()
            .entry(org_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn forget_if_unused(&self, org_id: Uuid) {
        let mut locks = self.map();
        if locks
            .get(&org_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&org_id);
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the duration of one organization's upgrade
pub struct UpgradeGuard<'a> {
    locks: &'a UpgradeLocks,
    org_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UpgradeGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.forget_if_unused(self.org_id);
    }
}

pub struct UpgradeOrchestrator {
    query: Arc<dyn OrganizationUpgradeQuery>,
    validator: Arc<dyn EntitlementValidator>,
    provisioner: Arc<dyn SubscriptionProvisioner>,
    events: Arc<dyn BillingEventSink>,
    features: Arc<dyn FeatureService>,
    locks: UpgradeLocks,
}

impl UpgradeOrchestrator {
    pub fn new(
        query: Arc<dyn OrganizationUpgradeQuery>,
        validator: Arc<dyn EntitlementValidator>,
        provisioner: Arc<dyn SubscriptionProvisioner>,
        events: Arc<dyn BillingEventSink>,
        features: Arc<dyn FeatureService>,
    ) -> Self {
        Self {
            query,
            validator,
            provisioner,
            events,
            features,
            locks: UpgradeLocks::new(),
        }
    }

    /// Upgrade `org_id` to `request.plan`
    pub async fn upgrade_plan(
        &self,
        ctx: &RequestContext,
        org_id: Uuid,
        request: UpgradeRequest,
    ) -> BillingResult<UpgradeOutcome> {
        tracing::info!(
            org_id = %org_id,
            plan = %request.plan,
            "Starting plan upgrade"
        );

        let result = {
            let _guard = self.locks.acquire(org_id).await;
            self.run(ctx, org_id, request).await
        };

        match &result {
            Ok(outcome) => tracing::info!(
                org_id = %org_id,
                from_plan = %outcome.previous_plan,
                to_plan = %outcome.new_plan,
                subscription_id = %outcome.subscription_id,
                "Plan upgrade completed"
            ),
            Err(e) => tracing::warn!(
                org_id = %org_id,
                state = %UpgradeState::Rejected,
                kind = ?e.kind(),
                error = %e,
                "Plan upgrade rejected"
            ),
        }

        result
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        org_id: Uuid,
        request: UpgradeRequest,
    ) -> BillingResult<UpgradeOutcome> {
        transition(org_id, UpgradeState::Initiated);

        let org = self
            .query
            .resolve_organization(org_id)
            .await?
            .ok_or(BillingError::OrganizationNotFound(org_id))?;

        if org.has_active_subscription() {
            return Err(BillingError::SubscriptionConflict(org_id));
        }

        if !org.has_payment_method() {
            return Err(BillingError::PaymentMethodRequired(
                "Organization has no billing customer; add a payment method before upgrading"
                    .to_string(),
            ));
        }

        let current_plan = self.query.resolve_current_plan(org.plan_type).await?;
        let candidates = self.query.resolve_candidate_plans(request.plan).await?;
        let target = candidates.base()?;

        if target.disabled {
            return Err(BillingError::InvalidUpgrade(format!(
                "Plan {} is no longer available",
                target.plan_type
            )));
        }

        if target.plan_type.upgrade_sort_order() <= current_plan.plan_type.upgrade_sort_order() {
            return Err(BillingError::InvalidUpgrade(format!(
                "Plan {} is not an upgrade from {}",
                target.plan_type, current_plan.plan_type
            )));
        }

        transition(org_id, UpgradeState::PreconditionsChecked);

        let secrets_billing = self.features.is_enabled(SECRETS_BILLING, ctx);
        let secrets_plan = if secrets_billing && org.use_secrets {
            let plan = candidates.require(ProductCategory::Secrets)?;
            self.validator.validate_seats(&org, plan, &request).await?;
            self.validator
                .validate_add_on_units(&org, plan, &request)
                .await?;
            Some(plan.clone())
        } else {
            tracing::debug!(
                org_id = %org_id,
                secrets_billing = secrets_billing,
                use_secrets = org.use_secrets,
                "Skipping add-on entitlement validation"
            );
            None
        };

        transition(org_id, UpgradeState::EntitlementsValidated);

        let mut products = vec![ProductCategory::Base];
        if secrets_plan.is_some() {
            products.push(ProductCategory::Secrets);
        }

        let provisioned = self
            .provisioner
            .provision(ProvisionRequest {
                organization: org.clone(),
                plan: target.clone(),
                secrets_plan,
                upgrade: request.clone(),
            })
            .await
            .map_err(|e| match e {
                BillingError::SubscriptionConflict(_) | BillingError::ProvisioningFailed(_) => e,
                other => BillingError::ProvisioningFailed(other.to_string()),
            })?;

        transition(org_id, UpgradeState::Provisioned);

        if let Err(e) = self
            .events
            .log_event(
                BillingEventBuilder::new(org_id, BillingEventType::PlanUpgraded)
                    .data(serde_json::json!({
                        "from_plan": org.plan_type,
                        "to_plan": request.plan,
                        "products": products,
                        "subscription_id": provisioned.subscription_id,
                    }))
                    .actor_opt(ctx.user_id, ActorType::User),
            )
            .await
        {
            tracing::warn!(org_id = %org_id, error = %e, "Failed to log plan upgrade event");
        }

        transition(org_id, UpgradeState::Completed);

        Ok(UpgradeOutcome {
            org_id,
            previous_plan: org.plan_type,
            new_plan: request.plan,
            subscription_id: provisioned.subscription_id,
            products,
            state: UpgradeState::Completed,
        })
    }
}

fn transition(org_id: Uuid, state: UpgradeState) {
    tracing::debug!(org_id = %org_id, state = %state, "Upgrade state");
}
