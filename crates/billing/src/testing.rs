//! In-memory doubles for upgrade workflow tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tierlift_shared::{PlanType, ProductCategory};
use uuid::Uuid;

use crate::catalog::{CandidatePlans, PlanCatalog, PlanDefinition};
use crate::entitlement::EntitlementValidator;
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventBuilder, BillingEventSink};
use crate::features::{StaticFeatureService, SECRETS_BILLING};
use crate::provisioning::{ProvisionRequest, ProvisionedSubscription, SubscriptionProvisioner};
use crate::query::{EntitlementUsage, Organization, OrganizationUpgradeQuery};
use crate::upgrade::{UpgradeOrchestrator, UpgradeRequest};

pub fn organization(plan_type: PlanType) -> Organization {
    Organization {
        id: Uuid::new_v4(),
        name: "Acme".to_string(),
        plan_type,
        seats: Some(5),
        gateway_customer_id: None,
        gateway_subscription_id: None,
        use_secrets: false,
    }
}

/// Organization that passes both preconditions
pub fn eligible_organization(plan_type: PlanType, use_secrets: bool) -> Organization {
    Organization {
        gateway_customer_id: Some("c1".to_string()),
        use_secrets,
        ..organization(plan_type)
    }
}

#[derive(Default)]
struct State {
    orgs: HashMap<Uuid, Organization>,
    usage: HashMap<Uuid, EntitlementUsage>,
    catalog: PlanCatalog,
    candidate_lookups: usize,
    current_plan_lookups: usize,
    provisions: Vec<ProvisionRequest>,
    fail_provisioning: bool,
    preempting_subscription: Option<String>,
    provision_delay: Option<Duration>,
}

/// Query and provisioner over one shared organization table
#[derive(Clone)]
pub struct InMemoryBilling {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryBilling {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBilling {
    pub fn new() -> Self {
        let state = State {
            catalog: PlanCatalog::standard(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_organization(self, org: Organization) -> Self {
        self.state.lock().unwrap().orgs.insert(org.id, org);
        self
    }

    pub fn with_catalog(self, catalog: PlanCatalog) -> Self {
        self.state.lock().unwrap().catalog = catalog;
        self
    }

    pub fn set_usage(&self, org_id: Uuid, usage: EntitlementUsage) {
        self.state.lock().unwrap().usage.insert(org_id, usage);
    }

    pub fn fail_provisioning(&self) {
        self.state.lock().unwrap().fail_provisioning = true;
    }

    /// Another writer records `subscription_id` on the organization after
    /// the orchestrator's checks but before this provisioner records its own
    pub fn preempt_provisioning(&self, subscription_id: &str) {
        self.state.lock().unwrap().preempting_subscription = Some(subscription_id.to_string());
    }

    pub fn delay_provisioning(&self, delay: Duration) {
        self.state.lock().unwrap().provision_delay = Some(delay);
    }

    pub fn organization(&self, org_id: Uuid) -> Option<Organization> {
        self.state.lock().unwrap().orgs.get(&org_id).cloned()
    }

    pub fn candidate_lookups(&self) -> usize {
        self.state.lock().unwrap().candidate_lookups
    }

    pub fn current_plan_lookups(&self) -> usize {
        self.state.lock().unwrap().current_plan_lookups
    }

    pub fn provision_calls(&self) -> usize {
        self.state.lock().unwrap().provisions.len()
    }

    pub fn last_provision(&self) -> Option<ProvisionRequest> {
        self.state.lock().unwrap().provisions.last().cloned()
    }
}

#[async_trait]
impl OrganizationUpgradeQuery for InMemoryBilling {
    async fn resolve_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>> {
        Ok(self.organization(org_id))
    }

    async fn resolve_current_plan(&self, plan_type: PlanType) -> BillingResult<PlanDefinition> {
        let mut state = self.state.lock().unwrap();
        state.current_plan_lookups += 1;
        state
            .catalog
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
        let mut state = self.state.lock().unwrap();
        state.candidate_lookups += 1;
        CandidatePlans::from_definitions(
            plan_type,
            state.catalog.plans_for(plan_type).into_iter().cloned(),
        )
    }

    async fn resolve_usage(&self, org_id: Uuid) -> BillingResult<EntitlementUsage> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .usage
            .get(&org_id)
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SubscriptionProvisioner for InMemoryBilling {
    async fn provision(&self, request: ProvisionRequest) -> BillingResult<ProvisionedSubscription> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.provisions.push(request.clone());
            if state.fail_provisioning {
                return Err(BillingError::StripeApi("card declined".to_string()));
            }
            state.provision_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let subscription_id = format!("sub_{}", state.provisions.len());
        let preempting = state.preempting_subscription.take();
        let org = state
            .orgs
            .get_mut(&request.organization.id)
            .ok_or(BillingError::OrganizationNotFound(request.organization.id))?;

        if let Some(other) = preempting {
            org.gateway_subscription_id = Some(other);
        }

        if org.gateway_subscription_id.is_some() {
            return Err(BillingError::SubscriptionConflict(org.id));
        }

        org.plan_type = request.target_plan();
        org.seats = Some(request.base_seat_quantity() as i32);
        org.gateway_subscription_id = Some(subscription_id.clone());

        Ok(ProvisionedSubscription { subscription_id })
    }
}

/// Validator that counts calls and optionally delegates or fails
#[derive(Default)]
pub struct RecordingValidator {
    seat_calls: Mutex<Vec<ProductCategory>>,
    unit_calls: Mutex<Vec<ProductCategory>>,
    delegate: Option<Arc<dyn EntitlementValidator>>,
    fail_seats: bool,
}

impl RecordingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delegating(delegate: Arc<dyn EntitlementValidator>) -> Self {
        Self {
            delegate: Some(delegate),
            ..Self::default()
        }
    }

    pub fn failing_seats() -> Self {
        Self {
            fail_seats: true,
            ..Self::default()
        }
    }

    pub fn seat_calls(&self) -> usize {
        self.seat_calls.lock().unwrap().len()
    }

    pub fn unit_calls(&self) -> usize {
        self.unit_calls.lock().unwrap().len()
    }

    /// Product categories of every plan definition passed in
    pub fn seen_products(&self) -> Vec<ProductCategory> {
        let mut seen = self.seat_calls.lock().unwrap().clone();
        seen.extend(self.unit_calls.lock().unwrap().iter().copied());
        seen
    }
}

#[async_trait]
impl EntitlementValidator for RecordingValidator {
    async fn validate_seats(
        &self,
        org: &Organization,
        plan: &PlanDefinition,
        request: &UpgradeRequest,
    ) -> BillingResult<()> {
        self.seat_calls.lock().unwrap().push(plan.product);
        if self.fail_seats {
            return Err(BillingError::EntitlementViolation {
                entitlement: crate::error::Entitlement::Seats,
                requested: 0,
                minimum: 1,
            });
        }
        match &self.delegate {
            Some(inner) => inner.validate_seats(org, plan, request).await,
            None => Ok(()),
        }
    }

    async fn validate_add_on_units(
        &self,
        org: &Organization,
        plan: &PlanDefinition,
        request: &UpgradeRequest,
    ) -> BillingResult<()> {
        self.unit_calls.lock().unwrap().push(plan.product);
        match &self.delegate {
            Some(inner) => inner.validate_add_on_units(org, plan, request).await,
            None => Ok(()),
        }
    }
}

/// Event sink that keeps events in memory
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<BillingEvent>>,
    fail: bool,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<BillingEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingEventSink for RecordingEventSink {
    async fn log_event(&self, event: BillingEventBuilder) -> BillingResult<Uuid> {
        if self.fail {
            return Err(BillingError::Database("billing_events unavailable".to_string()));
        }
        let event = event.build();
        let id = event.id;
        self.events.lock().unwrap().push(event);
        Ok(id)
    }
}

/// Orchestrator wired to in-memory doubles
pub struct Harness {
    pub orchestrator: UpgradeOrchestrator,
    pub billing: InMemoryBilling,
    pub validator: Arc<RecordingValidator>,
    pub events: Arc<RecordingEventSink>,
}

impl Harness {
    pub fn new(org: Organization, secrets_billing: bool) -> Self {
        Self::build(
            InMemoryBilling::new().with_organization(org),
            RecordingValidator::new(),
            RecordingEventSink::new(),
            secrets_billing,
        )
    }

    pub fn build(
        billing: InMemoryBilling,
        validator: RecordingValidator,
        events: RecordingEventSink,
        secrets_billing: bool,
    ) -> Self {
        let validator = Arc::new(validator);
        let events = Arc::new(events);
        let features = if secrets_billing {
            StaticFeatureService::new([SECRETS_BILLING])
        } else {
            StaticFeatureService::none()
        };

        let orchestrator = UpgradeOrchestrator::new(
            Arc::new(billing.clone()),
            validator.clone(),
            Arc::new(billing.clone()),
            events.clone(),
            Arc::new(features),
        );

        Self {
            orchestrator,
            billing,
            validator,
            events,
        }
    }
}
