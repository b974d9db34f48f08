//! Plan catalog
//!
//! Static reference data describing what each plan type includes, looked up by
//! (plan type, product category).

use std::collections::BTreeMap;

use serde::Serialize;
use tierlift_shared::{PlanType, ProductCategory};

use crate::error::{BillingError, BillingResult};

/// Definition of one product category of a plan type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDefinition {
    pub plan_type: PlanType,
    pub product: ProductCategory,
    pub name: String,
    /// Seats included with the plan
    pub base_seats: u32,
    /// Service accounts included with the plan (Secrets add-on only)
    pub base_service_accounts: u32,
    pub allows_additional_seats: bool,
    pub allows_additional_service_accounts: bool,
    /// Cap on additional seats. `None` means unlimited.
    pub max_additional_seats: Option<u32>,
    /// Cap on additional service accounts. `None` means unlimited.
    pub max_additional_service_accounts: Option<u32>,
    /// Retired plans can no longer be upgraded to
    pub disabled: bool,
}

impl PlanDefinition {
    /// Base-product definition with no extras, for building custom catalogs
    pub fn base(plan_type: PlanType, name: &str, base_seats: u32) -> Self {
        Self {
            plan_type,
            product: ProductCategory::Base,
            name: name.to_string(),
            base_seats,
            base_service_accounts: 0,
            allows_additional_seats: false,
            allows_additional_service_accounts: false,
            max_additional_seats: None,
            max_additional_service_accounts: None,
            disabled: false,
        }
    }

    /// Secrets add-on definition with no extras
    pub fn secrets(
        plan_type: PlanType,
        name: &str,
        base_seats: u32,
        base_service_accounts: u32,
    ) -> Self {
        Self {
            product: ProductCategory::Secrets,
            base_service_accounts,
            ..Self::base(plan_type, name, base_seats)
        }
    }

    pub fn with_additional_seats(mut self, max: Option<u32>) -> Self {
        self.allows_additional_seats = true;
        self.max_additional_seats = max;
        self
    }

    pub fn with_additional_service_accounts(mut self, max: Option<u32>) -> Self {
        self.allows_additional_service_accounts = true;
        self.max_additional_service_accounts = max;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// Read-only lookup of plan definitions
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: BTreeMap<(PlanType, ProductCategory), PlanDefinition>,
}

impl PlanCatalog {
    /// Build a catalog from definitions. A later definition for the same
    /// (plan type, product) pair is rejected.
    pub fn new(definitions: impl IntoIterator<Item = PlanDefinition>) -> BillingResult<Self> {
        let mut plans = BTreeMap::new();
        for plan in definitions {
            let key = (plan.plan_type, plan.product);
            if plans.insert(key, plan).is_some() {
                return Err(BillingError::Config(format!(
                    "Duplicate {} plan definition for {}",
                    key.1, key.0
                )));
            }
        }
        Ok(Self { plans })
    }

    /// The plans currently sold
    pub fn standard() -> Self {
        let definitions = [
            PlanDefinition::base(PlanType::Free, "Free", 2),
            PlanDefinition::secrets(PlanType::Free, "Free Secrets", 2, 3),
            PlanDefinition::base(PlanType::FamiliesAnnually, "Families", 6),
            PlanDefinition::base(PlanType::TeamsMonthly, "Teams (Monthly)", 0)
                .with_additional_seats(None),
            PlanDefinition::secrets(PlanType::TeamsMonthly, "Teams Secrets (Monthly)", 0, 50)
                .with_additional_seats(None)
                .with_additional_service_accounts(None),
            PlanDefinition::base(PlanType::TeamsAnnually, "Teams (Annually)", 0)
                .with_additional_seats(None),
            PlanDefinition::secrets(PlanType::TeamsAnnually, "Teams Secrets (Annually)", 0, 50)
                .with_additional_seats(None)
                .with_additional_service_accounts(None),
            PlanDefinition::base(PlanType::EnterpriseMonthly, "Enterprise (Monthly)", 0)
                .with_additional_seats(None),
            PlanDefinition::secrets(
                PlanType::EnterpriseMonthly,
                "Enterprise Secrets (Monthly)",
                0,
                200,
            )
            .with_additional_seats(None)
            .with_additional_service_accounts(None),
            PlanDefinition::base(PlanType::EnterpriseAnnually, "Enterprise (Annually)", 0)
                .with_additional_seats(None),
            PlanDefinition::secrets(
                PlanType::EnterpriseAnnually,
                "Enterprise Secrets (Annually)",
                0,
                200,
            )
            .with_additional_seats(None)
            .with_additional_service_accounts(None),
        ];

        let plans = definitions
            .into_iter()
            .map(|plan| ((plan.plan_type, plan.product), plan))
            .collect();
        Self { plans }
    }

    pub fn get(&self, plan_type: PlanType, product: ProductCategory) -> Option<&PlanDefinition> {
        self.plans.get(&(plan_type, product))
    }

    /// All definitions for a plan type, base product first
    pub fn plans_for(&self, plan_type: PlanType) -> Vec<&PlanDefinition> {
        self.plans
            .range((plan_type, ProductCategory::Base)..=(plan_type, ProductCategory::Secrets))
            .map(|(_, plan)| plan)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanDefinition> {
        self.plans.values()
    }
}

/// Candidate definitions for one requested plan type, keyed by product
#[derive(Debug, Clone)]
pub struct CandidatePlans {
    plan_type: PlanType,
    plans: BTreeMap<ProductCategory, PlanDefinition>,
}

impl CandidatePlans {
    /// Group definitions by product. Requires exactly one base definition;
    /// definitions for other plan types or duplicates are configuration errors.
    pub fn from_definitions(
        plan_type: PlanType,
        definitions: impl IntoIterator<Item = PlanDefinition>,
    ) -> BillingResult<Self> {
        let mut plans = BTreeMap::new();
        for plan in definitions {
            if plan.plan_type != plan_type {
                return Err(BillingError::Config(format!(
                    "Plan definition {} does not belong to plan type {}",
                    plan.plan_type, plan_type
                )));
            }
            let product = plan.product;
            if plans.insert(product, plan).is_some() {
                return Err(BillingError::Config(format!(
                    "Duplicate {} candidate plan for {}",
                    product, plan_type
                )));
            }
        }

        if !plans.contains_key(&ProductCategory::Base) {
            return Err(BillingError::PlanNotFound {
                plan_type,
                product: ProductCategory::Base,
            });
        }

        Ok(Self { plan_type, plans })
    }

    pub fn get(&self, product: ProductCategory) -> Option<&PlanDefinition> {
        self.plans.get(&product)
    }

    /// Definition for `product`, or `PlanNotFound`
    pub fn require(&self, product: ProductCategory) -> BillingResult<&PlanDefinition> {
        self.get(product).ok_or(BillingError::PlanNotFound {
            plan_type: self.plan_type,
            product,
        })
    }

    /// The base product definition (always present)
    pub fn base(&self) -> BillingResult<&PlanDefinition> {
        self.require(ProductCategory::Base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_has_base_for_every_plan() {
        let catalog = PlanCatalog::standard();
        for plan in PlanType::ALL {
            assert!(
                catalog.get(plan, ProductCategory::Base).is_some(),
                "missing base definition for {}",
                plan
            );
        }
    }

    #[test]
    fn test_families_has_no_secrets_definition() {
        let catalog = PlanCatalog::standard();
        assert!(catalog
            .get(PlanType::FamiliesAnnually, ProductCategory::Secrets)
            .is_none());
        assert_eq!(catalog.plans_for(PlanType::FamiliesAnnually).len(), 1);
    }

    #[test]
    fn test_plans_for_returns_base_then_secrets() {
        let catalog = PlanCatalog::standard();
        let plans = catalog.plans_for(PlanType::EnterpriseAnnually);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].product, ProductCategory::Base);
        assert_eq!(plans[1].product, ProductCategory::Secrets);
        assert_eq!(plans[1].base_service_accounts, 200);
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let result = PlanCatalog::new([
            PlanDefinition::base(PlanType::TeamsAnnually, "Teams", 0),
            PlanDefinition::base(PlanType::TeamsAnnually, "Teams again", 0),
        ]);
        assert!(matches!(result, Err(BillingError::Config(_))));
    }

    #[test]
    fn test_candidates_require_base() {
        let result = CandidatePlans::from_definitions(
            PlanType::EnterpriseAnnually,
            [PlanDefinition::secrets(
                PlanType::EnterpriseAnnually,
                "Secrets",
                2,
                2,
            )],
        );
        assert!(matches!(
            result,
            Err(BillingError::PlanNotFound {
                product: ProductCategory::Base,
                ..
            })
        ));
    }

    #[test]
    fn test_candidates_reject_foreign_plan_type() {
        let result = CandidatePlans::from_definitions(
            PlanType::EnterpriseAnnually,
            [PlanDefinition::base(PlanType::TeamsAnnually, "Teams", 0)],
        );
        assert!(matches!(result, Err(BillingError::Config(_))));
    }

    #[test]
    fn test_candidates_lookup_by_product() {
        let candidates = CandidatePlans::from_definitions(
            PlanType::EnterpriseAnnually,
            [
                PlanDefinition::base(PlanType::EnterpriseAnnually, "Enterprise", 2),
                PlanDefinition::secrets(PlanType::EnterpriseAnnually, "Secrets", 2, 2),
            ],
        )
        .unwrap();

        assert_eq!(candidates.base().unwrap().product, ProductCategory::Base);
        assert_eq!(
            candidates
                .require(ProductCategory::Secrets)
                .unwrap()
                .base_service_accounts,
            2
        );
    }

    #[test]
    fn test_missing_secrets_candidate_is_plan_not_found() {
        let candidates = CandidatePlans::from_definitions(
            PlanType::FamiliesAnnually,
            [PlanDefinition::base(PlanType::FamiliesAnnually, "Families", 6)],
        )
        .unwrap();

        let err = candidates.require(ProductCategory::Secrets).unwrap_err();
        assert!(matches!(
            err,
            BillingError::PlanNotFound {
                plan_type: PlanType::FamiliesAnnually,
                product: ProductCategory::Secrets,
            }
        ));
    }
}
