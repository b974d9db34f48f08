//! Plan and product types shared between the billing crate and its callers

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Commercial plan tiers an organization can be billed on
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    #[default]
    Free,
    FamiliesAnnually,
    TeamsMonthly,
    TeamsAnnually,
    EnterpriseMonthly,
    EnterpriseAnnually,
}

impl PlanType {
    pub const ALL: [PlanType; 6] = [
        PlanType::Free,
        PlanType::FamiliesAnnually,
        PlanType::TeamsMonthly,
        PlanType::TeamsAnnually,
        PlanType::EnterpriseMonthly,
        PlanType::EnterpriseAnnually,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::FamiliesAnnually => "families_annually",
            Self::TeamsMonthly => "teams_monthly",
            Self::TeamsAnnually => "teams_annually",
            Self::EnterpriseMonthly => "enterprise_monthly",
            Self::EnterpriseAnnually => "enterprise_annually",
        }
    }

    /// Rank used to decide whether a plan change is an upgrade.
    /// Monthly and annual variants of a tier share a rank.
    pub fn upgrade_sort_order(&self) -> u8 {
        match self {
            Self::Free => 0,
            Self::FamiliesAnnually => 1,
            Self::TeamsMonthly | Self::TeamsAnnually => 2,
            Self::EnterpriseMonthly | Self::EnterpriseAnnually => 3,
        }
    }

    /// Prefix for environment variables carrying per-plan settings
    /// (e.g. `TEAMS_ANNUALLY`)
    pub fn env_key(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown plan name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown plan type '{0}'")]
pub struct UnknownPlanType(pub String);

impl FromStr for PlanType {
    type Err = UnknownPlanType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        PlanType::ALL
            .into_iter()
            .find(|plan| plan.as_str() == normalized)
            .ok_or_else(|| UnknownPlanType(s.to_string()))
    }
}

/// Product category a plan definition belongs to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    /// The base product every organization is billed for
    Base,
    /// The optional Secrets add-on (add-on seats plus service accounts)
    Secrets,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Secrets => "secrets",
        }
    }
}

impl std::fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
