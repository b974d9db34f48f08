//! Billing error types

use tierlift_shared::{PlanType, ProductCategory};
use uuid::Uuid;

/// Quantity checked by the entitlement validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    /// Add-on seats
    Seats,
    /// Add-on service accounts
    ServiceAccounts,
}

impl std::fmt::Display for Entitlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entitlement::Seats => write!(f, "seats"),
            Entitlement::ServiceAccounts => write!(f, "service accounts"),
        }
    }
}

/// Coarse classification of a [`BillingError`].
///
/// Callers branch on this rather than on individual variants, e.g. to tell
/// "already upgraded" (`Conflict`) apart from "ineligible" (`Precondition`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Precondition,
    EntitlementViolation,
    ProvisioningFailure,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Organization {0} not found")]
    OrganizationNotFound(Uuid),

    #[error("No {product} plan definition for plan type {plan_type}")]
    PlanNotFound {
        plan_type: PlanType,
        product: ProductCategory,
    },

    #[error("Organization {0} already has an active subscription")]
    SubscriptionConflict(Uuid),

    #[error("No usable payment method: {0}")]
    PaymentMethodRequired(String),

    #[error("Invalid upgrade: {0}")]
    InvalidUpgrade(String),

    #[error("Requested {requested} {entitlement} but the plan requires at least {minimum}")]
    EntitlementViolation {
        entitlement: Entitlement,
        requested: i64,
        minimum: i64,
    },

    #[error("Requested {requested} {entitlement} but the plan allows at most {maximum}")]
    EntitlementLimitExceeded {
        entitlement: Entitlement,
        requested: i64,
        maximum: i64,
    },

    #[error("Subscription provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::OrganizationNotFound(_) | BillingError::PlanNotFound { .. } => {
                ErrorKind::NotFound
            }
            BillingError::SubscriptionConflict(_) => ErrorKind::Conflict,
            BillingError::PaymentMethodRequired(_)
            | BillingError::InvalidUpgrade(_) => ErrorKind::Precondition,
            BillingError::EntitlementViolation { .. }
            | BillingError::EntitlementLimitExceeded { .. } => ErrorKind::EntitlementViolation,
            BillingError::ProvisioningFailed(_) => ErrorKind::ProvisioningFailure,
            BillingError::StripeApi(_)
            | BillingError::Database(_)
            | BillingError::Config(_)
            | BillingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status a request handler should answer with
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Precondition | ErrorKind::EntitlementViolation => 400,
            ErrorKind::ProvisioningFailure => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// True for rejections detected before anything was mutated
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::Precondition | ErrorKind::EntitlementViolation
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
