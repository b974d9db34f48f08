//! Stripe client and configuration

use std::collections::HashMap;

use tierlift_shared::PlanType;

use crate::error::{BillingError, BillingResult};

/// Stripe price ids for one plan type
#[derive(Debug, Clone, Default)]
pub struct PlanPrices {
    /// Per-seat price for the base product
    pub seat: Option<String>,
    /// Per-seat price for the Secrets add-on
    pub secrets_seat: Option<String>,
    /// Per-unit price for additional service accounts
    pub service_account: Option<String>,
}

/// Price ids keyed by plan type
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    prices: HashMap<PlanType, PlanPrices>,
}

impl PriceIds {
    /// Read `STRIPE_PRICE_<PLAN>_{SEAT,SECRETS_SEAT,SERVICE_ACCOUNT}` for every
    /// plan type. Unset variables are left as `None`.
    pub fn from_env() -> Self {
        let var = |name: String| std::env::var(name).ok().filter(|v| !v.is_empty());

        let prices = PlanType::ALL
            .into_iter()
            .map(|plan| {
                let key = plan.env_key();
                let prices = PlanPrices {
                    seat: var(format!("STRIPE_PRICE_{key}_SEAT")),
                    secrets_seat: var(format!("STRIPE_PRICE_{key}_SECRETS_SEAT")),
                    service_account: var(format!("STRIPE_PRICE_{key}_SERVICE_ACCOUNT")),
                };
                (plan, prices)
            })
            .collect();

        Self { prices }
    }

    pub fn with_plan(mut self, plan: PlanType, prices: PlanPrices) -> Self {
        self.prices.insert(plan, prices);
        self
    }

    pub fn for_plan(&self, plan: PlanType) -> Option<&PlanPrices> {
        self.prices.get(&plan)
    }

    pub fn seat_price_for(&self, plan: PlanType) -> Option<&str> {
        self.for_plan(plan).and_then(|p| p.seat.as_deref())
    }

    pub fn secrets_seat_price_for(&self, plan: PlanType) -> Option<&str> {
        self.for_plan(plan).and_then(|p| p.secrets_seat.as_deref())
    }

    pub fn service_account_price_for(&self, plan: PlanType) -> Option<&str> {
        self.for_plan(plan).and_then(|p| p.service_account.as_deref())
    }
}

/// Stripe configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub price_ids: PriceIds,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;

        if secret_key.trim().is_empty() {
            return Err(BillingError::Config(
                "STRIPE_SECRET_KEY is empty".to_string(),
            ));
        }

        Ok(Self {
            secret_key,
            price_ids: PriceIds::from_env(),
        })
    }
}

/// Thin wrapper over the async-stripe client that carries its config
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
