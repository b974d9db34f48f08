#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Tierlift Shared Types
//!
//! Plan tiers, product categories, and request context used across crates.

pub mod context;
pub mod types;

pub use context::RequestContext;
pub use types::{PlanType, ProductCategory, UnknownPlanType};
