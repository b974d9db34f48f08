//! Per-request tenant context

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is making the current request and on behalf of which organization.
/// Feature flags are evaluated against this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
}

impl RequestContext {
    pub fn new(user_id: Option<Uuid>, organization_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            organization_id,
        }
    }

    /// Context for work not attributable to a user
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_organization(organization_id: Uuid) -> Self {
        Self {
            user_id: None,
            organization_id: Some(organization_id),
        }
    }
}
