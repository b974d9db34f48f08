//! Release feature flags

use std::collections::{HashMap, HashSet};

use tierlift_shared::RequestContext;
use uuid::Uuid;

/// Gates Secrets add-on billing (and the entitlement checks that go with it)
pub const SECRETS_BILLING: &str = "secrets-billing";

/// Synchronous, side-effect free flag read
pub trait FeatureService: Send + Sync {
    fn is_enabled(&self, key: &str, ctx: &RequestContext) -> bool;
}

/// Flags read once from the environment.
///
/// `FEATURE_FLAGS` lists enabled keys, comma separated. A flag can be limited
/// to specific organizations with `FEATURE_FLAGS_<KEY>_ORGS`, where `<KEY>` is
/// the flag key uppercased with dashes replaced by underscores.
#[derive(Debug, Clone, Default)]
pub struct EnvFeatureService {
    enabled: HashSet<String>,
    org_allow_lists: HashMap<String, HashSet<Uuid>>,
}

fn allow_list_var(key: &str) -> String {
    format!(
        "FEATURE_FLAGS_{}_ORGS",
        key.to_ascii_uppercase().replace('-', "_")
    )
}

impl EnvFeatureService {
    pub fn from_env() -> Self {
        let raw = std::env::var("FEATURE_FLAGS").unwrap_or_default();
        Self::parse(&raw, |key| std::env::var(allow_list_var(key)).ok())
    }

    fn parse(raw: &str, allow_list: impl Fn(&str) -> Option<String>) -> Self {
        let enabled: HashSet<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let mut org_allow_lists = HashMap::new();
        for key in &enabled {
            let Some(list) = allow_list(key) else {
                continue;
            };
            let mut orgs = HashSet::new();
            for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match entry.parse::<Uuid>() {
                    Ok(id) => {
                        orgs.insert(id);
                    }
                    Err(e) => {
                        tracing::warn!(flag = %key, value = %entry, error = %e, "Ignoring invalid organization id in flag allow-list");
                    }
                }
            }
            org_allow_lists.insert(key.clone(), orgs);
        }

        tracing::info!(flags = ?enabled, "Feature flags loaded");

        Self {
            enabled,
            org_allow_lists,
        }
    }
}

impl FeatureService for EnvFeatureService {
    fn is_enabled(&self, key: &str, ctx: &RequestContext) -> bool {
        if !self.enabled.contains(key) {
            return false;
        }
        match self.org_allow_lists.get(key) {
            Some(orgs) => ctx
                .organization_id
                .is_some_and(|org_id| orgs.contains(&org_id)),
            None => true,
        }
    }
}

/// Fixed set of enabled flags, independent of context
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureService {
    enabled: HashSet<String>,
}

impl StaticFeatureService {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl FeatureService for StaticFeatureService {
    fn is_enabled(&self, key: &str, _ctx: &RequestContext) -> bool {
        self.enabled.contains(key)
    }
}
