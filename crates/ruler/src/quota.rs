//! Alert rule quotas.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RequestContext;
use crate::error::Result;
use crate::store::RuleStore;

/// Quota target for alert rules.
pub const ALERT_RULE_TARGET: &str = "alert_rule";

/// Who a quota is checked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaScope {
    /// Organization ID.
    pub org_id: i64,
    /// User ID.
    pub user_id: i64,
}

/// Alert rule limits. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleQuota {
    /// Maximum rules per organization.
    pub org_alert_rules: Option<u64>,
    /// Maximum rules across all organizations.
    pub global_alert_rules: Option<u64>,
}

impl RuleQuota {
    /// Creates a quota without limits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            org_alert_rules: None,
            global_alert_rules: None,
        }
    }

    /// Sets the per-organization limit.
    #[must_use]
    pub const fn with_org_alert_rules(mut self, limit: u64) -> Self {
        self.org_alert_rules = Some(limit);
        self
    }

    /// Sets the global limit.
    #[must_use]
    pub const fn with_global_alert_rules(mut self, limit: u64) -> Self {
        self.global_alert_rules = Some(limit);
        self
    }

    /// Checks if any limit is set.
    #[must_use]
    pub const fn has_any_limit(&self) -> bool {
        self.org_alert_rules.is_some() || self.global_alert_rules.is_some()
    }
}

/// Quota service consulted when rules are created.
pub trait QuotaService: Send + Sync {
    /// Returns true if adding `requested` items of `target` would exceed a limit.
    ///
    /// With `requested` of zero this reports whether current usage is already over
    /// a limit.
    ///
    /// # Errors
    ///
    /// Returns an error if current usage cannot be determined.
    fn check_quota_reached(
        &self,
        ctx: &RequestContext,
        target: &str,
        scope: &QuotaScope,
        requested: usize,
    ) -> Result<bool>;
}

/// Quota service that counts rules in the rule store.
pub struct RuleCountQuota {
    store: Arc<dyn RuleStore>,
    limits: RuleQuota,
}

impl RuleCountQuota {
    /// Creates a quota service over a store.
    #[must_use]
    pub fn new(store: Arc<dyn RuleStore>, limits: RuleQuota) -> Self {
        Self { store, limits }
    }
}

fn exceeds(used: usize, requested: usize, limit: Option<u64>) -> bool {
    limit.is_some_and(|limit| (used as u64).saturating_add(requested as u64) > limit)
}

impl QuotaService for RuleCountQuota {
    fn check_quota_reached(
        &self,
        ctx: &RequestContext,
        target: &str,
        scope: &QuotaScope,
        requested: usize,
    ) -> Result<bool> {
        if target != ALERT_RULE_TARGET || !self.limits.has_any_limit() {
            return Ok(false);
        }

        if self.limits.org_alert_rules.is_some() {
            let used = self.store.count_alert_rules(ctx, Some(scope.org_id))?;
            if exceeds(used, requested, self.limits.org_alert_rules) {
                debug!(org_id = scope.org_id, used, requested, "organization alert rule quota reached");
                return Ok(true);
            }
        }
        if self.limits.global_alert_rules.is_some() {
            let used = self.store.count_alert_rules(ctx, None)?;
            if exceeds(used, requested, self.limits.global_alert_rules) {
                debug!(used, requested, "global alert rule quota reached");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
