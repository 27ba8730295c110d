//! Protection of provisioned rules.

use std::collections::HashMap;

use crate::changes::GroupDelta;
use crate::context::RequestContext;
use crate::error::{Result, RulerError};
use crate::models::{AlertRule, Provenance, ALERT_RULE_RESOURCE_TYPE};
use crate::store::ProvenanceStore;

/// Returns the provenance of a rule, [`Provenance::None`] when none is recorded.
#[must_use]
pub fn provenance_of(provenances: &HashMap<String, Provenance>, rule: &AlertRule) -> Provenance {
    provenances
        .get(rule.resource_id())
        .copied()
        .unwrap_or_default()
}

/// Fails if any rule of any group touched by the delta was provisioned.
///
/// # Errors
///
/// Returns `RulerError::ProvisionedResource` listing every offending group in
/// group-key order, or the error of the provenance store.
pub fn verify_provisioned_rules_not_affected(
    ctx: &RequestContext,
    store: &dyn ProvenanceStore,
    org_id: i64,
    delta: &GroupDelta,
) -> Result<()> {
    let provenances = store.get_provenances(ctx, org_id, ALERT_RULE_RESOURCE_TYPE)?;
    let groups: Vec<String> = delta
        .affected_groups
        .iter()
        .filter(|(_, rules)| {
            rules
                .iter()
                .any(|r| provenance_of(&provenances, r).is_provisioned())
        })
        .map(|(key, _)| key.to_string())
        .collect();

    if groups.is_empty() {
        return Ok(());
    }
    Err(RulerError::ProvisionedResource {
        groups: groups.join(","),
    })
}
