//! Change calculation for a rule-group replacement.
//!
//! [`calculate_changes`] compares the submitted rules of a group with what is
//! persisted and produces a [`GroupDelta`]: the rules to insert, update and delete,
//! plus every group the change touches. [`calculate_automatic_changes`] then adds the
//! updates the store needs to keep those groups consistent.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::context::RequestContext;
use crate::diff::{DiffReport, ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF};
use crate::error::{Result, RulerError};
use crate::models::{sort_by_group_index, AlertRule, AlertRuleGroupKey, AlertRuleKey, RulesGroup};
use crate::store::{ListAlertRulesQuery, RuleStore, UpdateRule};

/// One rule to update.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleUpdate {
    /// The rule as persisted when the change was calculated.
    pub existing: AlertRule,
    /// The desired state.
    pub new: AlertRule,
    /// Differences between the two. Empty for version-only updates.
    pub diff: DiffReport,
}

impl RuleUpdate {
    /// Returns true if the update only bumps the version.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.diff.is_empty()
    }

    pub(crate) fn to_store_update(&self) -> UpdateRule {
        UpdateRule {
            existing: self.existing.clone(),
            new: self.new.clone(),
        }
    }
}

/// Changes needed to bring a group to its submitted state.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDelta {
    /// The group being replaced.
    pub group_key: AlertRuleGroupKey,
    /// Persisted rules of every group touched by the change, keyed by group.
    pub affected_groups: BTreeMap<AlertRuleGroupKey, RulesGroup>,
    /// Rules to insert.
    pub new: Vec<AlertRule>,
    /// Rules to update.
    pub update: Vec<RuleUpdate>,
    /// Rules to delete.
    pub delete: Vec<AlertRule>,
}

impl GroupDelta {
    /// Returns true if nothing needs to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Calculates the changes that replace the rules of `group_key` with `submitted`.
///
/// A submitted rule without a UID is new. A rule whose UID belongs to the group is
/// updated when it differs from the stored rule, after blank fields are filled in
/// from the stored rule. A rule whose UID belongs to another group is moved into
/// this one. Stored rules of the group that are not submitted are deleted.
///
/// # Errors
///
/// Returns `RulerError::RuleNotFound` if a submitted UID does not exist in the
/// organization, or any error of the store.
pub fn calculate_changes(
    ctx: &RequestContext,
    store: &dyn RuleStore,
    group_key: &AlertRuleGroupKey,
    submitted: Vec<AlertRule>,
) -> Result<GroupDelta> {
    let query = ListAlertRulesQuery::for_org(group_key.org_id)
        .in_namespace(group_key.namespace_uid.clone())
        .in_group(group_key.rule_group.clone());
    let existing_group = store.list_alert_rules(ctx, &query)?;

    let mut affected_groups = BTreeMap::new();
    if !existing_group.is_empty() {
        affected_groups.insert(group_key.clone(), existing_group.clone());
    }

    let mut unclaimed: BTreeSet<&str> = existing_group.iter().map(|r| r.uid.as_str()).collect();
    let by_uid: HashMap<&str, &AlertRule> =
        existing_group.iter().map(|r| (r.uid.as_str(), r)).collect();
    // rules of other groups, loaded once per group
    let mut loaded: HashMap<String, AlertRule> = HashMap::new();

    let mut new = Vec::new();
    let mut update = Vec::new();
    for mut rule in submitted {
        if rule.uid.is_empty() {
            new.push(rule);
            continue;
        }

        let existing = if let Some(existing) = by_uid.get(rule.uid.as_str()) {
            unclaimed.remove(rule.uid.as_str());
            (*existing).clone()
        } else if let Some(existing) = loaded.get(&rule.uid) {
            existing.clone()
        } else {
            let origin = store.get_alert_rules_group_by_rule_uid(ctx, group_key.org_id, &rule.uid)?;
            let Some(existing) = origin.iter().find(|r| r.uid == rule.uid).cloned() else {
                return Err(RulerError::RuleNotFound { uid: rule.uid });
            };
            debug!(
                rule_uid = %rule.uid,
                from = %existing.group_key(),
                to = %group_key,
                "rule moves between groups"
            );
            for r in &origin {
                loaded.insert(r.uid.clone(), r.clone());
            }
            affected_groups.insert(existing.group_key(), origin);
            existing
        };

        rule.patch_partial(&existing);
        let diff = existing.diff(&rule, ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF);
        if diff.is_empty() {
            continue;
        }
        update.push(RuleUpdate {
            existing,
            new: rule,
            diff,
        });
    }

    let delete = existing_group
        .iter()
        .filter(|r| unclaimed.contains(r.uid.as_str()))
        .cloned()
        .collect();

    Ok(GroupDelta {
        group_key: group_key.clone(),
        affected_groups,
        new,
        update,
        delete,
    })
}

/// Adds an update for every rule of every affected group that the delta does not
/// already update or delete.
///
/// Groups other than the target are re-indexed from 1 in group-index order; a rule
/// whose index changes is updated with the new index. Every other remaining rule
/// gets a version-only update so that concurrent writers to the same groups fail
/// their version check.
#[must_use]
pub fn calculate_automatic_changes(delta: GroupDelta) -> GroupDelta {
    let touched: BTreeSet<AlertRuleKey> = delta
        .update
        .iter()
        .map(|u| u.existing.key())
        .chain(delta.delete.iter().map(AlertRule::key))
        .collect();

    let mut update = delta.update;
    for (key, rules) in &delta.affected_groups {
        let is_target = *key == delta.group_key;
        let mut rules = rules.clone();
        if !is_target {
            sort_by_group_index(&mut rules);
        }
        let mut index = 1;
        for rule in rules {
            if touched.contains(&rule.key()) {
                continue;
            }
            let mut upd = RuleUpdate {
                existing: rule.clone(),
                new: rule,
                diff: DiffReport::default(),
            };
            if !is_target {
                if upd.existing.rule_group_index != index {
                    upd.new.rule_group_index = index;
                    upd.diff = upd.existing.diff(&upd.new, ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF);
                }
                index += 1;
            }
            update.push(upd);
        }
    }

    GroupDelta {
        group_key: delta.group_key,
        affected_groups: delta.affected_groups,
        new: delta.new,
        update,
        delete: delta.delete,
    }
}
