//! Authorization of rule reads and rule-group changes.
//!
//! Rules are authorized through an injected [`AccessCheck`], so this module does not
//! depend on how the principal was authenticated. A rule is accessible when the
//! principal may query every data source it uses; server-side expressions need no
//! permission. Changes additionally need the folder-scoped rule action.

use ruler_access::{
    datasource_scope, folder_scope, AccessCheck, Evaluator, ACTION_ALERT_RULES_CREATE,
    ACTION_ALERT_RULES_DELETE, ACTION_ALERT_RULES_WRITE, ACTION_DATASOURCES_QUERY,
};
use tracing::debug;

use crate::changes::GroupDelta;
use crate::error::{Result, RulerError};
use crate::models::AlertRule;

/// Requirement to query every data source the rule uses.
#[must_use]
pub fn datasource_evaluator(rule: &AlertRule) -> Evaluator {
    let scopes: Vec<String> = rule.datasource_uids().into_iter().map(datasource_scope).collect();
    if scopes.is_empty() {
        return Evaluator::all(Vec::new());
    }
    Evaluator::permission(ACTION_DATASOURCES_QUERY, scopes)
}

fn folder_evaluator(action: &str, namespace_uid: &str) -> Evaluator {
    Evaluator::permission(action, [folder_scope(namespace_uid)])
}

/// Returns true if the principal may query every data source of the rule.
#[must_use]
pub fn authorize_datasource_access_for_rule(rule: &AlertRule, check: &dyn AccessCheck) -> bool {
    check.has_access(&datasource_evaluator(rule))
}

/// Returns true if the principal may access every rule of the group.
#[must_use]
pub fn authorize_access_to_rule_group(rules: &[AlertRule], check: &dyn AccessCheck) -> bool {
    rules
        .iter()
        .all(|rule| authorize_datasource_access_for_rule(rule, check))
}

/// Verifies that the principal may make every change of the delta.
///
/// Checks, in order: access to every rule of every affected group, then each new,
/// deleted and updated rule. A rule moved between folders needs delete on the
/// source folder and create on the target folder.
///
/// # Errors
///
/// Returns `RulerError::Unauthorized` naming the first change that is not allowed.
pub fn authorize_rule_changes(delta: &GroupDelta, check: &dyn AccessCheck) -> Result<()> {
    for (key, rules) in &delta.affected_groups {
        if !authorize_access_to_rule_group(rules, check) {
            return Err(RulerError::unauthorized(format!(
                "to access rules in the group {key} because it does not have access to one or \
                 many data sources one or many rules in the group use"
            )));
        }
    }

    for rule in &delta.new {
        let required = Evaluator::all([
            folder_evaluator(ACTION_ALERT_RULES_CREATE, &rule.namespace_uid),
            datasource_evaluator(rule),
        ]);
        if !check.has_access(&required) {
            return Err(RulerError::unauthorized(format!(
                "to create alert rule '{}' in folder {}",
                rule.title, rule.namespace_uid
            )));
        }
    }

    for rule in &delta.delete {
        let required = Evaluator::all([
            folder_evaluator(ACTION_ALERT_RULES_DELETE, &rule.namespace_uid),
            datasource_evaluator(rule),
        ]);
        if !check.has_access(&required) {
            return Err(RulerError::unauthorized(format!(
                "to delete alert rule {} in folder {}",
                rule.uid, rule.namespace_uid
            )));
        }
    }

    for update in &delta.update {
        let (existing, new) = (&update.existing, &update.new);
        let folder = if existing.namespace_uid == new.namespace_uid {
            folder_evaluator(ACTION_ALERT_RULES_WRITE, &new.namespace_uid)
        } else {
            Evaluator::all([
                folder_evaluator(ACTION_ALERT_RULES_DELETE, &existing.namespace_uid),
                folder_evaluator(ACTION_ALERT_RULES_CREATE, &new.namespace_uid),
            ])
        };
        let required = Evaluator::all([
            folder,
            datasource_evaluator(existing),
            datasource_evaluator(new),
        ]);
        if !check.has_access(&required) {
            return Err(RulerError::unauthorized(format!(
                "to update alert rule {} in folder {}",
                new.uid, new.namespace_uid
            )));
        }
    }

    debug!(
        group = %delta.group_key,
        new = delta.new.len(),
        update = delta.update.len(),
        delete = delta.delete.len(),
        "rule changes authorized"
    );
    Ok(())
}
