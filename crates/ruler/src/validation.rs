//! Validation of submitted rule groups.

use std::collections::BTreeSet;

use crate::api::{PostableRule, PostableRuleGroupConfig};
use crate::config::RulerConfig;
use crate::error::{Result, RulerError};
use crate::models::{AlertRule, Namespace};

/// Validates a submitted group and converts its rules into alert rules of the
/// folder, indexed from 1 in submission order.
///
/// # Errors
///
/// Returns `RulerError::ValidationFailed` describing the first problem found.
pub fn validate_rule_group(
    config: &PostableRuleGroupConfig,
    org_id: i64,
    namespace: &Namespace,
    settings: &RulerConfig,
) -> Result<Vec<AlertRule>> {
    if config.name.trim().is_empty() {
        return Err(RulerError::validation("rule group name cannot be empty"));
    }
    if config.name.chars().count() > settings.max_name_length {
        return Err(RulerError::validation(format!(
            "rule group name is too long. Max length is {}",
            settings.max_name_length
        )));
    }

    let interval = config
        .interval_seconds
        .unwrap_or(settings.base_interval_seconds);
    if interval <= 0 || interval.checked_rem(settings.base_interval_seconds) != Some(0) {
        return Err(RulerError::validation(format!(
            "rule evaluation frequency {interval}s should be greater than 0 and a multiple of {}s",
            settings.base_interval_seconds
        )));
    }

    let mut uids = BTreeSet::new();
    let mut rules = Vec::with_capacity(config.rules.len());
    for (position, postable) in config.rules.iter().enumerate() {
        if let Some(uid) = postable.uid.as_deref().filter(|u| !u.is_empty()) {
            if !uids.insert(uid) {
                return Err(RulerError::validation(format!(
                    "rule [{position}] has UID {uid} that is already used by another rule in the group"
                )));
            }
        }
        let index = i64::try_from(position + 1)
            .map_err(|_| RulerError::validation("too many rules in the group"))?;
        validate_rule(postable, position, settings)?;
        rules.push(AlertRule {
            org_id,
            uid: postable.uid.clone().unwrap_or_default(),
            title: postable.title.clone(),
            condition: postable.condition.clone(),
            data: postable.data.clone(),
            interval_seconds: interval,
            namespace_uid: namespace.uid.clone(),
            dashboard_uid: postable.dashboard_uid.clone(),
            panel_id: postable.panel_id,
            rule_group: config.name.clone(),
            rule_group_index: index,
            no_data_state: postable.no_data_state.unwrap_or_default(),
            exec_err_state: postable.exec_err_state.unwrap_or_default(),
            for_seconds: postable.for_seconds,
            annotations: postable.annotations.clone(),
            labels: postable.labels.clone(),
            ..AlertRule::default()
        });
    }
    Ok(rules)
}

fn validate_rule(rule: &PostableRule, position: usize, settings: &RulerConfig) -> Result<()> {
    let invalid = |reason: String| RulerError::validation(format!("rule [{position}]: {reason}"));

    if rule.title.trim().is_empty() {
        return Err(invalid("title is empty".to_string()));
    }
    if rule.title.chars().count() > settings.max_name_length {
        return Err(invalid(format!(
            "title is too long. Max length is {}",
            settings.max_name_length
        )));
    }
    if rule.data.is_empty() {
        return Err(invalid("no queries or expressions are found".to_string()));
    }
    if rule.condition.is_empty() {
        return Err(invalid("condition is empty".to_string()));
    }
    if !rule.data.iter().any(|q| q.ref_id == rule.condition) {
        return Err(invalid(format!(
            "condition {} does not exist, must be one of [{}]",
            rule.condition,
            rule.data
                .iter()
                .map(|q| q.ref_id.as_str())
                .collect::<Vec<_>>()
                .join(",")
        )));
    }
    if rule.panel_id.is_some() && rule.dashboard_uid.as_deref().is_none_or(str::is_empty) {
        return Err(invalid("panel_id requires dashboard_uid".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertQuery, ExecErrState, NoDataState};
    use test_case::test_case;

    fn namespace() -> Namespace {
        Namespace {
            id: 4,
            uid: "folder-uid".to_string(),
            title: "Folder".to_string(),
            org_id: 1,
        }
    }

    fn postable(uid: Option<&str>, title: &str) -> PostableRule {
        PostableRule {
            uid: uid.map(ToString::to_string),
            title: title.to_string(),
            condition: "B".to_string(),
            data: vec![AlertQuery::new("A", "prom"), AlertQuery::new("B", "__expr__")],
            ..PostableRule::default()
        }
    }

    fn group(rules: Vec<PostableRule>) -> PostableRuleGroupConfig {
        PostableRuleGroupConfig {
            name: "cpu".to_string(),
            interval_seconds: Some(60),
            rules,
        }
    }

    #[test]
    fn valid_group_is_converted() {
        let config = group(vec![postable(Some("r1"), "first"), postable(None, "second")]);
        let rules = validate_rule_group(&config, 1, &namespace(), &RulerConfig::default()).unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].uid, "r1");
        assert_eq!(rules[0].rule_group_index, 1);
        assert_eq!(rules[1].uid, "");
        assert_eq!(rules[1].rule_group_index, 2);
        assert!(rules.iter().all(|r| r.namespace_uid == "folder-uid"
            && r.rule_group == "cpu"
            && r.interval_seconds == 60
            && r.org_id == 1));
        assert_eq!(rules[0].no_data_state, NoDataState::NoData);
        assert_eq!(rules[0].exec_err_state, ExecErrState::Alerting);
    }

    #[test]
    fn interval_defaults_to_base_interval() {
        let mut config = group(vec![postable(None, "r")]);
        config.interval_seconds = None;
        let rules = validate_rule_group(&config, 1, &namespace(), &RulerConfig::default()).unwrap();
        assert_eq!(rules[0].interval_seconds, 10);
    }

    #[test_case(|c: &mut PostableRuleGroupConfig| c.name = String::new(), "name cannot be empty" ; "empty name")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.name = "x".repeat(191), "name is too long" ; "long name")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.interval_seconds = Some(15), "multiple of 10s" ; "interval not multiple")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.interval_seconds = Some(0), "greater than 0" ; "zero interval")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.rules[0].title = String::new(), "title is empty" ; "empty title")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.rules[0].data.clear(), "no queries" ; "no data")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.rules[0].condition = "Z".to_string(), "condition Z does not exist" ; "unknown condition")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.rules[0].panel_id = Some(2), "panel_id requires dashboard_uid" ; "panel without dashboard")]
    #[test_case(|c: &mut PostableRuleGroupConfig| c.rules[1].uid = Some("r1".to_string()), "already used" ; "duplicate uid")]
    fn invalid_groups(mutate: fn(&mut PostableRuleGroupConfig), message: &str) {
        let mut config = group(vec![postable(Some("r1"), "first"), postable(None, "second")]);
        mutate(&mut config);
        let err = validate_rule_group(&config, 1, &namespace(), &RulerConfig::default()).unwrap_err();
        assert!(
            matches!(err, RulerError::ValidationFailed { .. }),
            "unexpected error kind: {err}"
        );
        assert!(err.to_string().contains(message), "{err}");
    }

    #[test]
    fn panel_with_dashboard_is_kept() {
        let mut rule = postable(None, "r");
        rule.dashboard_uid = Some("dash".to_string());
        rule.panel_id = Some(2);
        let rules =
            validate_rule_group(&group(vec![rule]), 1, &namespace(), &RulerConfig::default()).unwrap();
        assert_eq!(rules[0].dashboard_uid.as_deref(), Some("dash"));
        assert_eq!(rules[0].panel_id, Some(2));
    }
}
