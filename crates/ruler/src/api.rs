//! Request and response payloads of the ruler operations.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::models::{
    sort_by_group_index, AlertQuery, AlertRule, ExecErrState, NoDataState, Provenance,
};
use crate::provenance::provenance_of;

/// A rule group as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostableRuleGroupConfig {
    /// Group name.
    pub name: String,
    /// Evaluation interval. Defaults to the configured base interval.
    #[serde(default)]
    pub interval_seconds: Option<i64>,
    /// Rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<PostableRule>,
}

/// A rule as submitted by a client. A rule without a UID is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostableRule {
    /// UID of an existing rule, in this or another group.
    pub uid: Option<String>,
    /// Title.
    pub title: String,
    /// Ref ID of the condition query.
    pub condition: String,
    /// Query pipeline.
    pub data: Vec<AlertQuery>,
    /// No-data policy.
    pub no_data_state: Option<NoDataState>,
    /// Execution-error policy.
    pub exec_err_state: Option<ExecErrState>,
    /// "For" duration in seconds.
    pub for_seconds: u64,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Linked dashboard.
    pub dashboard_uid: Option<String>,
    /// Linked panel. Requires `dashboard_uid`.
    pub panel_id: Option<i64>,
}

/// A stored rule as returned to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GettableRule {
    /// The rule.
    #[serde(flatten)]
    pub rule: AlertRule,
    /// Numeric ID of the rule's folder.
    pub namespace_id: i64,
    /// Provenance of the rule.
    pub provenance: Provenance,
}

/// A stored rule group as returned to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GettableRuleGroupConfig {
    /// Group name.
    pub name: String,
    /// Evaluation interval of the group.
    pub interval_seconds: i64,
    /// Rules ordered by group index.
    pub rules: Vec<GettableRule>,
}

impl GettableRuleGroupConfig {
    /// Builds the group payload. The interval is taken from the first rule.
    #[must_use]
    pub fn from_rules(
        name: impl Into<String>,
        mut rules: Vec<AlertRule>,
        namespace_id: i64,
        provenances: &HashMap<String, Provenance>,
    ) -> Self {
        sort_by_group_index(&mut rules);
        let interval_seconds = rules.first().map_or(0, |r| r.interval_seconds);
        let rules = rules
            .into_iter()
            .map(|rule| GettableRule {
                provenance: provenance_of(provenances, &rule),
                rule,
                namespace_id,
            })
            .collect();
        Self {
            name: name.into(),
            interval_seconds,
            rules,
        }
    }
}

/// Rule groups keyed by folder title.
pub type NamespaceConfigResponse = BTreeMap<String, Vec<GettableRuleGroupConfig>>;

/// One rule group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroupConfigResponse {
    /// The group.
    #[serde(flatten)]
    pub group: GettableRuleGroupConfig,
}

/// Optional filter of the all-rules listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesFilter {
    /// Only rules linked to this dashboard.
    pub dashboard_uid: Option<String>,
    /// Only rules linked to this panel. Requires `dashboard_uid`.
    pub panel_id: Option<i64>,
}

/// Result of replacing a rule group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRuleGroupResponse {
    /// Human readable outcome.
    pub message: String,
    /// Number of rules created.
    pub created: usize,
    /// Number of rules written, including version-only updates.
    pub updated: usize,
    /// Number of rules deleted.
    pub deleted: usize,
}

impl UpdateRuleGroupResponse {
    /// Message returned when the group was changed.
    pub const UPDATED: &'static str = "rule group updated successfully";
    /// Message returned when nothing had to be written.
    pub const NO_CHANGES: &'static str = "no changes detected in the rule group";

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_no_changes(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Why a rule was left in place by a bulk delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The principal cannot query a data source of the rule.
    Unauthorized,
    /// The rule is managed by a provisioning channel.
    Provisioned,
}

/// A rule left in place by a bulk delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRule {
    /// Rule UID.
    pub uid: String,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Result of a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRulesResponse {
    /// Human readable outcome.
    pub message: String,
    /// UIDs of the deleted rules.
    pub deleted: Vec<String>,
    /// Rules that were not deleted.
    pub skipped: Vec<SkippedRule>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(uid: &str, index: i64, interval: i64) -> AlertRule {
        AlertRule {
            org_id: 1,
            uid: uid.to_string(),
            rule_group: "g".to_string(),
            rule_group_index: index,
            interval_seconds: interval,
            ..AlertRule::default()
        }
    }

    #[test]
    fn gettable_group_is_sorted_and_reports_provenance() {
        let mut provenances = HashMap::new();
        provenances.insert("b".to_string(), Provenance::File);
        let group = GettableRuleGroupConfig::from_rules(
            "g",
            vec![rule("b", 2, 30), rule("a", 1, 60)],
            7,
            &provenances,
        );
        assert_eq!(group.interval_seconds, 60);
        assert_eq!(group.rules[0].rule.uid, "a");
        assert_eq!(group.rules[0].provenance, Provenance::None);
        assert_eq!(group.rules[1].provenance, Provenance::File);
        assert_eq!(group.rules[1].namespace_id, 7);
    }

    #[test]
    fn empty_group_has_zero_interval() {
        let group = GettableRuleGroupConfig::from_rules("g", Vec::new(), 1, &HashMap::new());
        assert_eq!(group.interval_seconds, 0);
        assert!(group.rules.is_empty());
    }

    #[test]
    fn gettable_rule_is_flat() {
        let rule = GettableRule {
            rule: rule("a", 1, 60),
            namespace_id: 3,
            provenance: Provenance::Api,
        };
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["uid"], "a");
        assert_eq!(value["namespace_id"], 3);
        assert_eq!(value["provenance"], "api");
    }

    #[test]
    fn postable_group_parses_minimal_payload() {
        let config: PostableRuleGroupConfig = serde_json::from_value(json!({
            "name": "cpu",
            "rules": [{
                "title": "high cpu",
                "condition": "A",
                "data": [{"ref_id": "A", "datasource_uid": "prom"}],
                "no_data_state": "OK"
            }]
        }))
        .unwrap();
        assert_eq!(config.interval_seconds, None);
        assert_eq!(config.rules[0].uid, None);
        assert_eq!(config.rules[0].no_data_state, Some(NoDataState::Ok));
        assert_eq!(config.rules[0].exec_err_state, None);
    }

    #[test]
    fn skip_reason_names() {
        let skipped = SkippedRule {
            uid: "a".to_string(),
            reason: SkipReason::Provisioned,
        };
        assert_eq!(
            serde_json::to_value(&skipped).unwrap(),
            json!({"uid": "a", "reason": "provisioned"})
        );
    }
}
