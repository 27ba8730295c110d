//! Core types for alert rules.
//!
//! This module provides the fundamental types used throughout the ruler crate:
//! - [`AlertRule`]: A persisted, versioned alert rule
//! - [`AlertQuery`]: One query of a rule's data pipeline
//! - [`AlertRuleKey`] and [`AlertRuleGroupKey`]: Rule and group identities
//! - [`Provenance`]: Whether a rule is managed by a provisioning channel
//! - [`Namespace`]: The folder a group of rules lives in

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Data-source UID reserved for server-side expressions.
pub const EXPRESSION_DATASOURCE_UID: &str = "__expr__";

/// Resource type under which rule provenance is recorded.
pub const ALERT_RULE_RESOURCE_TYPE: &str = "alertRule";

/// State assigned when a rule's query returns no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoDataState {
    /// Fire the alert.
    Alerting,
    /// Report a dedicated no-data state.
    #[default]
    NoData,
    /// Treat as normal.
    #[serde(rename = "OK")]
    Ok,
}

impl NoDataState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Alerting => "Alerting",
            Self::NoData => "NoData",
            Self::Ok => "OK",
        }
    }
}

impl fmt::Display for NoDataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State assigned when a rule fails to execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecErrState {
    /// Fire the alert.
    #[default]
    Alerting,
    /// Report a dedicated error state.
    Error,
    /// Treat as normal.
    #[serde(rename = "OK")]
    Ok,
}

impl ExecErrState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Alerting => "Alerting",
            Self::Error => "Error",
            Self::Ok => "OK",
        }
    }
}

impl fmt::Display for ExecErrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Origin of a rule. Interactively edited rules carry [`Provenance::None`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Created or edited interactively.
    #[default]
    #[serde(rename = "")]
    None,
    /// Created through the provisioning API.
    Api,
    /// Created from provisioning files.
    File,
}

impl Provenance {
    /// Returns true if the rule is managed by a provisioning channel.
    #[must_use]
    pub const fn is_provisioned(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns the provenance as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Api => "api",
            Self::File => "file",
        }
    }
}

/// Relative time range of a query, in seconds before evaluation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelativeTimeRange {
    /// Start of the range.
    pub from: u64,
    /// End of the range.
    pub to: u64,
}

/// One step of a rule's query pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertQuery {
    /// Identifier referenced by the rule condition and by other expressions.
    pub ref_id: String,
    /// Optional query type understood by the data source.
    #[serde(default)]
    pub query_type: String,
    /// Time range the query covers.
    #[serde(default)]
    pub relative_time_range: RelativeTimeRange,
    /// Data source the query runs against.
    pub datasource_uid: String,
    /// Data-source specific query model.
    #[serde(default)]
    pub model: Value,
}

impl AlertQuery {
    /// Creates a query against a data source.
    #[must_use]
    pub fn new(ref_id: impl Into<String>, datasource_uid: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            query_type: String::new(),
            relative_time_range: RelativeTimeRange { from: 600, to: 0 },
            datasource_uid: datasource_uid.into(),
            model: Value::Null,
        }
    }

    /// Sets the query model.
    #[must_use]
    pub fn with_model(mut self, model: Value) -> Self {
        self.model = model;
        self
    }

    /// Returns true if this step is a server-side expression.
    #[must_use]
    pub fn is_expression(&self) -> bool {
        self.datasource_uid == EXPRESSION_DATASOURCE_UID
    }

    pub(crate) fn to_json(&self) -> Value {
        json!({
            "ref_id": self.ref_id,
            "query_type": self.query_type,
            "relative_time_range": {
                "from": self.relative_time_range.from,
                "to": self.relative_time_range.to,
            },
            "datasource_uid": self.datasource_uid,
            "model": self.model,
        })
    }
}

/// Identity of a rule within an organization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertRuleKey {
    /// Organization ID.
    pub org_id: i64,
    /// Rule UID.
    pub uid: String,
}

impl AlertRuleKey {
    /// Creates a rule key.
    #[must_use]
    pub fn new(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
        }
    }
}

impl fmt::Display for AlertRuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "org_id={}, uid={}", self.org_id, self.uid)
    }
}

/// Identity of a rule group: the unit replaced by a single update request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertRuleGroupKey {
    /// Organization ID.
    pub org_id: i64,
    /// Folder UID.
    pub namespace_uid: String,
    /// Group name.
    pub rule_group: String,
}

impl AlertRuleGroupKey {
    /// Creates a group key.
    #[must_use]
    pub fn new(org_id: i64, namespace_uid: impl Into<String>, rule_group: impl Into<String>) -> Self {
        Self {
            org_id,
            namespace_uid: namespace_uid.into(),
            rule_group: rule_group.into(),
        }
    }
}

impl fmt::Display for AlertRuleGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{org_id: {}, namespace_uid: {}, group: {}}}",
            self.org_id, self.namespace_uid, self.rule_group
        )
    }
}

/// An alert rule as persisted by the rule store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRule {
    /// Internal row ID.
    pub id: i64,
    /// Organization ID.
    pub org_id: i64,
    /// Human readable title.
    pub title: String,
    /// Ref ID of the query whose result decides the alert state.
    pub condition: String,
    /// Query pipeline.
    pub data: Vec<AlertQuery>,
    /// Last time the row was written.
    pub updated: DateTime<Utc>,
    /// Evaluation interval.
    pub interval_seconds: i64,
    /// Optimistic-concurrency version.
    pub version: i64,
    /// Stable identifier, kept when the rule moves between groups.
    pub uid: String,
    /// Folder UID.
    pub namespace_uid: String,
    /// Dashboard the rule is linked to.
    pub dashboard_uid: Option<String>,
    /// Panel the rule is linked to.
    pub panel_id: Option<i64>,
    /// Group name.
    pub rule_group: String,
    /// Position of the rule within its group, starting at 1.
    pub rule_group_index: i64,
    /// No-data policy.
    pub no_data_state: NoDataState,
    /// Execution-error policy.
    pub exec_err_state: ExecErrState,
    /// How long the condition must hold before firing.
    pub for_seconds: u64,
    /// Annotations attached to fired alerts.
    pub annotations: BTreeMap<String, String>,
    /// Labels attached to fired alerts.
    pub labels: BTreeMap<String, String>,
}

impl AlertRule {
    /// Returns the rule key.
    #[must_use]
    pub fn key(&self) -> AlertRuleKey {
        AlertRuleKey::new(self.org_id, self.uid.clone())
    }

    /// Returns the key of the group the rule belongs to.
    #[must_use]
    pub fn group_key(&self) -> AlertRuleGroupKey {
        AlertRuleGroupKey::new(self.org_id, self.namespace_uid.clone(), self.rule_group.clone())
    }

    /// Returns the UID under which provenance is recorded.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.uid
    }

    /// Returns the UIDs of all data sources queried, excluding expressions.
    #[must_use]
    pub fn datasource_uids(&self) -> BTreeSet<&str> {
        self.data
            .iter()
            .filter(|q| !q.is_expression())
            .map(|q| q.datasource_uid.as_str())
            .collect()
    }

    /// Fills fields a client left blank with the values of the stored rule.
    pub fn patch_partial(&mut self, existing: &AlertRule) {
        if self.title.is_empty() {
            self.title.clone_from(&existing.title);
        }
        if self.condition.is_empty() || self.data.is_empty() {
            self.condition.clone_from(&existing.condition);
            self.data.clone_from(&existing.data);
        }
        if self.interval_seconds == 0 {
            self.interval_seconds = existing.interval_seconds;
        }
    }
}

/// All rules of one group.
pub type RulesGroup = Vec<AlertRule>;

/// Sorts rules by group index, then UID.
pub fn sort_by_group_index(rules: &mut [AlertRule]) {
    rules.sort_by(|a, b| {
        a.rule_group_index
            .cmp(&b.rule_group_index)
            .then_with(|| a.uid.cmp(&b.uid))
    });
}

/// A folder that scopes rule groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Internal numeric ID.
    pub id: i64,
    /// Folder UID.
    pub uid: String,
    /// Folder title, unique within the organization.
    pub title: String,
    /// Organization ID.
    pub org_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(uid: &str, index: i64) -> AlertRule {
        AlertRule {
            uid: uid.to_string(),
            org_id: 1,
            namespace_uid: "folder".to_string(),
            rule_group: "group".to_string(),
            rule_group_index: index,
            title: format!("rule {uid}"),
            condition: "A".to_string(),
            data: vec![AlertQuery::new("A", "prom"), AlertQuery::new("B", EXPRESSION_DATASOURCE_UID)],
            interval_seconds: 60,
            ..AlertRule::default()
        }
    }

    #[test]
    fn datasource_uids_skip_expressions() {
        let r = rule("a", 1);
        let uids: Vec<_> = r.datasource_uids().into_iter().collect();
        assert_eq!(uids, vec!["prom"]);
    }

    #[test]
    fn keys_identify_rule_and_group() {
        let r = rule("a", 1);
        assert_eq!(r.key(), AlertRuleKey::new(1, "a"));
        assert_eq!(r.group_key(), AlertRuleGroupKey::new(1, "folder", "group"));
        assert_eq!(
            r.group_key().to_string(),
            "{org_id: 1, namespace_uid: folder, group: group}"
        );
    }

    #[test]
    fn sort_by_group_index_breaks_ties_by_uid() {
        let mut rules = vec![rule("c", 2), rule("b", 1), rule("a", 2)];
        sort_by_group_index(&mut rules);
        let uids: Vec<_> = rules.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["b", "a", "c"]);
    }

    #[test]
    fn patch_partial_fills_blank_fields() {
        let existing = rule("a", 1);
        let mut submitted = AlertRule {
            uid: "a".to_string(),
            ..AlertRule::default()
        };
        submitted.patch_partial(&existing);
        assert_eq!(submitted.title, existing.title);
        assert_eq!(submitted.condition, existing.condition);
        assert_eq!(submitted.data, existing.data);
        assert_eq!(submitted.interval_seconds, 60);
    }

    #[test]
    fn patch_partial_keeps_submitted_values() {
        let existing = rule("a", 1);
        let mut submitted = rule("a", 1);
        submitted.title = "renamed".to_string();
        submitted.patch_partial(&existing);
        assert_eq!(submitted.title, "renamed");
    }

    #[test]
    fn provenance_serde_names() {
        assert_eq!(serde_json::to_string(&Provenance::None).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Provenance::Api).unwrap(), "\"api\"");
        assert!(Provenance::File.is_provisioned());
        assert!(!Provenance::None.is_provisioned());
    }

    #[test]
    fn no_data_state_serde_names() {
        assert_eq!(serde_json::to_string(&NoDataState::Ok).unwrap(), "\"OK\"");
        let state: ExecErrState = serde_json::from_str("\"Error\"").unwrap();
        assert_eq!(state, ExecErrState::Error);
    }
}
