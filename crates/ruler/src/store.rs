//! Storage abstractions consumed by the reconciliation engine.
//!
//! This module provides the [`RuleStore`], [`ProvenanceStore`] and
//! [`TransactionManager`] traits. Code written against them works with any backend;
//! [`crate::memory::InMemoryStore`] is the bundled implementation.

use std::collections::{BTreeMap, HashMap};

use crate::context::RequestContext;
use crate::error::Result;
use crate::models::{AlertRule, Namespace, Provenance};

/// Filter for [`RuleStore::list_alert_rules`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListAlertRulesQuery {
    /// Organization ID.
    pub org_id: i64,
    /// Restrict to these folders. Empty means every folder.
    pub namespace_uids: Vec<String>,
    /// Restrict to one group name.
    pub rule_group: Option<String>,
    /// Restrict to rules linked to a dashboard.
    pub dashboard_uid: Option<String>,
    /// Restrict to rules linked to a panel of that dashboard.
    pub panel_id: Option<i64>,
}

impl ListAlertRulesQuery {
    /// Lists all rules of one organization.
    #[must_use]
    pub fn for_org(org_id: i64) -> Self {
        Self {
            org_id,
            ..Self::default()
        }
    }

    /// Restricts the listing to one folder.
    #[must_use]
    pub fn in_namespace(mut self, namespace_uid: impl Into<String>) -> Self {
        self.namespace_uids = vec![namespace_uid.into()];
        self
    }

    /// Restricts the listing to one group.
    #[must_use]
    pub fn in_group(mut self, rule_group: impl Into<String>) -> Self {
        self.rule_group = Some(rule_group.into());
        self
    }

    /// Returns true if the rule passes the filter.
    #[must_use]
    pub fn matches(&self, rule: &AlertRule) -> bool {
        if rule.org_id != self.org_id {
            return false;
        }
        if !self.namespace_uids.is_empty() && !self.namespace_uids.contains(&rule.namespace_uid) {
            return false;
        }
        if self.rule_group.as_ref().is_some_and(|g| g != &rule.rule_group) {
            return false;
        }
        if self.dashboard_uid.is_some() && self.dashboard_uid != rule.dashboard_uid {
            return false;
        }
        if self.panel_id.is_some() && self.panel_id != rule.panel_id {
            return false;
        }
        true
    }
}

/// A row update guarded by the version it was computed against.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRule {
    /// The rule as it was read; its version is the expected persisted version.
    pub existing: AlertRule,
    /// The desired new state.
    pub new: AlertRule,
}

/// Identity assigned to an inserted rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedRule {
    /// Row ID.
    pub id: i64,
    /// Rule UID, generated when the rule had none.
    pub uid: String,
}

/// Persistence of alert rules and the folders they live in.
pub trait RuleStore: Send + Sync {
    /// Lists rules matching the query, ordered by folder, group and group index.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_alert_rules(
        &self,
        ctx: &RequestContext,
        query: &ListAlertRulesQuery,
    ) -> Result<Vec<AlertRule>>;

    /// Returns every rule of the group that contains the rule with `uid`.
    ///
    /// Returns an empty list if no rule has that UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_alert_rules_group_by_rule_uid(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        uid: &str,
    ) -> Result<Vec<AlertRule>>;

    /// Inserts new rules at version 1.
    ///
    /// # Errors
    ///
    /// Returns an error if a UID is already taken or the store cannot be written.
    fn insert_alert_rules(
        &self,
        ctx: &RequestContext,
        rules: Vec<AlertRule>,
    ) -> Result<Vec<InsertedRule>>;

    /// Updates rules, bumping each version by one.
    ///
    /// # Errors
    ///
    /// Returns `RulerError::OptimisticLock` if a persisted version differs from
    /// the version of `existing`.
    fn update_alert_rules(&self, ctx: &RequestContext, updates: Vec<UpdateRule>) -> Result<()>;

    /// Deletes rules by UID. Unknown UIDs are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn delete_alert_rules_by_uid(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        uids: &[String],
    ) -> Result<()>;

    /// Counts rules of one organization, or of every organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn count_alert_rules(&self, ctx: &RequestContext, org_id: Option<i64>) -> Result<usize>;

    /// Looks up a folder by title for the request's principal.
    ///
    /// # Errors
    ///
    /// Returns `RulerError::NamespaceNotFound` if the folder does not exist and
    /// `RulerError::NamespaceAccessDenied` if the principal cannot view it, or cannot
    /// save to it when `with_can_save` is set.
    fn get_namespace_by_title(
        &self,
        ctx: &RequestContext,
        title: &str,
        org_id: i64,
        with_can_save: bool,
    ) -> Result<Namespace>;

    /// Returns the folders the request's principal can view, keyed by UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_user_visible_namespaces(
        &self,
        ctx: &RequestContext,
        org_id: i64,
    ) -> Result<BTreeMap<String, Namespace>>;
}

/// Records which resources are managed by provisioning channels.
pub trait ProvenanceStore: Send + Sync {
    /// Returns all provenance records of one resource type, keyed by resource UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_provenances(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        resource_type: &str,
    ) -> Result<HashMap<String, Provenance>>;

    /// Records the provenance of a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn set_provenance(
        &self,
        ctx: &RequestContext,
        rule: &AlertRule,
        org_id: i64,
        provenance: Provenance,
    ) -> Result<()>;
}

/// Runs work atomically.
pub trait TransactionManager: Send + Sync {
    /// Runs `work` in a transaction. If `work` fails, or the request is cancelled
    /// before commit, nothing it wrote is kept.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or `RulerError::Cancelled`.
    fn in_transaction(
        &self,
        ctx: &RequestContext,
        work: &mut dyn FnMut(&RequestContext) -> Result<()>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(namespace: &str, group: &str) -> AlertRule {
        AlertRule {
            org_id: 1,
            uid: "r".to_string(),
            namespace_uid: namespace.to_string(),
            rule_group: group.to_string(),
            ..AlertRule::default()
        }
    }

    #[test]
    fn query_filters_by_org_namespace_and_group() {
        let q = ListAlertRulesQuery::for_org(1).in_namespace("f1").in_group("g1");
        assert!(q.matches(&rule("f1", "g1")));
        assert!(!q.matches(&rule("f2", "g1")));
        assert!(!q.matches(&rule("f1", "g2")));
        assert!(!ListAlertRulesQuery::for_org(2).matches(&rule("f1", "g1")));
    }

    #[test]
    fn query_without_namespaces_matches_every_folder() {
        let q = ListAlertRulesQuery::for_org(1);
        assert!(q.matches(&rule("f1", "g1")));
        assert!(q.matches(&rule("f9", "g9")));
    }

    #[test]
    fn query_filters_by_dashboard_and_panel() {
        let mut linked = rule("f1", "g1");
        linked.dashboard_uid = Some("dash".to_string());
        linked.panel_id = Some(3);

        let mut q = ListAlertRulesQuery::for_org(1);
        q.dashboard_uid = Some("dash".to_string());
        assert!(q.matches(&linked));
        assert!(!q.matches(&rule("f1", "g1")));

        q.panel_id = Some(4);
        assert!(!q.matches(&linked));
    }
}
