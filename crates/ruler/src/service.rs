//! The ruler service: reads and transactional replacement of rule groups.
//!
//! [`RulerService`] is the entry point for every ruler operation. It is
//! wired from the store traits, a quota service, a scheduler and an access-control
//! backend through [`RulerServiceBuilder`].
//!
//! Replacing a group runs in one transaction:
//!
//! 1. Calculate the delta between the submitted and the persisted rules
//! 2. Authorize every change (skipped when fine-grained access control is disabled)
//! 3. Reject the change if it touches a provisioned rule
//! 4. Add version-only and re-indexing updates for every affected group
//! 5. Insert, update and delete
//! 6. Check the quota against the written rows when rules were created
//!
//! After commit the scheduler is told about every update and delete. Nothing is
//! written, and the scheduler is not notified, if any step fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use ruler_access::{AccessControl, PrincipalAccess, RbacAccessControl, RoleRequirement};
use tracing::{debug, error, info, warn};

use crate::api::{
    DeleteRulesResponse, GettableRuleGroupConfig, NamespaceConfigResponse,
    PostableRuleGroupConfig, RuleGroupConfigResponse, RulesFilter, SkipReason, SkippedRule,
    UpdateRuleGroupResponse,
};
use crate::authorization::{
    authorize_access_to_rule_group, authorize_datasource_access_for_rule, authorize_rule_changes,
};
use crate::changes::{calculate_automatic_changes, calculate_changes, GroupDelta, RuleUpdate};
use crate::config::RulerConfig;
use crate::context::RequestContext;
use crate::error::{Result, RulerError};
use crate::models::{AlertRule, AlertRuleGroupKey, AlertRuleKey, ALERT_RULE_RESOURCE_TYPE};
use crate::provenance::{provenance_of, verify_provisioned_rules_not_affected};
use crate::quota::{QuotaScope, QuotaService, RuleCountQuota, ALERT_RULE_TARGET};
use crate::schedule::{notify_scheduler, ScheduleService};
use crate::store::{ListAlertRulesQuery, ProvenanceStore, RuleStore, TransactionManager};
use crate::validation::validate_rule_group;

/// Builder for [`RulerService`].
pub struct RulerServiceBuilder {
    store: Arc<dyn RuleStore>,
    xact: Arc<dyn TransactionManager>,
    provenance: Arc<dyn ProvenanceStore>,
    scheduler: Arc<dyn ScheduleService>,
    quota: Option<Arc<dyn QuotaService>>,
    ac: Arc<dyn AccessControl>,
    config: RulerConfig,
}

impl RulerServiceBuilder {
    /// Starts a builder with fine-grained access control enabled, the default
    /// configuration and a quota that counts rules in `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RuleStore>,
        xact: Arc<dyn TransactionManager>,
        provenance: Arc<dyn ProvenanceStore>,
        scheduler: Arc<dyn ScheduleService>,
    ) -> Self {
        Self {
            store,
            xact,
            provenance,
            scheduler,
            quota: None,
            ac: Arc::new(RbacAccessControl::new()),
            config: RulerConfig::default(),
        }
    }

    /// Sets the access-control backend.
    #[must_use]
    pub fn with_access_control(mut self, ac: Arc<dyn AccessControl>) -> Self {
        self.ac = ac;
        self
    }

    /// Sets the quota service.
    #[must_use]
    pub fn with_quota(mut self, quota: Arc<dyn QuotaService>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the service.
    #[must_use]
    pub fn build(self) -> RulerService {
        let quota = self.quota.unwrap_or_else(|| {
            Arc::new(RuleCountQuota::new(Arc::clone(&self.store), self.config.quota))
        });
        RulerService {
            store: self.store,
            xact: self.xact,
            provenance: self.provenance,
            scheduler: self.scheduler,
            quota,
            ac: self.ac,
            config: self.config,
        }
    }
}

/// Reads and mutates alert rule groups on behalf of a principal.
pub struct RulerService {
    store: Arc<dyn RuleStore>,
    xact: Arc<dyn TransactionManager>,
    provenance: Arc<dyn ProvenanceStore>,
    scheduler: Arc<dyn ScheduleService>,
    quota: Arc<dyn QuotaService>,
    ac: Arc<dyn AccessControl>,
    config: RulerConfig,
}

impl RulerService {
    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RulerConfig {
        &self.config
    }

    /// Deletes the rules of a folder, or of one group in it, that the principal may
    /// delete. Rules using a data source the principal cannot query, and provisioned
    /// rules, are skipped and listed in the response.
    ///
    /// # Errors
    ///
    /// Returns `RulerError::Unauthorized` if the principal may not delete any of the
    /// rules, `RulerError::ValidationFailed` if every deletable rule is provisioned,
    /// or a namespace lookup error.
    pub fn delete_alert_rules(
        &self,
        ctx: &RequestContext,
        namespace_title: &str,
        group: Option<&str>,
    ) -> Result<DeleteRulesResponse> {
        let org_id = ctx.org_id();
        let namespace = self
            .store
            .get_namespace_by_title(ctx, namespace_title, org_id, true)?;
        let provenances = self
            .provenance
            .get_provenances(ctx, org_id, ALERT_RULE_RESOURCE_TYPE)?;
        let check = PrincipalAccess::new(
            self.ac.as_ref(),
            ctx.principal(),
            RoleRequirement::OrgAdminOrEditor,
        );

        let mut deleted: Vec<String> = Vec::new();
        let mut skipped: Vec<SkippedRule> = Vec::new();
        let mut work = |tx: &RequestContext| -> Result<()> {
            deleted.clear();
            skipped.clear();

            let mut query = ListAlertRulesQuery::for_org(org_id).in_namespace(namespace.uid.clone());
            if let Some(group) = group {
                query = query.in_group(group);
            }
            let rules = self.store.list_alert_rules(tx, &query)?;
            if rules.is_empty() {
                debug!(namespace = %namespace.title, group, "no alert rules to delete from namespace/group");
                return Ok(());
            }
            let expected = rules.len();

            let (authorized, unauthorized): (Vec<AlertRule>, Vec<AlertRule>) = rules
                .into_iter()
                .partition(|r| authorize_datasource_access_for_rule(r, &check));
            if authorized.is_empty() {
                return Err(RulerError::unauthorized(
                    "to delete rules because user is not authorized to access data sources used by the rules",
                ));
            }
            if !unauthorized.is_empty() {
                info!(
                    namespace = %namespace.title,
                    expected,
                    authorized = authorized.len(),
                    unauthorized = unauthorized.len(),
                    "user cannot delete one or many alert rules because it does not have access to data sources, those rules will be skipped"
                );
            }
            skipped.extend(unauthorized.into_iter().map(|r| SkippedRule {
                uid: r.uid,
                reason: SkipReason::Unauthorized,
            }));

            let (deletable, provisioned): (Vec<AlertRule>, Vec<AlertRule>) = authorized
                .into_iter()
                .partition(|r| !provenance_of(&provenances, r).is_provisioned());
            if deletable.is_empty() {
                return Err(RulerError::validation(
                    "all rules have been provisioned and cannot be deleted through this api",
                ));
            }
            if !provisioned.is_empty() {
                info!(
                    namespace = %namespace.title,
                    expected,
                    provenance_none = deletable.len(),
                    provenance_set = provisioned.len(),
                    "user cannot delete one or many alert rules because they have a provenance set, those rules will be skipped"
                );
            }
            skipped.extend(provisioned.into_iter().map(|r| SkippedRule {
                uid: r.uid,
                reason: SkipReason::Provisioned,
            }));

            let uids: Vec<String> = deletable.into_iter().map(|r| r.uid).collect();
            self.store.delete_alert_rules_by_uid(tx, org_id, &uids)?;
            deleted = uids;
            Ok(())
        };
        self.xact.in_transaction(ctx, &mut work)?;

        debug!(namespace = %namespace.title, deleted = deleted.len(), "rules have been deleted from the store, updating scheduler");
        for uid in &deleted {
            self.scheduler
                .delete_alert_rule(AlertRuleKey::new(org_id, uid.clone()));
        }

        let message = if deleted.is_empty() {
            "no rules to delete"
        } else {
            "rules deleted"
        };
        Ok(DeleteRulesResponse {
            message: message.to_string(),
            deleted,
            skipped,
        })
    }

    /// Returns the groups of a folder whose every rule the principal can access.
    ///
    /// # Errors
    ///
    /// Returns a namespace lookup error or a store error.
    pub fn get_namespace_rules_config(
        &self,
        ctx: &RequestContext,
        namespace_title: &str,
    ) -> Result<NamespaceConfigResponse> {
        let org_id = ctx.org_id();
        let namespace = self
            .store
            .get_namespace_by_title(ctx, namespace_title, org_id, false)?;
        let rules = self.store.list_alert_rules(
            ctx,
            &ListAlertRulesQuery::for_org(org_id).in_namespace(namespace.uid.clone()),
        )?;
        let provenances = self
            .provenance
            .get_provenances(ctx, org_id, ALERT_RULE_RESOURCE_TYPE)?;
        let check = PrincipalAccess::new(self.ac.as_ref(), ctx.principal(), RoleRequirement::Viewer);

        let mut groups: BTreeMap<String, Vec<AlertRule>> = BTreeMap::new();
        for rule in rules {
            groups.entry(rule.rule_group.clone()).or_default().push(rule);
        }

        let mut result = NamespaceConfigResponse::new();
        for (name, rules) in groups {
            if !authorize_access_to_rule_group(&rules, &check) {
                debug!(namespace = %namespace.title, group = %name, "group hidden from user");
                continue;
            }
            result
                .entry(namespace.title.clone())
                .or_default()
                .push(GettableRuleGroupConfig::from_rules(
                    name,
                    rules,
                    namespace.id,
                    &provenances,
                ));
        }
        Ok(result)
    }

    /// Returns one group of a folder.
    ///
    /// # Errors
    ///
    /// Returns `RulerError::Unauthorized` if the principal cannot access a rule of the
    /// group, a namespace lookup error or a store error.
    pub fn get_rules_group_config(
        &self,
        ctx: &RequestContext,
        namespace_title: &str,
        group: &str,
    ) -> Result<RuleGroupConfigResponse> {
        let org_id = ctx.org_id();
        let namespace = self
            .store
            .get_namespace_by_title(ctx, namespace_title, org_id, false)?;
        let rules = self.store.list_alert_rules(
            ctx,
            &ListAlertRulesQuery::for_org(org_id)
                .in_namespace(namespace.uid.clone())
                .in_group(group),
        )?;
        let provenances = self
            .provenance
            .get_provenances(ctx, org_id, ALERT_RULE_RESOURCE_TYPE)?;
        let check = PrincipalAccess::new(self.ac.as_ref(), ctx.principal(), RoleRequirement::Viewer);

        if !authorize_access_to_rule_group(&rules, &check) {
            return Err(RulerError::unauthorized(
                "to access the group because it does not have access to one or many data sources one or many rules in the group use",
            ));
        }
        Ok(RuleGroupConfigResponse {
            group: GettableRuleGroupConfig::from_rules(group, rules, namespace.id, &provenances),
        })
    }

    /// Returns every group, in every folder visible to the principal, whose every
    /// rule the principal can access.
    ///
    /// # Errors
    ///
    /// Returns `RulerError::ValidationFailed` if a panel is given without a
    /// dashboard, or a store error.
    pub fn get_rules_config(
        &self,
        ctx: &RequestContext,
        filter: &RulesFilter,
    ) -> Result<NamespaceConfigResponse> {
        let dashboard_uid = filter.dashboard_uid.clone().filter(|d| !d.is_empty());
        if dashboard_uid.is_none() && filter.panel_id.is_some() {
            return Err(RulerError::validation("panel_id must be set with dashboard_uid"));
        }

        let org_id = ctx.org_id();
        let namespaces = self.store.get_user_visible_namespaces(ctx, org_id)?;
        let mut result = NamespaceConfigResponse::new();
        if namespaces.is_empty() {
            debug!(user_id = ctx.principal().user_id, "user has no access to any namespaces");
            return Ok(result);
        }

        let query = ListAlertRulesQuery {
            org_id,
            namespace_uids: namespaces.keys().cloned().collect(),
            rule_group: None,
            dashboard_uid,
            panel_id: filter.panel_id,
        };
        let rules = self.store.list_alert_rules(ctx, &query)?;
        let provenances = self
            .provenance
            .get_provenances(ctx, org_id, ALERT_RULE_RESOURCE_TYPE)?;
        let check = PrincipalAccess::new(self.ac.as_ref(), ctx.principal(), RoleRequirement::Viewer);

        let mut groups: BTreeMap<AlertRuleGroupKey, Vec<AlertRule>> = BTreeMap::new();
        for rule in rules {
            groups.entry(rule.group_key()).or_default().push(rule);
        }

        for (key, rules) in groups {
            let Some(folder) = namespaces.get(&key.namespace_uid) else {
                error!(
                    user_id = ctx.principal().user_id,
                    namespace_uid = %key.namespace_uid,
                    "namespace not visible to the user"
                );
                continue;
            };
            if !authorize_access_to_rule_group(&rules, &check) {
                continue;
            }
            result
                .entry(folder.title.clone())
                .or_default()
                .push(GettableRuleGroupConfig::from_rules(
                    key.rule_group,
                    rules,
                    folder.id,
                    &provenances,
                ));
        }
        Ok(result)
    }

    /// Validates a submitted group and replaces the group of that name in the folder.
    ///
    /// # Errors
    ///
    /// Returns a namespace lookup error, `RulerError::ValidationFailed` for an invalid
    /// group, or any error of [`RulerService::update_alert_rules_in_group`].
    pub fn post_rule_group_config(
        &self,
        ctx: &RequestContext,
        namespace_title: &str,
        config: &PostableRuleGroupConfig,
    ) -> Result<UpdateRuleGroupResponse> {
        let org_id = ctx.org_id();
        let namespace = self
            .store
            .get_namespace_by_title(ctx, namespace_title, org_id, true)?;
        let rules = validate_rule_group(config, org_id, &namespace, &self.config)?;
        let group_key = AlertRuleGroupKey::new(org_id, namespace.uid, config.name.clone());
        self.update_alert_rules_in_group(ctx, &group_key, rules)
    }

    /// Replaces the rules of a group in one transaction and notifies the scheduler
    /// after commit.
    ///
    /// # Errors
    ///
    /// Returns `RulerError::RuleNotFound`, `RulerError::Unauthorized`,
    /// `RulerError::ProvisionedResource`, `RulerError::QuotaReached`,
    /// `RulerError::OptimisticLock`, `RulerError::Cancelled` or a store error. Nothing
    /// is persisted when an error is returned.
    pub fn update_alert_rules_in_group(
        &self,
        ctx: &RequestContext,
        group_key: &AlertRuleGroupKey,
        rules: Vec<AlertRule>,
    ) -> Result<UpdateRuleGroupResponse> {
        let mut committed: Option<GroupDelta> = None;
        let mut work = |tx: &RequestContext| -> Result<()> {
            committed = None;
            let delta = calculate_changes(tx, self.store.as_ref(), group_key, rules.clone())?;
            if delta.is_empty() {
                info!(
                    org_id = group_key.org_id,
                    namespace_uid = %group_key.namespace_uid,
                    group = %group_key.rule_group,
                    "no changes detected in the request, do nothing"
                );
                committed = Some(delta);
                return Ok(());
            }

            // without fine-grained access control, folder access is checked by the namespace lookup
            if !self.ac.is_disabled() {
                let check = PrincipalAccess::new(
                    self.ac.as_ref(),
                    tx.principal(),
                    RoleRequirement::OrgAdminOrEditor,
                );
                authorize_rule_changes(&delta, &check)?;
            }

            verify_provisioned_rules_not_affected(
                tx,
                self.provenance.as_ref(),
                group_key.org_id,
                &delta,
            )?;

            let delta = calculate_automatic_changes(delta);
            debug!(
                org_id = group_key.org_id,
                namespace_uid = %group_key.namespace_uid,
                group = %group_key.rule_group,
                add = delta.new.len(),
                update = delta.update.len(),
                delete = delta.delete.len(),
                "updating database with the authorized changes"
            );

            for update in delta.update.iter().filter(|u| !u.is_noop()) {
                debug!(rule_uid = %update.new.uid, diff = %update.diff, "updating rule");
            }
            self.store.insert_alert_rules(tx, delta.new.clone())?;
            self.store.update_alert_rules(
                tx,
                delta.update.iter().map(RuleUpdate::to_store_update).collect(),
            )?;
            if !delta.delete.is_empty() {
                let uids: Vec<String> = delta.delete.iter().map(|r| r.uid.clone()).collect();
                self.store
                    .delete_alert_rules_by_uid(tx, group_key.org_id, &uids)?;
            }

            // rows are already written, so only a count above the limit is rejected
            if !delta.new.is_empty() {
                let scope = QuotaScope {
                    org_id: group_key.org_id,
                    user_id: tx.principal().user_id,
                };
                if self
                    .quota
                    .check_quota_reached(tx, ALERT_RULE_TARGET, &scope, 0)?
                {
                    return Err(RulerError::QuotaReached);
                }
            }

            committed = Some(delta);
            Ok(())
        };

        if let Err(err) = self.xact.in_transaction(ctx, &mut work) {
            warn!(
                org_id = group_key.org_id,
                namespace_uid = %group_key.namespace_uid,
                group = %group_key.rule_group,
                error = %err,
                "failed to update rule group"
            );
            return Err(err);
        }
        let delta = committed
            .ok_or_else(|| RulerError::Internal("transaction committed without a result".to_string()))?;

        notify_scheduler(self.scheduler.as_ref(), &delta);

        let message = if delta.is_empty() {
            UpdateRuleGroupResponse::NO_CHANGES
        } else {
            UpdateRuleGroupResponse::UPDATED
        };
        Ok(UpdateRuleGroupResponse {
            message: message.to_string(),
            created: delta.new.len(),
            updated: delta.update.len(),
            deleted: delta.delete.len(),
        })
    }
}
