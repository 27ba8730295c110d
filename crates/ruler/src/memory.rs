//! In-memory rule, provenance and transaction store.
//!
//! [`InMemoryStore`] implements [`RuleStore`], [`ProvenanceStore`] and
//! [`TransactionManager`] over a single locked state. Transactions are serialized
//! and take a snapshot of the state on entry; the snapshot is restored when the
//! work fails or the request is cancelled before commit. Reads and writes made
//! outside a transaction wait for a running one to finish, so they never see its
//! uncommitted rows and a rollback never discards them.
//!
//! The store can be loaded from and saved to a [`StoreSnapshot`], which is what the
//! `ruler` binary persists between invocations.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use parking_lot::{ReentrantMutex, RwLock};
use ruler_access::{
    folder_scope, OrgRole, Principal, ACTION_ALERT_RULES_CREATE, ACTION_ALERT_RULES_READ,
    ACTION_ALERT_RULES_WRITE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{Result, RulerError};
use crate::models::{AlertRule, AlertRuleKey, Namespace, Provenance, ALERT_RULE_RESOURCE_TYPE};
use crate::store::{
    InsertedRule, ListAlertRulesQuery, ProvenanceStore, RuleStore, TransactionManager, UpdateRule,
};

/// Provenance of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Organization ID.
    pub org_id: i64,
    /// Resource type, e.g. `alertRule`.
    pub resource_type: String,
    /// Resource UID.
    pub uid: String,
    /// Recorded provenance.
    pub provenance: Provenance,
}

/// Serializable contents of an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Folders.
    #[serde(default)]
    pub folders: Vec<Namespace>,
    /// Rules, ordered by org, folder, group and group index.
    #[serde(default)]
    pub rules: Vec<AlertRule>,
    /// Provenance records.
    #[serde(default)]
    pub provenances: Vec<ProvenanceRecord>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    folders: Vec<Namespace>,
    rules: BTreeMap<AlertRuleKey, AlertRule>,
    provenances: BTreeMap<(i64, String, String), Provenance>,
    next_id: i64,
    writes: u64,
}

impl StoreState {
    fn sorted_rules<'a>(&'a self, query: &ListAlertRulesQuery) -> Vec<&'a AlertRule> {
        let mut rules: Vec<&AlertRule> = self.rules.values().filter(|r| query.matches(r)).collect();
        rules.sort_by(|a, b| storage_order(a, b));
        rules
    }
}

fn storage_order(a: &AlertRule, b: &AlertRule) -> Ordering {
    (a.org_id, &a.namespace_uid, &a.rule_group, a.rule_group_index, &a.uid).cmp(&(
        b.org_id,
        &b.namespace_uid,
        &b.rule_group,
        b.rule_group_index,
        &b.uid,
    ))
}

fn can_view(principal: &Principal, folder: &Namespace) -> bool {
    principal.org_role.includes(OrgRole::Viewer)
        || principal.has_permission(ACTION_ALERT_RULES_READ, &folder_scope(&folder.uid))
}

fn can_save(principal: &Principal, folder: &Namespace) -> bool {
    let scope = folder_scope(&folder.uid);
    principal.org_role.includes(OrgRole::Editor)
        || principal.has_permission(ACTION_ALERT_RULES_WRITE, &scope)
        || principal.has_permission(ACTION_ALERT_RULES_CREATE, &scope)
}

/// Thread-safe in-memory implementation of the store traits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    // held by transactions and by every access outside one
    tx_lock: ReentrantMutex<()>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut state = StoreState {
            folders: snapshot.folders,
            ..StoreState::default()
        };
        for rule in snapshot.rules {
            state.next_id = state.next_id.max(rule.id);
            state.rules.insert(rule.key(), rule);
        }
        for record in snapshot.provenances {
            state
                .provenances
                .insert((record.org_id, record.resource_type, record.uid), record.provenance);
        }
        Self {
            state: RwLock::new(state),
            tx_lock: ReentrantMutex::new(()),
        }
    }

    /// Returns the current contents.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let _tx = self.tx_lock.lock();
        let state = self.state.read();
        let mut rules: Vec<AlertRule> = state.rules.values().cloned().collect();
        rules.sort_by(storage_order);
        StoreSnapshot {
            folders: state.folders.clone(),
            rules,
            provenances: state
                .provenances
                .iter()
                .map(|((org_id, resource_type, uid), provenance)| ProvenanceRecord {
                    org_id: *org_id,
                    resource_type: resource_type.clone(),
                    uid: uid.clone(),
                    provenance: *provenance,
                })
                .collect(),
        }
    }

    /// Adds a folder.
    pub fn add_folder(&self, folder: Namespace) {
        let _tx = self.tx_lock.lock();
        self.state.write().folders.push(folder);
    }

    /// Stores a rule as given, keeping its ID and version.
    pub fn put_rule(&self, rule: AlertRule) {
        let _tx = self.tx_lock.lock();
        let mut state = self.state.write();
        state.next_id = state.next_id.max(rule.id);
        state.rules.insert(rule.key(), rule);
    }

    /// Returns a stored rule.
    #[must_use]
    pub fn get_rule(&self, org_id: i64, uid: &str) -> Option<AlertRule> {
        let _tx = self.tx_lock.lock();
        self.state.read().rules.get(&AlertRuleKey::new(org_id, uid)).cloned()
    }

    /// Bumps the version of a stored rule as a concurrent writer would, returning
    /// the new version.
    pub fn bump_version(&self, org_id: i64, uid: &str) -> Option<i64> {
        let _tx = self.tx_lock.lock();
        let mut state = self.state.write();
        let rule = state.rules.get_mut(&AlertRuleKey::new(org_id, uid))?;
        rule.version += 1;
        rule.updated = Utc::now();
        Some(rule.version)
    }

    /// Returns the number of write calls applied and not rolled back.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        let _tx = self.tx_lock.lock();
        self.state.read().writes
    }
}

impl RuleStore for InMemoryStore {
    fn list_alert_rules(
        &self,
        ctx: &RequestContext,
        query: &ListAlertRulesQuery,
    ) -> Result<Vec<AlertRule>> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let state = self.state.read();
        Ok(state.sorted_rules(query).into_iter().cloned().collect())
    }

    fn get_alert_rules_group_by_rule_uid(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        uid: &str,
    ) -> Result<Vec<AlertRule>> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let state = self.state.read();
        let Some(rule) = state.rules.get(&AlertRuleKey::new(org_id, uid)) else {
            return Ok(Vec::new());
        };
        let query = ListAlertRulesQuery::for_org(org_id)
            .in_namespace(rule.namespace_uid.clone())
            .in_group(rule.rule_group.clone());
        Ok(state.sorted_rules(&query).into_iter().cloned().collect())
    }

    fn insert_alert_rules(
        &self,
        ctx: &RequestContext,
        rules: Vec<AlertRule>,
    ) -> Result<Vec<InsertedRule>> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.state.write();
        let mut prepared = Vec::with_capacity(rules.len());
        for mut rule in rules {
            if rule.uid.is_empty() {
                rule.uid = Uuid::new_v4().to_string();
            }
            if state.rules.contains_key(&rule.key())
                || prepared.iter().any(|r: &AlertRule| r.uid == rule.uid)
            {
                return Err(RulerError::validation(format!(
                    "rule with UID {} already exists",
                    rule.uid
                )));
            }
            prepared.push(rule);
        }

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(prepared.len());
        for mut rule in prepared {
            state.next_id += 1;
            rule.id = state.next_id;
            rule.version = 1;
            rule.updated = now;
            debug!(org_id = rule.org_id, rule_uid = %rule.uid, id = rule.id, "inserted alert rule");
            inserted.push(InsertedRule {
                id: rule.id,
                uid: rule.uid.clone(),
            });
            state.rules.insert(rule.key(), rule);
        }
        state.writes += 1;
        Ok(inserted)
    }

    fn update_alert_rules(&self, ctx: &RequestContext, updates: Vec<UpdateRule>) -> Result<()> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        if updates.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for update in &updates {
            let key = update.existing.key();
            let stored = state.rules.get(&key).ok_or_else(|| RulerError::RuleNotFound {
                uid: key.uid.clone(),
            })?;
            if stored.version != update.existing.version {
                return Err(RulerError::OptimisticLock {
                    uid: key.uid,
                    expected: update.existing.version,
                    actual: stored.version,
                });
            }
        }

        let now = Utc::now();
        for update in updates {
            let key = update.existing.key();
            let Some(stored) = state.rules.remove(&key) else {
                continue;
            };
            let mut rule = update.new;
            rule.id = stored.id;
            rule.version = stored.version + 1;
            rule.updated = now;
            debug!(
                org_id = rule.org_id,
                rule_uid = %rule.uid,
                version = rule.version,
                "updated alert rule"
            );
            state.rules.insert(rule.key(), rule);
        }
        state.writes += 1;
        Ok(())
    }

    fn delete_alert_rules_by_uid(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        uids: &[String],
    ) -> Result<()> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        if uids.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for uid in uids {
            if state.rules.remove(&AlertRuleKey::new(org_id, uid.clone())).is_some() {
                debug!(org_id, rule_uid = %uid, "deleted alert rule");
            }
            state.provenances.retain(|(o, _, u), _| !(*o == org_id && u == uid));
        }
        state.writes += 1;
        Ok(())
    }

    fn count_alert_rules(&self, ctx: &RequestContext, org_id: Option<i64>) -> Result<usize> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let state = self.state.read();
        Ok(state
            .rules
            .values()
            .filter(|r| org_id.is_none_or(|o| r.org_id == o))
            .count())
    }

    fn get_namespace_by_title(
        &self,
        ctx: &RequestContext,
        title: &str,
        org_id: i64,
        with_can_save: bool,
    ) -> Result<Namespace> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let state = self.state.read();
        let folder = state
            .folders
            .iter()
            .find(|f| f.org_id == org_id && f.title == title)
            .ok_or_else(|| RulerError::NamespaceNotFound {
                title: title.to_string(),
            })?;
        let principal = ctx.principal();
        if !can_view(principal, folder) {
            return Err(RulerError::NamespaceAccessDenied {
                title: title.to_string(),
                action: "view",
            });
        }
        if with_can_save && !can_save(principal, folder) {
            return Err(RulerError::NamespaceAccessDenied {
                title: title.to_string(),
                action: "edit",
            });
        }
        Ok(folder.clone())
    }

    fn get_user_visible_namespaces(
        &self,
        ctx: &RequestContext,
        org_id: i64,
    ) -> Result<BTreeMap<String, Namespace>> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let state = self.state.read();
        let principal = ctx.principal();
        Ok(state
            .folders
            .iter()
            .filter(|f| f.org_id == org_id && can_view(principal, f))
            .map(|f| (f.uid.clone(), f.clone()))
            .collect())
    }
}

impl ProvenanceStore for InMemoryStore {
    fn get_provenances(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        resource_type: &str,
    ) -> Result<HashMap<String, Provenance>> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let state = self.state.read();
        Ok(state
            .provenances
            .iter()
            .filter(|((o, t, _), _)| *o == org_id && t == resource_type)
            .map(|((_, _, uid), p)| (uid.clone(), *p))
            .collect())
    }

    fn set_provenance(
        &self,
        ctx: &RequestContext,
        rule: &AlertRule,
        org_id: i64,
        provenance: Provenance,
    ) -> Result<()> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let mut state = self.state.write();
        state.provenances.insert(
            (
                org_id,
                ALERT_RULE_RESOURCE_TYPE.to_string(),
                rule.resource_id().to_string(),
            ),
            provenance,
        );
        state.writes += 1;
        Ok(())
    }
}

impl TransactionManager for InMemoryStore {
    fn in_transaction(
        &self,
        ctx: &RequestContext,
        work: &mut dyn FnMut(&RequestContext) -> Result<()>,
    ) -> Result<()> {
        let _tx = self.tx_lock.lock();
        ctx.check()?;
        let saved = self.state.read().clone();

        let result = work(ctx).and_then(|()| ctx.check());
        if let Err(err) = result {
            *self.state.write() = saved;
            warn!(error = %err, "transaction rolled back");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertQuery;
    use ruler_access::Permission;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx(role: OrgRole) -> RequestContext {
        RequestContext::new(Principal::new(1, 1, role))
    }

    fn folder(uid: &str) -> Namespace {
        Namespace {
            id: 1,
            uid: uid.to_string(),
            title: format!("{uid} title"),
            org_id: 1,
        }
    }

    fn rule(uid: &str, group: &str, index: i64) -> AlertRule {
        AlertRule {
            id: index,
            org_id: 1,
            uid: uid.to_string(),
            title: uid.to_string(),
            condition: "A".to_string(),
            data: vec![AlertQuery::new("A", "prom")],
            namespace_uid: "f".to_string(),
            rule_group: group.to_string(),
            rule_group_index: index,
            interval_seconds: 60,
            version: 1,
            ..AlertRule::default()
        }
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.add_folder(folder("f"));
        store.put_rule(rule("b", "g1", 2));
        store.put_rule(rule("a", "g1", 1));
        store.put_rule(rule("c", "g2", 1));
        store
    }

    #[test]
    fn list_orders_by_group_index() {
        let store = seeded();
        let rules = store
            .list_alert_rules(&ctx(OrgRole::Viewer), &ListAlertRulesQuery::for_org(1).in_group("g1"))
            .unwrap();
        let uids: Vec<_> = rules.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "b"]);
    }

    #[test]
    fn group_by_rule_uid_returns_whole_group() {
        let store = seeded();
        let group = store
            .get_alert_rules_group_by_rule_uid(&ctx(OrgRole::Viewer), 1, "b")
            .unwrap();
        assert_eq!(group.len(), 2);
        assert!(store
            .get_alert_rules_group_by_rule_uid(&ctx(OrgRole::Viewer), 1, "missing")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn insert_assigns_uid_id_and_version() {
        let store = seeded();
        let mut new = rule("", "g1", 3);
        new.version = 0;
        let inserted = store.insert_alert_rules(&ctx(OrgRole::Editor), vec![new]).unwrap();
        assert_eq!(inserted.len(), 1);
        assert!(!inserted[0].uid.is_empty());
        assert_eq!(inserted[0].id, 3);
        let stored = store.get_rule(1, &inserted[0].uid).unwrap();
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn insert_rejects_duplicate_uid() {
        let store = seeded();
        let err = store
            .insert_alert_rules(&ctx(OrgRole::Editor), vec![rule("a", "g1", 3)])
            .unwrap_err();
        assert!(matches!(err, RulerError::ValidationFailed { .. }));
    }

    #[test]
    fn update_bumps_version() {
        let store = seeded();
        let existing = store.get_rule(1, "a").unwrap();
        let mut new = existing.clone();
        new.title = "renamed".to_string();
        store
            .update_alert_rules(&ctx(OrgRole::Editor), vec![UpdateRule { existing, new }])
            .unwrap();
        let stored = store.get_rule(1, "a").unwrap();
        assert_eq!(stored.title, "renamed");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.id, 1);
    }

    #[test]
    fn update_with_stale_version_fails_without_writing() {
        let store = seeded();
        let existing = store.get_rule(1, "a").unwrap();
        let other = store.get_rule(1, "b").unwrap();
        store.bump_version(1, "a");

        let err = store
            .update_alert_rules(
                &ctx(OrgRole::Editor),
                vec![
                    UpdateRule {
                        existing: other.clone(),
                        new: other,
                    },
                    UpdateRule {
                        new: existing.clone(),
                        existing,
                    },
                ],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RulerError::OptimisticLock {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(store.get_rule(1, "b").unwrap().version, 1);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn delete_removes_rules_and_provenance() {
        let store = seeded();
        let ctx = ctx(OrgRole::Editor);
        let a = store.get_rule(1, "a").unwrap();
        store.set_provenance(&ctx, &a, 1, Provenance::File).unwrap();
        store
            .delete_alert_rules_by_uid(&ctx, 1, &["a".to_string(), "zzz".to_string()])
            .unwrap();
        assert!(store.get_rule(1, "a").is_none());
        assert!(store
            .get_provenances(&ctx, 1, ALERT_RULE_RESOURCE_TYPE)
            .unwrap()
            .is_empty());
        assert_eq!(store.count_alert_rules(&ctx, Some(1)).unwrap(), 2);
    }

    #[test]
    fn namespace_lookup_checks_role() {
        let store = seeded();
        assert!(store
            .get_namespace_by_title(&ctx(OrgRole::Editor), "f title", 1, true)
            .is_ok());
        assert!(matches!(
            store.get_namespace_by_title(&ctx(OrgRole::Viewer), "f title", 1, true),
            Err(RulerError::NamespaceAccessDenied { action: "edit", .. })
        ));
        assert!(matches!(
            store.get_namespace_by_title(&ctx(OrgRole::None), "f title", 1, false),
            Err(RulerError::NamespaceAccessDenied { action: "view", .. })
        ));
        assert!(matches!(
            store.get_namespace_by_title(&ctx(OrgRole::Editor), "nope", 1, false),
            Err(RulerError::NamespaceNotFound { .. })
        ));
    }

    #[test]
    fn folder_permission_grants_visibility() {
        let store = seeded();
        let principal = Principal::new(2, 1, OrgRole::None)
            .with_permission(Permission::new(ACTION_ALERT_RULES_READ, folder_scope("f")).unwrap());
        let visible = store
            .get_user_visible_namespaces(&RequestContext::new(principal), 1)
            .unwrap();
        assert!(visible.contains_key("f"));
        assert!(store
            .get_user_visible_namespaces(&ctx(OrgRole::None), 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = seeded();
        let before = store.snapshot();
        let err = store
            .in_transaction(&ctx(OrgRole::Editor), &mut |ctx| {
                store.delete_alert_rules_by_uid(ctx, 1, &["a".to_string()])?;
                Err(RulerError::QuotaReached)
            })
            .unwrap_err();
        assert!(matches!(err, RulerError::QuotaReached));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn cancellation_before_commit_rolls_back() {
        let store = seeded();
        let before = store.snapshot();
        let token = CancellationToken::new();
        let ctx = ctx(OrgRole::Editor).with_cancellation(token.clone());
        let err = store
            .in_transaction(&ctx, &mut |ctx| {
                store.delete_alert_rules_by_uid(ctx, 1, &["a".to_string()])?;
                token.cancel();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, RulerError::Cancelled));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn rollback_keeps_writes_made_outside_the_transaction() {
        let store = Arc::new(seeded());
        let (entered_tx, entered_rx) = mpsc::channel();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                entered_rx.recv().unwrap();
                let a = store.get_rule(1, "a").unwrap();
                store
                    .set_provenance(&ctx(OrgRole::Editor), &a, 1, Provenance::File)
                    .unwrap();
                store
                    .list_alert_rules(&ctx(OrgRole::Editor), &ListAlertRulesQuery::for_org(1))
                    .unwrap()
            })
        };

        let err = store
            .in_transaction(&ctx(OrgRole::Editor), &mut |tx| {
                store.insert_alert_rules(tx, vec![rule("pending", "g", 9)])?;
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                Err(RulerError::QuotaReached)
            })
            .unwrap_err();
        assert!(matches!(err, RulerError::QuotaReached));

        let seen = writer.join().unwrap();
        assert!(seen.iter().all(|r| r.uid != "pending"));
        assert!(store.get_rule(1, "pending").is_none());
        let provenances = store
            .get_provenances(&ctx(OrgRole::Editor), 1, ALERT_RULE_RESOURCE_TYPE)
            .unwrap();
        assert_eq!(provenances.get("a"), Some(&Provenance::File));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let store = seeded();
        let ctx = ctx(OrgRole::Editor);
        let a = store.get_rule(1, "a").unwrap();
        store.set_provenance(&ctx, &a, 1, Provenance::Api).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = InMemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), store.snapshot());

        let inserted = restored
            .insert_alert_rules(&ctx, vec![rule("d", "g2", 2)])
            .unwrap();
        assert_eq!(inserted[0].id, 3);
    }
}
