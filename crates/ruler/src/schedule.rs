//! Propagation of committed changes to the rule scheduler.
//!
//! The scheduler is a downstream replica of the rule table. The service reports
//! committed changes through [`ScheduleService`]; [`SchedulerHandle`] forwards them
//! as [`ScheduleEvent`]s over a channel to a [`RuleRegistry`], which keeps the
//! version of every live rule.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::changes::GroupDelta;
use crate::models::AlertRuleKey;

/// Receives committed rule changes.
pub trait ScheduleService: Send + Sync {
    /// The rule was written and is now at `version`.
    fn update_alert_rule(&self, key: AlertRuleKey, version: i64);

    /// The rule was deleted.
    fn delete_alert_rule(&self, key: AlertRuleKey);
}

/// A change reported to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleEvent {
    /// A rule was updated.
    Update {
        /// The rule.
        key: AlertRuleKey,
        /// Its new version.
        version: i64,
    },
    /// A rule was deleted.
    Delete {
        /// The rule.
        key: AlertRuleKey,
    },
}

/// [`ScheduleService`] that sends events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<ScheduleEvent>,
}

impl SchedulerHandle {
    /// Creates a handle and the receiving end of its channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScheduleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ScheduleEvent) {
        if let Err(err) = self.tx.send(event) {
            warn!(event = ?err.0, "scheduler is not running, event dropped");
        }
    }
}

impl ScheduleService for SchedulerHandle {
    fn update_alert_rule(&self, key: AlertRuleKey, version: i64) {
        self.send(ScheduleEvent::Update { key, version });
    }

    fn delete_alert_rule(&self, key: AlertRuleKey) {
        self.send(ScheduleEvent::Delete { key });
    }
}

/// Reports every update and delete of a committed delta.
///
/// Updated rules are reported at the version the store assigned on commit, one past
/// the version the update was calculated against.
pub fn notify_scheduler(scheduler: &dyn ScheduleService, delta: &GroupDelta) {
    for update in &delta.update {
        scheduler.update_alert_rule(update.existing.key(), update.existing.version + 1);
    }
    for rule in &delta.delete {
        scheduler.delete_alert_rule(rule.key());
    }
    debug!(
        group = %delta.group_key,
        updated = delta.update.len(),
        deleted = delta.delete.len(),
        "scheduler notified"
    );
}

/// The scheduler's view of live rules: the latest known version of each.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Arc<RwLock<HashMap<AlertRuleKey, i64>>>,
}

impl RuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Updates older than the known version are ignored.
    pub fn apply(&self, event: ScheduleEvent) {
        let mut rules = self.rules.write();
        match event {
            ScheduleEvent::Update { key, version } => {
                let current = rules.entry(key.clone()).or_insert(version);
                if *current > version {
                    debug!(rule = %key, version, current = *current, "stale update ignored");
                    return;
                }
                *current = version;
            }
            ScheduleEvent::Delete { key } => {
                rules.remove(&key);
            }
        }
    }

    /// Applies events until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<ScheduleEvent>) {
        let mut applied = 0usize;
        while let Some(event) = rx.recv().await {
            self.apply(event);
            applied += 1;
        }
        info!(applied, "scheduler channel closed");
    }

    /// Returns the known version of a rule.
    #[must_use]
    pub fn version(&self, key: &AlertRuleKey) -> Option<i64> {
        self.rules.read().get(key).copied()
    }

    /// Returns the number of live rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rule is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::changes::RuleUpdate;
    use crate::diff::DiffReport;
    use crate::models::{AlertRule, AlertRuleGroupKey};

    fn rule(uid: &str, version: i64) -> AlertRule {
        AlertRule {
            org_id: 1,
            uid: uid.to_string(),
            version,
            ..AlertRule::default()
        }
    }

    #[test]
    fn notify_reports_next_version_and_deletes() {
        let (handle, mut rx) = SchedulerHandle::channel();
        let delta = GroupDelta {
            group_key: AlertRuleGroupKey::new(1, "f", "g"),
            affected_groups: BTreeMap::new(),
            new: vec![rule("", 0)],
            update: vec![RuleUpdate {
                existing: rule("a", 4),
                new: rule("a", 4),
                diff: DiffReport::default(),
            }],
            delete: vec![rule("b", 2)],
        };

        notify_scheduler(&handle, &delta);

        assert_eq!(
            rx.try_recv().unwrap(),
            ScheduleEvent::Update {
                key: AlertRuleKey::new(1, "a"),
                version: 5
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ScheduleEvent::Delete {
                key: AlertRuleKey::new(1, "b")
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_without_receiver_does_not_panic() {
        let (handle, rx) = SchedulerHandle::channel();
        drop(rx);
        handle.delete_alert_rule(AlertRuleKey::new(1, "a"));
    }

    #[test]
    fn registry_ignores_stale_updates() {
        let registry = RuleRegistry::new();
        let key = AlertRuleKey::new(1, "a");
        registry.apply(ScheduleEvent::Update { key: key.clone(), version: 3 });
        registry.apply(ScheduleEvent::Update { key: key.clone(), version: 2 });
        assert_eq!(registry.version(&key), Some(3));

        registry.apply(ScheduleEvent::Delete { key: key.clone() });
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn registry_drains_channel() {
        let (handle, rx) = SchedulerHandle::channel();
        let registry = RuleRegistry::new();
        handle.update_alert_rule(AlertRuleKey::new(1, "a"), 2);
        handle.update_alert_rule(AlertRuleKey::new(1, "b"), 7);
        handle.delete_alert_rule(AlertRuleKey::new(1, "a"));
        drop(handle);

        registry.run(rx).await;

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.version(&AlertRuleKey::new(1, "b")), Some(7));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ScheduleEvent::Delete {
            key: AlertRuleKey::new(1, "a"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "delete");
        assert_eq!(json["key"]["uid"], "a");
    }
}
