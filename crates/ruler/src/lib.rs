//! Alert rule group reconciliation.
//!
//! `ruler` replaces alert rule groups as a whole. A submitted group is compared
//! with the persisted rules, the resulting changes are authorized and checked
//! against provisioning, and everything is written in one transaction before the
//! scheduler hears about it.
//!
//! # Features
//!
//! - **Change calculation**: New, updated and deleted rules, including rules moved
//!   in from other groups ([`calculate_changes`])
//! - **Automatic changes**: Version-only updates and re-indexing of every group a
//!   change touches ([`calculate_automatic_changes`])
//! - **Authorization**: Folder and data-source checks for every change
//! - **Provenance protection**: Provisioned rules cannot be changed here
//! - **Quota**: Per-organization and global rule limits
//! - **Scheduler notification**: Updates and deletes are reported after commit
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ruler::{
//!     AlertQuery, InMemoryStore, Namespace, PostableRule, PostableRuleGroupConfig,
//!     RequestContext, RulerServiceBuilder, SchedulerHandle,
//! };
//! use ruler_access::{OrgRole, Permission, Principal};
//!
//! let store = Arc::new(InMemoryStore::new());
//! store.add_folder(Namespace {
//!     id: 1,
//!     uid: "infra".to_string(),
//!     title: "Infrastructure".to_string(),
//!     org_id: 1,
//! });
//!
//! let (scheduler, _events) = SchedulerHandle::channel();
//! let service =
//!     RulerServiceBuilder::new(store.clone(), store.clone(), store.clone(), Arc::new(scheduler))
//!         .build();
//!
//! let ctx = RequestContext::new(Principal::new(1, 1, OrgRole::Editor).with_permissions([
//!     Permission::wildcard("datasources:query"),
//!     Permission::wildcard("alert.rules:create"),
//! ]));
//!
//! let group = PostableRuleGroupConfig {
//!     name: "cpu".to_string(),
//!     interval_seconds: Some(60),
//!     rules: vec![PostableRule {
//!         title: "High CPU".to_string(),
//!         condition: "A".to_string(),
//!         data: vec![AlertQuery::new("A", "prometheus")],
//!         ..PostableRule::default()
//!     }],
//! };
//!
//! let response = service.post_rule_group_config(&ctx, "Infrastructure", &group).unwrap();
//! assert_eq!(response.created, 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod authorization;
pub mod changes;
pub mod cli;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod memory;
pub mod models;
pub mod provenance;
pub mod quota;
pub mod schedule;
pub mod service;
pub mod store;
pub mod validation;

pub use api::{
    DeleteRulesResponse, GettableRule, GettableRuleGroupConfig, NamespaceConfigResponse,
    PostableRule, PostableRuleGroupConfig, RuleGroupConfigResponse, RulesFilter, SkipReason,
    SkippedRule, UpdateRuleGroupResponse,
};
pub use changes::{calculate_automatic_changes, calculate_changes, GroupDelta, RuleUpdate};
pub use config::RulerConfig;
pub use context::RequestContext;
pub use diff::{Diff, DiffReport};
pub use error::{ErrorKind, Result, RulerError};
pub use memory::{InMemoryStore, ProvenanceRecord, StoreSnapshot};
pub use models::{
    AlertQuery, AlertRule, AlertRuleGroupKey, AlertRuleKey, ExecErrState, Namespace, NoDataState,
    Provenance,
};
pub use quota::{QuotaScope, QuotaService, RuleCountQuota, RuleQuota};
pub use schedule::{RuleRegistry, ScheduleEvent, ScheduleService, SchedulerHandle};
pub use service::{RulerService, RulerServiceBuilder};
pub use store::{ListAlertRulesQuery, ProvenanceStore, RuleStore, TransactionManager};

pub use ruler_access::RbacAccessControl;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
