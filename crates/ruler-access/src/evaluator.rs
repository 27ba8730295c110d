//! Permission evaluators.
//!
//! An [`Evaluator`] describes what a principal must hold for an operation to be
//! allowed. Evaluators compose with [`Evaluator::all`] and [`Evaluator::any`].

use std::fmt;

use crate::types::Permission;

/// A composable permission requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluator {
    /// The action is required on every listed scope.
    ///
    /// With no scopes, any permission for the action satisfies the requirement.
    Permission {
        /// Required action.
        action: String,
        /// Scopes that must all be granted.
        scopes: Vec<String>,
    },
    /// Every inner evaluator must pass. Empty passes.
    All(Vec<Evaluator>),
    /// At least one inner evaluator must pass. Empty fails.
    Any(Vec<Evaluator>),
}

impl Evaluator {
    /// Requires `action` on every one of `scopes`.
    #[must_use]
    pub fn permission<I, S>(action: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Permission {
            action: action.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Requires all inner evaluators.
    #[must_use]
    pub fn all(evaluators: impl IntoIterator<Item = Evaluator>) -> Self {
        Self::All(evaluators.into_iter().collect())
    }

    /// Requires any inner evaluator.
    #[must_use]
    pub fn any(evaluators: impl IntoIterator<Item = Evaluator>) -> Self {
        Self::Any(evaluators.into_iter().collect())
    }

    /// Evaluates the requirement against a set of granted permissions.
    #[must_use]
    pub fn evaluate(&self, granted: &[Permission]) -> bool {
        match self {
            Self::Permission { action, scopes } => {
                if scopes.is_empty() {
                    return granted.iter().any(|p| &p.action == action);
                }
                scopes
                    .iter()
                    .all(|scope| granted.iter().any(|p| p.matches(action, scope)))
            }
            Self::All(inner) => inner.iter().all(|e| e.evaluate(granted)),
            Self::Any(inner) => inner.iter().any(|e| e.evaluate(granted)),
        }
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permission { action, scopes } => {
                write!(f, "{action}[{}]", scopes.join(","))
            }
            Self::All(inner) | Self::Any(inner) => {
                let op = if matches!(self, Self::All(_)) { "all" } else { "any" };
                write!(f, "{op}(")?;
                for (i, e) in inner.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{datasource_scope, ACTION_DATASOURCES_QUERY, ACTION_ALERT_RULES_READ};
    use proptest::prelude::*;

    fn query(uid: &str) -> Permission {
        Permission {
            action: ACTION_DATASOURCES_QUERY.to_string(),
            scope: datasource_scope(uid),
        }
    }

    #[test]
    fn permission_requires_every_scope() {
        let granted = vec![query("a"), query("b")];
        let ev = Evaluator::permission(
            ACTION_DATASOURCES_QUERY,
            [datasource_scope("a"), datasource_scope("b")],
        );
        assert!(ev.evaluate(&granted));

        let ev = Evaluator::permission(
            ACTION_DATASOURCES_QUERY,
            [datasource_scope("a"), datasource_scope("c")],
        );
        assert!(!ev.evaluate(&granted));
    }

    #[test]
    fn permission_without_scopes_needs_action_only() {
        let ev = Evaluator::permission(ACTION_DATASOURCES_QUERY, Vec::<String>::new());
        assert!(ev.evaluate(&[query("x")]));
        assert!(!ev.evaluate(&[Permission::wildcard(ACTION_ALERT_RULES_READ)]));
    }

    #[test]
    fn empty_all_passes_and_empty_any_fails() {
        assert!(Evaluator::all(Vec::new()).evaluate(&[]));
        assert!(!Evaluator::any(Vec::new()).evaluate(&[]));
    }

    #[test]
    fn any_passes_with_one_match() {
        let ev = Evaluator::any([
            Evaluator::permission(ACTION_DATASOURCES_QUERY, [datasource_scope("a")]),
            Evaluator::permission(ACTION_DATASOURCES_QUERY, [datasource_scope("b")]),
        ]);
        assert!(ev.evaluate(&[query("b")]));
        assert!(!ev.evaluate(&[query("c")]));
    }

    #[test]
    fn display_is_readable() {
        let ev = Evaluator::all([Evaluator::permission(
            ACTION_DATASOURCES_QUERY,
            [datasource_scope("a")],
        )]);
        assert_eq!(ev.to_string(), "all(datasources:query[datasources:uid:a])");
    }

    proptest! {
        #[test]
        fn prop_wildcard_grants_every_datasource(uids in proptest::collection::vec("[a-z0-9]{1,12}", 0..8)) {
            let granted = vec![Permission {
                action: ACTION_DATASOURCES_QUERY.to_string(),
                scope: "datasources:*".to_string(),
            }];
            let ev = Evaluator::permission(
                ACTION_DATASOURCES_QUERY,
                uids.iter().map(|u| datasource_scope(u)),
            );
            prop_assert!(ev.evaluate(&granted));
        }
    }
}
