//! Field-level comparison of alert rules.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::models::{AlertQuery, AlertRule};

/// Fields that change only as a side effect of persisting a rule.
pub const ALERT_RULE_FIELDS_TO_IGNORE_IN_DIFF: &[&str] = &["id", "version", "updated"];

/// One differing value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diff {
    /// Dotted path of the field, e.g. `labels.team` or `data[0].model.expr`.
    pub path: String,
    /// Value on the left (stored) side.
    pub left: Value,
    /// Value on the right (submitted) side.
    pub right: Value,
}

/// All differences between two rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DiffReport(Vec<Diff>);

impl DiffReport {
    /// Returns true if the rules are equal on every compared field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of differing values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the differences.
    pub fn iter(&self) -> impl Iterator<Item = &Diff> {
        self.0.iter()
    }

    /// Returns the paths of all differences.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.0.iter().map(|d| d.path.as_str()).collect()
    }

    fn push(&mut self, path: String, left: Value, right: Value) {
        self.0.push(Diff { path, left, right });
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {} => {}", d.path, d.left, d.right)?;
        }
        Ok(())
    }
}

struct Differ<'a> {
    ignore: &'a [&'a str],
    report: DiffReport,
}

impl Differ<'_> {
    fn ignored(&self, name: &str) -> bool {
        self.ignore.contains(&name)
    }

    fn field<T>(&mut self, name: &str, left: T, right: T)
    where
        T: PartialEq + Into<Value>,
    {
        if self.ignored(name) || left == right {
            return;
        }
        self.report.push(name.to_string(), left.into(), right.into());
    }

    fn map(
        &mut self,
        name: &str,
        left: &std::collections::BTreeMap<String, String>,
        right: &std::collections::BTreeMap<String, String>,
    ) {
        if self.ignored(name) || left == right {
            return;
        }
        let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
        for key in keys {
            let (l, r) = (left.get(key), right.get(key));
            if l != r {
                self.report.push(
                    format!("{name}.{key}"),
                    l.cloned().map_or(Value::Null, Value::String),
                    r.cloned().map_or(Value::Null, Value::String),
                );
            }
        }
    }

    fn queries(&mut self, left: &[AlertQuery], right: &[AlertQuery]) {
        if self.ignored("data") || left == right {
            return;
        }
        for i in 0..left.len().max(right.len()) {
            let path = format!("data[{i}]");
            match (left.get(i), right.get(i)) {
                (Some(l), Some(r)) => diff_json(&path, &l.to_json(), &r.to_json(), &mut self.report),
                (Some(l), None) => self.report.push(path, l.to_json(), Value::Null),
                (None, Some(r)) => self.report.push(path, Value::Null, r.to_json()),
                (None, None) => {}
            }
        }
    }
}

fn diff_json(path: &str, left: &Value, right: &Value, report: &mut DiffReport) {
    if left == right {
        return;
    }
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            for key in keys {
                let sub = format!("{path}.{key}");
                diff_json(
                    &sub,
                    l.get(key).unwrap_or(&Value::Null),
                    r.get(key).unwrap_or(&Value::Null),
                    report,
                );
            }
        }
        (Value::Array(l), Value::Array(r)) if l.len() == r.len() => {
            for (i, (lv, rv)) in l.iter().zip(r).enumerate() {
                diff_json(&format!("{path}[{i}]"), lv, rv, report);
            }
        }
        _ => report.push(path.to_string(), left.clone(), right.clone()),
    }
}

impl AlertRule {
    /// Compares two rules field by field, skipping the named fields.
    #[must_use]
    pub fn diff(&self, other: &AlertRule, ignore: &[&str]) -> DiffReport {
        let mut d = Differ {
            ignore,
            report: DiffReport::default(),
        };
        d.field("id", self.id, other.id);
        d.field("org_id", self.org_id, other.org_id);
        d.field("title", self.title.as_str(), other.title.as_str());
        d.field("condition", self.condition.as_str(), other.condition.as_str());
        d.queries(&self.data, &other.data);
        d.field("updated", self.updated.to_rfc3339(), other.updated.to_rfc3339());
        d.field("interval_seconds", self.interval_seconds, other.interval_seconds);
        d.field("version", self.version, other.version);
        d.field("uid", self.uid.as_str(), other.uid.as_str());
        d.field("namespace_uid", self.namespace_uid.as_str(), other.namespace_uid.as_str());
        d.field("dashboard_uid", self.dashboard_uid.clone(), other.dashboard_uid.clone());
        d.field("panel_id", self.panel_id, other.panel_id);
        d.field("rule_group", self.rule_group.as_str(), other.rule_group.as_str());
        d.field("rule_group_index", self.rule_group_index, other.rule_group_index);
        d.field("no_data_state", self.no_data_state.as_str(), other.no_data_state.as_str());
        d.field("exec_err_state", self.exec_err_state.as_str(), other.exec_err_state.as_str());
        d.field("for_seconds", self.for_seconds, other.for_seconds);
        d.map("annotations", &self.annotations, &other.annotations);
        d.map("labels", &self.labels, &other.labels);
        d.report
    }
}
