//! Command-line argument parsing with clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ruler_access::{OrgRole, Permission, Principal};

use crate::api::RulesFilter;

/// Alert rule ruler - reconcile rule groups against a JSON state file.
#[derive(Parser, Debug, Clone)]
#[command(name = "ruler")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Rule store state file. Created on the first successful change.
    #[arg(short, long, env = "RULER_STATE", default_value = "ruler-state.json")]
    pub state: PathBuf,

    /// Optional JSON configuration file.
    #[arg(short, long, env = "RULER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Organization the request runs in.
    #[arg(long, default_value_t = 1)]
    pub org_id: i64,

    /// Numeric ID of the requesting user.
    #[arg(long, default_value_t = 1)]
    pub user_id: i64,

    /// Basic role of the requesting user (none, viewer, editor, admin).
    #[arg(long, default_value = "editor")]
    pub role: String,

    /// Fine-grained permission granted to the user, as `action=scope`. Repeatable.
    #[arg(short, long = "permission", value_name = "ACTION=SCOPE")]
    pub permissions: Vec<String>,

    /// Authorize by basic role only.
    #[arg(long)]
    pub rbac_disabled: bool,

    /// Abort the request after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Builds the requesting principal from the identity arguments.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown role or a malformed permission.
    pub fn principal(&self) -> ruler_access::Result<Principal> {
        let role: OrgRole = self.role.parse()?;
        let permissions = self
            .permissions
            .iter()
            .map(|p| Permission::parse(p))
            .collect::<ruler_access::Result<Vec<_>>>()?;
        Ok(Principal::new(self.user_id, self.org_id, role).with_permissions(permissions))
    }

    /// Returns the request timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Replace a rule group with the one in a JSON file.
    Apply {
        /// Folder title.
        #[arg(short, long)]
        namespace: String,

        /// Rule group JSON file.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete the rules of a folder, or of one group in it.
    Delete {
        /// Folder title.
        #[arg(short, long)]
        namespace: String,

        /// Group name. All groups of the folder if omitted.
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Show rule groups.
    ///
    /// Without a folder every visible group is listed, optionally filtered by
    /// dashboard and panel.
    Get {
        /// Folder title.
        #[arg(short, long)]
        namespace: Option<String>,

        /// Group name. Requires `--namespace`.
        #[arg(short, long, requires = "namespace")]
        group: Option<String>,

        /// Only rules linked to this dashboard.
        #[arg(long)]
        dashboard_uid: Option<String>,

        /// Only rules linked to this panel.
        #[arg(long)]
        panel_id: Option<i64>,
    },
}

impl Commands {
    /// Returns true if the command may change the store.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Apply { .. } | Self::Delete { .. })
    }

    /// Returns the listing filter of a `get` command.
    #[must_use]
    pub fn rules_filter(&self) -> RulesFilter {
        match self {
            Self::Get {
                dashboard_uid,
                panel_id,
                ..
            } => RulesFilter {
                dashboard_uid: dashboard_uid.clone(),
                panel_id: *panel_id,
            },
            _ => RulesFilter::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_apply_with_permissions() {
        let cli = Cli::try_parse_from([
            "ruler",
            "--state",
            "/tmp/state.json",
            "--role",
            "viewer",
            "-p",
            "datasources:query=datasources:*",
            "-p",
            "alert.rules:write=folders:uid:f",
            "apply",
            "--namespace",
            "Folder",
            "--file",
            "group.json",
        ])
        .unwrap();

        assert!(cli.command.is_mutation());
        let principal = cli.principal().unwrap();
        assert_eq!(principal.org_role, OrgRole::Viewer);
        assert!(principal.has_permission("datasources:query", "datasources:uid:prom"));
        assert!(principal.has_permission("alert.rules:write", "folders:uid:f"));
    }

    #[test]
    fn bad_role_is_rejected() {
        let cli = Cli::try_parse_from(["ruler", "--role", "owner", "get"]).unwrap();
        assert!(cli.principal().is_err());
    }

    #[test]
    fn malformed_permission_is_rejected() {
        let cli = Cli::try_parse_from(["ruler", "-p", "datasources:query", "get"]).unwrap();
        assert!(cli.principal().is_err());
    }

    #[test]
    fn group_requires_namespace() {
        assert!(Cli::try_parse_from(["ruler", "get", "--group", "g"]).is_err());
    }

    #[test]
    fn get_builds_filter() {
        let cli = Cli::try_parse_from([
            "ruler",
            "get",
            "--dashboard-uid",
            "dash",
            "--panel-id",
            "3",
        ])
        .unwrap();
        assert!(!cli.command.is_mutation());
        assert_eq!(
            cli.command.rules_filter(),
            RulesFilter {
                dashboard_uid: Some("dash".to_string()),
                panel_id: Some(3),
            }
        );
        assert_eq!(cli.timeout(), None);
    }
}
