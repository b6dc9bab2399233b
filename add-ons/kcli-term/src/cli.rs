//! Command tree. Anything that fails to match a built-in here is forwarded
//! to the upstream Kubernetes CLI by the dispatcher (see `passthrough`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "kcli",
    version,
    about = "Unified terminal CLI for Kubernetes operations"
)]
pub struct Cli {
    /// Kubeconfig context to target.
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Namespace to target.
    #[arg(long, short = 'n', global = true)]
    pub namespace: Option<String>,

    /// Explicit kubeconfig path.
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Seconds to wait for AI responses.
    #[arg(long, global = true)]
    pub ai_timeout: Option<u64>,

    /// Seconds to wait for completion candidates.
    #[arg(long, global = true)]
    pub completion_timeout: Option<u64>,

    /// Skip confirmation prompts. Never forwarded upstream.
    #[arg(long, global = true)]
    pub yes: bool,

    /// Forwarded upstream; also skips kcli's own confirmation prompts.
    #[arg(long, global = true)]
    pub force: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List resources of a kind, or show one by name.
    Get {
        kind: String,
        name: Option<String>,
        /// Output format: table (default), json, yaml, wide.
        #[arg(long, short = 'o')]
        output: Option<String>,
        /// Label selector, e.g. app=api.
        #[arg(long, short = 'l')]
        selector: Option<String>,
    },
    /// Human-oriented detail for one resource.
    Describe { kind: String, name: String },
    /// Raw YAML for one resource.
    Yaml { kind: String, name: String },
    /// Show or switch contexts; manage context groups.
    Ctx {
        /// Context or group name; empty lists everything.
        name: Option<String>,
        /// With a name and members, saves the members as group `name`.
        #[arg(long)]
        save_group: bool,
        /// Deletes group `name`.
        #[arg(long)]
        delete_group: bool,
        /// Group members for --save-group.
        members: Vec<String>,
    },
    /// Show or switch the default namespace.
    Ns { name: Option<String> },
    /// Substring search for resources across every known context.
    Search {
        query: String,
        /// Restrict the search to one kind.
        #[arg(long)]
        kind: Option<String>,
    },
    /// Pods with restart counts over a threshold.
    Restarts {
        #[arg(long, default_value = "1h")]
        recent: String,
        #[arg(long, default_value_t = 1)]
        threshold: i32,
    },
    /// Recent cluster events.
    Events {
        #[arg(long, default_value = "1h")]
        recent: String,
        #[arg(long, short = 'o')]
        output: Option<String>,
    },
    /// Correlate restarts and warning events inside a time window.
    Incident {
        #[arg(long, default_value = "1h")]
        recent: String,
        #[arg(long, default_value_t = 5)]
        restarts_threshold: i32,
        #[arg(long, short = 'o')]
        output: Option<String>,
    },
    /// Interactive shell inside a pod container.
    Exec {
        pod: String,
        #[arg(long, short = 'c')]
        container: Option<String>,
        /// Command to run; defaults to a shell.
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Pod logs.
    Logs {
        pod: String,
        #[arg(long, short = 'c')]
        container: Option<String>,
        #[arg(long, short = 'f')]
        follow: bool,
        #[arg(long)]
        tail: Option<i64>,
    },
    /// AI-assisted analysis and its housekeeping.
    Ai {
        #[command(subcommand)]
        action: AiCommand,
    },
    /// Plugin management.
    Plugin {
        #[command(subcommand)]
        action: PluginCommand,
    },
    /// Interactive terminal UI.
    Ui,
    /// Configuration access.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Shell completion script.
    Completion { shell: String },
    /// Version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum AiCommand {
    /// Explain what a resource is and does.
    Explain { target: Vec<String> },
    /// Diagnose why a resource is in its current state.
    Why { target: Vec<String> },
    /// Summarize recent events.
    Summarize { target: Vec<String> },
    /// Suggest a minimal fix.
    SuggestFix { target: Vec<String> },
    /// Show the effective AI configuration (secrets redacted).
    Config,
    /// Provider/enablement status.
    Status,
    /// Month-to-date usage counters.
    Usage,
    /// Month-to-date estimated spend against the budget.
    Cost,
}

#[derive(Debug, Subcommand)]
pub enum PluginCommand {
    /// Discovered plugins and their allow state.
    List,
    /// Copy an executable (with manifest) into the plugin directory.
    Install { path: PathBuf },
    /// Remove an installed plugin.
    Remove { name: String },
    /// Re-install a plugin from a newer source.
    Update { name: String, path: PathBuf },
    /// Mark a plugin as allowed to run.
    Allow { name: String },
    /// Revoke a previously allowed plugin.
    Revoke { name: String },
    /// Run an allowed plugin.
    Run {
        name: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Full active profile, secret-bound values redacted.
    View,
    /// One value by dotted path.
    Get { key: String },
    /// Set one value by dotted path.
    Set { key: String, value: String },
}

/// First tokens that resolve to built-ins; everything else is passthrough.
pub const BUILTIN_TOKENS: &[&str] = &[
    "get",
    "describe",
    "yaml",
    "ctx",
    "ns",
    "search",
    "restarts",
    "events",
    "incident",
    "exec",
    "logs",
    "ai",
    "plugin",
    "ui",
    "config",
    "completion",
    "version",
    "help",
];

pub fn is_builtin(token: &str) -> bool {
    BUILTIN_TOKENS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_representative_tree() {
        let cli = Cli::try_parse_from([
            "kcli", "--context", "prod", "-n", "payments", "get", "pods", "-l", "app=api",
        ])
        .unwrap();
        assert_eq!(cli.context.as_deref(), Some("prod"));
        assert!(matches!(cli.command, Command::Get { .. }));

        let cli = Cli::try_parse_from(["kcli", "ai", "why", "pod/api-1"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Ai {
                action: AiCommand::Why { .. }
            }
        ));

        let cli = Cli::try_parse_from(["kcli", "incident", "--recent", "30m"]).unwrap();
        match cli.command {
            Command::Incident {
                recent,
                restarts_threshold,
                ..
            } => {
                assert_eq!(recent, "30m");
                assert_eq!(restarts_threshold, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn builtin_table_matches_subcommands() {
        for token in ["get", "ctx", "incident", "plugin", "completion"] {
            assert!(is_builtin(token));
        }
        assert!(!is_builtin("cp"));
        assert!(!is_builtin("top"));
        assert!(!is_builtin("drain"));
    }
}
