//! kubectl passthrough: any invocation whose first non-flag token is not a
//! registered built-in is forwarded to the upstream CLI with the original
//! arguments, minus the flags that belong to kcli alone.

use kcli_core::{Error, Result};
use std::process::Stdio;

/// Flags kcli consumes and never forwards. `--force` is deliberately NOT
/// here: it is forwarded upstream and doubles as a confirmation bypass.
const CLI_ONLY_FLAGS: &[(&str, bool)] = &[
    ("--yes", false),
    ("--ai-timeout", true),
    ("--completion-timeout", true),
];

/// Global flags that take a value, so the pre-scan can skip over them when
/// hunting for the first command token.
const VALUE_FLAGS: &[&str] = &[
    "--context",
    "--namespace",
    "-n",
    "--kubeconfig",
    "--ai-timeout",
    "--completion-timeout",
];

/// Verbs that mutate cluster state and therefore prompt before forwarding.
const MUTATING_VERBS: &[&str] = &[
    "apply", "create", "delete", "edit", "patch", "replace", "scale", "rollout", "drain",
    "cordon", "uncordon", "taint", "label", "annotate", "cp", "set",
];

/// The first token that is neither a flag nor a flag value.
pub fn first_command_token(args: &[String]) -> Option<&str> {
    let mut skip_value = false;
    for arg in args {
        if skip_value {
            skip_value = false;
            continue;
        }
        if arg.starts_with('-') {
            // `--flag=value` carries its value inline; bare value flags
            // consume the next token.
            let name = arg.split('=').next().unwrap_or(arg);
            if !arg.contains('=') && VALUE_FLAGS.contains(&name) {
                skip_value = true;
            }
            continue;
        }
        return Some(arg.as_str());
    }
    None
}

/// Removes kcli-only flags (and their values) from an argv slice.
pub fn strip_cli_only_flags(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut skip_value = false;
    for arg in args {
        if skip_value {
            skip_value = false;
            continue;
        }
        let name = arg.split('=').next().unwrap_or(arg);
        if let Some((_, takes_value)) = CLI_ONLY_FLAGS.iter().find(|(f, _)| *f == name) {
            if *takes_value && !arg.contains('=') {
                skip_value = true;
            }
            continue;
        }
        out.push(arg.clone());
    }
    out
}

pub fn is_mutating(verb: &str) -> bool {
    MUTATING_VERBS.contains(&verb)
}

/// True when the argv carries a confirmation bypass: `--yes` (kcli-only) or
/// `--force` (forwarded).
pub fn has_bypass(args: &[String]) -> bool {
    args.iter()
        .any(|a| a == "--yes" || a == "--force" || a.starts_with("--force="))
}

pub struct PassthroughPlan {
    pub program: String,
    pub args: Vec<String>,
    pub needs_confirmation: bool,
    pub verb: String,
}

/// Builds the forwarding plan for a non-built-in invocation.
pub fn plan(args: &[String], confirm_mutations: bool) -> Result<PassthroughPlan> {
    let verb = first_command_token(args)
        .ok_or_else(|| Error::InvalidArgument("nothing to forward".into()))?
        .to_string();
    let forwarded = strip_cli_only_flags(args);
    let needs_confirmation = confirm_mutations && is_mutating(&verb) && !has_bypass(args);
    let program = std::env::var("KCLI_KUBECTL").unwrap_or_else(|_| "kubectl".to_string());
    Ok(PassthroughPlan {
        program,
        args: forwarded,
        needs_confirmation,
        verb,
    })
}

/// Runs the upstream CLI with inherited stdio and maps its exit status to
/// kcli's exit-code contract (upstream failure => 2).
pub async fn run(plan: &PassthroughPlan) -> Result<i32> {
    let status = tokio::process::Command::new(&plan.program)
        .args(&plan.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| Error::Internal(format!("launching {}: {e}", plan.program)))?;
    Ok(if status.success() { 0 } else { 2 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn yes_is_stripped_context_is_forwarded() {
        let args = argv(&["--yes", "--context", "prod", "cp", "src", "dst"]);
        let plan = plan(&args, true).unwrap();
        assert_eq!(plan.args, argv(&["--context", "prod", "cp", "src", "dst"]));
        assert!(!plan.needs_confirmation, "--yes bypasses the prompt");
        assert_eq!(plan.verb, "cp");
    }

    #[test]
    fn force_is_forwarded_and_bypasses() {
        let args = argv(&["--force", "cp", "src", "dst"]);
        let plan = plan(&args, true).unwrap();
        assert_eq!(plan.args, argv(&["--force", "cp", "src", "dst"]));
        assert!(!plan.needs_confirmation);
    }

    #[test]
    fn mutating_verb_without_bypass_prompts() {
        let args = argv(&["delete", "pod", "api-1"]);
        let plan = plan(&args, true).unwrap();
        assert!(plan.needs_confirmation);
        // And an organisation that disabled prompts skips them.
        let plan = super::plan(&args, false).unwrap();
        assert!(!plan.needs_confirmation);
    }

    #[test]
    fn read_only_verbs_do_not_prompt() {
        let args = argv(&["top", "pods"]);
        let plan = plan(&args, true).unwrap();
        assert!(!plan.needs_confirmation);
        assert_eq!(plan.args, argv(&["top", "pods"]));
    }

    #[test]
    fn ai_timeout_value_is_stripped_with_flag() {
        let args = argv(&["--ai-timeout", "30", "top", "nodes"]);
        assert_eq!(strip_cli_only_flags(&args), argv(&["top", "nodes"]));
        let args = argv(&["--ai-timeout=30", "top", "nodes"]);
        assert_eq!(strip_cli_only_flags(&args), argv(&["top", "nodes"]));
    }

    #[test]
    fn first_token_skips_global_flags() {
        let args = argv(&["--context", "prod", "-n", "payments", "get", "pods"]);
        assert_eq!(first_command_token(&args), Some("get"));
        let args = argv(&["--kubeconfig=/tmp/kc", "describe", "pod"]);
        assert_eq!(first_command_token(&args), Some("describe"));
        assert_eq!(first_command_token(&[]), None);
    }
}
