//! kcli-term: the command tree, kubectl passthrough, TUI, plugin host and
//! the programmatic execution API.

pub mod api;
pub mod cli;
pub mod commands;
pub mod passthrough;
pub mod plugins;
pub mod runtime;
pub mod tui;

pub use api::{execute, execute_stream, ExecOutcome, StreamChunk};

use clap::Parser;
use cli::{AiCommand, Cli, Command, ConfigCommand, PluginCommand};
use kcli_ai::AiAction;
use kcli_core::{Error, Result};
use runtime::{GlobalFlags, Output, Runtime};

/// Dispatches an argv (without the binary name) and returns the process exit
/// code, writing all output to `output`.
pub async fn dispatch_captured(argv: Vec<String>, output: Output) -> i32 {
    match dispatch(argv, output.clone()).await {
        Ok(code) => code,
        Err(e) => {
            output.err(format!("kcli: {e}"));
            e.exit_code()
        }
    }
}

async fn dispatch(argv: Vec<String>, output: Output) -> Result<i32> {
    // Passthrough pre-scan: an unregistered first token goes to the upstream
    // CLI with the original argv minus kcli-only flags.
    if let Some(token) = passthrough::first_command_token(&argv) {
        if !cli::is_builtin(token) {
            return forward(&argv, &output).await;
        }
    }

    let full_argv = std::iter::once("kcli".to_string()).chain(argv.clone());
    let parsed = match Cli::try_parse_from(full_argv) {
        Ok(parsed) => parsed,
        Err(e) => {
            use clap::error::ErrorKind;
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    output.out(e.to_string());
                    Ok(0)
                }
                _ => {
                    output.err(e.to_string());
                    Ok(1)
                }
            };
        }
    };

    // Version and completion need no configuration or cluster.
    match &parsed.command {
        Command::Version => {
            output.out(format!("kcli {}", env!("CARGO_PKG_VERSION")));
            return Ok(0);
        }
        Command::Completion { shell } => {
            return completion(shell, &output);
        }
        _ => {}
    }

    let globals = GlobalFlags {
        context: parsed.context.clone(),
        namespace: parsed.namespace.clone(),
        kubeconfig: parsed.kubeconfig.clone(),
        ai_timeout: parsed.ai_timeout,
        completion_timeout: parsed.completion_timeout,
        yes: parsed.yes,
        force: parsed.force,
    };
    let rt = Runtime::load(globals, output)?;

    match parsed.command {
        Command::Get {
            kind,
            name,
            output: format,
            selector,
        } => {
            commands::resources::get(
                &rt,
                &kind,
                name.as_deref(),
                format.as_deref(),
                selector.as_deref(),
            )
            .await?;
            Ok(0)
        }
        Command::Describe { kind, name } => {
            commands::resources::describe(&rt, &kind, &name).await?;
            Ok(0)
        }
        Command::Yaml { kind, name } => {
            commands::resources::yaml(&rt, &kind, &name).await?;
            Ok(0)
        }
        Command::Ctx {
            name,
            save_group,
            delete_group,
            members,
        } => {
            commands::context::ctx(&rt, name, save_group, delete_group, members).await?;
            Ok(0)
        }
        Command::Ns { name } => {
            commands::context::ns(&rt, name).await?;
            Ok(0)
        }
        Command::Search { query, kind } => {
            commands::search::search(&rt, &query, kind).await?;
            Ok(0)
        }
        Command::Restarts { recent, threshold } => {
            commands::incident::restarts(&rt, &recent, threshold).await?;
            Ok(0)
        }
        Command::Events { recent, output } => {
            commands::incident::events(&rt, &recent, output.as_deref()).await?;
            Ok(0)
        }
        Command::Incident {
            recent,
            restarts_threshold,
            output,
        } => {
            commands::incident::incident(&rt, &recent, restarts_threshold, output.as_deref())
                .await?;
            Ok(0)
        }
        Command::Exec {
            pod,
            container,
            command,
        } => commands::resources::exec(&rt, &pod, container, command).await,
        Command::Logs {
            pod,
            container,
            follow,
            tail,
        } => {
            commands::resources::logs(&rt, &pod, container, follow, tail).await?;
            Ok(0)
        }
        Command::Ai { action } => {
            match action {
                AiCommand::Explain { target } => {
                    commands::ai::analyze(&rt, AiAction::Explain, &target).await?
                }
                AiCommand::Why { target } => {
                    commands::ai::analyze(&rt, AiAction::Why, &target).await?
                }
                AiCommand::Summarize { target } => {
                    commands::ai::analyze(&rt, AiAction::SummarizeEvents, &target).await?
                }
                AiCommand::SuggestFix { target } => {
                    commands::ai::analyze(&rt, AiAction::SuggestFix, &target).await?
                }
                AiCommand::Config => commands::ai::show_config(&rt)?,
                AiCommand::Status => commands::ai::show_status(&rt)?,
                AiCommand::Usage => commands::ai::show_usage(&rt)?,
                AiCommand::Cost => commands::ai::show_cost(&rt)?,
            }
            Ok(0)
        }
        Command::Plugin { action } => plugin_command(&rt, action).await,
        Command::Ui => {
            tui::run(&rt).await?;
            Ok(0)
        }
        Command::Config { action } => {
            match action {
                ConfigCommand::View => commands::config::view(&rt)?,
                ConfigCommand::Get { key } => commands::config::get(&rt, &key)?,
                ConfigCommand::Set { key, value } => commands::config::set(&rt, &key, &value)?,
            }
            Ok(0)
        }
        Command::Completion { .. } | Command::Version => unreachable!("handled above"),
    }
}

async fn forward(argv: &[String], output: &Output) -> Result<i32> {
    // The profile's confirm_mutations switch still applies; a broken config
    // falls back to prompting.
    let confirm = Runtime::load(GlobalFlags::default(), output.clone())
        .map(|rt| rt.profile.general.confirm_mutations)
        .unwrap_or(true);
    let plan = passthrough::plan(argv, confirm)?;
    if plan.needs_confirmation {
        output.err(format!(
            "about to run a mutating command ('{}'); continue? [y/N]",
            plan.verb
        ));
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| Error::Internal(format!("reading confirmation: {e}")))?;
        if !matches!(line.trim().to_lowercase().as_str(), "y" | "yes") {
            return Err(Error::Cancelled("aborted by user".into()));
        }
    }
    passthrough::run(&plan).await
}

fn completion(shell: &str, output: &Output) -> Result<i32> {
    use clap::CommandFactory;
    let shell: clap_complete::Shell = shell
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("unknown shell '{shell}'")))?;
    let mut command = Cli::command();
    let mut buffer: Vec<u8> = Vec::new();
    clap_complete::generate(shell, &mut command, "kcli", &mut buffer);
    output.out(String::from_utf8_lossy(&buffer).trim_end());
    Ok(0)
}

async fn plugin_command(rt: &Runtime, action: PluginCommand) -> Result<i32> {
    let host = plugins::PluginHost::default_location()?;
    match action {
        PluginCommand::List => {
            let discovered = host.discover(rt)?;
            if discovered.is_empty() {
                rt.output.out("no plugins installed");
                return Ok(0);
            }
            let rows: Vec<Vec<String>> = discovered
                .iter()
                .map(|p| {
                    vec![
                        p.manifest.name.clone(),
                        p.manifest.version.clone(),
                        if p.allowed { "allowed" } else { "blocked" }.to_string(),
                        p.manifest.description.clone(),
                    ]
                })
                .collect();
            rt.output.out(
                commands::render_table(&["NAME", "VERSION", "STATE", "DESCRIPTION"], &rows)
                    .trim_end(),
            );
            Ok(0)
        }
        PluginCommand::Install { path } => {
            let manifest = host.install(&path)?;
            rt.output.out(format!(
                "installed '{}' {} (run `kcli plugin allow {}` to enable)",
                manifest.name, manifest.version, manifest.name
            ));
            Ok(0)
        }
        PluginCommand::Remove { name } => {
            host.remove(rt, &name)?;
            rt.output.out(format!("removed '{name}'"));
            Ok(0)
        }
        PluginCommand::Update { name, path } => {
            host.remove(rt, &name)?;
            let manifest = host.install(&path)?;
            rt.output
                .out(format!("updated '{}' to {}", manifest.name, manifest.version));
            Ok(0)
        }
        PluginCommand::Allow { name } => {
            host.find(rt, &name)?;
            rt.state_store.update(|s| s.allow_plugin(&name))?;
            rt.output.out(format!("allowed '{name}'"));
            Ok(0)
        }
        PluginCommand::Revoke { name } => {
            rt.state_store.update(|s| s.revoke_plugin(&name))?;
            rt.output.out(format!("revoked '{name}'"));
            Ok(0)
        }
        PluginCommand::Run { name, args } => host.run(rt, &name, &args).await,
    }
}
