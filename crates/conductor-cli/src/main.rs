//! Conductor - phase-based agent orchestration from the terminal.
//!
//! Thin front end over `conductor-core`: builds the services, starts
//! the orchestrator, renders `LoopEvent`s as plain text and answers
//! approval prompts from stdin. Ctrl-C cancels the orchestration.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use conductor_core::agent::{AgentRegistry, LoopEvent, LoopInput};
use conductor_core::providers::{ConfigSource, ProviderConfig, ProviderManager, UserProviderStore};
use conductor_core::tools::{register_builtin_tools, ToolRegistry};
use conductor_core::{
    ApprovalLevel, Config, Orchestrator, OrchestratorConfig, OrchestratorServices,
};

mod client;

/// Conductor - AI task orchestration
#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Phase-based agent orchestration for local workspaces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task through the orchestration pipeline
    Run {
        /// The task to perform
        task: Vec<String>,

        /// Workspace directory (defaults to the current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Approval level override: off, low, medium or high
        #[arg(short, long)]
        approval: Option<String>,
    },

    /// Manage external tool providers
    Providers {
        #[command(subcommand)]
        command: ProviderCommands,
    },
}

#[derive(Subcommand)]
enum ProviderCommands {
    /// List configured providers
    List,

    /// Add a user provider with a stdio transport
    Add {
        name: String,
        command: String,
        args: Vec<String>,
    },

    /// Remove a user provider
    Remove { name: String },
}

fn parse_approval(value: &str) -> Result<ApprovalLevel> {
    match value {
        "off" => Ok(ApprovalLevel::Off),
        "low" => Ok(ApprovalLevel::Low),
        "medium" => Ok(ApprovalLevel::Medium),
        "high" => Ok(ApprovalLevel::High),
        other => Err(anyhow!(
            "Invalid approval level '{}' (expected off, low, medium or high)",
            other
        )),
    }
}

fn load_config(dir: Option<PathBuf>, approval: Option<String>) -> Result<Config> {
    let working_dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = Config::load(working_dir)?;

    match approval {
        Some(level) => Ok(config.with_approval_level(parse_approval(&level)?)),
        None => Ok(config),
    }
}

fn provider_manager(config: &Config) -> ProviderManager {
    ProviderManager::new(
        config.system_providers.clone(),
        UserProviderStore::new(config.user_provider_path.clone()),
        config.working_dir.clone(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            task,
            dir,
            approval,
        } => {
            let task = task.join(" ");
            if task.trim().is_empty() {
                return Err(anyhow!("No task given"));
            }
            let config = load_config(dir, approval)?;
            run_task(task, config).await
        }
        Commands::Providers { command } => {
            let config = load_config(None, None)?;
            let manager = provider_manager(&config);
            manager.load_user_config().await?;

            match command {
                ProviderCommands::List => {
                    for status in manager.server_statuses().await {
                        let source = match status.source {
                            ConfigSource::System => "system",
                            ConfigSource::User => "user",
                        };
                        println!("{} ({}, {})", status.name, status.transport_kind, source);
                    }
                }
                ProviderCommands::Add {
                    name,
                    command,
                    args,
                } => {
                    let entry = ProviderConfig::stdio(&name, command, args, ConfigSource::User);
                    manager.add_server(entry).await?;
                    println!("Added provider '{}'", name);
                }
                ProviderCommands::Remove { name } => {
                    manager.remove_server(&name).await?;
                    println!("Removed provider '{}'", name);
                }
            }
            Ok(())
        }
    }
}

async fn run_task(task: String, config: Config) -> Result<()> {
    let tool_registry = ToolRegistry::new();
    register_builtin_tools(&tool_registry).await;

    let providers = Arc::new(provider_manager(&config));
    if let Err(e) = providers.load_user_config().await {
        tracing::warn!(error = %e, "failed to load user provider config");
    }
    providers.connect_all().await;

    let services = OrchestratorServices {
        model_client: Arc::new(client::AnthropicClient::from_env()?),
        tool_registry: Arc::new(tool_registry),
        agent_registry: Arc::new(AgentRegistry::builtin()),
        providers: Arc::clone(&providers),
    };

    let orchestrator = Orchestrator::new(services, OrchestratorConfig::from_config(&config));
    let (mut event_rx, input_tx) = orchestrator.run(task);

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let event = tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCancelling...");
                let _ = input_tx.send(LoopInput::Cancel);
                continue;
            }
        };

        match event {
            LoopEvent::Finished { output } => {
                println!("\n{}", output);
                break;
            }
            LoopEvent::ToolApprovalRequired { id, name, input, reason, .. } => {
                print_approval_prompt(&name, &input, reason.as_deref());
                let approved = read_approval(&mut stdin_lines).await;
                let _ = input_tx.send(LoopInput::ToolApproval {
                    tool_call_id: id,
                    approved,
                });
            }
            other => print_event(&other),
        }
    }

    providers.disconnect_all().await;
    Ok(())
}

fn print_event(event: &LoopEvent) {
    match event {
        LoopEvent::PhaseStarted { phase } => println!("\n== phase: {} ==", phase),
        LoopEvent::RunStarted {
            agent_id,
            parent_run_id,
            ..
        } => {
            if parent_run_id.is_some() {
                println!("[{}] child run started", agent_id);
            }
        }
        LoopEvent::RunCompleted {
            agent_id, status, ..
        } => {
            if status != "complete" {
                println!("[{}] run {}", agent_id, status);
            }
        }
        LoopEvent::TextDelta { delta, .. } => {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }
        LoopEvent::ToolExecuting { name, .. } => println!("\n-> {}", name),
        LoopEvent::ToolResult {
            output, is_error, ..
        } => {
            if *is_error {
                println!("   error: {}", first_line(output));
            }
        }
        LoopEvent::ToolDenied { .. } => println!("   denied"),
        LoopEvent::Error { error } => eprintln!("error: {}", error),
        _ => {}
    }
}

fn print_approval_prompt(name: &str, input: &serde_json::Value, reason: Option<&str>) {
    println!("\nApproval required: {}", name);
    if let Some(reason) = reason {
        println!("  reason: {}", reason);
    }
    println!(
        "  input: {}",
        serde_json::to_string(input).unwrap_or_default()
    );
    print!("Allow? [y/N] ");
    let _ = std::io::stdout().flush();
}

async fn read_approval(lines: &mut Lines<BufReader<Stdin>>) -> bool {
    match lines.next_line().await {
        Ok(Some(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
        _ => false,
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_approval_levels() {
        assert_eq!(parse_approval("off").unwrap(), ApprovalLevel::Off);
        assert_eq!(parse_approval("high").unwrap(), ApprovalLevel::High);
        assert!(parse_approval("max").is_err());
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("a\nb\nc"), "a");
        assert_eq!(first_line(""), "");
    }
}
