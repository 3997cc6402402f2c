//! Command-line interface for outreach.
//!
//! Provides commands for running the canonical outreach pipeline, running
//! workflow files, registering opt-outs and inspecting configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use crate::agents::{actions, ComplianceAgent};
use crate::config::Config;
use crate::core::{HistoryFilter, Workflow};
use crate::domain::{AgentInput, Contact};
use crate::runtime::Runtime;

/// outreach - agent coordination core for compliant outreach pipelines
#[derive(Parser, Debug)]
#[command(name = "outreach")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (overrides discovery of .outreach/config.yaml)
    #[arg(long, global = true, env = "OUTREACH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Research, write, compliance-check and send one email
    Run {
        /// Topic to research and write about
        #[arg(short, long)]
        topic: String,

        /// Recipient email address
        #[arg(short, long)]
        email: String,

        /// Recipient name
        #[arg(short, long)]
        name: Option<String>,

        /// Print the events published during the run
        #[arg(long)]
        events: bool,
    },

    /// Run a workflow defined in a YAML file
    Workflow {
        /// Path to the workflow file
        file: PathBuf,

        /// Print the events published during the run
        #[arg(long)]
        events: bool,
    },

    /// Register opt-outs, then show each contact's validation result
    OptOut {
        /// Email addresses to opt out
        #[arg(required = true)]
        emails: Vec<String>,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load_from(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                topic,
                email,
                name,
                events,
            } => {
                let mut contact = Contact::new(email);
                if let Some(name) = name {
                    contact = contact.with_name(name);
                }
                run_workflow(&config, Workflow::outreach(&topic, &contact), events).await
            }
            Commands::Workflow { file, events } => {
                let workflow = load_workflow(&file)?;
                run_workflow(&config, workflow, events).await
            }
            Commands::OptOut { emails } => opt_out(&config, &emails).await,
            Commands::Config => show_config(&config),
        }
    }
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    Workflow::from_file(path)
        .with_context(|| format!("Could not load workflow '{}'", path.display()))
}

/// Execute a workflow and print its step results
async fn run_workflow(config: &Config, workflow: Workflow, show_events: bool) -> Result<()> {
    let runtime = Runtime::build(config).await?;
    let outcome = runtime.orchestrator.coordinate_workflow(&workflow).await;

    if show_events {
        print_events(&runtime);
    }

    match outcome {
        Ok(results) => {
            for (index, (step, result)) in workflow.steps.iter().zip(&results).enumerate() {
                println!("[{}] {}/{}", index, step.agent_id, step.action);
                println!("{}", pretty(result));
            }
            eprintln!("\n[Workflow '{}' completed: {} steps]", workflow.name, results.len());
            Ok(())
        }
        Err(e) => {
            let stats = runtime.errors.stats();
            eprintln!("\n[Workflow '{}' failed: {}]", workflow.name, e);
            eprintln!("[Errors handled: {}, alerts: {}]", stats.total, stats.alerts);
            Err(e.into())
        }
    }
}

async fn opt_out(config: &Config, emails: &[String]) -> Result<()> {
    let runtime = Runtime::build(config).await?;
    let compliance = runtime
        .orchestrator
        .address(ComplianceAgent::ID)
        .context("Compliance agent is not registered")?;

    for email in emails {
        let registered = compliance
            .process(AgentInput::new(actions::REGISTER_OPT_OUT, json!({ "contact": email })))
            .await?;
        let validation = compliance
            .process(AgentInput::new(
                actions::VALIDATE_CONTACT,
                json!({ "contact": { "email": email } }),
            ))
            .await?;

        println!(
            "{:<40} {:<20} valid={}",
            email,
            registered["status"].as_str().unwrap_or("-"),
            validation["is_valid"]
        );
    }

    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    match &config.config_file {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no config file found, using defaults"),
    }
    print!("{}", serde_yaml::to_string(config).context("Failed to render config")?);
    Ok(())
}

fn print_events(runtime: &Runtime) {
    let events = runtime.bus.get_history(&HistoryFilter::new());
    println!("{:<24} {:<38} {}", "EVENT", "TRACE", "PAYLOAD");
    println!("{}", "-".repeat(100));
    for event in events {
        let payload = serde_json::to_value(&event.payload)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(Value::take))
            .unwrap_or(Value::Null);
        println!(
            "{:<24} {:<38} {}",
            event.event_type.as_str(),
            event.trace_id().to_string(),
            payload
        );
    }
    println!();
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "outreach", "run", "--topic", "hiking", "--email", "a@x.com", "--events",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { topic, email, name, events } => {
                assert_eq!(topic, "hiking");
                assert_eq!(email, "a@x.com");
                assert!(name.is_none());
                assert!(events);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_opt_out_requires_email() {
        assert!(Cli::try_parse_from(["outreach", "opt-out"]).is_err());
    }
}
