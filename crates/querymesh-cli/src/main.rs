//! `querymesh` binary: runs workflows against scripted agents.

mod config;
mod scripted;

use clap::{Parser, Subcommand};
use config::QuerymeshConfig;
use querymesh_hub::{Hub, RoutingRule};
use querymesh_orchestrator::DynamicScheduler;
use scripted::ScriptedCapability;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "querymesh", about = "Querymesh — result-driven multi-agent query orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "querymesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one workflow and print the result as JSON
    Run {
        /// Natural-language request
        #[arg(short, long)]
        query: String,
        /// Extra user context as key=value (value parsed as JSON when possible)
        #[arg(long = "context", value_parser = parse_context)]
        context: Vec<(String, Value)>,
    },
    /// Validate the config and list agents
    Check,
}

fn parse_context(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn build_scheduler(config: &QuerymeshConfig) -> DynamicScheduler {
    let hub = Hub::new(config.hub.clone());
    hub.add_routing_rule(
        RoutingRule::default()
            .with_middleware(config.routing.middleware.iter().map(String::as_str))
            .with_timeout(Duration::from_secs(config.routing.timeout_secs.max(1))),
    );

    let scheduler = DynamicScheduler::new(Arc::new(hub), config.scheduler.clone());
    for agent in &config.agents {
        scheduler
            .register_capability(agent.name, ScriptedCapability::from(agent))
            .await;
    }
    scheduler
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = QuerymeshConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run { query, context } => {
            if !config.has_first_agent() {
                warn!(
                    agent = %config.scheduler.first_agent,
                    "No scripted agent for the bootstrap task"
                );
            }
            let scheduler = build_scheduler(&config).await;
            let user_context: Map<String, Value> = context.into_iter().collect();

            let result = scheduler.run_workflow(query, user_context).await;
            info!(
                reason = %result.termination_reason,
                iterations = result.iterations,
                "Workflow complete"
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
            scheduler.hub().shutdown().await;
        }
        Commands::Check => {
            println!("Config OK: {}", cli.config.display());
            println!(
                "  scheduler: max_iterations={}, max_executed_agents={}, first_agent={}",
                config.scheduler.max_iterations,
                config.scheduler.max_executed_agents,
                config.scheduler.first_agent
            );
            println!(
                "  hub: max_concurrent_messages={}, queue_capacity={}",
                config.hub.max_concurrent_messages, config.hub.queue_capacity
            );
            println!("  routing middleware: {}", config.routing.middleware.join(", "));
            for agent in &config.agents {
                println!(
                    "  agent {:<14} {} scripted outcome(s)",
                    agent.name.as_str(),
                    agent.outcomes.len()
                );
            }
        }
    }

    Ok(())
}
