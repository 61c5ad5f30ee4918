use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mg_domain::config::RawConfig;
use mg_domain::plan::DeploymentPlan;
use mg_gateway::loader::ConfigLoader;
use mg_gateway::supervisor;

#[derive(Parser)]
#[command(name = "mcpguard", about = "Governance proxy for MCP tool servers", version)]
struct Cli {
    /// Path to the governance config file.
    #[arg(short, long, default_value = "mcp_governance_config.json")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy (the default).
    Serve,
    /// Inspect or validate the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and report warnings and port conflicts.
    Validate,
    /// Print the validated deployment plan.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let loader = ConfigLoader::new(&cli.config);
            let plan = loader.load();
            supervisor::run(plan).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (plan, warnings) = inspect_config(&cli.config);
            for warning in &warnings {
                println!("warning: {warning}");
            }
            let conflicts = plan.port_conflicts();
            for conflict in &conflicts {
                println!("error: {conflict}");
            }
            println!(
                "{} server(s), {} front-end(s), mode '{}'",
                plan.servers.len(),
                plan.front_ends().len(),
                plan.deployment_mode
            );
            if !conflicts.is_empty() {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (plan, _) = inspect_config(&cli.config);
            println!("{}", serde_json::to_string_pretty(&*plan)?);
            Ok(())
        }
    }
}

/// Structured JSON tracing for the `serve` path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mg_gateway=debug")),
        )
        .json()
        .init();
}

/// Load the config for CLI inspection, collecting warnings as plain
/// strings instead of log events.
fn inspect_config(path: &str) -> (Arc<DeploymentPlan>, Vec<String>) {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            return (
                Arc::new(DeploymentPlan::default()),
                vec![format!("config file '{path}' not readable ({e}), using defaults")],
            );
        }
    };
    let raw: RawConfig = match serde_json::from_str(&contents) {
        Ok(raw) => raw,
        Err(e) => {
            return (
                Arc::new(DeploymentPlan::default()),
                vec![format!("invalid JSON in '{path}' ({e}), using defaults")],
            );
        }
    };
    let (plan, warnings) = DeploymentPlan::from_raw(&raw);
    (Arc::new(plan), warnings)
}
