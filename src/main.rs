//! # agentgraph
//!
//! Command line runner for component-graph agents.
//!
//! Loads an agent definition (JSON), sends a request to one of its endpoints
//! and prints the result. Debug sessions can be stepped, inspected and
//! killed across invocations when a durable store is configured.
//!
//! ## Quick Start
//! ```bash
//! agentgraph agent.json run /echo --input '{"msg": "hi"}'
//! agentgraph --store file:.sessions agent.json run /loop --debug --input '{"items": [1, 2]}'
//! agentgraph --store file:.sessions agent.json step <SESSION>
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

// =============================================================================
// IMPORTS
// =============================================================================
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use agentgraph::{create_store, Agent, AgentGraph, AgentOutcome, AgentRequest};

use crate::config::{Config, StoreSpec};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "agentgraph",
    version,
    about = "Run, step and inspect component-graph agents",
    long_about = r#"
Runs an agent graph described in a JSON file.

A request enters through an endpoint component (matched by path and method)
and is interpreted tick by tick until the session closes. With --debug the
session advances one tick per command and reports what changed.

EXAMPLES:
  # Run to completion
  agentgraph agent.json run /echo --input '{"msg": "hi"}'

  # Debug: open a session, then step it
  agentgraph --store file:.sessions agent.json run /loop --debug --input '{"items": [1, 2]}'
  agentgraph --store file:.sessions agent.json step 5d0c...

  # Render the graph
  agentgraph agent.json graph
"#
)]
struct Cli {
    /// Agent definition file
    #[arg(value_name = "AGENT")]
    agent: PathBuf,

    /// Snapshot store: memory, file:<dir> or sqlite:<path>
    #[arg(long, env = "AGENTGRAPH_STORE")]
    store: Option<String>,

    /// zstd-compress file snapshots
    #[arg(long)]
    compress: bool,

    /// Enable verbose/debug logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a request to an endpoint
    Run {
        /// Endpoint path
        path: String,

        /// HTTP method the endpoint is declared with
        #[arg(short = 'X', long, default_value = "POST")]
        method: String,

        /// JSON request body
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// Session id (generated when absent)
        #[arg(short, long)]
        session: Option<String>,

        /// Advance one tick instead of running to completion
        #[arg(long)]
        debug: bool,
    },

    /// Advance a debug session by one tick
    Step { session: String },

    /// Kill a session
    Kill { session: String },

    /// List stored sessions
    Sessions,

    /// Print the graph as a Mermaid flowchart
    Graph {
        /// Color components by the state of this session
        #[arg(short, long)]
        session: Option<String>,
    },
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(store) = &cli.store {
        config.store = StoreSpec::parse(store)?;
    }
    if cli.compress {
        config.compress = true;
    }

    init_logging(cli.verbose, &config.log_level)?;
    config.validate()?;

    let debug = matches!(cli.command, Command::Run { debug: true, .. });
    if !config.store.is_durable()
        && (debug || matches!(cli.command, Command::Step { .. } | Command::Kill { .. }))
    {
        warn!("Sessions in the memory store end with this process; use --store file:<dir>");
    }

    let agent = load_agent(&cli.agent, &config, debug).await?;
    info!(agent = %agent.id(), components = agent.graph().len(), "Agent loaded");

    if let Err(e) = execute(&agent, cli.command).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn load_agent(path: &Path, config: &Config, debug: bool) -> Result<Agent> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read agent file {}", path.display()))?;
    let graph = AgentGraph::from_json(&text)
        .with_context(|| format!("Invalid agent definition in {}", path.display()))?;

    let store = create_store(config.store_config()?)
        .await
        .context("Failed to open snapshot store")?;

    Agent::builder(graph)
        .with_config(config.engine_config(debug))
        .with_store(store)
        .build()
        .context("Failed to compile agent")
}

async fn execute(agent: &Agent, command: Command) -> Result<()> {
    match command {
        Command::Run {
            path,
            method,
            input,
            session,
            debug: _,
        } => {
            let body: Value =
                serde_json::from_str(&input).context("--input must be valid JSON")?;
            let mut request = AgentRequest::new(path, body).with_method(method);
            if let Some(session) = session {
                request = request.with_session(session);
            }

            match agent.process_request(request).await? {
                AgentOutcome::Completed(output) => print_json(&output)?,
                AgentOutcome::Step(delta) => print_json(&delta)?,
            }
        }
        Command::Step { session } => {
            let delta = agent.step(&session).await?;
            print_json(&delta)?;
        }
        Command::Kill { session } => {
            if agent.kill(&session).await? {
                println!("killed {}", session);
            } else {
                println!("nothing to kill for {}", session);
            }
        }
        Command::Sessions => {
            for session in agent.sessions().await? {
                println!("{}", session);
            }
        }
        Command::Graph { session } => match session {
            Some(session) => println!("{}", agent.session_mermaid(&session).await?),
            None => println!("{}", agent.mermaid()),
        },
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Logs go to stderr so stdout stays machine readable.
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
