//! Command-line surface. `serve` runs the dashboard; every other command is a
//! one-shot writer used by the heartbeat agent.

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::AppConfig;
use crate::core::open_store;
use crate::documents::{ActivityType, ResearchCategory, ResearchStatus, Telemetry};
use crate::store::DocumentStore;
use crate::utils::parse_count;
use crate::writers;

#[derive(Parser, Debug)]
#[command(
    name = "opsdash",
    version,
    about = "Operations dashboard backend and heartbeat writer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the dashboard HTTP server (default).
    Serve,
    /// Append an entry to the activity feed.
    Activity {
        #[arg(default_value = "Heartbeat")]
        title: String,
        #[arg(default_value = "")]
        description: String,
        /// heartbeat, email, website, notion, task or error.
        #[arg(default_value = "heartbeat")]
        kind: String,
    },
    /// Report whether the agent is working, and on what.
    Status {
        /// `true` means running; anything else means idle.
        running: String,
        task: Option<String>,
        /// Telemetry object as JSON, e.g. '{"model":"m","queueDepth":2}'.
        #[arg(long)]
        telemetry: Option<String>,
    },
    /// Overwrite today's counters. Unparseable numbers count as 0.
    Stats {
        #[arg(default_value = "0")]
        heartbeats: String,
        #[arg(default_value = "0")]
        pipeline: String,
    },
    /// Add or list research notes.
    Research {
        #[command(subcommand)]
        action: ResearchCommand,
    },
    /// Replace the list of memory files shown on the dashboard.
    Memory { files: Vec<String> },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ResearchCommand {
    Add {
        #[arg(default_value = "New Research")]
        title: String,
        #[arg(default_value = "")]
        description: String,
        /// partner, competitor, market or courses.
        #[arg(default_value = "market")]
        category: String,
        /// researching, completed or pending.
        #[arg(default_value = "pending")]
        status: String,
    },
    List,
}

/// Run a writer command. Failures are logged and printed but never turn into
/// a non-zero exit, so a flaky store can't break the agent's heartbeat loop.
pub async fn dispatch(config_path: &Path, command: Command) {
    let result = async {
        let config = AppConfig::load(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        let store = open_store(&config.store).await?;
        execute(store.as_ref(), command).await
    }
    .await;

    match result {
        Ok(output) => println!("{output}"),
        Err(e) => {
            error!("Command failed: {e:#}");
            eprintln!("Error: {e:#}");
        }
    }
}

/// Execute one writer command against `store`, returning what to print.
pub async fn execute(store: &dyn DocumentStore, command: Command) -> anyhow::Result<String> {
    match command {
        Command::Serve => anyhow::bail!("serve is not a writer command"),
        Command::Activity {
            title,
            description,
            kind,
        } => {
            let kind: ActivityType = kind.parse()?;
            let id = writers::write_activity(store, &title, &description, kind).await?;
            Ok(format!("Activity written: {id}"))
        }
        Command::Status {
            running,
            task,
            telemetry,
        } => {
            let telemetry = telemetry
                .map(|raw| {
                    serde_json::from_str::<Telemetry>(&raw).context("invalid --telemetry JSON")
                })
                .transpose()?;
            let is_running = running == "true";
            writers::update_status(store, is_running, task.as_deref(), telemetry).await?;
            Ok(format!(
                "Status updated: {}",
                if is_running { "running" } else { "idle" }
            ))
        }
        Command::Stats {
            heartbeats,
            pipeline,
        } => {
            let heartbeats = parse_count(&heartbeats);
            let pipeline = parse_count(&pipeline);
            writers::update_stats(store, heartbeats, pipeline).await?;
            Ok(format!(
                "Stats updated: {heartbeats} heartbeats, {pipeline} in pipeline"
            ))
        }
        Command::Research {
            action:
                ResearchCommand::Add {
                    title,
                    description,
                    category,
                    status,
                },
        } => {
            let category: ResearchCategory = category.parse()?;
            let status: ResearchStatus = status.parse()?;
            let id =
                writers::write_research(store, &title, &description, category, status).await?;
            Ok(format!("Research item written: {id}"))
        }
        Command::Research {
            action: ResearchCommand::List,
        } => {
            let items = writers::get_research(store).await?;
            Ok(serde_json::to_string_pretty(&items)?)
        }
        Command::Memory { files } => {
            let count = files.len();
            writers::update_memory_files(store, files).await?;
            Ok(format!("Memory files updated: {count}"))
        }
    }
}
