//! # Incident assistant CLI (`inc`)
//!
//! Ask questions about IT incidents, manage tickets, or start the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! inc [--config ./config/incident-rag.toml] [--reload] [--mode <mode>] ["question"]
//! inc incidents <list|get|create|update|close> ...
//! inc serve [--reload]
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `inc` | Interactive REPL (`exit` or `quit` to leave) |
//! | `inc "<question>"` | Answer one question and exit |
//! | `inc --reload` | Rebuild the vector index from `[data].path` first |
//! | `inc incidents list` | List incidents, newest first |
//! | `inc incidents get <number>` | Show one incident |
//! | `inc incidents create` | Open a new incident |
//! | `inc incidents update <number> --set field=value` | Patch fields |
//! | `inc incidents close <number>` | Close an incident |
//! | `inc serve` | Start the JSON HTTP server |
//!
//! `PINECONE_API_KEY` and `MISTRAL_API_KEY` must be set in the environment
//! or a `.env` file. Logs go to stderr; set `RUST_LOG=debug` for detail.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use incident_rag::chat;
use incident_rag::config::{self, Config, SearchMode, Secrets};
use incident_rag::ingest;
use incident_rag::llm::MistralChat;
use incident_rag::rag::RagPipeline;
use incident_rag::server;
use incident_rag::store::VectorStore;
use incident_rag::tickets::{Incident, IncidentFilter, NewIncident, TicketClient};

/// Incident assistant: retrieval-augmented answers over IT incident records.
#[derive(Parser)]
#[command(
    name = "inc",
    version,
    about = "Ask questions about IT incidents and manage tickets",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/incident-rag.toml")]
    config: PathBuf,

    /// Question to answer. Omit to start the interactive REPL.
    query: Option<String>,

    /// Rebuild the vector index from the configured data file first.
    #[arg(long)]
    reload: bool,

    /// Override the configured search mode.
    #[arg(long, value_enum)]
    mode: Option<SearchMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with incidents in the ticketing system.
    Incidents {
        #[command(subcommand)]
        action: IncidentAction,
    },

    /// Start the JSON HTTP server on `[server].bind`.
    Serve {
        /// Rebuild the vector index before serving.
        #[arg(long)]
        reload: bool,
    },
}

#[derive(Subcommand)]
enum IncidentAction {
    /// List incidents, newest first.
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one incident.
    Get { number: String },
    /// Open a new incident.
    Create {
        #[arg(long)]
        short_description: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        assigned_to: Option<String>,
    },
    /// Patch fields of an incident.
    Update {
        number: String,
        /// Field assignment, repeatable: `--set state=2 --set priority=1`.
        #[arg(long = "set", value_parser = parse_assignment, required = true)]
        fields: Vec<(String, String)>,
    },
    /// Close an incident.
    Close {
        number: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected field=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let secrets = Secrets::from_env()?;

    match cli.command {
        Some(Commands::Incidents { action }) => {
            let client = TicketClient::new(&cfg.tickets, &secrets).map_err(|e| anyhow!(e.user_message()))?;
            run_incident_action(&client, action).await
        }
        Some(Commands::Serve { reload }) => {
            let rag = build_pipeline(&cfg, &secrets, reload).await?;
            let tickets = match TicketClient::new(&cfg.tickets, &secrets) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "ticket routes disabled");
                    None
                }
            };
            server::run_server(&cfg, rag, tickets).await
        }
        None => {
            let rag = build_pipeline(&cfg, &secrets, cli.reload).await?;
            match cli.query {
                Some(question) => chat::run_once(&rag, &question, cli.mode).await,
                None => chat::run_repl(&rag, cli.mode).await.map(|_| ()),
            }
        }
    }
}

async fn build_pipeline(cfg: &Config, secrets: &Secrets, reload: bool) -> Result<Arc<RagPipeline>> {
    let store = Arc::new(VectorStore::from_config(cfg, secrets)?);
    if reload {
        ingest::run_reload(cfg, &store).await?;
    }
    let model = MistralChat::new(&cfg.llm, secrets.llm_api_key.clone())?;
    Ok(Arc::new(RagPipeline::new(store, Arc::new(model))))
}

async fn run_incident_action(client: &TicketClient, action: IncidentAction) -> Result<()> {
    let result = match action {
        IncidentAction::List {
            state,
            priority,
            limit,
        } => client
            .list(&IncidentFilter {
                state,
                priority,
                limit,
            })
            .await
            .map(|incidents| print_incident_table(&incidents)),
        IncidentAction::Get { number } => client.get(&number).await.map(|i| print_incident(&i)),
        IncidentAction::Create {
            short_description,
            description,
            priority,
            assigned_to,
        } => client
            .create(&NewIncident {
                short_description,
                description,
                priority,
                assigned_to,
            })
            .await
            .map(|i| {
                println!("created {}", i.number());
                print_incident(&i);
            }),
        IncidentAction::Update { number, fields } => {
            let fields: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            client.update(&number, &fields).await.map(|i| print_incident(&i))
        }
        IncidentAction::Close { number, notes } => client
            .close(&number, notes.as_deref())
            .await
            .map(|i| println!("closed {} (state: {})", i.number(), i.record.state)),
    };
    result.map_err(|e| anyhow!(e.user_message()))
}

fn print_incident_table(incidents: &[Incident]) {
    if incidents.is_empty() {
        println!("No incidents.");
        return;
    }
    println!("{:<12} {:<14} {:<20} DESCRIPTION", "NUMBER", "STATE", "OPENED");
    for i in incidents {
        println!(
            "{:<12} {:<14} {:<20} {}",
            i.number(),
            i.record.state,
            i.record.opened_at.as_deref().unwrap_or("-"),
            i.record.short_description
        );
    }
}

fn print_incident(incident: &Incident) {
    match serde_json::to_string_pretty(incident) {
        Ok(json) => println!("{}", json),
        Err(_) => println!("{}", incident.number()),
    }
}
