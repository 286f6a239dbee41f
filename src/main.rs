use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ops_pilot::mcp::status::{list_session_infos, session_info};
use ops_pilot::{
    CliConfig, Decision, FileSessionStore, OpsPilotServer, RunResult, SessionId, WorkflowEngine,
};

/// Ops-Pilot CLI: diagnose incidents and apply gated remediations
#[derive(Parser, Debug)]
#[command(name = "ops-pilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a run for an incident
    #[command(name = "run")]
    Run {
        /// Incident description
        #[arg(short, long)]
        message: String,

        /// Session to continue (a new one is created if omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Approve or reject the action a session is waiting on
    #[command(name = "resume")]
    Resume {
        /// Suspended session
        #[arg(short, long)]
        session: String,

        /// "approve" or "reject"
        #[arg(short, long)]
        decision: Decision,
    },

    /// Show a session's status
    #[command(name = "status")]
    Status {
        #[arg(short, long)]
        session: String,
    },

    /// List sessions, most recent first
    #[command(name = "list")]
    List {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Serve the workflow over MCP on stdio
    #[command(name = "mcp")]
    Mcp,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        // Default behavior: show help
        eprintln!("No command specified. Use --help for usage information.");
        eprintln!("Example: ops-pilot run --message \"EC2 instance cannot assume its IAM role\"");
        std::process::exit(1);
    };

    init_logging(cli.verbose, matches!(command, Command::Mcp));

    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = CliConfig::load_with_env(cli.config.as_deref(), &base_dir)?;

    // Only commands that run the workflow need the generation and retrieval backends
    let engine = || WorkflowEngine::from_config(&config, &base_dir);

    match command {
        Command::Run { message, session } => {
            let engine = engine()?;
            let session_id = session.map(SessionId::new).unwrap_or_else(SessionId::generate);
            info!("Session: {}", session_id);
            let result = engine.start(&session_id, &message).await?;
            print_result(&result)
        }
        Command::Resume { session, decision } => {
            let engine = engine()?;
            let result = engine.resume(&SessionId::new(session), decision).await?;
            print_result(&result)
        }
        Command::Status { session } => {
            let store = FileSessionStore::new(&config.store.sessions_dir);
            let info = session_info(&store, &SessionId::new(session)).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::List { limit } => {
            let store = FileSessionStore::new(&config.store.sessions_dir);
            let sessions = list_session_infos(&store, limit).await?;
            if sessions.is_empty() {
                println!("No sessions found in {:?}", config.store.sessions_dir);
            }
            for info in &sessions {
                println!(
                    "{:<32} {:<18} {}",
                    info.session_id,
                    info.status,
                    info.updated_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Mcp => {
            let engine = engine()?;
            info!("Starting MCP server on stdio");
            let server = OpsPilotServer::new(Arc::new(engine));
            let service = server
                .serve(rmcp::transport::stdio())
                .await
                .context("Failed to start MCP server")?;
            service.waiting().await?;
            Ok(())
        }
    }
}

/// MCP mode speaks JSON-RPC on stdout, so logs go to stderr there.
fn init_logging(verbose: bool, mcp: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if mcp {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

fn print_result(result: &RunResult) -> Result<()> {
    match result {
        RunResult::Completed {
            session_id,
            final_message,
        } => {
            println!("\n========================================");
            println!("Run Complete!");
            println!("========================================");
            println!("Session: {}", session_id);
            println!("\n{}", final_message);
        }
        RunResult::Pending { approval } => {
            println!("\n========================================");
            println!("Approval Required");
            println!("========================================");
            println!("Session: {}", approval.session_id);
            println!("Service: {}", approval.proposal.service);
            println!("Configuration item: {}", approval.proposal.configuration_item);
            println!("Action: {}", approval.proposal.action);
            if let Some(expires_at) = approval.expires_at {
                println!("Expires: {}", expires_at.to_rfc3339());
            }
            println!("\n{}", approval.question);
            println!(
                "\nResume with: ops-pilot resume --session {} --decision approve|reject",
                approval.session_id
            );
        }
    }

    Ok(())
}
