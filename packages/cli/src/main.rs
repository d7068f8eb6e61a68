// ABOUTME: Relaybox command-line entry point
// ABOUTME: Runs the JSON-lines chat relay or a single sandboxed command against local Docker

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaybox_config::constants::RUST_LOG;
use relaybox_sandboxes::{CleanupScheduler, DockerRuntime, SandboxConfig, SandboxOrchestrator};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

mod relay;

#[derive(Parser)]
#[command(name = "relaybox")]
#[command(about = "Relaybox - per-thread sandboxes for chat-driven coding agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON request lines from stdin, writing JSON responses to stdout
    Relay,

    /// Run one command in a thread's sandbox and print the result
    Exec {
        /// Conversation thread that owns the sandbox
        #[arg(long)]
        thread: String,

        #[arg(long, default_value = "cli")]
        channel: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Leave the sandbox running afterwards
        #[arg(long, help = "Keep the sandbox running after the command completes")]
        keep: bool,

        /// Message handed to the sandboxed tool
        text: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_tracing() {
    // stdout carries responses, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env(RUST_LOG)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn build_orchestrator() -> Result<Arc<SandboxOrchestrator>> {
    let config = SandboxConfig::from_env();
    if config.api_key.is_none() {
        info!("No upstream API key configured; sandboxes start without credentials");
    }

    let runtime = DockerRuntime::connect()
        .await
        .context("Failed to connect to Docker")?
        .with_image_pull(config.pull_missing_images, config.image_pull_timeout);

    Ok(Arc::new(SandboxOrchestrator::new(Arc::new(runtime), config)))
}

async fn handle_command(command: Commands) -> Result<()> {
    let orchestrator = build_orchestrator().await?;

    match command {
        Commands::Relay => {
            let cleanup = CleanupScheduler::spawn_from_config(orchestrator.clone());
            let result = relay::run(orchestrator, tokio::io::stdin(), tokio::io::stdout()).await;
            cleanup.shutdown().await;
            result
        }
        Commands::Exec {
            thread,
            channel,
            user,
            keep,
            text,
        } => {
            let outcome = orchestrator
                .process_command(&thread, &channel, &user, &text)
                .await;

            if !keep {
                if let Err(e) = orchestrator.stop_session(&thread).await {
                    error!("Failed to stop sandbox for thread {}: {}", thread, e);
                }
            }

            let result = outcome.context("Command failed")?;
            let json = serde_json::to_string_pretty(&result).context("Failed to encode result")?;
            println!("{}", json);
            Ok(())
        }
    }
}
