mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};

use lumen_core::ids::ConversationId;
use lumen_core::retry::RetryPolicy;
use lumen_session::{SessionController, TurnOutcome};
use lumen_settings::LumenSettings;
use lumen_telemetry::TelemetryConfig;
use lumen_transport::{HttpTransport, ReliableTransport};

use crate::render::Renderer;

/// Send one message to a streaming analytics chat backend and print the reply.
#[derive(Parser, Debug)]
#[command(name = "lumen", version)]
struct Cli {
    /// Chat endpoint URL (overrides settings).
    #[arg(long)]
    endpoint: Option<String>,
    /// Continue an existing conversation.
    #[arg(long)]
    conversation_id: Option<ConversationId>,
    /// Settings file (default: ~/.lumen/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Log JSON lines to stderr.
    #[arg(long)]
    json_logs: bool,
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let telemetry = TelemetryConfig {
        log_level: Level::from_str(&settings.logging.level).unwrap_or(Level::INFO),
        json: settings.logging.json,
        ..Default::default()
    };
    if let Err(e) = lumen_telemetry::init_telemetry(telemetry) {
        eprintln!("lumen: logging unavailable: {e}");
    }

    let http = HttpTransport::with_connect_timeout(
        settings.client.endpoint.clone(),
        settings.client.connect_timeout(),
    )?;
    let transport = ReliableTransport::new(http, RetryPolicy::from(&settings.retry));
    let controller = SessionController::new(Arc::new(transport))
        .with_idle_timeout(settings.client.idle_timeout());

    info!(endpoint = %settings.client.endpoint, "sending message");

    let mut renderer = Renderer::new(std::io::stdout());
    let mut updates = controller.subscribe();
    let turn = controller.send_message(cli.message, cli.conversation_id);
    tokio::pin!(turn);

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome?,
            changed = updates.changed() => {
                if changed.is_ok() {
                    let state = updates.borrow_and_update().clone();
                    renderer.render(&state)?;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                info!("interrupt received, cancelling turn");
                interrupted = true;
                controller.cancel();
            }
        }
    };

    renderer.finish(&controller.state())?;

    Ok(match outcome {
        TurnOutcome::Completed { conversation_id } => {
            if let Some(id) = conversation_id {
                eprintln!("conversation: {id}");
            }
            ExitCode::SUCCESS
        }
        TurnOutcome::Failed { message } => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
        TurnOutcome::Cancelled => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
    })
}

fn load_settings(cli: &Cli) -> anyhow::Result<LumenSettings> {
    let mut settings = match &cli.settings {
        Some(path) => lumen_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => lumen_settings::load_settings().context("loading settings")?,
    };
    if let Some(endpoint) = &cli.endpoint {
        settings.client.endpoint = endpoint.clone();
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    Ok(settings)
}
