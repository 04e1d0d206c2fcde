use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chimera_agent::HttpLlmClient;
use chimera_platform::memory::InMemoryPlatform;
use chimera_platform::types::InboundMessage;

mod app;

use app::{App, DisabledOAuth, RunOutcome};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chimera=info".into()),
        )
        .init();

    // Load config: explicit CHIMERA_CONFIG path > ~/.chimera/chimera.toml.
    let config_path = std::env::var("CHIMERA_CONFIG").ok();
    let config = match chimera_core::config::ChimeraConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(code = e.code(), error = %e, "config load failed");
            return ExitCode::from(1);
        }
    };

    let llm = Arc::new(HttpLlmClient::new(config.llm.endpoint.clone()));

    // The concrete chat-platform adapter is wired per deployment; without
    // one this binary runs a local loopback that reads JSON-encoded inbound
    // messages from stdin and logs what the core would have emitted.
    let platform = Arc::new(InMemoryPlatform::new());
    info!("no platform adapter configured, running stdin loopback");

    let app = match App::bootstrap(config, platform.clone(), Arc::new(DisabledOAuth), llm) {
        Ok(app) => app,
        Err(e) => {
            error!(code = e.code(), error = %e, "bootstrap failed");
            return ExitCode::from(1);
        }
    };

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel::<InboundMessage>(64);

    // Ctrl-C → clean shutdown.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    // Stdin feeder: one JSON InboundMessage per line.
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundMessage>(&line) {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "unparseable inbound line"),
            }
        }
        // Dropping tx ends the run loop cleanly.
    });

    let outcome = app.run(rx, shutdown).await;

    // Loopback visibility: show what the core emitted.
    for sent in platform.webhook_sends() {
        info!(username = %sent.username, channel = %sent.channel_id, content = %sent.content, "webhook out");
    }
    for sent in platform.channel_sends() {
        info!(channel = %sent.channel_id, content = %sent.content, "message out");
    }

    match outcome {
        RunOutcome::Clean => ExitCode::SUCCESS,
        RunOutcome::AuthCascade => ExitCode::from(2),
    }
}
