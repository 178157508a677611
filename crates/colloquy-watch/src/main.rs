// Terminal follower for one debate.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout is the timeline)
// 2. Parse arguments and load config
// 3. Build the push transport and timeline source
// 4. Spawn the session loop and open the debate
// 5. Print updates until the debate ends or Ctrl+C
// 6. Cleanup on exit

mod demo;
mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use colloquy_core::config::{self, Config, TransportKind};
use colloquy_stream::fetch::{HttpTimelineSource, TimelineSource};
use colloquy_stream::protocol::SessionCommand;
use colloquy_stream::session::{self, DebateSession, SessionSettings};
use colloquy_stream::sse::SseTransport;
use colloquy_stream::transport::PushTransport;
use colloquy_stream::ws::WsTransport;
use tokio::sync::mpsc;
use tracing::{error, info};

const USAGE: &str = "usage: colloquy-watch <debate-id> | --demo";

/// How long the session gets to tear down after `Quit`.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

enum Mode {
    Follow(String),
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("colloquy-watch starting up");

    // 2. Arguments and config
    let mode = parse_args(std::env::args().skip(1))?;
    let config = match mode {
        // The demo runs without a config directory.
        Mode::Demo => Config::default(),
        Mode::Follow(_) => config::load_config().context("failed to load configuration")?,
    };
    info!(
        "Config loaded: server={}, transport={:?}",
        config.server.base_url, config.server.transport
    );

    // 3. Transports, then 4-6 inside `follow`
    match mode {
        Mode::Demo => {
            let (transport, source) = demo::fixtures();
            follow(&config, transport, source, demo::DEBATE_ID.to_string()).await
        }
        Mode::Follow(debate_id) => {
            let http = reqwest::Client::new();
            let source = Arc::new(HttpTimelineSource::new(http.clone(), config.server.clone()));
            match config.server.transport {
                TransportKind::Sse => {
                    follow(&config, Arc::new(SseTransport::new(http)), source, debate_id).await
                }
                TransportKind::Websocket => {
                    follow(&config, Arc::new(WsTransport), source, debate_id).await
                }
            }
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Mode> {
    let mode = match args.next().as_deref() {
        Some("--demo") => Mode::Demo,
        Some("-h" | "--help") | None => bail!(USAGE),
        Some(flag) if flag.starts_with('-') => bail!("unknown flag {flag}\n{USAGE}"),
        Some(id) => Mode::Follow(id.to_string()),
    };
    if let Some(extra) = args.next() {
        bail!("unexpected argument {extra}\n{USAGE}");
    }
    Ok(mode)
}

async fn follow<T, S>(
    config: &Config,
    transport: Arc<T>,
    source: Arc<S>,
    debate_id: String,
) -> anyhow::Result<()>
where
    T: PushTransport,
    S: TimelineSource,
{
    let (ui_tx, ui_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let settings = SessionSettings::from_config(config);
    let (debate_session, feed_rx) = DebateSession::new(settings, transport, source, ui_tx);

    // 4. Spawn the session loop
    let session_handle = tokio::spawn(async move {
        if let Err(e) = session::run(debate_session, feed_rx, cmd_rx).await {
            error!("Session loop error: {}", e);
        }
    });

    cmd_tx
        .send(SessionCommand::Open { debate_id })
        .await
        .context("session loop exited before the debate was opened")?;

    // 5. Print until the debate ends or the user interrupts
    let mut printer = render::Printer::new(config.aggregates.vote_threshold);
    tokio::select! {
        result = render::run(&mut printer, ui_rx, cmd_tx.clone()) => {
            if let Err(e) = result {
                error!("Render error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
            let _ = cmd_tx.send(SessionCommand::Quit).await;
        }
    }
    drop(cmd_tx);

    // 6. Cleanup: give the session a bounded window to tear down
    let abort = session_handle.abort_handle();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, session_handle).await.is_err() {
        error!("Session did not shut down within {:?}, aborting", SHUTDOWN_TIMEOUT);
        abort.abort();
    }

    info!("colloquy-watch shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (stdout carries the timeline).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("colloquy-watch.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("colloquy=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
