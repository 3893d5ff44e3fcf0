use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_realtime::{
    create_router, AppState, Config, Role, SessionStatus, StaticCredentialProvider,
    VoiceSession, WebSocketTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "loqa-realtime")]
#[command(about = "Realtime duplex voice conversation engine")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/loqa-realtime")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP control API
    Serve,

    /// Run one conversation in the terminal (Ctrl-C to hang up)
    Talk {
        /// Override the audio input: microphone, silence, or a WAV path
        #[arg(short, long)]
        input: Option<String>,

        /// Override the audio output: speaker or null
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn build_session(cfg: &Config) -> Result<Arc<VoiceSession>> {
    let devices = cfg.audio_factory().context("Invalid audio configuration")?;
    let transport = WebSocketTransport::new(&cfg.realtime.url, &cfg.realtime.model);
    let credentials = StaticCredentialProvider::new(
        cfg.api_key().context("Failed to resolve realtime API key")?,
        chrono::Duration::seconds(cfg.realtime.credential_ttl_secs),
    );

    Ok(Arc::new(VoiceSession::new(
        cfg.session_config(),
        Arc::new(devices),
        Arc::new(transport),
        Arc::new(credentials),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve => serve(&cfg).await,
        Command::Talk { input, output } => {
            if let Some(input) = input {
                cfg.audio.input = input;
            }
            if let Some(output) = output {
                cfg.audio.output = output;
            }
            talk(&cfg).await
        }
    }
}

async fn serve(cfg: &Config) -> Result<()> {
    let session = build_session(cfg)?;
    let app = create_router(AppState::new(Arc::clone(&session)));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    session.disconnect().await;
    Ok(())
}

async fn talk(cfg: &Config) -> Result<()> {
    let session = build_session(cfg)?;

    session
        .connect()
        .await
        .context("Failed to start voice session")?;

    info!("Connected. Speak, or type a message and press Enter. Ctrl-C hangs up.");

    let mut status = session.subscribe_status();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut printed = 0;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Hanging up");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() || *status.borrow() == SessionStatus::Error {
                    error!(
                        "Session ended: {}",
                        session.last_error().unwrap_or_else(|| "unknown error".to_string())
                    );
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    if let Err(e) = session.send_text(&text).await {
                        warn!("Failed to send text: {}", e);
                    }
                }
                Ok(Some(_)) => {}
                // stdin closed; voice only from here on
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = ticker.tick() => {
                printed = print_finished(&session, printed);
            }
        }
    }

    if let Some(stats) = session.disconnect().await {
        info!(
            "Session {} lasted {:.1}s: {} frames sent, {} chunks played, {} barge-ins",
            stats.session_id,
            stats.duration_secs,
            stats.frames_sent,
            stats.chunks_played,
            stats.truncations
        );
    }

    Ok(())
}

/// Print finished transcript entries not printed yet
fn print_finished(session: &VoiceSession, printed: usize) -> usize {
    let transcript = session.transcript();
    let mut count = printed;

    for entry in transcript.iter().skip(printed) {
        if entry.is_streaming {
            break;
        }
        let speaker = match entry.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("{:>9}: {}", speaker, entry.text);
        count += 1;
    }

    count
}
