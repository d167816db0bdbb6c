#[cfg(feature = "native-audio")]
mod audio;
mod config;
mod display;
mod permission;
mod transport;

use crate::config::Config;
use crate::transport::{ConvaiTransport, WsDialer};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use voice_core::{SessionController, SessionError};

#[derive(Parser)]
#[command(version, about = "Terminal front-end for a realtime voice agent")]
struct Cli {
    /// Start a conversation as soon as the service is up
    #[arg(long)]
    auto_start: bool,
    /// Print the available audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

/// What the user can type while the service runs.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Quit,
    Help,
    Empty,
}

impl Command {
    fn parse(line: &str) -> Self {
        match line.trim().to_lowercase().as_str() {
            "" => Command::Empty,
            "start" | "s" => Command::Start,
            "stop" | "end" => Command::Stop,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Help,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    if args.list_devices {
        return list_devices();
    }

    // --- Configuration and logging ---
    let config = Config::from_env().context("Failed to load application configuration")?;
    let filter = EnvFilter::try_new(&config.log_filter).context("Invalid RUST_LOG filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .init();
    tracing::info!(
        agent_id = %config.agent_id,
        mode = %config.connection_mode,
        "Configuration loaded successfully. Starting voice agent..."
    );

    // --- Session controller ---
    let dialer = WsDialer::new(config.base_url.clone(), config.api_key.clone());

    #[cfg(feature = "native-audio")]
    let (controller, driver, _streams) = {
        let (mic_tx, mic_rx) = tokio::sync::mpsc::channel(64);
        let (playback_tx, playback_rx) = tokio::sync::mpsc::channel(256);
        let streams = audio::start(mic_tx, playback_rx).context("Failed to start audio devices")?;
        let transport = ConvaiTransport::new(dialer)
            .with_microphone(mic_rx)
            .with_playback(playback_tx);
        let (controller, driver) = SessionController::spawn(
            config.session_config(),
            permission::DevicePermission::default(),
            transport,
        );
        (controller, driver, streams)
    };

    #[cfg(not(feature = "native-audio"))]
    let (controller, driver) = SessionController::spawn(
        config.session_config(),
        permission::HeadlessPermission,
        ConvaiTransport::new(dialer),
    );

    // --- Display ---
    let mut state_rx = controller.subscribe();
    let display_task = tokio::spawn(async move {
        let mut last_line = String::new();
        loop {
            let line = display::render(&state_rx.borrow_and_update());
            if line != last_line {
                println!("{}", line);
                last_line = line;
            }
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    });

    if args.auto_start {
        spawn_start(&controller);
    }

    // --- Command loop ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down.");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match Command::parse(&line) {
                    Command::Start => spawn_start(&controller),
                    Command::Stop => controller.stop().await,
                    Command::Quit => break,
                    Command::Help => println!("commands: start, stop, quit"),
                    Command::Empty => {}
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read from stdin: {}", e);
                    break;
                }
            },
        }
    }

    controller.stop().await;
    drop(controller);
    if let Err(e) = driver.await {
        tracing::error!("Session controller task failed: {}", e);
    }
    display_task.abort();
    tracing::info!("Voice agent stopped.");
    Ok(())
}

/// Runs `start()` in the background so `stop` stays responsive while the
/// permission prompt or connection is pending.
fn spawn_start(controller: &SessionController) {
    let controller = controller.clone();
    tokio::spawn(async move {
        match controller.start().await {
            Ok(()) => tracing::info!("Conversation started."),
            Err(SessionError::Cancelled) => tracing::info!("Start cancelled."),
            Err(e) if e.is_user_visible() => tracing::warn!("Failed to start conversation: {}", e),
            Err(e) => tracing::info!("Start ignored: {}", e),
        }
    });
}

#[cfg(feature = "native-audio")]
fn list_devices() -> Result<()> {
    audio::list_devices()
}

#[cfg(not(feature = "native-audio"))]
fn list_devices() -> Result<()> {
    println!("Built without the `native-audio` feature; no audio devices are used.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(" Start \n"), Command::Start);
        assert_eq!(Command::parse("stop"), Command::Stop);
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("dance"), Command::Help);
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::try_parse_from(["voice-agent", "--auto-start"]).unwrap();
        assert!(cli.auto_start);
        assert!(!cli.list_devices);
    }
}
