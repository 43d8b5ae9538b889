// mien command line interface
// Runs the avatar face against stdin, watches the presence feed and checks configuration

mod input;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use input::{parse_line, DebugCommand, InputLine};
use mien_core::{AvatarState, ConnectionState, MienConfig, PresenceSignal, ServerMessage};
use mien_link::{PresenceSnapshot, PresenceSource};
use mien_me::{FaceDriver, FaceHandle, FaceSources};
use mien_sc::{AudioTrack, LoudnessMonitor, SampleBuffer};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mien")]
#[command(about = "Expression core for an animated avatar face", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the face: JSON inputs on stdin, avatar state as JSON lines on stdout
    Run {
        /// Do not connect to the presence sensor; accept {"presence": bool} lines instead
        #[arg(long)]
        no_presence: bool,

        /// Samples kept from {"samples": [...]} lines for loudness analysis
        #[arg(long, default_value = "256")]
        audio_buffer: usize,
    },

    /// Print presence snapshots as they arrive
    Presence {
        /// Presence sensor URL (overrides the configuration)
        #[arg(long)]
        url: Option<String>,
    },

    /// Validate configuration and print the effective values
    CheckConfig {
        #[arg(long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, cli.json_logs);

    match cli.command {
        Commands::Run {
            no_presence,
            audio_buffer,
        } => run_face(config, no_presence, audio_buffer).await,
        Commands::Presence { url } => watch_presence(config, url).await,
        Commands::CheckConfig { format } => print_config(&config, format),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<MienConfig> {
    let mut config = match path {
        Some(path) => MienConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => MienConfig::default(),
    };
    config.apply_env();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries state; logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything stdin lines are routed into
struct Inputs {
    face: FaceHandle,
    transport: watch::Sender<ConnectionState>,
    server: mpsc::UnboundedSender<ServerMessage>,
    presence: Option<watch::Sender<PresenceSnapshot>>,
    audio: Arc<SampleBuffer>,
}

impl Inputs {
    fn dispatch(&self, line: InputLine) -> Result<()> {
        match line {
            InputLine::Server(message) => self
                .server
                .send(message)
                .context("face driver stopped reading server messages")?,
            InputLine::Transport(state) => {
                self.transport.send_replace(state);
            }
            InputLine::Presence(present) => match &self.presence {
                Some(tx) => {
                    tx.send_replace(PresenceSnapshot {
                        is_connected: true,
                        signal: Some(PresenceSignal::new(present, u32::from(present))),
                    });
                }
                None => warn!("Presence comes from the sensor feed; ignoring manual presence"),
            },
            InputLine::Samples(samples) => self.audio.push(&samples),
            InputLine::Command(command) => match command {
                DebugCommand::ShowText { text, duration } => self.face.show_text(text, duration)?,
                DebugCommand::HideText => self.face.hide_text()?,
                DebugCommand::SetExpression { expression } => self.face.set_expression(expression)?,
                DebugCommand::SetTalking { talking } => self.face.set_talking(talking)?,
                DebugCommand::SetPresenceDetection { enabled } => {
                    self.face.set_presence_detection(enabled)?
                }
            },
        }
        Ok(())
    }
}

async fn run_face(config: MienConfig, no_presence: bool, audio_buffer: usize) -> Result<()> {
    let (transport, transport_rx) = watch::channel(ConnectionState::Disconnected);
    let (server, server_rx) = mpsc::unbounded_channel();
    let (requests_tx, mut requests) = mpsc::unbounded_channel();

    let mut sources = FaceSources::new()
        .with_transport(transport_rx)
        .with_server_messages(server_rx)
        .with_transport_control(requests_tx)
        .with_loudness_monitor(LoudnessMonitor::new(config.loudness.clone()));

    let presence = if no_presence || !config.presence.auto_connect {
        let (tx, rx) = watch::channel(PresenceSnapshot::default());
        sources = sources.with_presence(rx);
        Some(tx)
    } else {
        let source = PresenceSource::spawn(&config.presence).context("failed to start presence feed")?;
        sources = sources.with_presence_source(source);
        None
    };

    let (face, driver) = FaceDriver::spawn(&config, sources);

    let audio = Arc::new(SampleBuffer::new("stdin-audio", audio_buffer));
    face.attach_track(Some(Arc::clone(&audio) as Arc<dyn AudioTrack>))?;

    let printer = tokio::spawn(print_states(face.subscribe()));
    let inputs = Inputs {
        face: face.clone(),
        transport,
        server,
        presence,
        audio,
    };

    info!("Face running; reading JSON lines from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                match parse_line(&line) {
                    Ok(Some(parsed)) => {
                        if let Err(e) = inputs.dispatch(parsed) {
                            warn!("Failed to apply input: {:#}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping input: {:#}", e),
                }
            }
            Some(request) = requests.recv() => {
                println!("{}", json!({ "request": request }));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    inputs.audio.end();
    if face.shutdown().is_err() {
        warn!("Face driver already stopped");
    }
    driver.await.context("face driver panicked")?;
    drop(inputs);
    drop(face);
    printer.await.context("state printer panicked")?;
    Ok(())
}

async fn print_states(mut states: watch::Receiver<AvatarState>) {
    loop {
        let line = serde_json::to_string(&*states.borrow_and_update());
        match line {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode avatar state: {}", e),
        }
        if states.changed().await.is_err() {
            break;
        }
    }
}

async fn watch_presence(mut config: MienConfig, url: Option<String>) -> Result<()> {
    if let Some(url) = url {
        config.presence.url = url;
    }
    config.presence.auto_connect = true;

    let source = PresenceSource::spawn(&config.presence).context("failed to start presence feed")?;
    let mut snapshots = source.subscribe();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let last_update = snapshot
                    .last_signal()
                    .and_then(|s| s.last_update_at())
                    .map(|at| at.to_rfc3339());
                println!(
                    "{}",
                    json!({
                        "connected": snapshot.is_connected,
                        "present": snapshot.is_present(),
                        "faces": snapshot.face_count(),
                        "last_update": last_update,
                        "error": snapshot.last_signal().and_then(|s| s.error.clone()),
                    })
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    source.stop().await;
    Ok(())
}

fn print_config(config: &MienConfig, format: ConfigFormat) -> Result<()> {
    let rendered = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{}", rendered);
    Ok(())
}
