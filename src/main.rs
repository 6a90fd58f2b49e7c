use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use duplex_voice::audio::{list_input_devices, list_output_devices};
use duplex_voice::{
    load_prompt, CpalCapture, CpalPlayback, DuplexSession, DuplexSessionConfig, JsonlTurnLog, RealtimeClient,
    SessionFeatures, Settings,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "duplex-voice", version, about = "Talk to a realtime speech model")]
struct Cli {
    /// Optional TOML settings file (environment variables take precedence)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Do not request transcripts of your speech
    #[arg(long)]
    no_transcription: bool,

    /// Do not measure time to first audio
    #[arg(long)]
    no_latency: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a conversation (default)
    Run,
    /// List audio devices and their indices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Devices) => list_devices(),
        Some(Command::Run) | None => run(&cli).await,
    }
}

fn list_devices() -> Result<()> {
    println!("Output devices:");
    for device in list_output_devices()? {
        println!("  {} - {}", device.index, device.name);
    }

    println!("\nInput devices:");
    for device in list_input_devices()? {
        println!("  {} - {}", device.index, device.name);
    }

    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    dotenvy::dotenv().ok();

    // Fixed once per process
    let started = Local::now();

    let settings = Settings::load(cli.config.as_deref())?;
    let log_path = settings.log_file_with_timestamp(started);
    let features = SessionFeatures {
        transcription: !cli.no_transcription,
        measure_latency: !cli.no_latency,
    };
    let instructions = load_prompt(&settings.prompt_file);

    // Devices first: no point connecting without them
    let audio = settings.audio_config();
    let capture = CpalCapture::open(&audio).context("Failed to open microphone")?;
    let playback = CpalPlayback::open(&audio).context("Failed to open speaker")?;

    let (sender, receiver) = RealtimeClient::connect(
        &settings.model_url,
        &settings.openai_api_key,
        settings.session_config(instructions, features),
    )
    .await?;

    println!("Connected. Speak when ready (Ctrl-C to quit).");

    let session = DuplexSession::new(DuplexSessionConfig {
        features,
        ..DuplexSessionConfig::default()
    });

    let stop = session.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping session");
            stop.raise();
        }
    });

    info!("Turn log: {}", log_path);

    let stats = session
        .run(
            Box::new(capture),
            Box::new(playback),
            Box::new(sender),
            Box::new(receiver),
            Box::new(JsonlTurnLog::new(log_path)),
        )
        .await?;

    println!(
        "Session finished: {} turns in {:.1}s ({} frames sent, {} muted).",
        stats.turns_completed, stats.duration_secs, stats.frames_sent, stats.frames_suppressed
    );

    Ok(())
}
