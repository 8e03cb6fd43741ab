use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use clap::Parser;
use home::home_dir;
use tracing::Level;

use crate::{
    config::PeekabooConfig,
    singalong::{
        handler::SingAlongHandler,
        schedule::RuntimeClock,
        sequencer::Sequencer,
        speech::{Speech, VoiceHints},
        tui_backend::TerminalUiBackend,
        Song,
    },
};

mod config;
mod event;
mod singalong;

/// A peekaboo buddy that sings nursery rhymes in your terminal.
#[derive(Parser, Debug)]
#[command(name = "peekaboo", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/peekaboo/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Song file (TOML, or JSON by extension) to sing instead of the built-in rhyme.
    #[arg(long)]
    song: Option<PathBuf>,

    /// Sing without text-to-speech.
    #[arg(long)]
    mute: bool,

    /// Start singing right away.
    #[arg(long)]
    autoplay: bool,

    /// Log file (defaults to ~/.cache/peekaboo/peekaboo.log).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Also log every segment switch.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref(), cli.verbose);

    let mut config = PeekabooConfig::load(cli.config.as_deref()).await?;
    if cli.mute {
        config.speech.enabled = false;
    }

    let song = match cli.song.as_deref().or(config.song.as_deref()) {
        Some(path) => Song::load(path).await?,
        None => Song::johny_johny(),
    };

    let hints = VoiceHints::from_config(&config.speech)?;
    let speech = Speech::detect(&config.speech, &hints);
    tracing::info!(
        "Ready to sing {:?} ({})",
        song.title,
        if speech.is_available() { "aloud" } else { "silently" }
    );
    let frame_interval = Duration::from_millis(config.playback.frame_interval_ms);

    let clock = RuntimeClock::new();
    let sequencer = Sequencer::new(song.timeline.clone(), clock, speech, hints, frame_interval);
    let backend = TerminalUiBackend::new(config.theme.clone(), frame_interval);

    SingAlongHandler::new(backend, song, sequencer, clock)
        .run(cli.autoplay || config.playback.autoplay)
        .await
}

/// The terminal belongs to the UI, so logs go to a file. Without a usable
/// file there is simply no logging.
fn init_logging(path: Option<&Path>, verbose: bool) {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match home_dir() {
            Some(home) => home.join(".cache").join("peekaboo").join("peekaboo.log"),
            None => return,
        },
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) {
        tracing_subscriber::fmt()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
}
