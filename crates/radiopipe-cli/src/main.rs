//! radiopipe CLI: play a stream through the pipeline and dump the PCM

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use radiopipe::audio::{AudioOutput, PlaybackSession, PlaybackState, PlayerEvent};
use radiopipe::config::PlayerConfig;
use radiopipe::station::{AudioFormat, RadioStation};

/// Host loop cadence
const TICK_INTERVAL: Duration = Duration::from_millis(50);
/// Audio pull period of the output thread
const PULL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Mp3,
    Ogg,
}

impl From<Format> for AudioFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Mp3 => AudioFormat::Mp3,
            Format::Ogg => AudioFormat::Ogg,
        }
    }
}

#[derive(Parser)]
#[command(name = "radiopipe", about = "Internet radio ingest and decode pipeline", version)]
struct Cli {
    /// Stream URL to play
    url: String,

    /// Container format of the stream
    #[arg(short, long, value_enum, default_value = "mp3")]
    format: Format,

    /// Station name shown until the server sends one
    #[arg(long, default_value = "")]
    name: String,

    /// Announced bitrate in kbit/s
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Do not request ICY metadata
    #[arg(long)]
    legacy: bool,

    /// Start audio after a short delay instead of filling the pre-buffer
    #[arg(long)]
    skip_prebuffer: bool,

    /// JSON file with player settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write interleaved f32 little-endian PCM here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => PlayerConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => PlayerConfig::default(),
    };
    config.legacy_mode |= cli.legacy;
    config.skip_pre_buffering |= cli.skip_prebuffer;

    let mut station = RadioStation::new(cli.name.as_str(), cli.url.as_str(), cli.format.into());
    if let Some(bitrate) = cli.bitrate {
        station.bitrate = bitrate;
    }
    let station = station.shared();

    let mut session = PlaybackSession::with_defaults(config)?;
    let events = session.events();
    session.play(station.clone())?;

    let running = Arc::new(AtomicBool::new(true));
    let sink: Box<dyn Write + Send> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::sink()),
    };
    let puller = spawn_puller(session.audio_output(), sink, running.clone())?;

    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        session.tick();
        report_events(&events);

        let finished = matches!(session.state(), PlaybackState::Stopped | PlaybackState::Error);
        if finished && !session.restart_pending() {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            session.stop();
            report_events(&events);
            break;
        }
        thread::sleep(TICK_INTERVAL);
    }

    running.store(false, Ordering::SeqCst);
    let written = puller.join().unwrap_or(0);

    if let Ok(st) = station.lock() {
        tracing::info!(
            station = %st.name,
            play_time = st.total_play_time,
            bytes = st.total_data_size,
            records = st.played_records.len(),
            samples = written,
            "session summary"
        );
        for record in &st.played_records {
            println!("{:>7.1}s  {}", record.duration, record.info);
        }
    }

    if let Some(stats) = session.decoder_stats() {
        let (frames, errors, underruns) = stats.snapshot();
        tracing::info!(frames, errors, underruns, "decoder summary");
    }

    match session.last_error() {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

/// Pull PCM at the output's real-time rate, like an audio callback would.
fn spawn_puller(
    output: AudioOutput,
    mut sink: Box<dyn Write + Send>,
    running: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<u64>> {
    thread::Builder::new()
        .name("radio-output".to_string())
        .spawn(move || {
            let mut written = 0u64;
            let mut buf = Vec::new();
            while running.load(Ordering::SeqCst) {
                thread::sleep(PULL_INTERVAL);
                let Some((rate, channels)) = output.format() else {
                    continue;
                };
                let frames = (rate as f64 * PULL_INTERVAL.as_secs_f64()) as usize;
                buf.resize(frames * channels as usize, 0.0);

                let n = output.pull_samples(&mut buf);
                written += n as u64;
                let bytes: Vec<u8> = buf.iter().flat_map(|s| s.to_le_bytes()).collect();
                if let Err(e) = sink.write_all(&bytes) {
                    tracing::error!(error = %e, "PCM output failed");
                    break;
                }
            }
            if let Err(e) = sink.flush() {
                tracing::error!(error = %e, "PCM output failed");
            }
            written
        })
}

fn report_events(events: &Receiver<PlayerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            PlayerEvent::BufferingProgress { progress, .. } => {
                tracing::debug!("buffering {:.0}%", progress * 100.0);
            }
            PlayerEvent::RecordChanged { record, .. } => {
                tracing::info!("now playing: {}", record.info);
            }
            PlayerEvent::NextRecordChanged { record, .. } => {
                tracing::debug!("up next: {}", record.info);
            }
            PlayerEvent::AudioPlayTime { .. }
            | PlayerEvent::RecordPlayTime { .. }
            | PlayerEvent::NextRecordDelayUpdated { .. } => {
                tracing::trace!(?event, "timer");
            }
            PlayerEvent::Error { message, .. } => {
                tracing::error!("{}", message);
            }
            other => tracing::info!("{:?}", other),
        }
    }
}
