//! carillon - play, render and inspect MIDI files
//!
//! Subcommands:
//! - `carillon play <file> -p <program>...` - Realtime playback, events as JSON lines
//! - `carillon render <file> -p <program>... --out <wav>` - Offline render
//! - `carillon info <file>` - Tracks, event counts, lengths and tempo
//! - `carillon config` - Print the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use carillon::{
    bind_tracks, render_to_wav, BlockRenderer, LifecycleEvent, LoadMode, MidiPlayer,
    PipelineBuilder, PlayerConfig, Second, Sequence, Tick, WavSink,
};
use carillonconf::CarillonConfig;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "carillon")]
#[command(about = "MIDI sequence player")]
#[command(version)]
struct Cli {
    /// Config file replacing ./carillon.toml
    #[arg(long, global = true, env = "CARILLON_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a MIDI file in realtime
    Play {
        file: PathBuf,

        /// Program for each voice; voice i plays track i
        #[arg(short, long = "program", required = true, value_parser = clap::value_parser!(u8).range(0..=127))]
        programs: Vec<u8>,

        /// Start position in milliseconds
        #[arg(long)]
        seek_ms: Option<f64>,

        /// Also record the output to a WAV file
        #[arg(long)]
        wav: Option<PathBuf>,

        /// Play through PipeWire
        #[arg(long)]
        pipewire: bool,
    },

    /// Render a MIDI file to WAV, faster than realtime
    Render {
        file: PathBuf,

        #[arg(short, long = "program", required = true, value_parser = clap::value_parser!(u8).range(0..=127))]
        programs: Vec<u8>,

        #[arg(short, long)]
        out: PathBuf,

        /// Silence rendered after the last event, in milliseconds
        #[arg(long, default_value = "1000")]
        tail_ms: f64,
    },

    /// Describe the tracks of a MIDI file
    Info {
        file: PathBuf,

        /// Keep file tracks instead of splitting by channel
        #[arg(long)]
        preserve_tracks: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = CarillonConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    for file in &sources.files {
        info!(path = %file.display(), "config file");
    }

    match cli.command {
        Commands::Play {
            file,
            programs,
            seek_ms,
            wav,
            pipewire,
        } => play(&config, &file, &programs, seek_ms, wav, pipewire).await,
        Commands::Render {
            file,
            programs,
            out,
            tail_ms,
        } => render(&config, &file, &programs, &out, Second::from_millis(tail_ms)),
        Commands::Info {
            file,
            preserve_tracks,
        } => describe(&config, &file, preserve_tracks),
        Commands::Config => {
            print!("{}", config.to_toml());
            Ok(())
        }
    }
}

async fn play(
    config: &CarillonConfig,
    file: &Path,
    programs: &[u8],
    seek_ms: Option<f64>,
    wav: Option<PathBuf>,
    pipewire: bool,
) -> Result<()> {
    let player = MidiPlayer::new(PlayerConfig::from(config));
    let programs: Vec<String> = programs.iter().map(u8::to_string).collect();
    let path = file.to_str().context("MIDI path is not valid UTF-8")?;

    let mut events = player
        .setup(path, &programs)
        .await
        .with_context(|| format!("Failed to set up {}", file.display()))?;

    let tap = player.take_output_tap().context("Output already taken")?;
    let (sink, _stream) = match (wav, pipewire) {
        (Some(_), true) => bail!("--wav and --pipewire cannot be combined"),
        (Some(wav), false) => (Some(WavSink::spawn(tap, &wav).context("Failed to open WAV")?), None),
        (None, true) => (None, Some(open_pipewire(tap)?)),
        // Unread output fills the ring and is dropped
        (None, false) => (None, None),
    };

    if let Some(ms) = seek_ms {
        player.seek_to(&ms.to_string())?;
    }
    player.play()?;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => print_event(event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, stopping...");
                if let Err(e) = player.stop() {
                    warn!("stop failed: {}", e);
                }
            }
        }
    }

    if let Some(sink) = sink {
        let path = sink.path().to_path_buf();
        let frames = sink.finish().context("Failed to finish WAV")?;
        info!(path = %path.display(), frames, "recording saved");
    }
    Ok(())
}

#[cfg(feature = "pipewire")]
fn open_pipewire(tap: carillon::AudioTap) -> Result<carillon::PipeWireOutputStream> {
    carillon::PipeWireOutputStream::start(tap, carillon::PipeWireOutputConfig::default())
        .context("Failed to start PipeWire output")
}

#[cfg(not(feature = "pipewire"))]
fn open_pipewire(_tap: carillon::AudioTap) -> Result<()> {
    bail!("PipeWire support not compiled in (build with --features pipewire)")
}

fn print_event(event: LifecycleEvent) -> Result<()> {
    let line = serde_json::json!({
        "event": event.name(),
        "code": event.code(),
        "at": chrono::Utc::now().to_rfc3339(),
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn render(
    config: &CarillonConfig,
    file: &Path,
    programs: &[u8],
    out: &Path,
    tail: Second,
) -> Result<()> {
    let config = PlayerConfig::from(config);
    let mut sequence = Sequence::load(file, config.load_mode)
        .with_context(|| format!("Failed to load {}", file.display()))?;

    let mut pipeline = PipelineBuilder::new(config.pipeline_settings())
        .build(programs, &config.locator(), &mut sequence)
        .context("Failed to build voices")?;
    bind_tracks(&mut sequence, &pipeline)?;

    let mut tap = pipeline.take_output_tap().context("Output already taken")?;
    let compiled = pipeline.compile()?;
    let mut renderer = BlockRenderer::new(compiled, Arc::new(sequence), config.sample_rate);

    let stats = render_to_wav(&mut renderer, &mut tap, tail, out)
        .with_context(|| format!("Failed to render {}", out.display()))?;
    renderer.shutdown();

    println!(
        "{}: {} frames, {:.2}s, peak {:.3}",
        out.display(),
        stats.frames,
        stats.seconds.0,
        stats.peak
    );
    Ok(())
}

fn describe(config: &CarillonConfig, file: &Path, preserve_tracks: bool) -> Result<()> {
    let mode = if preserve_tracks {
        LoadMode::PreserveTracks
    } else {
        PlayerConfig::from(config).load_mode
    };
    let sequence =
        Sequence::load(file, mode).with_context(|| format!("Failed to load {}", file.display()))?;
    let tempo = sequence.tempo_map();

    println!("{}", file.display());
    println!(
        "  ppq {}, {:.1} bpm, {} tracks, {:.2}s",
        tempo.ppq,
        tempo.tempo_at(Tick(0)),
        sequence.track_count(),
        sequence.seconds_for_beats(sequence.longest_track()).0
    );
    for (i, track) in sequence.tracks().iter().enumerate() {
        println!(
            "  [{}] {:<24} {:>6} events  {:>8.2} beats  {:>7.2}s",
            i,
            track.name.as_deref().unwrap_or("-"),
            track.events().len(),
            track.length().0,
            sequence.seconds_for_beats(track.length()).0
        );
    }
    Ok(())
}
