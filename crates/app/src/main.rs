mod demo;

use std::{path::PathBuf, sync::Arc, time::Duration};

use audio_reactive_core::{
    platform::headless::{
        self, HeadlessAudioPlatform, HeadlessCanvas, ManualFrameScheduler, SyntheticMediaDevices,
        ToneTrack,
    },
    render::CanvasRef,
    Engine, EngineConfig, EngineError, ErrorCallback, LibraryCandidate, PresetLibrary, Result,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Devices => list_devices().await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let presets = match &args.presets {
        Some(path) => PresetLibrary::from_path(path)?,
        None => PresetLibrary::from_json_str(demo::BUILTIN_PRESETS)?,
    };
    tracing::info!(
        frames = args.frames,
        library = ?args.library,
        source = ?args.source,
        "starting headless run"
    );

    let scheduler = Arc::new(ManualFrameScheduler::new());
    let devices = Arc::new(SyntheticMediaDevices::new());
    let audio = HeadlessAudioPlatform::new(48_000);
    let platform = headless::platform(audio, devices, scheduler.clone());

    let engine = Engine::new(platform, config, report_errors());
    engine.set_presets(presets.into_entries());
    engine.set_media_element(Some(Arc::new(ToneTrack::new("demo-track", 330.0, 48_000))));

    let canvas: CanvasRef = Arc::new(HeadlessCanvas::new(
        args.width,
        args.height,
        args.pixel_ratio,
    ));
    if let Some(name) = &args.preset {
        engine.set_preset(name);
    }
    engine.initialize(args.library.candidate(), canvas);

    let attached = match args.source {
        SourceArg::Mic => engine.attach_microphone(args.device.clone()).await,
        SourceArg::System => engine.attach_system_capture().await,
        SourceArg::Element => engine.attach_media_element(),
        SourceArg::None => false,
    };
    tracing::info!(attached, "audio source ready");

    let names = engine.preset_names();
    for frame in 0..args.frames {
        let cycle = args.cycle_every > 0 && frame > 0 && frame % args.cycle_every == 0;
        if cycle && !names.is_empty() {
            let next = &names[(frame / args.cycle_every) as usize % names.len()];
            engine.set_preset(next);
        }
        scheduler.pump();
        tokio::time::sleep(FRAME_INTERVAL).await;
    }

    let status = serde_json::to_string_pretty(&engine.status())?;
    println!("{status}");
    engine.teardown();
    Ok(())
}

async fn list_devices() -> Result<()> {
    let platform = headless::platform(
        HeadlessAudioPlatform::new(48_000),
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(ManualFrameScheduler::new()),
    );
    let engine = Engine::new(platform, EngineConfig::default(), report_errors());
    for device in engine.list_audio_inputs().await {
        println!("{}\t{}", device.device_id, device.label);
    }
    Ok(())
}

fn report_errors() -> ErrorCallback {
    Arc::new(|err: &EngineError| match err.kind() {
        Some(kind) => tracing::error!(%kind, detail = %err, "{}", kind.user_message()),
        None => tracing::error!("{err}"),
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive visualisation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the engine against the headless platform and print its status.
    Run(RunArgs),
    /// List the audio input devices the host reports.
    Devices,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Number of frames to render before tearing down.
    #[arg(long, default_value_t = 180)]
    frames: u64,
    /// Preset selected before the visualizer is built.
    #[arg(short, long)]
    preset: Option<String>,
    /// JSON file mapping preset names to payloads.
    #[arg(long)]
    presets: Option<PathBuf>,
    /// JSON engine configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = SourceArg::Mic)]
    source: SourceArg,
    /// Input device id for `--source mic`.
    #[arg(long)]
    device: Option<String>,
    #[arg(long, value_enum, default_value_t = LibraryArg::Demo)]
    library: LibraryArg,
    /// Switch to the next preset every N frames; 0 disables cycling.
    #[arg(long, default_value_t = 0)]
    cycle_every: u64,
    #[arg(long, default_value_t = 640.0)]
    width: f64,
    #[arg(long, default_value_t = 360.0)]
    height: f64,
    #[arg(long, default_value_t = 1.0)]
    pixel_ratio: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    Mic,
    System,
    Element,
    None,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LibraryArg {
    /// Bundled spectrum visualizer.
    Demo,
    /// Same library wrapped in a module namespace.
    Module,
    /// No library loaded; exercises the fallback renderer.
    Missing,
}

impl LibraryArg {
    fn candidate(self) -> LibraryCandidate {
        match self {
            Self::Demo => LibraryCandidate::callable(demo::SpectrumLibrary),
            Self::Module => {
                LibraryCandidate::wrapped(LibraryCandidate::callable(demo::SpectrumLibrary))
            }
            Self::Missing => LibraryCandidate::Missing,
        }
    }
}
