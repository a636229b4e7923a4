use anyhow::Context;
use clap::{Parser, ValueEnum};
use moodplayer_core::capture::ScratchImage;
use moodplayer_core::config::{
    resolve_optional_string, resolve_path_with_default, resolve_string_with_default,
    resolve_token, AnalysisCadence, AppConfig, ConfidenceGate, DetectorConfig, DispatchMode, Env,
    LibraryConfig, Mode, PlaybackConfig, SamplingConfig, StdEnv, DEFAULT_ANALYSIS_INTERVAL_MS,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_DETECTOR_URL, DEFAULT_ICON_DIR, DEFAULT_MUSIC_DIR,
    DEFAULT_PLACEHOLDER_DURATION_SECS, DEFAULT_SCRATCH_IMAGE, DEFAULT_TICK_MS, ENV_DETECTOR_TOKEN,
    ENV_DETECTOR_URL, ENV_ICON_DIR, ENV_MAPPING, ENV_MUSIC_DIR, ENV_OUTPUT_DEVICE,
};
use moodplayer_core::emotion::{DeepFaceDetector, EmotionDetector};
use moodplayer_core::playback::{
    AudioEngine, DummyAudioEngine, PlaybackController, RodioAudioEngine,
};
use moodplayer_core::present::ConsolePresenter;
use moodplayer_core::single_shot::{ShotOutcome, SingleShot};
use moodplayer_core::tracks::TrackMapping;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    #[value(name = "1", alias = "continuous")]
    Continuous,
    #[value(name = "2", alias = "single")]
    Single,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Continuous => Mode::Continuous,
            ModeArg::Single => Mode::SingleShot,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "moodplayer")]
#[command(about = "Plays music that matches the emotion on your face")]
struct Args {
    /// Skip the startup menu.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    #[arg(long)]
    music_dir: Option<PathBuf>,

    #[arg(long)]
    icon_dir: Option<PathBuf>,

    /// JSON object of emotion -> track file; relative paths are taken from the music dir.
    #[arg(long)]
    mapping: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_SCRATCH_IMAGE)]
    scratch_image: PathBuf,

    /// Analyze this file instead of capturing from the camera (single-shot mode).
    #[arg(long)]
    image: Option<PathBuf>,

    #[arg(long)]
    detector_url: Option<String>,

    #[arg(long)]
    detector_token: Option<String>,

    #[arg(long, default_value_t = DEFAULT_ANALYSIS_INTERVAL_MS)]
    analysis_interval_ms: u64,

    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence_threshold: f32,

    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    #[arg(long, default_value_t = DEFAULT_PLACEHOLDER_DURATION_SECS)]
    placeholder_duration_secs: u64,

    #[arg(long)]
    output_device: Option<String>,

    /// Run emotion analysis off the preview loop.
    #[arg(long)]
    responsive: bool,

    /// Track playback state without opening an audio device.
    #[arg(long)]
    mute: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    let Some(mode) = cfg.mode.or_else(prompt_mode) else {
        println!("Invalid option. Exiting.");
        return Ok(());
    };

    tracing::info!(
        ?mode,
        music_dir = %cfg.library.music_dir.display(),
        detector = %cfg.detector.endpoint,
        interval_ms = cfg.sampling.cadence.interval_ms,
        threshold = cfg.sampling.gate.threshold(),
        "config loaded"
    );

    if cfg.playback.mute {
        run(cfg, mode, DummyAudioEngine::new()).await
    } else {
        let mut engine = RodioAudioEngine::new();
        if let Some(name) = cfg.playback.output_device.clone() {
            engine = engine.with_output_device_name(name);
        }
        run(cfg, mode, engine).await
    }
}

fn prompt_mode() -> Option<Mode> {
    println!("Select mode:");
    println!("1. Real-time emotion music player (webcam)");
    println!("2. Single image capture and play");
    print!("Enter 1 or 2: ");
    let _ = io::stdout().flush();

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    Mode::from_choice(&line)
}

async fn run<E: AudioEngine>(cfg: AppConfig, mode: Mode, engine: E) -> anyhow::Result<()> {
    let detector: Arc<dyn EmotionDetector> = Arc::new(
        DeepFaceDetector::new(&cfg.detector).context("failed to build emotion detector")?,
    );
    let tracks = load_tracks(&cfg.library)?;
    let player = PlaybackController::new(engine, cfg.playback.placeholder_duration);
    let mut presenter = ConsolePresenter::spawn_stdin().context("failed to read console input")?;
    let scratch = ScratchImage::new(cfg.scratch_image.clone());

    match mode {
        Mode::Continuous => {
            presenter.print_help(false);
            run_continuous(cfg, detector, tracks, player, presenter, scratch).await
        }
        Mode::SingleShot => {
            presenter.print_help(true);
            let mut shot = SingleShot::new(detector, tracks, player, presenter);
            let image = match cfg.still_image {
                Some(image) => image,
                None => match capture_still(&mut shot, &scratch, cfg.sampling.tick).await? {
                    Some(image) => image,
                    None => return Ok(()),
                },
            };
            match shot.run(image).await {
                ShotOutcome::Finished => tracing::info!("track finished"),
                outcome => tracing::info!(?outcome, "single shot ended"),
            }
            Ok(())
        }
    }
}

fn load_tracks(library: &LibraryConfig) -> anyhow::Result<TrackMapping> {
    let tracks = match &library.mapping_file {
        Some(path) => TrackMapping::from_json_file(path, &library.music_dir)?,
        None => TrackMapping::builtin(&library.music_dir),
    };
    Ok(tracks.with_icon_dir(library.icon_dir.clone()))
}

#[cfg(feature = "webcam")]
async fn run_continuous<E: AudioEngine>(
    cfg: AppConfig,
    detector: Arc<dyn EmotionDetector>,
    tracks: TrackMapping,
    player: PlaybackController<E>,
    presenter: ConsolePresenter,
    scratch: ScratchImage,
) -> anyhow::Result<()> {
    use moodplayer_core::capture::WebcamSource;
    use moodplayer_core::sampling::SamplingLoop;

    let camera = WebcamSource::open_default().context("cannot access webcam")?;
    let sampler = SamplingLoop::new(
        camera,
        detector,
        tracks,
        player,
        presenter,
        scratch,
        cfg.sampling,
    );
    sampler.run().await?;
    Ok(())
}

#[cfg(not(feature = "webcam"))]
async fn run_continuous<E: AudioEngine>(
    _cfg: AppConfig,
    _detector: Arc<dyn EmotionDetector>,
    _tracks: TrackMapping,
    _player: PlaybackController<E>,
    _presenter: ConsolePresenter,
    _scratch: ScratchImage,
) -> anyhow::Result<()> {
    anyhow::bail!("continuous mode needs a webcam; rebuild with the `webcam` feature")
}

#[cfg(feature = "webcam")]
async fn capture_still<E: AudioEngine>(
    shot: &mut SingleShot<E, ConsolePresenter>,
    scratch: &ScratchImage,
    tick: Duration,
) -> anyhow::Result<Option<PathBuf>> {
    use moodplayer_core::capture::WebcamSource;

    let mut camera = WebcamSource::open_default().context("cannot access webcam")?;
    Ok(shot.capture(&mut camera, scratch, tick).await?)
}

#[cfg(not(feature = "webcam"))]
async fn capture_still<E: AudioEngine>(
    _shot: &mut SingleShot<E, ConsolePresenter>,
    _scratch: &ScratchImage,
    _tick: Duration,
) -> anyhow::Result<Option<PathBuf>> {
    anyhow::bail!("no camera support in this build; pass --image instead")
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let token = resolve_token(args.detector_token, ENV_DETECTOR_TOKEN, env)?;
    let detector_url = resolve_string_with_default(
        args.detector_url,
        ENV_DETECTOR_URL,
        env,
        DEFAULT_DETECTOR_URL,
    );
    let detector = DetectorConfig::new(&detector_url, token)?;

    let sampling = SamplingConfig {
        cadence: AnalysisCadence::new(args.analysis_interval_ms)?,
        gate: ConfidenceGate::new(args.confidence_threshold)?,
        dispatch: if args.responsive {
            DispatchMode::Worker
        } else {
            DispatchMode::Inline
        },
        ..SamplingConfig::default()
    }
    .with_tick_ms(args.tick_ms)?;

    let library = LibraryConfig {
        music_dir: resolve_path_with_default(args.music_dir, ENV_MUSIC_DIR, env, DEFAULT_MUSIC_DIR),
        icon_dir: resolve_path_with_default(args.icon_dir, ENV_ICON_DIR, env, DEFAULT_ICON_DIR),
        mapping_file: args
            .mapping
            .or_else(|| env.var(ENV_MAPPING).map(PathBuf::from)),
    };

    let playback = PlaybackConfig {
        placeholder_duration: Duration::from_secs(args.placeholder_duration_secs),
        output_device: resolve_optional_string(args.output_device, ENV_OUTPUT_DEVICE, env),
        mute: args.mute,
    };

    let mode = match (args.mode, &args.image) {
        (Some(mode), _) => Some(mode.into()),
        // A still image only makes sense for single-shot.
        (None, Some(_)) => Some(Mode::SingleShot),
        (None, None) => None,
    };

    Ok(AppConfig {
        mode,
        library,
        detector,
        sampling,
        playback,
        scratch_image: args.scratch_image,
        still_image: args.image,
    })
}
