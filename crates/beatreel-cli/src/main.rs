//! beatreel CLI - headless beat-synced music video assembly
//!
//! Drives a project file through scene generation and export.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use beatreel_core::core::audio::{AudioAnalysis, AudioSource};
use beatreel_core::core::ffmpeg::{detect_ffmpeg, FFmpegRunner};
use beatreel_core::core::generative::{FalProvider, GenerativeProvider};
use beatreel_core::core::jobs::{BatchReport, PoolProgress, SceneGenerator};
use beatreel_core::core::relay::FetchRelay;
use beatreel_core::core::render::{default_artifact_name, AssemblyPipeline, ExportProgress};
use beatreel_core::core::session::Session;
use beatreel_core::core::settings::{default_settings_dir, AppSettings, SettingsManager};
use beatreel_core::core::timing::BeatsPerScene;
use beatreel_core::core::AspectRatio;

/// beatreel - beat-synced music video assembly
#[derive(Parser)]
#[command(name = "beatreel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate scene clips and cut them to the beat of a song")]
#[command(long_about = r#"
Examples:
  beatreel init project.json --bpm 120 --beat-offset 0.35 --audio song.mp3 --audio-duration 182
  beatreel add-scene project.json "neon city at night" "rain on a window"
  beatreel generate project.json images
  beatreel generate project.json videos
  beatreel export project.json --output video.mp4
"#)]
struct Cli {
    /// Directory holding settings.json
    #[arg(long)]
    settings_dir: Option<PathBuf>,

    /// Also write daily-rolling logs to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project file
    Init {
        project: PathBuf,

        /// Tempo of the source audio
        #[arg(long)]
        bpm: Option<f64>,

        /// Seconds from the start of the audio to the first beat
        #[arg(long, default_value = "0")]
        beat_offset: f64,

        /// Source audio path or URL
        #[arg(long)]
        audio: Option<String>,

        /// Length of the source audio in seconds
        #[arg(long, requires = "audio")]
        audio_duration: Option<f64>,

        /// Beats each scene lasts (1 or 2)
        #[arg(long, default_value = "1")]
        beats_per_scene: u8,

        /// 16:9, 1:1 or 9:16
        #[arg(long, default_value = "16:9")]
        aspect_ratio: AspectRatio,

        /// Appended to every image prompt
        #[arg(long, default_value = "")]
        style_suffix: String,

        /// Overwrite an existing project file
        #[arg(long)]
        force: bool,
    },

    /// Append scenes to a project
    AddScene {
        project: PathBuf,

        /// One prompt per scene
        #[arg(required = true)]
        prompts: Vec<String>,
    },

    /// Run a generation batch (needs FAL_KEY)
    Generate {
        project: PathBuf,

        phase: Phase,

        /// Override the configured concurrency limit
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Retry one scene in the phase it failed in (needs FAL_KEY)
    Retry { project: PathBuf, scene_id: String },

    /// Assemble video-ready scenes into the final artifact
    Export {
        project: PathBuf,

        /// Output file; defaults to music-video-<millis>.mp4 next to the project
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show scene counts, timing and cost estimate
    Status {
        project: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Phase {
    Images,
    Videos,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "debug");
    }
    beatreel_core::init_logging(cli.log_dir.as_deref());

    let settings_dir = cli.settings_dir.clone().unwrap_or_else(default_settings_dir);
    let settings = SettingsManager::new(&settings_dir).load();

    match cli.command {
        Commands::Init {
            project,
            bpm,
            beat_offset,
            audio,
            audio_duration,
            beats_per_scene,
            aspect_ratio,
            style_suffix,
            force,
        } => {
            if project.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", project.display());
            }
            let mut session = Session::new();
            session.bpm = bpm;
            session.beat_offset = beat_offset;
            session.beats_per_scene = BeatsPerScene::try_from(beats_per_scene)?;
            session.aspect_ratio = aspect_ratio;
            session.style_suffix = style_suffix;
            session.audio = audio.map(|reference| {
                let source = AudioSource::new(reference);
                match (bpm, audio_duration) {
                    (Some(bpm), Some(duration)) => source.with_analysis(AudioAnalysis::new(
                        bpm.round() as u32,
                        beat_offset,
                        duration,
                    )),
                    _ => source,
                }
            });
            if bpm.is_some() {
                session.tempo()?;
            }
            session.save(&project)?;
            println!("Created {}", project.display());
        }

        Commands::AddScene { project, prompts } => {
            let mut session = load_session(&project)?;
            for prompt in prompts {
                let id = session.scenes.add(prompt);
                println!("{}", id);
            }
            session.save(&project)?;
        }

        Commands::Generate {
            project,
            phase,
            concurrency,
        } => {
            let mut session = load_session(&project)?;
            let mut generator = SceneGenerator::new(provider(&settings)?, &settings.generation);
            if let Some(limit) = concurrency {
                generator = generator.with_limit(limit);
            }

            let style = session.image_style();
            let board = Mutex::new(std::mem::take(&mut session.scenes));
            let checkpoint = |progress: PoolProgress| {
                print_pool_progress(progress);
                let scenes = board.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = session.checkpoint(&scenes, &project) {
                    warn!("Failed to save progress to {}: {}", project.display(), e);
                }
            };
            let result = match phase {
                Phase::Images => generator.generate_images(&board, &style, checkpoint).await,
                Phase::Videos => generator.generate_videos(&board, checkpoint).await,
            };
            session.scenes = board.into_inner().unwrap_or_else(PoisonError::into_inner);
            session.save(&project)?;
            print_report(&result?);
        }

        Commands::Retry { project, scene_id } => {
            let mut session = load_session(&project)?;
            let generator = SceneGenerator::new(provider(&settings)?, &settings.generation);

            let style = session.image_style();
            let board = Mutex::new(std::mem::take(&mut session.scenes));
            let result = generator.retry_scene(&board, &scene_id, &style).await;
            session.scenes = board.into_inner().unwrap_or_else(PoisonError::into_inner);
            session.save(&project)?;
            print_report(&result?);
        }

        Commands::Export { project, output } => {
            let mut session = load_session(&project)?;
            if !session.can_export() {
                bail!("Nothing to export: set a bpm and generate at least one clip");
            }

            let output = output.unwrap_or_else(|| {
                project_dir(&project).join(default_artifact_name(chrono::Utc::now()))
            });
            let pipeline = pipeline(&settings)?;

            let (tx, mut rx) = tokio::sync::mpsc::channel::<ExportProgress>(64);
            let printer = tokio::spawn(async move {
                while let Some(progress) = rx.recv().await {
                    println!("[{:>5.1}%] {}", progress.percent, progress.step_label);
                }
            });

            let result = pipeline
                .submit(session.export_request(output), Some(tx))
                .await;
            let _ = printer.await;

            let artifact = result?;
            println!(
                "Exported {} ({} scenes, {:.2}s)",
                artifact.path.display(),
                artifact.scene_count,
                artifact.duration_sec
            );
            session.last_artifact = Some(artifact);
            session.save(&project)?;
        }

        Commands::Status { project, json } => {
            let session = load_session(&project)?;
            print_status(&session, json)?;
        }
    }

    Ok(())
}

fn load_session(path: &Path) -> Result<Session> {
    Session::load(path).with_context(|| format!("Failed to open project {}", path.display()))
}

fn project_dir(project: &Path) -> PathBuf {
    project
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn provider(settings: &AppSettings) -> Result<Arc<dyn GenerativeProvider>> {
    let key = std::env::var("FAL_KEY").context("FAL_KEY is not set")?;
    let provider = FalProvider::new(key, &settings.generation)?;
    Ok(Arc::new(provider))
}

fn pipeline(settings: &AppSettings) -> Result<AssemblyPipeline> {
    let ffmpeg = detect_ffmpeg(&settings.ffmpeg).context("FFmpeg is required for export")?;
    info!("Using FFmpeg {} at {}", ffmpeg.version, ffmpeg.ffmpeg_path.display());

    let runner = FFmpegRunner::new(ffmpeg)
        .with_timeout(settings.export.engine_timeout_sec.map(Duration::from_secs));
    let relay = FetchRelay::new(&settings.relay)?;

    Ok(AssemblyPipeline::new(
        Arc::new(runner),
        Arc::new(relay),
        settings.export.clone(),
    ))
}

fn print_pool_progress(progress: PoolProgress) {
    println!(
        "[{:>5.1}%] {}/{} scenes",
        progress.percent(),
        progress.completed,
        progress.total
    );
}

fn print_report(report: &BatchReport) {
    println!(
        "{} batch: {} succeeded, {} failed, {} skipped",
        report.phase,
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for (id, message) in &report.failed {
        println!("  {}: {}", id, message);
    }
}

fn print_status(session: &Session, json: bool) -> Result<()> {
    let counts = session.scenes.counts();
    let cost = session.cost_estimate();

    if json {
        let value = serde_json::json!({
            "counts": counts,
            "bpm": session.bpm,
            "beatOffset": session.beat_offset,
            "sceneDuration": session.tempo().ok().and_then(|t| t.scene_duration().ok()),
            "sceneCapacity": session.scene_capacity(),
            "canExport": session.can_export(),
            "cost": cost,
            "lastArtifact": session.last_artifact,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Scenes: {}", session.scenes.len());
    println!(
        "  pending {}, generating {}, image-ready {}, video-ready {}, error {}",
        counts.pending, counts.generating, counts.image_ready, counts.video_ready, counts.error
    );
    match session.tempo() {
        Ok(tempo) => {
            let scene = tempo.scene_duration()?;
            println!(
                "Tempo: {} bpm, first beat at {:.3}s, {:.3}s per scene",
                tempo.bpm, tempo.beat_offset, scene
            );
            println!(
                "Cut length: {:.3}s",
                tempo.total_duration(counts.video_ready)?
            );
            if let Some(capacity) = session.scene_capacity() {
                println!("Audio fits {} scene(s)", capacity);
            }
        }
        Err(_) => println!("Tempo: not set"),
    }
    println!(
        "Cost: ${:.3} pending ({} images, {} videos), ${:.3} for the whole board",
        cost.pending_usd, cost.pending_images, cost.pending_videos, cost.full_usd
    );
    if let Some(artifact) = &session.last_artifact {
        println!("Last export: {}", artifact.path.display());
    }
    if !session.can_export() {
        println!("Not ready to export");
    }
    Ok(())
}
