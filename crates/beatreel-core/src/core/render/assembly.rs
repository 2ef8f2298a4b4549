//! Media Assembly Pipeline
//!
//! One export job: retime every clip to the scene duration, join them by
//! stream copy, re-encode once to the exact expected length, then mux the
//! source audio seeked to the first beat. Stages run strictly in order, and
//! each one must fully produce its output before the next reads it. The
//! finished file is published atomically; a failed job leaves nothing at the
//! output path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use tracing::{error, info, warn};

use super::args::*;
use super::{ExportProgress, ExportStage, ExportState, ExportTracker, ExportWorkspace};
use crate::core::audio::{AudioAnalysis, AudioSource};
use crate::core::ffmpeg::TranscodeEngine;
use crate::core::fs::publish_file;
use crate::core::relay::MediaFetcher;
use crate::core::scenes::Scene;
use crate::core::settings::ExportSettings;
use crate::core::timing::{muxed_duration, playback_rate, TempoDescriptor};
use crate::core::{AspectRatio, CoreError, CoreResult, ExportJobId, TimeSec};

/// Default artifact file name for a given instant
pub fn default_artifact_name(now: DateTime<Utc>) -> String {
    format!("music-video-{}.mp4", now.timestamp_millis())
}

/// One export attempt
#[derive(Clone, Debug)]
pub struct ExportRequest {
    /// Video-ready scenes in final cut order
    pub scenes: Vec<Scene>,
    /// Missing when no tempo has been detected yet
    pub tempo: Option<TempoDescriptor>,
    pub aspect_ratio: AspectRatio,
    /// Source audio; without it the video is passed through silent
    pub audio: Option<AudioSource>,
    /// Where the finished artifact is published
    pub output_path: PathBuf,
}

impl ExportRequest {
    /// Rejects requests no engine call should be made for.
    pub fn validate(&self) -> CoreResult<TempoDescriptor> {
        let tempo = self.tempo.ok_or(CoreError::MissingTempo)?;
        tempo.validate()?;

        if self.scenes.is_empty() {
            return Err(CoreError::NoReadyScenes);
        }
        if let Some(scene) = self.scenes.iter().find(|s| !s.is_video_ready()) {
            return Err(CoreError::ValidationError(format!(
                "Scene {} is {}, not video-ready",
                scene.id, scene.status
            )));
        }
        if self.output_path.file_name().is_none() {
            return Err(CoreError::ValidationError(format!(
                "Output path has no file name: {}",
                self.output_path.display()
            )));
        }
        if let Some(audio) = &self.audio {
            if audio.reference.trim().is_empty() {
                return Err(CoreError::ValidationError(
                    "Audio reference is empty".to_string(),
                ));
            }
            if let Some(analysis) = &audio.analysis {
                analysis.validate()?;
                check_tempo_matches(&tempo, analysis)?;
            }
        }
        Ok(tempo)
    }
}

/// The tempo must describe the audio it is muxed with, and the first beat must
/// fall inside that audio.
fn check_tempo_matches(tempo: &TempoDescriptor, analysis: &AudioAnalysis) -> CoreResult<()> {
    if (tempo.bpm - f64::from(analysis.bpm)).abs() > BPM_TOLERANCE {
        return Err(CoreError::ValidationError(format!(
            "Tempo of {} bpm does not match the analyzed {} bpm",
            tempo.bpm, analysis.bpm
        )));
    }
    if (tempo.beat_offset - analysis.beat_offset_seconds).abs() > OFFSET_TOLERANCE_SEC {
        return Err(CoreError::ValidationError(format!(
            "Beat offset {:.3}s does not match the analyzed {:.3}s",
            tempo.beat_offset, analysis.beat_offset_seconds
        )));
    }
    if tempo.beat_offset >= analysis.duration_seconds {
        return Err(CoreError::ValidationError(format!(
            "Beat offset {:.3}s is past the end of {:.3}s of audio",
            tempo.beat_offset, analysis.duration_seconds
        )));
    }
    Ok(())
}

/// Analysis reports whole bpm
const BPM_TOLERANCE: f64 = 0.5;
const OFFSET_TOLERANCE_SEC: f64 = 1e-6;

/// The published result of a successful export
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub job_id: ExportJobId,
    pub path: PathBuf,
    pub scene_count: usize,
    pub scene_duration: TimeSec,
    /// Length of the drift-corrected video
    pub video_duration: TimeSec,
    /// Expected length of the artifact after muxing
    pub duration_sec: TimeSec,
    pub has_audio: bool,
    pub aspect_ratio: AspectRatio,
    pub created_at: DateTime<Utc>,
}

/// Runs export jobs against a transcoding engine
pub struct AssemblyPipeline {
    engine: Arc<dyn TranscodeEngine>,
    fetcher: Arc<dyn MediaFetcher>,
    settings: ExportSettings,
}

impl AssemblyPipeline {
    pub fn new(
        engine: Arc<dyn TranscodeEngine>,
        fetcher: Arc<dyn MediaFetcher>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            engine,
            fetcher,
            settings,
        }
    }

    /// Runs one export job to completion or to its first failure.
    ///
    /// Validation failures return before any engine call. Any later failure
    /// moves the job to `Error`, emits a final progress event and leaves no
    /// artifact behind. Nothing is retried.
    pub async fn submit(
        &self,
        request: ExportRequest,
        progress_tx: Option<Sender<ExportProgress>>,
    ) -> CoreResult<ExportArtifact> {
        let tempo = request.validate()?;
        let job_id = ulid::Ulid::new().to_string();
        info!(
            "Export {} started: {} scene(s) at {} bpm",
            job_id,
            request.scenes.len(),
            tempo.bpm
        );

        let workspace = ExportWorkspace::create(&job_id, self.settings.scratch_dir.as_deref())?;
        let mut job = ExportJob {
            pipeline: self,
            tracker: ExportTracker::new(job_id.clone(), request.scenes.len()),
            workspace,
            progress_tx,
            stage: ExportStage::Retiming,
        };
        job.emit().await;

        let result = job.run(&request, &tempo).await;
        let result = match result {
            Ok(artifact) => {
                info!(
                    "Export {} complete: {} ({:.3}s)",
                    job_id,
                    artifact.path.display(),
                    artifact.duration_sec
                );
                Ok(artifact)
            }
            Err(e) => {
                error!("Export {} failed during {}: {}", job_id, job.stage, e);
                job.tracker.fail(job.stage, e.to_string());
                job.emit().await;
                Err(e)
            }
        };

        let ExportJob { workspace, .. } = job;
        if let Err(e) = workspace.close() {
            warn!("Export {} left scratch files behind: {}", job_id, e);
        }
        result
    }
}

struct ExportJob<'a> {
    pipeline: &'a AssemblyPipeline,
    tracker: ExportTracker,
    workspace: ExportWorkspace,
    progress_tx: Option<Sender<ExportProgress>>,
    stage: ExportStage,
}

impl ExportJob<'_> {
    fn settings(&self) -> &ExportSettings {
        &self.pipeline.settings
    }

    async fn emit(&self) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(self.tracker.snapshot()).await;
        }
    }

    async fn enter(&mut self, state: ExportState, stage: ExportStage) -> CoreResult<()> {
        self.stage = stage;
        self.tracker.advance(state)?;
        self.emit().await;
        Ok(())
    }

    async fn step_done(&mut self) {
        self.tracker.complete_step();
        self.emit().await;
    }

    async fn exec(&self, args: Vec<String>) -> CoreResult<()> {
        self.pipeline
            .engine
            .run(self.workspace.path(), &args)
            .await
            .map_err(|e| CoreError::stage(self.stage, e))
    }

    async fn fetch_into(&self, reference: &str, name: &str) -> CoreResult<PathBuf> {
        let response = self.pipeline.fetcher.fetch(reference).await?;
        if response.bytes.is_empty() {
            return Err(CoreError::stage(
                self.stage,
                format!("{} returned no data", reference),
            ));
        }
        self.workspace.write(name, &response.bytes).await
    }

    async fn run(
        &mut self,
        request: &ExportRequest,
        tempo: &TempoDescriptor,
    ) -> CoreResult<ExportArtifact> {
        let scene_duration = tempo.scene_duration()?;
        let expected_total = tempo.total_duration(request.scenes.len())?;
        let total = request.scenes.len();

        let mut processed = Vec::with_capacity(total);
        for (index, scene) in request.scenes.iter().enumerate() {
            self.enter(
                ExportState::Retiming {
                    index: index + 1,
                    total,
                },
                ExportStage::Retiming,
            )
            .await?;
            processed.push(self.retime(index, scene, scene_duration).await?);
            self.step_done().await;
        }

        self.enter(ExportState::Concatenating, ExportStage::Concatenating)
            .await?;
        self.workspace
            .write(CONCAT_MANIFEST, concat_manifest(&processed).as_bytes())
            .await?;
        self.exec(concat_args(CONCAT_MANIFEST, CONCATENATED_RAW))
            .await?;
        self.workspace
            .require_output(CONCATENATED_RAW, ExportStage::Concatenating)
            .await?;
        self.step_done().await;

        self.enter(ExportState::DriftCorrecting, ExportStage::DriftCorrecting)
            .await?;
        self.exec(drift_correct_args(
            CONCATENATED_RAW,
            CONCATENATED,
            expected_total,
            self.settings(),
        ))
        .await?;
        let corrected = self
            .workspace
            .require_output(CONCATENATED, ExportStage::DriftCorrecting)
            .await?;
        self.check_corrected_duration(&corrected, expected_total)
            .await;
        self.step_done().await;

        self.enter(ExportState::Muxing, ExportStage::Muxing).await?;
        let args = match &request.audio {
            Some(audio) => {
                let name = audio_input_name(&audio.extension());
                self.fetch_into(&audio.reference, &name).await?;
                mux_args(
                    CONCATENATED,
                    &name,
                    tempo.beat_offset,
                    FINAL_OUTPUT,
                    self.settings(),
                )
            }
            None => passthrough_args(CONCATENATED, FINAL_OUTPUT),
        };
        self.exec(args).await?;
        let final_path = self
            .workspace
            .require_output(FINAL_OUTPUT, ExportStage::Muxing)
            .await?;
        self.step_done().await;

        self.stage = ExportStage::Publishing;
        let path = publish(final_path, request.output_path.clone()).await?;
        self.tracker.advance(ExportState::Complete)?;
        self.emit().await;

        let duration_sec = match request.audio.as_ref().and_then(|a| a.analysis.as_ref()) {
            Some(analysis) => {
                muxed_duration(expected_total, analysis.duration_seconds, tempo.beat_offset)
            }
            None => expected_total,
        };

        Ok(ExportArtifact {
            job_id: self.tracker.snapshot().job_id,
            path,
            scene_count: total,
            scene_duration,
            video_duration: expected_total,
            duration_sec,
            has_audio: request.audio.is_some(),
            aspect_ratio: request.aspect_ratio,
            created_at: Utc::now(),
        })
    }

    async fn retime(&self, index: usize, scene: &Scene, target: TimeSec) -> CoreResult<String> {
        let url = scene.video_url.as_deref().ok_or_else(|| {
            CoreError::stage(ExportStage::Retiming, format!("Scene {} has no clip", scene.id))
        })?;

        let input = input_clip_name(index);
        let input_path = self.fetch_into(url, &input).await?;
        let source = self.source_duration(&input_path).await?;
        let rate = playback_rate(source, target).map_err(|e| CoreError::stage(self.stage, e))?;

        let output = processed_clip_name(index);
        self.exec(retime_args(&input, &output, rate, target)).await?;
        self.workspace
            .require_output(&output, ExportStage::Retiming)
            .await?;
        Ok(output)
    }

    /// Configured clip length, or the measured one when probing is enabled.
    async fn source_duration(&self, input: &Path) -> CoreResult<TimeSec> {
        let configured = self.settings().source_clip_duration_sec;
        if !self.settings().probe_source_clips {
            return Ok(configured);
        }

        let info = self
            .pipeline
            .engine
            .probe(input)
            .await
            .map_err(|e| CoreError::stage(self.stage, e))?;
        if !info.has_video() {
            return Err(CoreError::stage(
                self.stage,
                format!("{} has no video stream", input.display()),
            ));
        }
        if !info.duration_sec.is_finite() || info.duration_sec <= 0.0 {
            return Err(CoreError::stage(
                self.stage,
                format!("{} has no measurable duration", input.display()),
            ));
        }

        let frame = 1.0 / f64::from(self.settings().output_fps);
        if (info.duration_sec - configured).abs() > frame {
            warn!(
                "Clip {} runs {:.3}s, expected {:.3}s; retiming from measured length",
                input.display(),
                info.duration_sec,
                configured
            );
        }
        Ok(info.duration_sec)
    }

    async fn check_corrected_duration(&self, corrected: &Path, expected: TimeSec) {
        if !self.settings().verify_corrected_duration {
            return;
        }
        match self.pipeline.engine.probe(corrected).await {
            Ok(info) => {
                let frame = 1.0 / f64::from(self.settings().output_fps);
                if (info.duration_sec - expected).abs() > frame {
                    warn!(
                        "Corrected video runs {:.3}s, expected {:.3}s",
                        info.duration_sec, expected
                    );
                }
            }
            Err(e) => warn!("Could not measure corrected video: {}", e),
        }
    }
}

async fn publish(src: PathBuf, dest: PathBuf) -> CoreResult<PathBuf> {
    tokio::task::spawn_blocking(move || publish_file(&src, &dest))
        .await
        .map_err(|e| CoreError::Internal(format!("Publish task failed: {}", e)))?
        .map_err(|e| CoreError::stage(ExportStage::Publishing, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ffmpeg::{FFmpegError, FFmpegResult, MediaInfo, VideoStreamInfo};
    use crate::core::relay::{RelayError, RelayResponse, RelayResult};
    use crate::core::scenes::GenerationPhase;
    use crate::core::timing::BeatsPerScene;
    use crate::core::ErrorClass;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every invocation and writes a placeholder output file.
    #[derive(Default)]
    struct MockEngine {
        calls: Mutex<Vec<Vec<String>>>,
        cwds: Mutex<Vec<PathBuf>>,
        manifests: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
        probes: Mutex<Vec<PathBuf>>,
        probe_duration: Option<f64>,
        no_video: bool,
    }

    impl MockEngine {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        fn joined(&self) -> Vec<String> {
            self.calls().iter().map(|c| c.join(" ")).collect()
        }
    }

    #[async_trait]
    impl TranscodeEngine for MockEngine {
        async fn run(&self, cwd: &Path, args: &[String]) -> FFmpegResult<()> {
            self.calls.lock().unwrap().push(args.to_vec());
            self.cwds.lock().unwrap().push(cwd.to_path_buf());

            if let Some(pos) = args.iter().position(|a| a == "concat") {
                let manifest = &args[pos + 4];
                let content = std::fs::read_to_string(cwd.join(manifest))?;
                self.manifests.lock().unwrap().push(content);
            }
            if let Some(marker) = self.fail_on {
                if args.iter().any(|a| a.contains(marker)) {
                    return Err(FFmpegError::ExecutionFailed("exit status: 1".into()));
                }
            }
            let output = args.last().expect("output argument");
            std::fs::write(cwd.join(output), b"media")?;
            Ok(())
        }

        async fn probe(&self, path: &Path) -> FFmpegResult<MediaInfo> {
            self.probes.lock().unwrap().push(path.to_path_buf());
            Ok(MediaInfo {
                duration_sec: self.probe_duration.unwrap_or(1.0),
                video: (!self.no_video).then(|| VideoStreamInfo {
                    width: 1280,
                    height: 720,
                    fps: 24.0,
                    codec: "h264".into(),
                }),
                has_audio: false,
                format: "mp4".into(),
            })
        }
    }

    /// Serves canned bytes by reference.
    #[derive(Default)]
    struct MockFetcher {
        media: HashMap<String, Vec<u8>>,
        timeout_on: Option<&'static str>,
    }

    #[async_trait]
    impl MediaFetcher for MockFetcher {
        async fn fetch(&self, reference: &str) -> RelayResult<RelayResponse> {
            if self.timeout_on == Some(reference) {
                return Err(RelayError::Timeout {
                    url: reference.to_string(),
                    timeout_sec: 10,
                });
            }
            match self.media.get(reference) {
                Some(bytes) => Ok(RelayResponse {
                    bytes: bytes.clone(),
                    content_type: "video/mp4".into(),
                }),
                None => Err(RelayError::Status {
                    url: reference.to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn ready_scene(i: usize) -> Scene {
        let mut scene = Scene::new(format!("scene {i}"));
        scene.begin(GenerationPhase::Image).unwrap();
        scene.complete(GenerationPhase::Image, format!("https://cdn/img{i}.png")).unwrap();
        scene.begin(GenerationPhase::Video).unwrap();
        scene.complete(GenerationPhase::Video, format!("https://cdn/clip{i}.mp4")).unwrap();
        scene
    }

    fn fetcher_for(scenes: &[Scene]) -> MockFetcher {
        let mut media: HashMap<String, Vec<u8>> = scenes
            .iter()
            .map(|s| (s.video_url.clone().unwrap(), b"clip".to_vec()))
            .collect();
        media.insert("https://cdn/song.mp3".into(), b"ID3".to_vec());
        MockFetcher {
            media,
            timeout_on: None,
        }
    }

    fn request(scenes: Vec<Scene>, bpm: f64, offset: f64, out: &Path) -> ExportRequest {
        ExportRequest {
            scenes,
            tempo: Some(TempoDescriptor::new(bpm, offset, BeatsPerScene::One).unwrap()),
            aspect_ratio: AspectRatio::Landscape,
            audio: Some(
                AudioSource::new("https://cdn/song.mp3")
                    .with_analysis(AudioAnalysis::new(bpm as u32, offset, 10.0)),
            ),
            output_path: out.join("music-video.mp4"),
        }
    }

    fn pipeline(engine: Arc<MockEngine>, fetcher: MockFetcher) -> AssemblyPipeline {
        AssemblyPipeline::new(engine, Arc::new(fetcher), ExportSettings::default())
    }

    async fn drain(mut rx: tokio::sync::mpsc::Receiver<ExportProgress>) -> Vec<ExportProgress> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_four_scenes_at_100_bpm() {
        let out = TempDir::new().unwrap();
        let scenes: Vec<Scene> = (0..4).map(ready_scene).collect();
        let engine = Arc::new(MockEngine::default());
        let pipeline = pipeline(engine.clone(), fetcher_for(&scenes));

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let artifact = pipeline
            .submit(request(scenes, 100.0, 0.2, out.path()), Some(tx))
            .await
            .unwrap();

        assert!((artifact.scene_duration - 0.6).abs() < 1e-9);
        assert!((artifact.video_duration - 2.4).abs() < 1e-9);
        assert!((artifact.duration_sec - 2.4).abs() < 1e-9);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"media");

        let calls = engine.joined();
        assert_eq!(calls.len(), 7);
        for (i, call) in calls[..4].iter().enumerate() {
            assert_eq!(
                *call,
                format!(
                    "-i input_{i}.mp4 -filter:v setpts=0.6000*PTS -t 0.6000 -an -y processed_{i}.mp4"
                )
            );
        }
        assert_eq!(
            calls[4],
            "-f concat -safe 0 -i concat.txt -c copy -y concatenated_raw.mp4"
        );
        assert!(calls[5].contains("-t 2.4000"));
        assert!(calls[5].contains("-r 30"));
        assert!(calls[6].starts_with("-i concatenated.mp4 -ss 0.200 -i audio.mp3"));

        assert_eq!(
            engine.manifests.lock().unwrap()[0],
            "file 'processed_0.mp4'\nfile 'processed_1.mp4'\nfile 'processed_2.mp4'\nfile 'processed_3.mp4'"
        );

        // Every stage ran in the same scratch dir, which is gone now
        let cwds = engine.cwds.lock().unwrap().clone();
        assert!(cwds.iter().all(|c| c == &cwds[0]));
        assert!(!cwds[0].exists());

        drop(pipeline);
        let events = drain(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.state, ExportState::Complete);
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.total_steps, 7);
        let percents: Vec<f32> = events.iter().map(|e| e.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_audio_offset_artifact_length() {
        let out = TempDir::new().unwrap();
        // 8 scenes at 120 bpm -> 4.0s of video against 10s of audio offset by 0.7s
        let scenes: Vec<Scene> = (0..8).map(ready_scene).collect();
        let engine = Arc::new(MockEngine::default());
        let artifact = pipeline(engine.clone(), fetcher_for(&scenes))
            .submit(request(scenes, 120.0, 0.7, out.path()), None)
            .await
            .unwrap();

        assert!((artifact.video_duration - 4.0).abs() < 1e-9);
        assert!((artifact.duration_sec - 4.0).abs() < 1e-9);
        assert!(engine.joined().last().unwrap().contains("-ss 0.700 -i audio.mp3"));
    }

    #[tokio::test]
    async fn test_validation_happens_before_engine() {
        let out = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::default());
        let pipeline = pipeline(engine.clone(), MockFetcher::default());

        let mut no_tempo = request(vec![ready_scene(0)], 120.0, 0.0, out.path());
        no_tempo.tempo = None;
        let err = pipeline.submit(no_tempo, None).await.unwrap_err();
        assert!(matches!(err, CoreError::MissingTempo));
        assert_eq!(err.class(), ErrorClass::InputValidation);

        let err = pipeline
            .submit(request(Vec::new(), 120.0, 0.0, out.path()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoReadyScenes));

        let not_ready = request(vec![Scene::new("pending")], 120.0, 0.0, out.path());
        let err = pipeline.submit(not_ready, None).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));

        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tempo_must_fit_the_audio() {
        let out = TempDir::new().unwrap();
        let scenes: Vec<Scene> = (0..2).map(ready_scene).collect();
        let engine = Arc::new(MockEngine::default());
        let pipeline = pipeline(engine.clone(), fetcher_for(&scenes));

        // First beat after the audio ends
        let mut past_end = request(scenes.clone(), 120.0, 5.0, out.path());
        past_end.audio = Some(
            AudioSource::new("https://cdn/song.mp3")
                .with_analysis(AudioAnalysis::new(120, 5.0, 3.0)),
        );
        // Tempo from some other track
        let mut mismatched = request(scenes.clone(), 120.0, 5.0, out.path());
        mismatched.audio = Some(
            AudioSource::new("https://cdn/song.mp3")
                .with_analysis(AudioAnalysis::new(90, 0.1, 3.0)),
        );
        let mut wrong_bpm = request(scenes, 120.0, 0.1, out.path());
        wrong_bpm.audio = Some(
            AudioSource::new("https://cdn/song.mp3")
                .with_analysis(AudioAnalysis::new(90, 0.1, 30.0)),
        );

        for req in [past_end, mismatched, wrong_bpm] {
            let output_path = req.output_path.clone();
            let err = pipeline.submit(req, None).await.unwrap_err();
            assert!(matches!(err, CoreError::ValidationError(_)), "{err}");
            assert_eq!(err.class(), ErrorClass::InputValidation);
            assert!(!output_path.exists());
        }
        assert!(engine.calls().is_empty());
        assert!(engine.probes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrected_duration_check_has_its_own_switch() {
        let scenes = vec![ready_scene(0)];

        for verify in [true, false] {
            let out = TempDir::new().unwrap();
            let engine = Arc::new(MockEngine::default());
            let settings = ExportSettings {
                probe_source_clips: false,
                verify_corrected_duration: verify,
                ..ExportSettings::default()
            };

            AssemblyPipeline::new(engine.clone(), Arc::new(fetcher_for(&scenes)), settings)
                .submit(request(scenes.clone(), 100.0, 0.0, out.path()), None)
                .await
                .unwrap();

            let probes = engine.probes.lock().unwrap().clone();
            if verify {
                assert_eq!(probes.len(), 1);
                assert!(probes[0].ends_with(CONCATENATED));
            } else {
                assert!(probes.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_stage_failure_is_fatal_and_leaves_no_artifact() {
        let out = TempDir::new().unwrap();
        let scenes: Vec<Scene> = (0..3).map(ready_scene).collect();
        let engine = Arc::new(MockEngine {
            fail_on: Some("concat"),
            ..MockEngine::default()
        });
        let pipeline = pipeline(engine.clone(), fetcher_for(&scenes));
        let req = request(scenes, 120.0, 0.0, out.path());
        let output_path = req.output_path.clone();

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let err = pipeline.submit(req, Some(tx)).await.unwrap_err();

        assert!(matches!(
            err,
            CoreError::StageFailed {
                stage: ExportStage::Concatenating,
                ..
            }
        ));
        assert_eq!(err.class(), ErrorClass::Pipeline);
        assert!(!output_path.exists());
        // Retimes plus the failed concat; drift and mux never ran
        assert_eq!(engine.calls().len(), 4);

        drop(pipeline);
        let events = drain(rx).await;
        assert!(matches!(
            events.last().unwrap().state,
            ExportState::Error {
                stage: ExportStage::Concatenating,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_no_audio_passes_video_through() {
        let out = TempDir::new().unwrap();
        let scenes: Vec<Scene> = (0..2).map(ready_scene).collect();
        let engine = Arc::new(MockEngine::default());
        let mut req = request(scenes.clone(), 90.0, 0.0, out.path());
        req.audio = None;

        let artifact = pipeline(engine.clone(), fetcher_for(&scenes))
            .submit(req, None)
            .await
            .unwrap();

        assert!(!artifact.has_audio);
        assert_eq!(
            engine.joined().last().unwrap(),
            "-i concatenated.mp4 -c copy -y final.mp4"
        );
    }

    #[tokio::test]
    async fn test_measured_clip_length_drives_rate() {
        let out = TempDir::new().unwrap();
        let scenes = vec![ready_scene(0)];
        let engine = Arc::new(MockEngine {
            probe_duration: Some(1.25),
            ..MockEngine::default()
        });

        pipeline(engine.clone(), fetcher_for(&scenes))
            .submit(request(scenes, 100.0, 0.0, out.path()), None)
            .await
            .unwrap();

        assert!(engine.joined()[0].contains("setpts=0.4800*PTS -t 0.6000"));
    }

    #[tokio::test]
    async fn test_configured_clip_length_without_probe() {
        let out = TempDir::new().unwrap();
        let scenes = vec![ready_scene(0)];
        let engine = Arc::new(MockEngine {
            no_video: true,
            ..MockEngine::default()
        });
        let settings = ExportSettings {
            probe_source_clips: false,
            source_clip_duration_sec: 2.0,
            ..ExportSettings::default()
        };

        AssemblyPipeline::new(engine.clone(), Arc::new(fetcher_for(&scenes)), settings)
            .submit(request(scenes, 100.0, 0.0, out.path()), None)
            .await
            .unwrap();

        assert!(engine.joined()[0].contains("setpts=0.3000*PTS"));
    }

    #[tokio::test]
    async fn test_clip_without_video_stream_fails_retiming() {
        let out = TempDir::new().unwrap();
        let scenes = vec![ready_scene(0)];
        let engine = Arc::new(MockEngine {
            no_video: true,
            ..MockEngine::default()
        });

        let err = pipeline(engine.clone(), fetcher_for(&scenes))
            .submit(request(scenes, 100.0, 0.0, out.path()), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoreError::StageFailed {
                stage: ExportStage::Retiming,
                ..
            }
        ));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clip_fetch_timeout_keeps_relay_type() {
        let out = TempDir::new().unwrap();
        let scenes: Vec<Scene> = (0..2).map(ready_scene).collect();
        let mut fetcher = fetcher_for(&scenes);
        fetcher.timeout_on = Some("https://cdn/clip1.mp4");
        let engine = Arc::new(MockEngine::default());

        let err = pipeline(engine.clone(), fetcher)
            .submit(request(scenes, 100.0, 0.0, out.path()), None)
            .await
            .unwrap_err();

        match &err {
            CoreError::Relay(relay) => assert!(relay.is_timeout()),
            other => panic!("expected relay timeout, got {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::Relay);
        // Only the first clip was retimed
        assert_eq!(engine.calls().len(), 1);
    }

    #[test]
    fn test_default_artifact_name() {
        let at = DateTime::parse_from_rfc3339("2024-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(default_artifact_name(at), "music-video-1704164645678.mp4");
    }

    /// Runs the real engine when it is installed.
    #[tokio::test]
    async fn test_end_to_end_with_ffmpeg() {
        use crate::core::ffmpeg::{detect_system_ffmpeg, FFmpegRunner};
        use crate::core::relay::FetchRelay;
        use std::time::Duration;

        let Ok(info) = detect_system_ffmpeg() else {
            eprintln!("FFmpeg not installed; skipping end-to-end export test");
            return;
        };

        let assets = TempDir::new().unwrap();
        let runner = FFmpegRunner::new(info.clone());

        let encoders = std::process::Command::new(&info.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .output()
            .unwrap();
        if !String::from_utf8_lossy(&encoders.stdout).contains("libx264") {
            eprintln!("FFmpeg built without libx264; skipping end-to-end export test");
            return;
        }

        let mut scenes = Vec::new();
        for i in 0..4 {
            let name = format!("clip{i}.mp4");
            runner
                .run(
                    assets.path(),
                    &[
                        "-f", "lavfi", "-i", "testsrc=duration=1:size=160x120:rate=24",
                        "-pix_fmt", "yuv420p", "-y", &name,
                    ]
                    .map(String::from),
                )
                .await
                .unwrap();
            let mut scene = ready_scene(i);
            scene.video_url = Some(assets.path().join(&name).to_string_lossy().to_string());
            scenes.push(scene);
        }
        runner
            .run(
                assets.path(),
                &[
                    "-f", "lavfi", "-i", "sine=frequency=440:duration=10",
                    "-c:a", "aac", "-y", "song.m4a",
                ]
                .map(String::from),
            )
            .await
            .unwrap();

        let settings = ExportSettings::default();
        let fetcher = FetchRelay::with_timeout(Duration::from_secs(5), "beatreel-test").unwrap();
        let pipeline =
            AssemblyPipeline::new(Arc::new(runner.clone()), Arc::new(fetcher), settings.clone());

        let audio_path = assets.path().join("song.m4a").to_string_lossy().to_string();
        let req = ExportRequest {
            scenes,
            tempo: Some(TempoDescriptor::new(100.0, 0.2, BeatsPerScene::One).unwrap()),
            aspect_ratio: AspectRatio::Landscape,
            audio: Some(AudioSource::new(audio_path).with_analysis(AudioAnalysis::new(100, 0.2, 10.0))),
            output_path: assets.path().join("out").join("final.mp4"),
        };

        let artifact = pipeline.submit(req, None).await.unwrap();
        let measured = runner.probe(&artifact.path).await.unwrap();

        assert!(measured.has_video());
        assert!(measured.has_audio);
        assert!(
            (measured.duration_sec - 2.4).abs() < 0.15,
            "artifact runs {}s",
            measured.duration_sec
        );

        // Correcting an already-corrected track again moves it by at most a frame
        let published = artifact.path.to_string_lossy().to_string();
        runner
            .run(
                assets.path(),
                &["-i", published.as_str(), "-an", "-c:v", "copy", "-y", "corrected.mp4"]
                    .map(String::from),
            )
            .await
            .unwrap();
        runner
            .run(
                assets.path(),
                &drift_correct_args("corrected.mp4", "recorrected.mp4", 2.4, &settings),
            )
            .await
            .unwrap();

        let once = runner.probe(&assets.path().join("corrected.mp4")).await.unwrap();
        let twice = runner
            .probe(&assets.path().join("recorrected.mp4"))
            .await
            .unwrap();
        let frame = 1.0 / f64::from(settings.output_fps);
        assert!(
            (twice.duration_sec - once.duration_sec).abs() <= frame + 1e-3,
            "second correction moved {}s -> {}s",
            once.duration_sec,
            twice.duration_sec
        );
    }
}
