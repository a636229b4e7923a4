use super::*;
use crate::config::AnalysisCadence;
use crate::emotion::EmotionLabel;
use crate::playback::PlaybackStatus;
use crate::testing::{
    face, faces, CountingEngine, FakeFrames, RecordingPresenter, ScriptedDetector,
};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

type TestLoop = SamplingLoop<FakeFrames, CountingEngine, RecordingPresenter>;

struct Library {
    dir: TempDir,
    happy: PathBuf,
    sad: PathBuf,
}

impl Library {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let happy = dir.path().join("h.mp3");
        let sad = dir.path().join("s.mp3");
        std::fs::write(&happy, b"not really audio").expect("write h.mp3");
        std::fs::write(&sad, b"not really audio").expect("write s.mp3");
        Self { dir, happy, sad }
    }

    fn mapping(&self) -> TrackMapping {
        TrackMapping::new(BTreeMap::from([
            (EmotionLabel::Happy, self.happy.clone()),
            (EmotionLabel::Sad, self.sad.clone()),
        ]))
        .expect("mapping with happy")
    }

    fn scratch(&self) -> ScratchImage {
        ScratchImage::new(self.dir.path().join("scratch").join("captured_face.jpg"))
    }
}

fn build(
    library: &Library,
    detector: &ScriptedDetector,
    presenter: RecordingPresenter,
    dispatch: DispatchMode,
) -> TestLoop {
    build_with(library, Arc::new(detector.clone()), presenter, dispatch, library.mapping())
}

fn build_with(
    library: &Library,
    detector: Arc<dyn EmotionDetector>,
    presenter: RecordingPresenter,
    dispatch: DispatchMode,
    tracks: TrackMapping,
) -> TestLoop {
    let scratch = library.scratch();
    if let Some(parent) = scratch.path().parent() {
        std::fs::create_dir_all(parent).expect("scratch dir");
    }
    SamplingLoop::new(
        FakeFrames::new(1_000),
        detector,
        tracks,
        PlaybackController::new(CountingEngine::default(), Duration::from_secs(100)),
        presenter,
        scratch,
        SamplingConfig {
            dispatch,
            ..SamplingConfig::default()
        },
    )
}

fn loads(sampler: &TestLoop) -> Vec<PathBuf> {
    sampler.player().engine().loads()
}

/// Start of each analysis window, comfortably past the 2 s cadence.
fn cycle(t0: Instant, n: u64) -> Instant {
    t0 + Duration::from_millis(2_100 * n)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[test]
fn select_face_takes_first_qualifying_face_in_order() {
    let gate = ConfidenceGate::default();
    let observed = vec![face("happy", 40.0), face("sad", 70.0), face("angry", 95.0)];

    let chosen = select_face(&observed, None, gate).expect("a face qualifies");
    assert_eq!(chosen.dominant_emotion, EmotionLabel::Sad);

    let chosen = select_face(&observed, Some(&EmotionLabel::Sad), gate).expect("angry");
    assert_eq!(chosen.dominant_emotion, EmotionLabel::Angry);

    assert!(select_face(&[], None, gate).is_none());
}

#[test]
fn analysis_due_respects_cadence_and_in_flight_flag() {
    let t0 = Instant::now();
    let cadence = AnalysisCadence::default().duration();
    let mut state = SamplingState::default();
    assert!(state.analysis_due(t0, cadence));

    state.last_analysis = Some(t0);
    assert!(!state.analysis_due(t0 + Duration::from_millis(1_999), cadence));
    assert!(!state.analysis_due(t0 + Duration::from_millis(2_000), cadence));
    assert!(state.analysis_due(t0 + Duration::from_millis(2_001), cadence));

    state.analyzing = true;
    assert!(!state.analysis_due(t0 + Duration::from_secs(60), cadence));
}

#[tokio::test]
async fn same_emotion_twice_loads_once() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![
        faces(vec![face("sad", 90.0)]),
        faces(vec![face("sad", 90.0)]),
    ]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    sampler.step(cycle(t0, 0)).await.expect("step");
    sampler.step(cycle(t0, 1)).await.expect("step");

    assert_eq!(detector.calls(), 2);
    assert_eq!(loads(&sampler), vec![library.sad.clone()]);
    assert_eq!(sampler.presenter().announced, vec![EmotionLabel::Sad]);
}

#[tokio::test]
async fn confidence_must_exceed_threshold() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![
        faces(vec![face("sad", 49.9)]),
        faces(vec![face("sad", 50.0)]),
        faces(vec![face("sad", 50.1)]),
    ]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    sampler.step(cycle(t0, 0)).await.expect("step");
    sampler.step(cycle(t0, 1)).await.expect("step");
    assert!(loads(&sampler).is_empty());
    assert_eq!(sampler.state().last_emotion, None);

    sampler.step(cycle(t0, 2)).await.expect("step");
    assert_eq!(loads(&sampler), vec![library.sad.clone()]);
}

#[tokio::test]
async fn emotion_changes_drive_track_changes() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![
        faces(vec![face("sad", 80.0)]),
        faces(vec![face("sad", 95.0)]),
        faces(vec![face("happy", 60.0)]),
    ]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    for n in 0..3 {
        sampler.step(cycle(t0, n)).await.expect("step");
    }

    assert_eq!(loads(&sampler), vec![library.sad.clone(), library.happy.clone()]);
    assert_eq!(sampler.state().last_emotion, Some(EmotionLabel::Happy));
    assert_eq!(sampler.player().status(), PlaybackStatus::Playing);
}

#[tokio::test]
async fn no_analysis_before_interval_elapses() {
    let library = Library::new();
    let detector = ScriptedDetector::default();
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    for ms in [0, 30, 500, 1_000, 1_999, 2_000] {
        sampler
            .step(t0 + Duration::from_millis(ms))
            .await
            .expect("step");
    }
    assert_eq!(detector.calls(), 1);
    assert_eq!(sampler.presenter().renders, 6);

    sampler
        .step(t0 + Duration::from_millis(2_001))
        .await
        .expect("step");
    assert_eq!(detector.calls(), 2);
}

#[tokio::test]
async fn scratch_image_is_overwritten_each_cycle() {
    let library = Library::new();
    let detector = ScriptedDetector::default();
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    for n in 0..4 {
        sampler.step(cycle(t0, n)).await.expect("step");
    }

    let scratch = library.scratch();
    assert_eq!(detector.images(), vec![scratch.path().to_path_buf(); 4]);
    let entries = std::fs::read_dir(scratch.path().parent().expect("parent"))
        .expect("read dir")
        .count();
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn overlay_persists_between_analyses() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![faces(vec![face("sad", 30.0)])]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    sampler.step(t0).await.expect("step");
    // The first render happens before the first result arrives.
    assert!(sampler.presenter().last_overlay.is_empty());

    sampler
        .step(t0 + Duration::from_millis(30))
        .await
        .expect("step");
    sampler
        .step(t0 + Duration::from_millis(60))
        .await
        .expect("step");
    let overlay = &sampler.presenter().last_overlay;
    assert_eq!(overlay.len(), 1);
    assert_eq!(overlay[0].dominant_emotion, EmotionLabel::Sad);
    // Below the gate: drawn, but no music.
    assert!(loads(&sampler).is_empty());
}

#[tokio::test]
async fn detection_failure_is_reported_and_changes_nothing() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![
        faces(vec![face("sad", 80.0)]),
        Err(DetectionError::InvalidResponse("garbled".to_owned())),
    ]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    sampler.step(cycle(t0, 0)).await.expect("step");
    let flow = sampler.step(cycle(t0, 1)).await.expect("loop continues");

    assert_eq!(flow, Flow::Continue);
    assert_eq!(loads(&sampler), vec![library.sad.clone()]);
    assert_eq!(sampler.state().last_emotion, Some(EmotionLabel::Sad));
    assert_eq!(sampler.state().last_analysis, Some(cycle(t0, 1)));
    assert_eq!(sampler.overlay().faces.len(), 1);
    assert!(sampler
        .presenter()
        .messages
        .iter()
        .any(|m| m.starts_with("Error detecting emotion:")));
}

#[tokio::test]
async fn missing_tracks_are_reported_and_still_debounced() {
    let library = Library::new();
    let gone = TrackMapping::new(BTreeMap::from([(
        EmotionLabel::Happy,
        library.dir.path().join("missing.mp3"),
    )]))
    .expect("mapping");
    let detector = ScriptedDetector::new(vec![
        faces(vec![face("fear", 90.0)]),
        faces(vec![face("fear", 90.0)]),
    ]);
    let mut sampler = build_with(
        &library,
        Arc::new(detector.clone()),
        RecordingPresenter::default(),
        DispatchMode::Inline,
        gone,
    );

    let t0 = Instant::now();
    sampler.step(cycle(t0, 0)).await.expect("step");
    sampler.step(cycle(t0, 1)).await.expect("step");

    assert!(loads(&sampler).is_empty());
    assert_eq!(sampler.state().last_emotion, Some(EmotionLabel::Fear));
    assert_eq!(
        sampler.presenter().messages,
        vec!["No music file for emotion: fear".to_owned()]
    );
}

#[tokio::test]
async fn engine_failure_leaves_player_idle() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![faces(vec![face("sad", 80.0)])]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);
    sampler.player.engine_mut().fail_next = true;

    let flow = sampler.step(Instant::now()).await.expect("step");

    assert_eq!(flow, Flow::Continue);
    assert_eq!(sampler.player().status(), PlaybackStatus::Idle);
    assert!(sampler
        .presenter()
        .messages
        .iter()
        .any(|m| m.starts_with("Error playing music:")));
}

#[tokio::test]
async fn commands_control_playback() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![faces(vec![face("sad", 80.0)])]);
    let presenter = RecordingPresenter::default();
    let mut sampler = build(&library, &detector, presenter, DispatchMode::Inline);

    let t0 = Instant::now();
    sampler.step(t0).await.expect("step");
    assert_eq!(sampler.player().status(), PlaybackStatus::Playing);

    sampler.presenter.commands.push_back(Command::Pause);
    sampler.step(t0 + Duration::from_millis(30)).await.expect("step");
    assert_eq!(sampler.player().status(), PlaybackStatus::Paused);

    sampler.presenter.commands.push_back(Command::Resume);
    sampler.step(t0 + Duration::from_millis(60)).await.expect("step");
    assert_eq!(sampler.player().status(), PlaybackStatus::Playing);
    assert_eq!(sampler.player().engine().pauses, 1);
    assert_eq!(sampler.player().engine().resumes, 1);
}

#[tokio::test]
async fn stop_keeps_last_emotion_so_same_emotion_stays_silent() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![
        faces(vec![face("sad", 80.0)]),
        faces(vec![face("sad", 80.0)]),
        faces(vec![face("happy", 80.0)]),
    ]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    sampler.presenter.commands.push_back(Command::Stop);
    sampler.step(cycle(t0, 0)).await.expect("step");
    assert_eq!(sampler.player().status(), PlaybackStatus::Idle);
    assert_eq!(sampler.state().last_emotion, Some(EmotionLabel::Sad));

    sampler.step(cycle(t0, 1)).await.expect("step");
    assert_eq!(sampler.player().status(), PlaybackStatus::Idle);
    assert_eq!(loads(&sampler), vec![library.sad.clone()]);

    sampler.step(cycle(t0, 2)).await.expect("step");
    assert_eq!(sampler.player().status(), PlaybackStatus::Playing);
    assert_eq!(loads(&sampler), vec![library.sad.clone(), library.happy.clone()]);
}

#[tokio::test]
async fn quit_command_ends_the_step() {
    let library = Library::new();
    let detector = ScriptedDetector::default();
    let presenter = RecordingPresenter::with_commands([Command::Capture, Command::Quit]);
    let mut sampler = build(&library, &detector, presenter, DispatchMode::Inline);

    let flow = sampler.step(Instant::now()).await.expect("step");
    assert_eq!(flow, Flow::Quit);
}

#[tokio::test]
async fn finished_track_returns_player_to_idle() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![faces(vec![face("sad", 80.0)])]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    let t0 = Instant::now();
    sampler.step(t0).await.expect("step");
    sampler.player.engine_mut().drained = true;
    sampler.step(t0 + Duration::from_millis(30)).await.expect("step");

    assert_eq!(sampler.player().status(), PlaybackStatus::Idle);
    assert_eq!(sampler.presenter().last_playback.status, PlaybackStatus::Idle);
    // Same emotion does not restart the music.
    assert_eq!(sampler.state().last_emotion, Some(EmotionLabel::Sad));
}

#[tokio::test]
async fn capture_failure_ends_run_with_error() {
    let library = Library::new();
    let detector = ScriptedDetector::default();
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);
    sampler.source = FakeFrames::new(3);
    sampler.config.tick = Duration::from_millis(1);

    let err = sampler.run().await.expect_err("camera fails");
    assert!(matches!(err, SamplingError::Capture(CaptureError::Frame(_))));
}

#[tokio::test]
async fn shutdown_releases_playback_once() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![faces(vec![face("sad", 80.0)])]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Inline);

    sampler.step(Instant::now()).await.expect("step");
    sampler.shutdown();
    sampler.shutdown();

    assert_eq!(sampler.player().status(), PlaybackStatus::Idle);
    assert_eq!(sampler.player().engine().shutdowns, 1);
}

#[tokio::test]
async fn worker_results_are_applied_on_a_later_step() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![faces(vec![face("sad", 80.0)])]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Worker);

    let t0 = Instant::now();
    sampler.step(t0).await.expect("step");
    assert!(sampler.state().analyzing);
    assert!(loads(&sampler).is_empty());

    settle().await;
    // Still in flight from this loop's point of view: no second dispatch.
    assert_eq!(detector.calls(), 1);

    sampler
        .step(t0 + Duration::from_millis(30))
        .await
        .expect("step");
    assert!(!sampler.state().analyzing);
    assert_eq!(loads(&sampler), vec![library.sad.clone()]);
    assert!(sampler.state().last_analysis.is_some());
}

#[tokio::test]
async fn worker_does_not_overlap_analyses() {
    let library = Library::new();
    let detector = ScriptedDetector::default();
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Worker);

    let t0 = Instant::now();
    sampler.step(t0).await.expect("step");
    // Far past the cadence, but the first analysis has not been collected.
    sampler
        .step(t0 + Duration::from_secs(10))
        .await
        .expect("step");
    settle().await;

    assert_eq!(detector.calls(), 1);
}

#[tokio::test]
async fn worker_result_after_shutdown_is_discarded() {
    let library = Library::new();
    let detector = ScriptedDetector::new(vec![faces(vec![face("sad", 80.0)])]);
    let mut sampler = build(&library, &detector, RecordingPresenter::default(), DispatchMode::Worker);

    let t0 = Instant::now();
    sampler.step(t0).await.expect("step");
    sampler.shutdown();
    settle().await;

    assert_eq!(detector.calls(), 1);
    assert!(sampler.results_rx.try_recv().is_err());
    assert!(loads(&sampler).is_empty());
}

struct PanickingDetector(&'static str);

impl EmotionDetector for PanickingDetector {
    fn analyze(&self, _image: PathBuf) -> BoxFuture<'_, Result<DetectionResult, DetectionError>> {
        async move {
            if !self.0.is_empty() {
                panic!("{}", self.0);
            }
            Ok(DetectionResult::default())
        }
        .boxed()
    }
}

#[tokio::test]
async fn worker_panic_is_reported_and_analysis_resumes() {
    let library = Library::new();
    let mut sampler = build_with(
        &library,
        Arc::new(PanickingDetector("model crashed")),
        RecordingPresenter::default(),
        DispatchMode::Worker,
        library.mapping(),
    );

    let t0 = Instant::now();
    sampler.step(t0).await.expect("step");
    assert!(sampler.state().analyzing);
    settle().await;

    sampler
        .step(t0 + Duration::from_millis(30))
        .await
        .expect("step");
    assert!(!sampler.state().analyzing);
    assert!(sampler
        .presenter()
        .messages
        .iter()
        .any(|m| m == "Error detecting emotion: analysis aborted: model crashed"));
    assert!(sampler
        .state()
        .analysis_due(t0 + Duration::from_secs(10), sampler.config.cadence.duration()));
}
