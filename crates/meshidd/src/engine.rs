//! Session engine.
//!
//! A single task owns the session context (camera, landmark detector,
//! template store) and serves requests from an mpsc mailbox one at a time.
//! Every landmark detector call happens inside this task, so at most one
//! inference is in flight and the timestamps it sees strictly increase,
//! whether the call came from the detection loop or from enroll/authenticate.

use crate::camera::{Camera, CameraError};
use crate::store::{StoreError, TemplateStore};
use meshid_core::{
    decide, CosineScorer, DetectorError, EncodeError, FeatureEncoder, LandmarkSet,
    LandmarkSource, MonotonicClock, ScoreError, Scorer, SimilarityScore, Verdict,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    CameraActive,
    Detecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::CameraActive => "camera_active",
            SessionState::Detecting => "detecting",
        })
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[source] CameraError),
    #[error("landmark model failed to load: {0}")]
    ModelLoadFailure(#[source] DetectorError),
    #[error("session not ready (state: {0})")]
    SessionNotReady(SessionState),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("no enrolled face; enroll first")]
    NoEnrollmentFound,
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error("landmark encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("inference failed: {0}")]
    Inference(#[source] DetectorError),
    #[error("frame capture failed: {0}")]
    Capture(#[source] CameraError),
    #[error("template store: {0}")]
    Store(#[from] StoreError),
    #[error("engine task exited")]
    ChannelClosed,
}

impl EngineError {
    /// Stable name surfaced to IPC clients.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::CameraUnavailable(_) => "CameraUnavailable",
            EngineError::ModelLoadFailure(_) => "ModelLoadFailure",
            EngineError::SessionNotReady(_) => "SessionNotReady",
            EngineError::NoFaceDetected => "NoFaceDetected",
            EngineError::NoEnrollmentFound => "NoEnrollmentFound",
            EngineError::Score(ScoreError::DimensionMismatch { .. }) => "DimensionMismatch",
            EngineError::Score(ScoreError::DegenerateVector) => "DegenerateVector",
            EngineError::Encode(_) => "EncodeFailure",
            EngineError::Inference(_) => "InferenceFailure",
            EngineError::Capture(_) => "CaptureFailure",
            EngineError::Store(_) => "StoreFailure",
            EngineError::ChannelClosed => "ChannelClosed",
        }
    }
}

/// Fixed per-engine settings.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub threshold: f32,
    pub landmark_count: usize,
}

/// Result of an enrollment operation.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub dimension: usize,
}

/// Result of an authentication operation.
#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub score: SimilarityScore,
    pub verdict: Verdict,
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: SessionState,
    pub enrolled: bool,
    pub last_score: Option<SimilarityScore>,
    pub threshold: f32,
    pub landmark_count: usize,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent to the engine task.
enum EngineRequest {
    StartSession { reply: Reply<SessionState> },
    StopSession { reply: Reply<SessionState> },
    Enroll { reply: Reply<EnrollOutcome> },
    Authenticate { reply: Reply<AuthOutcome> },
    Detect { reply: Reply<Option<LandmarkSet>> },
    Status { reply: Reply<EngineStatus> },
    ClearTemplate { reply: Reply<bool> },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Acquire the camera. Idle → CameraActive.
    pub async fn start_session(&self) -> Result<SessionState, EngineError> {
        self.request(|reply| EngineRequest::StartSession { reply }).await
    }

    /// Release the camera. Any state → Idle.
    pub async fn stop_session(&self) -> Result<SessionState, EngineError> {
        self.request(|reply| EngineRequest::StopSession { reply }).await
    }

    /// Capture one face and store it as the enrolled template.
    pub async fn enroll(&self) -> Result<EnrollOutcome, EngineError> {
        self.request(|reply| EngineRequest::Enroll { reply }).await
    }

    /// Capture one face and compare it against the enrolled template.
    pub async fn authenticate(&self) -> Result<AuthOutcome, EngineError> {
        self.request(|reply| EngineRequest::Authenticate { reply }).await
    }

    /// One detection loop tick. Inference failures come back as `Ok(None)`.
    pub async fn detect(&self) -> Result<Option<LandmarkSet>, EngineError> {
        self.request(|reply| EngineRequest::Detect { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Remove the enrolled template. Returns whether one existed.
    pub async fn clear_template(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::ClearTemplate { reply }).await
    }
}

/// Spawn the engine task on the current tokio runtime.
pub fn spawn_engine<C, L, S>(
    camera: C,
    detector: L,
    store: S,
    settings: EngineSettings,
) -> EngineHandle
where
    C: Camera + 'static,
    L: LandmarkSource + 'static,
    S: TemplateStore + 'static,
{
    let session = Session {
        state: SessionState::Idle,
        camera,
        detector,
        store,
        encoder: FeatureEncoder::new(settings.landmark_count),
        scorer: CosineScorer,
        threshold: settings.threshold,
        clock: MonotonicClock::new(),
        last_score: None,
    };

    let (tx, rx) = mpsc::channel::<EngineRequest>(8);
    tokio::spawn(session.run(rx));

    EngineHandle { tx }
}

/// Everything a session needs, owned by the engine task.
struct Session<C, L, S> {
    state: SessionState,
    camera: C,
    detector: L,
    store: S,
    encoder: FeatureEncoder,
    scorer: CosineScorer,
    threshold: f32,
    clock: MonotonicClock,
    last_score: Option<SimilarityScore>,
}

impl<C, L, S> Session<C, L, S>
where
    C: Camera,
    L: LandmarkSource,
    S: TemplateStore,
{
    async fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::info!(
            threshold = self.threshold,
            landmarks = self.encoder.landmark_count(),
            "engine task started"
        );

        while let Some(req) = rx.recv().await {
            match req {
                EngineRequest::StartSession { reply } => {
                    let _ = reply.send(self.start());
                }
                EngineRequest::StopSession { reply } => {
                    self.stop();
                    let _ = reply.send(Ok(self.state));
                }
                EngineRequest::Enroll { reply } => {
                    let result = self.enroll().await;
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "enroll failed");
                    }
                    let _ = reply.send(result);
                }
                EngineRequest::Authenticate { reply } => {
                    let result = self.authenticate().await;
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "authenticate failed");
                    }
                    let _ = reply.send(result);
                }
                EngineRequest::Detect { reply } => {
                    let result = self.tick().await;
                    let _ = reply.send(result);
                }
                EngineRequest::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                EngineRequest::ClearTemplate { reply } => {
                    let result = self.store.clear().map_err(EngineError::from);
                    if let Ok(removed) = result {
                        tracing::info!(removed, "template cleared");
                    }
                    let _ = reply.send(result);
                }
            }
        }

        self.stop();
        tracing::info!("engine task exiting");
    }

    fn start(&mut self) -> Result<SessionState, EngineError> {
        if self.state != SessionState::Idle {
            tracing::debug!(state = %self.state, "session already active");
            return Ok(self.state);
        }

        self.camera.start().map_err(EngineError::CameraUnavailable)?;
        self.state = SessionState::CameraActive;
        tracing::info!("camera acquired; waiting for first frame");
        Ok(self.state)
    }

    fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.camera.stop();
        self.state = SessionState::Idle;
        tracing::info!("session stopped");
    }

    fn require_detecting(&self) -> Result<(), EngineError> {
        if self.state == SessionState::Detecting {
            Ok(())
        } else {
            Err(EngineError::SessionNotReady(self.state))
        }
    }

    /// Capture a frame and run the detector on it once.
    ///
    /// This is the only place the detector is invoked.
    async fn infer(&mut self) -> Result<Option<LandmarkSet>, EngineError> {
        let frame = self.camera.capture_frame().map_err(EngineError::Capture)?;
        if !frame.has_valid_dimensions() {
            tracing::trace!(seq = frame.sequence, "frame has no dimensions yet");
            return Ok(None);
        }

        if self.state == SessionState::CameraActive {
            self.state = SessionState::Detecting;
            tracing::info!(
                width = frame.width,
                height = frame.height,
                brightness = frame.avg_brightness(),
                "first frame received; detection enabled"
            );
        }

        let timestamp = self.clock.next();
        self.detector
            .detect(&frame, timestamp)
            .await
            .map_err(EngineError::Inference)
    }

    async fn tick(&mut self) -> Result<Option<LandmarkSet>, EngineError> {
        if self.state == SessionState::Idle {
            return Err(EngineError::SessionNotReady(self.state));
        }

        match self.infer().await {
            Ok(landmarks) => Ok(landmarks),
            Err(e) => {
                tracing::warn!(error = %e, "detection tick failed; no landmarks this frame");
                Ok(None)
            }
        }
    }

    async fn enroll(&mut self) -> Result<EnrollOutcome, EngineError> {
        self.require_detecting()?;

        let landmarks = self.infer().await?.ok_or(EngineError::NoFaceDetected)?;
        let vector = self.encoder.encode(&landmarks)?;
        self.store.enroll(&vector)?;

        tracing::info!(dimension = vector.dim(), "face enrolled");
        Ok(EnrollOutcome {
            dimension: vector.dim(),
        })
    }

    async fn authenticate(&mut self) -> Result<AuthOutcome, EngineError> {
        self.require_detecting()?;

        let landmarks = self.infer().await?.ok_or(EngineError::NoFaceDetected)?;
        let candidate = self.encoder.encode(&landmarks)?;
        let template = self.store.load()?.ok_or(EngineError::NoEnrollmentFound)?;

        let score = self.scorer.score(&candidate, &template).map_err(|e| {
            tracing::error!(
                error = %e,
                candidate = candidate.dim(),
                template = template.dim(),
                "template comparison violated the feature vector contract"
            );
            e
        })?;
        let verdict = decide(score, self.threshold);
        self.last_score = Some(score);

        tracing::info!(%score, threshold = self.threshold, ?verdict, "authentication complete");
        Ok(AuthOutcome {
            score,
            verdict,
            threshold: self.threshold,
        })
    }

    fn status(&self) -> Result<EngineStatus, EngineError> {
        Ok(EngineStatus {
            state: self.state,
            enrolled: self.store.load()?.is_some(),
            last_score: self.last_score,
            threshold: self.threshold,
            landmark_count: self.encoder.landmark_count(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the engine and scheduler tests.

    use super::*;
    use meshid_core::{Frame, LandmarkPoint, Timestamp};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    pub fn face(points: &[[f32; 3]]) -> LandmarkSet {
        points.iter().copied().map(LandmarkPoint::from).collect()
    }

    /// Two-point face encoding to `[1, 0, 0, 0, 1, 0]`.
    pub fn face_a() -> LandmarkSet {
        face(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    /// Two-point face encoding to `[0, 1, 0, 1, 0, 0]`, orthogonal to [`face_a`].
    pub fn face_b() -> LandmarkSet {
        face(&[[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]])
    }

    pub struct FakeCamera {
        pub fail_start: bool,
        pub blank_frames: usize,
        started: bool,
        sequence: u32,
    }

    impl FakeCamera {
        pub fn new() -> Self {
            Self {
                fail_start: false,
                blank_frames: 0,
                started: false,
                sequence: 0,
            }
        }
    }

    impl Camera for FakeCamera {
        fn start(&mut self) -> Result<(), CameraError> {
            if self.fail_start {
                return Err(CameraError::DeviceNotFound("/dev/fake".into()));
            }
            self.started = true;
            Ok(())
        }

        fn capture_frame(&mut self) -> Result<Frame, CameraError> {
            if !self.started {
                return Err(CameraError::NotStarted);
            }
            let (width, height) = if self.blank_frames > 0 {
                self.blank_frames -= 1;
                (0, 0)
            } else {
                (4, 4)
            };
            self.sequence += 1;
            Ok(Frame {
                data: vec![128; width as usize * height as usize],
                width,
                height,
                timestamp: std::time::Instant::now(),
                sequence: self.sequence,
            })
        }

        fn stop(&mut self) {
            self.started = false;
        }
    }

    /// Observations recorded by [`ScriptedSource`].
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub in_flight: Arc<AtomicUsize>,
        pub max_in_flight: Arc<AtomicUsize>,
        pub timestamps: Arc<Mutex<Vec<Timestamp>>>,
        pub script: Arc<Mutex<VecDeque<Result<Option<LandmarkSet>, String>>>>,
    }

    impl Recorder {
        /// Queue the result of the next detector call.
        pub fn push(&self, step: Result<Option<LandmarkSet>, String>) {
            self.script.lock().unwrap().push_back(step);
        }

        pub fn timestamps(&self) -> Vec<Timestamp> {
            self.timestamps.lock().unwrap().clone()
        }
    }

    /// Landmark source that plays queued results, falling back to a fixed
    /// face once the queue is empty.
    pub struct ScriptedSource {
        pub recorder: Recorder,
        pub fallback: Option<LandmarkSet>,
    }

    impl LandmarkSource for ScriptedSource {
        async fn detect(
            &mut self,
            _frame: &Frame,
            timestamp: Timestamp,
        ) -> Result<Option<LandmarkSet>, DetectorError> {
            let now = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.recorder.timestamps.lock().unwrap().push(timestamp);

            tokio::task::yield_now().await;

            let step = self.recorder.script.lock().unwrap().pop_front();
            self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
            match step {
                Some(Ok(result)) => Ok(result),
                Some(Err(msg)) => Err(DetectorError::InferenceFailed(msg)),
                None => Ok(self.fallback.clone()),
            }
        }
    }

    pub const SETTINGS: EngineSettings = EngineSettings {
        threshold: 0.9,
        landmark_count: 2,
    };

    pub fn engine_with<S: TemplateStore + 'static>(
        camera: FakeCamera,
        fallback: Option<LandmarkSet>,
        store: S,
        settings: EngineSettings,
    ) -> (EngineHandle, Recorder) {
        let recorder = Recorder::default();
        let source = ScriptedSource {
            recorder: recorder.clone(),
            fallback,
        };
        (spawn_engine(camera, source, store, settings), recorder)
    }

    /// Start a session and run one tick so the engine reaches `Detecting`.
    pub async fn ready(engine: &EngineHandle) {
        engine.start_session().await.unwrap();
        engine.detect().await.unwrap();
        assert_eq!(engine.status().await.unwrap().state, SessionState::Detecting);
    }
}
