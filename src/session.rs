//! The try-on session: owns every pipeline component and is the only place
//! state transitions happen.
//!
//! ```text
//! Idle ─mount─▶ Initializing ─model+garment─▶ Ready ─start─▶ Starting ─▶ Active
//!                    │                          ▲               │          │
//!                    ▼                          └──────stop─────┴──────────┘
//!                  Error (model)                      Error (camera) ─start─▶ Starting
//! ```

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use image::RgbaImage;
use thiserror::Error;

use crate::{
    config::TryOnConfig,
    pipeline::{
        asset::{AssetFetcher, AssetPreloader},
        camera::{CameraError, CameraManager, CaptureConstraints, CaptureDevice, StopStep},
        compositor::{Compositor, DrawReport, OutputSurface},
        pose::{InitOutcome, PoseModel, PoseModelAdapter, spawn_initialize},
        scheduler::{FrameSink, TickOutcome},
    },
    types::{Frame, GarmentState, Product, SessionSnapshot, SessionState},
};

const DEBUG_LOG_LIMIT: usize = 50;
const SETTLE_POLL: Duration = Duration::from_millis(2);
const MODEL_INIT_FAILED: &str = "Failed to initialize AR system";
/// Snapshots buffered per subscriber before newer ones are held back.
pub const SUBSCRIBER_BACKLOG: usize = 16;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not ready to start (state: {0})")]
    NotReady(SessionState),
    #[error("garment image is not loaded")]
    GarmentNotReady,
    #[error("camera session already active")]
    AlreadyActive,
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("Failed to initialize AR system: {0}")]
    ModelInit(String),
}

/// Everything the session consumes from the outside world.
pub struct SessionDeps {
    pub pose_model: Box<dyn PoseModel>,
    pub capture_device: Arc<dyn CaptureDevice>,
    pub fetcher: Arc<dyn AssetFetcher>,
}

pub struct Session {
    product: Product,
    state: SessionState,
    error: Option<String>,
    model_failed: bool,
    fetcher: Arc<dyn AssetFetcher>,
    pose_model: Option<Box<dyn PoseModel>>,
    model_init: Option<Receiver<InitOutcome>>,
    adapter: Option<PoseModelAdapter>,
    preloader: Option<AssetPreloader>,
    camera: CameraManager,
    compositor: Compositor,
    debug_log: Vec<String>,
    subscribers: Vec<Subscriber>,
    published: Option<SessionSnapshot>,
}

struct Subscriber {
    tx: Sender<SessionSnapshot>,
    /// Missed a snapshot because its buffer was full.
    behind: bool,
}

impl Session {
    pub fn new(product: Product, config: &TryOnConfig, deps: SessionDeps) -> Self {
        let camera = CameraManager::new(
            deps.capture_device,
            CaptureConstraints::from_config(&config.camera),
            config.pose.frame_interval(),
        );
        Self {
            product,
            state: SessionState::Idle,
            error: None,
            model_failed: false,
            fetcher: deps.fetcher,
            pose_model: Some(deps.pose_model),
            model_init: None,
            adapter: None,
            preloader: None,
            camera,
            compositor: Compositor::new(config.overlay.clone()),
            debug_log: Vec::new(),
            subscribers: Vec::new(),
            published: None,
        }
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn camera(&self) -> &CameraManager {
        &self.camera
    }

    pub fn output(&self) -> &OutputSurface {
        self.compositor.surface()
    }

    /// The decoded garment bitmap. The same handle is kept for the whole
    /// mount.
    pub fn garment(&self) -> Option<&Arc<RgbaImage>> {
        self.preloader.as_ref().and_then(AssetPreloader::image)
    }

    pub fn garment_state(&self) -> GarmentState {
        self.preloader
            .as_ref()
            .map_or(GarmentState::Pending, AssetPreloader::state)
    }

    /// Starts loading the garment and the pose model concurrently.
    pub fn mount(&mut self) {
        if self.state != SessionState::Idle {
            return;
        }
        let Some(model) = self.pose_model.take() else {
            return;
        };
        self.transition(SessionState::Initializing);
        log::info!(
            "mounting try-on for '{}' with {} pose model",
            self.product.name,
            model.label()
        );

        self.preloader = Some(AssetPreloader::spawn(
            self.product.image.clone(),
            Arc::clone(&self.fetcher),
        ));
        self.model_init = Some(spawn_initialize(model));
        self.publish();
    }

    /// Picks up finished background work. Never blocks.
    pub fn poll(&mut self) {
        self.poll_garment();
        self.poll_model();

        if self.state == SessionState::Initializing
            && self.adapter.is_some()
            && self.garment_state() != GarmentState::Pending
        {
            self.transition(SessionState::Ready);
        }

        match self.camera.poll(Instant::now()) {
            Some(Ok((width, height))) => self.camera_started(width, height),
            Some(Err(err)) => self.camera_failed(err),
            None => {}
        }

        self.publish();
    }

    fn poll_garment(&mut self) {
        let Some(preloader) = self.preloader.as_mut() else {
            return;
        };
        match preloader.poll() {
            Some(GarmentState::Loaded) => self.push_log("Garment image loaded".to_string()),
            Some(GarmentState::Failed) => self.push_log("Garment image failed to load".to_string()),
            Some(GarmentState::Pending) | None => {}
        }
    }

    fn poll_model(&mut self) {
        let Some(rx) = self.model_init.as_ref() else {
            return;
        };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome.map_err(|err| err.to_string()),
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err("pose model worker exited".to_string()),
        };
        self.model_init = None;

        match outcome {
            Ok(adapter) => {
                self.push_log("Pose landmarker ready".to_string());
                self.adapter = Some(adapter);
            }
            Err(detail) => {
                log::error!("{}", SessionError::ModelInit(detail.clone()));
                self.model_failed = true;
                self.error = Some(MODEL_INIT_FAILED.to_string());
                self.push_log(format!("Error: {detail}"));
                self.transition(SessionState::Error);
            }
        }
    }

    fn camera_started(&mut self, width: u32, height: u32) {
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.reset_clock();
        }
        self.push_log(format!("Camera started ({width}x{height})"));
        self.transition(SessionState::Active);
    }

    fn camera_failed(&mut self, err: CameraError) {
        let message = err.to_string();
        self.push_log(format!("Camera error: {message}"));
        self.error = Some(message);
        self.transition(SessionState::Error);
    }

    fn start_gate(&self) -> Result<(), SessionError> {
        if self.camera.is_active() || self.camera.is_pending() {
            return Err(SessionError::AlreadyActive);
        }
        let retryable = self.state == SessionState::Error && !self.model_failed;
        if (self.state != SessionState::Ready && !retryable) || self.adapter.is_none() {
            return Err(SessionError::NotReady(self.state));
        }
        if self.garment_state() != GarmentState::Loaded {
            return Err(SessionError::GarmentNotReady);
        }
        Ok(())
    }

    pub fn can_start(&self) -> bool {
        self.start_gate().is_ok()
    }

    /// Requests the camera. Resolution arrives through [`Session::poll`].
    pub fn start_camera(&mut self) -> Result<(), SessionError> {
        self.start_gate()?;
        self.camera
            .begin_start(Instant::now())
            .map_err(|err| match err {
                CameraError::AlreadyActive => SessionError::AlreadyActive,
                other => SessionError::Camera(other),
            })?;
        self.error = None;
        self.transition(SessionState::Starting);
        self.publish();
        Ok(())
    }

    /// Stops whatever camera work is pending or active. A no-op when there
    /// is none.
    pub fn stop_camera(&mut self) -> Vec<StopStep> {
        let steps = self.camera.stop();
        if !steps.is_empty() {
            self.push_log("Camera stopped".to_string());
            if matches!(self.state, SessionState::Active | SessionState::Starting) {
                self.transition(SessionState::Ready);
            }
            self.publish();
        }
        steps
    }

    /// Start/stop control as one action.
    pub fn toggle_camera(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active | SessionState::Starting => {
                self.stop_camera();
                Ok(())
            }
            _ => self.start_camera(),
        }
    }

    /// Runs one display-refresh tick: inference and drawing when the
    /// scheduler accepts it.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.state != SessionState::Active {
            return TickOutcome::NotScheduled;
        }
        let garment = self.preloader.as_ref().and_then(AssetPreloader::image);
        let mut pass = RenderPass {
            adapter: self.adapter.as_mut(),
            compositor: &mut self.compositor,
            garment,
        };
        self.camera.tick(now, &mut pass)
    }

    fn has_pending_work(&self) -> bool {
        let garment_pending = self
            .preloader
            .as_ref()
            .is_some_and(|p| p.state() == GarmentState::Pending);
        self.model_init.is_some() || garment_pending || self.camera.is_pending()
    }

    /// Polls until no background work is outstanding or `timeout` passes.
    /// Returns whether everything settled.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if !self.has_pending_work() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(SETTLE_POLL);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let garment_error = self
            .preloader
            .as_ref()
            .and_then(|p| p.error())
            .map(str::to_string);
        SessionSnapshot {
            state: self.state,
            error: self.error.clone(),
            garment_ready: self.garment_state() == GarmentState::Loaded,
            garment_error,
            can_start: self.can_start(),
            debug_log: self.debug_log.clone(),
        }
    }

    /// Receives a snapshot now and after every subsequent change.
    ///
    /// At most [`SUBSCRIBER_BACKLOG`] snapshots are buffered. A receiver that
    /// falls further behind skips the intermediate ones and is sent the
    /// current snapshot on the first [`Session::poll`] after it drains.
    pub fn subscribe(&mut self) -> Receiver<SessionSnapshot> {
        let (tx, rx) = bounded(SUBSCRIBER_BACKLOG);
        let _ = tx.try_send(self.snapshot());
        self.subscribers.push(Subscriber { tx, behind: false });
        rx
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        let changed = self.published.as_ref() != Some(&snapshot);
        if !changed && !self.subscribers.iter().any(|sub| sub.behind) {
            return;
        }
        self.subscribers.retain_mut(|sub| {
            if !changed && !sub.behind {
                return true;
            }
            match sub.tx.try_send(snapshot.clone()) {
                Ok(()) => {
                    sub.behind = false;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    sub.behind = true;
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        self.published = Some(snapshot);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            log::info!("session {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn push_log(&mut self, entry: String) {
        log::debug!("{entry}");
        if self.debug_log.len() == DEBUG_LOG_LIMIT {
            self.debug_log.remove(0);
        }
        self.debug_log.push(entry);
    }

    /// Camera teardown first, then the model. Safe to call more than once.
    pub fn unmount(&mut self) {
        self.camera.stop();
        self.model_init = None;
        if let Some(mut adapter) = self.adapter.take() {
            adapter.release();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// One accepted tick: infer on the frame, then draw that same result.
struct RenderPass<'a> {
    adapter: Option<&'a mut PoseModelAdapter>,
    compositor: &'a mut Compositor,
    garment: Option<&'a Arc<RgbaImage>>,
}

impl FrameSink for RenderPass<'_> {
    fn resize(&mut self, width: u32, height: u32) {
        self.compositor.resize(width, height);
    }

    fn render(&mut self, frame: &Frame, timestamp_ms: u64) -> DrawReport {
        let pose = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter.infer(frame, timestamp_ms).unwrap_or_else(|err| {
                log::debug!("no detection this frame: {err}");
                None
            }),
            None => None,
        };
        self.compositor.compose(frame, pose.as_ref(), self.garment)
    }
}
