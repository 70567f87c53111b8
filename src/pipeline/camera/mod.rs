#[cfg(feature = "camera-nokhwa")]
mod native;

#[cfg(feature = "camera-nokhwa")]
pub use native::{CameraDevice, NokhwaDevice, available_cameras};

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use thiserror::Error;

use super::scheduler::{FrameScheduler, FrameSink, TickOutcome};
use crate::{config::CameraConfig, types::Frame};

/// Extra time granted on top of the metadata timeout for the device itself to
/// open before an acquisition is abandoned.
const OPEN_GRACE: Duration = Duration::from_secs(2);

/// How long a new start waits for a cancelled acquisition to hand its stream
/// back before giving up with [`CameraError::AlreadyActive`].
const RELEASE_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConstraints {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
    pub audio: bool,
    pub metadata_timeout: Duration,
}

impl CaptureConstraints {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            device_index: config.device_index,
            width: config.width,
            height: config.height,
            facing: Facing::User,
            audio: false,
            metadata_timeout: config.metadata_timeout(),
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera session already active")]
    AlreadyActive,
    #[error("failed to access camera: {0}")]
    Open(String),
    #[error("camera metadata load timed out after {}s", .0.as_secs_f32())]
    MetadataTimeout(Duration),
    #[error("camera reported an empty frame size")]
    EmptyFrameSize,
    #[error("camera stream disconnected")]
    Disconnected,
    #[error("camera acquisition cancelled")]
    Cancelled,
}

/// A physical or virtual capture device.
pub trait CaptureDevice: Send + Sync {
    fn label(&self) -> String;

    /// Acquires a video-only stream honoring `constraints` as closely as the
    /// device allows.
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>, CameraError>;
}

/// An acquired stream. Owned exclusively by [`CameraManager`].
pub trait CaptureStream: Send {
    /// Blocks until the stream reports its frame size, `timeout` passes or
    /// `cancel` is raised, whichever comes first.
    fn wait_for_metadata(
        &mut self,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<(u32, u32), CameraError>;

    /// Newest frame delivered since the previous call, if any.
    fn latest_frame(&mut self) -> Option<Frame>;

    /// Releases every track. Calling it again is a no-op.
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// The surface a live stream is bound to. Holds the most recent displayable
/// frame.
#[derive(Debug)]
pub struct VideoSurface {
    frame: Option<Frame>,
    dimensions: (u32, u32),
    attached: bool,
}

impl VideoSurface {
    pub(crate) fn bind(dimensions: (u32, u32)) -> Self {
        Self {
            frame: None,
            dimensions,
            attached: true,
        }
    }

    pub fn refresh(&mut self, stream: &mut dyn CaptureStream) {
        if !self.attached {
            return;
        }
        if let Some(frame) = stream.latest_frame() {
            self.dimensions = (frame.width, frame.height);
            self.frame = Some(frame);
        }
    }

    pub fn current(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn detach(&mut self) {
        self.attached = false;
        self.frame = None;
    }
}

struct CaptureSession {
    stream: Box<dyn CaptureStream>,
    surface: VideoSurface,
}

type Acquired = Result<(Box<dyn CaptureStream>, (u32, u32)), CameraError>;

struct PendingAcquisition {
    rx: Receiver<Acquired>,
    deadline: Instant,
    worker: AcquireWorker,
}

/// The `camera-acquire` thread. It may still hold an opened stream until it
/// notices `cancel` or finds nobody waiting for its result.
struct AcquireWorker {
    handle: thread::JoinHandle<()>,
    exited: Receiver<()>,
    cancel: Arc<AtomicBool>,
}

impl AcquireWorker {
    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Waits up to `timeout` for the thread to exit. Hands the worker back
    /// if it is still running.
    fn join_within(self, timeout: Duration) -> Result<(), Self> {
        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    log::warn!("camera acquisition thread panicked");
                }
                Ok(())
            }
            Ok(()) | Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }
}

/// Teardown steps, in the order they ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopStep {
    AbandonAcquisition,
    CancelScheduler,
    StopTracks,
    DetachSurface,
}

/// Owns the capture device, the live capture session and the frame
/// scheduler. At most one session is pending or active at any time, and a
/// new acquisition never opens the device while an abandoned one may still
/// hold a stream.
pub struct CameraManager {
    device: Arc<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    pending: Option<PendingAcquisition>,
    releasing: Option<AcquireWorker>,
    active: Option<CaptureSession>,
    scheduler: FrameScheduler,
}

impl CameraManager {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        constraints: CaptureConstraints,
        frame_interval: Duration,
    ) -> Self {
        Self {
            device,
            constraints,
            pending: None,
            releasing: None,
            active: None,
            scheduler: FrameScheduler::new(frame_interval),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn surface(&self) -> Option<&VideoSurface> {
        self.active.as_ref().map(|session| &session.surface)
    }

    /// Kicks off acquisition on a worker thread. Resolve it with
    /// [`CameraManager::poll`] or [`CameraManager::wait`].
    ///
    /// If an earlier acquisition was abandoned, this first waits briefly for
    /// its worker to exit so the device is never held twice.
    pub fn begin_start(&mut self, now: Instant) -> Result<(), CameraError> {
        if self.active.is_some() || self.pending.is_some() {
            return Err(CameraError::AlreadyActive);
        }
        if let Some(worker) = self.releasing.take() {
            if let Err(worker) = worker.join_within(RELEASE_GRACE) {
                log::warn!("previous camera acquisition is still releasing its stream");
                self.releasing = Some(worker);
                return Err(CameraError::AlreadyActive);
            }
        }

        let device = Arc::clone(&self.device);
        let constraints = self.constraints.clone();
        let (tx, rx) = bounded::<Acquired>(1);
        let (exited_tx, exited) = bounded::<()>(0);
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);

        log::info!(
            "requesting camera {} at {}x{}",
            device.label(),
            constraints.width,
            constraints.height
        );

        let handle = thread::Builder::new()
            .name("camera-acquire".to_string())
            .spawn(move || {
                // Locals drop in reverse order: `exited` disconnects only
                // after `tx`, and any stream still buffered in it, is gone.
                let _exited = exited_tx;
                let tx = tx;
                let acquired = acquire(device.as_ref(), &constraints, &worker_cancel);
                // Nobody is waiting any more: give the stream back.
                if let Err(returned) = tx.send(acquired) {
                    if let Ok((mut stream, _)) = returned.into_inner() {
                        if let Err(err) = stream.stop() {
                            log::warn!("failed to release abandoned camera stream: {err:?}");
                        }
                    }
                }
            })
            .map_err(|err| CameraError::Open(format!("failed to spawn camera worker: {err}")))?;

        self.pending = Some(PendingAcquisition {
            rx,
            deadline: now + self.constraints.metadata_timeout + OPEN_GRACE,
            worker: AcquireWorker {
                handle,
                exited,
                cancel,
            },
        });
        Ok(())
    }

    /// Non-blocking check on a pending acquisition. Returns `None` while it
    /// is still in flight or when nothing is pending.
    pub fn poll(&mut self, now: Instant) -> Option<Result<(u32, u32), CameraError>> {
        let pending = self.pending.as_ref()?;
        let received = match pending.rx.try_recv() {
            Ok(acquired) => Some(acquired),
            Err(TryRecvError::Empty) if now < pending.deadline => return None,
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CameraError::Disconnected)),
        };
        Some(self.resolve(received, now))
    }

    /// Blocks for up to `timeout` waiting on a pending acquisition.
    pub fn wait(&mut self, timeout: Duration) -> Option<Result<(u32, u32), CameraError>> {
        let pending = self.pending.as_ref()?;
        let now = Instant::now();
        let budget = timeout.min(pending.deadline.saturating_duration_since(now));
        let received = match pending.rx.recv_timeout(budget) {
            Ok(acquired) => Some(acquired),
            Err(RecvTimeoutError::Timeout) if Instant::now() < pending.deadline => return None,
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CameraError::Disconnected)),
        };
        Some(self.resolve(received, Instant::now()))
    }

    fn resolve(&mut self, received: Option<Acquired>, now: Instant) -> Result<(u32, u32), CameraError> {
        if let Some(pending) = self.pending.take() {
            // Past the deadline the worker may still hold a stream.
            pending.worker.cancel();
            self.releasing = Some(pending.worker);
        }
        match received {
            Some(Ok((stream, dimensions))) => {
                log::info!("camera active at {}x{}", dimensions.0, dimensions.1);
                self.active = Some(CaptureSession {
                    stream,
                    surface: VideoSurface::bind(dimensions),
                });
                self.scheduler.schedule(now);
                Ok(dimensions)
            }
            Some(Err(err)) => {
                log::error!("camera acquisition failed: {err}");
                Err(err)
            }
            None => {
                log::error!("camera acquisition did not finish before its deadline");
                Err(CameraError::MetadataTimeout(self.constraints.metadata_timeout))
            }
        }
    }

    /// Runs one scheduler tick against the live surface.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn FrameSink) -> TickOutcome {
        let Some(session) = self.active.as_mut() else {
            return TickOutcome::NotScheduled;
        };
        self.scheduler
            .tick(now, &mut session.surface, session.stream.as_mut(), sink)
    }

    /// Tears down whatever is pending or active: cancel the scheduler, stop
    /// the tracks, detach the surface. Every step runs even if an earlier one
    /// fails. Returns the steps taken; empty when there was nothing to stop.
    pub fn stop(&mut self) -> Vec<StopStep> {
        let mut steps = Vec::new();

        if let Some(pending) = self.pending.take() {
            pending.worker.cancel();
            self.releasing = Some(pending.worker);
            steps.push(StopStep::AbandonAcquisition);
        }

        if self.scheduler.cancel() {
            steps.push(StopStep::CancelScheduler);
        }

        if let Some(mut session) = self.active.take() {
            if let Err(err) = session.stream.stop() {
                log::warn!("failed to stop camera tracks: {err:?}");
            }
            steps.push(StopStep::StopTracks);

            session.surface.detach();
            steps.push(StopStep::DetachSurface);
            log::info!("camera stopped");
        }

        steps
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.releasing.take() {
            if worker.join_within(RELEASE_GRACE).is_err() {
                log::warn!("camera acquisition thread outlived its manager");
            }
        }
    }
}

fn acquire(
    device: &dyn CaptureDevice,
    constraints: &CaptureConstraints,
    cancel: &AtomicBool,
) -> Acquired {
    let mut stream = device.open(constraints)?;
    let metadata = if cancel.load(Ordering::SeqCst) {
        Err(CameraError::Cancelled)
    } else {
        stream.wait_for_metadata(constraints.metadata_timeout, cancel)
    };
    let metadata = metadata.and_then(|(width, height)| {
        if width == 0 || height == 0 {
            Err(CameraError::EmptyFrameSize)
        } else {
            Ok((width, height))
        }
    });

    match metadata {
        Ok(dimensions) => Ok((stream, dimensions)),
        Err(err) => {
            if let Err(stop_err) = stream.stop() {
                log::warn!("failed to release camera after acquisition error: {stop_err:?}");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{CameraError, CaptureConstraints, CaptureDevice, CaptureStream};
    use crate::types::Frame;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Behavior {
        /// Delivers a solid frame of the given size on every pull.
        Deliver(u32, u32),
        /// Never reports metadata.
        Silent,
        /// Refuses to open.
        Deny,
    }

    /// Scripted device that tracks how many streams are currently held, and
    /// the most it ever held at once.
    pub struct ScriptedDevice {
        behavior: Mutex<Behavior>,
        pub live_streams: Arc<AtomicUsize>,
        pub peak_streams: Arc<AtomicUsize>,
        pub opened: Arc<AtomicUsize>,
        pub journal: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ScriptedDevice {
        pub fn new(behavior: Behavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                live_streams: Arc::new(AtomicUsize::new(0)),
                peak_streams: Arc::new(AtomicUsize::new(0)),
                opened: Arc::new(AtomicUsize::new(0)),
                journal: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Applies to streams opened from now on.
        pub fn set_behavior(&self, behavior: Behavior) {
            *self.behavior.lock().unwrap() = behavior;
        }
    }

    /// Spins until `done` holds or `timeout` passes.
    pub fn wait_until(timeout: Duration, done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while !done() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    impl CaptureDevice for ScriptedDevice {
        fn label(&self) -> String {
            "scripted camera".to_string()
        }

        fn open(
            &self,
            _constraints: &CaptureConstraints,
        ) -> Result<Box<dyn CaptureStream>, CameraError> {
            let behavior = *self.behavior.lock().unwrap();
            if behavior == Behavior::Deny {
                return Err(CameraError::Open("Permission denied".to_string()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let live = self.live_streams.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_streams.fetch_max(live, Ordering::SeqCst);
            Ok(Box::new(ScriptedStream {
                behavior,
                live_streams: Arc::clone(&self.live_streams),
                journal: Arc::clone(&self.journal),
                stopped: false,
            }))
        }
    }

    pub struct ScriptedStream {
        behavior: Behavior,
        live_streams: Arc<AtomicUsize>,
        journal: Arc<Mutex<Vec<&'static str>>>,
        stopped: bool,
    }

    pub fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        let mut rgba = vec![value; (width * height * 4) as usize];
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Frame {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    impl CaptureStream for ScriptedStream {
        fn wait_for_metadata(
            &mut self,
            timeout: Duration,
            cancel: &AtomicBool,
        ) -> Result<(u32, u32), CameraError> {
            if let Behavior::Deliver(w, h) = self.behavior {
                return Ok((w, h));
            }
            if wait_until(timeout, || cancel.load(Ordering::SeqCst)) {
                Err(CameraError::Cancelled)
            } else {
                Err(CameraError::MetadataTimeout(timeout))
            }
        }

        fn latest_frame(&mut self) -> Option<Frame> {
            match self.behavior {
                Behavior::Deliver(w, h) if !self.stopped => Some(solid_frame(w, h, 40)),
                _ => None,
            }
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            if !self.stopped {
                self.stopped = true;
                self.live_streams.fetch_sub(1, Ordering::SeqCst);
                self.journal.lock().unwrap().push("stop_tracks");
            }
            Ok(())
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{Behavior, ScriptedDevice, wait_until};
    use super::*;
    use crate::pipeline::compositor::DrawReport;

    struct CountingSink {
        renders: usize,
    }

    impl FrameSink for CountingSink {
        fn resize(&mut self, _width: u32, _height: u32) {}

        fn render(&mut self, _frame: &Frame, _timestamp_ms: u64) -> DrawReport {
            self.renders += 1;
            DrawReport::default()
        }
    }

    fn manager(behavior: Behavior, timeout_ms: u64) -> (CameraManager, Arc<ScriptedDevice>) {
        let device = Arc::new(ScriptedDevice::new(behavior));
        let constraints = CaptureConstraints {
            metadata_timeout: Duration::from_millis(timeout_ms),
            ..CaptureConstraints::default()
        };
        let manager = CameraManager::new(
            device.clone() as Arc<dyn CaptureDevice>,
            constraints,
            Duration::from_millis(66),
        );
        (manager, device)
    }

    #[test]
    fn start_binds_surface_and_schedules_ticks() {
        let (mut camera, device) = manager(Behavior::Deliver(64, 48), 500);
        camera.begin_start(Instant::now()).unwrap();
        assert_eq!(camera.wait(Duration::from_secs(2)).unwrap().unwrap(), (64, 48));
        assert!(camera.is_active());
        assert!(camera.scheduler().is_scheduled());
        assert_eq!(device.live_streams.load(Ordering::SeqCst), 1);

        let mut sink = CountingSink { renders: 0 };
        assert!(matches!(
            camera.tick(Instant::now(), &mut sink),
            TickOutcome::Rendered(_)
        ));
        assert_eq!(sink.renders, 1);
    }

    #[test]
    fn second_start_while_active_is_rejected() {
        let (mut camera, device) = manager(Behavior::Deliver(8, 8), 500);
        camera.begin_start(Instant::now()).unwrap();
        assert!(matches!(
            camera.begin_start(Instant::now()),
            Err(CameraError::AlreadyActive)
        ));
        camera.wait(Duration::from_secs(2)).unwrap().unwrap();
        assert!(matches!(
            camera.begin_start(Instant::now()),
            Err(CameraError::AlreadyActive)
        ));
        assert_eq!(device.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_runs_in_order_and_is_idempotent() {
        let (mut camera, device) = manager(Behavior::Deliver(8, 8), 500);
        assert!(camera.stop().is_empty());

        camera.begin_start(Instant::now()).unwrap();
        camera.wait(Duration::from_secs(2)).unwrap().unwrap();

        assert_eq!(
            camera.stop(),
            vec![
                StopStep::CancelScheduler,
                StopStep::StopTracks,
                StopStep::DetachSurface
            ]
        );
        assert_eq!(device.live_streams.load(Ordering::SeqCst), 0);
        assert!(!camera.scheduler().is_scheduled());
        assert!(camera.stop().is_empty());
        assert_eq!(*device.journal.lock().unwrap(), vec!["stop_tracks"]);

        let mut sink = CountingSink { renders: 0 };
        assert_eq!(camera.tick(Instant::now(), &mut sink), TickOutcome::NotScheduled);
        assert_eq!(sink.renders, 0);
    }

    #[test]
    fn metadata_timeout_releases_stream_and_never_schedules() {
        let (mut camera, device) = manager(Behavior::Silent, 30);
        camera.begin_start(Instant::now()).unwrap();
        let err = camera.wait(Duration::from_secs(3)).unwrap().unwrap_err();
        assert!(matches!(err, CameraError::MetadataTimeout(_)));
        assert!(err.to_string().contains("timed out"));
        assert!(!camera.is_active());
        assert!(!camera.scheduler().is_scheduled());
        assert_eq!(camera.scheduler().stats().ticks, 0);
        assert_eq!(device.live_streams.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn denied_device_reports_open_error() {
        let (mut camera, _device) = manager(Behavior::Deny, 30);
        camera.begin_start(Instant::now()).unwrap();
        let err = camera.wait(Duration::from_secs(2)).unwrap().unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }

    #[test]
    fn stop_then_start_never_holds_two_streams() {
        let (mut camera, device) = manager(Behavior::Deliver(8, 8), 500);
        for _ in 0..5 {
            camera.begin_start(Instant::now()).unwrap();
            camera.wait(Duration::from_secs(2)).unwrap().unwrap();
            assert_eq!(device.live_streams.load(Ordering::SeqCst), 1);
            camera.stop();
            assert_eq!(device.live_streams.load(Ordering::SeqCst), 0);
        }
        assert_eq!(device.opened.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn stop_during_acquisition_releases_before_next_open() {
        let (mut camera, device) = manager(Behavior::Silent, 5_000);
        camera.begin_start(Instant::now()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            device.opened.load(Ordering::SeqCst) == 1
        }));

        assert_eq!(camera.stop(), vec![StopStep::AbandonAcquisition]);
        assert!(!camera.is_pending());

        device.set_behavior(Behavior::Deliver(8, 8));
        camera.begin_start(Instant::now()).unwrap();
        assert_eq!(camera.wait(Duration::from_secs(2)).unwrap().unwrap(), (8, 8));

        assert_eq!(device.opened.load(Ordering::SeqCst), 2);
        assert_eq!(device.live_streams.load(Ordering::SeqCst), 1);
        assert_eq!(device.peak_streams.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_abandon_and_restart_never_overlaps() {
        let (mut camera, device) = manager(Behavior::Silent, 5_000);
        for round in 1..=4 {
            camera.begin_start(Instant::now()).unwrap();
            assert!(wait_until(Duration::from_secs(2), || {
                device.opened.load(Ordering::SeqCst) == round
            }));
            camera.stop();
        }
        drop(camera);
        assert_eq!(device.peak_streams.load(Ordering::SeqCst), 1);
        assert_eq!(device.live_streams.load(Ordering::SeqCst), 0);
    }
}
