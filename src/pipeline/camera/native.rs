use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
};

use super::{CameraError, CaptureConstraints, CaptureDevice, CaptureStream};
use crate::{pipeline::rgba_converter, types::Frame};

// Built-in macOS cameras often reject YUYV even though it is reported.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::MJPEG,
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::NV12,
    FrameFormat::YUYV,
    FrameFormat::GRAY,
];

const FRAME_QUEUE: usize = 2;

/// Slice in which a metadata wait re-checks its cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(25);

const READ_RETRY_BASE: Duration = Duration::from_millis(10);
const READ_RETRY_MAX: Duration = Duration::from_millis(200);
/// Consecutive read failures after which the device is treated as gone.
const MAX_READ_FAILURES: u32 = 50;

fn requested_formats(constraints: &CaptureConstraints) -> [RequestedFormat<'static>; 4] {
    let preferred = CameraFormat::new(
        Resolution::new(constraints.width, constraints.height),
        FrameFormat::MJPEG,
        30,
    );
    [
        RequestedFormat::with_formats(
            RequestedFormatType::Closest(preferred),
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

fn build_camera(index: CameraIndex, constraints: &CaptureConstraints) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats(constraints) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no supported camera format")))
}

/// A webcam reached through nokhwa. Desktop webcams face the user, so the
/// facing constraint is not forwarded.
pub struct NokhwaDevice {
    index: CameraIndex,
    label: String,
}

impl NokhwaDevice {
    pub fn new(index: u32) -> Self {
        let index = CameraIndex::Index(index);
        let label = available_cameras()
            .ok()
            .and_then(|cameras| cameras.into_iter().find(|c| c.index == index))
            .map(|c| c.label)
            .unwrap_or_else(|| format!("camera {index}"));
        Self { index, label }
    }
}

impl CaptureDevice for NokhwaDevice {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>, CameraError> {
        if constraints.audio {
            log::debug!("audio capture requested but not supported; ignoring");
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded(1);
        let (frame_tx, frame_rx) = bounded(FRAME_QUEUE);

        let index = self.index.clone();
        let worker_constraints = constraints.clone();
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_loop(index, &worker_constraints, stop_flag, ready_tx, frame_tx))
            .map_err(|err| CameraError::Open(format!("failed to spawn capture thread: {err}")))?;

        Ok(Box::new(NokhwaStream {
            stop,
            handle: Some(handle),
            ready: ready_rx,
            frames: frame_rx,
            first: None,
        }))
    }
}

fn capture_loop(
    index: CameraIndex,
    constraints: &CaptureConstraints,
    stop: Arc<AtomicBool>,
    ready_tx: Sender<Result<(), String>>,
    frame_tx: Sender<Frame>,
) {
    let mut camera = match build_camera(index, constraints) {
        Ok(camera) => {
            let _ = ready_tx.send(Ok(()));
            camera
        }
        Err(err) => {
            let _ = ready_tx.send(Err(format!("{err:#}")));
            return;
        }
    };

    let mut failures = ReadFailures::default();
    while !stop.load(Ordering::Relaxed) {
        let buffer = match camera.frame() {
            Ok(buffer) => {
                failures.reset();
                buffer
            }
            Err(err) => {
                match failures.record() {
                    Some(backoff) => {
                        if failures.consecutive == 1 {
                            log::warn!("camera frame read failed: {err:?}");
                        }
                        thread::sleep(backoff);
                        continue;
                    }
                    None => {
                        log::error!(
                            "camera stopped delivering frames after {MAX_READ_FAILURES} failed reads: {err:?}"
                        );
                        break;
                    }
                }
            }
        };

        match rgba_converter::convert_camera_buffer(&buffer, Instant::now()) {
            // Drop when the consumer is behind; it only wants the newest.
            Ok(frame) => {
                let _ = frame_tx.try_send(frame);
            }
            Err(err) => log::warn!("failed to decode camera frame: {err:?}"),
        }
    }

    if let Err(err) = camera.stop_stream() {
        log::warn!("camera stream did not stop cleanly: {err:?}");
    }
}

/// Counts back-to-back read failures so an unplugged device neither spins a
/// core nor keeps the capture thread alive forever.
#[derive(Debug, Default)]
struct ReadFailures {
    consecutive: u32,
}

impl ReadFailures {
    /// Delay before the next read, or `None` once the device should be
    /// given up on.
    fn record(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= MAX_READ_FAILURES {
            return None;
        }
        Some((READ_RETRY_BASE * self.consecutive).min(READ_RETRY_MAX))
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Receives from `rx` until `deadline`, giving up early once `cancel` is set.
fn recv_cancellable<T>(
    rx: &Receiver<T>,
    deadline: Instant,
    cancel: &AtomicBool,
    timeout: Duration,
) -> Result<T, CameraError> {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(CameraError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CameraError::MetadataTimeout(timeout));
        }
        match rx.recv_timeout(remaining.min(CANCEL_POLL)) {
            Ok(value) => return Ok(value),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Err(CameraError::Disconnected),
        }
    }
}

pub struct NokhwaStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    ready: Receiver<Result<(), String>>,
    frames: Receiver<Frame>,
    first: Option<Frame>,
}

impl CaptureStream for NokhwaStream {
    /// Waits for the device to open and for the first decodable frame.
    fn wait_for_metadata(
        &mut self,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<(u32, u32), CameraError> {
        let deadline = Instant::now() + timeout;
        recv_cancellable(&self.ready, deadline, cancel, timeout)?.map_err(CameraError::Open)?;

        let frame = recv_cancellable(&self.frames, deadline, cancel, timeout)?;
        let dimensions = (frame.width, frame.height);
        self.first = Some(frame);
        Ok(dimensions)
    }

    fn latest_frame(&mut self) -> Option<Frame> {
        let mut latest = self.first.take();
        while let Ok(newer) = self.frames.try_recv() {
            latest = Some(newer);
        }
        latest
    }

    fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("camera capture thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("{err}");
        }
    }
}
