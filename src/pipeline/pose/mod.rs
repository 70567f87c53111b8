//! Pose estimation behind a narrow initialize / infer / release contract.

mod common;
mod fixture;
mod ort;

use std::thread;

use crossbeam_channel::{Receiver, bounded};

pub use self::common::{INPUT_SIZE, LetterboxInfo, prepare_frame_with_size};
pub use self::fixture::{FixturePoseModel, FixtureProbe, standing_landmarks};
pub use self::ort::OrtPoseModel;
use crate::{
    config::{PoseBackendKind, PoseConfig},
    types::{Frame, PoseFrameResult},
};

/// An opaque pose estimator. Implementations own their runtime resources.
pub trait PoseModel: Send + 'static {
    fn label(&self) -> &'static str;

    /// Loads weights and runtime. May block on network or disk.
    fn initialize(&mut self) -> anyhow::Result<()>;

    /// `Ok(None)` means no body was found in the frame.
    fn infer(&mut self, frame: &Frame, timestamp_ms: u64) -> anyhow::Result<Option<PoseFrameResult>>;

    fn release(&mut self);
}

pub fn model_from_config(config: &PoseConfig) -> Box<dyn PoseModel> {
    match config.backend {
        PoseBackendKind::Ort => Box::new(OrtPoseModel::new(config)),
        PoseBackendKind::Fixture => Box::new(FixturePoseModel::standing()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("pose model is not initialized")]
    NotInitialized,
    #[error("inference timestamp went backwards: {got} ms after {last} ms")]
    TimestampRegression { last: u64, got: u64 },
    #[error("pose model initialization failed: {0:#}")]
    Init(anyhow::Error),
    #[error("pose inference failed: {0:#}")]
    Inference(anyhow::Error),
}

/// Owns one [`PoseModel`] and enforces its call contract: a single
/// successful initialization, non-decreasing timestamps, release on drop.
pub struct PoseModelAdapter {
    model: Box<dyn PoseModel>,
    initialized: bool,
    released: bool,
    last_timestamp_ms: Option<u64>,
}

impl PoseModelAdapter {
    pub fn new(model: Box<dyn PoseModel>) -> Self {
        Self {
            model,
            initialized: false,
            released: false,
            last_timestamp_ms: None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.model.label()
    }

    pub fn is_ready(&self) -> bool {
        self.initialized && !self.released
    }

    /// Runs at most once successfully; later calls are no-ops.
    pub fn initialize(&mut self) -> Result<(), PoseError> {
        if self.initialized {
            return Ok(());
        }
        self.model.initialize().map_err(PoseError::Init)?;
        self.initialized = true;
        self.released = false;
        Ok(())
    }

    pub fn infer(
        &mut self,
        frame: &Frame,
        timestamp_ms: u64,
    ) -> Result<Option<PoseFrameResult>, PoseError> {
        if !self.is_ready() {
            return Err(PoseError::NotInitialized);
        }
        if let Some(last) = self.last_timestamp_ms {
            if timestamp_ms < last {
                return Err(PoseError::TimestampRegression {
                    last,
                    got: timestamp_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        self.model
            .infer(frame, timestamp_ms)
            .map_err(PoseError::Inference)
    }

    /// Timestamps restart from zero on every camera run.
    pub fn reset_clock(&mut self) {
        self.last_timestamp_ms = None;
    }

    pub fn release(&mut self) {
        if self.initialized && !self.released {
            self.model.release();
            self.released = true;
        }
    }
}

impl Drop for PoseModelAdapter {
    fn drop(&mut self) {
        self.release();
    }
}

pub type InitOutcome = Result<PoseModelAdapter, PoseError>;

/// Initializes `model` on a background thread. The receiver yields exactly
/// one outcome; if it is dropped first the adapter is released on the
/// worker.
pub fn spawn_initialize(model: Box<dyn PoseModel>) -> Receiver<InitOutcome> {
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name("pose-init".into())
        .spawn(move || {
            let mut adapter = PoseModelAdapter::new(model);
            let outcome = match adapter.initialize() {
                Ok(()) => {
                    log::info!("pose model '{}' initialized", adapter.label());
                    Ok(adapter)
                }
                Err(err) => {
                    log::error!("{err}");
                    Err(err)
                }
            };
            let _ = tx.send(outcome);
        });
    if let Err(err) = spawned {
        log::error!("failed to spawn pose init thread: {err}");
    }
    rx
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn frame() -> Frame {
        Frame {
            rgba: vec![0; 16],
            width: 2,
            height: 2,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn infer_before_initialize_is_rejected() {
        let mut adapter = PoseModelAdapter::new(Box::new(FixturePoseModel::standing()));
        assert!(matches!(
            adapter.infer(&frame(), 0),
            Err(PoseError::NotInitialized)
        ));
    }

    #[test]
    fn initialize_runs_once() {
        let model = FixturePoseModel::standing();
        let probe = model.probe();
        let mut adapter = PoseModelAdapter::new(Box::new(model));
        adapter.initialize().unwrap();
        adapter.initialize().unwrap();
        assert_eq!(probe.inits(), 1);
    }

    #[test]
    fn timestamps_must_not_go_backwards() {
        let mut adapter = PoseModelAdapter::new(Box::new(FixturePoseModel::standing()));
        adapter.initialize().unwrap();
        adapter.infer(&frame(), 10).unwrap();
        adapter.infer(&frame(), 10).unwrap();
        assert!(matches!(
            adapter.infer(&frame(), 5),
            Err(PoseError::TimestampRegression { last: 10, got: 5 })
        ));
        adapter.reset_clock();
        assert!(adapter.infer(&frame(), 0).is_ok());
    }

    #[test]
    fn release_happens_once_and_on_drop() {
        let model = FixturePoseModel::standing();
        let probe = model.probe();
        let mut adapter = PoseModelAdapter::new(Box::new(model));
        adapter.initialize().unwrap();
        adapter.release();
        adapter.release();
        drop(adapter);
        assert_eq!(probe.releases(), 1);
        assert!(matches!(
            PoseModelAdapter::new(Box::new(FixturePoseModel::standing())).infer(&frame(), 0),
            Err(PoseError::NotInitialized)
        ));
    }

    #[test]
    fn background_initialize_reports_failure() {
        let model = FixturePoseModel::standing().failing_init("network unreachable");
        let probe = model.probe();
        let rx = spawn_initialize(Box::new(model));
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let err = outcome.err().unwrap();
        assert!(err.to_string().contains("network unreachable"));
        assert_eq!(probe.releases(), 0);
    }
}
