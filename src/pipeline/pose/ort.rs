use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{PoseModel, common};
use crate::{
    config::PoseConfig,
    model_download::{ModelDownloadEvent, ModelSource, ensure_model_ready},
    types::{Frame, PoseFrameResult},
};

/// BlazePose full landmark network run through ONNX Runtime. Tracks a
/// single body.
pub struct OrtPoseModel {
    source: ModelSource,
    intra_threads: usize,
    min_pose_presence: f32,
    session: Option<Session>,
}

impl OrtPoseModel {
    pub fn new(config: &PoseConfig) -> Self {
        Self {
            source: ModelSource::pose_landmarker(config),
            intra_threads: config.intra_threads.max(1),
            min_pose_presence: config.min_pose_presence,
            session: None,
        }
    }
}

impl PoseModel for OrtPoseModel {
    fn label(&self) -> &'static str {
        "ort"
    }

    fn initialize(&mut self) -> Result<()> {
        ensure_model_ready(&self.source, |event| {
            if let ModelDownloadEvent::Started { total } = event {
                log::info!("downloading {} model ({total:?} bytes)", self.source.label);
            }
        })?;

        let path = &self.source.path;
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?
            .commit_from_file(path)
            .with_context(|| format!("failed to load ORT session from {}", path.display()))?;
        log::info!("pose landmarker ready using {}", path.display());
        self.session = Some(session);
        Ok(())
    }

    fn infer(&mut self, frame: &Frame, timestamp_ms: u64) -> Result<Option<PoseFrameResult>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("ORT session not loaded"))?;

        let (input, letterbox) = common::prepare_frame_with_size(frame, common::INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 2 {
            return Err(anyhow!("model returned {} outputs, need 2", outputs.len()));
        }

        let presence = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .map(common::presence_score)
            .unwrap_or(0.0);
        if presence < self.min_pose_presence {
            log::trace!("pose presence {presence:.2} below threshold");
            return Ok(None);
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = common::decode_landmarks(&flattened, &letterbox)?;

        Ok(Some(PoseFrameResult {
            landmarks,
            timestamp_ms,
        }))
    }

    fn release(&mut self) {
        if self.session.take().is_some() {
            log::info!("pose landmarker released");
        }
    }
}
