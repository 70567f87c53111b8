//! Runtime configuration loaded from TOML.
//!
//! The binary reads the file named by `TRYON_CONFIG`, falling back to
//! `tryon.toml`. Every field has a default so a missing file is not an error.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::types::Product;

pub const CONFIG_ENV_VAR: &str = "TRYON_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "tryon.toml";

const POSE_MODEL_FILENAME: &str = "pose_landmarks_detector_full.onnx";
const POSE_MODEL_URL: &str = "https://huggingface.co/unity/inference-engine-blaze-pose/resolve/main/models/pose_landmarks_detector_full.onnx";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TryOnConfig {
    pub camera: CameraConfig,
    pub pose: PoseConfig,
    pub overlay: OverlayConfig,
    pub product: Product,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub metadata_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            metadata_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseBackendKind {
    Ort,
    Fixture,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub backend: PoseBackendKind,
    pub model_url: String,
    pub model_path: PathBuf,
    pub target_fps: f32,
    pub min_pose_presence: f32,
    pub intra_threads: usize,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            backend: PoseBackendKind::Ort,
            model_url: POSE_MODEL_URL.to_string(),
            model_path: PathBuf::from("models").join(POSE_MODEL_FILENAME),
            target_fps: 15.0,
            min_pose_presence: 0.5,
            intra_threads: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub garment_opacity: f32,
    pub garment_scale: f32,
    pub vertical_offset: f32,
    pub draw_skeleton: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            garment_opacity: 0.8,
            garment_scale: 2.0,
            vertical_offset: 0.1,
            draw_skeleton: true,
        }
    }
}

impl CameraConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

impl PoseConfig {
    /// Minimum spacing between accepted ticks, `1000 / target_fps` ms.
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.target_fps.is_finite() && self.target_fps >= 1.0 {
            self.target_fps
        } else {
            1.0
        };
        Duration::from_secs_f64(1.0 / fps as f64)
    }
}

impl TryOnConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("{err:#}; using defaults");
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(path)
    }
}
