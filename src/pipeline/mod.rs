pub mod asset;
pub mod camera;
pub mod compositor;
pub mod pose;
pub mod rgba_converter;
pub mod scheduler;
pub mod skeleton;

// Re-exports for convenience
pub use asset::{AssetFetcher, AssetPreloader, DefaultFetcher, GarmentAsset};
pub use camera::{
    CameraError, CameraManager, CaptureConstraints, CaptureDevice, CaptureStream, Facing,
    StopStep, VideoSurface,
};
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, NokhwaDevice, available_cameras};
pub use compositor::{Compositor, DrawReport, OutputSurface};
pub use pose::{
    FixturePoseModel, OrtPoseModel, PoseError, PoseModel, PoseModelAdapter, model_from_config,
};
pub use scheduler::{FrameScheduler, FrameSink, SchedulerState, TickOutcome, TickStats};
