//! Real-time garment try-on: camera capture, pose tracking and a garment
//! overlay composited onto the live video.

pub mod config;
pub mod model_download;
pub mod pipeline;
pub mod session;
pub mod types;
pub mod ui;

pub use config::TryOnConfig;
pub use session::{Session, SessionDeps, SessionError};
pub use types::{Product, SessionSnapshot, SessionState};
