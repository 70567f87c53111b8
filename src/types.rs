use std::{fmt, time::Instant};

use serde::Deserialize;

/// Number of landmarks produced per detected body.
pub const NUM_POSE_LANDMARKS: usize = 33;

pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

/// Catalog record handed in by the surrounding page. Only `id`, `name`,
/// `price` and `image` are read by the try-on pipeline.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: String,
    pub image: String,
    pub sizes: String,
    pub gender: String,
    pub category: String,
    pub brand: String,
}

impl Product {
    pub fn display_price(&self) -> String {
        format!("${}", self.price)
    }
}

impl Default for Product {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Classic Cotton T-Shirt".to_string(),
            price: "24.99".to_string(),
            image: "https://images.unsplash.com/photo-1521572163474-6864f9cf17ab?w=800&q=80"
                .to_string(),
            sizes: "S,M,L,XL,XXL".to_string(),
            gender: "Men".to_string(),
            category: "T-Shirts".to_string(),
            brand: "Nike".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn in_frame(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// One inference result. Replaces the previous one; no history is kept.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseFrameResult {
    pub landmarks: Vec<Landmark>,
    pub timestamp_ms: u64,
}

impl PoseFrameResult {
    /// A pose is usable when it carries the full landmark set and every value
    /// is finite. Anything else is treated as "no body this frame".
    pub fn is_usable(&self) -> bool {
        self.landmarks.len() == NUM_POSE_LANDMARKS && self.landmarks.iter().all(Landmark::is_finite)
    }

    /// The four torso landmarks, if all are present and inside the frame.
    pub fn torso(&self) -> Option<Torso> {
        if !self.is_usable() {
            return None;
        }
        let pick = |idx: usize| self.landmarks.get(idx).copied().filter(Landmark::in_frame);
        Some(Torso {
            left_shoulder: pick(LEFT_SHOULDER)?,
            right_shoulder: pick(RIGHT_SHOULDER)?,
            left_hip: pick(LEFT_HIP)?,
            right_hip: pick(RIGHT_HIP)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Torso {
    pub left_shoulder: Landmark,
    pub right_shoulder: Landmark,
    pub left_hip: Landmark,
    pub right_hip: Landmark,
}

/// Garment rectangle in output-surface pixels, recomputed every draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GarmentPlacement {
    pub center_x: f32,
    pub center_y: f32,
    pub shoulder_width: f32,
    pub torso_height: f32,
    pub width: f32,
    pub height: f32,
    /// Top-left corner the garment image is drawn at.
    pub left: f32,
    pub top: f32,
}

impl GarmentPlacement {
    /// Centers the garment on the shoulder midpoint, scaled up from the bare
    /// torso span and raised by `vertical_offset` of its own height.
    pub fn from_torso(
        torso: &Torso,
        surface_width: u32,
        surface_height: u32,
        scale: f32,
        vertical_offset: f32,
    ) -> Self {
        let (w, h) = (surface_width as f32, surface_height as f32);
        let center_x = (torso.left_shoulder.x + torso.right_shoulder.x) / 2.0 * w;
        let center_y = (torso.left_shoulder.y + torso.right_shoulder.y) / 2.0 * h;
        let hip_mid_y = (torso.left_hip.y + torso.right_hip.y) / 2.0 * h;

        let shoulder_width = (torso.right_shoulder.x - torso.left_shoulder.x).abs() * w;
        let torso_height = hip_mid_y - center_y;
        let width = shoulder_width * scale;
        let height = torso_height * scale;

        Self {
            center_x,
            center_y,
            shoulder_width,
            torso_height,
            width,
            height,
            left: center_x - width / 2.0,
            top: center_y - height * vertical_offset,
        }
    }

    /// Hips above shoulders or a zero-width span leave nothing to draw.
    pub fn is_drawable(&self) -> bool {
        self.width >= 1.0 && self.height >= 1.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Initializing,
    Ready,
    Starting,
    Active,
    Error,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GarmentState {
    Pending,
    Loaded,
    Failed,
}

/// Polled view of the session for the host page.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub error: Option<String>,
    pub garment_ready: bool,
    pub garment_error: Option<String>,
    pub can_start: bool,
    pub debug_log: Vec<String>,
}

impl SessionSnapshot {
    pub fn start_label(&self) -> &'static str {
        match self.state {
            SessionState::Active => "Stop Camera",
            SessionState::Starting => "Starting Camera...",
            SessionState::Idle | SessionState::Initializing => "Initializing AR...",
            _ if !self.garment_ready => "Loading Garment...",
            _ => "Start Camera",
        }
    }
}
