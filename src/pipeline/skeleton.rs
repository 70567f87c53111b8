use crate::types::Landmark;

/// Canonical 33-point body topology.
pub const POSE_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

pub const CONNECTOR_THICKNESS: f32 = 3.0;
const CONNECTOR_COLOR: [u8; 3] = [0, 255, 0];
const LANDMARK_COLOR: [u8; 3] = [255, 0, 0];
const SKELETON_ALPHA: f32 = 0.8;

// Depth range mapped onto marker radius: near points are drawn larger.
const DEPTH_NEAR: f32 = -0.15;
const DEPTH_FAR: f32 = 0.1;
const RADIUS_NEAR: f32 = 5.0;
const RADIUS_FAR: f32 = 1.0;

/// Linear map of `value` from `[from_lo, from_hi]` onto `[to_lo, to_hi]`,
/// clamped to the output range.
pub fn lerp_clamped(value: f32, from_lo: f32, from_hi: f32, to_lo: f32, to_hi: f32) -> f32 {
    let span = from_hi - from_lo;
    let t = if span == 0.0 {
        0.0
    } else {
        ((value - from_lo) / span).clamp(0.0, 1.0)
    };
    to_lo + (to_hi - to_lo) * t
}

pub fn depth_radius(z: f32) -> f32 {
    lerp_clamped(z, DEPTH_NEAR, DEPTH_FAR, RADIUS_NEAR, RADIUS_FAR)
}

/// Draws landmark markers and then the bone connectors over them. Landmarks
/// are normalized; anything falling outside the buffer is clipped.
pub fn draw_pose(buffer: &mut [u8], width: u32, height: u32, landmarks: &[Landmark]) {
    let to_px = |lm: &Landmark| (lm.x * width as f32, lm.y * height as f32);

    for lm in landmarks {
        fill_circle(
            buffer,
            width,
            height,
            to_px(lm),
            depth_radius(lm.z),
            LANDMARK_COLOR,
            SKELETON_ALPHA,
        );
    }

    for &(a, b) in POSE_CONNECTIONS {
        if let (Some(pa), Some(pb)) = (landmarks.get(a), landmarks.get(b)) {
            draw_segment(
                buffer,
                width,
                height,
                to_px(pa),
                to_px(pb),
                CONNECTOR_THICKNESS,
                CONNECTOR_COLOR,
                SKELETON_ALPHA,
            );
        }
    }
}

/// Fills every pixel whose center lies within `thickness / 2` of the segment.
/// Each pixel is blended at most once so translucent strokes stay even.
pub fn draw_segment(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: (f32, f32),
    p1: (f32, f32),
    thickness: f32,
    color: [u8; 3],
    alpha: f32,
) {
    let half = (thickness.max(1.0)) / 2.0;
    let Some((x_lo, x_hi)) = clip_span(p0.0.min(p1.0) - half, p0.0.max(p1.0) + half, width) else {
        return;
    };
    let Some((y_lo, y_hi)) = clip_span(p0.1.min(p1.1) - half, p0.1.max(p1.1) + half, height)
    else {
        return;
    };

    let (dx, dy) = (p1.0 - p0.0, p1.1 - p0.1);
    let len_sq = dx * dx + dy * dy;
    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
            let t = if len_sq > 0.0 {
                (((cx - p0.0) * dx + (cy - p0.1) * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (nx, ny) = (p0.0 + t * dx - cx, p0.1 + t * dy - cy);
            if nx * nx + ny * ny <= half * half {
                blend_pixel(buffer, width, x, y, color, alpha);
            }
        }
    }
}

pub fn fill_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (f32, f32),
    radius: f32,
    color: [u8; 3],
    alpha: f32,
) {
    let radius = radius.max(0.5);
    let Some((x_lo, x_hi)) = clip_span(center.0 - radius, center.0 + radius, width) else {
        return;
    };
    let Some((y_lo, y_hi)) = clip_span(center.1 - radius, center.1 + radius, height) else {
        return;
    };

    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            let (ox, oy) = (x as f32 + 0.5 - center.0, y as f32 + 0.5 - center.1);
            if ox * ox + oy * oy <= radius * radius {
                blend_pixel(buffer, width, x, y, color, alpha);
            }
        }
    }
}

/// Source-over blend of `color` at `alpha` into the RGBA pixel at `(x, y)`.
pub fn blend_pixel(buffer: &mut [u8], width: u32, x: u32, y: u32, color: [u8; 3], alpha: f32) {
    let idx = ((y as usize) * (width as usize) + x as usize) * 4;
    let Some(px) = buffer.get_mut(idx..idx + 4) else {
        return;
    };
    let a = alpha.clamp(0.0, 1.0);
    for c in 0..3 {
        px[c] = (color[c] as f32 * a + px[c] as f32 * (1.0 - a)).round() as u8;
    }
    px[3] = 255;
}

/// Integer pixel range covering `[lo, hi]`, clipped to `[0, extent)`.
fn clip_span(lo: f32, hi: f32, extent: u32) -> Option<(u32, u32)> {
    if extent == 0 || !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    let max = extent as f32 - 1.0;
    if hi < 0.0 || lo > max {
        return None;
    }
    Some((lo.max(0.0).floor() as u32, hi.min(max).floor() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(width: u32, height: u32) -> Vec<u8> {
        let mut buf = vec![0u8; (width * height * 4) as usize];
        for px in buf.chunks_exact_mut(4) {
            px[3] = 255;
        }
        buf
    }

    fn pixel(buf: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) * 4) as usize;
        [buf[idx], buf[idx + 1], buf[idx + 2], buf[idx + 3]]
    }

    #[test]
    fn depth_radius_maps_near_to_large() {
        assert_eq!(depth_radius(-0.15), 5.0);
        assert_eq!(depth_radius(0.1), 1.0);
        assert!((depth_radius(-0.025) - 3.0).abs() < 1e-5);
        assert_eq!(depth_radius(-3.0), 5.0);
        assert_eq!(depth_radius(2.0), 1.0);
    }

    #[test]
    fn topology_stays_within_landmark_set() {
        assert_eq!(POSE_CONNECTIONS.len(), 35);
        assert!(
            POSE_CONNECTIONS
                .iter()
                .all(|&(a, b)| a < crate::types::NUM_POSE_LANDMARKS
                    && b < crate::types::NUM_POSE_LANDMARKS)
        );
    }

    #[test]
    fn translucent_segment_blends_once_per_pixel() {
        let mut buf = canvas(20, 20);
        draw_segment(&mut buf, 20, 20, (2.0, 10.5), (18.0, 10.5), 3.0, [0, 255, 0], 0.8);
        // 0.8 * 255 = 204 regardless of how many brush positions cover the pixel.
        assert_eq!(pixel(&buf, 20, 10, 10), [0, 204, 0, 255]);
        assert_eq!(pixel(&buf, 20, 10, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn shapes_outside_the_buffer_are_clipped() {
        let mut buf = canvas(8, 8);
        fill_circle(&mut buf, 8, 8, (-50.0, -50.0), 5.0, [255, 0, 0], 1.0);
        draw_segment(&mut buf, 8, 8, (-5.0, 4.0), (100.0, 4.0), 3.0, [255, 0, 0], 1.0);
        fill_circle(&mut buf, 8, 8, (f32::NAN, 1.0), 5.0, [255, 0, 0], 1.0);
        assert_eq!(pixel(&buf, 8, 0, 4), [255, 0, 0, 255]);
        assert_eq!(pixel(&buf, 8, 7, 4), [255, 0, 0, 255]);
        assert_eq!(pixel(&buf, 8, 0, 0), [0, 0, 0, 255]);
    }
}
