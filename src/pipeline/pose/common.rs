use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, Landmark, NUM_POSE_LANDMARKS};

/// Square input side of the landmark network.
pub const INPUT_SIZE: u32 = 256;
/// Values per raw landmark row: x, y, z, visibility, presence.
pub const LANDMARK_STRIDE: usize = 5;

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    /// Maps a point in network input pixels back to normalized frame
    /// coordinates. Points outside the frame are not clamped.
    pub fn to_normalized(&self, x: f32, y: f32) -> (f32, f32) {
        let px = (x - self.pad_x) / self.scale;
        let py = (y - self.pad_y) / self.scale;
        (px / self.orig_w as f32, py / self.orig_h as f32)
    }
}

pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    if !frame.is_well_formed() {
        return Err(anyhow!(
            "frame buffer size mismatch: got {} bytes for {}x{}",
            frame.rgba.len(),
            frame.width,
            frame.height
        ));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round().max(1.0) as u32).min(target_size);
    let new_h = ((frame.height as f32 * scale).round().max(1.0) as u32).min(target_size);

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, letterbox))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Presence flags come out either as a probability or as a raw logit
/// depending on the export.
pub fn presence_score(raw: f32) -> f32 {
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        sigmoid(raw)
    }
}

/// Decodes the flat landmark tensor. Only the first 33 rows are body
/// landmarks; the trailing auxiliary rows are dropped.
pub fn decode_landmarks(flat: &[f32], letterbox: &LetterboxInfo) -> Result<Vec<Landmark>> {
    let needed = NUM_POSE_LANDMARKS * LANDMARK_STRIDE;
    if flat.len() < needed {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            needed
        ));
    }

    let depth_scale = letterbox.scale * letterbox.orig_w as f32;
    Ok(flat
        .chunks_exact(LANDMARK_STRIDE)
        .take(NUM_POSE_LANDMARKS)
        .map(|row| {
            let (x, y) = letterbox.to_normalized(row[0], row[1]);
            Landmark::new(x, y, row[2] / depth_scale, sigmoid(row[3]))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn landscape_frame_is_padded_vertically() {
        let frame = Frame {
            rgba: vec![255; 64 * 32 * 4],
            width: 64,
            height: 32,
            timestamp: Instant::now(),
        };
        let (input, letterbox) = prepare_frame_with_size(&frame, 16).unwrap();
        assert_eq!(input.shape(), &[1, 16, 16, 3]);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 4.0);
        assert_eq!(input[[0, 0, 0, 0]], 0.0);
        assert_eq!(input[[0, 8, 8, 0]], 1.0);
    }

    #[test]
    fn decoded_points_are_normalized_to_the_source_frame() {
        let letterbox = LetterboxInfo {
            scale: 0.4,
            pad_x: 0.0,
            pad_y: 32.0,
            orig_w: 640,
            orig_h: 480,
        };
        let mut flat = vec![0.0; 39 * LANDMARK_STRIDE];
        flat[0] = 128.0;
        flat[1] = 128.0;
        flat[2] = 25.6;
        let landmarks = decode_landmarks(&flat, &letterbox).unwrap();
        assert_eq!(landmarks.len(), NUM_POSE_LANDMARKS);
        assert!((landmarks[0].x - 0.5).abs() < 1e-5);
        assert!((landmarks[0].y - 0.5).abs() < 1e-5);
        assert!((landmarks[0].z - 0.1).abs() < 1e-5);
        assert!((landmarks[0].visibility - 0.5).abs() < 1e-5);
    }

    #[test]
    fn short_tensor_is_rejected() {
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 1,
            orig_h: 1,
        };
        assert!(decode_landmarks(&[0.0; 20], &letterbox).is_err());
    }

    #[test]
    fn presence_accepts_probabilities_and_logits() {
        assert_eq!(presence_score(0.7), 0.7);
        assert!(presence_score(4.0) > 0.98);
        assert!(presence_score(-4.0) < 0.02);
    }
}
