use std::sync::Arc;

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::RgbaImage;
use rayon::prelude::*;

use super::skeleton;
use crate::{
    config::OverlayConfig,
    types::{Frame, GarmentPlacement, PoseFrameResult},
};

/// What a single draw actually put on the surface.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawReport {
    pub background: bool,
    pub skeleton: bool,
    pub garment: Option<GarmentPlacement>,
}

/// The visible RGBA drawing surface. Mutated only by [`Compositor`].
#[derive(Debug, Default)]
pub struct OutputSurface {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    generation: u64,
}

impl OutputSurface {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Bumped after every completed draw.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.rgba = vec![0; (width as usize) * (height as usize) * 4];
    }

    fn clear(&mut self) {
        for px in self.rgba.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 255]);
        }
    }
}

struct ScaledGarment {
    source: Arc<RgbaImage>,
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

/// Draws video, skeleton and garment for one tick.
pub struct Compositor {
    surface: OutputSurface,
    style: OverlayConfig,
    resizer: fir::Resizer,
    scaled: Option<ScaledGarment>,
}

impl Compositor {
    pub fn new(style: OverlayConfig) -> Self {
        Self {
            surface: OutputSurface::default(),
            style,
            resizer: fir::Resizer::new(),
            scaled: None,
        }
    }

    pub fn surface(&self) -> &OutputSurface {
        &self.surface
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if self.surface.width != width || self.surface.height != height {
            self.surface.resize(width, height);
        }
    }

    /// Clears the surface, draws `frame` as the background and, when `pose`
    /// is usable, the skeleton and garment on top.
    pub fn compose(
        &mut self,
        frame: &Frame,
        pose: Option<&PoseFrameResult>,
        garment: Option<&Arc<RgbaImage>>,
    ) -> DrawReport {
        let mut report = DrawReport {
            background: self.draw_background(frame),
            ..DrawReport::default()
        };

        if let Some(pose) = pose.filter(|pose| pose.is_usable()) {
            let (width, height) = (self.surface.width, self.surface.height);
            if self.style.draw_skeleton {
                skeleton::draw_pose(&mut self.surface.rgba, width, height, &pose.landmarks);
                report.skeleton = true;
            }

            if let (Some(garment), Some(torso)) = (garment, pose.torso()) {
                let placement = GarmentPlacement::from_torso(
                    &torso,
                    width,
                    height,
                    self.style.garment_scale,
                    self.style.vertical_offset,
                );
                match self.draw_garment(garment, &placement) {
                    Ok(true) => report.garment = Some(placement),
                    Ok(false) => {}
                    Err(err) => log::debug!("garment draw skipped: {err:?}"),
                }
            }
        }

        self.surface.generation += 1;
        report
    }

    fn draw_background(&mut self, frame: &Frame) -> bool {
        if self.surface.width == 0 || self.surface.height == 0 {
            self.resize(frame.width, frame.height);
        }
        if !frame.is_well_formed() {
            self.surface.clear();
            return false;
        }

        if frame.width == self.surface.width && frame.height == self.surface.height {
            self.surface.rgba.copy_from_slice(&frame.rgba);
            return true;
        }

        match resize_rgba(
            &mut self.resizer,
            frame.rgba.clone(),
            (frame.width, frame.height),
            (self.surface.width, self.surface.height),
        ) {
            Ok(scaled) => {
                self.surface.rgba = scaled;
                true
            }
            Err(err) => {
                log::debug!("background scale failed: {err:?}");
                self.surface.clear();
                false
            }
        }
    }

    fn draw_garment(&mut self, garment: &Arc<RgbaImage>, placement: &GarmentPlacement) -> Result<bool> {
        if !placement.is_drawable() {
            return Ok(false);
        }
        let target = (
            placement.width.round() as u32,
            placement.height.round() as u32,
        );

        let cached = matches!(
            &self.scaled,
            Some(s) if Arc::ptr_eq(&s.source, garment) && (s.width, s.height) == target
        );
        if !cached {
            let rgba = resize_rgba(
                &mut self.resizer,
                garment.as_raw().clone(),
                garment.dimensions(),
                target,
            )?;
            self.scaled = Some(ScaledGarment {
                source: Arc::clone(garment),
                width: target.0,
                height: target.1,
                rgba,
            });
        }
        let Some(scaled) = self.scaled.as_ref() else {
            return Ok(false);
        };

        blend_image(
            &mut self.surface,
            scaled,
            (placement.left.round() as i64, placement.top.round() as i64),
            self.style.garment_opacity,
        );
        Ok(true)
    }
}

fn resize_rgba(
    resizer: &mut fir::Resizer,
    rgba: Vec<u8>,
    from: (u32, u32),
    to: (u32, u32),
) -> Result<Vec<u8>> {
    let src = fir::images::Image::from_vec_u8(from.0, from.1, rgba, fir::PixelType::U8x4)?;
    let mut dst = fir::images::Image::new(to.0.max(1), to.1.max(1), fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src, &mut dst, Some(&options))
        .context("fast resize failed")?;
    Ok(dst.into_vec())
}

/// Source-over blend of `image` at `origin`, scaled by `opacity`. Pixels
/// outside the surface are clipped.
fn blend_image(surface: &mut OutputSurface, image: &ScaledGarment, origin: (i64, i64), opacity: f32) {
    let (sw, sh) = (surface.width as i64, surface.height as i64);
    let (iw, ih) = (image.width as i64, image.height as i64);
    let x_start = origin.0.max(0);
    let x_end = (origin.0 + iw).min(sw);
    let y_start = origin.1.max(0);
    let y_end = (origin.1 + ih).min(sh);
    if x_start >= x_end || y_start >= y_end {
        return;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let row_bytes = surface.width as usize * 4;
    surface
        .rgba
        .par_chunks_exact_mut(row_bytes)
        .enumerate()
        .filter(|(y, _)| (y_start..y_end).contains(&(*y as i64)))
        .for_each(|(y, row)| {
            let src_y = (y as i64 - origin.1) as usize;
            for x in x_start..x_end {
                let src_x = (x - origin.0) as usize;
                let s = (src_y * image.width as usize + src_x) * 4;
                let Some(src) = image.rgba.get(s..s + 4) else {
                    continue;
                };
                let alpha = src[3] as f32 / 255.0 * opacity;
                let d = x as usize * 4;
                let dst = &mut row[d..d + 4];
                for c in 0..3 {
                    dst[c] = (src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha)).round() as u8;
                }
                dst[3] = 255;
            }
        });
}
