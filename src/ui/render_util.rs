use std::sync::Arc;

use gpui::RenderImage;
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::pipeline::compositor::OutputSurface;

/// Copies the composited surface into a GPU image.
pub(super) fn surface_to_image(surface: &OutputSurface) -> Option<Arc<RenderImage>> {
    if surface.width() == 0 || surface.height() == 0 {
        return None;
    }
    let mut bgra = surface.rgba().to_vec();
    to_bgra(&mut bgra);

    let buffer =
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(surface.width(), surface.height(), bgra)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}

/// GPUI expects BGRA; swapping in place avoids the async asset pipeline.
fn to_bgra(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_red_and_blue() {
        let mut px = vec![1, 2, 3, 4, 5, 6, 7, 8];
        to_bgra(&mut px);
        assert_eq!(px, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }
}
