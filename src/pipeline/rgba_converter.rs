use std::{convert::TryFrom, time::Instant};

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Pixel layouts a capture device may hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceLayout {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

#[cfg(feature = "camera-nokhwa")]
impl From<nokhwa::utils::FrameFormat> for SourceLayout {
    fn from(format: nokhwa::utils::FrameFormat) -> Self {
        use nokhwa::utils::FrameFormat;
        match format {
            FrameFormat::NV12 => SourceLayout::Nv12,
            FrameFormat::YUYV => SourceLayout::Yuyv,
            FrameFormat::MJPEG => SourceLayout::Mjpeg,
            FrameFormat::RAWRGB => SourceLayout::Rgb,
            FrameFormat::RAWBGR => SourceLayout::Bgr,
            FrameFormat::GRAY => SourceLayout::Gray,
        }
    }
}

#[cfg(feature = "camera-nokhwa")]
pub fn convert_camera_buffer(buffer: &nokhwa::Buffer, captured_at: Instant) -> Result<Frame> {
    let resolution = buffer.resolution();
    to_frame(
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
        buffer.source_frame_format().into(),
        captured_at,
    )
}

/// Decodes one captured buffer into an RGBA [`Frame`].
pub fn to_frame(
    data: &[u8],
    width: u32,
    height: u32,
    layout: SourceLayout,
    captured_at: Instant,
) -> Result<Frame> {
    let (rgba, width, height) = match layout {
        SourceLayout::Nv12 => (nv12_to_rgba(data, width, height)?, width, height),
        SourceLayout::Yuyv => (yuyv_to_rgba(data, width, height)?, width, height),
        SourceLayout::Mjpeg => mjpeg_to_rgba(data)?,
        SourceLayout::Rgb => (packed_to_rgba(data, width, height, Packing::Rgb)?, width, height),
        SourceLayout::Bgr => (packed_to_rgba(data, width, height, Packing::Bgr)?, width, height),
        SourceLayout::Gray => (packed_to_rgba(data, width, height, Packing::Gray)?, width, height),
    };

    Ok(Frame {
        rgba,
        width,
        height,
        timestamp: captured_at,
    })
}

fn require_len(kind: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{kind} buffer too small: got {}, expected {}",
            data.len(),
            expected
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;
    require_len("NV12", data, y_plane_len + uv_plane_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; y_plane_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    require_len("YUYV", data, width as usize * height as usize * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; (width as usize * height as usize) * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))?;
    Ok(rgba)
}

/// MJPEG carries its own dimensions; trust the decoder over the driver.
fn mjpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    let expected_len = usize::try_from(width)
        .and_then(|w| usize::try_from(height).map(|h| w * h * 4))
        .map_err(|_| anyhow!("MJPEG dimensions do not fit usize"))?;
    require_len("MJPEG output", &rgba, expected_len)?;
    Ok((rgba, width, height))
}

#[derive(Clone, Copy)]
enum Packing {
    Rgb,
    Bgr,
    Gray,
}

impl Packing {
    fn channels(self) -> usize {
        match self {
            Packing::Rgb | Packing::Bgr => 3,
            Packing::Gray => 1,
        }
    }
}

fn packed_to_rgba(data: &[u8], width: u32, height: u32, packing: Packing) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let channels = packing.channels();
    let kind = match packing {
        Packing::Rgb => "RGB",
        Packing::Bgr => "BGR",
        Packing::Gray => "GRAY",
    };
    require_len(kind, data, pixels * channels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(channels))
        .for_each(|(dst, src)| {
            let [r, g, b] = match packing {
                Packing::Rgb => [src[0], src[1], src[2]],
                Packing::Bgr => [src[2], src[1], src[0]],
                Packing::Gray => [src[0]; 3],
            };
            dst.copy_from_slice(&[r, g, b, 255]);
        });
    Ok(rgba)
}
