//! Camera image to RGB8 conversion

use image::{Rgb, RgbImage};

use crate::error::CaptureError;
use crate::session::{CameraImage, PixelFormat};

/// Convert a raw camera image into an owned RGB8 image
pub fn to_rgb(frame: &CameraImage) -> Result<RgbImage, CaptureError> {
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 {
        return Err(CaptureError::Conversion(format!(
            "empty image ({}x{})",
            width, height
        )));
    }

    let pixels = width as usize * height as usize;
    match frame.format {
        PixelFormat::Rgb8 => {
            let data = require(&frame.data, pixels * 3, "RGB8")?;
            RgbImage::from_raw(width, height, data.to_vec())
                .ok_or_else(|| CaptureError::Conversion("RGB8 buffer rejected".to_string()))
        }
        PixelFormat::Rgba8 => {
            let data = require(&frame.data, pixels * 4, "RGBA8")?;
            let rgb = data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| CaptureError::Conversion("RGBA8 buffer rejected".to_string()))
        }
        PixelFormat::Nv21 => {
            let (cw, ch) = chroma_size(width, height);
            let data = require(&frame.data, pixels + cw * ch * 2, "NV21")?;
            let (luma, vu) = data.split_at(pixels);
            Ok(RgbImage::from_fn(width, height, |x, y| {
                let c = (y as usize / 2) * cw * 2 + (x as usize / 2) * 2;
                let luma = luma[y as usize * width as usize + x as usize];
                yuv_to_rgb(luma, vu[c + 1], vu[c])
            }))
        }
        PixelFormat::Yuv420 => {
            let (cw, ch) = chroma_size(width, height);
            let plane = cw * ch;
            let data = require(&frame.data, pixels + plane * 2, "I420")?;
            let (luma, chroma) = data.split_at(pixels);
            let (u, v) = chroma.split_at(plane);
            Ok(RgbImage::from_fn(width, height, |x, y| {
                let c = (y as usize / 2) * cw + (x as usize / 2);
                let luma = luma[y as usize * width as usize + x as usize];
                yuv_to_rgb(luma, u[c], v[c])
            }))
        }
        PixelFormat::Other(code) => Err(CaptureError::Conversion(format!(
            "unsupported pixel format 0x{:x}",
            code
        ))),
    }
}

fn require<'a>(data: &'a [u8], len: usize, format: &str) -> Result<&'a [u8], CaptureError> {
    data.get(..len).ok_or_else(|| {
        CaptureError::Conversion(format!(
            "{} buffer too short: {} bytes, need {}",
            format,
            data.len(),
            len
        ))
    })
}

fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// Full-range BT.601, fixed point with 8 fractional bits
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let y = y as i32;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = y + ((359 * e + 128) >> 8);
    let g = y - ((88 * d + 183 * e + 128) >> 8);
    let b = y + ((454 * d + 128) >> 8);

    Rgb([clamp(r), clamp(g), clamp(b)])
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
