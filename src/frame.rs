//! Captured frames and reusable working buffers.
//!
//! - `Frame`: one captured RGB image plus its capture time. Owned by a single
//!   iteration; annotation draws on it in place.
//! - `BufferPool`: working buffers keyed by (role, width, height, format),
//!   allocated on first use and reused every iteration after that.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::StreamId;

pub struct Frame {
    pub image: RgbImage,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: SystemTime::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Capture time in seconds since the Unix epoch.
    pub fn timestamp_secs(&self) -> f64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

// ----------------------------------------------------------------------------
// BufferPool: buffer-pool-of-one per role
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Downscaled frame sent to a video stream.
    StreamScaled(StreamId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub role: BufferRole,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Working buffers that live for the whole run.
///
/// A role's geometry is fixed by its first acquisition; asking for the same
/// role with a different geometry is an error rather than a reallocation.
#[derive(Default)]
pub struct BufferPool {
    buffers: HashMap<BufferRole, (BufferKey, RgbImage)>,
    allocations: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, key: BufferKey) -> Result<&mut RgbImage> {
        if key.width == 0 || key.height == 0 {
            return Err(anyhow!("buffer {:?} must have non-zero dimensions", key.role));
        }
        let allocations = &mut self.allocations;
        let (existing, buffer) = self.buffers.entry(key.role).or_insert_with(|| {
            *allocations += 1;
            (key, RgbImage::new(key.width, key.height))
        });
        if *existing != key {
            return Err(anyhow!(
                "buffer {:?} was allocated as {}x{} {:?}, requested {}x{} {:?}",
                key.role,
                existing.width,
                existing.height,
                existing.format,
                key.width,
                key.height,
                key.format
            ));
        }
        Ok(buffer)
    }

    /// Number of buffers allocated so far.
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

/// Bilinear resize into an existing buffer.
pub fn resize_into(src: &RgbImage, dst: &mut RgbImage) {
    let (sw, sh) = src.dimensions();
    let (dw, dh) = dst.dimensions();
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
        return;
    }
    let scale_x = sw as f32 / dw as f32;
    let scale_y = sh as f32 / dh as f32;

    for y in 0..dh {
        let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (sh - 1) as f32);
        let y0 = fy.floor() as u32;
        let y1 = (y0 + 1).min(sh - 1);
        let wy = fy - y0 as f32;
        for x in 0..dw {
            let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (sw - 1) as f32);
            let x0 = fx.floor() as u32;
            let x1 = (x0 + 1).min(sw - 1);
            let wx = fx - x0 as f32;

            let p00 = src.get_pixel(x0, y0);
            let p10 = src.get_pixel(x1, y0);
            let p01 = src.get_pixel(x0, y1);
            let p11 = src.get_pixel(x1, y1);
            let mut out = [0u8; 3];
            for (c, value) in out.iter_mut().enumerate() {
                let top = f32::from(p00[c]) * (1.0 - wx) + f32::from(p10[c]) * wx;
                let bottom = f32::from(p01[c]) * (1.0 - wx) + f32::from(p11[c]) * wx;
                *value = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
            }
            dst.put_pixel(x, y, Rgb(out));
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
