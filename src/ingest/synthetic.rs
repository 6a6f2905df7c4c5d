use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{CameraConfig, FrameSource};
use crate::frame::Frame;

/// Frame generator for `stub://` cameras.
///
/// Produces a slowly drifting gradient so consecutive frames differ.
pub struct SyntheticSource {
    config: CameraConfig,
    connected: bool,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "camera {} connected ({}x{}, synthetic)",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("camera {} not connected", self.config.device));
        }
        self.frame_count += 1;
        let drift = self.frame_count;
        let image = RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let r = ((u64::from(x) + drift) % 256) as u8;
            let g = ((u64::from(y) + drift) % 256) as u8;
            Rgb([r, g, 64])
        });
        Ok(Frame::new(image))
    }

    fn frame_rate(&self) -> f64 {
        f64::from(self.config.target_fps)
    }
}
