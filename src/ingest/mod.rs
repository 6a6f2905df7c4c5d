//! Camera frame sources.
//!
//! - `stub://` device paths produce synthetic frames (tests, bench runs)
//! - anything else is opened as a V4L2 device (feature: ingest-v4l2)
//!
//! Every source hands out owned RGB `Frame`s at the configured capture
//! geometry. Frames are never written to disk by this layer.

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// A camera the pipeline can pull frames from.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Nominal capture rate reported by the device.
    fn frame_rate(&self) -> f64;
}

#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0") or "stub://<name>".
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Requested frame rate; 0 leaves the device default.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            target_fps: 30,
        }
    }
}

/// Camera selected by device path.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Device),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "camera {} needs non-zero dimensions, got {}x{}",
                config.device,
                config.width,
                config.height
            ));
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticSource::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(V4l2Device::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "camera {} requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    fn frame_rate(&self) -> f64 {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.frame_rate(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.frame_rate(),
        }
    }
}
