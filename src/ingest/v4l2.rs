//! V4L2 camera backend.
//!
//! Requests RGB3 at the configured geometry. Devices that refuse RGB3 are
//! retried with YUYV and converted in-process; anything else is an error.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraConfig, FrameSource};
use crate::frame::Frame;

pub struct V4l2Device {
    config: CameraConfig,
    state: Option<DeviceState>,
    pixel_format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_rate: f64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            frame_rate: f64::from(config.target_fps),
            config,
            state: None,
            pixel_format: PixelFormat::Rgb24,
        }
    }

    fn negotiate_format(&self, device: &v4l::Device) -> Result<(v4l::Format, PixelFormat)> {
        use v4l::video::Capture;

        for wanted in [PixelFormat::Rgb24, PixelFormat::Yuyv] {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(&wanted.fourcc());
            match device.set_format(&format) {
                Ok(applied) if PixelFormat::from_fourcc(applied.fourcc.repr) == Some(wanted) => {
                    return Ok((applied, wanted));
                }
                Ok(applied) => log::warn!(
                    "camera {}: asked for {:?}, device chose {}",
                    self.config.device,
                    wanted,
                    applied.fourcc
                ),
                Err(err) => log::warn!(
                    "camera {}: failed to set {:?} format: {}",
                    self.config.device,
                    wanted,
                    err
                ),
            }
        }
        Err(anyhow!(
            "camera {} supports neither RGB3 nor YUYV capture",
            self.config.device
        ))
    }

}

impl FrameSource for V4l2Device {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let (format, pixel_format) = self.negotiate_format(&device)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "camera {}: failed to set fps: {}",
                    self.config.device,
                    err
                );
            }
        }
        match device.params() {
            Ok(params) if params.interval.numerator > 0 => {
                self.frame_rate =
                    f64::from(params.interval.denominator) / f64::from(params.interval.numerator);
            }
            Ok(_) => {}
            Err(err) => log::warn!(
                "camera {}: failed to read capture parameters: {}",
                self.config.device,
                err
            ),
        }

        self.pixel_format = pixel_format;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "camera {} connected ({}x{} {:?}, {:.1} fps)",
            self.config.device,
            self.active_width,
            self.active_height,
            self.pixel_format,
            self.frame_rate
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        let rgb = normalize_to_rgb(&buf, self.active_width, self.active_height, self.pixel_format)?;
        let image = RgbImage::from_raw(self.active_width, self.active_height, rgb)
            .ok_or_else(|| anyhow!("v4l2 frame does not match {}x{}", self.active_width, self.active_height))?;

        Ok(Frame::new(image))
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}
