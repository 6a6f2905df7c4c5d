//! sharksight - vision coprocessor daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, then command line)
//! 2. Opens the Intake and Gripper cameras and their MJPEG streams
//! 3. Connects the telemetry table on the MQTT broker
//! 4. Runs the detection loop until the controller requests shutdown
//!    (host power-off) or the process receives Ctrl-C / SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use shark_sight::detect::build_backend;
use shark_sight::stream::jpeg_quality;
use shark_sight::{
    CameraConfig, CameraSource, ExitReason, MjpegStream, MqttTable, Pipeline, PipelineConfig,
    PipelineParts, StreamParts, SystemctlHost, ThermalSensors, VideoSink,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Game piece detection for the robot coprocessor")]
struct Args {
    /// Minimum detection confidence (default 0.5).
    #[arg(long, env = "SHARKSIGHT_THRESHOLD")]
    threshold: Option<f32>,

    /// Camera capture height in pixels (default 720).
    #[arg(long, env = "SHARKSIGHT_CAPTURE_HEIGHT")]
    capture_height: Option<u32>,

    /// Camera capture width in pixels (default 1280).
    #[arg(long, env = "SHARKSIGHT_CAPTURE_WIDTH")]
    capture_width: Option<u32>,

    /// Outgoing stream height in pixels (default 270).
    #[arg(long, env = "SHARKSIGHT_STREAM_HEIGHT")]
    stream_height: Option<u32>,

    /// Outgoing stream width in pixels (default 480).
    #[arg(long, env = "SHARKSIGHT_STREAM_WIDTH")]
    stream_width: Option<u32>,

    /// JPEG quality of the outgoing streams, 0-100 (default 30).
    #[arg(long, env = "SHARKSIGHT_STREAM_COMPRESSION")]
    stream_compression: Option<u8>,

    /// Serve the annotated intake view on the local debug endpoint.
    #[arg(short, long, env = "SHARKSIGHT_DISPLAY")]
    display: bool,

    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "SHARKSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Intake camera device (or stub://name).
    #[arg(long, env = "SHARKSIGHT_INTAKE_DEVICE")]
    intake_device: Option<String>,

    /// Gripper camera device (or stub://name).
    #[arg(long, env = "SHARKSIGHT_GRIPPER_DEVICE")]
    gripper_device: Option<String>,

    /// MQTT broker carrying the telemetry table (host:port, mqtts:// for TLS).
    #[arg(long, env = "SHARKSIGHT_MQTT_BROKER_ADDR")]
    mqtt_broker_addr: Option<String>,

    /// ONNX detection model.
    #[arg(long, env = "SHARKSIGHT_MODEL")]
    model: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = PipelineConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, args);
    cfg.validate()?;

    let camera = |device: &str| -> Result<CameraSource> {
        CameraSource::new(CameraConfig {
            device: device.to_string(),
            width: cfg.capture.width,
            height: cfg.capture.height,
            target_fps: cfg.capture.fps,
        })
    };
    let quality = jpeg_quality(cfg.stream.compression);
    let intake = StreamParts {
        source: Box::new(camera(&cfg.capture.intake_device)?),
        sink: Box::new(MjpegStream::bind("Intake", &cfg.stream.intake_addr, quality)?),
    };
    let gripper = StreamParts {
        source: Box::new(camera(&cfg.capture.gripper_device)?),
        sink: Box::new(MjpegStream::bind("Gripper", &cfg.stream.gripper_addr, quality)?),
    };
    let display: Option<Box<dyn VideoSink>> = if cfg.display {
        Some(Box::new(MjpegStream::bind("Display", &cfg.stream.display_addr, quality)?))
    } else {
        None
    };

    let detector = build_backend(&cfg.detector, cfg.threshold)?;
    let table = Arc::new(MqttTable::connect(&cfg.telemetry)?);
    let sensors = ThermalSensors::sysfs(&cfg.sensors.cpu_path, &cfg.sensors.gpu_path);

    let mut pipeline = Pipeline::new(PipelineParts {
        config: cfg,
        intake,
        gripper,
        detector,
        table: table.clone(),
        sensors,
        host: Box::new(SystemctlHost),
        display,
    })?;

    let stop = pipeline.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let reason = pipeline.run()?;
    drop(pipeline);
    match reason {
        ExitReason::PoweredOff => log::warn!("host power-off issued, exiting"),
        ExitReason::Stopped => log::info!("sharksight stopped"),
    }
    if let Ok(table) = Arc::try_unwrap(table) {
        table.disconnect()?;
    }
    Ok(())
}

fn apply_args(cfg: &mut PipelineConfig, args: Args) {
    if let Some(threshold) = args.threshold {
        cfg.threshold = threshold;
    }
    if let Some(height) = args.capture_height {
        cfg.capture.height = height;
    }
    if let Some(width) = args.capture_width {
        cfg.capture.width = width;
    }
    if let Some(height) = args.stream_height {
        cfg.stream.height = height;
    }
    if let Some(width) = args.stream_width {
        cfg.stream.width = width;
    }
    if let Some(compression) = args.stream_compression {
        cfg.stream.compression = compression;
    }
    if args.display {
        cfg.display = true;
    }
    if let Some(device) = args.intake_device {
        cfg.capture.intake_device = device;
    }
    if let Some(device) = args.gripper_device {
        cfg.capture.gripper_device = device;
    }
    if let Some(addr) = args.mqtt_broker_addr {
        cfg.telemetry.broker_addr = addr;
    }
    if let Some(model) = args.model {
        cfg.detector.model_path = Some(model);
    }
}
