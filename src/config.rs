use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::orientation::VerdictPolicy;
use crate::sensors::{DEFAULT_CPU_THERMAL_PATH, DEFAULT_GPU_THERMAL_PATH};
use crate::StreamId;

const DEFAULT_THRESHOLD: f32 = 0.5;
const DEFAULT_CAPTURE_WIDTH: u32 = 1280;
const DEFAULT_CAPTURE_HEIGHT: u32 = 720;
const DEFAULT_CAPTURE_FPS: u32 = 30;
const DEFAULT_INTAKE_DEVICE: &str = "/dev/video0";
const DEFAULT_GRIPPER_DEVICE: &str = "/dev/video1";
const DEFAULT_STREAM_WIDTH: u32 = 480;
const DEFAULT_STREAM_HEIGHT: u32 = 270;
const DEFAULT_STREAM_COMPRESSION: u8 = 30;
const DEFAULT_INTAKE_STREAM_ADDR: &str = "0.0.0.0:1181";
const DEFAULT_GRIPPER_STREAM_ADDR: &str = "0.0.0.0:1182";
const DEFAULT_DISPLAY_ADDR: &str = "127.0.0.1:1183";
const DEFAULT_MODEL_PATH: &str = "models/ssd-mobilenet.onnx";
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_TOPIC_PREFIX: &str = "SharkSight";
const DEFAULT_CLIENT_ID: &str = "sharksight";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    display: Option<bool>,
    capture: Option<CaptureConfigFile>,
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
    sensors: Option<SensorConfigFile>,
    orientation: Option<OrientationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    intake_device: Option<String>,
    gripper_device: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    compression: Option<u8>,
    intake_addr: Option<String>,
    gripper_addr: Option<String>,
    display_addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    broker_addr: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    cpu_path: Option<PathBuf>,
    gpu_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct OrientationConfigFile {
    stream: Option<StreamId>,
    policy: Option<VerdictPolicy>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum detection confidence.
    pub threshold: f32,
    /// Serve the annotated intake frame on the local debug endpoint.
    pub display: bool,
    pub capture: CaptureSettings,
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
    pub telemetry: TelemetrySettings,
    pub sensors: SensorSettings,
    pub orientation: OrientationSettings,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub intake_device: String,
    pub gripper_device: String,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    /// JPEG quality of the outgoing streams (0-100).
    pub compression: u8,
    pub intake_addr: String,
    pub gripper_addr: String,
    pub display_addr: String,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// "stub" or "tract".
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub broker_addr: String,
    pub topic_prefix: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub cpu_path: PathBuf,
    pub gpu_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct OrientationSettings {
    /// Stream whose detections feed "Cone Rotation".
    pub stream: StreamId,
    pub policy: VerdictPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load from the file named by `SHARKSIGHT_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SHARKSIGHT_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Defaults, then the optional file, then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let telemetry = file.telemetry.unwrap_or_default();
        let sensors = file.sensors.unwrap_or_default();
        let orientation = file.orientation.unwrap_or_default();

        Self {
            threshold: detector.threshold.unwrap_or(DEFAULT_THRESHOLD),
            display: file.display.unwrap_or(false),
            capture: CaptureSettings {
                width: capture.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
                fps: capture.fps.unwrap_or(DEFAULT_CAPTURE_FPS),
                intake_device: capture
                    .intake_device
                    .unwrap_or_else(|| DEFAULT_INTAKE_DEVICE.to_string()),
                gripper_device: capture
                    .gripper_device
                    .unwrap_or_else(|| DEFAULT_GRIPPER_DEVICE.to_string()),
            },
            stream: StreamSettings {
                width: stream.width.unwrap_or(DEFAULT_STREAM_WIDTH),
                height: stream.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
                compression: stream.compression.unwrap_or(DEFAULT_STREAM_COMPRESSION),
                intake_addr: stream
                    .intake_addr
                    .unwrap_or_else(|| DEFAULT_INTAKE_STREAM_ADDR.to_string()),
                gripper_addr: stream
                    .gripper_addr
                    .unwrap_or_else(|| DEFAULT_GRIPPER_STREAM_ADDR.to_string()),
                display_addr: stream
                    .display_addr
                    .unwrap_or_else(|| DEFAULT_DISPLAY_ADDR.to_string()),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or_else(default_backend),
                model_path: detector
                    .model_path
                    .or_else(|| Some(PathBuf::from(DEFAULT_MODEL_PATH))),
                input_width: detector.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: detector.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            },
            telemetry: TelemetrySettings {
                broker_addr: telemetry
                    .broker_addr
                    .unwrap_or_else(|| DEFAULT_BROKER_ADDR.to_string()),
                topic_prefix: telemetry
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
                client_id: telemetry
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                username: None,
                password: None,
            },
            sensors: SensorSettings {
                cpu_path: sensors
                    .cpu_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CPU_THERMAL_PATH)),
                gpu_path: sensors
                    .gpu_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_GPU_THERMAL_PATH)),
            },
            orientation: OrientationSettings {
                stream: orientation.stream.unwrap_or(StreamId::Gripper),
                policy: orientation.policy.unwrap_or_default(),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(backend) = env_non_empty("SHARKSIGHT_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(prefix) = env_non_empty("SHARKSIGHT_MQTT_TOPIC_PREFIX") {
            self.telemetry.topic_prefix = prefix;
        }
        if let Some(client_id) = env_non_empty("SHARKSIGHT_MQTT_CLIENT_ID") {
            self.telemetry.client_id = client_id;
        }
        if let Some(username) = env_non_empty("SHARKSIGHT_MQTT_USERNAME") {
            self.telemetry.username = Some(username);
        }
        if let Some(password) = env_non_empty("SHARKSIGHT_MQTT_PASSWORD") {
            self.telemetry.password = Some(password);
        }
        if let Some(addr) = env_non_empty("SHARKSIGHT_INTAKE_STREAM_ADDR") {
            self.stream.intake_addr = addr;
        }
        if let Some(addr) = env_non_empty("SHARKSIGHT_GRIPPER_STREAM_ADDR") {
            self.stream.gripper_addr = addr;
        }
        if let Some(path) = env_non_empty("SHARKSIGHT_CPU_THERMAL_PATH") {
            self.sensors.cpu_path = PathBuf::from(path);
        }
        if let Some(path) = env_non_empty("SHARKSIGHT_GPU_THERMAL_PATH") {
            self.sensors.gpu_path = PathBuf::from(path);
        }
        if let Some(fps) = env_non_empty("SHARKSIGHT_CAPTURE_FPS") {
            self.capture.fps = fps
                .parse()
                .map_err(|_| anyhow!("SHARKSIGHT_CAPTURE_FPS must be a non-negative integer"))?;
        }
        Ok(())
    }

    /// Check cross-field constraints. Called again after CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(anyhow!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture dimensions must be greater than zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream dimensions must be greater than zero"));
        }
        if self.stream.compression > 100 {
            return Err(anyhow!(
                "stream compression must be at most 100, got {}",
                self.stream.compression
            ));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input dimensions must be greater than zero"));
        }
        if self.telemetry.topic_prefix.trim_matches('/').is_empty() {
            return Err(anyhow!("telemetry topic prefix must not be empty"));
        }

        let intake = parse_stream_addr("intake", &self.stream.intake_addr)?;
        let gripper = parse_stream_addr("gripper", &self.stream.gripper_addr)?;
        if intake.port() != 0 && intake.port() == gripper.port() {
            return Err(anyhow!(
                "intake and gripper streams must use distinct ports, both use {}",
                intake.port()
            ));
        }
        if self.display {
            let display = parse_stream_addr("display", &self.stream.display_addr)?;
            if !display.ip().is_loopback() {
                return Err(anyhow!(
                    "display endpoint must bind a loopback address, got {}",
                    display
                ));
            }
            if display.port() != 0
                && (display.port() == intake.port() || display.port() == gripper.port())
            {
                return Err(anyhow!(
                    "display endpoint port {} collides with a stream port",
                    display.port()
                ));
            }
        }
        Ok(())
    }
}

fn default_backend() -> String {
    if cfg!(feature = "backend-tract") {
        "tract".to_string()
    } else {
        "stub".to_string()
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_stream_addr(name: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| anyhow!("invalid {} stream address '{}': {}", name, addr, e))
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
