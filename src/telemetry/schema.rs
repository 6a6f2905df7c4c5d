use anyhow::{Context, Result};
use serde::Serialize;

use crate::orientation::OrientationVerdict;
use crate::sensors::Temperatures;
use crate::target::TargetRecord;
use crate::telemetry::TelemetryValue;
use crate::StreamId;

/// Keys of the shared table.
pub mod keys {
    pub const INTAKE_DETECTIONS: &str = "Intake Detections";
    pub const INTAKE_CLOSEST: &str = "Intake Closest Detection";
    pub const GRIPPER_DETECTIONS: &str = "Gripper Detections";
    pub const GRIPPER_CLOSEST: &str = "Gripper Closest Detection";
    pub const CONE_ROTATION: &str = "Cone Rotation";
    pub const NET_FPS: &str = "Net FPS";
    pub const LATENCY: &str = "Latency";
    pub const PIPELINE_FPS: &str = "Pipeline FPS";
    pub const CPU_TEMP: &str = "CPU Temp";
    pub const GPU_TEMP: &str = "GPU Temp";
    pub const INTAKE_CAMERA_FPS: &str = "Intake Camera FPS";
    pub const GRIPPER_CAMERA_FPS: &str = "Gripper Camera FPS";
    pub const STATUS: &str = "Status";
    pub const SHUTDOWN: &str = "Shutdown";
    pub const ENABLED: &str = "Enabled";
}

impl StreamId {
    pub fn detections_key(self) -> &'static str {
        match self {
            Self::Intake => keys::INTAKE_DETECTIONS,
            Self::Gripper => keys::GRIPPER_DETECTIONS,
        }
    }

    pub fn closest_key(self) -> &'static str {
        match self {
            Self::Intake => keys::INTAKE_CLOSEST,
            Self::Gripper => keys::GRIPPER_CLOSEST,
        }
    }

    pub fn camera_fps_key(self) -> &'static str {
        match self {
            Self::Intake => keys::INTAKE_CAMERA_FPS,
            Self::Gripper => keys::GRIPPER_CAMERA_FPS,
        }
    }
}

/// The one JSON encoder every structured key goes through.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to encode telemetry payload")
}

/// A missing closest target is published as an empty string.
pub fn encode_closest(closest: Option<&TargetRecord>) -> Result<String> {
    match closest {
        Some(record) => encode_json(record),
        None => Ok(String::new()),
    }
}

/// Detection results of one stream for one iteration.
#[derive(Clone, Debug, Default)]
pub struct StreamTelemetry {
    pub records: Vec<TargetRecord>,
    pub closest: Option<usize>,
}

impl StreamTelemetry {
    pub fn closest_record(&self) -> Option<&TargetRecord> {
        self.closest.and_then(|idx| self.records.get(idx))
    }
}

/// Everything a Running iteration publishes.
#[derive(Clone, Debug)]
pub struct TelemetrySnapshot<'a> {
    pub intake: &'a StreamTelemetry,
    pub gripper: &'a StreamTelemetry,
    pub rotation: OrientationVerdict,
    pub network_fps: f64,
    pub latency_ms: f64,
    pub pipeline_fps: f64,
    pub temperatures: Temperatures,
}

impl TelemetrySnapshot<'_> {
    /// Encoded (key, value) pairs in publication order.
    pub fn entries(&self) -> Result<Vec<(&'static str, TelemetryValue)>> {
        let mut entries = Vec::with_capacity(11);
        for (stream, data) in [(StreamId::Intake, self.intake), (StreamId::Gripper, self.gripper)] {
            entries.push((
                stream.detections_key(),
                TelemetryValue::String(encode_json(&data.records)?),
            ));
            entries.push((
                stream.closest_key(),
                TelemetryValue::String(encode_closest(data.closest_record())?),
            ));
        }
        entries.push((
            keys::CONE_ROTATION,
            TelemetryValue::String(self.rotation.label().to_string()),
        ));
        entries.push((keys::NET_FPS, TelemetryValue::Number(self.network_fps)));
        entries.push((keys::LATENCY, TelemetryValue::Number(self.latency_ms)));
        entries.push((keys::PIPELINE_FPS, TelemetryValue::Number(self.pipeline_fps)));
        entries.push((keys::CPU_TEMP, TelemetryValue::Number(self.temperatures.cpu_c)));
        entries.push((keys::GPU_TEMP, TelemetryValue::Number(self.temperatures.gpu_c)));
        Ok(entries)
    }
}
