//! SharkSight vision coprocessor
//!
//! Runs on the robot's onboard computer. Each iteration pulls one frame from
//! the Intake camera and one from the Gripper camera, detects game pieces,
//! derives aiming metrics, classifies cone orientation, annotates and streams
//! both views, and publishes the results to the shared telemetry table the
//! robot controller reads.
//!
//! # Control
//!
//! The controller steers the coprocessor through the same table:
//!
//! 1. **Shutdown**: powers the host off and ends the loop.
//! 2. **CPU/GPU Temp** above 85 C: processing pauses until they drop.
//! 3. **Enabled** false: processing pauses until re-enabled.
//!
//! # Module Structure
//!
//! - `config`: file, environment and validation layers
//! - `ingest`: camera sources (V4L2, synthetic `stub://`)
//! - `detect`: detector backends (tract ONNX, scripted stub)
//! - `target`, `orientation`: per-detection metrics and cone verdicts
//! - `health`, `sensors`: gate decisions and thermal zones
//! - `telemetry`: table abstraction, MQTT transport and key schema
//! - `frame`, `overlay`, `stream`: buffers, crosshairs and MJPEG output
//! - `pipeline`: the control loop tying it together

use serde::{Deserialize, Serialize};

pub mod config;
pub mod detect;
pub mod frame;
pub mod health;
pub mod ingest;
pub mod orientation;
pub mod overlay;
pub mod pipeline;
pub mod sensors;
pub mod stream;
pub mod target;
pub mod telemetry;

pub use config::PipelineConfig;
pub use detect::{DetectorBackend, RawDetection, StubBackend};
pub use frame::{BufferPool, Frame};
pub use health::{GateDecision, HealthState, HostControl, SystemctlHost};
pub use ingest::{CameraConfig, CameraSource, FrameSource};
pub use orientation::{OrientationVerdict, VerdictPolicy};
pub use pipeline::{ExitReason, Pipeline, PipelineParts, StreamParts, TickOutcome};
pub use sensors::{Temperatures, ThermalSensors};
pub use stream::{MjpegStream, VideoSink};
pub use target::{TargetMetrics, TargetRecord};
pub use telemetry::{InMemoryTable, MqttTable, TelemetryTable, TelemetryValue};

/// The two camera streams, in processing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    Intake,
    Gripper,
}

impl StreamId {
    pub const ALL: [StreamId; 2] = [StreamId::Intake, StreamId::Gripper];

    pub fn label(self) -> &'static str {
        match self {
            Self::Intake => "Intake",
            Self::Gripper => "Gripper",
        }
    }
}
