use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use shark_sight::detect::CONE_CLASS_ID;
use shark_sight::sensors::TemperatureSensor;
use shark_sight::telemetry::keys;
use shark_sight::{
    ExitReason, Frame, FrameSource, GateDecision, HostControl, InMemoryTable, OrientationVerdict,
    Pipeline, PipelineConfig, PipelineParts, RawDetection, StreamId, StreamParts, StubBackend,
    TelemetryTable, TelemetryValue, ThermalSensors, TickOutcome, VideoSink,
};

const GRAY: Rgb<u8> = Rgb([128, 128, 128]);
const ORANGE: Rgb<u8> = Rgb([255, 128, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 200, 0]);

// ----------------------------------------------------------------------------
// Fakes
// ----------------------------------------------------------------------------

struct StillCamera {
    image: RgbImage,
    fps: f64,
    captured: Arc<AtomicUsize>,
}

impl FrameSource for StillCamera {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.captured.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(self.image.clone()))
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    frames: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl VideoSink for RecordingSink {
    fn put_frame(&mut self, image: &RgbImage) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| anyhow!("sink lock poisoned"))?
            .push(image.dimensions());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CountingHost {
    power_offs: Arc<AtomicUsize>,
}

impl HostControl for CountingHost {
    fn power_off(&mut self) -> Result<()> {
        self.power_offs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FixedSensor(f64);

impl TemperatureSensor for FixedSensor {
    fn read_celsius(&mut self) -> Result<f64> {
        Ok(self.0)
    }
}

struct Harness {
    pipeline: Pipeline,
    table: Arc<InMemoryTable>,
    intake_captured: Arc<AtomicUsize>,
    gripper_captured: Arc<AtomicUsize>,
    intake_sink: RecordingSink,
    gripper_sink: RecordingSink,
    display_sink: RecordingSink,
    host: CountingHost,
}

fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.capture.width = 320;
    cfg.capture.height = 180;
    cfg.stream.width = 160;
    cfg.stream.height = 90;
    cfg
}

/// Gray frame with an orange cone whose lower half carries the yellow band.
fn upright_cone_frame() -> RgbImage {
    let mut image = RgbImage::from_pixel(320, 180, GRAY);
    for y in 60..120 {
        for x in 100..140 {
            let color = if y >= 90 { YELLOW } else { ORANGE };
            image.put_pixel(x, y, color);
        }
    }
    image
}

fn cube() -> RawDetection {
    RawDetection::new(1, 0.9, [100.0, 50.0, 140.0, 90.0], 0)
}

fn cone() -> RawDetection {
    RawDetection::new(CONE_CLASS_ID, 0.8, [100.0, 60.0, 140.0, 120.0], 0)
}

/// Script entries alternate intake, gripper.
fn harness(cfg: PipelineConfig, script: Vec<Vec<RawDetection>>) -> Harness {
    let table = Arc::new(InMemoryTable::new());
    let intake_captured = Arc::new(AtomicUsize::new(0));
    let gripper_captured = Arc::new(AtomicUsize::new(0));
    let intake_sink = RecordingSink::default();
    let gripper_sink = RecordingSink::default();
    let display_sink = RecordingSink::default();
    let host = CountingHost::default();

    let display: Option<Box<dyn VideoSink>> = if cfg.display {
        Some(Box::new(display_sink.clone()))
    } else {
        None
    };
    let parts = PipelineParts {
        config: cfg,
        intake: StreamParts {
            source: Box::new(StillCamera {
                image: RgbImage::from_pixel(320, 180, GRAY),
                fps: 30.0,
                captured: intake_captured.clone(),
            }),
            sink: Box::new(intake_sink.clone()),
        },
        gripper: StreamParts {
            source: Box::new(StillCamera {
                image: upright_cone_frame(),
                fps: 15.0,
                captured: gripper_captured.clone(),
            }),
            sink: Box::new(gripper_sink.clone()),
        },
        detector: Box::new(StubBackend::scripted(script).with_threshold(0.5)),
        table: table.clone(),
        sensors: ThermalSensors::new(Box::new(FixedSensor(52.0)), Box::new(FixedSensor(48.0))),
        host: Box::new(host.clone()),
        display,
    };
    let pipeline = Pipeline::new(parts)
        .expect("pipeline")
        .with_pause_interval(Duration::ZERO);

    Harness {
        pipeline,
        table,
        intake_captured,
        gripper_captured,
        intake_sink,
        gripper_sink,
        display_sink,
        host,
    }
}

fn string_key(table: &InMemoryTable, key: &str) -> String {
    match table.get(key) {
        Some(TelemetryValue::String(value)) => value,
        other => panic!("{key} is not a string: {other:?}"),
    }
}

fn json_key(table: &InMemoryTable, key: &str) -> serde_json::Value {
    serde_json::from_str(&string_key(table, key)).expect("valid JSON")
}

// ----------------------------------------------------------------------------
// Startup
// ----------------------------------------------------------------------------

#[test]
fn startup_seeds_control_keys_and_camera_rates() -> Result<()> {
    let mut h = harness(config(), Vec::new());
    h.pipeline.start()?;

    assert_eq!(h.table.get(keys::SHUTDOWN), Some(TelemetryValue::Bool(false)));
    assert_eq!(h.table.get(keys::ENABLED), Some(TelemetryValue::Bool(true)));
    assert_eq!(h.table.get_number(keys::INTAKE_CAMERA_FPS, 0.0), 30.0);
    assert_eq!(h.table.get_number(keys::GRIPPER_CAMERA_FPS, 0.0), 15.0);
    assert_eq!(h.intake_captured.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn tick_before_start_is_an_error() {
    let mut h = harness(config(), Vec::new());
    assert!(h.pipeline.tick().is_err());
}

// ----------------------------------------------------------------------------
// Gate
// ----------------------------------------------------------------------------

#[test]
fn shutdown_wins_over_every_other_condition() -> Result<()> {
    let mut h = harness(config(), Vec::new());
    h.pipeline.start()?;
    h.table.put_bool(keys::SHUTDOWN, true)?;
    h.table.put_number(keys::CPU_TEMP, 90.0)?;
    h.table.put_bool(keys::ENABLED, false)?;

    let reason = h.pipeline.run()?;

    assert_eq!(reason, ExitReason::PoweredOff);
    assert_eq!(h.host.power_offs.load(Ordering::SeqCst), 1);
    assert_eq!(string_key(&h.table, keys::STATUS), "Shutting Down");
    assert_eq!(h.intake_captured.load(Ordering::SeqCst), 0);
    assert_eq!(h.gripper_captured.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn thermal_pause_skips_capture_and_recovers() -> Result<()> {
    let mut h = harness(config(), Vec::new());
    h.pipeline.start()?;
    h.table.put_number(keys::CPU_TEMP, 86.0)?;
    h.table.put_number(keys::GPU_TEMP, 0.0)?;

    let outcome = h.pipeline.tick()?;
    assert!(matches!(outcome, TickOutcome::Paused(GateDecision::ThermalPaused)));
    assert_eq!(string_key(&h.table, keys::STATUS), "Thermal Paused");
    assert_eq!(h.intake_captured.load(Ordering::SeqCst), 0);
    assert_eq!(h.intake_sink.count(), 0);
    assert_eq!(h.host.power_offs.load(Ordering::SeqCst), 0);

    // The paused tick refreshed the temperatures from the sensors.
    assert_eq!(h.table.get_number(keys::CPU_TEMP, 0.0), 52.0);
    let outcome = h.pipeline.tick()?;
    assert!(matches!(outcome, TickOutcome::Ran(_)));
    assert_eq!(string_key(&h.table, keys::STATUS), "Running");
    Ok(())
}

#[test]
fn disabled_pause_skips_capture() -> Result<()> {
    let mut h = harness(config(), Vec::new());
    h.pipeline.start()?;
    h.table.put_number(keys::CPU_TEMP, 70.0)?;
    h.table.put_number(keys::GPU_TEMP, 70.0)?;
    h.table.put_bool(keys::ENABLED, false)?;

    for _ in 0..3 {
        let outcome = h.pipeline.tick()?;
        assert!(matches!(outcome, TickOutcome::Paused(GateDecision::DisabledPaused)));
    }
    assert_eq!(string_key(&h.table, keys::STATUS), "Disabled");
    assert_eq!(h.gripper_captured.load(Ordering::SeqCst), 0);
    assert_eq!(h.gripper_sink.count(), 0);
    Ok(())
}

#[test]
fn stop_flag_ends_run_without_power_off() -> Result<()> {
    let mut h = harness(config(), Vec::new());
    h.pipeline.stop_handle().store(true, Ordering::SeqCst);

    assert_eq!(h.pipeline.run()?, ExitReason::Stopped);
    assert_eq!(h.host.power_offs.load(Ordering::SeqCst), 0);
    Ok(())
}

// ----------------------------------------------------------------------------
// Running iterations
// ----------------------------------------------------------------------------

#[test]
fn running_tick_publishes_every_key() -> Result<()> {
    let mut h = harness(config(), vec![vec![cube()], vec![]]);
    h.pipeline.start()?;
    h.table.put_number(keys::CPU_TEMP, 70.0)?;
    h.table.put_number(keys::GPU_TEMP, 70.0)?;

    let TickOutcome::Ran(report) = h.pipeline.tick()? else {
        panic!("expected a running iteration");
    };

    for key in [
        keys::INTAKE_DETECTIONS,
        keys::INTAKE_CLOSEST,
        keys::GRIPPER_DETECTIONS,
        keys::GRIPPER_CLOSEST,
        keys::CONE_ROTATION,
        keys::NET_FPS,
        keys::LATENCY,
        keys::PIPELINE_FPS,
        keys::CPU_TEMP,
        keys::GPU_TEMP,
        keys::INTAKE_CAMERA_FPS,
        keys::GRIPPER_CAMERA_FPS,
        keys::STATUS,
    ] {
        assert!(h.table.get(key).is_some(), "missing {key}");
    }

    let detections = json_key(&h.table, keys::INTAKE_DETECTIONS);
    assert_eq!(detections.as_array().map(|a| a.len()), Some(1));

    let closest = json_key(&h.table, keys::INTAKE_CLOSEST);
    assert_eq!(closest["ClassName"], "cubes");
    assert_eq!(closest["CenterX"], 120.0);
    assert_eq!(closest["CenterY"], 70.0);
    assert_eq!(closest["TargetX"], -40.0);
    assert_eq!(closest["TargetY"], -20.0);

    assert_eq!(string_key(&h.table, keys::GRIPPER_DETECTIONS), "[]");
    assert_eq!(string_key(&h.table, keys::GRIPPER_CLOSEST), "");
    assert_eq!(string_key(&h.table, keys::CONE_ROTATION), "Not Cone");
    assert_eq!(string_key(&h.table, keys::STATUS), "Running");

    // Sensor readings replace whatever the table held.
    assert_eq!(h.table.get_number(keys::CPU_TEMP, 0.0), 52.0);
    assert_eq!(h.table.get_number(keys::GPU_TEMP, 0.0), 48.0);
    assert_eq!(report.temperatures.gpu_c, 48.0);

    assert!(report.metrics.latency_ms >= 0.0);
    assert_eq!(h.table.get_number(keys::LATENCY, -1.0), report.metrics.latency_ms);
    assert_eq!(report.intake.closest, Some(0));
    assert_eq!(report.gripper.closest, None);
    Ok(())
}

#[test]
fn streams_receive_downscaled_frames_from_reused_buffers() -> Result<()> {
    let mut h = harness(config(), Vec::new());
    h.pipeline.start()?;

    for _ in 0..3 {
        assert!(matches!(h.pipeline.tick()?, TickOutcome::Ran(_)));
    }

    assert_eq!(h.pipeline.buffer_allocations(), 2);
    assert_eq!(h.intake_sink.count(), 3);
    assert_eq!(h.gripper_sink.count(), 3);
    assert!(h
        .intake_sink
        .frames
        .lock()
        .unwrap()
        .iter()
        .all(|dims| *dims == (160, 90)));
    assert_eq!(h.intake_captured.load(Ordering::SeqCst), 3);
    assert_eq!(h.display_sink.count(), 0);
    Ok(())
}

#[test]
fn display_gets_full_resolution_intake_frame() -> Result<()> {
    let mut cfg = config();
    cfg.display = true;
    let mut h = harness(cfg, Vec::new());
    h.pipeline.start()?;
    h.pipeline.tick()?;

    assert_eq!(*h.display_sink.frames.lock().unwrap(), vec![(320, 180)]);
    Ok(())
}

#[test]
fn gripper_cone_orientation_is_published() -> Result<()> {
    let mut h = harness(config(), vec![vec![], vec![cone()]]);
    h.pipeline.start()?;

    let TickOutcome::Ran(report) = h.pipeline.tick()? else {
        panic!("expected a running iteration");
    };
    assert_eq!(report.rotation, OrientationVerdict::Normal);
    assert_eq!(string_key(&h.table, keys::CONE_ROTATION), "Normal");
    assert_eq!(json_key(&h.table, keys::GRIPPER_CLOSEST)["ClassName"], "cones");
    Ok(())
}

#[test]
fn orientation_stream_is_configurable() -> Result<()> {
    let mut cfg = config();
    cfg.orientation.stream = StreamId::Intake;
    let mut h = harness(cfg, vec![vec![], vec![cone()]]);
    h.pipeline.start()?;

    let TickOutcome::Ran(report) = h.pipeline.tick()? else {
        panic!("expected a running iteration");
    };
    assert_eq!(report.rotation, OrientationVerdict::NotApplicable);
    assert_eq!(string_key(&h.table, keys::CONE_ROTATION), "Not Cone");
    Ok(())
}

#[test]
fn detections_below_threshold_are_dropped() -> Result<()> {
    let faint = RawDetection::new(1, 0.3, [0.0, 0.0, 10.0, 10.0], 0);
    let mut h = harness(config(), vec![vec![faint], vec![]]);
    h.pipeline.start()?;
    h.pipeline.tick()?;

    assert_eq!(string_key(&h.table, keys::INTAKE_DETECTIONS), "[]");
    assert_eq!(string_key(&h.table, keys::INTAKE_CLOSEST), "");
    Ok(())
}
