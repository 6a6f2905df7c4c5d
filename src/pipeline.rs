//! The vision control loop.
//!
//! One `tick` reads the shared health state, runs the gate and, when the gate
//! says Running, processes one frame pair:
//!
//! 1. capture Intake then Gripper
//! 2. detect on each (timed, for "Net FPS")
//! 3. derive target records and the closest target per stream
//! 4. classify cone orientation on the configured stream
//! 5. annotate, serve the debug display, downscale and stream both frames
//! 6. sample temperatures and publish the full telemetry snapshot

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::config::PipelineConfig;
use crate::detect::{DetectorBackend, RawDetection};
use crate::frame::{resize_into, BufferKey, BufferPool, BufferRole, Frame, PixelFormat};
use crate::health::{GateDecision, HealthState, HostControl, PAUSE_INTERVAL};
use crate::ingest::FrameSource;
use crate::orientation::{published_verdict, OrientationClassifier, OrientationVerdict};
use crate::overlay::{Crosshair, REFERENCE_COLOR, TARGET_COLOR};
use crate::sensors::{Temperatures, ThermalSensors};
use crate::stream::VideoSink;
use crate::target::{closest_index, TargetMetrics};
use crate::telemetry::{keys, StreamTelemetry, TelemetrySnapshot, TelemetryTable};
use crate::StreamId;

/// A camera and the video stream its annotated frames go to.
pub struct StreamParts {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn VideoSink>,
}

/// Collaborators the pipeline is assembled from.
pub struct PipelineParts {
    pub config: PipelineConfig,
    pub intake: StreamParts,
    pub gripper: StreamParts,
    pub detector: Box<dyn DetectorBackend>,
    pub table: Arc<dyn TelemetryTable>,
    pub sensors: ThermalSensors,
    pub host: Box<dyn HostControl>,
    /// Debug display sink, only present with `--display`.
    pub display: Option<Box<dyn VideoSink>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoopMetrics {
    pub network_fps: f64,
    pub latency_ms: f64,
    pub pipeline_fps: f64,
}

/// What one Running iteration produced.
#[derive(Clone, Debug)]
pub struct IterationReport {
    pub intake: StreamTelemetry,
    pub gripper: StreamTelemetry,
    pub rotation: OrientationVerdict,
    pub metrics: LoopMetrics,
    pub temperatures: Temperatures,
}

#[derive(Clone, Debug)]
pub enum TickOutcome {
    Ran(IterationReport),
    Paused(GateDecision),
    ShutDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// A shutdown request powered the host off.
    PoweredOff,
    /// The stop flag was raised (signal).
    Stopped,
}

/// Wall-clock marks between Running iterations.
///
/// Restarted when the loop resumes from a pause so paused time never shows
/// up as latency.
#[derive(Clone, Copy, Debug)]
pub struct LoopClock {
    mark: Instant,
}

impl Default for LoopClock {
    fn default() -> Self {
        Self {
            mark: Instant::now(),
        }
    }
}

impl LoopClock {
    pub fn reset(&mut self) {
        self.mark = Instant::now();
    }

    /// Time since the previous mark; starts a new interval.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.mark);
        self.mark = now;
        elapsed
    }
}

/// Milliseconds to frames per second; zero latency reports 0.
pub fn fps_from_latency(latency_ms: f64) -> f64 {
    if latency_ms > 0.0 {
        1000.0 / latency_ms
    } else {
        0.0
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    intake: StreamParts,
    gripper: StreamParts,
    detector: Box<dyn DetectorBackend>,
    table: Arc<dyn TelemetryTable>,
    sensors: ThermalSensors,
    host: Box<dyn HostControl>,
    display: Option<Box<dyn VideoSink>>,
    metrics: TargetMetrics,
    classifier: OrientationClassifier,
    crosshair: Crosshair,
    pool: BufferPool,
    clock: LoopClock,
    last_decision: Option<GateDecision>,
    pause_interval: Duration,
    started: bool,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Result<Self> {
        parts.config.validate()?;
        let metrics = TargetMetrics::for_capture(parts.config.capture.width, parts.config.capture.height)?;
        let crosshair = Crosshair::for_capture_height(parts.config.capture.height);
        Ok(Self {
            config: parts.config,
            intake: parts.intake,
            gripper: parts.gripper,
            detector: parts.detector,
            table: parts.table,
            sensors: parts.sensors,
            host: parts.host,
            display: parts.display,
            metrics,
            classifier: OrientationClassifier::new(),
            crosshair,
            pool: BufferPool::new(),
            clock: LoopClock::default(),
            last_decision: None,
            pause_interval: PAUSE_INTERVAL,
            started: false,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Override the sleep between paused ticks.
    pub fn with_pause_interval(mut self, interval: Duration) -> Self {
        self.pause_interval = interval;
        self
    }

    /// Flag that ends `run` at the next tick boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn buffer_allocations(&self) -> usize {
        self.pool.allocations()
    }

    /// Connect the cameras, warm the detector and seed the shared table.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.intake.source.connect()?;
        self.gripper.source.connect()?;
        self.detector.warm_up()?;

        self.table.put_bool(keys::SHUTDOWN, false)?;
        self.table.put_bool(keys::ENABLED, true)?;
        for (stream, parts) in [(StreamId::Intake, &self.intake), (StreamId::Gripper, &self.gripper)] {
            let fps = parts.source.frame_rate();
            self.table.put_number(stream.camera_fps_key(), fps)?;
            log::info!("{} camera running at {:.1} fps", stream.label(), fps);
        }

        log::info!(
            "pipeline started: detector {}, threshold {:.2}, capture {}x{}, stream {}x{} q{}, orientation on {} ({:?})",
            self.detector.name(),
            self.config.threshold,
            self.config.capture.width,
            self.config.capture.height,
            self.config.stream.width,
            self.config.stream.height,
            self.config.stream.compression,
            self.config.orientation.stream.label(),
            self.config.orientation.policy
        );
        self.clock.reset();
        self.started = true;
        Ok(())
    }

    /// Start, then tick until shutdown or the stop flag.
    pub fn run(&mut self) -> Result<ExitReason> {
        self.start()?;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                log::info!("stop requested, leaving the loop");
                return Ok(ExitReason::Stopped);
            }
            if let TickOutcome::ShutDown = self.tick()? {
                return Ok(ExitReason::PoweredOff);
            }
        }
    }

    pub fn read_health(&self) -> HealthState {
        let defaults = HealthState::default();
        HealthState {
            shutdown_requested: self.table.get_bool(keys::SHUTDOWN, defaults.shutdown_requested),
            cpu_temp_c: self.table.get_number(keys::CPU_TEMP, defaults.cpu_temp_c),
            gpu_temp_c: self.table.get_number(keys::GPU_TEMP, defaults.gpu_temp_c),
            enabled: self.table.get_bool(keys::ENABLED, defaults.enabled),
        }
    }

    pub fn tick(&mut self) -> Result<TickOutcome> {
        if !self.started {
            return Err(anyhow!("pipeline ticked before start"));
        }
        let health = self.read_health();
        let decision = GateDecision::evaluate(&health);
        let previous = self.last_decision.replace(decision);
        if previous != Some(decision) {
            self.table.put_string(keys::STATUS, decision.status())?;
            log_transition(decision, &health);
        }

        match decision {
            GateDecision::ShuttingDown => {
                self.host.power_off()?;
                Ok(TickOutcome::ShutDown)
            }
            GateDecision::ThermalPaused | GateDecision::DisabledPaused => {
                // Keep temperatures fresh so a thermal pause can clear.
                let temperatures = self.sensors.sample();
                self.table.put_number(keys::CPU_TEMP, temperatures.cpu_c)?;
                self.table.put_number(keys::GPU_TEMP, temperatures.gpu_c)?;
                if !self.pause_interval.is_zero() {
                    std::thread::sleep(self.pause_interval);
                }
                Ok(TickOutcome::Paused(decision))
            }
            GateDecision::Running => {
                if previous.map(GateDecision::is_paused).unwrap_or(false) {
                    self.clock.reset();
                }
                Ok(TickOutcome::Ran(self.run_iteration()?))
            }
        }
    }

    fn run_iteration(&mut self) -> Result<IterationReport> {
        let mut intake_frame = self.intake.source.next_frame()?;
        let mut gripper_frame = self.gripper.source.next_frame()?;

        let mut detect_time = Duration::ZERO;
        let intake_dets = detect_timed(self.detector.as_mut(), &intake_frame, &mut detect_time)?;
        let gripper_dets = detect_timed(self.detector.as_mut(), &gripper_frame, &mut detect_time)?;
        let network_fps = if detect_time.is_zero() {
            0.0
        } else {
            2.0 / detect_time.as_secs_f64()
        };

        let intake = self.stream_telemetry(&intake_frame, &intake_dets);
        let gripper = self.stream_telemetry(&gripper_frame, &gripper_dets);

        let rotation = match self.config.orientation.stream {
            StreamId::Intake => self.rotation(&intake_frame, &intake_dets, &intake),
            StreamId::Gripper => self.rotation(&gripper_frame, &gripper_dets, &gripper),
        };

        self.annotate(&mut intake_frame, &intake);
        self.annotate(&mut gripper_frame, &gripper);

        if let Some(display) = self.display.as_mut() {
            display.put_frame(&intake_frame.image)?;
            log::debug!("Object Detection | Network {:.0} FPS", network_fps);
        }

        let key = |stream| BufferKey {
            role: BufferRole::StreamScaled(stream),
            width: self.config.stream.width,
            height: self.config.stream.height,
            format: PixelFormat::Rgb8,
        };
        let (intake_key, gripper_key) = (key(StreamId::Intake), key(StreamId::Gripper));
        let scaled = self.pool.acquire(intake_key)?;
        resize_into(&intake_frame.image, scaled);
        self.intake.sink.put_frame(scaled)?;
        let scaled = self.pool.acquire(gripper_key)?;
        resize_into(&gripper_frame.image, scaled);
        self.gripper.sink.put_frame(scaled)?;

        let temperatures = self.sensors.sample();
        let latency_ms = self.clock.lap().as_secs_f64() * 1000.0;
        let metrics = LoopMetrics {
            network_fps,
            latency_ms,
            pipeline_fps: fps_from_latency(latency_ms),
        };

        let snapshot = TelemetrySnapshot {
            intake: &intake,
            gripper: &gripper,
            rotation,
            network_fps: metrics.network_fps,
            latency_ms: metrics.latency_ms,
            pipeline_fps: metrics.pipeline_fps,
            temperatures,
        };
        for (key, value) in snapshot.entries()? {
            self.table.put(key, value)?;
        }

        log::debug!(
            "iteration: intake {} dets, gripper {} dets, rotation {}, latency {:.1} ms, {:.1} fps",
            intake.records.len(),
            gripper.records.len(),
            rotation.label(),
            metrics.latency_ms,
            metrics.pipeline_fps
        );

        Ok(IterationReport {
            intake,
            gripper,
            rotation,
            metrics,
            temperatures,
        })
    }

    fn stream_telemetry(&self, frame: &Frame, detections: &[RawDetection]) -> StreamTelemetry {
        let records = self.metrics.records(detections, frame.timestamp_secs());
        let closest = closest_index(&records);
        StreamTelemetry { records, closest }
    }

    fn rotation(
        &self,
        frame: &Frame,
        detections: &[RawDetection],
        telemetry: &StreamTelemetry,
    ) -> OrientationVerdict {
        let verdicts = self.classifier.classify_all(&frame.image, detections);
        published_verdict(self.config.orientation.policy, &telemetry.records, &verdicts)
    }

    fn annotate(&self, frame: &mut Frame, telemetry: &StreamTelemetry) {
        if let Some(closest) = telemetry.closest_record() {
            let (x, y) = closest.center();
            self.crosshair.draw(&mut frame.image, x, y, TARGET_COLOR);
        }
        let reference = self.metrics.reference();
        self.crosshair
            .draw(&mut frame.image, reference.x as f32, reference.y as f32, REFERENCE_COLOR);
    }
}

fn detect_timed(
    detector: &mut dyn DetectorBackend,
    frame: &Frame,
    elapsed: &mut Duration,
) -> Result<Vec<RawDetection>> {
    let started = Instant::now();
    let detections = detector.detect(&frame.image)?;
    *elapsed += started.elapsed();
    Ok(detections)
}

fn log_transition(decision: GateDecision, health: &HealthState) {
    match decision {
        GateDecision::ShuttingDown => log::warn!("shutdown requested, powering off"),
        GateDecision::ThermalPaused => log::warn!(
            "thermal pause: cpu {:.1}C, gpu {:.1}C",
            health.cpu_temp_c,
            health.gpu_temp_c
        ),
        GateDecision::DisabledPaused => log::info!("processing disabled by the control system"),
        GateDecision::Running => log::info!("processing running"),
    }
}
