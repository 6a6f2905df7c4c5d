//! Thermal zone readings.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

pub const DEFAULT_CPU_THERMAL_PATH: &str = "/sys/devices/virtual/thermal/thermal_zone0/temp";
pub const DEFAULT_GPU_THERMAL_PATH: &str = "/sys/devices/virtual/thermal/thermal_zone1/temp";

pub trait TemperatureSensor: Send {
    fn read_celsius(&mut self) -> Result<f64>;
}

/// Sysfs thermal zone reporting millidegrees Celsius.
#[derive(Clone, Debug)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl TemperatureSensor for ThermalZone {
    fn read_celsius(&mut self) -> Result<f64> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read thermal zone {}", self.path.display()))?;
        parse_millidegrees(&raw)
            .with_context(|| format!("invalid thermal reading in {}", self.path.display()))
    }
}

fn parse_millidegrees(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    let milli: f64 = trimmed
        .parse()
        .map_err(|_| anyhow!("expected millidegrees, got '{}'", trimmed))?;
    if !milli.is_finite() {
        return Err(anyhow!("expected finite millidegrees, got '{}'", trimmed));
    }
    Ok(milli / 1000.0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Temperatures {
    pub cpu_c: f64,
    pub gpu_c: f64,
}

/// CPU and GPU sensors with failure isolation.
///
/// A failed read keeps the last good value for that sensor (0 before the
/// first good read) and logs a warning.
pub struct ThermalSensors {
    cpu: Box<dyn TemperatureSensor>,
    gpu: Box<dyn TemperatureSensor>,
    last: Temperatures,
}

impl ThermalSensors {
    pub fn new(cpu: Box<dyn TemperatureSensor>, gpu: Box<dyn TemperatureSensor>) -> Self {
        Self {
            cpu,
            gpu,
            last: Temperatures::default(),
        }
    }

    pub fn sysfs<P: Into<PathBuf>, Q: Into<PathBuf>>(cpu_path: P, gpu_path: Q) -> Self {
        Self::new(
            Box::new(ThermalZone::new(cpu_path)),
            Box::new(ThermalZone::new(gpu_path)),
        )
    }

    pub fn sample(&mut self) -> Temperatures {
        match self.cpu.read_celsius() {
            Ok(value) => self.last.cpu_c = value,
            Err(e) => log::warn!("cpu temperature read failed, reusing {:.1}C: {:#}", self.last.cpu_c, e),
        }
        match self.gpu.read_celsius() {
            Ok(value) => self.last.gpu_c = value,
            Err(e) => log::warn!("gpu temperature read failed, reusing {:.1}C: {:#}", self.last.gpu_c, e),
        }
        self.last
    }
}
