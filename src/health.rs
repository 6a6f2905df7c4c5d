//! Per-iteration health gate.
//!
//! The gate reads the shared health state once per tick and decides whether
//! the pipeline halts the host, idles, or processes a frame pair. Priority is
//! fixed: shutdown request, then temperature, then the enable flag.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Temperature above which processing pauses, in degrees Celsius.
pub const THERMAL_LIMIT_C: f64 = 85.0;

/// Sleep between ticks while paused.
pub const PAUSE_INTERVAL: Duration = Duration::from_millis(20);

/// Health inputs, as read from the telemetry table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthState {
    pub cpu_temp_c: f64,
    pub gpu_temp_c: f64,
    pub enabled: bool,
    pub shutdown_requested: bool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            cpu_temp_c: 0.0,
            gpu_temp_c: 0.0,
            enabled: true,
            shutdown_requested: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Terminal: power off the host and leave the loop.
    ShuttingDown,
    ThermalPaused,
    DisabledPaused,
    Running,
}

impl GateDecision {
    pub fn evaluate(state: &HealthState) -> Self {
        if state.shutdown_requested {
            Self::ShuttingDown
        } else if state.cpu_temp_c > THERMAL_LIMIT_C || state.gpu_temp_c > THERMAL_LIMIT_C {
            Self::ThermalPaused
        } else if !state.enabled {
            Self::DisabledPaused
        } else {
            Self::Running
        }
    }

    pub fn is_paused(self) -> bool {
        matches!(self, Self::ThermalPaused | Self::DisabledPaused)
    }

    /// Value written to the "Status" key.
    pub fn status(self) -> &'static str {
        match self {
            Self::ShuttingDown => "Shutting Down",
            Self::ThermalPaused => "Thermal Paused",
            Self::DisabledPaused => "Disabled",
            Self::Running => "Running",
        }
    }
}

/// Host-level side effects of the gate.
pub trait HostControl: Send {
    /// Power the host off. On real hardware this does not come back.
    fn power_off(&mut self) -> Result<()>;
}

/// Powers off through systemd.
#[derive(Debug, Default)]
pub struct SystemctlHost;

impl HostControl for SystemctlHost {
    fn power_off(&mut self) -> Result<()> {
        let status = std::process::Command::new("systemctl")
            .arg("poweroff")
            .status()
            .context("failed to run systemctl poweroff")?;
        if !status.success() {
            return Err(anyhow!("systemctl poweroff exited with {}", status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(cpu: f64, gpu: f64, enabled: bool, shutdown: bool) -> HealthState {
        HealthState {
            cpu_temp_c: cpu,
            gpu_temp_c: gpu,
            enabled,
            shutdown_requested: shutdown,
        }
    }

    #[test]
    fn shutdown_beats_everything() {
        assert_eq!(
            GateDecision::evaluate(&state(90.0, 0.0, false, true)),
            GateDecision::ShuttingDown
        );
        assert_eq!(
            GateDecision::evaluate(&state(20.0, 20.0, true, true)),
            GateDecision::ShuttingDown
        );
    }

    #[test]
    fn hot_cpu_pauses() {
        assert_eq!(
            GateDecision::evaluate(&state(86.0, 0.0, true, false)),
            GateDecision::ThermalPaused
        );
    }

    #[test]
    fn hot_gpu_pauses_even_when_disabled() {
        assert_eq!(
            GateDecision::evaluate(&state(40.0, 85.5, false, false)),
            GateDecision::ThermalPaused
        );
    }

    #[test]
    fn limit_itself_is_not_over_temperature() {
        assert_eq!(
            GateDecision::evaluate(&state(85.0, 85.0, true, false)),
            GateDecision::Running
        );
    }

    #[test]
    fn disabled_pauses() {
        assert_eq!(
            GateDecision::evaluate(&state(70.0, 70.0, false, false)),
            GateDecision::DisabledPaused
        );
    }

    #[test]
    fn healthy_runs() {
        assert_eq!(
            GateDecision::evaluate(&state(70.0, 70.0, true, false)),
            GateDecision::Running
        );
        assert_eq!(
            GateDecision::evaluate(&HealthState::default()),
            GateDecision::Running
        );
    }

    #[test]
    fn pause_states_are_flagged() {
        assert!(GateDecision::ThermalPaused.is_paused());
        assert!(GateDecision::DisabledPaused.is_paused());
        assert!(!GateDecision::Running.is_paused());
        assert!(!GateDecision::ShuttingDown.is_paused());
    }
}
