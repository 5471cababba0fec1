//! Two-phase estimation of a key's rest and fully-pressed readings.
//!
//! Up phase: every reading for a fixed time goes into a reservoir; its median and deviation
//! describe the key at rest. Down phase: only readings far from the rest median are kept, so the
//! reservoir fills with the excursions of real presses. The session ends when the caller says so.

use crate::reservoir::{ReservoirStats, Summary};
use hammerkey_ports::types::Micros;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub up_phase_us: u64,
    pub reservoir_size: usize,
    pub outlier_sigma: f32,
    pub adoption_sigma: f32,
    pub min_down_samples: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            up_phase_us: 1_000_000,
            reservoir_size: 512,
            outlier_sigma: 3.0,
            adoption_sigma: 50.0,
            min_down_samples: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    Up,
    Down,
}

/// Raw (un-normalised) values a finished session recommends.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub adc_up: i32,
    /// `None` when the down phase did not produce a trustworthy value.
    pub adc_down: Option<i32>,
    pub up: Summary,
    pub down: Option<Summary>,
    pub down_samples_seen: u64,
}

#[derive(Clone, Debug)]
pub struct CalibrationSession {
    config: CalibrationConfig,
    phase: CalibrationPhase,
    up_elapsed_us: u64,
    reservoir: ReservoirStats,
    up: Option<Summary>,
}

impl CalibrationSession {
    pub fn new(config: CalibrationConfig) -> Self {
        Self::with_reservoir(config, ReservoirStats::new(config.reservoir_size))
    }

    pub fn with_seed(config: CalibrationConfig, seed: u64) -> Self {
        Self::with_reservoir(config, ReservoirStats::with_seed(config.reservoir_size, seed))
    }

    fn with_reservoir(config: CalibrationConfig, reservoir: ReservoirStats) -> Self {
        Self {
            config,
            phase: CalibrationPhase::Up,
            up_elapsed_us: 0,
            reservoir,
            up: None,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn up_summary(&self) -> Option<Summary> {
        self.up
    }

    pub fn offer(&mut self, raw: i32, elapsed_us: Micros) {
        match self.phase {
            CalibrationPhase::Up => {
                self.reservoir.offer(raw);
                self.up_elapsed_us += u64::from(elapsed_us);
                if self.up_elapsed_us > self.config.up_phase_us {
                    self.up = self.reservoir.summary();
                    self.reservoir.clear();
                    self.phase = CalibrationPhase::Down;
                    if let Some(up) = self.up {
                        log::debug!(
                            "calibration up phase done: median {:.1}, std {:.2}, {} samples",
                            up.median,
                            up.std_dev,
                            up.count
                        );
                    }
                }
            }
            CalibrationPhase::Down => {
                let Some(up) = self.up else {
                    return;
                };
                let deviation = (raw as f32 - up.median).abs();
                if deviation > self.config.outlier_sigma * up.std_dev {
                    self.reservoir.offer(raw);
                }
            }
        }
    }

    /// Close the session. `None` if not even the rest position could be measured.
    pub fn finish(self) -> Option<CalibrationOutcome> {
        let (up, down, down_samples_seen) = match self.phase {
            CalibrationPhase::Up => (self.reservoir.summary()?, None, 0),
            CalibrationPhase::Down => (
                self.up?,
                self.reservoir.summary(),
                self.reservoir.seen(),
            ),
        };

        let adc_down = down
            .filter(|down| {
                down_samples_seen >= self.config.min_down_samples
                    && (down.median - up.median).abs() > self.config.adoption_sigma * up.std_dev
            })
            .map(|down| down.median.round() as i32);

        Some(CalibrationOutcome {
            adc_up: up.median.round() as i32,
            adc_down,
            up,
            down,
            down_samples_seen,
        })
    }
}
