use crate::filter::{History, Kernel, DEFAULT_WINDOW};
use hammerkey_ports::sample::SampleSource;
use hammerkey_ports::types::Micros;
use serde::{Deserialize, Serialize};

/// Filtered key state for one tick, in normalised ADC units and ADC bits per microsecond.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMotion {
    /// Reading as the sensor reported it, before polarity normalisation.
    pub raw: i32,
    pub position: f32,
    pub speed: f32,
    pub elapsed_us: Micros,
}

#[derive(Clone, Debug)]
pub struct AdcChannel {
    inverted: bool,
    samples: History<i32>,
    elapsed: History<Micros>,
    position_kernel: Kernel,
    speed_kernel: Kernel,
    motion: KeyMotion,
}

impl AdcChannel {
    pub fn new(position_kernel: Kernel, speed_kernel: Kernel) -> Self {
        let capacity = position_kernel.len().max(speed_kernel.len()).max(1);
        Self {
            inverted: false,
            samples: History::new(capacity),
            elapsed: History::new(capacity),
            position_kernel,
            speed_kernel,
            motion: KeyMotion::default(),
        }
    }

    pub fn savgol() -> Self {
        Self::new(
            Kernel::savgol_level(DEFAULT_WINDOW),
            Kernel::savgol_slope(DEFAULT_WINDOW),
        )
    }

    /// Switch sensor polarity. History in the old polarity is meaningless and is dropped; returns
    /// whether that happened.
    pub fn set_inverted(&mut self, inverted: bool) -> bool {
        if self.inverted == inverted {
            return false;
        }
        self.inverted = inverted;
        self.samples.clear();
        self.elapsed.clear();
        true
    }

    pub fn prime(&mut self, position: f32) {
        self.motion.position = position;
        self.motion.speed = 0.0;
    }

    pub fn sample(&mut self, source: &mut dyn SampleSource, elapsed_us: Micros) -> KeyMotion {
        let raw = source.read();
        let value = if self.inverted { raw.saturating_neg() } else { raw };
        self.samples.push(value);
        self.elapsed.push(elapsed_us);

        let position = self.position_kernel.apply(&self.samples);
        let speed = self.speed_kernel.apply(&self.samples) / elapsed_us.max(1) as f32;
        self.motion = KeyMotion {
            raw,
            position,
            speed,
            elapsed_us,
        };
        self.motion
    }

    pub fn warmed_up(&self) -> bool {
        self.samples.is_full()
    }

    pub fn motion(&self) -> KeyMotion {
        self.motion
    }

    pub fn samples(&self) -> &History<i32> {
        &self.samples
    }

    pub fn elapsed(&self) -> &History<Micros> {
        &self.elapsed
    }
}
