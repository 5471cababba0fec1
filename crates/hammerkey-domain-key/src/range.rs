use serde::{Deserialize, Serialize};

/// Gravity in millimetres per microsecond squared.
const GRAVITY_MM_PER_US2: f32 = 9.81e-9;

/// Fully-pressed and fully-released sensor values, stored so that `down > up`.
///
/// Sensors that read lower when pressed are negated once here; every reading taken for the key
/// goes through [`SensorRange::normalize`] so downstream comparisons are plain `<`/`>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRange {
    down: i32,
    up: i32,
    inverted: bool,
}

impl SensorRange {
    pub fn from_raw(raw_down: i32, raw_up: i32) -> Self {
        if raw_down < raw_up {
            Self {
                down: raw_down.saturating_neg(),
                up: raw_up.saturating_neg(),
                inverted: true,
            }
        } else {
            Self {
                down: raw_down,
                up: raw_up,
                inverted: false,
            }
        }
    }

    pub fn down(&self) -> i32 {
        self.down
    }

    pub fn up(&self) -> i32 {
        self.up
    }

    pub fn span(&self) -> f32 {
        self.down as f32 - self.up as f32
    }

    pub fn inverted(&self) -> bool {
        self.inverted
    }

    pub fn normalize(&self, raw: i32) -> i32 {
        if self.inverted {
            raw.saturating_neg()
        } else {
            raw
        }
    }

    pub fn raw_down(&self) -> i32 {
        self.normalize(self.down)
    }

    pub fn raw_up(&self) -> i32 {
        self.normalize(self.up)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Hammer position that strikes the note. Sits past fully-pressed: the hammer has to fly.
    pub note_on: f32,
    pub note_off: f32,
    /// Key position below which a struck key may strike again.
    pub key_reset: f32,
}

impl Thresholds {
    pub fn from_range(range: &SensorRange) -> Self {
        let down = range.down() as f32;
        let span = range.span();
        Self {
            note_on: down + 0.06 * span,
            note_off: down - 0.5 * span,
            key_reset: down - 0.5 * span,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HammerPhysics {
    /// ADC bits per microsecond squared.
    pub gravity: f32,
    /// Hammer speed (ADC bits per microsecond) to velocity-curve index.
    pub velocity_scaler: f32,
}

impl HammerPhysics {
    /// `hammer_travel_mm` maps the key span onto physical travel; a hammer moving the whole span in
    /// `min_press_us` lands on the last curve entry.
    pub fn new(range: &SensorRange, hammer_travel_mm: f32, min_press_us: f32, curve_len: usize) -> Self {
        let span = range.span();
        let gravity = GRAVITY_MM_PER_US2 / hammer_travel_mm * span;
        let max_hammer_speed = span / min_press_us;
        Self {
            gravity,
            velocity_scaler: curve_len as f32 / max_hammer_speed,
        }
    }
}
