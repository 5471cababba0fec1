use serde::{Deserialize, Serialize};
use std::fmt;

pub type KeyIndex = usize; // position in the rig's key list, also the parameter-store key
pub type Micros = u32; // elapsed tick time in microseconds

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

/// One of the two physical converters behind the multiplexers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdcUnit {
    Adc0,
    Adc1,
}

impl AdcUnit {
    pub fn index(self) -> usize {
        match self {
            AdcUnit::Adc0 => 0,
            AdcUnit::Adc1 => 1,
        }
    }
}

/// MIDI channel in the 1..=16 convention used by transport libraries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiChannel(pub u8);

impl MidiChannel {
    pub fn new(channel: u8) -> Self {
        Self(channel.clamp(1, 16))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Low nibble of a channel voice status byte.
    pub fn status_nibble(self) -> u8 {
        self.0.clamp(1, 16) - 1
    }
}

impl Default for MidiChannel {
    fn default() -> Self {
        Self(2)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
