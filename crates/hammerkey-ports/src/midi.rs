use crate::types::*;
use serde::{Deserialize, Serialize};

/// Velocity sent with every note-off produced by a key.
pub const RELEASE_VELOCITY: u8 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn {
        pitch: u8,
        velocity: u8,
        channel: MidiChannel,
    },
    NoteOff {
        pitch: u8,
        velocity: u8,
        channel: MidiChannel,
    },
    ControlChange {
        number: u8,
        value: u8,
        channel: MidiChannel,
    },
}

impl MidiMessage {
    /// Three byte wire form of the message.
    pub fn to_bytes(self) -> [u8; 3] {
        match self {
            MidiMessage::NoteOn {
                pitch,
                velocity,
                channel,
            } => [0x90 | channel.status_nibble(), pitch & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff {
                pitch,
                velocity,
                channel,
            } => [0x80 | channel.status_nibble(), pitch & 0x7F, velocity & 0x7F],
            MidiMessage::ControlChange {
                number,
                value,
                channel,
            } => [0xB0 | channel.status_nibble(), number & 0x7F, value & 0x7F],
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MidiError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Outgoing MIDI transport. The key pipeline never knows which transport sits behind it.
///
/// Sends are fire-and-forget: implementations log and drop failures so the scan loop keeps running.
pub trait MidiSender: Send {
    fn send_note_on(&mut self, pitch: u8, velocity: u8, channel: MidiChannel);
    fn send_note_off(&mut self, pitch: u8, velocity: u8, channel: MidiChannel);
    fn send_control_change(&mut self, number: u8, value: u8, channel: MidiChannel);

    /// Called once before the first scan.
    fn initialize(&mut self) -> Result<(), MidiError> {
        Ok(())
    }

    /// Called after every scan, e.g. to drain incoming traffic.
    fn end_of_loop(&mut self) {}
}
