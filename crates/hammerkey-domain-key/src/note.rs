//! Note-on/note-off decisions for a hammer key.
//!
//! ```text
//!   Armed ──hammer > note_on──▶ Crossing ──(held 10 ms | key speed ≤ 0)──▶ Sounding
//!     ▲                                                                      │
//!     └──────────────── key < note_off (note-off) ◀──────────────────────────┘
//! ```
//! While sounding the key re-arms once it drops below `key_reset`, independently of the note-off.

use crate::channel::KeyMotion;
use crate::hammer::HammerSimulator;
use crate::range::Thresholds;
use crate::velocity_curve::VelocityCurve;
use hammerkey_ports::midi::{MidiSender, RELEASE_VELOCITY};
use hammerkey_ports::types::{MidiChannel, Micros};
use serde::{Deserialize, Serialize};

/// How long a crossing may wait for the key to stop accelerating before the note fires.
pub const CONFIRM_DELAY_US: Micros = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotePhase {
    Armed,
    /// Hammer is past the note-on threshold; waiting for confirmation.
    Crossing { held_us: Micros },
    Sounding,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Strike {
    pub pitch: u8,
    pub velocity: u8,
    pub velocity_index: usize,
    pub hammer_speed: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteTransitions {
    pub note_on: Option<Strike>,
    pub rearmed: bool,
    pub note_off: bool,
}

#[derive(Clone, Debug)]
pub struct NoteStateMachine {
    pitch: u8,
    channel: MidiChannel,
    crossing_held_us: Option<Micros>,
    note_on: bool,
    key_armed: bool,
    note_count: u32,
    last_strike: Option<Strike>,
}

impl NoteStateMachine {
    pub fn new(pitch: u8, channel: MidiChannel) -> Self {
        Self {
            pitch,
            channel,
            crossing_held_us: None,
            note_on: false,
            key_armed: true,
            note_count: 0,
            last_strike: None,
        }
    }

    pub fn phase(&self) -> NotePhase {
        if let Some(held_us) = self.crossing_held_us {
            NotePhase::Crossing { held_us }
        } else if self.note_on && !self.key_armed {
            NotePhase::Sounding
        } else {
            NotePhase::Armed
        }
    }

    /// The hammer is frozen while disarmed and while a crossing waits for confirmation.
    pub fn update(
        &mut self,
        hammer: &mut HammerSimulator,
        key: &KeyMotion,
        thresholds: &Thresholds,
        velocity_scaler: f32,
        midi: &mut dyn MidiSender,
    ) -> NoteTransitions {
        let mut transitions = NoteTransitions::default();

        if self.key_armed {
            match self.crossing_held_us {
                None => {
                    hammer.advance(key.elapsed_us as f32, key);
                    if hammer.position() > thresholds.note_on {
                        self.crossing_held_us = Some(0);
                    }
                }
                Some(held) => {
                    self.crossing_held_us = Some(held.saturating_add(key.elapsed_us));
                }
            }

            if let Some(held) = self.crossing_held_us {
                if held > CONFIRM_DELAY_US || key.speed <= 0.0 {
                    transitions.note_on = Some(self.fire(hammer, thresholds, velocity_scaler, midi));
                }
            }
        }

        if self.note_on {
            if !self.key_armed && key.position < thresholds.key_reset {
                self.key_armed = true;
                hammer.rest_on(key);
                transitions.rearmed = true;
            }
            if key.position < thresholds.note_off {
                midi.send_note_off(self.pitch, RELEASE_VELOCITY, self.channel);
                self.note_on = false;
                transitions.note_off = true;
            }
        }

        transitions
    }

    fn fire(
        &mut self,
        hammer: &mut HammerSimulator,
        thresholds: &Thresholds,
        velocity_scaler: f32,
        midi: &mut dyn MidiSender,
    ) -> Strike {
        let curve = VelocityCurve::shared();
        let velocity_index = curve.index_for(hammer.speed(), velocity_scaler);
        let strike = Strike {
            pitch: self.pitch,
            velocity: curve.velocity_at(velocity_index),
            velocity_index,
            hammer_speed: hammer.speed(),
        };

        midi.send_note_on(self.pitch, strike.velocity, self.channel);
        self.crossing_held_us = None;
        self.note_on = true;
        self.key_armed = false;
        self.note_count += 1;
        self.last_strike = Some(strike);
        hammer.rebound(thresholds.note_on);
        strike
    }

    /// Back to armed and silent, e.g. after recalibration. Returns whether a note was cut off.
    pub fn reset(&mut self, midi: &mut dyn MidiSender) -> bool {
        let was_sounding = self.note_on;
        if was_sounding {
            midi.send_note_off(self.pitch, RELEASE_VELOCITY, self.channel);
        }
        self.crossing_held_us = None;
        self.note_on = false;
        self.key_armed = true;
        was_sounding
    }

    pub fn note_on(&self) -> bool {
        self.note_on
    }

    pub fn key_armed(&self) -> bool {
        self.key_armed
    }

    pub fn note_count(&self) -> u32 {
        self.note_count
    }

    pub fn last_strike(&self) -> Option<Strike> {
        self.last_strike
    }

    pub fn pitch(&self) -> u8 {
        self.pitch
    }
}
