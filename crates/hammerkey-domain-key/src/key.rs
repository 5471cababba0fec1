use crate::calibration::{CalibrationConfig, CalibrationOutcome, CalibrationPhase, CalibrationSession};
use crate::channel::{AdcChannel, KeyMotion};
use crate::filter::History;
use crate::hammer::HammerSimulator;
use crate::note::{NoteStateMachine, NoteTransitions, Strike};
use crate::range::{HammerPhysics, SensorRange, Thresholds};
use crate::velocity_curve::VelocityCurve;
use hammerkey_ports::midi::MidiSender;
use hammerkey_ports::sample::SampleSource;
use hammerkey_ports::types::{MidiChannel, Micros};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KeyKind {
    Hammer,
    Pedal { control_number: u8 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub pitch: u8,
    pub channel: MidiChannel,
    pub kind: KeyKind,
    /// Raw sensor reading with the key fully pressed.
    pub adc_down: i32,
    /// Raw sensor reading with the key released.
    pub adc_up: i32,
    pub hammer_travel_mm: f32,
    pub min_press_us: f32,
    pub calibration: CalibrationConfig,
}

impl KeyConfig {
    pub fn hammer(pitch: u8) -> Self {
        Self {
            pitch,
            channel: MidiChannel::default(),
            kind: KeyKind::Hammer,
            adc_down: 430,
            adc_up: 50,
            hammer_travel_mm: 4.5,
            min_press_us: 8500.0,
            calibration: CalibrationConfig::default(),
        }
    }

    pub fn pedal(control_number: u8) -> Self {
        Self {
            kind: KeyKind::Pedal { control_number },
            ..Self::hammer(0)
        }
    }
}

#[derive(Clone, Debug)]
struct HammerMode {
    hammer: HammerSimulator,
    notes: NoteStateMachine,
    positions: History<f32>,
}

#[derive(Clone, Debug)]
struct PedalMode {
    control_number: u8,
    control_value: u8,
}

#[derive(Clone, Debug)]
enum Mode {
    Hammer(HammerMode),
    Pedal(PedalMode),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub notes: NoteTransitions,
    pub control_change: Option<u8>,
    pub calibrating: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceRow {
    pub iteration: u64,
    pub adc: i32,
    pub hammer_position: Option<f32>,
    pub elapsed_us: Micros,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub pitch: u8,
    pub kind: KeyKind,
    pub raw: i32,
    pub position: f32,
    pub speed: f32,
    pub elapsed_us: Micros,
    pub hammer_position: Option<f32>,
    pub hammer_speed: Option<f32>,
    pub note_on: bool,
    pub key_armed: bool,
    pub note_count: u32,
    pub last_strike: Option<Strike>,
    pub control_value: Option<u8>,
    pub calibrating: Option<CalibrationPhase>,
    pub adc_down: i32,
    pub adc_up: i32,
    pub thresholds: Thresholds,
    pub iteration: u64,
}

#[derive(Clone, Debug)]
pub struct Key {
    config: KeyConfig,
    range: SensorRange,
    thresholds: Thresholds,
    physics: HammerPhysics,
    channel: AdcChannel,
    mode: Mode,
    calibration: Option<CalibrationSession>,
    iteration: u64,
    iterations: History<u64>,
}

impl Key {
    pub fn new(config: KeyConfig) -> Self {
        Self::with_channel(config, AdcChannel::savgol())
    }

    pub fn with_channel(config: KeyConfig, mut channel: AdcChannel) -> Self {
        let curve = VelocityCurve::shared();
        let range = SensorRange::from_raw(config.adc_down, config.adc_up);
        let thresholds = Thresholds::from_range(&range);
        let physics = HammerPhysics::new(
            &range,
            config.hammer_travel_mm,
            config.min_press_us,
            curve.len(),
        );
        channel.set_inverted(range.inverted());
        channel.prime(range.up() as f32);

        let capacity = channel.samples().capacity();
        let mode = match config.kind {
            KeyKind::Hammer => Mode::Hammer(HammerMode {
                hammer: HammerSimulator::new(physics.gravity, range.up() as f32),
                notes: NoteStateMachine::new(config.pitch, config.channel),
                positions: History::new(capacity),
            }),
            KeyKind::Pedal { control_number } => Mode::Pedal(PedalMode {
                control_number,
                control_value: 0,
            }),
        };

        log::debug!(
            "key {} ({:?}): down {} up {} inverted {} note-on {:.1} note-off {:.1}",
            config.pitch,
            config.kind,
            range.down(),
            range.up(),
            range.inverted(),
            thresholds.note_on,
            thresholds.note_off
        );

        Self {
            config,
            range,
            thresholds,
            physics,
            channel,
            mode,
            calibration: None,
            iteration: 0,
            iterations: History::new(capacity),
        }
    }

    pub fn step(
        &mut self,
        source: &mut dyn SampleSource,
        elapsed_us: Micros,
        midi: &mut dyn MidiSender,
    ) -> StepOutcome {
        let motion = self.channel.sample(source, elapsed_us);
        self.iterations.push(self.iteration);
        self.iteration += 1;

        if let Some(session) = self.calibration.as_mut() {
            session.offer(motion.raw, elapsed_us);
            if let Mode::Hammer(mode) = &mut self.mode {
                mode.positions.push(mode.hammer.position());
            }
            return StepOutcome {
                calibrating: true,
                ..StepOutcome::default()
            };
        }

        let warmed_up = self.channel.warmed_up();
        match &mut self.mode {
            Mode::Hammer(mode) => {
                let notes = if warmed_up {
                    mode.notes.update(
                        &mut mode.hammer,
                        &motion,
                        &self.thresholds,
                        self.physics.velocity_scaler,
                        midi,
                    )
                } else {
                    mode.hammer.rest_on(&motion);
                    NoteTransitions::default()
                };
                mode.positions.push(mode.hammer.position());
                StepOutcome {
                    notes,
                    ..StepOutcome::default()
                }
            }
            Mode::Pedal(mode) => {
                if !warmed_up {
                    return StepOutcome::default();
                }
                let value = pedal_value(&motion, &self.range);
                if value == mode.control_value {
                    return StepOutcome::default();
                }
                mode.control_value = value;
                midi.send_control_change(mode.control_number, value, self.config.channel);
                StepOutcome {
                    control_change: Some(value),
                    ..StepOutcome::default()
                }
            }
        }
    }

    /// Replace the fully-pressed/released readings (raw sensor values) and re-derive everything
    /// that depends on them. A zero span is refused.
    pub fn set_range(&mut self, raw_down: i32, raw_up: i32) -> bool {
        if raw_down == raw_up {
            log::warn!(
                "key {}: refusing range with equal down/up value {}",
                self.config.pitch,
                raw_down
            );
            return false;
        }
        self.range = SensorRange::from_raw(raw_down, raw_up);
        self.thresholds = Thresholds::from_range(&self.range);
        self.physics = HammerPhysics::new(
            &self.range,
            self.config.hammer_travel_mm,
            self.config.min_press_us,
            VelocityCurve::shared().len(),
        );
        self.config.adc_down = raw_down;
        self.config.adc_up = raw_up;
        let history_dropped = self.channel.set_inverted(self.range.inverted());
        if history_dropped {
            self.iterations.clear();
        }
        if let Mode::Hammer(mode) = &mut self.mode {
            mode.hammer.set_gravity(self.physics.gravity);
            if history_dropped {
                mode.positions.clear();
            }
        }
        true
    }

    pub fn calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn start_calibration(&mut self, midi: &mut dyn MidiSender) {
        self.start_calibration_with(CalibrationSession::new(self.config.calibration), midi);
    }

    pub fn start_calibration_with(&mut self, session: CalibrationSession, midi: &mut dyn MidiSender) {
        if let Mode::Hammer(mode) = &mut self.mode {
            mode.notes.reset(midi);
        }
        log::info!("key {}: calibration started", self.config.pitch);
        self.calibration = Some(session);
    }

    pub fn finish_calibration(&mut self) -> Option<CalibrationOutcome> {
        let session = self.calibration.take()?;
        let Some(outcome) = session.finish() else {
            log::warn!("key {}: calibration collected no samples", self.config.pitch);
            return None;
        };

        let raw_down = outcome.adc_down.unwrap_or(self.range.raw_down());
        if outcome.adc_down.is_none() {
            log::warn!(
                "key {}: key-down not trusted ({} samples), keeping {}",
                self.config.pitch,
                outcome.down_samples_seen,
                raw_down
            );
        }
        if self.set_range(raw_down, outcome.adc_up) {
            log::info!(
                "key {}: calibrated down {} up {}",
                self.config.pitch,
                raw_down,
                outcome.adc_up
            );
        }

        let motion = self.channel.motion();
        if let Mode::Hammer(mode) = &mut self.mode {
            mode.hammer.rest_on(&motion);
        }
        Some(outcome)
    }

    pub fn toggle_calibration(&mut self, midi: &mut dyn MidiSender) -> Option<CalibrationOutcome> {
        if self.calibrating() {
            self.finish_calibration()
        } else {
            self.start_calibration(midi);
            None
        }
    }

    pub fn config(&self) -> &KeyConfig {
        &self.config
    }

    pub fn range(&self) -> &SensorRange {
        &self.range
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn physics(&self) -> &HammerPhysics {
        &self.physics
    }

    pub fn motion(&self) -> KeyMotion {
        self.channel.motion()
    }

    pub fn note_on(&self) -> bool {
        match &self.mode {
            Mode::Hammer(mode) => mode.notes.note_on(),
            Mode::Pedal(_) => false,
        }
    }

    pub fn key_armed(&self) -> bool {
        match &self.mode {
            Mode::Hammer(mode) => mode.notes.key_armed(),
            Mode::Pedal(_) => true,
        }
    }

    pub fn hammer(&self) -> Option<&HammerSimulator> {
        match &self.mode {
            Mode::Hammer(mode) => Some(&mode.hammer),
            Mode::Pedal(_) => None,
        }
    }

    pub fn snapshot(&self) -> KeySnapshot {
        let motion = self.channel.motion();
        let (hammer, notes, control_value) = match &self.mode {
            Mode::Hammer(mode) => (Some(&mode.hammer), Some(&mode.notes), None),
            Mode::Pedal(mode) => (None, None, Some(mode.control_value)),
        };
        KeySnapshot {
            pitch: self.config.pitch,
            kind: self.config.kind,
            raw: motion.raw,
            position: motion.position,
            speed: motion.speed,
            elapsed_us: motion.elapsed_us,
            hammer_position: hammer.map(|h| h.position()),
            hammer_speed: hammer.map(|h| h.speed()),
            note_on: notes.map(|n| n.note_on()).unwrap_or(false),
            key_armed: notes.map(|n| n.key_armed()).unwrap_or(true),
            note_count: notes.map(|n| n.note_count()).unwrap_or(0),
            last_strike: notes.and_then(|n| n.last_strike()),
            control_value,
            calibrating: self.calibration.as_ref().map(|s| s.phase()),
            adc_down: self.range.raw_down(),
            adc_up: self.range.raw_up(),
            thresholds: self.thresholds,
            iteration: self.iteration,
        }
    }

    /// Recent history, oldest first. Sample values are polarity-normalised.
    pub fn trace(&self) -> Vec<TraceRow> {
        let positions: Vec<Option<f32>> = match &self.mode {
            Mode::Hammer(mode) => mode.positions.iter().rev().map(Some).collect(),
            Mode::Pedal(_) => Vec::new(),
        };
        let mut rows: Vec<TraceRow> = self
            .iterations
            .iter()
            .rev()
            .zip(self.channel.samples().iter().rev())
            .zip(self.channel.elapsed().iter().rev())
            .enumerate()
            .map(|(i, ((iteration, adc), elapsed_us))| TraceRow {
                iteration,
                adc,
                hammer_position: positions.get(i).copied().flatten(),
                elapsed_us,
            })
            .collect();
        rows.reverse();
        rows
    }
}

/// `(position - up) / span` scaled to 0..=127, truncated.
fn pedal_value(motion: &KeyMotion, range: &SensorRange) -> u8 {
    let span = range.span();
    if span <= 0.0 {
        return 0;
    }
    let value = ((motion.position - range.up() as f32) / span * 127.0) as i32;
    value.clamp(0, 127) as u8
}
