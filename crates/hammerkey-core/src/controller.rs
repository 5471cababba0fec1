use crate::diagnostics::{
    buffer_lines, export_diagnostics, note_off_line, note_on_line, state_fields,
    BUFFER_DUMP_DELAY_US,
};
use crate::dual_adc::DualAdcManager;
use crate::ipc::{Command, Event, IndexedSnapshot, SentMidi};
use hammerkey_domain_key::{CalibrationConfig, Key, KeyConfig, KeyKind, StepOutcome};
use hammerkey_ports::adc::AdcError;
use hammerkey_ports::midi::{MidiError, MidiMessage, MidiSender, RELEASE_VELOCITY};
use hammerkey_ports::storage::{
    CalibrationSettingsDto, DiagnosticsMode, KeyBindingDto, KeyModeDto, KeyParamTable,
    ParamStore, RigSettingsDto, StorageError,
};
use hammerkey_ports::types::{KeyIndex, Micros};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const RECENT_MIDI_LEN: usize = 64;
const COMMAND_QUEUE_LEN: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("midi error: {0}")]
    Midi(#[from] MidiError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("adc error: {0}")]
    Adc(#[from] AdcError),
    #[error("no key with index {0}")]
    UnknownKey(KeyIndex),
}

#[derive(Clone)]
pub struct CommandSender {
    producer: Arc<Mutex<Producer<Command>>>,
}

impl CommandSender {
    /// `false` when the queue is full and the command was dropped.
    pub fn send(&self, command: Command) -> bool {
        self.producer.lock().push(command).is_ok()
    }
}

struct BoundKey {
    binding: KeyBindingDto,
    key: Key,
    /// Countdown to the buffer dump after a note-on.
    dump_in_us: Option<Micros>,
}

pub struct Controller {
    adc: DualAdcManager,
    midi: Box<dyn MidiSender>,
    store: Option<Box<dyn ParamStore>>,
    settings: RigSettingsDto,
    params: KeyParamTable,
    keys: Vec<BoundKey>,
    sink: Box<dyn Write + Send>,
    commands: Option<Consumer<Command>>,
    events: VecDeque<Event>,
    recent_midi: VecDeque<SentMidi>,
    outcomes: Vec<(KeyIndex, StepOutcome)>,
    scans: u64,
    last_scan: Option<Instant>,
    quit: bool,
}

impl Controller {
    pub fn new(
        settings: RigSettingsDto,
        adc: DualAdcManager,
        mut midi: Box<dyn MidiSender>,
        store: Option<Box<dyn ParamStore>>,
    ) -> Result<Self, ControllerError> {
        settings.validate()?;

        let address_limit = 1u32 << adc.address_bits().min(8);
        for binding in &settings.keys {
            if let Some(address) = binding.mux.iter().find(|a| u32::from(**a) >= address_limit) {
                return Err(AdcError::MuxAddressOutOfRange(*address).into());
            }
        }

        let params = match store.as_ref() {
            Some(store) => store.load_key_params().unwrap_or_else(|e| {
                log::warn!("could not read key parameters, using settings defaults: {e}");
                KeyParamTable::default()
            }),
            None => KeyParamTable::default(),
        };

        let keys = settings
            .keys
            .iter()
            .enumerate()
            .map(|(index, binding)| BoundKey {
                binding: binding.clone(),
                key: Key::new(key_config(index, binding, &settings, &params)),
                dump_in_us: None,
            })
            .collect::<Vec<_>>();

        midi.initialize()?;
        log::info!(
            "controller ready: {} keys, midi channel {}, diagnostics {:?}",
            keys.len(),
            settings.midi_channel.get(),
            settings.diagnostics
        );

        let key_count = keys.len();
        Ok(Self {
            adc,
            midi,
            store,
            settings,
            params,
            keys,
            sink: Box::new(io::stdout()),
            commands: None,
            events: VecDeque::new(),
            recent_midi: VecDeque::with_capacity(RECENT_MIDI_LEN),
            outcomes: Vec::with_capacity(key_count),
            scans: 0,
            last_scan: None,
            quit: false,
        })
    }

    pub fn with_diagnostics_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.sink = sink;
        self
    }

    /// A fresh command queue. Commands sent through an older sender are no longer read.
    pub fn command_sender(&mut self) -> CommandSender {
        let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_LEN);
        self.commands = Some(consumer);
        CommandSender {
            producer: Arc::new(Mutex::new(producer)),
        }
    }

    /// Run queued commands, then scan with the wall-clock time since the previous tick.
    /// Returns `false` once a quit was requested.
    pub fn tick(&mut self) -> bool {
        self.poll_commands();
        let now = Instant::now();
        let elapsed_us = match self.last_scan {
            Some(last) => {
                u32::try_from(now.duration_since(last).as_micros()).unwrap_or(u32::MAX)
            }
            None => self.settings.min_scan_us,
        };
        self.last_scan = Some(now);
        self.scan(elapsed_us);
        !self.quit
    }

    pub fn scan(&mut self, elapsed_us: Micros) {
        self.adc.invalidate();
        let settle = Duration::from_micros(u64::from(self.settings.settle_delay_us));

        self.outcomes.clear();
        for (index, bound) in self.keys.iter_mut().enumerate() {
            let binding = &bound.binding;
            let adc = &mut self.adc;
            let mut source = || {
                adc.read(
                    binding.unit,
                    binding.pins[0],
                    binding.pins[1],
                    binding.mux[0],
                    binding.mux[1],
                    settle,
                )
            };
            let outcome = bound.key.step(&mut source, elapsed_us, self.midi.as_mut());
            self.outcomes.push((index, outcome));
        }
        self.midi.end_of_loop();
        self.scans += 1;

        let outcomes = std::mem::take(&mut self.outcomes);
        for (index, outcome) in &outcomes {
            self.report(*index, outcome);
        }
        self.outcomes = outcomes;

        match self.settings.diagnostics {
            DiagnosticsMode::State => self.print_state(),
            DiagnosticsMode::Buffer => self.print_due_buffers(elapsed_us),
            DiagnosticsMode::None | DiagnosticsMode::Notes => {}
        }
    }

    pub fn handle_command(&mut self, cmd: Command) -> Result<(), ControllerError> {
        match cmd {
            Command::ToggleCalibration { key } => {
                self.toggle_calibration(key)?;
            }
            Command::ToggleCalibrationAll => {
                if self.keys.iter().any(|b| b.key.calibrating()) {
                    let mut adopted = false;
                    for index in 0..self.keys.len() {
                        if self.keys[index].key.calibrating() {
                            adopted |= self.finish_calibration(index);
                        }
                    }
                    if adopted {
                        self.persist_params()?;
                    }
                } else {
                    for index in 0..self.keys.len() {
                        self.start_calibration(index);
                    }
                }
            }
            Command::SetDiagnostics { mode } => {
                self.settings.diagnostics = mode;
                for bound in &mut self.keys {
                    bound.dump_in_us = None;
                }
                log::info!("diagnostics mode {mode:?}");
                self.events.push_back(Event::DiagnosticsModeChanged { mode });
            }
            Command::SaveParams => {
                for (index, bound) in self.keys.iter().enumerate() {
                    let range = bound.key.range();
                    self.params.set_adc_down(index, range.raw_down());
                    self.params.set_adc_up(index, range.raw_up());
                }
                self.persist_params()?;
            }
            Command::SaveSettings => {
                let store = self.store.as_ref().ok_or_else(no_store)?;
                store.save_settings(&self.settings)?;
                self.events.push_back(Event::SettingsSaved);
            }
            Command::RequestSnapshot => {
                let keys = self.snapshots();
                self.events.push_back(Event::KeySnapshots { keys });
            }
            Command::ExportDiagnostics { path } => {
                let keys = self.snapshots();
                let recent: Vec<SentMidi> = self.recent_midi.iter().copied().collect();
                export_diagnostics(Path::new(&path), &self.settings, &keys, &recent)?;
                log::info!("diagnostics exported to {path}");
                self.events.push_back(Event::DiagnosticsExported { path });
            }
            Command::Quit => {
                self.quit = true;
                self.events.push_back(Event::QuitRequested);
            }
        }
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn snapshots(&self) -> Vec<IndexedSnapshot> {
        self.keys
            .iter()
            .enumerate()
            .map(|(key, bound)| IndexedSnapshot {
                key,
                snapshot: bound.key.snapshot(),
            })
            .collect()
    }

    pub fn key(&self, index: KeyIndex) -> Option<&Key> {
        self.keys.get(index).map(|b| &b.key)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn adc(&self) -> &DualAdcManager {
        &self.adc
    }

    pub fn settings(&self) -> &RigSettingsDto {
        &self.settings
    }

    pub fn params(&self) -> &KeyParamTable {
        &self.params
    }

    pub fn recent_midi(&self) -> impl Iterator<Item = &SentMidi> + '_ {
        self.recent_midi.iter()
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    fn poll_commands(&mut self) {
        let Some(mut consumer) = self.commands.take() else {
            return;
        };
        let mut pending = Vec::new();
        while let Ok(command) = consumer.pop() {
            pending.push(command);
        }
        self.commands = Some(consumer);

        for command in pending {
            if let Err(e) = self.handle_command(command) {
                log::error!("command failed: {e}");
            }
        }
    }

    fn toggle_calibration(&mut self, index: KeyIndex) -> Result<(), ControllerError> {
        let bound = self.keys.get(index).ok_or(ControllerError::UnknownKey(index))?;
        if !bound.key.calibrating() {
            self.start_calibration(index);
        } else if self.finish_calibration(index) {
            self.persist_params()?;
        }
        Ok(())
    }

    fn start_calibration(&mut self, index: KeyIndex) {
        self.keys[index].key.start_calibration(self.midi.as_mut());
        self.events.push_back(Event::CalibrationStarted { key: index });
    }

    fn finish_calibration(&mut self, index: KeyIndex) -> bool {
        let key = &mut self.keys[index].key;
        let outcome = key.finish_calibration();
        let range = *key.range();
        self.events.push_back(Event::CalibrationFinished {
            key: index,
            outcome,
            adc_down: range.raw_down(),
            adc_up: range.raw_up(),
        });
        if outcome.is_none() {
            return false;
        }
        self.params.set_adc_down(index, range.raw_down());
        self.params.set_adc_up(index, range.raw_up());
        true
    }

    fn persist_params(&mut self) -> Result<(), ControllerError> {
        let store = self.store.as_ref().ok_or_else(no_store)?;
        store.save_key_params(&self.params)?;
        log::info!("saved parameters for {} keys", self.params.len());
        self.events.push_back(Event::ParamsSaved {
            keys: self.params.len(),
        });
        Ok(())
    }

    fn report(&mut self, index: KeyIndex, outcome: &StepOutcome) {
        let channel = self.settings.midi_channel;
        let snapshot = self.keys[index].key.snapshot();

        if let Some(strike) = outcome.notes.note_on {
            log::debug!(
                "key {index}: note on {} velocity {} (speed {:.5})",
                strike.pitch,
                strike.velocity,
                strike.hammer_speed
            );
            self.remember(
                index,
                MidiMessage::NoteOn {
                    pitch: strike.pitch,
                    velocity: strike.velocity,
                    channel,
                },
            );
            self.events.push_back(Event::NoteOn {
                key: index,
                pitch: strike.pitch,
                velocity: strike.velocity,
                velocity_index: strike.velocity_index,
                hammer_speed: strike.hammer_speed,
            });
            match self.settings.diagnostics {
                DiagnosticsMode::Notes => self.emit_line(&note_on_line(&strike)),
                DiagnosticsMode::Buffer => self.keys[index].dump_in_us = Some(BUFFER_DUMP_DELAY_US),
                DiagnosticsMode::None | DiagnosticsMode::State => {}
            }
        }

        if outcome.notes.note_off {
            log::debug!("key {index}: note off {}", snapshot.pitch);
            self.remember(
                index,
                MidiMessage::NoteOff {
                    pitch: snapshot.pitch,
                    velocity: RELEASE_VELOCITY,
                    channel,
                },
            );
            self.events.push_back(Event::NoteOff {
                key: index,
                pitch: snapshot.pitch,
            });
            if self.settings.diagnostics == DiagnosticsMode::Notes {
                self.emit_line(&note_off_line(&snapshot));
            }
        }

        if let (Some(value), KeyKind::Pedal { control_number }) =
            (outcome.control_change, snapshot.kind)
        {
            self.remember(
                index,
                MidiMessage::ControlChange {
                    number: control_number,
                    value,
                    channel,
                },
            );
            self.events.push_back(Event::ControlChange {
                key: index,
                number: control_number,
                value,
            });
        }
    }

    fn remember(&mut self, key: KeyIndex, message: MidiMessage) {
        if self.recent_midi.len() >= RECENT_MIDI_LEN {
            self.recent_midi.pop_front();
        }
        self.recent_midi.push_back(SentMidi {
            scan: self.scans,
            key,
            message,
        });
    }

    fn print_state(&mut self) {
        let line: String = self
            .keys
            .iter()
            .enumerate()
            .map(|(index, bound)| state_fields(index, &bound.key.snapshot()))
            .collect();
        self.emit_line(&line);
    }

    fn print_due_buffers(&mut self, elapsed_us: Micros) {
        let mut lines = Vec::new();
        for bound in &mut self.keys {
            let Some(remaining) = bound.dump_in_us else {
                continue;
            };
            let remaining = remaining.saturating_sub(elapsed_us);
            if remaining > 0 {
                bound.dump_in_us = Some(remaining);
                continue;
            }
            bound.dump_in_us = None;
            lines.extend(buffer_lines(&bound.key.snapshot(), &bound.key.trace()));
        }
        for line in lines {
            self.emit_line(&line);
        }
    }

    fn emit_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.sink, "{line}") {
            log::warn!("diagnostics output failed: {e}");
        }
    }
}

fn no_store() -> ControllerError {
    StorageError::Io("no parameter store configured".to_string()).into()
}

fn key_config(
    index: KeyIndex,
    binding: &KeyBindingDto,
    settings: &RigSettingsDto,
    params: &KeyParamTable,
) -> KeyConfig {
    let (adc_down, adc_up) = match params.range(index) {
        Some((down, up)) if down != up => {
            log::debug!("key {index}: stored range down {down} up {up}");
            (down, up)
        }
        Some((down, _)) => {
            log::warn!("key {index}: stored range has zero span at {down}, using settings");
            (binding.adc_down, binding.adc_up)
        }
        None => (binding.adc_down, binding.adc_up),
    };

    KeyConfig {
        pitch: binding.pitch,
        channel: settings.midi_channel,
        kind: match binding.mode {
            KeyModeDto::Hammer => KeyKind::Hammer,
            KeyModeDto::Pedal => KeyKind::Pedal {
                control_number: binding.control_number,
            },
        },
        adc_down,
        adc_up,
        hammer_travel_mm: binding.hammer_travel_mm,
        min_press_us: binding.min_press_us,
        calibration: calibration_config(&settings.calibration),
    }
}

fn calibration_config(dto: &CalibrationSettingsDto) -> CalibrationConfig {
    CalibrationConfig {
        up_phase_us: u64::from(dto.up_phase_ms) * 1000,
        reservoir_size: dto.reservoir_size,
        outlier_sigma: dto.outlier_sigma,
        adoption_sigma: dto.adoption_sigma,
        min_down_samples: dto.min_down_samples as u64,
    }
}
