use hammerkey_core::{Command, Controller, ControllerError, DualAdcManager, Event};
use hammerkey_ports::{
    AdcError, AdcUnit, DiagnosticsMode, DualAdcHardware, DualReading, KeyParamTable, MidiChannel,
    MidiError, MidiMessage, MidiSender, ParamStore, RigSettingsDto, StorageError,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

const TICK_US: u32 = 1000;
const REST: i32 = 50;

#[derive(Clone, Default)]
struct Levels(Arc<Mutex<HashMap<(AdcUnit, u8), i32>>>);

impl Levels {
    fn set(&self, unit: AdcUnit, address: u8, value: i32) {
        self.0.lock().insert((unit, address), value);
    }

    fn get(&self, unit: AdcUnit, address: u8) -> i32 {
        self.0.lock().get(&(unit, address)).copied().unwrap_or(REST)
    }
}

struct Board {
    levels: Levels,
    mux: [u8; 2],
}

impl DualAdcHardware for Board {
    fn address_bits(&self) -> u8 {
        3
    }

    fn set_mux_address(&mut self, unit: AdcUnit, address: u8) -> Result<(), AdcError> {
        self.mux[unit.index()] = address;
        Ok(())
    }

    fn settle(&mut self, _delay: Duration) {}

    fn read_synchronized(&mut self, _pin0: usize, _pin1: usize) -> Result<DualReading, AdcError> {
        Ok(DualReading {
            unit0: self.levels.get(AdcUnit::Adc0, self.mux[0]),
            unit1: Some(self.levels.get(AdcUnit::Adc1, self.mux[1])),
        })
    }
}

#[derive(Clone, Default)]
struct Wire {
    sent: Arc<Mutex<Vec<MidiMessage>>>,
    initialized: Arc<Mutex<bool>>,
    loops: Arc<Mutex<u64>>,
}

impl MidiSender for Wire {
    fn send_note_on(&mut self, pitch: u8, velocity: u8, channel: MidiChannel) {
        self.sent.lock().push(MidiMessage::NoteOn {
            pitch,
            velocity,
            channel,
        });
    }

    fn send_note_off(&mut self, pitch: u8, velocity: u8, channel: MidiChannel) {
        self.sent.lock().push(MidiMessage::NoteOff {
            pitch,
            velocity,
            channel,
        });
    }

    fn send_control_change(&mut self, number: u8, value: u8, channel: MidiChannel) {
        self.sent.lock().push(MidiMessage::ControlChange {
            number,
            value,
            channel,
        });
    }

    fn initialize(&mut self) -> Result<(), MidiError> {
        *self.initialized.lock() = true;
        Ok(())
    }

    fn end_of_loop(&mut self) {
        *self.loops.lock() += 1;
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    settings: Arc<Mutex<Option<RigSettingsDto>>>,
    params: Arc<Mutex<KeyParamTable>>,
}

impl ParamStore for MemoryStore {
    fn load_settings(&self) -> Result<RigSettingsDto, StorageError> {
        Ok(self.settings.lock().clone().unwrap_or_default())
    }

    fn save_settings(&self, s: &RigSettingsDto) -> Result<(), StorageError> {
        *self.settings.lock() = Some(s.clone());
        Ok(())
    }

    fn load_key_params(&self) -> Result<KeyParamTable, StorageError> {
        Ok(self.params.lock().clone())
    }

    fn save_key_params(&self, params: &KeyParamTable) -> Result<(), StorageError> {
        *self.params.lock() = params.clone();
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Rig {
    controller: Controller,
    levels: Levels,
    wire: Wire,
    store: MemoryStore,
    out: SharedBuf,
}

impl Rig {
    fn scans(&mut self, n: usize) {
        for _ in 0..n {
            self.controller.scan(TICK_US);
        }
    }
}

fn rig_with(settings: RigSettingsDto, store: MemoryStore) -> Rig {
    let levels = Levels::default();
    let board = Board {
        levels: levels.clone(),
        mux: [0, 0],
    };
    let wire = Wire::default();
    let out = SharedBuf::default();
    let controller = Controller::new(
        settings,
        DualAdcManager::new(Box::new(board)),
        Box::new(wire.clone()),
        Some(Box::new(store.clone())),
    )
    .expect("valid rig")
    .with_diagnostics_sink(Box::new(out.clone()));
    Rig {
        controller,
        levels,
        wire,
        store,
        out,
    }
}

fn rig() -> Rig {
    rig_with(RigSettingsDto::default(), MemoryStore::default())
}

#[test]
fn keys_on_one_mux_address_share_a_conversion() {
    let mut rig = rig();
    assert_eq!(rig.controller.key_count(), 9);
    rig.scans(1);
    assert_eq!(rig.controller.adc().conversions(), 5);
    rig.scans(1);
    assert_eq!(rig.controller.adc().conversions(), 10);
}

#[test]
fn pressing_a_key_on_the_second_unit_plays_its_pitch() {
    let mut rig = rig();
    rig.scans(30);
    rig.levels.set(AdcUnit::Adc1, 0, 430);
    rig.scans(50);

    let sent = rig.wire.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0],
        MidiMessage::NoteOn {
            pitch: 61,
            channel: MidiChannel(2),
            ..
        }
    ));

    let note_ons: Vec<_> = rig
        .controller
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::NoteOn { .. }))
        .collect();
    assert_eq!(note_ons.len(), 1);
    assert!(matches!(note_ons[0], Event::NoteOn { key: 1, pitch: 61, .. }));
    assert!(*rig.wire.initialized.lock());
    assert_eq!(*rig.wire.loops.lock(), 80);
    assert_eq!(rig.controller.recent_midi().count(), 1);
}

#[test]
fn release_sends_note_off() {
    let mut rig = rig();
    rig.scans(30);
    rig.levels.set(AdcUnit::Adc0, 0, 430);
    rig.scans(50);
    rig.levels.set(AdcUnit::Adc0, 0, REST);
    rig.scans(50);

    let sent = rig.wire.sent.lock().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1],
        MidiMessage::NoteOff {
            pitch: 60,
            velocity: 64,
            channel: MidiChannel(2)
        }
    );
}

#[test]
fn pedal_reports_control_changes() {
    let mut rig = rig();
    rig.scans(30);
    rig.levels.set(AdcUnit::Adc0, 4, 430);
    rig.scans(50);

    let events = rig.controller.drain_events();
    assert!(events.contains(&Event::ControlChange {
        key: 8,
        number: 64,
        value: 127
    }));
    assert!(events
        .iter()
        .all(|e| matches!(e, Event::ControlChange { key: 8, .. })));
}

#[test]
fn calibration_is_measured_and_stored() {
    let mut settings = RigSettingsDto::default();
    settings.calibration.up_phase_ms = 100;
    let mut rig = rig_with(settings, MemoryStore::default());
    rig.levels.set(AdcUnit::Adc0, 0, 80);

    rig.controller
        .handle_command(Command::ToggleCalibration { key: 0 })
        .unwrap();
    assert!(rig.controller.key(0).unwrap().calibrating());
    rig.scans(150);
    rig.levels.set(AdcUnit::Adc0, 0, 700);
    rig.scans(100);
    rig.levels.set(AdcUnit::Adc0, 0, 80);
    rig.scans(50);
    assert!(rig.wire.sent.lock().is_empty());

    rig.controller
        .handle_command(Command::ToggleCalibration { key: 0 })
        .unwrap();

    let key = rig.controller.key(0).unwrap();
    assert!(!key.calibrating());
    assert_eq!(key.range().raw_down(), 700);
    assert_eq!(key.range().raw_up(), 80);
    assert_eq!(rig.store.params.lock().range(0), Some((700, 80)));

    let events = rig.controller.drain_events();
    assert_eq!(events[0], Event::CalibrationStarted { key: 0 });
    assert!(events.iter().any(|e| matches!(
        e,
        Event::CalibrationFinished {
            key: 0,
            adc_down: 700,
            adc_up: 80,
            ..
        }
    )));
    assert!(events.contains(&Event::ParamsSaved { keys: 1 }));
}

#[test]
fn calibrate_all_starts_then_finishes_every_key() {
    let mut rig = rig();
    rig.controller
        .handle_command(Command::ToggleCalibrationAll)
        .unwrap();
    assert!((0..9).all(|i| rig.controller.key(i).unwrap().calibrating()));
    rig.scans(20);
    rig.controller
        .handle_command(Command::ToggleCalibrationAll)
        .unwrap();
    assert!((0..9).all(|i| !rig.controller.key(i).unwrap().calibrating()));
    assert_eq!(rig.store.params.lock().len(), 9);

    let saves = rig
        .controller
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::ParamsSaved { .. }))
        .count();
    assert_eq!(saves, 1);
}

#[test]
fn calibrate_all_finishes_every_key_even_when_saving_fails() {
    let board = Board {
        levels: Levels::default(),
        mux: [0, 0],
    };
    let mut controller = Controller::new(
        RigSettingsDto::default(),
        DualAdcManager::new(Box::new(board)),
        Box::new(Wire::default()),
        None,
    )
    .expect("valid rig");

    controller
        .handle_command(Command::ToggleCalibrationAll)
        .unwrap();
    for _ in 0..20 {
        controller.scan(TICK_US);
    }
    let err = controller
        .handle_command(Command::ToggleCalibrationAll)
        .unwrap_err();
    assert!(matches!(err, ControllerError::Storage(StorageError::Io(_))));

    let still_calibrating: Vec<usize> = (0..9)
        .filter(|&i| controller.key(i).unwrap().calibrating())
        .collect();
    assert_eq!(still_calibrating, Vec::<usize>::new());
    let finished = controller
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::CalibrationFinished { .. }))
        .count();
    assert_eq!(finished, 9);
    assert_eq!(controller.params().len(), 9);
}

#[test]
fn stored_ranges_override_settings() {
    let store = MemoryStore::default();
    {
        let mut params = store.params.lock();
        params.set_adc_down(2, 900);
        params.set_adc_up(2, 100);
        params.set_adc_up(3, 10);
    }
    let rig = rig_with(RigSettingsDto::default(), store);

    let key2 = rig.controller.key(2).unwrap();
    assert_eq!(key2.range().raw_down(), 900);
    assert_eq!(key2.range().raw_up(), 100);
    let key3 = rig.controller.key(3).unwrap();
    assert_eq!(key3.range().raw_down(), 430);
    assert_eq!(key3.range().raw_up(), 50);
}

#[test]
fn save_params_writes_every_key() {
    let mut rig = rig();
    rig.controller.handle_command(Command::SaveParams).unwrap();
    let params = rig.store.params.lock().clone();
    assert_eq!(params.len(), 9);
    assert_eq!(params.range(0), Some((430, 50)));
}

#[test]
fn state_mode_prints_one_line_per_scan() {
    let mut settings = RigSettingsDto::default();
    settings.diagnostics = DiagnosticsMode::State;
    let mut rig = rig_with(settings, MemoryStore::default());
    rig.scans(2);

    let text = rig.out.text();
    assert_eq!(text.lines().count(), 2);
    let line = text.lines().last().unwrap();
    assert!(line.contains("hammer_60:"));
    assert!(line.contains("rawADC_60:50,"));
    assert!(line.contains("elapsedUS_60:1000,"));
    assert!(line.contains("hammerSpeed_67:"));
    assert!(line.contains("key_8:"));
    assert!(line.contains("controlValue_8:0,"));
}

#[test]
fn notes_mode_prints_note_on_and_off() {
    let mut rig = rig();
    rig.controller
        .handle_command(Command::SetDiagnostics {
            mode: DiagnosticsMode::Notes,
        })
        .unwrap();
    rig.scans(30);
    rig.levels.set(AdcUnit::Adc0, 0, 430);
    rig.scans(50);
    rig.levels.set(AdcUnit::Adc0, 0, REST);
    rig.scans(50);

    let text = rig.out.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("note on: hammerSpeed "));
    assert!(lines[0].ends_with("pitch 60"));
    assert!(lines[1].starts_with("note off: noteOffThreshold 240"));
}

#[test]
fn buffer_mode_dumps_history_once_after_a_note() {
    let mut settings = RigSettingsDto::default();
    settings.diagnostics = DiagnosticsMode::Buffer;
    let mut rig = rig_with(settings, MemoryStore::default());
    rig.scans(30);
    rig.levels.set(AdcUnit::Adc0, 0, 430);
    rig.scans(60);

    let text = rig.out.text();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(rows.len(), 21);
    assert!(rows
        .iter()
        .all(|r| r.starts_with("pitch:60,noteCount:1,noteOnHammerSpeed:")));
    assert!(rows[20].contains("rawADC:430,"));
}

#[test]
fn export_writes_json_snapshots() {
    let mut rig = rig();
    rig.scans(5);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump");
    rig.controller
        .handle_command(Command::ExportDiagnostics {
            path: path.to_string_lossy().into_owned(),
        })
        .unwrap();

    for file in [
        "app_version.json",
        "platform.json",
        "settings.json",
        "key_snapshots.json",
        "recent_midi.json",
    ] {
        assert!(path.join(file).exists(), "{file} missing");
    }
    let snapshots: serde_json::Value =
        serde_json::from_slice(&std::fs::read(path.join("key_snapshots.json")).unwrap()).unwrap();
    assert_eq!(snapshots["keys"].as_array().unwrap().len(), 9);
}

#[test]
fn queued_commands_run_on_tick() {
    let mut rig = rig();
    let sender = rig.controller.command_sender();
    assert!(sender.send(Command::SetDiagnostics {
        mode: DiagnosticsMode::Notes
    }));
    assert!(sender.send(Command::Quit));

    assert!(!rig.controller.tick());
    assert_eq!(rig.controller.settings().diagnostics, DiagnosticsMode::Notes);
    let events = rig.controller.drain_events();
    assert_eq!(
        events,
        vec![
            Event::DiagnosticsModeChanged {
                mode: DiagnosticsMode::Notes
            },
            Event::QuitRequested
        ]
    );
}

#[test]
fn unknown_key_is_an_error() {
    let mut rig = rig();
    let err = rig
        .controller
        .handle_command(Command::ToggleCalibration { key: 42 })
        .unwrap_err();
    assert!(matches!(err, ControllerError::UnknownKey(42)));
}

#[test]
fn invalid_rigs_are_rejected() {
    let mut zero_span = RigSettingsDto::default();
    zero_span.keys[0].adc_down = 100;
    zero_span.keys[0].adc_up = 100;
    let board = Board {
        levels: Levels::default(),
        mux: [0, 0],
    };
    let err = Controller::new(
        zero_span,
        DualAdcManager::new(Box::new(board)),
        Box::new(Wire::default()),
        None,
    )
    .err()
    .expect("zero span rejected");
    assert!(matches!(err, ControllerError::Storage(StorageError::Invalid(_))));

    let mut bad_mux = RigSettingsDto::default();
    bad_mux.keys[0].mux = [9, 0];
    let board = Board {
        levels: Levels::default(),
        mux: [0, 0],
    };
    let err = Controller::new(
        bad_mux,
        DualAdcManager::new(Box::new(board)),
        Box::new(Wire::default()),
        None,
    )
    .err()
    .expect("mux address rejected");
    assert!(matches!(
        err,
        ControllerError::Adc(AdcError::MuxAddressOutOfRange(9))
    ));
}
