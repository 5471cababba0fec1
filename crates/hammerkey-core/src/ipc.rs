use hammerkey_domain_key::{CalibrationOutcome, KeySnapshot};
use hammerkey_ports::midi::MidiMessage;
use hammerkey_ports::storage::DiagnosticsMode;
use hammerkey_ports::types::KeyIndex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    ToggleCalibration { key: KeyIndex },
    /// Start calibrating every key, or finish every running calibration.
    ToggleCalibrationAll,
    SetDiagnostics { mode: DiagnosticsMode },
    SaveParams,
    SaveSettings,
    RequestSnapshot,
    ExportDiagnostics { path: String },
    Quit,
}

impl Command {
    /// Parse one console line, e.g. `cal 3`, `cal all`, `diag state`, `export /tmp/dump`.
    pub fn parse(line: &str) -> Option<Command> {
        let mut words = line.split_whitespace();
        let verb = words.next()?;
        let arg = words.next();
        let command = match (verb, arg) {
            ("cal" | "calibrate", Some("all")) => Command::ToggleCalibrationAll,
            ("cal" | "calibrate", Some(key)) => Command::ToggleCalibration {
                key: key.parse().ok()?,
            },
            ("diag", Some(mode)) => Command::SetDiagnostics {
                mode: match mode {
                    "off" | "none" => DiagnosticsMode::None,
                    "notes" => DiagnosticsMode::Notes,
                    "state" => DiagnosticsMode::State,
                    "buffer" => DiagnosticsMode::Buffer,
                    _ => return None,
                },
            },
            ("save", None) => Command::SaveParams,
            ("save-settings", None) => Command::SaveSettings,
            ("status", None) => Command::RequestSnapshot,
            ("export", Some(path)) => Command::ExportDiagnostics {
                path: path.to_string(),
            },
            ("quit" | "exit", None) => Command::Quit,
            _ => return None,
        };
        if words.next().is_some() {
            return None;
        }
        Some(command)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedSnapshot {
    pub key: KeyIndex,
    pub snapshot: KeySnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    NoteOn {
        key: KeyIndex,
        pitch: u8,
        velocity: u8,
        velocity_index: usize,
        hammer_speed: f32,
    },
    NoteOff { key: KeyIndex, pitch: u8 },
    ControlChange { key: KeyIndex, number: u8, value: u8 },
    CalibrationStarted { key: KeyIndex },
    CalibrationFinished {
        key: KeyIndex,
        outcome: Option<CalibrationOutcome>,
        adc_down: i32,
        adc_up: i32,
    },
    ParamsSaved { keys: usize },
    SettingsSaved,
    DiagnosticsModeChanged { mode: DiagnosticsMode },
    DiagnosticsExported { path: String },
    KeySnapshots { keys: Vec<IndexedSnapshot> },
    QuitRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentMidi {
    pub scan: u64,
    pub key: KeyIndex,
    pub message: MidiMessage,
}
