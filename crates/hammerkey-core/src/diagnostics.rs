use crate::ipc::{IndexedSnapshot, SentMidi};
use hammerkey_domain_key::{KeyKind, KeySnapshot, Strike, TraceRow};
use hammerkey_ports::midi::RELEASE_VELOCITY;
use hammerkey_ports::storage::{RigSettingsDto, StorageError};
use hammerkey_ports::types::KeyIndex;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Time between a note-on and the history dump of that key in buffer mode.
pub const BUFFER_DUMP_DELAY_US: u32 = 10_000;

pub fn note_on_line(strike: &Strike) -> String {
    format!(
        "note on: hammerSpeed {:.6}, velocityIndex {}, velocity {} pitch {}",
        strike.hammer_speed, strike.velocity_index, strike.velocity, strike.pitch
    )
}

pub fn note_off_line(snapshot: &KeySnapshot) -> String {
    format!(
        "note off: noteOffThreshold {:.0}, adcValue {:.0}, velocity {} pitch {}",
        snapshot.thresholds.note_off, snapshot.position, RELEASE_VELOCITY, snapshot.pitch
    )
}

/// Plotter-friendly `name_id:value,` fields for one key. Pedals are labelled by key index.
pub fn state_fields(key: KeyIndex, snapshot: &KeySnapshot) -> String {
    match snapshot.kind {
        KeyKind::Hammer => {
            let id = snapshot.pitch;
            format!(
                "hammer_{id}:{:.6},rawADC_{id}:{},hammerSpeed_{id}:{:.6},elapsedUS_{id}:{},",
                snapshot.hammer_position.unwrap_or(snapshot.position),
                snapshot.raw,
                snapshot.hammer_speed.unwrap_or(0.0),
                snapshot.elapsed_us
            )
        }
        KeyKind::Pedal { .. } => {
            let id = key;
            format!(
                "key_{id}:{:.6},rawADC_{id}:{},elapsedUS_{id}:{},controlValue_{id}:{},",
                snapshot.position,
                snapshot.raw,
                snapshot.elapsed_us,
                snapshot.control_value.unwrap_or(0)
            )
        }
    }
}

pub fn buffer_lines(snapshot: &KeySnapshot, trace: &[TraceRow]) -> Vec<String> {
    let (speed, velocity) = snapshot
        .last_strike
        .map(|s| (s.hammer_speed, s.velocity))
        .unwrap_or((0.0, 0));
    trace
        .iter()
        .map(|row| {
            format!(
                "pitch:{},noteCount:{},noteOnHammerSpeed:{:.6},noteOnVelocity:{},rawADC:{},hammerPosition:{:.6},elapsedUs:{},iteration:{},",
                snapshot.pitch,
                snapshot.note_count,
                speed,
                velocity,
                row.adc,
                row.hammer_position.unwrap_or(0.0),
                row.elapsed_us,
                row.iteration
            )
        })
        .collect()
}

#[derive(Serialize)]
struct AppVersion {
    name: String,
    version: String,
}

#[derive(Serialize)]
struct PlatformInfo {
    os: String,
    arch: String,
}

#[derive(Serialize)]
struct KeySnapshots<'a> {
    keys: &'a [IndexedSnapshot],
}

#[derive(Serialize)]
struct RecentMidi<'a> {
    events: &'a [SentMidi],
}

pub fn export_diagnostics(
    dir: &Path,
    settings: &RigSettingsDto,
    keys: &[IndexedSnapshot],
    recent_midi: &[SentMidi],
) -> Result<(), StorageError> {
    fs::create_dir_all(dir).map_err(|e| StorageError::Io(e.to_string()))?;

    let app_version = AppVersion {
        name: "HammerKey".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let platform = PlatformInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    };

    write_json(&dir.join("app_version.json"), &app_version)?;
    write_json(&dir.join("platform.json"), &platform)?;
    write_json(&dir.join("settings.json"), settings)?;
    write_json(&dir.join("key_snapshots.json"), &KeySnapshots { keys })?;
    write_json(
        &dir.join("recent_midi.json"),
        &RecentMidi {
            events: recent_midi,
        },
    )?;

    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serde(e.to_string()))?;
    fs::write(path, data).map_err(|e| StorageError::Io(e.to_string()))
}
