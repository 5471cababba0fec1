use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker written to the parameter table for a value that was never calibrated.
pub const ADC_VALUE_NOT_SET: i32 = -9999;

fn default_midi_channel() -> MidiChannel {
    MidiChannel::default()
}

fn default_settle_delay_us() -> u32 {
    2
}

fn default_min_scan_us() -> u32 {
    100
}

fn default_control_number() -> u8 {
    64
}

fn default_adc_down() -> i32 {
    430
}

fn default_adc_up() -> i32 {
    50
}

fn default_hammer_travel_mm() -> f32 {
    4.5
}

fn default_min_press_us() -> f32 {
    8500.0
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsMode {
    #[default]
    None,
    Notes,
    State,
    Buffer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyModeDto {
    #[default]
    Hammer,
    Pedal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyBindingDto {
    pub pitch: u8,
    #[serde(default)]
    pub mode: KeyModeDto,
    #[serde(default = "default_control_number")]
    pub control_number: u8,
    pub unit: AdcUnit,
    /// Signal pin read by unit 0 and unit 1 while this key is sampled.
    pub pins: [usize; 2],
    /// Mux address selected in front of unit 0 and unit 1 while this key is sampled.
    pub mux: [u8; 2],
    #[serde(default = "default_adc_down")]
    pub adc_down: i32,
    #[serde(default = "default_adc_up")]
    pub adc_up: i32,
    #[serde(default = "default_hammer_travel_mm")]
    pub hammer_travel_mm: f32,
    #[serde(default = "default_min_press_us")]
    pub min_press_us: f32,
}

impl KeyBindingDto {
    pub fn hammer(pitch: u8, unit: AdcUnit, mux_address: u8) -> Self {
        Self {
            pitch,
            mode: KeyModeDto::Hammer,
            control_number: default_control_number(),
            unit,
            pins: [0, 1],
            mux: [mux_address, mux_address],
            adc_down: default_adc_down(),
            adc_up: default_adc_up(),
            hammer_travel_mm: default_hammer_travel_mm(),
            min_press_us: default_min_press_us(),
        }
    }

    pub fn pedal(control_number: u8, unit: AdcUnit, mux_address: u8) -> Self {
        Self {
            mode: KeyModeDto::Pedal,
            control_number,
            ..Self::hammer(0, unit, mux_address)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettingsDto {
    pub up_phase_ms: u32,
    pub reservoir_size: usize,
    /// Down-phase samples must sit further than this many up-phase deviations from the up median.
    pub outlier_sigma: f32,
    /// Median gap, in up-phase deviations, needed before a new key-down value is trusted.
    pub adoption_sigma: f32,
    pub min_down_samples: usize,
}

impl Default for CalibrationSettingsDto {
    fn default() -> Self {
        Self {
            up_phase_ms: 1000,
            reservoir_size: 512,
            outlier_sigma: 3.0,
            adoption_sigma: 50.0,
            min_down_samples: 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigSettingsDto {
    #[serde(default = "default_midi_channel")]
    pub midi_channel: MidiChannel,
    pub midi_out: Option<DeviceId>,
    #[serde(default = "default_settle_delay_us")]
    pub settle_delay_us: u32,
    #[serde(default = "default_min_scan_us")]
    pub min_scan_us: u32,
    pub diagnostics: DiagnosticsMode,
    pub calibration: CalibrationSettingsDto,
    pub keys: Vec<KeyBindingDto>,
}

impl Default for RigSettingsDto {
    fn default() -> Self {
        let mut keys = Vec::new();
        for address in 0..4u8 {
            keys.push(KeyBindingDto::hammer(60 + 2 * address, AdcUnit::Adc0, address));
            keys.push(KeyBindingDto::hammer(61 + 2 * address, AdcUnit::Adc1, address));
        }
        keys.push(KeyBindingDto::pedal(64, AdcUnit::Adc0, 4));

        Self {
            midi_channel: default_midi_channel(),
            midi_out: None,
            settle_delay_us: default_settle_delay_us(),
            min_scan_us: default_min_scan_us(),
            diagnostics: DiagnosticsMode::None,
            calibration: CalibrationSettingsDto::default(),
            keys,
        }
    }
}

impl RigSettingsDto {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.calibration.reservoir_size == 0 {
            return Err(StorageError::Invalid(
                "calibration reservoir must hold at least one sample".to_string(),
            ));
        }
        for (index, key) in self.keys.iter().enumerate() {
            if key.adc_down == key.adc_up {
                return Err(StorageError::Invalid(format!(
                    "key {index}: adc_down and adc_up are both {}",
                    key.adc_down
                )));
            }
            if key.pitch > 127 || key.control_number > 127 {
                return Err(StorageError::Invalid(format!(
                    "key {index}: pitch and control number must be 0..=127"
                )));
            }
            if !(key.hammer_travel_mm > 0.0) || !(key.min_press_us > 0.0) {
                return Err(StorageError::Invalid(format!(
                    "key {index}: hammer travel and minimum press time must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Calibrated sensor values for one key, in raw (un-normalised) ADC units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParamRecord {
    pub adc_down: Option<i32>,
    pub adc_up: Option<i32>,
}

impl KeyParamRecord {
    pub fn is_empty(&self) -> bool {
        self.adc_down.is_none() && self.adc_up.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParamTable {
    records: BTreeMap<KeyIndex, KeyParamRecord>,
}

impl KeyParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: KeyIndex) -> KeyParamRecord {
        self.records.get(&key).copied().unwrap_or_default()
    }

    /// Both values, only when both were stored.
    pub fn range(&self, key: KeyIndex) -> Option<(i32, i32)> {
        let record = self.get(key);
        Some((record.adc_down?, record.adc_up?))
    }

    pub fn set_adc_down(&mut self, key: KeyIndex, value: i32) {
        self.records.entry(key).or_default().adc_down = Some(value);
    }

    pub fn set_adc_up(&mut self, key: KeyIndex, value: i32) {
        self.records.entry(key).or_default().adc_up = Some(value);
    }

    pub fn insert(&mut self, key: KeyIndex, record: KeyParamRecord) {
        if record.is_empty() {
            self.records.remove(&key);
        } else {
            self.records.insert(key, record);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyIndex, KeyParamRecord)> + '_ {
        self.records.iter().map(|(key, record)| (*key, *record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub trait ParamStore: Send {
    fn load_settings(&self) -> Result<RigSettingsDto, StorageError>;
    fn save_settings(&self, s: &RigSettingsDto) -> Result<(), StorageError>;

    fn load_key_params(&self) -> Result<KeyParamTable, StorageError>;
    fn save_key_params(&self, params: &KeyParamTable) -> Result<(), StorageError>;
}
