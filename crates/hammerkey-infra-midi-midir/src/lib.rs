use hammerkey_ports::midi::{MidiError, MidiMessage, MidiSender};
use hammerkey_ports::types::{DeviceId, MidiChannel};
use midir::{MidiOutput, MidiOutputConnection};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MidiOutputDevice {
    pub id: DeviceId,
    pub name: String,
}

/// Enumerates host MIDI outputs.
pub struct MidirMidiOutputPort {
    client_name: String,
}

impl MidirMidiOutputPort {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn create_midi_out(&self) -> Result<MidiOutput, MidiError> {
        MidiOutput::new(&self.client_name).map_err(|e| MidiError::Backend(e.to_string()))
    }

    fn device_id(index: usize, name: &str) -> DeviceId {
        DeviceId(format!("midir:{}:{}", index, name))
    }

    pub fn list_outputs(&self) -> Result<Vec<MidiOutputDevice>, MidiError> {
        let midi_out = self.create_midi_out()?;
        let devices = midi_out
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| {
                let name = midi_out
                    .port_name(port)
                    .unwrap_or_else(|_| "Unknown Output".to_string());
                MidiOutputDevice {
                    id: Self::device_id(index, &name),
                    name,
                }
            })
            .collect();
        Ok(devices)
    }

    /// Sender bound to the first output matching `hint` (see [`matches_hint`]), or to the first
    /// output at all when there is no hint. The port is opened by [`MidiSender::initialize`].
    pub fn sender(&self, hint: Option<DeviceId>) -> MidirMidiSender {
        MidirMidiSender {
            client_name: self.client_name.clone(),
            hint,
            connection: None,
            failed_sends: 0,
            reported_failures: 0,
        }
    }
}

impl Default for MidirMidiOutputPort {
    fn default() -> Self {
        Self::new("HammerKey")
    }
}

/// A device id matches either exactly or when its port name contains the hint, ignoring case.
pub fn matches_hint(id: &DeviceId, name: &str, hint: &DeviceId) -> bool {
    id == hint || name.to_lowercase().contains(&hint.0.to_lowercase())
}

pub struct MidirMidiSender {
    client_name: String,
    hint: Option<DeviceId>,
    connection: Option<MidiOutputConnection>,
    failed_sends: u64,
    reported_failures: u64,
}

impl MidirMidiSender {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Sends that the backend refused since the port was opened.
    pub fn failed_sends(&self) -> u64 {
        self.failed_sends
    }

    fn connect(&mut self) -> Result<(), MidiError> {
        let midi_out =
            MidiOutput::new(&self.client_name).map_err(|e| MidiError::Backend(e.to_string()))?;

        let ports = midi_out.ports();
        let mut selected = None;
        for (index, port) in ports.iter().enumerate() {
            let name = midi_out
                .port_name(port)
                .unwrap_or_else(|_| "Unknown Output".to_string());
            let id = MidirMidiOutputPort::device_id(index, &name);
            let wanted = match self.hint.as_ref() {
                Some(hint) => matches_hint(&id, &name, hint),
                None => true,
            };
            if wanted {
                selected = Some((port.clone(), name));
                break;
            }
        }

        let (port, name) = selected.ok_or_else(|| match self.hint.as_ref() {
            Some(hint) => MidiError::DeviceNotFound(hint.to_string()),
            None => MidiError::DeviceUnavailable("no MIDI output ports".to_string()),
        })?;

        let connection = midi_out
            .connect(&port, "hammerkey-midi-output")
            .map_err(|e| MidiError::Backend(e.to_string()))?;
        log::info!("MIDI output connected: {name}");
        self.connection = Some(connection);
        self.failed_sends = 0;
        self.reported_failures = 0;
        Ok(())
    }

    /// Failure count to report, once per thousand new failures.
    fn failures_to_report(&mut self) -> Option<u64> {
        if self.failed_sends / 1000 <= self.reported_failures / 1000 {
            return None;
        }
        self.reported_failures = self.failed_sends;
        Some(self.failed_sends)
    }

    fn write(&mut self, message: MidiMessage) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Err(e) = connection.send(&message.to_bytes()) {
            self.failed_sends += 1;
            if self.failed_sends == 1 {
                log::warn!("MIDI send failed, dropping message: {e}");
            }
        }
    }
}

impl MidiSender for MidirMidiSender {
    fn send_note_on(&mut self, pitch: u8, velocity: u8, channel: MidiChannel) {
        self.write(MidiMessage::NoteOn {
            pitch,
            velocity,
            channel,
        });
    }

    fn send_note_off(&mut self, pitch: u8, velocity: u8, channel: MidiChannel) {
        self.write(MidiMessage::NoteOff {
            pitch,
            velocity,
            channel,
        });
    }

    fn send_control_change(&mut self, number: u8, value: u8, channel: MidiChannel) {
        self.write(MidiMessage::ControlChange {
            number,
            value,
            channel,
        });
    }

    fn initialize(&mut self) -> Result<(), MidiError> {
        if self.connection.is_none() {
            self.connect()?;
        }
        Ok(())
    }

    fn end_of_loop(&mut self) {
        if let Some(failed) = self.failures_to_report() {
            log::warn!("{failed} MIDI sends failed so far");
        }
    }
}

impl Drop for MidirMidiSender {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_matches_exact_id_or_name_fragment() {
        let id = DeviceId("midir:1:Teensy MIDI".to_string());
        assert!(matches_hint(&id, "Teensy MIDI", &DeviceId("midir:1:Teensy MIDI".to_string())));
        assert!(matches_hint(&id, "Teensy MIDI", &DeviceId("teensy".to_string())));
        assert!(!matches_hint(&id, "Teensy MIDI", &DeviceId("loopMIDI".to_string())));
    }

    #[test]
    fn unconnected_sender_drops_messages() {
        let mut sender = MidirMidiOutputPort::default().sender(None);
        sender.send_note_on(60, 100, MidiChannel::default());
        assert!(!sender.is_connected());
        assert_eq!(sender.failed_sends(), 0);
    }

    #[test]
    fn failure_warning_fires_once_per_thousand() {
        let mut sender = MidirMidiOutputPort::default().sender(None);
        sender.failed_sends = 999;
        assert_eq!(sender.failures_to_report(), None);
        sender.failed_sends = 1000;
        assert_eq!(sender.failures_to_report(), Some(1000));
        for _ in 0..5 {
            assert_eq!(sender.failures_to_report(), None);
        }
        sender.failed_sends = 1999;
        assert_eq!(sender.failures_to_report(), None);
        sender.failed_sends = 2400;
        assert_eq!(sender.failures_to_report(), Some(2400));
        assert_eq!(sender.failures_to_report(), None);
    }
}
