mod demo;

use hammerkey_core::{Command, Controller, DualAdcManager, Event};
use hammerkey_infra_adc_sim::SimBoard;
use hammerkey_infra_midi_midir::MidirMidiOutputPort;
use hammerkey_infra_storage_fs::FsStorage;
use hammerkey_ports::midi::{MidiMessage, MidiSender};
use hammerkey_ports::storage::ParamStore;
use hammerkey_ports::types::{DeviceId, MidiChannel};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HELP: &str = "commands: cal <key>|all, diag off|notes|state|buffer, save, save-settings, status, export <dir>, quit";

/// Stands in for a MIDI port when none can be opened.
struct LogMidiSender;

impl LogMidiSender {
    fn line(message: MidiMessage) -> String {
        let [status, data1, data2] = message.to_bytes();
        format!("midi {status:02X} {data1:02X} {data2:02X} ({message:?})")
    }

    fn log(message: MidiMessage) {
        log::info!("{}", Self::line(message));
    }
}

impl MidiSender for LogMidiSender {
    fn send_note_on(&mut self, pitch: u8, velocity: u8, channel: MidiChannel) {
        Self::log(MidiMessage::NoteOn {
            pitch,
            velocity,
            channel,
        });
    }

    fn send_note_off(&mut self, pitch: u8, velocity: u8, channel: MidiChannel) {
        Self::log(MidiMessage::NoteOff {
            pitch,
            velocity,
            channel,
        });
    }

    fn send_control_change(&mut self, number: u8, value: u8, channel: MidiChannel) {
        Self::log(MidiMessage::ControlChange {
            number,
            value,
            channel,
        });
    }
}

struct Args {
    config_dir: Option<PathBuf>,
    demo: bool,
    list_midi: bool,
    noise: i32,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config_dir: None,
        demo: false,
        list_midi: false,
        noise: 2,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--demo" => args.demo = true,
            "--list-midi" => args.list_midi = true,
            "--noise" => {
                let value = iter.next().ok_or("--noise needs a value")?;
                args.noise = value
                    .parse()
                    .map_err(|e| format!("--noise {value}: {e}"))?;
            }
            "--help" | "-h" => {
                return Err(format!(
                    "usage: hammerkey-app [CONFIG_DIR] [--demo] [--noise N] [--list-midi]\n{HELP}"
                ))
            }
            other if other.starts_with('-') => return Err(format!("unknown option {other}")),
            dir => args.config_dir = Some(PathBuf::from(dir)),
        }
    }
    Ok(args)
}

fn open_midi(port: &MidirMidiOutputPort, hint: Option<DeviceId>) -> Box<dyn MidiSender> {
    let mut sender = port.sender(hint);
    match sender.initialize() {
        Ok(()) => Box::new(sender),
        Err(e) => {
            log::warn!("cannot open MIDI output ({e}), messages are only logged");
            Box::new(LogMidiSender)
        }
    }
}

fn list_midi(port: &MidirMidiOutputPort) {
    match port.list_outputs() {
        Ok(devices) if devices.is_empty() => println!("no MIDI outputs"),
        Ok(devices) => {
            for device in devices {
                println!("{}\t{}", device.id, device.name);
            }
        }
        Err(e) => {
            log::error!("cannot list MIDI outputs: {e}");
            std::process::exit(1);
        }
    }
}

fn report(event: &Event) {
    match event {
        Event::ControlChange { .. } => log::debug!("{event:?}"),
        Event::KeySnapshots { keys } => {
            for key in keys {
                let s = &key.snapshot;
                log::info!(
                    "key {} pitch {}: raw {} pos {:.1} down {} up {} notes {} calibrating {:?}",
                    key.key,
                    s.pitch,
                    s.raw,
                    s.position,
                    s.adc_down,
                    s.adc_up,
                    s.note_count,
                    s.calibrating
                );
            }
        }
        other => log::info!("{other:?}"),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    if args.list_midi {
        list_midi(&MidirMidiOutputPort::default());
        return;
    }

    let storage = match args.config_dir {
        Some(dir) => FsStorage::new(dir),
        None => FsStorage::default(),
    };
    log::info!("configuration in {}", storage.base_dir().display());

    let settings = storage.load_settings().unwrap_or_else(|e| {
        log::warn!("cannot read settings, using defaults: {e}");
        Default::default()
    });
    let bindings = settings.keys.clone();
    let min_scan = Duration::from_micros(u64::from(settings.min_scan_us));

    let (board, sim) = SimBoard::new(3, 50);
    let board = board.with_noise(args.noise, 0x5EED);
    let midi = open_midi(&MidirMidiOutputPort::default(), settings.midi_out.clone());

    let controller = Controller::new(
        settings,
        DualAdcManager::new(Box::new(board)),
        midi,
        Some(Box::new(storage) as Box<dyn ParamStore>),
    );
    let mut controller = match controller {
        Ok(controller) => controller,
        Err(e) => {
            log::error!("cannot start: {e}");
            std::process::exit(1);
        }
    };

    let commands = controller.command_sender();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Some(command) => {
                    if !commands.send(command) {
                        log::warn!("command queue full, dropped {line:?}");
                    }
                }
                None => log::warn!("unknown command {line:?}; {HELP}"),
            }
        }
    });

    let stop = Arc::new(AtomicBool::new(false));
    if args.demo {
        demo::spawn(sim, bindings, stop.clone());
    }

    log::info!("{HELP}");
    loop {
        let started = Instant::now();
        let running = controller.tick();
        for event in controller.drain_events() {
            report(&event);
        }
        if !running {
            break;
        }
        if let Some(rest) = min_scan.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    stop.store(true, Ordering::Relaxed);
    log::info!("stopped after {} scans", controller.scans());
}
