use hammerkey_infra_adc_sim::SimHandle;
use hammerkey_ports::storage::{KeyBindingDto, KeyModeDto};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Where a binding's sensor lives on the simulated board.
fn sensor(binding: &KeyBindingDto) -> (usize, u8) {
    let unit = binding.unit.index();
    (binding.pins[unit], binding.mux[unit])
}

fn ramp(handle: &SimHandle, binding: &KeyBindingDto, from: i32, to: i32, duration: Duration) {
    const STEPS: u32 = 20;
    let (pin, address) = sensor(binding);
    for step in 1..=STEPS {
        let value = from + (to - from) * step as i32 / STEPS as i32;
        handle.set_level(binding.unit, pin, address, value);
        thread::sleep(duration / STEPS);
    }
}

/// Presses the hammer keys one after another, getting faster each round, with the pedal held
/// during every other round.
pub fn spawn(handle: SimHandle, bindings: Vec<KeyBindingDto>, stop: Arc<AtomicBool>) {
    thread::spawn(move || {
        let press_times = [60u64, 30, 15, 8];
        let mut round = 0usize;
        let mut presses = 0u64;
        while !stop.load(Ordering::Relaxed) {
            let press = Duration::from_millis(press_times[round % press_times.len()]);
            let pedal_down = round % 2 == 1;
            for pedal in bindings.iter().filter(|b| b.mode == KeyModeDto::Pedal) {
                let (from, to) = if pedal_down {
                    (pedal.adc_up, pedal.adc_down)
                } else {
                    (pedal.adc_down, pedal.adc_up)
                };
                ramp(&handle, pedal, from, to, Duration::from_millis(100));
            }

            for key in bindings.iter().filter(|b| b.mode == KeyModeDto::Hammer) {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                ramp(&handle, key, key.adc_up, key.adc_down, press);
                thread::sleep(Duration::from_millis(150));
                ramp(&handle, key, key.adc_down, key.adc_up, Duration::from_millis(40));
                thread::sleep(Duration::from_millis(100));
                presses += 1;
            }
            log::debug!("demo round {round} done, {presses} presses so far");
            round += 1;
        }
    });
}
