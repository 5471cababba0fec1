use hammerkey_ports::adc::{AdcError, DualAdcHardware, DualReading};
use hammerkey_ports::types::AdcUnit;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Full scale of the simulated 12-bit converters.
pub const ADC_MAX: i32 = 4095;
/// Signal pins per converter.
pub const PINS_PER_UNIT: usize = 4;

#[derive(Debug)]
struct SimState {
    rest_level: i32,
    levels: HashMap<(AdcUnit, usize, u8), i32>,
    conversions: u64,
}

impl SimState {
    fn level(&self, unit: AdcUnit, pin: usize, address: u8) -> i32 {
        self.levels
            .get(&(unit, pin, address))
            .copied()
            .unwrap_or(self.rest_level)
    }
}

/// Moves simulated sensors from any thread while the scan loop samples them.
#[derive(Clone, Debug)]
pub struct SimHandle {
    shared: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Sensor level seen by `unit` on `pin` with the mux at `address`.
    pub fn set_level(&self, unit: AdcUnit, pin: usize, address: u8, value: i32) {
        self.shared
            .lock()
            .levels
            .insert((unit, pin, address), value.clamp(0, ADC_MAX));
    }

    pub fn level(&self, unit: AdcUnit, pin: usize, address: u8) -> i32 {
        self.shared.lock().level(unit, pin, address)
    }

    /// Every sensor back to the rest level.
    pub fn release_all(&self) {
        self.shared.lock().levels.clear();
    }

    pub fn conversions(&self) -> u64 {
        self.shared.lock().conversions
    }
}

/// Two simulated converters behind analog multiplexers.
pub struct SimBoard {
    shared: Arc<Mutex<SimState>>,
    address_bits: u8,
    mux: [u8; 2],
    second_unit: bool,
    noise: i32,
    rng: StdRng,
}

impl SimBoard {
    pub fn new(address_bits: u8, rest_level: i32) -> (Self, SimHandle) {
        let shared = Arc::new(Mutex::new(SimState {
            rest_level: rest_level.clamp(0, ADC_MAX),
            levels: HashMap::new(),
            conversions: 0,
        }));
        log::debug!("simulated board: {address_bits} address bits, rest level {rest_level}");
        let board = Self {
            shared: shared.clone(),
            address_bits: address_bits.min(8),
            mux: [0, 0],
            second_unit: true,
            noise: 0,
            rng: StdRng::from_entropy(),
        };
        (board, SimHandle { shared })
    }

    /// Add uniform noise of `±amplitude` to every reading.
    pub fn with_noise(mut self, amplitude: i32, seed: u64) -> Self {
        self.noise = amplitude.max(0);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// A board with only the first converter fitted.
    pub fn single_unit(mut self) -> Self {
        log::debug!("simulated board without a second converter");
        self.second_unit = false;
        self
    }

    fn sample(&mut self, state: &SimState, unit: AdcUnit, pin: usize) -> i32 {
        let level = state.level(unit, pin, self.mux[unit.index()]);
        let jitter = if self.noise > 0 {
            self.rng.gen_range(-self.noise..=self.noise)
        } else {
            0
        };
        (level + jitter).clamp(0, ADC_MAX)
    }
}

impl DualAdcHardware for SimBoard {
    fn address_bits(&self) -> u8 {
        self.address_bits
    }

    fn set_mux_address(&mut self, unit: AdcUnit, address: u8) -> Result<(), AdcError> {
        if u32::from(address) >= 1u32 << self.address_bits {
            return Err(AdcError::MuxAddressOutOfRange(address));
        }
        self.mux[unit.index()] = address;
        Ok(())
    }

    fn settle(&mut self, delay: Duration) {
        let start = Instant::now();
        while start.elapsed() < delay {
            std::hint::spin_loop();
        }
    }

    fn read_synchronized(&mut self, pin0: usize, pin1: usize) -> Result<DualReading, AdcError> {
        for pin in [pin0, pin1] {
            if pin >= PINS_PER_UNIT {
                return Err(AdcError::PinOutOfRange(pin));
            }
        }
        let shared = self.shared.clone();
        let mut state = shared.lock();
        state.conversions += 1;
        let unit0 = self.sample(&state, AdcUnit::Adc0, pin0);
        let unit1 = if self.second_unit {
            Some(self.sample(&state, AdcUnit::Adc1, pin1))
        } else {
            None
        };
        Ok(DualReading { unit0, unit1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_the_level_behind_the_selected_address() {
        let (mut board, handle) = SimBoard::new(3, 50);
        handle.set_level(AdcUnit::Adc0, 0, 2, 430);
        handle.set_level(AdcUnit::Adc1, 1, 2, 300);

        board.set_mux_address(AdcUnit::Adc0, 2).unwrap();
        board.set_mux_address(AdcUnit::Adc1, 2).unwrap();
        assert_eq!(
            board.read_synchronized(0, 1).unwrap(),
            DualReading {
                unit0: 430,
                unit1: Some(300)
            }
        );

        board.set_mux_address(AdcUnit::Adc0, 3).unwrap();
        assert_eq!(board.read_synchronized(0, 1).unwrap().unit0, 50);
        assert_eq!(handle.conversions(), 2);
    }

    #[test]
    fn rejects_addresses_and_pins_the_board_lacks() {
        let (mut board, _handle) = SimBoard::new(2, 50);
        assert!(matches!(
            board.set_mux_address(AdcUnit::Adc0, 4),
            Err(AdcError::MuxAddressOutOfRange(4))
        ));
        assert!(matches!(
            board.read_synchronized(0, PINS_PER_UNIT),
            Err(AdcError::PinOutOfRange(_))
        ));
    }

    #[test]
    fn noise_stays_within_amplitude() {
        let (board, _handle) = SimBoard::new(3, 100);
        let mut board = board.with_noise(3, 11);
        for _ in 0..200 {
            let value = board.read_synchronized(0, 1).unwrap().unit0;
            assert!((97..=103).contains(&value));
        }
    }

    #[test]
    fn single_unit_board_has_no_second_reading() {
        let (board, handle) = SimBoard::new(3, 50);
        let mut board = board.single_unit();
        handle.set_level(AdcUnit::Adc1, 1, 0, 999);
        assert_eq!(board.read_synchronized(0, 1).unwrap().unit1, None);
    }

    #[test]
    fn release_all_returns_to_rest() {
        let (mut board, handle) = SimBoard::new(3, 50);
        handle.set_level(AdcUnit::Adc0, 0, 0, 5000);
        assert_eq!(handle.level(AdcUnit::Adc0, 0, 0), ADC_MAX);
        handle.release_all();
        assert_eq!(board.read_synchronized(0, 1).unwrap().unit0, 50);
    }
}
