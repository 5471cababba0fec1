use hammerkey_ports::adc::DualAdcHardware;
use hammerkey_ports::types::AdcUnit;
use std::time::Duration;

/// Value reported for unit 1 on boards that never produced one.
pub const MISSING_UNIT_VALUE: i32 = 0;

/// Shares two converters between many keys.
///
/// A conversion always reads both units at once and the pair is cached. The cache is dropped when
/// the mux addresses or signal pins change, or when the owner calls [`DualAdcManager::invalidate`]
/// at the start of a scan, so two keys sitting on the same mux address cost one conversion.
pub struct DualAdcManager {
    hardware: Box<dyn DualAdcHardware>,
    /// `None` until the address lines were driven once.
    mux: [Option<u8>; 2],
    pins: [usize; 2],
    cached: [i32; 2],
    dirty: bool,
    conversions: u64,
    unit1_missing: bool,
}

impl DualAdcManager {
    pub fn new(hardware: Box<dyn DualAdcHardware>) -> Self {
        Self {
            hardware,
            mux: [None, None],
            pins: [0, 1],
            cached: [0, MISSING_UNIT_VALUE],
            dirty: true,
            conversions: 0,
            unit1_missing: false,
        }
    }

    pub fn set_mux_config(&mut self, addr0: u8, addr1: u8) {
        for (unit, address) in [(AdcUnit::Adc0, addr0), (AdcUnit::Adc1, addr1)] {
            let selected = &mut self.mux[unit.index()];
            if *selected == Some(address) {
                continue;
            }
            match self.hardware.set_mux_address(unit, address) {
                Ok(()) => {
                    *selected = Some(address);
                    self.dirty = true;
                }
                Err(e) => log::warn!("mux {unit:?}: cannot select address {address}: {e}"),
            }
        }
    }

    pub fn set_channel_config(&mut self, ch0: usize, ch1: usize) {
        if self.pins != [ch0, ch1] {
            self.pins = [ch0, ch1];
            self.dirty = true;
        }
    }

    pub fn update_readings(&mut self, settle_delay: Duration) {
        self.hardware.settle(settle_delay);
        self.conversions += 1;
        match self.hardware.read_synchronized(self.pins[0], self.pins[1]) {
            Ok(reading) => {
                self.cached[0] = reading.unit0;
                match reading.unit1 {
                    Some(value) => self.cached[1] = value,
                    None if !self.unit1_missing => {
                        self.unit1_missing = true;
                        log::warn!("second ADC unit not present, unit 1 keys read a stale value");
                    }
                    None => {}
                }
                self.dirty = false;
            }
            Err(e) => log::warn!("ADC conversion failed, keeping previous readings: {e}"),
        }
    }

    /// Value of `unit` with the given pins and mux addresses selected. Converts only on a cache miss.
    pub fn read(
        &mut self,
        unit: AdcUnit,
        ch0: usize,
        ch1: usize,
        addr0: u8,
        addr1: u8,
        settle_delay: Duration,
    ) -> i32 {
        self.set_mux_config(addr0, addr1);
        self.set_channel_config(ch0, ch1);
        if self.dirty {
            self.update_readings(settle_delay);
        }
        self.cached[unit.index()]
    }

    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    pub fn mux_config(&self) -> [Option<u8>; 2] {
        self.mux
    }

    pub fn channel_config(&self) -> [usize; 2] {
        self.pins
    }

    pub fn address_bits(&self) -> u8 {
        self.hardware.address_bits()
    }
}

impl std::fmt::Debug for DualAdcManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualAdcManager")
            .field("mux", &self.mux)
            .field("pins", &self.pins)
            .field("cached", &self.cached)
            .field("dirty", &self.dirty)
            .field("conversions", &self.conversions)
            .finish()
    }
}
