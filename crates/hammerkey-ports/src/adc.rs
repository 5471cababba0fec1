use crate::types::AdcUnit;
use std::time::Duration;

/// Result of one simultaneous conversion on both units.
///
/// `unit1` is `None` on boards that only have a single converter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DualReading {
    pub unit0: i32,
    pub unit1: Option<i32>,
}

#[derive(thiserror::Error, Debug)]
pub enum AdcError {
    #[error("signal pin index out of range: {0}")]
    PinOutOfRange(usize),
    #[error("mux address out of range: {0}")]
    MuxAddressOutOfRange(u8),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Two converters, each fed by its own analog multiplexer.
pub trait DualAdcHardware: Send {
    /// Number of mux address lines; valid addresses are `0..1 << address_bits()`.
    fn address_bits(&self) -> u8;

    /// Drive the address lines of the multiplexer in front of `unit`.
    fn set_mux_address(&mut self, unit: AdcUnit, address: u8) -> Result<(), AdcError>;

    /// Block for the multiplexer settle time.
    fn settle(&mut self, delay: Duration);

    /// Convert both units at the same instant on the given signal pins.
    fn read_synchronized(&mut self, pin0: usize, pin1: usize) -> Result<DualReading, AdcError>;
}
