pub mod adc;
pub mod midi;
pub mod sample;
pub mod storage;
pub mod types;

pub use adc::*;
pub use midi::*;
pub use sample::*;
pub use storage::*;
pub use types::*;
