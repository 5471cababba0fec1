pub mod calibration;
pub mod channel;
pub mod filter;
pub mod hammer;
pub mod key;
pub mod note;
pub mod range;
pub mod reservoir;
pub mod velocity_curve;

pub use calibration::*;
pub use channel::*;
pub use filter::*;
pub use hammer::*;
pub use key::*;
pub use note::*;
pub use range::*;
pub use reservoir::*;
pub use velocity_curve::*;
