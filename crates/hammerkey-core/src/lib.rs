pub mod controller;
pub mod diagnostics;
pub mod dual_adc;
pub mod ipc;

pub use controller::*;
pub use diagnostics::*;
pub use dual_adc::*;
pub use ipc::*;
