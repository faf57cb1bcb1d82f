#![forbid(unsafe_code)]

mod macros;

pub mod clock;
pub mod deps;
pub mod gates;
pub mod ids;
pub mod liveness;
pub mod model;
pub mod workflow;

pub use clock::{Clock, ManualClock, SystemClock};
