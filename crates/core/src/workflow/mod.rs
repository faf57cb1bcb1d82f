#![forbid(unsafe_code)]

mod loops;
mod plan;

pub use loops::*;
pub use plan::*;
