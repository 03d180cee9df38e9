//! Internal utilities: captured clock and logging helpers.

pub mod clock;
pub mod logger;

pub use clock::{clock, Clock, Timer};
pub use logger::{init_logger, LogLevel};
