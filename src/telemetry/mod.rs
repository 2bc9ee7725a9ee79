//! Telemetry module
//!
//! Structured logging setup; counters live with the components that own them.

mod logging;

pub use logging::init_logging;
