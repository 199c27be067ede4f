//! Utility modules shared by the library and the binary

pub mod logging;
pub mod signal;
pub mod time;

#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use signal::wait_for_shutdown_signal;
pub use time::current_timestamp;
