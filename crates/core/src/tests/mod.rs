use crate::logging::init_logging;
use crate::logging::LogLevel;

pub mod default;

#[allow(dead_code)]
pub fn setup_tracing() {
    init_logging(LogLevel::Debug);
}
