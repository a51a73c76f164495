pub mod logging;

pub use logging::{debug_enabled, init_logging};
