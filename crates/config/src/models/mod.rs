pub mod configuration;
pub mod logging;
pub mod metrics;

pub use configuration::*;
pub use logging::*;
pub use metrics::*;
