pub mod env_source;
pub mod models;
pub mod validation;
pub mod worker_ini;
pub mod worker_properties;

// Re-export commonly used types
pub use env_source::{EnvSource, MapEnv, ProcessEnv};
pub use models::{Configuration, LogConfig, LogLevel, MetricsSettings, OutputFormat};
pub use validation::{ConfigValidator, ValidationUtils};
pub use worker_ini::{WorkerIni, DEFAULT_SECTION, WORKER_INI_FILE_NAME};
pub use worker_properties::{
    parse_poll_interval, WorkerPropertyResolver, WorkerRuntimeConfig, ENV_PREFIX,
};

pub use conductor_errors::{ConductorError, ConductorResult};
