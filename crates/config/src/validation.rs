use conductor_errors::{ConductorError, ConductorResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConductorResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConductorResult<()> {
        if value.trim().is_empty() {
            return Err(ConductorError::config_error(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a URL uses an http scheme
    pub fn validate_http_url(url: &str, field_name: &str) -> ConductorResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConductorError::config_error(format!(
                "{field_name} must start with http:// or https://, got {url}"
            )));
        }
        Ok(())
    }

    /// Validate that a timeout is reasonable
    pub fn validate_timeout_seconds(timeout_seconds: u64) -> ConductorResult<()> {
        if timeout_seconds == 0 {
            return Err(ConductorError::config_error(
                "timeout_seconds must be greater than 0",
            ));
        }
        if timeout_seconds > 3600 {
            return Err(ConductorError::config_error(
                "timeout_seconds cannot exceed 3600 (1 hour)",
            ));
        }
        Ok(())
    }
}
