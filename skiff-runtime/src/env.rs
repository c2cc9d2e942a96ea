//! Process environment inputs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
}

/// Function metadata read once from the process environment
///
/// The three values are purely informational and are copied verbatim into
/// each invocation's context.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnv {
    pub function_name: String,
    pub function_version: String,
    pub memory_limit_in_mb: String,
}

impl RuntimeEnv {
    /// Read function metadata from the standard Lambda environment variables
    pub fn from_env() -> Self {
        Self {
            function_name: std::env::var("AWS_LAMBDA_FUNCTION_NAME").unwrap_or_default(),
            function_version: std::env::var("AWS_LAMBDA_FUNCTION_VERSION").unwrap_or_default(),
            memory_limit_in_mb: std::env::var("AWS_LAMBDA_FUNCTION_MEMORY_SIZE")
                .unwrap_or_default(),
        }
    }

    /// Resolve the Runtime API base URL from `AWS_LAMBDA_RUNTIME_API`
    ///
    /// The variable holds a bare `host:port`; the API version path segment
    /// is appended here.
    pub fn runtime_api_base() -> Result<String, EnvError> {
        let api = std::env::var("AWS_LAMBDA_RUNTIME_API")
            .map_err(|_| EnvError::MissingVar("AWS_LAMBDA_RUNTIME_API"))?;
        Ok(format!("http://{}/2018-06-01/runtime", api))
    }
}
