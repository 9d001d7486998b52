//! Error types for the ControlPlane controller

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `YamlError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid resource key: {0}")]
    InvalidResourceKey(String),

    #[error("Missing field {0}")]
    MissingField(String),

    /// A field holds a value of a type the controller does not handle
    #[error("Field {field} has unexpected type: expected {expected}, found {found}")]
    UnexpectedType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Hook error: {0}")]
    HookError(String),

    #[error("Render error: {0}")]
    RenderError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    #[error("{0}")]
    Aggregate(AggregateError),
}

/// Several errors collected by one pass
#[derive(Debug)]
pub struct AggregateError(Vec<Error>);

impl AggregateError {
    pub fn errors(&self) -> &[Error] {
        &self.0
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.0
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.0.as_slice() {
            return write!(f, "{single}");
        }
        f.write_str("[")?;
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{error}")?;
        }
        f.write_str("]")
    }
}

impl Error {
    /// Combine collected errors; `Ok(())` when there are none.
    ///
    /// Nested aggregates are flattened.
    pub fn aggregate(errors: Vec<Error>) -> Result<()> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                Error::Aggregate(inner) => flat.extend(inner.into_errors()),
                other => flat.push(other),
            }
        }
        if flat.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(AggregateError(flat)))
        }
    }

    /// Individual errors, one element unless this is an aggregate
    pub fn flatten(&self) -> Vec<&Error> {
        match self {
            Error::Aggregate(inner) => inner.errors().iter().flat_map(Error::flatten).collect(),
            other => vec![other],
        }
    }

    /// The object is absent or already gone (HTTP 404/410)
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(api_err)) => {
                api_err.code == 404 || api_err.code == 410
            }
            Error::NotFound(_) => true,
            _ => false,
        }
    }

    /// Errors that abort a component pass instead of being collected
    pub fn aborts_pass(&self) -> bool {
        matches!(self, Error::UnexpectedType { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                // Network and other errors are retryable
                _ => true,
            },
            Error::Aggregate(inner) => inner.errors().iter().any(Error::is_retryable),
            Error::NotFound(_) | Error::Conflict(_) | Error::FinalizerError(_) => true,
            // Hooks talk to the cluster and fail transiently
            Error::HookError(_) => true,
            Error::InvalidConfig(_)
            | Error::InvalidResourceKey(_)
            | Error::MissingObjectKey(_)
            | Error::MissingField(_)
            | Error::UnexpectedType { .. }
            | Error::RenderError(_)
            | Error::SerializationError(_)
            | Error::YamlError(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait for a spec change or manual intervention
            self.max_delay
        }
    }
}

/// Consecutive failure tracking for one instance
#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    /// Number of consecutive errors
    pub consecutive_errors: u32,
    /// Last error message
    pub last_error: Option<String>,
}

impl ErrorContext {
    pub fn record_error(&mut self, error: &Error) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error = Some(error.to_string());
    }

    pub fn reset(&mut self) {
        self.consecutive_errors = 0;
        self.last_error = None;
    }
}
