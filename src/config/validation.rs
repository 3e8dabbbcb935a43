use super::models::Config;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for a single long-poll receive
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("worker.max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Duration must be positive: {field}")]
    ZeroDuration { field: String },

    #[error("queue.wait ({actual:?}) exceeds limit of {limit:?}")]
    PollWaitTooLong { actual: Duration, limit: Duration },

    #[error("Invalid GitHub endpoint scheme '{endpoint}', expected 'http://' or 'https://'")]
    InvalidEndpointScheme { endpoint: String },

    #[error("GitHub credentials incomplete: client id and client secret must be set together")]
    IncompleteCredentials,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_worker(config)?;
    validate_queue(config)?;
    validate_github(config)?;
    Ok(())
}

fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    if config.worker.max_concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }

    if config.worker.task_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "worker.task_timeout".to_string(),
        });
    }

    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    let wait = config.queue.wait.as_duration();
    if wait > MAX_POLL_WAIT {
        return Err(ValidationError::PollWaitTooLong {
            actual: wait,
            limit: MAX_POLL_WAIT,
        });
    }

    if config.queue.visibility_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "queue.visibility_timeout".to_string(),
        });
    }

    Ok(())
}

fn validate_github(config: &Config) -> Result<(), ValidationError> {
    let endpoint = &config.github.root_endpoint;
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ValidationError::InvalidEndpointScheme {
            endpoint: endpoint.clone(),
        });
    }

    if config.github.request_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "github.request_timeout".to_string(),
        });
    }

    // Unauthenticated access is allowed, half a credential pair is not
    if config.github.client_id.is_some() != config.github.client_secret.is_some() {
        return Err(ValidationError::IncompleteCredentials);
    }

    Ok(())
}
