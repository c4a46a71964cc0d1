use thiserror::Error;

/// Errors raised by a source adapter while searching for mentions.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request to {source} failed: {error}")]
    Http {
        source: &'static str,
        #[source]
        error: reqwest::Error,
    },

    #[error("{source} returned an error: {message}", source = .source)]
    Remote { source: &'static str, message: String },

    #[error("{source} credentials are missing")]
    MissingCredentials { source: &'static str },
}

/// Errors raised attempting to deliver an alert to a tenant's webhook.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Slack webhook missing or invalid")]
    InvalidEndpoint,
}

/// Errors surfaced by the pipeline's own infrastructure (not per-task errors,
/// which are swallowed and recorded on the task itself).
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
