//! Error types for the mail relay.

/// Errors that stop the relay from starting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox provider errors.
///
/// Every transport or protocol failure against the mailbox maps onto this
/// one type; callers treat all variants the same way.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Proxy {proxy} refused tunnel: {reason}")]
    Proxy { proxy: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Login failed for {username}")]
    LoginFailed { username: String },

    #[error("Command {command} rejected: {response}")]
    Rejected { command: String, response: String },

    #[error("Malformed server response: {0}")]
    Malformed(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("Mailbox task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Downstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid API host {host}: {reason}")]
    InvalidHost { host: String, reason: String },
}

/// Metrics transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to bind metrics listener on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Failed to register metric: {0}")]
    Register(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
