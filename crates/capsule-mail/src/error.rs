use thiserror::Error;

/// A single send attempt failed. Always treated as transient by the caller.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The sender or recipient is not a valid mailbox.
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The message could not be assembled.
    #[error("Message build failed: {0}")]
    Build(String),

    /// Connection, TLS, authentication or SMTP-level rejection.
    #[error("SMTP send failed: {0}")]
    Smtp(#[source] lettre::transport::smtp::Error),
}
