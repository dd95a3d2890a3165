//! Error types for txprop

use thiserror::Error;

/// Result type alias for txprop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transaction engine itself.
///
/// Errors produced by a wrapped unit of work never pass through this type:
/// the engine hands them back to the caller unchanged. Callers pick their own
/// error type and implement `From<txprop::Error>` for it, so a failed
/// propagation check can always be told apart from a failed piece of work.
#[derive(Error, Debug)]
pub enum Error {
    /// No execution scope is active on this call chain
    #[error("No transactional context is active; call this from inside a transactional unit of work")]
    NoContext,

    /// `MANDATORY` propagation without an ambient transaction
    #[error("No existing transaction found for transaction marked with propagation 'MANDATORY'")]
    MandatoryPropagation,

    /// `NEVER` propagation inside an ambient transaction
    #[error("Found an existing transaction, transaction marked with propagation 'NEVER'")]
    NeverPropagation,

    /// The requested client name was never registered
    #[error("No transactional client registered under name: {0}")]
    UnknownClient(String),

    /// A hook was registered after its scope dispatched its hooks
    #[error("Transactional scope already settled; the hook would never run")]
    ScopeSettled,

    /// A transaction delegate was used after its transaction settled
    #[error("Transaction already finished")]
    TransactionFinished,

    /// Connection setup error
    #[error("Connection error: {0}")]
    Connection(String),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error reports an illegal propagation/state combination.
    pub fn is_propagation_error(&self) -> bool {
        matches!(self, Error::MandatoryPropagation | Error::NeverPropagation)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagation_errors_are_flagged() {
        assert!(Error::MandatoryPropagation.is_propagation_error());
        assert!(Error::NeverPropagation.is_propagation_error());
        assert!(!Error::NoContext.is_propagation_error());
        assert!(!Error::UnknownClient("replica".into()).is_propagation_error());
    }
}
