//! Module for the error reported back to clients.
use thiserror::Error;

/// Represents a failure while handling a request.
///
/// The `Display` form is what gets written into the `error` field of a
/// response: a canonical kind prefix followed by `: ` and the detail, e.g.
/// `UnknownService: NonExistant`.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested service is not registered.
    #[error("UnknownService: {0}")]
    UnknownService(String),

    /// The service exists but has no procedure with the requested name.
    #[error("UnknownProcedure: {service}.{procedure}")]
    UnknownProcedure {
        /// The service that was addressed.
        service: String,
        /// The procedure that was not found.
        procedure: String,
    },

    /// The procedure is not callable in the host's current activity context.
    #[error("WrongContext: {0}")]
    WrongContext(String),

    /// A required parameter was neither supplied nor defaulted.
    #[error("MissingArgument: {0}")]
    MissingArgument(String),

    /// An argument could not be decoded, or the request itself is malformed.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// A non-zero object handle does not resolve to a live object.
    #[error("UnknownHandle: {0}")]
    UnknownHandle(u64),

    /// A null handle was supplied where a live instance is required.
    #[error("NullReference: {0}")]
    NullReference(String),

    /// The procedure returned null but its declared return type is not
    /// nullable.
    #[error("NullReturn: {0}")]
    NullReturn(String),

    /// The procedure raised an error or panicked; the detail carries the
    /// diagnostic message.
    #[error("ProcedureFailed: {0}")]
    ProcedureFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_formats_the_canonical_kind_prefix() {
        assert_eq!(
            Error::UnknownService("NonExistant".to_string()).to_string(),
            "UnknownService: NonExistant"
        );
        assert_eq!(
            Error::UnknownProcedure {
                service: "Flight".to_string(),
                procedure: "Launch".to_string(),
            }
            .to_string(),
            "UnknownProcedure: Flight.Launch"
        );
        assert_eq!(Error::UnknownHandle(42).to_string(), "UnknownHandle: 42");
    }
}
