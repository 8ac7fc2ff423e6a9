use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    MissingArgument(String),

    #[error("{message}: {value:?}")]
    IllegalArgument { message: String, value: String },

    #[error("{message} (expected {expected}, found {found})")]
    DataValidation {
        message: String,
        expected: String,
        found: String,
    },

    #[error("{message}")]
    Domain {
        message: String,
        data: BTreeMap<String, String>,
    },

    #[error("{message}")]
    LeaseAcquisition {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("lease for namespace {namespace:?} was lost: {reason}")]
    LeaseLost { namespace: String, reason: String },

    #[error("dependency '{name}' is not found")]
    Dependency { name: String },

    #[error("Something went wrong, while trying to connect {}", .port.map(|p| format!("to port {p}")).unwrap_or_else(|| "to local node".to_string()))]
    Connection { port: Option<u16> },

    #[error("Something went wrong, while trying to create SDK Client{}", .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    Client { message: Option<String> },

    #[error("conflicting update to {resource}")]
    Conflict { resource: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("invalid {kind} context snapshot: {message}")]
    Context { kind: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn missing(what: impl Into<String>) -> Self {
        Error::MissingArgument(what.into())
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Error::Domain {
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    /// Domain error carrying one `key=value` pair of context.
    pub fn domain_with(
        message: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert(key.into(), value.into());
        Error::Domain {
            message: message.into(),
            data,
        }
    }

    pub fn lease_acquisition(message: impl Into<String>) -> Self {
        Error::LeaseAcquisition {
            message: message.into(),
            source: None,
        }
    }

    /// Human-facing kind name printed by the binary on failure.
    pub fn name(&self) -> &'static str {
        match self {
            Error::MissingArgument(_) => "Missing Argument Error",
            Error::IllegalArgument { .. } => "Illegal Argument Error",
            Error::DataValidation { .. } => "Data Validation Error",
            Error::Domain { .. } => "Domain Error",
            Error::LeaseAcquisition { .. } => "Lease Acquisition Error",
            Error::LeaseLost { .. } => "Lease Lost Error",
            Error::Dependency { .. } => "Dependency Error",
            Error::Connection { .. } => "Connection Error",
            Error::Client { .. } => "Client Error",
            Error::Conflict { .. } => "Conflict Error",
            Error::NotFound { .. } => "Not Found Error",
            Error::Command { .. } => "Command Error",
            Error::Context { .. } => "Context Error",
            Error::Io(_) => "IO Error",
            Error::Json(_) => "JSON Error",
            Error::Other(_) => "Error",
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Client { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_and_client_messages() {
        let err = Error::Connection { port: Some(50211) };
        assert!(err.is_connection_error());
        assert!(!err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Something went wrong, while trying to connect to port 50211"
        );
        assert_eq!(
            Error::Connection { port: None }.to_string(),
            "Something went wrong, while trying to connect to local node"
        );

        let err = Error::Client {
            message: Some("bad operator".into()),
        };
        assert!(err.is_client_error());
        assert_eq!(err.name(), "Client Error");
        assert_eq!(
            err.to_string(),
            "Something went wrong, while trying to create SDK Client: bad operator"
        );
    }

    #[test]
    fn test_domain_error_keeps_context() {
        match Error::domain_with("bad mapping", "data", "ctxA") {
            Error::Domain { data, .. } => assert_eq!(data.get("data").unwrap(), "ctxA"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
