//! Network error type.
//!
//! Every variant maps onto exactly one [`DeviceError`] variant, so a proxy
//! driver reports the same error a local driver would. Errors raised by the
//! remote record itself travel back verbatim inside [`NetError::Remote`].

use std::time::Duration;
use thiserror::Error;

use daq_records::{DataType, DeviceError};

/// Failures of a network field call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetError {
    /// Transport failed; the connection has been dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No matching reply before the deadline; the connection is kept.
    #[error("timed out after {timeout:?}")]
    TimedOut {
        /// Deadline that expired.
        timeout: Duration,
    },

    /// Remote record or field does not exist.
    #[error("no such remote field '{field}'")]
    NoSuchField {
        /// Remote `record.field` name.
        field: String,
    },

    /// Reply or remote declaration has a different type than requested.
    #[error("remote field '{field}' has type {actual}, requested {expected}")]
    RemoteTypeMismatch {
        /// Remote `record.field` name.
        field: String,
        /// Requested type.
        expected: DataType,
        /// Remote type.
        actual: DataType,
    },

    /// Remote array length differs from the local dimension.
    #[error("field '{field}' has {actual} elements, expected {expected}")]
    DimensionMismatch {
        /// Remote `record.field` name.
        field: String,
        /// Local length.
        expected: usize,
        /// Remote length.
        actual: usize,
    },

    /// Malformed frame or unexpected reply kind.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error raised by the remote record, carried back unchanged.
    #[error(transparent)]
    Remote(DeviceError),
}

impl NetError {
    /// Wrap a remote error, unwrapping variants that have a network
    /// counterpart so they compare equal to locally detected ones.
    pub fn from_remote(error: DeviceError) -> Self {
        match error {
            DeviceError::NoSuchField { field } => NetError::NoSuchField { field },
            DeviceError::RemoteTypeMismatch {
                field,
                expected,
                actual,
            } => NetError::RemoteTypeMismatch {
                field,
                expected,
                actual,
            },
            other => NetError::Remote(other),
        }
    }

    /// True when the connection was dropped and must be re-established.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, NetError::ConnectionLost(_))
    }
}

impl From<NetError> for DeviceError {
    fn from(error: NetError) -> Self {
        match error {
            NetError::ConnectionLost(reason) => DeviceError::ConnectionLost(reason),
            NetError::TimedOut { timeout } => DeviceError::TimedOut { timeout },
            NetError::NoSuchField { field } => DeviceError::NoSuchField { field },
            NetError::RemoteTypeMismatch {
                field,
                expected,
                actual,
            } => DeviceError::RemoteTypeMismatch {
                field,
                expected,
                actual,
            },
            NetError::DimensionMismatch {
                field,
                expected,
                actual,
            } => DeviceError::DimensionMismatch {
                field,
                expected,
                actual,
            },
            NetError::Protocol(reason) => DeviceError::Protocol(reason),
            NetError::Remote(error) => error,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(error: std::io::Error) -> Self {
        NetError::ConnectionLost(error.to_string())
    }
}

/// Result alias for network calls.
pub type NetResult<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;
    use daq_records::ScalarType;

    #[test]
    fn test_remote_errors_pass_through_unchanged() {
        let remote = DeviceError::HardwareFault("encoder disconnected".into());
        let mapped: DeviceError = NetError::from_remote(remote.clone()).into();
        assert_eq!(mapped, remote);
    }

    #[test]
    fn test_remote_type_mismatch_is_normalized() {
        let remote = DeviceError::RemoteTypeMismatch {
            field: "m1.position".into(),
            expected: DataType::Scalar(ScalarType::Int32),
            actual: DataType::Scalar(ScalarType::Double),
        };
        let net = NetError::from_remote(remote.clone());
        assert!(matches!(net, NetError::RemoteTypeMismatch { .. }));
        assert_eq!(DeviceError::from(net), remote);
    }

    #[test]
    fn test_transport_errors_map_one_to_one() {
        assert_eq!(
            DeviceError::from(NetError::ConnectionLost("reset".into())),
            DeviceError::ConnectionLost("reset".into())
        );
        let timeout = Duration::from_millis(20);
        assert_eq!(
            DeviceError::from(NetError::TimedOut { timeout }),
            DeviceError::TimedOut { timeout }
        );
        assert!(NetError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .is_connection_lost());
    }
}
