//! Error types for the record framework.
//!
//! Errors fall into three layers, each a `thiserror` enum:
//!
//! - **`FieldError`** - reflective field access and field-table construction
//!   (unknown field, type mismatch, index out of range, read-only write,
//!   unresolved `DependsOn` dimension).
//! - **`DeviceError`** - runtime failures of class operations. Local drivers and
//!   network proxies report the same variants for the same condition, so callers
//!   never need to know where a record lives. `DeviceError` and `FieldError` are
//!   `Serialize`/`Deserialize` so a server can return them verbatim.
//! - **`ConfigError`** - fatal startup errors: bad descriptions, duplicate names,
//!   unknown drivers, dangling references, dependency cycles, initialization
//!   failures, unreadable configuration.
//!
//! `DriverError` mirrors the driver-construction error used throughout the
//! driver crates: a driver type, a coarse kind and a message.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::record::{Lifecycle, RecordClass};
use crate::value::DataType;

// =============================================================================
// Field Errors
// =============================================================================

/// Errors from field tables and reflective field access.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldError {
    /// No field with this name in the record's table.
    #[error("no such field '{field}'")]
    NoSuchField {
        /// Requested field name.
        field: String,
    },

    /// Value type does not match the field's declared type.
    #[error("field '{field}' has type {expected}, got {actual}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Declared type.
        expected: DataType,
        /// Type that was supplied.
        actual: String,
    },

    /// Element index beyond the current array length.
    #[error("index {index} out of range for field '{field}' (length {len})")]
    IndexOutOfRange {
        /// Field name.
        field: String,
        /// Requested index.
        index: usize,
        /// Current length.
        len: usize,
    },

    /// Write to a read-only field through the public accessor.
    #[error("field '{field}' is read-only")]
    ReadOnlyField {
        /// Field name.
        field: String,
    },

    /// `DependsOn` names a missing, later, non-integer or negative field.
    #[error("field '{field}' depends on '{depends_on}', which does not resolve to a length")]
    UnresolvedDependency {
        /// Array field.
        field: String,
        /// Dimension source it names.
        depends_on: String,
    },

    /// Array value length differs from the field's resolved dimension.
    #[error("field '{field}' expects {expected} elements, got {actual}")]
    DimensionMismatch {
        /// Field name.
        field: String,
        /// Resolved length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// Descriptor dimensions are inconsistent with its type.
    #[error("field '{field}' has invalid dimensions: {reason}")]
    InvalidDimension {
        /// Field name.
        field: String,
        /// What is wrong.
        reason: String,
    },

    /// Two descriptors share a name.
    #[error("duplicate field '{field}'")]
    DuplicateField {
        /// Field name.
        field: String,
    },

    /// Value has the right type but an unusable content.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// What is wrong.
        reason: String,
    },

    /// No field table registered for this driver type.
    #[error("no field table registered for type '{type_name}'")]
    UnknownType {
        /// Driver type name.
        type_name: String,
    },
}

// =============================================================================
// Device Errors
// =============================================================================

/// Runtime errors of record and class operations.
///
/// Local drivers and network proxies report identical variants for the same
/// condition.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceError {
    /// The driver does not implement this operation.
    #[error("operation '{operation}' is not supported")]
    NotSupported {
        /// Operation name.
        operation: String,
    },

    /// Class operation outside the `Opened` lifecycle state.
    #[error("record '{record}' is {state:?}, cannot {operation}")]
    InvalidState {
        /// Record name.
        record: String,
        /// Current lifecycle state.
        state: Lifecycle,
        /// Attempted operation.
        operation: String,
    },

    /// Failure reported by the device itself.
    #[error("hardware fault: {0}")]
    HardwareFault(String),

    /// Requested position or value outside configured limits.
    #[error("value {value} outside limits [{low}, {high}]")]
    LimitExceeded {
        /// Requested value.
        value: f64,
        /// Lower limit.
        low: f64,
        /// Upper limit.
        high: f64,
    },

    /// Parameter value rejected.
    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        parameter: String,
        /// What is wrong.
        reason: String,
    },

    /// Class accessor used on a record of another class.
    #[error("record '{record}' is a {actual:?}, not a {expected:?}")]
    WrongClass {
        /// Record name.
        record: String,
        /// Class requested.
        expected: RecordClass,
        /// Actual class.
        actual: RecordClass,
    },

    /// Referenced record no longer exists.
    #[error("record '{record}' is unavailable")]
    RecordUnavailable {
        /// Record name.
        record: String,
    },

    /// Transport to a remote server failed; the connection is dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No reply within the deadline; the connection is kept.
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

    /// Remote field has a different type than requested.
    #[error("remote field '{field}' has type {actual}, requested {expected}")]
    RemoteTypeMismatch {
        /// Remote `record.field` name.
        field: String,
        /// Requested type.
        expected: DataType,
        /// Declared remote type.
        actual: DataType,
    },

    /// Remote array length differs from the local dimension.
    #[error("field '{field}' has {actual} elements, expected {expected}")]
    DimensionMismatch {
        /// Field name.
        field: String,
        /// Local length.
        expected: usize,
        /// Remote length.
        actual: usize,
    },

    /// Malformed frame or unexpected reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Reflective field access failed.
    #[error(transparent)]
    Field(#[from] FieldError),
}

impl DeviceError {
    /// Shorthand for [`DeviceError::NotSupported`].
    pub fn not_supported(operation: impl Into<String>) -> Self {
        DeviceError::NotSupported {
            operation: operation.into(),
        }
    }

    /// Shorthand for [`DeviceError::InvalidParameter`].
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// True for errors after which retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::TimedOut { .. })
    }
}

/// Result alias for class operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

// =============================================================================
// Driver Errors
// =============================================================================

/// Coarse category of a driver construction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverErrorKind {
    /// Driver could not be set up.
    Initialization,
    /// Field values are inconsistent.
    Configuration,
    /// Transport setup failed.
    Communication,
    /// Parameter out of range.
    InvalidParameter,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

/// Failure to construct a driver from its resolved fields.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver type name.
    pub driver_type: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DriverError {
    /// Create a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wrap a field error raised while reading the driver's fields.
    pub fn from_field(driver_type: impl Into<String>, error: FieldError) -> Self {
        Self::new(driver_type, DriverErrorKind::Configuration, error.to_string())
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Fatal errors while loading configuration or building a database.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A record's fields do not resolve against its table.
    #[error("record '{record}': {source}")]
    Field {
        /// Record name.
        record: String,
        /// Underlying field error.
        #[source]
        source: FieldError,
    },

    /// Field table for a driver type could not be built.
    #[error("driver type '{driver}': {source}")]
    FieldTable {
        /// Driver type.
        driver: String,
        /// Underlying field error.
        #[source]
        source: FieldError,
    },

    /// Two records share a name.
    #[error("duplicate record name '{record}'")]
    DuplicateRecord {
        /// Record name.
        record: String,
    },

    /// No factory registered for a description's driver type.
    #[error("record '{record}' uses unknown driver '{driver}'")]
    UnknownDriver {
        /// Record name.
        record: String,
        /// Driver type requested.
        driver: String,
    },

    /// A `RecordRef` field names a record that is not in the database.
    #[error("record '{record}' references unknown record '{reference}'")]
    UnknownRecord {
        /// Referencing record.
        record: String,
        /// Missing record.
        reference: String,
    },

    /// Records reference each other in a cycle.
    #[error("dependency cycle between records: {}", .records.join(", "))]
    DependencyCycle {
        /// Records involved in or blocked by the cycle.
        records: Vec<String>,
    },

    /// Driver construction failed.
    #[error("record '{record}': {source}")]
    Driver {
        /// Record name.
        record: String,
        /// Underlying driver error.
        #[source]
        source: DriverError,
    },

    /// Record initialization failed.
    #[error("failed to initialize record '{record}': {source}")]
    Initialization {
        /// Record name.
        record: String,
        /// Underlying device error.
        #[source]
        source: DeviceError,
    },

    /// Configuration file or environment could not be read.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Semantic validation failed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Load(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_serde_preserves_variant() {
        let errors = vec![
            DeviceError::HardwareFault("limit switch jammed".into()),
            DeviceError::TimedOut {
                timeout: Duration::from_millis(250),
            },
            DeviceError::Field(FieldError::IndexOutOfRange {
                field: "monitor_offset_index".into(),
                index: 4,
                len: 4,
            }),
        ];
        for error in errors {
            let json = serde_json::to_string(&error).unwrap();
            let restored: DeviceError = serde_json::from_str(&json).unwrap();
            assert_eq!(restored, error);
        }
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new("soft_motor", DriverErrorKind::Configuration, "scale is zero");
        assert_eq!(
            err.to_string(),
            "Driver 'soft_motor' configuration error: scale is zero"
        );
    }

    #[test]
    fn test_cycle_display_lists_records() {
        let err = ConfigError::DependencyCycle {
            records: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle between records: a, b");
    }

    #[test]
    fn test_only_timeouts_are_transient() {
        assert!(DeviceError::TimedOut {
            timeout: Duration::from_secs(1)
        }
        .is_transient());
        assert!(!DeviceError::ConnectionLost("reset".into()).is_transient());
    }
}
