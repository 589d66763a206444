//! Class contracts.
//!
//! Each device class defines:
//!
//! - a `*State` struct holding the class-level values every driver of the class
//!   shares (positions, limits, gains, ...),
//! - a `*Param` enum naming the long tail of settings reached through the
//!   generic `get_parameter`/`set_parameter` calls,
//! - a `*Driver` trait with the fixed operation list. Optional operations
//!   default to [`DeviceError::NotSupported`]; parameter operations default to
//!   the class handler that reads and writes the state,
//! - a borrowed handle (`record.motor()?`, ...) through which callers reach the
//!   driver. The handle enforces the class rules (limits, scaling, status
//!   normalization, index bounds) so every driver gets them for free,
//! - the class field table and its process hook, which turns reads and writes
//!   of `process` fields into class operations. This is what lets a network
//!   server drive any record by field name.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut record = motor.lock();
//! let mut m = record.motor()?;
//! m.move_absolute(12.5)?;
//! while m.is_busy()? {
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{FieldDescriptor, FieldStore};
use crate::record::{Record, RecordClass};
use crate::value::{DataType, FieldValue};

pub mod amplifier;
pub mod area_detector;
pub mod autoscale;
pub mod digital;
pub mod motor;
pub mod relay;
pub mod sca;
pub mod scaler;
pub mod timer;

pub use amplifier::{AmplifierDriver, AmplifierHandle, AmplifierParam, AmplifierState};
pub use area_detector::{
    AreaDetectorDriver, AreaDetectorHandle, AreaDetectorParam, AreaDetectorState,
    AreaDetectorStatus,
};
pub use autoscale::{AutoscaleDriver, AutoscaleHandle, AutoscaleParam, AutoscaleState, ChangeRequest};
pub use digital::{
    DigitalInputDriver, DigitalInputHandle, DigitalInputState, DigitalOutputDriver,
    DigitalOutputHandle, DigitalOutputState,
};
pub use motor::{MotorDriver, MotorHandle, MotorParam, MotorState, MotorStatus};
pub use relay::{RelayCommand, RelayDriver, RelayHandle, RelayState, RelayStatus};
pub use sca::{ScaDriver, ScaHandle, ScaParam, ScaState};
pub use scaler::{ScalerDriver, ScalerHandle, ScalerMode, ScalerParam, ScalerState};
pub use timer::{TimerDriver, TimerHandle, TimerMode, TimerParam, TimerState};

// =============================================================================
// Parameters
// =============================================================================

/// Value of a generic class parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Integer vector.
    IntArray(Vec<i64>),
    /// Floating point vector.
    FloatArray(Vec<f64>),
}

impl ParamValue {
    /// Numeric value; integers are widened.
    pub fn as_f64(&self, parameter: &str) -> DeviceResult<f64> {
        match *self {
            ParamValue::Float(v) => Ok(v),
            ParamValue::Int(v) => Ok(v as f64),
            _ => Err(self.wrong_kind(parameter, "a number")),
        }
    }

    /// Integer value.
    pub fn as_i64(&self, parameter: &str) -> DeviceResult<i64> {
        match *self {
            ParamValue::Int(v) => Ok(v),
            _ => Err(self.wrong_kind(parameter, "an integer")),
        }
    }

    /// Flag value; integers are treated as C-style booleans.
    pub fn as_bool(&self, parameter: &str) -> DeviceResult<bool> {
        match *self {
            ParamValue::Bool(v) => Ok(v),
            ParamValue::Int(v) => Ok(v != 0),
            _ => Err(self.wrong_kind(parameter, "a flag")),
        }
    }

    /// Integer vector of exactly `len` elements.
    pub fn as_int_array(&self, parameter: &str, len: usize) -> DeviceResult<&[i64]> {
        match self {
            ParamValue::IntArray(items) if items.len() == len => Ok(items),
            _ => Err(self.wrong_kind(parameter, &format!("{len} integers"))),
        }
    }

    /// Floating point vector of exactly `len` elements.
    pub fn as_float_array(&self, parameter: &str, len: usize) -> DeviceResult<&[f64]> {
        match self {
            ParamValue::FloatArray(items) if items.len() == len => Ok(items),
            _ => Err(self.wrong_kind(parameter, &format!("{len} numbers"))),
        }
    }

    fn wrong_kind(&self, parameter: &str, wanted: &str) -> DeviceError {
        DeviceError::invalid_parameter(parameter, format!("expected {wanted}, got {self:?}"))
    }

    fn to_toml(&self) -> toml::Value {
        match self {
            ParamValue::Bool(v) => toml::Value::Boolean(*v),
            ParamValue::Int(v) => toml::Value::Integer(*v),
            ParamValue::Float(v) => toml::Value::Float(*v),
            ParamValue::Text(v) => toml::Value::String(v.clone()),
            ParamValue::IntArray(items) => {
                toml::Value::Array(items.iter().copied().map(toml::Value::Integer).collect())
            }
            ParamValue::FloatArray(items) => {
                toml::Value::Array(items.iter().copied().map(toml::Value::Float).collect())
            }
        }
    }

    /// Convert into a field value of `data_type`, range-checking integers.
    pub fn to_field_value(&self, field: &str, data_type: DataType) -> Result<FieldValue, FieldError> {
        FieldValue::from_toml(field, &self.to_toml(), data_type)
    }

    /// Parameter view of a field value. Boolean and string arrays have none.
    pub fn from_field_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(v) => Some(ParamValue::Bool(*v)),
            FieldValue::Float(_) | FieldValue::Double(_) => value.as_f64().map(ParamValue::Float),
            FieldValue::String(v) | FieldValue::RecordRef(v) => Some(ParamValue::Text(v.clone())),
            FieldValue::Array(array) => {
                let elements = array.elements();
                if array.element_type().is_integer() {
                    elements
                        .iter()
                        .map(FieldValue::as_i64)
                        .collect::<Option<Vec<_>>>()
                        .map(ParamValue::IntArray)
                } else if matches!(
                    array.element_type(),
                    crate::value::ScalarType::Float | crate::value::ScalarType::Double
                ) {
                    elements
                        .iter()
                        .map(FieldValue::as_f64)
                        .collect::<Option<Vec<_>>>()
                        .map(ParamValue::FloatArray)
                } else {
                    None
                }
            }
            integer => integer
                .as_i64()
                .map(ParamValue::Int)
                .or_else(|| integer.as_f64().map(ParamValue::Float)),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v:?}"),
            ParamValue::IntArray(v) => write!(f, "{v:?}"),
            ParamValue::FloatArray(v) => write!(f, "{v:?}"),
        }
    }
}

/// A class's parameter enum. Every parameter is backed by a class field of
/// the same name, so parameters are reachable by field access too.
pub trait ClassParam: Copy + fmt::Debug + Send + 'static {
    /// Every parameter of the class.
    const ALL: &'static [Self];

    /// Name of the backing field.
    fn field_name(self) -> &'static str;

    /// Declared type of the backing field.
    fn data_type(self) -> DataType;

    /// Parameter backed by `field`.
    fn from_field_name(field: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|param| param.field_name() == field)
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Borrowed view of one record as a member of a class: the record name, the
/// class state and the driver's implementation of the class trait.
pub struct ClassHandle<'a, S, D: ?Sized> {
    pub(crate) record: &'a str,
    pub(crate) state: &'a mut S,
    pub(crate) driver: &'a mut D,
}

impl<S, D: ?Sized> std::fmt::Debug for ClassHandle<'_, S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassHandle")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl<'a, S, D: ?Sized> ClassHandle<'a, S, D> {
    pub(crate) fn new(record: &'a str, state: &'a mut S, driver: &'a mut D) -> Self {
        Self {
            record,
            state,
            driver,
        }
    }

    /// Name of the record.
    pub fn record_name(&self) -> &str {
        self.record
    }

    /// Class state as last updated by the handle.
    pub fn state(&self) -> &S {
        self.state
    }
}

// =============================================================================
// Class state
// =============================================================================

/// Direction of a field access that runs the process hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOp {
    /// Field is about to be read.
    Get,
    /// Field has just been written.
    Put,
}

/// Class-level state of a record, one variant per class.
#[derive(Debug, Clone)]
pub enum ClassState {
    /// Motor state.
    Motor(MotorState),
    /// Scaler state.
    Scaler(ScalerState),
    /// Timer state.
    Timer(TimerState),
    /// Amplifier state.
    Amplifier(AmplifierState),
    /// Relay state.
    Relay(RelayState),
    /// Digital input state.
    DigitalInput(DigitalInputState),
    /// Digital output state.
    DigitalOutput(DigitalOutputState),
    /// Autoscale state.
    Autoscale(AutoscaleState),
    /// Single channel analyzer state.
    Sca(ScaState),
    /// Area detector state.
    AreaDetector(AreaDetectorState),
    /// Network servers keep their state in the driver.
    NetworkServer,
    /// Variables keep their value in fields.
    Variable,
}

impl ClassState {
    /// Initial state of `class`, read from the record's resolved class fields.
    pub fn new(class: RecordClass, fields: &FieldStore) -> Result<Self, FieldError> {
        Ok(match class {
            RecordClass::Motor => ClassState::Motor(MotorState::from_fields(fields)?),
            RecordClass::Scaler => ClassState::Scaler(ScalerState::from_fields(fields)?),
            RecordClass::Timer => ClassState::Timer(TimerState::from_fields(fields)?),
            RecordClass::Amplifier => ClassState::Amplifier(AmplifierState::from_fields(fields)?),
            RecordClass::Relay => ClassState::Relay(RelayState::default()),
            RecordClass::DigitalInput => ClassState::DigitalInput(DigitalInputState::default()),
            RecordClass::DigitalOutput => {
                ClassState::DigitalOutput(DigitalOutputState::from_fields(fields)?)
            }
            RecordClass::Autoscale => ClassState::Autoscale(AutoscaleState::from_fields(fields)?),
            RecordClass::Sca => ClassState::Sca(ScaState::from_fields(fields)?),
            RecordClass::AreaDetector => {
                ClassState::AreaDetector(AreaDetectorState::from_fields(fields)?)
            }
            RecordClass::NetworkServer => ClassState::NetworkServer,
            RecordClass::Variable => ClassState::Variable,
        })
    }

    /// Class this state belongs to.
    pub fn class(&self) -> RecordClass {
        match self {
            ClassState::Motor(_) => RecordClass::Motor,
            ClassState::Scaler(_) => RecordClass::Scaler,
            ClassState::Timer(_) => RecordClass::Timer,
            ClassState::Amplifier(_) => RecordClass::Amplifier,
            ClassState::Relay(_) => RecordClass::Relay,
            ClassState::DigitalInput(_) => RecordClass::DigitalInput,
            ClassState::DigitalOutput(_) => RecordClass::DigitalOutput,
            ClassState::Autoscale(_) => RecordClass::Autoscale,
            ClassState::Sca(_) => RecordClass::Sca,
            ClassState::AreaDetector(_) => RecordClass::AreaDetector,
            ClassState::NetworkServer => RecordClass::NetworkServer,
            ClassState::Variable => RecordClass::Variable,
        }
    }
}

/// Class field table, placed before each driver type's own fields.
pub fn class_fields(class: RecordClass) -> Vec<FieldDescriptor> {
    match class {
        RecordClass::Motor => motor::fields(),
        RecordClass::Scaler => scaler::fields(),
        RecordClass::Timer => timer::fields(),
        RecordClass::Amplifier => amplifier::fields(),
        RecordClass::Relay => relay::fields(),
        RecordClass::DigitalInput => digital::input_fields(),
        RecordClass::DigitalOutput => digital::output_fields(),
        RecordClass::Autoscale => autoscale::fields(),
        RecordClass::Sca => sca::fields(),
        RecordClass::AreaDetector => area_detector::fields(),
        RecordClass::NetworkServer | RecordClass::Variable => Vec::new(),
    }
}

/// Run the class process hook for `field`. Returns false when the class has
/// no hook for this field.
pub(crate) fn process_class_field(
    record: &mut Record,
    field: &str,
    op: ProcessOp,
) -> DeviceResult<bool> {
    match record.class() {
        RecordClass::Motor => motor::process(record, field, op),
        RecordClass::Scaler => scaler::process(record, field, op),
        RecordClass::Timer => timer::process(record, field, op),
        RecordClass::Amplifier => amplifier::process(record, field, op),
        RecordClass::Relay => relay::process(record, field, op),
        RecordClass::DigitalInput => digital::process_input(record, field, op),
        RecordClass::DigitalOutput => digital::process_output(record, field, op),
        RecordClass::Autoscale => autoscale::process(record, field, op),
        RecordClass::Sca => sca::process(record, field, op),
        RecordClass::AreaDetector => area_detector::process(record, field, op),
        RecordClass::NetworkServer | RecordClass::Variable => Ok(false),
    }
}

// =============================================================================
// Process hook helpers
// =============================================================================

/// Store a parameter value into its backing field.
pub(crate) fn store_param(record: &mut Record, field: &str, value: &ParamValue) -> DeviceResult<()> {
    let data_type = record.fields().descriptor(field)?.data_type;
    let field_value = value.to_field_value(field, data_type)?;
    record.fields_mut().set_internal(field, field_value)?;
    Ok(())
}

/// Current value of a parameter's backing field.
pub(crate) fn field_param(record: &Record, field: &str) -> DeviceResult<ParamValue> {
    let value = record.fields().get(field)?;
    ParamValue::from_field_value(value).ok_or_else(|| {
        DeviceError::invalid_parameter(
            field,
            format!("{} values cannot be used as parameters", value.data_type()),
        )
    })
}

/// True when a trigger field (`soft_abort`, `clear`, ...) was written as set.
pub(crate) fn trigger_set(record: &Record, field: &str) -> DeviceResult<bool> {
    Ok(record.fields().get_as::<bool>(field)?)
}
