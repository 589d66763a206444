//! Single channel analyzer class. Everything is a parameter.

use serde::{Deserialize, Serialize};

use super::{field_param, store_param, ClassHandle, ClassParam, ParamValue, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::{DataType, ScalarType};

/// Single channel analyzer class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaState {
    /// Lower discriminator level.
    pub lower_level: f64,
    /// Upper discriminator level.
    pub upper_level: f64,
    /// Gain.
    pub gain: f64,
    /// Shaping time constant.
    pub time_constant: f64,
    /// Operating mode code.
    pub mode: i64,
}

impl ScaState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        Ok(Self {
            lower_level: fields.get_as("lower_level")?,
            upper_level: fields.get_as("upper_level")?,
            gain: fields.get_as("gain")?,
            time_constant: fields.get_as("time_constant")?,
            mode: i64::from(fields.get_as::<i32>("mode")?),
        })
    }
}

/// Generic single channel analyzer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaParam {
    /// Lower discriminator level.
    LowerLevel,
    /// Upper discriminator level.
    UpperLevel,
    /// Gain.
    Gain,
    /// Shaping time constant.
    TimeConstant,
    /// Operating mode code.
    Mode,
}

impl ClassParam for ScaParam {
    const ALL: &'static [Self] = &[
        ScaParam::LowerLevel,
        ScaParam::UpperLevel,
        ScaParam::Gain,
        ScaParam::TimeConstant,
        ScaParam::Mode,
    ];

    fn field_name(self) -> &'static str {
        match self {
            ScaParam::LowerLevel => "lower_level",
            ScaParam::UpperLevel => "upper_level",
            ScaParam::Gain => "gain",
            ScaParam::TimeConstant => "time_constant",
            ScaParam::Mode => "mode",
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ScaParam::Mode => DataType::Scalar(ScalarType::Int32),
            _ => DataType::Scalar(ScalarType::Double),
        }
    }
}

/// Class-default parameter read.
pub fn default_get_parameter(state: &ScaState, param: ScaParam) -> DeviceResult<ParamValue> {
    Ok(match param {
        ScaParam::LowerLevel => ParamValue::Float(state.lower_level),
        ScaParam::UpperLevel => ParamValue::Float(state.upper_level),
        ScaParam::Gain => ParamValue::Float(state.gain),
        ScaParam::TimeConstant => ParamValue::Float(state.time_constant),
        ScaParam::Mode => ParamValue::Int(state.mode),
    })
}

/// Class-default parameter write. The window must stay ordered.
pub fn default_set_parameter(
    state: &mut ScaState,
    param: ScaParam,
    value: &ParamValue,
) -> DeviceResult<()> {
    let name = param.field_name();
    match param {
        ScaParam::LowerLevel => {
            let level = value.as_f64(name)?;
            if level > state.upper_level && state.upper_level != 0.0 {
                return Err(DeviceError::invalid_parameter(name, "above the upper level"));
            }
            state.lower_level = level;
        }
        ScaParam::UpperLevel => {
            let level = value.as_f64(name)?;
            if level < state.lower_level {
                return Err(DeviceError::invalid_parameter(name, "below the lower level"));
            }
            state.upper_level = level;
        }
        ScaParam::Gain => state.gain = value.as_f64(name)?,
        ScaParam::TimeConstant => state.time_constant = value.as_f64(name)?,
        ScaParam::Mode => state.mode = value.as_i64(name)?,
    }
    Ok(())
}

/// Operations a single channel analyzer driver provides.
pub trait ScaDriver: Send {
    /// Read a parameter.
    fn get_parameter(&mut self, state: &mut ScaState, param: ScaParam) -> DeviceResult<ParamValue> {
        default_get_parameter(state, param)
    }

    /// Write a parameter.
    fn set_parameter(
        &mut self,
        state: &mut ScaState,
        param: ScaParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        default_set_parameter(state, param, value)
    }
}

/// Borrowed single channel analyzer view of a record.
pub type ScaHandle<'a> = ClassHandle<'a, ScaState, dyn ScaDriver + 'a>;

impl<'a> ClassHandle<'a, ScaState, dyn ScaDriver + 'a> {
    /// Read a parameter.
    pub fn get_parameter(&mut self, param: ScaParam) -> DeviceResult<ParamValue> {
        self.driver.get_parameter(self.state, param)
    }

    /// Write a parameter.
    pub fn set_parameter(&mut self, param: ScaParam, value: &ParamValue) -> DeviceResult<()> {
        self.driver.set_parameter(self.state, param, value)
    }
}

/// Single channel analyzer class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    ScaParam::ALL
        .iter()
        .map(|param| {
            FieldDescriptor::scalar(param.field_name(), param.data_type().element())
                .process()
                .in_description()
        })
        .collect()
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    let Some(param) = ScaParam::from_field_name(field) else {
        return Ok(false);
    };
    match op {
        ProcessOp::Get => {
            let value = record.sca()?.get_parameter(param)?;
            store_param(record, field, &value)?;
        }
        ProcessOp::Put => {
            let value = field_param(record, field)?;
            record.sca()?.set_parameter(param, &value)?;
        }
    }
    Ok(true)
}
