//! Scaler (counter) class.
//!
//! `read` reports counts with the dark current subtracted:
//! `value = raw - round(dark_current * measurement_time)`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{field_param, store_param, trigger_set, ClassHandle, ClassParam, ParamValue, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::{DataType, ScalarType};

/// Counting mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalerMode {
    /// Count until stopped or gated by a timer.
    #[default]
    Counter,
    /// Count until the preset count is reached.
    Preset,
}

impl ScalerMode {
    /// Field encoding.
    pub fn code(self) -> i64 {
        match self {
            ScalerMode::Counter => 0,
            ScalerMode::Preset => 1,
        }
    }

    /// Inverse of [`ScalerMode::code`].
    pub fn from_code(code: i64) -> DeviceResult<Self> {
        match code {
            0 => Ok(ScalerMode::Counter),
            1 => Ok(ScalerMode::Preset),
            other => Err(DeviceError::invalid_parameter(
                "mode",
                format!("unknown scaler mode {other}"),
            )),
        }
    }
}

/// Scaler class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalerState {
    /// Last raw count.
    pub raw_value: i64,
    /// Last dark-corrected count.
    pub value: i64,
    /// Counter overflowed since the last clear.
    pub overflow_set: bool,
    /// Dark counts per second.
    pub dark_current: f64,
    /// Duration of the last measurement, seconds.
    pub measurement_time: f64,
    /// Counting mode.
    pub mode: ScalerMode,
}

impl ScalerState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        let mode = ScalerMode::from_code(i64::from(fields.get_as::<i32>("mode")?)).map_err(|e| {
            FieldError::InvalidValue {
                field: "mode".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            dark_current: fields.get_as("dark_current")?,
            measurement_time: fields.get_as("measurement_time")?,
            mode,
            ..Self::default()
        })
    }

    /// Counts attributable to dark current over the last measurement.
    pub fn dark_counts(&self) -> i64 {
        (self.dark_current * self.measurement_time).round() as i64
    }
}

/// Generic scaler parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalerParam {
    /// Counting mode code.
    Mode,
    /// Dark counts per second.
    DarkCurrent,
    /// Duration of the last measurement.
    MeasurementTime,
}

impl ClassParam for ScalerParam {
    const ALL: &'static [Self] = &[
        ScalerParam::Mode,
        ScalerParam::DarkCurrent,
        ScalerParam::MeasurementTime,
    ];

    fn field_name(self) -> &'static str {
        match self {
            ScalerParam::Mode => "mode",
            ScalerParam::DarkCurrent => "dark_current",
            ScalerParam::MeasurementTime => "measurement_time",
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ScalerParam::Mode => DataType::Scalar(ScalarType::Int32),
            ScalerParam::DarkCurrent | ScalerParam::MeasurementTime => {
                DataType::Scalar(ScalarType::Double)
            }
        }
    }
}

/// Class-default parameter read.
pub fn default_get_parameter(state: &ScalerState, param: ScalerParam) -> DeviceResult<ParamValue> {
    Ok(match param {
        ScalerParam::Mode => ParamValue::Int(state.mode.code()),
        ScalerParam::DarkCurrent => ParamValue::Float(state.dark_current),
        ScalerParam::MeasurementTime => ParamValue::Float(state.measurement_time),
    })
}

/// Class-default parameter write.
pub fn default_set_parameter(
    state: &mut ScalerState,
    param: ScalerParam,
    value: &ParamValue,
) -> DeviceResult<()> {
    let name = param.field_name();
    match param {
        ScalerParam::Mode => state.mode = ScalerMode::from_code(value.as_i64(name)?)?,
        ScalerParam::DarkCurrent => state.dark_current = value.as_f64(name)?,
        ScalerParam::MeasurementTime => {
            let seconds = value.as_f64(name)?;
            if seconds < 0.0 {
                return Err(DeviceError::invalid_parameter(name, "must not be negative"));
            }
            state.measurement_time = seconds;
        }
    }
    Ok(())
}

/// Operations a scaler driver provides.
pub trait ScalerDriver: Send {
    /// Zero the counter.
    fn clear(&mut self, state: &mut ScalerState) -> DeviceResult<()>;

    /// Raw count.
    fn read(&mut self, state: &mut ScalerState) -> DeviceResult<i64>;

    /// Overflow flag.
    fn overflow_set(&mut self, _state: &mut ScalerState) -> DeviceResult<bool> {
        Ok(false)
    }

    /// True while counting against a preset.
    fn is_busy(&mut self, _state: &mut ScalerState) -> DeviceResult<bool> {
        Ok(false)
    }

    /// Start counting; in preset mode, until `preset` counts.
    fn start(&mut self, _state: &mut ScalerState, _preset: i64) -> DeviceResult<()> {
        Err(DeviceError::not_supported("start"))
    }

    /// Stop counting and return the raw count.
    fn stop(&mut self, _state: &mut ScalerState) -> DeviceResult<i64> {
        Err(DeviceError::not_supported("stop"))
    }

    /// Read a generic parameter.
    fn get_parameter(&mut self, state: &mut ScalerState, param: ScalerParam) -> DeviceResult<ParamValue> {
        default_get_parameter(state, param)
    }

    /// Write a generic parameter.
    fn set_parameter(
        &mut self,
        state: &mut ScalerState,
        param: ScalerParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        default_set_parameter(state, param, value)
    }
}

/// Borrowed scaler view of a record.
pub type ScalerHandle<'a> = ClassHandle<'a, ScalerState, dyn ScalerDriver + 'a>;

impl<'a> ClassHandle<'a, ScalerState, dyn ScalerDriver + 'a> {
    /// Zero the counter.
    pub fn clear(&mut self) -> DeviceResult<()> {
        self.driver.clear(self.state)?;
        self.state.raw_value = 0;
        self.state.value = 0;
        self.state.overflow_set = false;
        Ok(())
    }

    /// Raw count.
    pub fn read_raw(&mut self) -> DeviceResult<i64> {
        let raw = self.driver.read(self.state)?;
        self.state.raw_value = raw;
        Ok(raw)
    }

    /// Dark-corrected count.
    pub fn read(&mut self) -> DeviceResult<i64> {
        let raw = self.read_raw()?;
        self.state.value = raw - self.state.dark_counts();
        debug!(record = self.record, raw, value = self.state.value, "scaler read");
        Ok(self.state.value)
    }

    /// Overflow flag.
    pub fn overflow_set(&mut self) -> DeviceResult<bool> {
        let overflow = self.driver.overflow_set(self.state)?;
        self.state.overflow_set = overflow;
        Ok(overflow)
    }

    /// True while counting against a preset.
    pub fn is_busy(&mut self) -> DeviceResult<bool> {
        self.driver.is_busy(self.state)
    }

    /// Start counting.
    pub fn start(&mut self, preset: i64) -> DeviceResult<()> {
        if preset < 0 {
            return Err(DeviceError::invalid_parameter("start", "preset must not be negative"));
        }
        self.driver.start(self.state, preset)
    }

    /// Stop counting; returns the raw count.
    pub fn stop(&mut self) -> DeviceResult<i64> {
        let raw = self.driver.stop(self.state)?;
        self.state.raw_value = raw;
        Ok(raw)
    }

    /// Read a generic parameter.
    pub fn get_parameter(&mut self, param: ScalerParam) -> DeviceResult<ParamValue> {
        self.driver.get_parameter(self.state, param)
    }

    /// Write a generic parameter.
    pub fn set_parameter(&mut self, param: ScalerParam, value: &ParamValue) -> DeviceResult<()> {
        self.driver.set_parameter(self.state, param, value)
    }
}

/// Scaler class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    use ScalarType::{Bool, Double, Int32, Int64};
    vec![
        FieldDescriptor::scalar("value", Int64).read_only().process().in_summary(),
        FieldDescriptor::scalar("raw_value", Int64).read_only().process(),
        FieldDescriptor::scalar("clear", Bool).process(),
        FieldDescriptor::scalar("overflow_set", Bool).read_only().process(),
        FieldDescriptor::scalar("busy", Bool).read_only().process(),
        FieldDescriptor::scalar("start", Int64).process(),
        FieldDescriptor::scalar("stop", Bool).process(),
        FieldDescriptor::scalar("mode", Int32).process().in_description(),
        FieldDescriptor::scalar("dark_current", Double).process().in_description(),
        FieldDescriptor::scalar("measurement_time", Double).process(),
    ]
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    if let Some(param) = ScalerParam::from_field_name(field) {
        match op {
            ProcessOp::Get => {
                let value = record.scaler()?.get_parameter(param)?;
                store_param(record, field, &value)?;
            }
            ProcessOp::Put => {
                let value = field_param(record, field)?;
                record.scaler()?.set_parameter(param, &value)?;
            }
        }
        return Ok(true);
    }

    match (field, op) {
        ("value", ProcessOp::Get) => {
            let value = record.scaler()?.read()?;
            record.fields_mut().set_internal_as("value", value)?;
        }
        ("raw_value", ProcessOp::Get) => {
            let raw = record.scaler()?.read_raw()?;
            record.fields_mut().set_internal_as("raw_value", raw)?;
        }
        ("clear", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.scaler()?.clear()?;
            }
        }
        ("overflow_set", ProcessOp::Get) => {
            let overflow = record.scaler()?.overflow_set()?;
            record.fields_mut().set_internal_as("overflow_set", overflow)?;
        }
        ("busy", ProcessOp::Get) => {
            let busy = record.scaler()?.is_busy()?;
            record.fields_mut().set_internal_as("busy", busy)?;
        }
        ("start", ProcessOp::Put) => {
            let preset = record.fields().get_as::<i64>("start")?;
            record.scaler()?.start(preset)?;
        }
        ("stop", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                let raw = record.scaler()?.stop()?;
                record.fields_mut().set_internal_as("raw_value", raw)?;
            }
        }
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordClass;
    use crate::testing::{open_record, StubDriver};
    use crate::value::FieldValue;

    #[test]
    fn test_dark_current_subtracted() {
        let driver = StubDriver {
            counts: 1_000,
            ..StubDriver::default()
        };
        let mut record = open_record(RecordClass::Scaler, "dark_current = 10.0", driver);
        let mut scaler = record.scaler().unwrap();
        scaler
            .set_parameter(ScalerParam::MeasurementTime, &ParamValue::Float(2.0))
            .unwrap();
        assert_eq!(scaler.read().unwrap(), 980);
        assert_eq!(scaler.read_raw().unwrap(), 1_000);
    }

    #[test]
    fn test_clear_resets_state() {
        let driver = StubDriver {
            counts: 42,
            ..StubDriver::default()
        };
        let mut record = open_record(RecordClass::Scaler, "", driver);
        record.write_field("clear", FieldValue::Bool(true)).unwrap();
        assert_eq!(record.read_field("value").unwrap(), FieldValue::Int64(0));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut record = open_record(RecordClass::Scaler, "", StubDriver::default());
        let err = record.write_field("mode", FieldValue::Int32(7)).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter { .. }));
        assert_eq!(record.scaler().unwrap().state().mode, ScalerMode::Counter);
    }
}
