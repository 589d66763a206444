//! Timer class: gates scalers for a preset time.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{field_param, store_param, trigger_set, ClassHandle, ClassParam, ParamValue, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::{DataType, ScalarType};

/// Timer mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerMode {
    /// Count for a preset time.
    #[default]
    Preset,
    /// Run until a scaler preset stops it.
    Counter,
}

impl TimerMode {
    /// Field encoding.
    pub fn code(self) -> i32 {
        match self {
            TimerMode::Preset => 0,
            TimerMode::Counter => 1,
        }
    }

    /// Inverse of [`TimerMode::code`].
    pub fn from_code(code: i32) -> DeviceResult<Self> {
        match code {
            0 => Ok(TimerMode::Preset),
            1 => Ok(TimerMode::Counter),
            other => Err(DeviceError::invalid_parameter(
                "mode",
                format!("unknown timer mode {other}"),
            )),
        }
    }
}

/// Timer class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerState {
    /// Current mode.
    pub mode: TimerMode,
    /// Last known busy flag.
    pub busy: bool,
    /// Preset time of the current or last run, seconds.
    pub preset: f64,
    /// Duration of the last completed run, seconds.
    pub last_measurement_time: f64,
}

impl TimerState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        let mode = TimerMode::from_code(fields.get_as::<i32>("mode")?).map_err(|e| {
            FieldError::InvalidValue {
                field: "mode".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            mode,
            preset: fields.get_as("preset")?,
            ..Self::default()
        })
    }
}

/// Generic timer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerParam {
    /// Preset time used by `start` when no time is given.
    Preset,
    /// Duration of the last completed run.
    LastMeasurementTime,
}

impl ClassParam for TimerParam {
    const ALL: &'static [Self] = &[TimerParam::Preset, TimerParam::LastMeasurementTime];

    fn field_name(self) -> &'static str {
        match self {
            TimerParam::Preset => "preset",
            TimerParam::LastMeasurementTime => "last_measurement_time",
        }
    }

    fn data_type(self) -> DataType {
        DataType::Scalar(ScalarType::Double)
    }
}

/// Class-default parameter read.
pub fn default_get_parameter(state: &TimerState, param: TimerParam) -> DeviceResult<ParamValue> {
    Ok(ParamValue::Float(match param {
        TimerParam::Preset => state.preset,
        TimerParam::LastMeasurementTime => state.last_measurement_time,
    }))
}

/// Class-default parameter write.
pub fn default_set_parameter(
    state: &mut TimerState,
    param: TimerParam,
    value: &ParamValue,
) -> DeviceResult<()> {
    let name = param.field_name();
    match param {
        TimerParam::Preset => {
            let seconds = value.as_f64(name)?;
            if seconds < 0.0 {
                return Err(DeviceError::invalid_parameter(name, "must not be negative"));
            }
            state.preset = seconds;
            Ok(())
        }
        TimerParam::LastMeasurementTime => Err(DeviceError::invalid_parameter(name, "read-only")),
    }
}

/// Operations a timer driver provides. Times are in seconds.
pub trait TimerDriver: Send {
    /// Start a run of `seconds`.
    fn start(&mut self, state: &mut TimerState, seconds: f64) -> DeviceResult<()>;

    /// Stop the run; returns the elapsed time.
    fn stop(&mut self, state: &mut TimerState) -> DeviceResult<f64>;

    /// Reset the elapsed time.
    fn clear(&mut self, _state: &mut TimerState) -> DeviceResult<()> {
        Err(DeviceError::not_supported("clear"))
    }

    /// Elapsed time of the current or last run.
    fn read(&mut self, state: &mut TimerState) -> DeviceResult<f64>;

    /// True while running.
    fn is_busy(&mut self, state: &mut TimerState) -> DeviceResult<bool>;

    /// Current mode.
    fn get_mode(&mut self, state: &mut TimerState) -> DeviceResult<TimerMode> {
        Ok(state.mode)
    }

    /// Change mode.
    fn set_mode(&mut self, state: &mut TimerState, mode: TimerMode) -> DeviceResult<()> {
        state.mode = mode;
        Ok(())
    }

    /// Read a generic parameter.
    fn get_parameter(&mut self, state: &mut TimerState, param: TimerParam) -> DeviceResult<ParamValue> {
        default_get_parameter(state, param)
    }

    /// Write a generic parameter.
    fn set_parameter(
        &mut self,
        state: &mut TimerState,
        param: TimerParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        default_set_parameter(state, param, value)
    }
}

/// Borrowed timer view of a record.
pub type TimerHandle<'a> = ClassHandle<'a, TimerState, dyn TimerDriver + 'a>;

impl<'a> ClassHandle<'a, TimerState, dyn TimerDriver + 'a> {
    /// Start a run of `seconds`.
    pub fn start(&mut self, seconds: f64) -> DeviceResult<()> {
        if seconds < 0.0 {
            return Err(DeviceError::invalid_parameter("start", "time must not be negative"));
        }
        debug!(record = self.record, seconds, "timer start");
        self.driver.start(self.state, seconds)?;
        self.state.preset = seconds;
        self.state.busy = true;
        Ok(())
    }

    /// Stop the run; returns the elapsed time.
    pub fn stop(&mut self) -> DeviceResult<f64> {
        let elapsed = self.driver.stop(self.state)?;
        self.state.busy = false;
        self.state.last_measurement_time = elapsed;
        Ok(elapsed)
    }

    /// Reset the elapsed time.
    pub fn clear(&mut self) -> DeviceResult<()> {
        self.driver.clear(self.state)
    }

    /// Elapsed time.
    pub fn read(&mut self) -> DeviceResult<f64> {
        self.driver.read(self.state)
    }

    /// True while running. A run that just finished records its duration.
    pub fn is_busy(&mut self) -> DeviceResult<bool> {
        let busy = self.driver.is_busy(self.state)?;
        if self.state.busy && !busy {
            self.state.last_measurement_time = self.state.preset;
        }
        self.state.busy = busy;
        Ok(busy)
    }

    /// Current mode.
    pub fn get_mode(&mut self) -> DeviceResult<TimerMode> {
        let mode = self.driver.get_mode(self.state)?;
        self.state.mode = mode;
        Ok(mode)
    }

    /// Change mode.
    pub fn set_mode(&mut self, mode: TimerMode) -> DeviceResult<()> {
        self.driver.set_mode(self.state, mode)?;
        self.state.mode = mode;
        Ok(())
    }

    /// Read a generic parameter.
    pub fn get_parameter(&mut self, param: TimerParam) -> DeviceResult<ParamValue> {
        self.driver.get_parameter(self.state, param)
    }

    /// Write a generic parameter.
    pub fn set_parameter(&mut self, param: TimerParam, value: &ParamValue) -> DeviceResult<()> {
        self.driver.set_parameter(self.state, param, value)
    }
}

/// Timer class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    use ScalarType::{Bool, Double, Int32};
    vec![
        FieldDescriptor::scalar("value", Double).read_only().process().in_summary(),
        FieldDescriptor::scalar("start", Double).process(),
        FieldDescriptor::scalar("stop", Bool).process(),
        FieldDescriptor::scalar("clear", Bool).process(),
        FieldDescriptor::scalar("busy", Bool).read_only().process(),
        FieldDescriptor::scalar("mode", Int32).process().in_description(),
        FieldDescriptor::scalar("preset", Double).process().in_description(),
        FieldDescriptor::scalar("last_measurement_time", Double).read_only().process(),
    ]
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    if let Some(param) = TimerParam::from_field_name(field) {
        match op {
            ProcessOp::Get => {
                let value = record.timer()?.get_parameter(param)?;
                store_param(record, field, &value)?;
            }
            ProcessOp::Put => {
                let value = field_param(record, field)?;
                record.timer()?.set_parameter(param, &value)?;
            }
        }
        return Ok(true);
    }

    match (field, op) {
        ("value", ProcessOp::Get) => {
            let elapsed = record.timer()?.read()?;
            record.fields_mut().set_internal_as("value", elapsed)?;
        }
        ("start", ProcessOp::Put) => {
            let seconds = record.fields().get_as::<f64>("start")?;
            record.timer()?.start(seconds)?;
        }
        ("stop", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                let elapsed = record.timer()?.stop()?;
                record.fields_mut().set_internal_as("value", elapsed)?;
            }
        }
        ("clear", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.timer()?.clear()?;
            }
        }
        ("busy", ProcessOp::Get) => {
            let busy = record.timer()?.is_busy()?;
            record.fields_mut().set_internal_as("busy", busy)?;
        }
        ("mode", ProcessOp::Get) => {
            let mode = record.timer()?.get_mode()?;
            record.fields_mut().set_internal_as("mode", mode.code())?;
        }
        ("mode", ProcessOp::Put) => {
            let mode = TimerMode::from_code(record.fields().get_as::<i32>("mode")?)?;
            record.timer()?.set_mode(mode)?;
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
    fn test_run_records_measurement_time() {
        let mut record = open_record(RecordClass::Timer, "", StubDriver::default());
        let mut timer = record.timer().unwrap();
        timer.start(1.5).unwrap();
        assert!(timer.is_busy().unwrap());
        assert_eq!(timer.stop().unwrap(), 1.5);
        assert_eq!(timer.state().last_measurement_time, 1.5);
        assert!(!timer.is_busy().unwrap());
    }

    #[test]
    fn test_mode_through_fields() {
        let mut record = open_record(RecordClass::Timer, "", StubDriver::default());
        record.write_field("mode", FieldValue::Int32(1)).unwrap();
        assert_eq!(record.timer().unwrap().get_mode().unwrap(), TimerMode::Counter);
        assert!(record.write_field("mode", FieldValue::Int32(9)).is_err());
    }

    #[test]
    fn test_negative_start_rejected() {
        let mut record = open_record(RecordClass::Timer, "", StubDriver::default());
        assert!(matches!(
            record.timer().unwrap().start(-1.0),
            Err(DeviceError::InvalidParameter { .. })
        ));
    }
}
