//! Amplifier class (current amplifiers, preamplifiers).

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{field_param, store_param, ClassHandle, ClassParam, ParamValue, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{Dimension, FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::{DataType, ScalarType};

/// Amplifier class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmplifierState {
    /// Gain.
    pub gain: f64,
    /// Offset.
    pub offset: f64,
    /// Time constant, seconds.
    pub time_constant: f64,
    /// Accepted gain range; `[0, 0]` accepts any gain.
    pub gain_range: [f64; 2],
}

impl AmplifierState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        let range: Vec<f64> = fields.get_array("gain_range")?;
        let gain_range = match range.as_slice() {
            [low, high] => [*low, *high],
            _ => {
                return Err(FieldError::DimensionMismatch {
                    field: "gain_range".to_string(),
                    expected: 2,
                    actual: range.len(),
                })
            }
        };
        Ok(Self {
            gain: fields.get_as("gain")?,
            offset: fields.get_as("offset")?,
            time_constant: fields.get_as("time_constant")?,
            gain_range,
        })
    }

    /// Reject gains outside the configured range.
    pub fn check_gain(&self, gain: f64) -> DeviceResult<()> {
        let [low, high] = self.gain_range;
        if low < high && !(low..=high).contains(&gain) {
            return Err(DeviceError::LimitExceeded {
                value: gain,
                low,
                high,
            });
        }
        Ok(())
    }
}

/// Generic amplifier parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmplifierParam {
    /// Accepted gain range as `[low, high]`.
    GainRange,
}

impl ClassParam for AmplifierParam {
    const ALL: &'static [Self] = &[AmplifierParam::GainRange];

    fn field_name(self) -> &'static str {
        match self {
            AmplifierParam::GainRange => "gain_range",
        }
    }

    fn data_type(self) -> DataType {
        DataType::Array(ScalarType::Double)
    }
}

/// Class-default parameter read.
pub fn default_get_parameter(
    state: &AmplifierState,
    param: AmplifierParam,
) -> DeviceResult<ParamValue> {
    match param {
        AmplifierParam::GainRange => Ok(ParamValue::FloatArray(state.gain_range.to_vec())),
    }
}

/// Class-default parameter write.
pub fn default_set_parameter(
    state: &mut AmplifierState,
    param: AmplifierParam,
    value: &ParamValue,
) -> DeviceResult<()> {
    match param {
        AmplifierParam::GainRange => {
            let range = value.as_float_array(param.field_name(), 2)?;
            if range[0] > range[1] {
                return Err(DeviceError::invalid_parameter(
                    param.field_name(),
                    "low end above high end",
                ));
            }
            state.gain_range = [range[0], range[1]];
            Ok(())
        }
    }
}

/// Operations an amplifier driver provides.
pub trait AmplifierDriver: Send {
    /// Current gain.
    fn get_gain(&mut self, state: &mut AmplifierState) -> DeviceResult<f64>;

    /// Change gain.
    fn set_gain(&mut self, state: &mut AmplifierState, gain: f64) -> DeviceResult<()>;

    /// Current offset.
    fn get_offset(&mut self, state: &mut AmplifierState) -> DeviceResult<f64> {
        Ok(state.offset)
    }

    /// Change offset.
    fn set_offset(&mut self, _state: &mut AmplifierState, _offset: f64) -> DeviceResult<()> {
        Err(DeviceError::not_supported("set_offset"))
    }

    /// Current time constant.
    fn get_time_constant(&mut self, state: &mut AmplifierState) -> DeviceResult<f64> {
        Ok(state.time_constant)
    }

    /// Change time constant.
    fn set_time_constant(&mut self, _state: &mut AmplifierState, _seconds: f64) -> DeviceResult<()> {
        Err(DeviceError::not_supported("set_time_constant"))
    }

    /// Read a generic parameter.
    fn get_parameter(
        &mut self,
        state: &mut AmplifierState,
        param: AmplifierParam,
    ) -> DeviceResult<ParamValue> {
        default_get_parameter(state, param)
    }

    /// Write a generic parameter.
    fn set_parameter(
        &mut self,
        state: &mut AmplifierState,
        param: AmplifierParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        default_set_parameter(state, param, value)
    }
}

/// Borrowed amplifier view of a record.
pub type AmplifierHandle<'a> = ClassHandle<'a, AmplifierState, dyn AmplifierDriver + 'a>;

impl<'a> ClassHandle<'a, AmplifierState, dyn AmplifierDriver + 'a> {
    /// Current gain.
    pub fn get_gain(&mut self) -> DeviceResult<f64> {
        let gain = self.driver.get_gain(self.state)?;
        self.state.gain = gain;
        Ok(gain)
    }

    /// Change gain, checking the gain range.
    pub fn set_gain(&mut self, gain: f64) -> DeviceResult<()> {
        self.state.check_gain(gain)?;
        debug!(record = self.record, gain, "set_gain");
        self.driver.set_gain(self.state, gain)?;
        self.state.gain = gain;
        Ok(())
    }

    /// Current offset.
    pub fn get_offset(&mut self) -> DeviceResult<f64> {
        let offset = self.driver.get_offset(self.state)?;
        self.state.offset = offset;
        Ok(offset)
    }

    /// Change offset.
    pub fn set_offset(&mut self, offset: f64) -> DeviceResult<()> {
        self.driver.set_offset(self.state, offset)?;
        self.state.offset = offset;
        Ok(())
    }

    /// Current time constant.
    pub fn get_time_constant(&mut self) -> DeviceResult<f64> {
        let seconds = self.driver.get_time_constant(self.state)?;
        self.state.time_constant = seconds;
        Ok(seconds)
    }

    /// Change time constant.
    pub fn set_time_constant(&mut self, seconds: f64) -> DeviceResult<()> {
        if seconds < 0.0 {
            return Err(DeviceError::invalid_parameter(
                "time_constant",
                "must not be negative",
            ));
        }
        self.driver.set_time_constant(self.state, seconds)?;
        self.state.time_constant = seconds;
        Ok(())
    }

    /// Read a generic parameter.
    pub fn get_parameter(&mut self, param: AmplifierParam) -> DeviceResult<ParamValue> {
        self.driver.get_parameter(self.state, param)
    }

    /// Write a generic parameter.
    pub fn set_parameter(&mut self, param: AmplifierParam, value: &ParamValue) -> DeviceResult<()> {
        self.driver.set_parameter(self.state, param, value)
    }
}

/// Amplifier class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    use ScalarType::Double;
    vec![
        FieldDescriptor::scalar("gain", Double).process().in_summary().in_description(),
        FieldDescriptor::scalar("offset", Double).process().in_description(),
        FieldDescriptor::scalar("time_constant", Double).process().in_description(),
        FieldDescriptor::array("gain_range", Double, Dimension::Fixed(2))
            .process()
            .in_description(),
    ]
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    if let Some(param) = AmplifierParam::from_field_name(field) {
        match op {
            ProcessOp::Get => {
                let value = record.amplifier()?.get_parameter(param)?;
                store_param(record, field, &value)?;
            }
            ProcessOp::Put => {
                let value = field_param(record, field)?;
                record.amplifier()?.set_parameter(param, &value)?;
            }
        }
        return Ok(true);
    }

    match (field, op) {
        ("gain", ProcessOp::Get) => {
            let gain = record.amplifier()?.get_gain()?;
            record.fields_mut().set_internal_as("gain", gain)?;
        }
        ("gain", ProcessOp::Put) => {
            let gain = record.fields().get_as::<f64>("gain")?;
            record.amplifier()?.set_gain(gain)?;
        }
        ("offset", ProcessOp::Get) => {
            let offset = record.amplifier()?.get_offset()?;
            record.fields_mut().set_internal_as("offset", offset)?;
        }
        ("offset", ProcessOp::Put) => {
            let offset = record.fields().get_as::<f64>("offset")?;
            record.amplifier()?.set_offset(offset)?;
        }
        ("time_constant", ProcessOp::Get) => {
            let seconds = record.amplifier()?.get_time_constant()?;
            record.fields_mut().set_internal_as("time_constant", seconds)?;
        }
        ("time_constant", ProcessOp::Put) => {
            let seconds = record.fields().get_as::<f64>("time_constant")?;
            record.amplifier()?.set_time_constant(seconds)?;
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
    fn test_gain_range_enforced() {
        let mut record = open_record(
            RecordClass::Amplifier,
            "gain_range = [1e3, 1e9]",
            StubDriver::default(),
        );
        let mut amp = record.amplifier().unwrap();
        amp.set_gain(1e6).unwrap();
        assert_eq!(amp.get_gain().unwrap(), 1e6);
        assert!(matches!(
            amp.set_gain(1e10),
            Err(DeviceError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_gain_range_param_validated() {
        let mut record = open_record(RecordClass::Amplifier, "", StubDriver::default());
        let err = record
            .write_field(
                "gain_range",
                FieldValue::Array(crate::value::ArrayValue::Double(vec![5.0, 1.0])),
            )
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter { .. }));
    }

    #[test]
    fn test_time_constant_through_fields() {
        let mut record = open_record(RecordClass::Amplifier, "", StubDriver::default());
        record
            .write_field("time_constant", FieldValue::Double(0.3))
            .unwrap();
        assert_eq!(
            record.read_field("time_constant").unwrap(),
            FieldValue::Double(0.3)
        );
    }
}
