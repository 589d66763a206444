//! Autoscale class.
//!
//! An autoscale record watches a monitor value and asks for a change of a
//! control setting when the value leaves the window
//! `[low_limit - low_deadband, high_limit + high_deadband]`. Each control
//! setting has a monitor offset; the current one is selected by the offset
//! index, which must stay below `num_monitor_offsets`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{field_param, store_param, ClassHandle, ClassParam, ParamValue, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{Dimension, FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::{DataType, FieldValue, ScalarType};

/// Direction of a requested control change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeRequest {
    /// Monitor value is inside the window.
    #[default]
    NoChange,
    /// Monitor value too low; step the control up.
    Increase,
    /// Monitor value too high; step the control down.
    Decrease,
}

impl ChangeRequest {
    /// Field encoding.
    pub fn code(self) -> i32 {
        match self {
            ChangeRequest::NoChange => 0,
            ChangeRequest::Increase => 1,
            ChangeRequest::Decrease => -1,
        }
    }

    /// Inverse of [`ChangeRequest::code`].
    pub fn from_code(code: i32) -> DeviceResult<Self> {
        match code {
            0 => Ok(ChangeRequest::NoChange),
            1 => Ok(ChangeRequest::Increase),
            -1 => Ok(ChangeRequest::Decrease),
            other => Err(DeviceError::invalid_parameter(
                "change_request",
                format!("unknown change request {other}"),
            )),
        }
    }
}

/// Autoscale class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoscaleState {
    /// Last monitor value.
    pub monitor_value: f64,
    /// Current offset index, `< num_monitor_offsets`.
    pub offset_index: usize,
    /// Number of control settings.
    pub num_monitor_offsets: usize,
    /// Monitor offset per control setting.
    pub monitor_offsets: Vec<f64>,
    /// Lower edge of the window.
    pub low_limit: f64,
    /// Upper edge of the window.
    pub high_limit: f64,
    /// Extra tolerance below `low_limit`.
    pub low_deadband: f64,
    /// Extra tolerance above `high_limit`.
    pub high_deadband: f64,
    /// Requests are suppressed while disabled.
    pub enabled: bool,
}

impl AutoscaleState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        let count = fields.get_as::<i32>("num_monitor_offsets")?;
        let num_monitor_offsets = usize::try_from(count).map_err(|_| FieldError::InvalidValue {
            field: "num_monitor_offsets".to_string(),
            reason: format!("{count} is not a valid count"),
        })?;
        Ok(Self {
            num_monitor_offsets,
            monitor_offsets: fields.get_array("monitor_offset_array")?,
            low_limit: fields.get_as("low_limit")?,
            high_limit: fields.get_as("high_limit")?,
            low_deadband: fields.get_as("low_deadband")?,
            high_deadband: fields.get_as("high_deadband")?,
            enabled: fields.get_as("enabled")?,
            ..Self::default()
        })
    }

    /// Adopt a new number of control settings, e.g. one learned from a remote
    /// server. Offsets are truncated or zero-extended and the index clamped.
    pub fn set_num_monitor_offsets(&mut self, count: usize) {
        self.num_monitor_offsets = count;
        self.monitor_offsets.resize(count, 0.0);
        if self.offset_index >= count {
            self.offset_index = count.saturating_sub(1);
        }
    }

    /// Monitor offset of the current control setting.
    pub fn current_offset(&self) -> Option<f64> {
        self.monitor_offsets.get(self.offset_index).copied()
    }

    /// Reject offset indices outside `[0, num_monitor_offsets)`.
    pub fn check_offset_index(&self, index: usize) -> DeviceResult<()> {
        if index >= self.num_monitor_offsets {
            return Err(DeviceError::Field(FieldError::IndexOutOfRange {
                field: "monitor_offset_index".to_string(),
                index,
                len: self.num_monitor_offsets,
            }));
        }
        Ok(())
    }
}

/// Class-default change request: compare the monitor value against the
/// deadbanded window.
pub fn default_change_request(state: &AutoscaleState) -> ChangeRequest {
    let value = state.monitor_value;
    if value > state.high_limit + state.high_deadband {
        ChangeRequest::Decrease
    } else if value < state.low_limit - state.low_deadband {
        ChangeRequest::Increase
    } else {
        ChangeRequest::NoChange
    }
}

/// Generic autoscale parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutoscaleParam {
    /// Lower edge of the window.
    LowLimit,
    /// Upper edge of the window.
    HighLimit,
    /// Tolerance below the lower edge.
    LowDeadband,
    /// Tolerance above the upper edge.
    HighDeadband,
    /// Requests enabled.
    Enabled,
}

impl ClassParam for AutoscaleParam {
    const ALL: &'static [Self] = &[
        AutoscaleParam::LowLimit,
        AutoscaleParam::HighLimit,
        AutoscaleParam::LowDeadband,
        AutoscaleParam::HighDeadband,
        AutoscaleParam::Enabled,
    ];

    fn field_name(self) -> &'static str {
        match self {
            AutoscaleParam::LowLimit => "low_limit",
            AutoscaleParam::HighLimit => "high_limit",
            AutoscaleParam::LowDeadband => "low_deadband",
            AutoscaleParam::HighDeadband => "high_deadband",
            AutoscaleParam::Enabled => "enabled",
        }
    }

    fn data_type(self) -> DataType {
        match self {
            AutoscaleParam::Enabled => DataType::Scalar(ScalarType::Bool),
            _ => DataType::Scalar(ScalarType::Double),
        }
    }
}

/// Class-default parameter read.
pub fn default_get_parameter(
    state: &AutoscaleState,
    param: AutoscaleParam,
) -> DeviceResult<ParamValue> {
    Ok(match param {
        AutoscaleParam::LowLimit => ParamValue::Float(state.low_limit),
        AutoscaleParam::HighLimit => ParamValue::Float(state.high_limit),
        AutoscaleParam::LowDeadband => ParamValue::Float(state.low_deadband),
        AutoscaleParam::HighDeadband => ParamValue::Float(state.high_deadband),
        AutoscaleParam::Enabled => ParamValue::Bool(state.enabled),
    })
}

/// Class-default parameter write.
pub fn default_set_parameter(
    state: &mut AutoscaleState,
    param: AutoscaleParam,
    value: &ParamValue,
) -> DeviceResult<()> {
    let name = param.field_name();
    match param {
        AutoscaleParam::LowLimit => state.low_limit = value.as_f64(name)?,
        AutoscaleParam::HighLimit => state.high_limit = value.as_f64(name)?,
        AutoscaleParam::LowDeadband => state.low_deadband = value.as_f64(name)?.abs(),
        AutoscaleParam::HighDeadband => state.high_deadband = value.as_f64(name)?.abs(),
        AutoscaleParam::Enabled => state.enabled = value.as_bool(name)?,
    }
    Ok(())
}

/// Operations an autoscale driver provides.
pub trait AutoscaleDriver: Send {
    /// Read the monitor value.
    fn read_monitor(&mut self, state: &mut AutoscaleState) -> DeviceResult<f64>;

    /// Decide whether the control should change.
    fn get_change_request(&mut self, state: &mut AutoscaleState) -> DeviceResult<ChangeRequest> {
        Ok(default_change_request(state))
    }

    /// Apply a change to the control.
    fn change_control(
        &mut self,
        state: &mut AutoscaleState,
        request: ChangeRequest,
    ) -> DeviceResult<()>;

    /// Current offset index.
    fn get_offset_index(&mut self, state: &mut AutoscaleState) -> DeviceResult<usize> {
        Ok(state.offset_index)
    }

    /// Select a control setting; the index is already bounds-checked.
    fn set_offset_index(&mut self, state: &mut AutoscaleState, index: usize) -> DeviceResult<()> {
        state.offset_index = index;
        Ok(())
    }

    /// Read a generic parameter.
    fn get_parameter(
        &mut self,
        state: &mut AutoscaleState,
        param: AutoscaleParam,
    ) -> DeviceResult<ParamValue> {
        default_get_parameter(state, param)
    }

    /// Write a generic parameter.
    fn set_parameter(
        &mut self,
        state: &mut AutoscaleState,
        param: AutoscaleParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        default_set_parameter(state, param, value)
    }
}

/// Borrowed autoscale view of a record.
pub type AutoscaleHandle<'a> = ClassHandle<'a, AutoscaleState, dyn AutoscaleDriver + 'a>;

impl<'a> ClassHandle<'a, AutoscaleState, dyn AutoscaleDriver + 'a> {
    /// Read the monitor value.
    pub fn read_monitor(&mut self) -> DeviceResult<f64> {
        let value = self.driver.read_monitor(self.state)?;
        self.state.monitor_value = value;
        Ok(value)
    }

    /// Requested control change; always `NoChange` while disabled.
    pub fn get_change_request(&mut self) -> DeviceResult<ChangeRequest> {
        if !self.state.enabled {
            return Ok(ChangeRequest::NoChange);
        }
        self.driver.get_change_request(self.state)
    }

    /// Apply a control change.
    pub fn change_control(&mut self, request: ChangeRequest) -> DeviceResult<()> {
        if request == ChangeRequest::NoChange {
            return Ok(());
        }
        info!(record = self.record, ?request, "autoscale change");
        self.driver.change_control(self.state, request)
    }

    /// Current offset index.
    pub fn get_offset_index(&mut self) -> DeviceResult<usize> {
        let index = self.driver.get_offset_index(self.state)?;
        self.state.offset_index = index;
        Ok(index)
    }

    /// Select a control setting.
    pub fn set_offset_index(&mut self, index: usize) -> DeviceResult<()> {
        self.state.check_offset_index(index)?;
        debug!(record = self.record, index, "set_offset_index");
        self.driver.set_offset_index(self.state, index)?;
        self.state.offset_index = index;
        Ok(())
    }

    /// Read a generic parameter.
    pub fn get_parameter(&mut self, param: AutoscaleParam) -> DeviceResult<ParamValue> {
        self.driver.get_parameter(self.state, param)
    }

    /// Write a generic parameter.
    pub fn set_parameter(&mut self, param: AutoscaleParam, value: &ParamValue) -> DeviceResult<()> {
        self.driver.set_parameter(self.state, param, value)
    }
}

/// Autoscale class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    use ScalarType::{Bool, Double, Int32};
    vec![
        FieldDescriptor::scalar("monitor_value", Double).read_only().process().in_summary(),
        FieldDescriptor::scalar("change_request", Int32).process(),
        FieldDescriptor::scalar("monitor_offset_index", Int32).process().in_summary(),
        FieldDescriptor::scalar("num_monitor_offsets", Int32).read_only().in_description(),
        FieldDescriptor::array(
            "monitor_offset_array",
            Double,
            Dimension::depends_on("num_monitor_offsets"),
        )
        .in_description(),
        FieldDescriptor::scalar("low_limit", Double).process().in_description(),
        FieldDescriptor::scalar("high_limit", Double).process().in_description(),
        FieldDescriptor::scalar("low_deadband", Double).process().in_description(),
        FieldDescriptor::scalar("high_deadband", Double).process().in_description(),
        FieldDescriptor::scalar("enabled", Bool)
            .with_default(FieldValue::Bool(true))
            .process()
            .in_description(),
    ]
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    if let Some(param) = AutoscaleParam::from_field_name(field) {
        match op {
            ProcessOp::Get => {
                let value = record.autoscale()?.get_parameter(param)?;
                store_param(record, field, &value)?;
            }
            ProcessOp::Put => {
                let value = field_param(record, field)?;
                record.autoscale()?.set_parameter(param, &value)?;
            }
        }
        return Ok(true);
    }

    match (field, op) {
        ("monitor_value", ProcessOp::Get) => {
            let value = record.autoscale()?.read_monitor()?;
            record.fields_mut().set_internal_as("monitor_value", value)?;
        }
        ("change_request", ProcessOp::Get) => {
            let request = record.autoscale()?.get_change_request()?;
            record
                .fields_mut()
                .set_internal_as("change_request", request.code())?;
        }
        ("change_request", ProcessOp::Put) => {
            let request =
                ChangeRequest::from_code(record.fields().get_as::<i32>("change_request")?)?;
            record.autoscale()?.change_control(request)?;
        }
        ("monitor_offset_index", ProcessOp::Get) => {
            let index = record.autoscale()?.get_offset_index()?;
            let index = i32::try_from(index)
                .map_err(|_| DeviceError::Protocol(format!("offset index {index} too large")))?;
            record
                .fields_mut()
                .set_internal_as("monitor_offset_index", index)?;
        }
        ("monitor_offset_index", ProcessOp::Put) => {
            let requested = record.fields().get_as::<i32>("monitor_offset_index")?;
            let index = usize::try_from(requested).map_err(|_| {
                DeviceError::invalid_parameter("monitor_offset_index", "must not be negative")
            })?;
            record.autoscale()?.set_offset_index(index)?;
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

    const FOUR_OFFSETS: &str = "num_monitor_offsets = 4\nmonitor_offset_array = [0.0, 1.0, 2.0, 3.0]";

    #[test]
    fn test_offset_index_bounds() {
        let mut record = open_record(RecordClass::Autoscale, FOUR_OFFSETS, StubDriver::default());
        let mut autoscale = record.autoscale().unwrap();
        assert_eq!(
            autoscale.set_offset_index(4),
            Err(DeviceError::Field(FieldError::IndexOutOfRange {
                field: "monitor_offset_index".into(),
                index: 4,
                len: 4,
            }))
        );
        autoscale.set_offset_index(3).unwrap();
        assert_eq!(autoscale.get_offset_index().unwrap(), 3);
        assert_eq!(autoscale.state().current_offset(), Some(3.0));
    }

    #[test]
    fn test_offset_index_through_fields() {
        let mut record = open_record(RecordClass::Autoscale, FOUR_OFFSETS, StubDriver::default());
        assert!(record
            .write_field("monitor_offset_index", FieldValue::Int32(4))
            .is_err());
        assert_eq!(
            record.fields().get("monitor_offset_index").unwrap(),
            &FieldValue::Int32(0)
        );
        record
            .write_field("monitor_offset_index", FieldValue::Int32(2))
            .unwrap();
        assert_eq!(
            record.read_field("monitor_offset_index").unwrap(),
            FieldValue::Int32(2)
        );
    }

    #[test]
    fn test_change_request_window() {
        let mut state = AutoscaleState {
            low_limit: 10.0,
            high_limit: 100.0,
            low_deadband: 1.0,
            high_deadband: 5.0,
            enabled: true,
            ..AutoscaleState::default()
        };
        state.monitor_value = 104.0;
        assert_eq!(default_change_request(&state), ChangeRequest::NoChange);
        state.monitor_value = 106.0;
        assert_eq!(default_change_request(&state), ChangeRequest::Decrease);
        state.monitor_value = 8.5;
        assert_eq!(default_change_request(&state), ChangeRequest::Increase);
    }

    #[test]
    fn test_disabled_autoscale_never_requests() {
        let driver = StubDriver {
            monitor: 1e9,
            ..StubDriver::default()
        };
        let mut record = open_record(
            RecordClass::Autoscale,
            "high_limit = 10.0\nenabled = false",
            driver,
        );
        let mut autoscale = record.autoscale().unwrap();
        autoscale.read_monitor().unwrap();
        assert_eq!(autoscale.get_change_request().unwrap(), ChangeRequest::NoChange);
    }

    #[test]
    fn test_resizing_offsets_clamps_index() {
        let mut state = AutoscaleState {
            num_monitor_offsets: 4,
            monitor_offsets: vec![0.0; 4],
            offset_index: 3,
            ..AutoscaleState::default()
        };
        state.set_num_monitor_offsets(2);
        assert_eq!(state.offset_index, 1);
        assert_eq!(state.monitor_offsets.len(), 2);
    }
}
