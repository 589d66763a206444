//! Area detector class.
//!
//! Frame geometry is kept as `[width, height]` pairs. The binned frame size
//! must divide evenly, which the class checks before a driver sees a new
//! frame size or bin size.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{field_param, store_param, trigger_set, ClassHandle, ClassParam, ParamValue, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{Dimension, FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::{DataType, FieldValue, ScalarType};

/// Area detector status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AreaDetectorStatus(u32);

impl AreaDetectorStatus {
    /// Acquisition in progress.
    pub const BUSY: u32 = 0x0001;
    /// Armed and waiting for a trigger.
    pub const ARMED: u32 = 0x0002;
    /// Detector reported an error.
    pub const ERROR: u32 = 0x8000;

    /// Status from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Acquisition in progress.
    pub fn is_busy(self) -> bool {
        self.0 & Self::BUSY != 0
    }
}

/// Area detector class state.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaDetectorState {
    /// Unbinned frame size.
    pub framesize: [i64; 2],
    /// Bin size.
    pub binsize: [i64; 2],
    /// Exposure per frame, seconds.
    pub exposure_time: f64,
    /// Trigger mode code.
    pub trigger_mode: i64,
    /// Number of the last completed frame; -1 before the first.
    pub last_frame_number: i64,
    /// Frames since the detector was opened.
    pub total_num_frames: i64,
    /// Last status read.
    pub status: AreaDetectorStatus,
}

impl Default for AreaDetectorState {
    fn default() -> Self {
        Self {
            framesize: [0, 0],
            binsize: [1, 1],
            exposure_time: 0.0,
            trigger_mode: 0,
            last_frame_number: -1,
            total_num_frames: 0,
            status: AreaDetectorStatus::default(),
        }
    }
}

fn pair(fields: &FieldStore, name: &str) -> Result<[i64; 2], FieldError> {
    let items: Vec<i64> = fields.get_array(name)?;
    match items.as_slice() {
        [a, b] => Ok([*a, *b]),
        _ => Err(FieldError::DimensionMismatch {
            field: name.to_string(),
            expected: 2,
            actual: items.len(),
        }),
    }
}

impl AreaDetectorState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        Ok(Self {
            framesize: pair(fields, "framesize")?,
            binsize: pair(fields, "binsize")?,
            exposure_time: fields.get_as("exposure_time")?,
            trigger_mode: i64::from(fields.get_as::<i32>("trigger_mode")?),
            ..Self::default()
        })
    }

    /// Binned frame size.
    pub fn binned_framesize(&self) -> [i64; 2] {
        [
            self.framesize[0] / self.binsize[0].max(1),
            self.framesize[1] / self.binsize[1].max(1),
        ]
    }

    /// Check that `framesize` divides evenly by `binsize`.
    pub fn check_geometry(framesize: [i64; 2], binsize: [i64; 2]) -> DeviceResult<()> {
        if binsize.iter().any(|&b| b < 1) {
            return Err(DeviceError::invalid_parameter("binsize", "bins must be at least 1"));
        }
        if framesize.iter().any(|&f| f < 0) {
            return Err(DeviceError::invalid_parameter("framesize", "must not be negative"));
        }
        if framesize[0] % binsize[0] != 0 || framesize[1] % binsize[1] != 0 {
            return Err(DeviceError::invalid_parameter(
                "binsize",
                format!("{binsize:?} does not divide frame {framesize:?}"),
            ));
        }
        Ok(())
    }
}

/// Generic area detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AreaDetectorParam {
    /// Unbinned frame size `[width, height]`.
    Framesize,
    /// Bin size `[x, y]`.
    Binsize,
    /// Exposure per frame.
    ExposureTime,
    /// Trigger mode code.
    TriggerMode,
}

impl ClassParam for AreaDetectorParam {
    const ALL: &'static [Self] = &[
        AreaDetectorParam::Framesize,
        AreaDetectorParam::Binsize,
        AreaDetectorParam::ExposureTime,
        AreaDetectorParam::TriggerMode,
    ];

    fn field_name(self) -> &'static str {
        match self {
            AreaDetectorParam::Framesize => "framesize",
            AreaDetectorParam::Binsize => "binsize",
            AreaDetectorParam::ExposureTime => "exposure_time",
            AreaDetectorParam::TriggerMode => "trigger_mode",
        }
    }

    fn data_type(self) -> DataType {
        match self {
            AreaDetectorParam::Framesize | AreaDetectorParam::Binsize => {
                DataType::Array(ScalarType::Int64)
            }
            AreaDetectorParam::ExposureTime => DataType::Scalar(ScalarType::Double),
            AreaDetectorParam::TriggerMode => DataType::Scalar(ScalarType::Int32),
        }
    }
}

/// Class-default parameter read.
pub fn default_get_parameter(
    state: &AreaDetectorState,
    param: AreaDetectorParam,
) -> DeviceResult<ParamValue> {
    Ok(match param {
        AreaDetectorParam::Framesize => ParamValue::IntArray(state.framesize.to_vec()),
        AreaDetectorParam::Binsize => ParamValue::IntArray(state.binsize.to_vec()),
        AreaDetectorParam::ExposureTime => ParamValue::Float(state.exposure_time),
        AreaDetectorParam::TriggerMode => ParamValue::Int(state.trigger_mode),
    })
}

/// Class-default parameter write.
pub fn default_set_parameter(
    state: &mut AreaDetectorState,
    param: AreaDetectorParam,
    value: &ParamValue,
) -> DeviceResult<()> {
    let name = param.field_name();
    match param {
        AreaDetectorParam::Framesize => {
            let items = value.as_int_array(name, 2)?;
            state.framesize = [items[0], items[1]];
        }
        AreaDetectorParam::Binsize => {
            let items = value.as_int_array(name, 2)?;
            state.binsize = [items[0], items[1]];
        }
        AreaDetectorParam::ExposureTime => {
            let seconds = value.as_f64(name)?;
            if seconds < 0.0 {
                return Err(DeviceError::invalid_parameter(name, "must not be negative"));
            }
            state.exposure_time = seconds;
        }
        AreaDetectorParam::TriggerMode => state.trigger_mode = value.as_i64(name)?,
    }
    Ok(())
}

/// Operations an area detector driver provides.
pub trait AreaDetectorDriver: Send {
    /// Prepare for a triggered sequence.
    fn arm(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()>;

    /// Software trigger.
    fn trigger(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()>;

    /// Stop after the current frame.
    fn stop(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()>;

    /// Stop immediately, discarding the current frame. Defaults to `stop`.
    fn abort(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.stop(state)
    }

    /// Status bits.
    fn get_status(&mut self, state: &mut AreaDetectorState) -> DeviceResult<AreaDetectorStatus>;

    /// Number of the last completed frame.
    fn get_last_frame_number(&mut self, state: &mut AreaDetectorState) -> DeviceResult<i64> {
        Ok(state.last_frame_number)
    }

    /// Frames since open.
    fn get_total_num_frames(&mut self, state: &mut AreaDetectorState) -> DeviceResult<i64> {
        Ok(state.total_num_frames)
    }

    /// Read a generic parameter.
    fn get_parameter(
        &mut self,
        state: &mut AreaDetectorState,
        param: AreaDetectorParam,
    ) -> DeviceResult<ParamValue> {
        default_get_parameter(state, param)
    }

    /// Write a generic parameter.
    fn set_parameter(
        &mut self,
        state: &mut AreaDetectorState,
        param: AreaDetectorParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        default_set_parameter(state, param, value)
    }
}

/// Borrowed area detector view of a record.
pub type AreaDetectorHandle<'a> =
    ClassHandle<'a, AreaDetectorState, dyn AreaDetectorDriver + 'a>;

impl<'a> ClassHandle<'a, AreaDetectorState, dyn AreaDetectorDriver + 'a> {
    /// Prepare for a triggered sequence.
    pub fn arm(&mut self) -> DeviceResult<()> {
        info!(record = self.record, "arm");
        self.driver.arm(self.state)
    }

    /// Software trigger.
    pub fn trigger(&mut self) -> DeviceResult<()> {
        debug!(record = self.record, "trigger");
        self.driver.trigger(self.state)
    }

    /// Stop after the current frame.
    pub fn stop(&mut self) -> DeviceResult<()> {
        self.driver.stop(self.state)
    }

    /// Stop immediately.
    pub fn abort(&mut self) -> DeviceResult<()> {
        info!(record = self.record, "abort");
        self.driver.abort(self.state)
    }

    /// Status bits.
    pub fn get_status(&mut self) -> DeviceResult<AreaDetectorStatus> {
        let status = self.driver.get_status(self.state)?;
        self.state.status = status;
        Ok(status)
    }

    /// Number of the last completed frame.
    pub fn get_last_frame_number(&mut self) -> DeviceResult<i64> {
        let frame = self.driver.get_last_frame_number(self.state)?;
        self.state.last_frame_number = frame;
        Ok(frame)
    }

    /// Frames since open.
    pub fn get_total_num_frames(&mut self) -> DeviceResult<i64> {
        let total = self.driver.get_total_num_frames(self.state)?;
        self.state.total_num_frames = total;
        Ok(total)
    }

    /// Read a generic parameter.
    pub fn get_parameter(&mut self, param: AreaDetectorParam) -> DeviceResult<ParamValue> {
        self.driver.get_parameter(self.state, param)
    }

    /// Write a generic parameter; geometry changes must keep the frame
    /// evenly binned.
    pub fn set_parameter(
        &mut self,
        param: AreaDetectorParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        match param {
            AreaDetectorParam::Framesize => {
                let items = value.as_int_array(param.field_name(), 2)?;
                AreaDetectorState::check_geometry([items[0], items[1]], self.state.binsize)?;
            }
            AreaDetectorParam::Binsize => {
                let items = value.as_int_array(param.field_name(), 2)?;
                AreaDetectorState::check_geometry(self.state.framesize, [items[0], items[1]])?;
            }
            _ => {}
        }
        self.driver.set_parameter(self.state, param, value)
    }
}

/// Area detector class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    use ScalarType::{Bool, Double, Int32, Int64, UInt32};
    vec![
        FieldDescriptor::scalar("arm", Bool).process(),
        FieldDescriptor::scalar("trigger", Bool).process(),
        FieldDescriptor::scalar("stop", Bool).process(),
        FieldDescriptor::scalar("abort", Bool).process(),
        FieldDescriptor::scalar("status", UInt32).read_only().process().in_summary(),
        FieldDescriptor::scalar("last_frame_number", Int64)
            .with_default(FieldValue::Int64(-1))
            .read_only()
            .process(),
        FieldDescriptor::scalar("total_num_frames", Int64).read_only().process(),
        FieldDescriptor::array("framesize", Int64, Dimension::Fixed(2))
            .process()
            .in_description(),
        FieldDescriptor::array("binsize", Int64, Dimension::Fixed(2))
            .with_default(FieldValue::Int64(1))
            .process()
            .in_description(),
        FieldDescriptor::scalar("exposure_time", Double).process().in_description(),
        FieldDescriptor::scalar("trigger_mode", Int32).process().in_description(),
    ]
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    if let Some(param) = AreaDetectorParam::from_field_name(field) {
        match op {
            ProcessOp::Get => {
                let value = record.area_detector()?.get_parameter(param)?;
                store_param(record, field, &value)?;
            }
            ProcessOp::Put => {
                let value = field_param(record, field)?;
                record.area_detector()?.set_parameter(param, &value)?;
            }
        }
        return Ok(true);
    }

    match (field, op) {
        ("arm", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.area_detector()?.arm()?;
            }
        }
        ("trigger", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.area_detector()?.trigger()?;
            }
        }
        ("stop", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.area_detector()?.stop()?;
            }
        }
        ("abort", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.area_detector()?.abort()?;
            }
        }
        ("status", ProcessOp::Get) => {
            let status = record.area_detector()?.get_status()?;
            record.fields_mut().set_internal_as("status", status.bits())?;
        }
        ("last_frame_number", ProcessOp::Get) => {
            let frame = record.area_detector()?.get_last_frame_number()?;
            record.fields_mut().set_internal_as("last_frame_number", frame)?;
        }
        ("total_num_frames", ProcessOp::Get) => {
            let total = record.area_detector()?.get_total_num_frames()?;
            record.fields_mut().set_internal_as("total_num_frames", total)?;
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
    use crate::value::ArrayValue;

    #[test]
    fn test_binsize_must_divide_frame() {
        let mut record = open_record(
            RecordClass::AreaDetector,
            "framesize = [1024, 1024]",
            StubDriver::default(),
        );
        let mut detector = record.area_detector().unwrap();
        assert!(detector
            .set_parameter(AreaDetectorParam::Binsize, &ParamValue::IntArray(vec![3, 3]))
            .is_err());
        detector
            .set_parameter(AreaDetectorParam::Binsize, &ParamValue::IntArray(vec![2, 4]))
            .unwrap();
        assert_eq!(detector.state().binned_framesize(), [512, 256]);
    }

    #[test]
    fn test_trigger_counts_frames() {
        let mut record = open_record(RecordClass::AreaDetector, "", StubDriver::default());
        record.write_field("arm", FieldValue::Bool(true)).unwrap();
        record.write_field("trigger", FieldValue::Bool(true)).unwrap();
        assert_eq!(
            record.read_field("last_frame_number").unwrap(),
            FieldValue::Int64(0)
        );
        assert_eq!(
            record.read_field("total_num_frames").unwrap(),
            FieldValue::Int64(1)
        );
    }

    #[test]
    fn test_framesize_through_fields() {
        let mut record = open_record(RecordClass::AreaDetector, "", StubDriver::default());
        record
            .write_field("framesize", FieldValue::Array(ArrayValue::Int64(vec![640, 480])))
            .unwrap();
        assert_eq!(record.area_detector().unwrap().state().framesize, [640, 480]);
    }
}
