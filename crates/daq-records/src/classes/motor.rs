//! Motor class.
//!
//! Positions cross the handle in user units; drivers see raw units.
//! `user = raw * scale + offset`. Software limits are checked in user units
//! before a move reaches the driver, and are disabled while
//! `negative_limit >= positive_limit`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{field_param, store_param, trigger_set, ClassHandle, ClassParam, ParamValue, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::{DataType, FieldValue, ScalarType};

// =============================================================================
// Status
// =============================================================================

/// Motor status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MotorStatus(u32);

impl MotorStatus {
    /// Motion in progress.
    pub const BUSY: u32 = 0x0001;
    /// Positive hardware limit switch active.
    pub const POSITIVE_LIMIT_HIT: u32 = 0x0002;
    /// Negative hardware limit switch active.
    pub const NEGATIVE_LIMIT_HIT: u32 = 0x0004;
    /// Last home search completed.
    pub const HOME_SEARCH_SUCCEEDED: u32 = 0x0008;
    /// Following error reported by the controller.
    pub const FOLLOWING_ERROR: u32 = 0x0010;
    /// Amplifier or drive fault.
    pub const DRIVE_FAULT: u32 = 0x0020;
    /// Axis disabled.
    pub const AXIS_DISABLED: u32 = 0x0040;

    const LIMIT_HIT: u32 = Self::POSITIVE_LIMIT_HIT | Self::NEGATIVE_LIMIT_HIT;

    /// Status from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if any of `mask` is set.
    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    /// Status with `mask` set or cleared.
    pub fn with(self, mask: u32, set: bool) -> Self {
        if set {
            Self(self.0 | mask)
        } else {
            Self(self.0 & !mask)
        }
    }

    /// Motion in progress.
    pub fn is_busy(self) -> bool {
        self.contains(Self::BUSY)
    }

    /// Either hardware limit active.
    pub fn limit_hit(self) -> bool {
        self.contains(Self::LIMIT_HIT)
    }

    /// A motor sitting on a limit switch is not moving; limit bits win over
    /// `BUSY`.
    pub fn normalized(self) -> Self {
        if self.limit_hit() {
            self.with(Self::BUSY, false)
        } else {
            self
        }
    }
}

// =============================================================================
// State and parameters
// =============================================================================

/// Motor class state.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorState {
    /// Last read position, user units.
    pub position: f64,
    /// Last read position, raw units.
    pub raw_position: f64,
    /// Last commanded destination, user units.
    pub destination: f64,
    /// Last read status.
    pub status: MotorStatus,
    /// Raw to user scale factor.
    pub scale: f64,
    /// Raw to user offset.
    pub offset: f64,
    /// Upper software limit, user units.
    pub positive_limit: f64,
    /// Lower software limit, user units.
    pub negative_limit: f64,
    /// Slew speed.
    pub speed: f64,
    /// Start speed.
    pub base_speed: f64,
    /// Highest accepted speed; 0 means unbounded.
    pub maximum_speed: f64,
    /// Acceleration.
    pub acceleration: f64,
}

impl Default for MotorState {
    fn default() -> Self {
        Self {
            position: 0.0,
            raw_position: 0.0,
            destination: 0.0,
            status: MotorStatus::default(),
            scale: 1.0,
            offset: 0.0,
            positive_limit: 0.0,
            negative_limit: 0.0,
            speed: 0.0,
            base_speed: 0.0,
            maximum_speed: 0.0,
            acceleration: 0.0,
        }
    }
}

impl MotorState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        let scale = fields.get_as::<f64>("scale")?;
        if scale == 0.0 {
            return Err(FieldError::InvalidValue {
                field: "scale".to_string(),
                reason: "scale must be non-zero".to_string(),
            });
        }
        Ok(Self {
            scale,
            offset: fields.get_as("offset")?,
            positive_limit: fields.get_as("positive_limit")?,
            negative_limit: fields.get_as("negative_limit")?,
            speed: fields.get_as("speed")?,
            base_speed: fields.get_as("base_speed")?,
            maximum_speed: fields.get_as("maximum_speed")?,
            acceleration: fields.get_as("acceleration")?,
            ..Self::default()
        })
    }

    /// Convert user units to raw units.
    pub fn user_to_raw(&self, user: f64) -> DeviceResult<f64> {
        if self.scale == 0.0 {
            return Err(DeviceError::invalid_parameter("scale", "scale must be non-zero"));
        }
        Ok((user - self.offset) / self.scale)
    }

    /// Convert raw units to user units.
    pub fn raw_to_user(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }

    /// True while software limits are in force.
    pub fn limits_enabled(&self) -> bool {
        self.negative_limit < self.positive_limit
    }

    /// Reject user positions outside the software limits.
    pub fn check_limits(&self, user: f64) -> DeviceResult<()> {
        if self.limits_enabled() && !(self.negative_limit..=self.positive_limit).contains(&user) {
            return Err(DeviceError::LimitExceeded {
                value: user,
                low: self.negative_limit,
                high: self.positive_limit,
            });
        }
        Ok(())
    }
}

/// Generic motor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorParam {
    /// Slew speed.
    Speed,
    /// Start speed.
    BaseSpeed,
    /// Highest accepted speed.
    MaximumSpeed,
    /// Acceleration.
    Acceleration,
    /// Upper software limit.
    PositiveLimit,
    /// Lower software limit.
    NegativeLimit,
}

impl ClassParam for MotorParam {
    const ALL: &'static [Self] = &[
        MotorParam::Speed,
        MotorParam::BaseSpeed,
        MotorParam::MaximumSpeed,
        MotorParam::Acceleration,
        MotorParam::PositiveLimit,
        MotorParam::NegativeLimit,
    ];

    fn field_name(self) -> &'static str {
        match self {
            MotorParam::Speed => "speed",
            MotorParam::BaseSpeed => "base_speed",
            MotorParam::MaximumSpeed => "maximum_speed",
            MotorParam::Acceleration => "acceleration",
            MotorParam::PositiveLimit => "positive_limit",
            MotorParam::NegativeLimit => "negative_limit",
        }
    }

    fn data_type(self) -> DataType {
        DataType::Scalar(ScalarType::Double)
    }
}

/// Class-default parameter read: reports the bookkept state.
pub fn default_get_parameter(state: &MotorState, param: MotorParam) -> DeviceResult<ParamValue> {
    let value = match param {
        MotorParam::Speed => state.speed,
        MotorParam::BaseSpeed => state.base_speed,
        MotorParam::MaximumSpeed => state.maximum_speed,
        MotorParam::Acceleration => state.acceleration,
        MotorParam::PositiveLimit => state.positive_limit,
        MotorParam::NegativeLimit => state.negative_limit,
    };
    Ok(ParamValue::Float(value))
}

/// Class-default parameter write: validates and bookkeeps in the state.
pub fn default_set_parameter(
    state: &mut MotorState,
    param: MotorParam,
    value: &ParamValue,
) -> DeviceResult<()> {
    let name = param.field_name();
    let v = value.as_f64(name)?;
    let non_negative = |v: f64| {
        if v < 0.0 {
            Err(DeviceError::invalid_parameter(name, "must not be negative"))
        } else {
            Ok(v)
        }
    };
    match param {
        MotorParam::Speed => {
            let v = non_negative(v)?;
            if state.maximum_speed > 0.0 && v > state.maximum_speed {
                return Err(DeviceError::LimitExceeded {
                    value: v,
                    low: 0.0,
                    high: state.maximum_speed,
                });
            }
            state.speed = v;
        }
        MotorParam::BaseSpeed => state.base_speed = non_negative(v)?,
        MotorParam::MaximumSpeed => state.maximum_speed = non_negative(v)?,
        MotorParam::Acceleration => state.acceleration = non_negative(v)?,
        MotorParam::PositiveLimit => state.positive_limit = v,
        MotorParam::NegativeLimit => state.negative_limit = v,
    }
    Ok(())
}

// =============================================================================
// Driver contract
// =============================================================================

/// Operations a motor driver provides. Positions are in raw units.
pub trait MotorDriver: Send {
    /// Start a move to `raw_destination`; returns once the move is started.
    fn move_absolute(&mut self, state: &mut MotorState, raw_destination: f64) -> DeviceResult<()>;

    /// Current raw position.
    fn get_position(&mut self, state: &mut MotorState) -> DeviceResult<f64>;

    /// Redefine the current raw position without moving.
    fn set_position(&mut self, _state: &mut MotorState, _raw_position: f64) -> DeviceResult<()> {
        Err(DeviceError::not_supported("set_position"))
    }

    /// Decelerate to a stop.
    fn soft_abort(&mut self, state: &mut MotorState) -> DeviceResult<()>;

    /// Stop as fast as possible. Defaults to a soft abort.
    fn immediate_abort(&mut self, state: &mut MotorState) -> DeviceResult<()> {
        self.soft_abort(state)
    }

    /// Current status bits.
    fn get_status(&mut self, state: &mut MotorState) -> DeviceResult<MotorStatus>;

    /// Start a home search; `direction` > 0 searches positive.
    fn find_home_position(&mut self, _state: &mut MotorState, _direction: i32) -> DeviceResult<()> {
        Err(DeviceError::not_supported("find_home_position"))
    }

    /// Start moving at constant velocity; `direction` > 0 moves positive.
    fn constant_velocity_move(
        &mut self,
        _state: &mut MotorState,
        _direction: i32,
    ) -> DeviceResult<()> {
        Err(DeviceError::not_supported("constant_velocity_move"))
    }

    /// Read a generic parameter.
    fn get_parameter(&mut self, state: &mut MotorState, param: MotorParam) -> DeviceResult<ParamValue> {
        default_get_parameter(state, param)
    }

    /// Write a generic parameter.
    fn set_parameter(
        &mut self,
        state: &mut MotorState,
        param: MotorParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        default_set_parameter(state, param, value)
    }
}

/// Borrowed motor view of a record.
pub type MotorHandle<'a> = ClassHandle<'a, MotorState, dyn MotorDriver + 'a>;

impl<'a> ClassHandle<'a, MotorState, dyn MotorDriver + 'a> {
    /// Move to `destination` (user units), checking software limits first.
    pub fn move_absolute(&mut self, destination: f64) -> DeviceResult<()> {
        self.state.check_limits(destination)?;
        let raw = self.state.user_to_raw(destination)?;
        debug!(record = self.record, destination, raw, "move_absolute");
        self.driver.move_absolute(self.state, raw)?;
        self.state.destination = destination;
        Ok(())
    }

    /// Move by `delta` user units from the current position.
    pub fn move_relative(&mut self, delta: f64) -> DeviceResult<()> {
        let position = self.get_position()?;
        self.move_absolute(position + delta)
    }

    /// Current position in user units.
    pub fn get_position(&mut self) -> DeviceResult<f64> {
        let raw = self.driver.get_position(self.state)?;
        self.state.raw_position = raw;
        self.state.position = self.state.raw_to_user(raw);
        Ok(self.state.position)
    }

    /// Redefine the current position as `position` user units.
    pub fn set_position(&mut self, position: f64) -> DeviceResult<()> {
        let raw = self.state.user_to_raw(position)?;
        self.driver.set_position(self.state, raw)?;
        info!(record = self.record, position, "position redefined");
        self.state.raw_position = raw;
        self.state.position = position;
        Ok(())
    }

    /// Decelerate to a stop.
    pub fn soft_abort(&mut self) -> DeviceResult<()> {
        info!(record = self.record, "soft abort");
        self.driver.soft_abort(self.state)
    }

    /// Stop immediately.
    pub fn immediate_abort(&mut self) -> DeviceResult<()> {
        info!(record = self.record, "immediate abort");
        self.driver.immediate_abort(self.state)
    }

    /// Current status, normalized so limit bits and `BUSY` never coexist.
    pub fn get_status(&mut self) -> DeviceResult<MotorStatus> {
        let status = self.driver.get_status(self.state)?.normalized();
        self.state.status = status;
        Ok(status)
    }

    /// True while the motor is moving.
    pub fn is_busy(&mut self) -> DeviceResult<bool> {
        Ok(self.get_status()?.is_busy())
    }

    /// Start a home search.
    pub fn find_home_position(&mut self, direction: i32) -> DeviceResult<()> {
        self.driver.find_home_position(self.state, direction)
    }

    /// Start a constant velocity move.
    pub fn constant_velocity_move(&mut self, direction: i32) -> DeviceResult<()> {
        self.driver.constant_velocity_move(self.state, direction)
    }

    /// Read a generic parameter.
    pub fn get_parameter(&mut self, param: MotorParam) -> DeviceResult<ParamValue> {
        self.driver.get_parameter(self.state, param)
    }

    /// Write a generic parameter.
    pub fn set_parameter(&mut self, param: MotorParam, value: &ParamValue) -> DeviceResult<()> {
        debug!(record = self.record, ?param, %value, "set_parameter");
        self.driver.set_parameter(self.state, param, value)
    }

    /// Change the raw to user conversion.
    pub fn set_scaling(&mut self, scale: f64, offset: f64) -> DeviceResult<()> {
        if scale == 0.0 {
            return Err(DeviceError::invalid_parameter("scale", "scale must be non-zero"));
        }
        self.state.scale = scale;
        self.state.offset = offset;
        Ok(())
    }
}

// =============================================================================
// Fields and process hook
// =============================================================================

/// Motor class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    use ScalarType::{Bool, Double, Int32, UInt32};
    vec![
        FieldDescriptor::scalar("position", Double).read_only().process().in_summary(),
        FieldDescriptor::scalar("destination", Double).process(),
        FieldDescriptor::scalar("relative_move", Double).process(),
        FieldDescriptor::scalar("set_position", Double).process(),
        FieldDescriptor::scalar("soft_abort", Bool).process(),
        FieldDescriptor::scalar("immediate_abort", Bool).process(),
        FieldDescriptor::scalar("home_search", Int32).process(),
        FieldDescriptor::scalar("constant_velocity_move", Int32).process(),
        FieldDescriptor::scalar("status", UInt32).read_only().process(),
        FieldDescriptor::scalar("busy", Bool).read_only().process(),
        FieldDescriptor::scalar("scale", Double)
            .with_default(FieldValue::Double(1.0))
            .process()
            .in_description(),
        FieldDescriptor::scalar("offset", Double).process().in_description(),
        FieldDescriptor::scalar("positive_limit", Double).process().in_description(),
        FieldDescriptor::scalar("negative_limit", Double).process().in_description(),
        FieldDescriptor::scalar("speed", Double).process().in_description(),
        FieldDescriptor::scalar("base_speed", Double).process().in_description(),
        FieldDescriptor::scalar("maximum_speed", Double).process().in_description(),
        FieldDescriptor::scalar("acceleration", Double).process().in_description(),
    ]
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    if let Some(param) = MotorParam::from_field_name(field) {
        match op {
            ProcessOp::Get => {
                let value = record.motor()?.get_parameter(param)?;
                store_param(record, field, &value)?;
            }
            ProcessOp::Put => {
                let value = field_param(record, field)?;
                record.motor()?.set_parameter(param, &value)?;
            }
        }
        return Ok(true);
    }

    match (field, op) {
        ("position", ProcessOp::Get) => {
            let position = record.motor()?.get_position()?;
            record.fields_mut().set_internal_as("position", position)?;
        }
        ("destination", ProcessOp::Get) => {
            let destination = record.motor()?.state().destination;
            record.fields_mut().set_internal_as("destination", destination)?;
        }
        ("destination", ProcessOp::Put) => {
            let destination = record.fields().get_as::<f64>("destination")?;
            record.motor()?.move_absolute(destination)?;
        }
        ("relative_move", ProcessOp::Put) => {
            let delta = record.fields().get_as::<f64>("relative_move")?;
            record.motor()?.move_relative(delta)?;
        }
        ("set_position", ProcessOp::Put) => {
            let position = record.fields().get_as::<f64>("set_position")?;
            record.motor()?.set_position(position)?;
        }
        ("soft_abort", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.motor()?.soft_abort()?;
            }
        }
        ("immediate_abort", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.motor()?.immediate_abort()?;
            }
        }
        ("home_search", ProcessOp::Put) => {
            let direction = record.fields().get_as::<i32>("home_search")?;
            record.motor()?.find_home_position(direction)?;
        }
        ("constant_velocity_move", ProcessOp::Put) => {
            let direction = record.fields().get_as::<i32>("constant_velocity_move")?;
            record.motor()?.constant_velocity_move(direction)?;
        }
        ("status", ProcessOp::Get) => {
            let status = record.motor()?.get_status()?;
            record.fields_mut().set_internal_as("status", status.bits())?;
        }
        ("busy", ProcessOp::Get) => {
            let busy = record.motor()?.is_busy()?;
            record.fields_mut().set_internal_as("busy", busy)?;
        }
        ("scale" | "offset", ProcessOp::Put) => {
            let scale = record.fields().get_as::<f64>("scale")?;
            let offset = record.fields().get_as::<f64>("offset")?;
            record.motor()?.set_scaling(scale, offset)?;
        }
        ("scale" | "offset", ProcessOp::Get) => {
            let (scale, offset) = {
                let motor = record.motor()?;
                (motor.state().scale, motor.state().offset)
            };
            record.fields_mut().set_internal_as("scale", scale)?;
            record.fields_mut().set_internal_as("offset", offset)?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{open_record, StubDriver};
    use crate::record::RecordClass;

    fn motor_record(description: &str) -> Record {
        open_record(RecordClass::Motor, description, StubDriver::default())
    }

    #[test]
    fn test_status_normalization_clears_busy_on_limit() {
        let status = MotorStatus::from_bits(MotorStatus::BUSY | MotorStatus::POSITIVE_LIMIT_HIT);
        let normalized = status.normalized();
        assert!(!normalized.is_busy());
        assert!(normalized.limit_hit());
    }

    #[test]
    fn test_software_limits_reject_move() {
        let mut record = motor_record("positive_limit = 10.0\nnegative_limit = -10.0");
        let err = record.motor().unwrap().move_absolute(11.0).unwrap_err();
        assert_eq!(
            err,
            DeviceError::LimitExceeded {
                value: 11.0,
                low: -10.0,
                high: 10.0
            }
        );
        record.motor().unwrap().move_absolute(5.0).unwrap();
        assert_eq!(record.motor().unwrap().get_position().unwrap(), 5.0);
    }

    #[test]
    fn test_scaling_applies_between_user_and_raw() {
        let mut record = motor_record("scale = 2.0\noffset = 1.0");
        let mut motor = record.motor().unwrap();
        motor.move_absolute(7.0).unwrap();
        assert_eq!(motor.state().destination, 7.0);
        assert_eq!(motor.get_position().unwrap(), 7.0);
        assert_eq!(motor.state().raw_position, 3.0);
    }

    #[test]
    fn test_zero_scale_rejected_at_creation() {
        let table = std::sync::Arc::new(crate::fields::FieldTable::new(fields()).unwrap());
        let supplied: toml::Table = toml::from_str("scale = 0.0").unwrap();
        let store = table.resolve(&supplied).unwrap();
        assert!(MotorState::from_fields(&store).is_err());
    }

    #[test]
    fn test_default_parameters_bookkeep_speed() {
        let mut record = motor_record("maximum_speed = 100.0");
        let mut motor = record.motor().unwrap();
        motor.set_parameter(MotorParam::Speed, &ParamValue::Float(50.0)).unwrap();
        assert_eq!(
            motor.get_parameter(MotorParam::Speed).unwrap(),
            ParamValue::Float(50.0)
        );
        assert!(matches!(
            motor.set_parameter(MotorParam::Speed, &ParamValue::Float(150.0)),
            Err(DeviceError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_optional_operations_not_supported() {
        let mut record = motor_record("");
        assert_eq!(
            record.motor().unwrap().find_home_position(1),
            Err(DeviceError::not_supported("find_home_position"))
        );
    }

    #[test]
    fn test_field_access_drives_motor() {
        let mut record = motor_record("");
        record.write_field("destination", FieldValue::Double(4.0)).unwrap();
        assert_eq!(record.read_field("position").unwrap(), FieldValue::Double(4.0));

        record.write_field("speed", FieldValue::Double(2.5)).unwrap();
        assert_eq!(record.motor().unwrap().state().speed, 2.5);

        assert!(matches!(
            record.write_field("position", FieldValue::Double(1.0)),
            Err(DeviceError::Field(FieldError::ReadOnlyField { .. }))
        ));
    }

    #[test]
    fn test_failed_process_restores_field() {
        let mut record = motor_record("positive_limit = 1.0\nnegative_limit = -1.0");
        let err = record.write_field("destination", FieldValue::Double(5.0));
        assert!(matches!(err, Err(DeviceError::LimitExceeded { .. })));
        assert_eq!(record.fields().get("destination").unwrap(), &FieldValue::Double(0.0));
    }
}
