//! Soft motor: a simulated positioner with timed motion.
//!
//! Moves follow the trapezoidal profile built from the class `speed` and
//! `acceleration` (user units, converted to raw with the motor scale). Hardware
//! limit switches sit at `positive_hardware_limit` / `negative_hardware_limit`
//! (raw units, disabled while negative >= positive): a move past one stops at
//! the switch and reports the matching limit bit. A home search travels to
//! `home_position` and reports `HOME_SEARCH_SUCCEEDED` on arrival.
//!
//! # Example
//!
//! ```toml
//! [[records]]
//! name = "theta"
//! driver = "soft_motor"
//! fields = { speed = 2.0, acceleration = 4.0, positive_hardware_limit = 90.0, negative_hardware_limit = -90.0 }
//! ```

use std::time::Instant;
use tracing::{debug, info};

use daq_records::classes::{MotorDriver, MotorState, MotorStatus};
use daq_records::{
    DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore,
    ProcessOp, RecordClass, RecordContext, RecordDriver, ScalarType,
};

use crate::common::{with_fault_fields, FaultInjector, Motion, MotionProfile};

const DRIVER_TYPE: &str = "soft_motor";

/// Hardware limit switches, raw units.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HardwareLimits {
    negative: f64,
    positive: f64,
}

impl HardwareLimits {
    fn enabled(&self) -> bool {
        self.negative < self.positive
    }

    /// Where a move toward `target` stops, and the limit bit it trips.
    fn clamp(&self, target: f64) -> (f64, u32) {
        if !self.enabled() {
            (target, 0)
        } else if target >= self.positive {
            (self.positive, MotorStatus::POSITIVE_LIMIT_HIT)
        } else if target <= self.negative {
            (self.negative, MotorStatus::NEGATIVE_LIMIT_HIT)
        } else {
            (target, 0)
        }
    }
}

/// What the axis reports once the current move ends.
#[derive(Debug, Clone, Copy, Default)]
struct Arrival {
    limit_bits: u32,
    homed: bool,
}

/// Simulated motor.
#[derive(Debug)]
pub struct SoftMotor {
    faults: FaultInjector,
    limits: HardwareLimits,
    home_position: f64,
    position: f64,
    motion: Option<(Motion, Arrival)>,
    limit_bits: u32,
    homed: bool,
}

impl SoftMotor {
    fn from_fields(fields: &FieldStore) -> Result<Self, DriverError> {
        let field = |e| DriverError::from_field(DRIVER_TYPE, e);
        Ok(Self {
            faults: FaultInjector::from_fields(DRIVER_TYPE, fields)?,
            limits: HardwareLimits {
                negative: fields.get_as("negative_hardware_limit").map_err(field)?,
                positive: fields.get_as("positive_hardware_limit").map_err(field)?,
            },
            home_position: fields.get_as("home_position").map_err(field)?,
            position: fields.get_as("initial_position").map_err(field)?,
            motion: None,
            limit_bits: 0,
            homed: false,
        })
    }

    fn profile(state: &MotorState) -> MotionProfile {
        let scale = state.scale.abs();
        MotionProfile::new(state.speed / scale, state.acceleration / scale)
    }

    /// Advance the simulation to now.
    fn update(&mut self) {
        let now = Instant::now();
        if let Some((motion, arrival)) = self.motion {
            if motion.finished_at(now) {
                self.position = motion.target();
                self.limit_bits = arrival.limit_bits;
                self.homed = arrival.homed;
                self.motion = None;
                debug!(position = self.position, "soft motor arrived");
            } else {
                self.position = motion.position_at(now);
            }
        }
    }

    fn start(&mut self, state: &MotorState, target: f64, homing: bool) {
        self.update();
        let (stop, limit_bits) = self.limits.clamp(target);
        let motion = Motion::start(self.position, stop, Self::profile(state));
        self.limit_bits = 0;
        self.homed = false;
        self.motion = Some((motion, Arrival { limit_bits, homed: homing }));
    }

    fn halt(&mut self) {
        self.update();
        self.motion = None;
    }
}

impl MotorDriver for SoftMotor {
    fn move_absolute(&mut self, state: &mut MotorState, raw_destination: f64) -> DeviceResult<()> {
        self.faults.check("move_absolute")?;
        self.start(state, raw_destination, false);
        Ok(())
    }

    fn get_position(&mut self, _state: &mut MotorState) -> DeviceResult<f64> {
        self.faults.check("get_position")?;
        self.update();
        Ok(self.position)
    }

    fn set_position(&mut self, _state: &mut MotorState, raw_position: f64) -> DeviceResult<()> {
        self.faults.check("set_position")?;
        self.update();
        if self.motion.is_some() {
            return Err(DeviceError::invalid_parameter(
                "set_position",
                "cannot redefine the position while moving",
            ));
        }
        self.position = raw_position;
        Ok(())
    }

    fn soft_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        self.faults.check("soft_abort")?;
        self.halt();
        Ok(())
    }

    fn immediate_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        self.faults.check("immediate_abort")?;
        self.halt();
        Ok(())
    }

    fn get_status(&mut self, _state: &mut MotorState) -> DeviceResult<MotorStatus> {
        self.faults.check("get_status")?;
        self.update();
        let status = MotorStatus::from_bits(self.limit_bits)
            .with(MotorStatus::BUSY, self.motion.is_some())
            .with(MotorStatus::HOME_SEARCH_SUCCEEDED, self.homed);
        Ok(status)
    }

    fn find_home_position(&mut self, state: &mut MotorState, direction: i32) -> DeviceResult<()> {
        self.faults.check("find_home_position")?;
        info!(direction, home = self.home_position, "soft motor home search");
        self.start(state, self.home_position, true);
        Ok(())
    }

    fn constant_velocity_move(&mut self, state: &mut MotorState, direction: i32) -> DeviceResult<()> {
        self.faults.check("constant_velocity_move")?;
        if direction == 0 {
            return Err(DeviceError::invalid_parameter(
                "constant_velocity_move",
                "direction must be non-zero",
            ));
        }
        if !self.limits.enabled() {
            return Err(DeviceError::invalid_parameter(
                "constant_velocity_move",
                "needs hardware limits to stop at",
            ));
        }
        let target = if direction > 0 {
            self.limits.positive
        } else {
            self.limits.negative
        };
        self.start(state, target, false);
        Ok(())
    }
}

impl RecordDriver for SoftMotor {
    fn open(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        self.faults.check("open")
    }

    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        self.faults.process(fields, field, op)
    }

    fn as_motor(&mut self) -> Option<&mut dyn MotorDriver> {
        Some(self)
    }
}

/// Factory for `soft_motor` records.
pub struct SoftMotorFactory;

impl DriverFactory for SoftMotorFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Motor
    }

    fn description(&self) -> &'static str {
        "Simulated motor with trapezoidal motion and limit switches"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        use ScalarType::Double;
        with_fault_fields(vec![
            FieldDescriptor::scalar("initial_position", Double).in_description(),
            FieldDescriptor::scalar("positive_hardware_limit", Double).in_description(),
            FieldDescriptor::scalar("negative_hardware_limit", Double).in_description(),
            FieldDescriptor::scalar("home_position", Double).in_description(),
        ])
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(SoftMotor::from_fields(fields)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_single;
    use daq_records::{FieldValue, RecordDescription};

    fn motor(extra: &[(&str, f64)]) -> (daq_records::Database, daq_records::RecordRef) {
        let mut description = RecordDescription::new("m1", DRIVER_TYPE);
        for (name, value) in extra {
            description = description.with_field(*name, *value);
        }
        open_single(description)
    }

    #[test]
    fn test_instant_moves_with_scaling() {
        let (_db, m1) = motor(&[("scale", 2.0), ("offset", 1.0), ("initial_position", 5.0)]);
        m1.with(|record| {
            let mut motor = record.motor()?;
            assert_eq!(motor.get_position()?, 11.0);
            motor.move_absolute(21.0)?;
            assert_eq!(motor.state().raw_position, 5.0);
            assert_eq!(motor.get_position()?, 21.0);
            assert_eq!(motor.state().raw_position, 10.0);
            assert!(!motor.is_busy()?);
            motor.move_relative(-1.0)?;
            assert_eq!(motor.get_position()?, 20.0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_timed_move_is_busy_until_abort() {
        let (_db, m1) = motor(&[("speed", 1.0)]);
        m1.with(|record| {
            let mut motor = record.motor()?;
            motor.move_absolute(1000.0)?;
            assert!(motor.is_busy()?);
            motor.soft_abort()?;
            assert!(!motor.is_busy()?);
            let stopped = motor.get_position()?;
            assert!(stopped < 1000.0);
            assert_eq!(motor.get_position()?, stopped);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_hardware_limit_stops_move() {
        let (_db, m1) = motor(&[
            ("positive_hardware_limit", 10.0),
            ("negative_hardware_limit", -10.0),
        ]);
        m1.with(|record| {
            let mut motor = record.motor()?;
            motor.move_absolute(50.0)?;
            let status = motor.get_status()?;
            assert!(status.contains(MotorStatus::POSITIVE_LIMIT_HIT));
            assert!(!status.is_busy());
            assert_eq!(motor.get_position()?, 10.0);

            motor.constant_velocity_move(-1)?;
            assert!(motor.get_status()?.contains(MotorStatus::NEGATIVE_LIMIT_HIT));
            assert_eq!(motor.get_position()?, -10.0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_software_limits_reject_before_driver() {
        let (_db, m1) = motor(&[("positive_limit", 5.0), ("negative_limit", -5.0)]);
        m1.with(|record| {
            let mut motor = record.motor()?;
            assert_eq!(
                motor.move_absolute(6.0),
                Err(DeviceError::LimitExceeded {
                    value: 6.0,
                    low: -5.0,
                    high: 5.0
                })
            );
            assert_eq!(motor.get_position()?, 0.0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_home_search_and_set_position() {
        let (_db, m1) = motor(&[("home_position", 3.0)]);
        m1.with(|record| {
            let mut motor = record.motor()?;
            motor.find_home_position(1)?;
            assert!(motor.get_status()?.contains(MotorStatus::HOME_SEARCH_SUCCEEDED));
            assert_eq!(motor.get_position()?, 3.0);
            motor.set_position(0.0)?;
            assert_eq!(motor.get_position()?, 0.0);
            motor.move_absolute(1.0)?;
            assert!(!motor.get_status()?.contains(MotorStatus::HOME_SEARCH_SUCCEEDED));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_fields_drive_the_motor_and_faults() {
        let (_db, m1) = motor(&[]);
        m1.with(|record| {
            record.write_field("destination", FieldValue::Double(4.5))?;
            assert_eq!(record.read_field("position")?, FieldValue::Double(4.5));

            record.write_field("fail_operation", FieldValue::String("move_absolute".into()))?;
            assert_eq!(
                record.write_field("destination", FieldValue::Double(1.0)),
                Err(DeviceError::HardwareFault(
                    "soft_motor: injected move_absolute failure".into()
                ))
            );
            // The failed write is rolled back.
            assert_eq!(record.fields().get_as::<f64>("destination")?, 4.5);
            assert_eq!(record.read_field("position")?, FieldValue::Double(4.5));
            Ok(())
        })
        .unwrap();
    }
}
