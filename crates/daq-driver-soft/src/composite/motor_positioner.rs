//! Motor positioner: several motors driven as one.
//!
//! Positions are passed to the children in their user units. Child failures
//! combine as follows:
//!
//! - moves, home searches, constant velocity moves and position redefinition
//!   go to the children in order and stop at the first failing child, whose
//!   error is returned;
//! - the position is read from the `primary` child;
//! - the status is busy while any child is busy, with the children's limit and
//!   fault bits OR-ed together; a failing child status read is returned as is;
//! - aborts are attempted on every child and the first error is returned.
//!
//! # Example
//!
//! ```toml
//! [[records]]
//! name = "table"
//! driver = "motor_positioner"
//! fields = { num_motors = 3, motors = ["leg1", "leg2", "leg3"] }
//! ```

use daq_records::classes::{MotorDriver, MotorState, MotorStatus};
use daq_records::{
    Database, DeviceResult, Dimension, DriverError, DriverErrorKind, DriverFactory,
    FieldDescriptor, FieldStore, FieldValue, RecordClass, RecordContext, RecordDriver,
    ScalarType,
};

use super::{bind_all, each_first_error, each_until_error, Child};

const DRIVER_TYPE: &str = "motor_positioner";

/// Status bits that are reported when any child reports them.
const ANY_CHILD: u32 = MotorStatus::BUSY
    | MotorStatus::POSITIVE_LIMIT_HIT
    | MotorStatus::NEGATIVE_LIMIT_HIT
    | MotorStatus::FOLLOWING_ERROR
    | MotorStatus::DRIVE_FAULT
    | MotorStatus::AXIS_DISABLED;

/// Motors moved together.
#[derive(Debug)]
pub struct MotorPositioner {
    motors: Vec<Child>,
    primary: usize,
}

impl MotorPositioner {
    fn from_fields(fields: &FieldStore) -> Result<Self, DriverError> {
        let motors = Child::list_from_field(fields, "motors")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        let primary = fields
            .get_as::<i32>("primary")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        let primary = usize::try_from(primary)
            .ok()
            .filter(|&index| index < motors.len())
            .ok_or_else(|| {
                DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::Configuration,
                    format!("primary {primary} is not one of {} motors", motors.len()),
                )
            })?;
        Ok(Self { motors, primary })
    }
}

impl MotorDriver for MotorPositioner {
    fn move_absolute(&mut self, _state: &mut MotorState, raw_destination: f64) -> DeviceResult<()> {
        each_until_error(&self.motors, |record| {
            record.motor()?.move_absolute(raw_destination)
        })
    }

    fn get_position(&mut self, _state: &mut MotorState) -> DeviceResult<f64> {
        self.motors[self.primary].with(|record| record.motor()?.get_position())
    }

    fn set_position(&mut self, _state: &mut MotorState, raw_position: f64) -> DeviceResult<()> {
        each_until_error(&self.motors, |record| {
            record.motor()?.set_position(raw_position)
        })
    }

    fn soft_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        each_first_error(&self.motors, |record| record.motor()?.soft_abort())
    }

    fn immediate_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        each_first_error(&self.motors, |record| record.motor()?.immediate_abort())
    }

    fn get_status(&mut self, _state: &mut MotorState) -> DeviceResult<MotorStatus> {
        let mut any = 0;
        let mut all = MotorStatus::HOME_SEARCH_SUCCEEDED;
        each_until_error(&self.motors, |record| {
            let bits = record.motor()?.get_status()?.bits();
            any |= bits & ANY_CHILD;
            all &= bits;
            Ok(())
        })?;
        Ok(MotorStatus::from_bits(any | all))
    }

    fn find_home_position(&mut self, _state: &mut MotorState, direction: i32) -> DeviceResult<()> {
        each_until_error(&self.motors, |record| {
            record.motor()?.find_home_position(direction)
        })
    }

    fn constant_velocity_move(&mut self, _state: &mut MotorState, direction: i32) -> DeviceResult<()> {
        each_until_error(&self.motors, |record| {
            record.motor()?.constant_velocity_move(direction)
        })
    }
}

impl RecordDriver for MotorPositioner {
    fn initialize(&mut self, _ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        bind_all(&mut self.motors, database)
    }

    fn as_motor(&mut self) -> Option<&mut dyn MotorDriver> {
        Some(self)
    }
}

/// Factory for `motor_positioner` records.
pub struct MotorPositionerFactory;

impl DriverFactory for MotorPositionerFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Motor
    }

    fn description(&self) -> &'static str {
        "Several motors moved together"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("num_motors", ScalarType::Int32)
                .with_default(FieldValue::Int32(1))
                .read_only()
                .in_description(),
            FieldDescriptor::array(
                "motors",
                ScalarType::RecordRef,
                Dimension::depends_on("num_motors"),
            )
            .read_only()
            .in_description(),
            FieldDescriptor::scalar("primary", ScalarType::Int32)
                .read_only()
                .in_description(),
        ]
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(MotorPositioner::from_fields(fields)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{open_database, registry};
    use daq_records::{ConfigError, DeviceError, FieldError, RecordDescription};

    fn leg(name: &str) -> RecordDescription {
        RecordDescription::new(name, "soft_motor")
    }

    fn table(legs: &[&str]) -> RecordDescription {
        RecordDescription::new("table", DRIVER_TYPE)
            .with_field("num_motors", legs.len() as i64)
            .with_field(
                "motors",
                toml::Value::Array(legs.iter().map(|&name| name.into()).collect()),
            )
    }

    fn position(database: &Database, name: &str) -> f64 {
        database
            .resolve(name)
            .and_then(|motor| motor.with(|record| record.motor()?.get_position()))
            .unwrap()
    }

    #[test]
    fn test_moves_every_child() {
        let database = open_database(&[leg("a"), leg("b"), table(&["a", "b"]).with_field("primary", 1)]);
        database
            .resolve("table")
            .unwrap()
            .with(|record| {
                let mut motor = record.motor()?;
                motor.move_absolute(4.0)?;
                assert_eq!(motor.get_position()?, 4.0);
                assert!(!motor.is_busy()?);
                Ok(())
            })
            .unwrap();
        assert_eq!(position(&database, "a"), 4.0);
        assert_eq!(position(&database, "b"), 4.0);
    }

    #[test]
    fn test_move_stops_at_first_failing_child() {
        let database = open_database(&[
            leg("a"),
            leg("b").with_field("positive_limit", 2.0).with_field("negative_limit", -2.0),
            leg("c"),
            table(&["a", "b", "c"]),
        ]);
        let result = database
            .resolve("table")
            .unwrap()
            .with(|record| record.motor()?.move_absolute(5.0));
        assert!(matches!(result, Err(DeviceError::LimitExceeded { .. })));
        assert_eq!(position(&database, "a"), 5.0);
        assert_eq!(position(&database, "b"), 0.0);
        assert_eq!(position(&database, "c"), 0.0);
    }

    #[test]
    fn test_status_ors_child_limits() {
        let database = open_database(&[
            leg("a")
                .with_field("positive_hardware_limit", 1.0)
                .with_field("negative_hardware_limit", -1.0),
            leg("b").with_field("speed", 1.0),
            table(&["a", "b"]),
        ]);
        database
            .resolve("table")
            .unwrap()
            .with(|record| {
                let mut motor = record.motor()?;
                motor.move_absolute(500.0)?;
                let status = motor.get_status()?;
                assert!(status.contains(MotorStatus::POSITIVE_LIMIT_HIT));
                // limit bits win over busy
                assert!(!status.is_busy());
                motor.soft_abort()?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_busy_while_any_child_moves() {
        let database = open_database(&[leg("a"), leg("b").with_field("speed", 1.0), table(&["a", "b"])]);
        database
            .resolve("table")
            .unwrap()
            .with(|record| {
                let mut motor = record.motor()?;
                motor.move_absolute(500.0)?;
                assert!(motor.is_busy()?);
                motor.immediate_abort()?;
                assert!(!motor.is_busy()?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_children_fixed_after_build() {
        let database = open_database(&[leg("a"), leg("b"), table(&["a", "b"])]);
        let table = database.resolve("table").unwrap();
        for (field, value) in [
            ("num_motors", FieldValue::Int32(1)),
            ("primary", FieldValue::Int32(1)),
        ] {
            assert_eq!(
                table.with(|record| record.write_field(field, value)),
                Err(DeviceError::Field(FieldError::ReadOnlyField {
                    field: field.to_string()
                }))
            );
        }
        let motors = table
            .with(|record| Ok(record.fields().element_count("motors")?))
            .unwrap();
        assert_eq!(motors, 2);
    }

    #[test]
    fn test_primary_must_name_a_child() {
        let descriptions = [leg("a"), table(&["a"]).with_field("primary", 1)];
        assert!(matches!(
            Database::build(&registry(), &descriptions),
            Err(ConfigError::Driver { .. })
        ));
    }
}
