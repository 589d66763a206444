//! Soft relay: a switch that takes `settle_time` seconds to change over.
//!
//! While changing over the status reads `Unknown`.

use std::time::{Duration, Instant};

use daq_records::classes::{RelayCommand, RelayDriver, RelayState, RelayStatus};
use daq_records::{
    DeviceResult, DriverError, DriverErrorKind, DriverFactory, FieldDescriptor, FieldStore,
    ProcessOp, RecordClass, RecordContext, RecordDriver, ScalarType,
};

use crate::common::{with_fault_fields, FaultInjector};

const DRIVER_TYPE: &str = "soft_relay";

/// Simulated relay.
#[derive(Debug)]
pub struct SoftRelay {
    faults: FaultInjector,
    settle_time: Duration,
    position: RelayStatus,
    changing: Option<(RelayCommand, Instant)>,
}

impl SoftRelay {
    fn from_fields(fields: &FieldStore) -> Result<Self, DriverError> {
        let settle = fields
            .get_as::<f64>("settle_time")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        let settle_time = Duration::try_from_secs_f64(settle).map_err(|_| {
            DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                format!("settle_time {settle} is not a valid duration"),
            )
        })?;
        Ok(Self {
            faults: FaultInjector::from_fields(DRIVER_TYPE, fields)?,
            settle_time,
            position: RelayStatus::Closed,
            changing: None,
        })
    }
}

fn settled(command: RelayCommand) -> RelayStatus {
    match command {
        RelayCommand::Close => RelayStatus::Closed,
        RelayCommand::Open => RelayStatus::Open,
    }
}

impl RelayDriver for SoftRelay {
    fn relay_command(&mut self, _state: &mut RelayState, command: RelayCommand) -> DeviceResult<()> {
        self.faults.check("relay_command")?;
        if self.settle_time.is_zero() {
            self.position = settled(command);
            self.changing = None;
        } else {
            self.changing = Some((command, Instant::now()));
        }
        Ok(())
    }

    fn get_relay_status(&mut self, _state: &mut RelayState) -> DeviceResult<RelayStatus> {
        self.faults.check("get_relay_status")?;
        if let Some((command, since)) = self.changing {
            if since.elapsed() < self.settle_time {
                return Ok(RelayStatus::Unknown);
            }
            self.position = settled(command);
            self.changing = None;
        }
        Ok(self.position)
    }
}

impl RecordDriver for SoftRelay {
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

    fn as_relay(&mut self) -> Option<&mut dyn RelayDriver> {
        Some(self)
    }
}

/// Factory for `soft_relay` records.
pub struct SoftRelayFactory;

impl DriverFactory for SoftRelayFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Relay
    }

    fn description(&self) -> &'static str {
        "Simulated relay with a change-over time"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(vec![
            FieldDescriptor::scalar("settle_time", ScalarType::Double).in_description()
        ])
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(SoftRelay::from_fields(fields)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_single;
    use daq_records::{DeviceError, FieldValue, RecordDescription};

    #[test]
    fn test_instant_relay() {
        let (_db, r1) = open_single(RecordDescription::new("r1", DRIVER_TYPE));
        r1.with(|record| {
            assert_eq!(record.relay()?.get_relay_status()?, RelayStatus::Closed);
            record.write_field("relay_command", FieldValue::Int32(RelayCommand::Open.code()))?;
            assert_eq!(
                record.read_field("relay_status")?,
                FieldValue::Int32(RelayStatus::Open.code())
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_slow_relay_is_unknown_while_changing() {
        let (_db, r1) =
            open_single(RecordDescription::new("r1", DRIVER_TYPE).with_field("settle_time", 600.0));
        r1.with(|record| {
            let mut relay = record.relay()?;
            relay.relay_command(RelayCommand::Open)?;
            assert_eq!(relay.get_relay_status()?, RelayStatus::Unknown);
            assert_eq!(relay.state().command, Some(RelayCommand::Open));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unknown_command_code_rejected() {
        let (_db, r1) = open_single(RecordDescription::new("r1", DRIVER_TYPE));
        r1.with(|record| {
            assert!(matches!(
                record.write_field("relay_command", FieldValue::Int32(7)),
                Err(DeviceError::InvalidParameter { .. })
            ));
            Ok(())
        })
        .unwrap();
    }
}
