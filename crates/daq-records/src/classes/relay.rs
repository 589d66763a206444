//! Relay class: shutters, valves, switches.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ClassHandle, ProcessOp};
use crate::error::{DeviceError, DeviceResult};
use crate::fields::FieldDescriptor;
use crate::record::Record;
use crate::value::ScalarType;

/// Command sent to a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayCommand {
    /// Close the relay.
    Close,
    /// Open the relay.
    Open,
}

impl RelayCommand {
    /// Field encoding.
    pub fn code(self) -> i32 {
        match self {
            RelayCommand::Close => 0,
            RelayCommand::Open => 1,
        }
    }

    /// Inverse of [`RelayCommand::code`].
    pub fn from_code(code: i32) -> DeviceResult<Self> {
        match code {
            0 => Ok(RelayCommand::Close),
            1 => Ok(RelayCommand::Open),
            other => Err(DeviceError::invalid_parameter(
                "relay_command",
                format!("unknown relay command {other}"),
            )),
        }
    }
}

/// Reported relay position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayStatus {
    /// Closed.
    Closed,
    /// Open.
    Open,
    /// Moving between positions or not yet read.
    #[default]
    Unknown,
    /// Both or neither end switch active.
    Illegal,
}

impl RelayStatus {
    /// Field encoding.
    pub fn code(self) -> i32 {
        match self {
            RelayStatus::Closed => 0,
            RelayStatus::Open => 1,
            RelayStatus::Unknown => 2,
            RelayStatus::Illegal => 3,
        }
    }

    /// Inverse of [`RelayStatus::code`].
    pub fn from_code(code: i32) -> DeviceResult<Self> {
        match code {
            0 => Ok(RelayStatus::Closed),
            1 => Ok(RelayStatus::Open),
            2 => Ok(RelayStatus::Unknown),
            3 => Ok(RelayStatus::Illegal),
            other => Err(DeviceError::Protocol(format!("unknown relay status {other}"))),
        }
    }
}

/// Relay class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayState {
    /// Last command sent.
    pub command: Option<RelayCommand>,
    /// Last status read.
    pub status: RelayStatus,
}

/// Operations a relay driver provides.
pub trait RelayDriver: Send {
    /// Send a command.
    fn relay_command(&mut self, state: &mut RelayState, command: RelayCommand) -> DeviceResult<()>;

    /// Read the status.
    fn get_relay_status(&mut self, state: &mut RelayState) -> DeviceResult<RelayStatus>;
}

/// Borrowed relay view of a record.
pub type RelayHandle<'a> = ClassHandle<'a, RelayState, dyn RelayDriver + 'a>;

impl<'a> ClassHandle<'a, RelayState, dyn RelayDriver + 'a> {
    /// Send a command.
    pub fn relay_command(&mut self, command: RelayCommand) -> DeviceResult<()> {
        info!(record = self.record, ?command, "relay command");
        self.driver.relay_command(self.state, command)?;
        self.state.command = Some(command);
        Ok(())
    }

    /// Read the status.
    pub fn get_relay_status(&mut self) -> DeviceResult<RelayStatus> {
        let status = self.driver.get_relay_status(self.state)?;
        self.state.status = status;
        Ok(status)
    }
}

/// Relay class fields.
pub fn fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::scalar("relay_command", ScalarType::Int32).process(),
        FieldDescriptor::scalar("relay_status", ScalarType::Int32)
            .read_only()
            .process()
            .in_summary(),
    ]
}

pub(crate) fn process(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    match (field, op) {
        ("relay_command", ProcessOp::Put) => {
            let command = RelayCommand::from_code(record.fields().get_as::<i32>("relay_command")?)?;
            record.relay()?.relay_command(command)?;
        }
        ("relay_status", ProcessOp::Get) => {
            let status = record.relay()?.get_relay_status()?;
            record
                .fields_mut()
                .set_internal_as("relay_status", status.code())?;
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
    fn test_command_then_status() {
        let mut record = open_record(RecordClass::Relay, "", StubDriver::default());
        record
            .write_field("relay_command", FieldValue::Int32(RelayCommand::Open.code()))
            .unwrap();
        assert_eq!(
            record.read_field("relay_status").unwrap(),
            FieldValue::Int32(RelayStatus::Open.code())
        );
        assert_eq!(record.relay().unwrap().state().command, Some(RelayCommand::Open));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut record = open_record(RecordClass::Relay, "", StubDriver::default());
        assert!(matches!(
            record.write_field("relay_command", FieldValue::Int32(5)),
            Err(DeviceError::InvalidParameter { .. })
        ));
    }
}
