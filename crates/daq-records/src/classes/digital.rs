//! Digital input and digital output classes.

use super::{trigger_set, ClassHandle, ProcessOp};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{FieldDescriptor, FieldStore};
use crate::record::Record;
use crate::value::ScalarType;

/// Digital input class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigitalInputState {
    /// Last value read.
    pub value: u32,
}

/// Digital output class state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigitalOutputState {
    /// Last value written or read back.
    pub value: u32,
}

impl DigitalOutputState {
    /// State from the record's resolved class fields.
    pub fn from_fields(fields: &FieldStore) -> Result<Self, FieldError> {
        Ok(Self {
            value: fields.get_as("value")?,
        })
    }
}

/// Operations a digital input driver provides.
pub trait DigitalInputDriver: Send {
    /// Read the input.
    fn read(&mut self, state: &mut DigitalInputState) -> DeviceResult<u32>;

    /// Clear latched bits.
    fn clear(&mut self, _state: &mut DigitalInputState) -> DeviceResult<()> {
        Err(DeviceError::not_supported("clear"))
    }
}

/// Operations a digital output driver provides.
pub trait DigitalOutputDriver: Send {
    /// Read back the output.
    fn read(&mut self, state: &mut DigitalOutputState) -> DeviceResult<u32> {
        Ok(state.value)
    }

    /// Drive the output.
    fn write(&mut self, state: &mut DigitalOutputState, value: u32) -> DeviceResult<()>;
}

/// Borrowed digital input view of a record.
pub type DigitalInputHandle<'a> = ClassHandle<'a, DigitalInputState, dyn DigitalInputDriver + 'a>;

/// Borrowed digital output view of a record.
pub type DigitalOutputHandle<'a> =
    ClassHandle<'a, DigitalOutputState, dyn DigitalOutputDriver + 'a>;

impl<'a> ClassHandle<'a, DigitalInputState, dyn DigitalInputDriver + 'a> {
    /// Read the input.
    pub fn read(&mut self) -> DeviceResult<u32> {
        let value = self.driver.read(self.state)?;
        self.state.value = value;
        Ok(value)
    }

    /// Clear latched bits.
    pub fn clear(&mut self) -> DeviceResult<()> {
        self.driver.clear(self.state)?;
        self.state.value = 0;
        Ok(())
    }
}

impl<'a> ClassHandle<'a, DigitalOutputState, dyn DigitalOutputDriver + 'a> {
    /// Read back the output.
    pub fn read(&mut self) -> DeviceResult<u32> {
        let value = self.driver.read(self.state)?;
        self.state.value = value;
        Ok(value)
    }

    /// Drive the output.
    pub fn write(&mut self, value: u32) -> DeviceResult<()> {
        self.driver.write(self.state, value)?;
        self.state.value = value;
        Ok(())
    }
}

/// Digital input class fields.
pub fn input_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::scalar("value", ScalarType::UInt32)
            .read_only()
            .process()
            .in_summary(),
        FieldDescriptor::scalar("clear", ScalarType::Bool).process(),
    ]
}

/// Digital output class fields.
pub fn output_fields() -> Vec<FieldDescriptor> {
    vec![FieldDescriptor::scalar("value", ScalarType::UInt32)
        .process()
        .in_summary()
        .in_description()]
}

pub(crate) fn process_input(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    match (field, op) {
        ("value", ProcessOp::Get) => {
            let value = record.digital_input()?.read()?;
            record.fields_mut().set_internal_as("value", value)?;
        }
        ("clear", ProcessOp::Put) => {
            if trigger_set(record, field)? {
                record.digital_input()?.clear()?;
            }
        }
        _ => return Ok(false),
    }
    Ok(true)
}

pub(crate) fn process_output(record: &mut Record, field: &str, op: ProcessOp) -> DeviceResult<bool> {
    match (field, op) {
        ("value", ProcessOp::Get) => {
            let value = record.digital_output()?.read()?;
            record.fields_mut().set_internal_as("value", value)?;
        }
        ("value", ProcessOp::Put) => {
            let value = record.fields().get_as::<u32>("value")?;
            record.digital_output()?.write(value)?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}
