//! Digital fan-in: several digital inputs combined into one value.
//!
//! `operation` is `or`, `and` or `xor`. A read stops at the first input that
//! fails and returns its error. A clear is attempted on every input and the
//! first error is returned.

use std::fmt;
use std::str::FromStr;

use daq_records::classes::{DigitalInputDriver, DigitalInputState};
use daq_records::{
    Database, DeviceResult, Dimension, DriverError, DriverErrorKind, DriverFactory,
    FieldDescriptor, FieldStore, FieldValue, RecordClass, RecordContext, RecordDriver,
    ScalarType,
};

use super::{bind_all, each_first_error, each_until_error, Child};

const DRIVER_TYPE: &str = "digital_fanin";

/// Bitwise combination applied across the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaninOperation {
    /// Bit set when set in any input.
    Or,
    /// Bit set when set in every input.
    And,
    /// Bit set when set in an odd number of inputs.
    Xor,
}

impl FaninOperation {
    /// Combine `values`; the empty combination is 0.
    pub fn combine(self, values: impl IntoIterator<Item = u32>) -> u32 {
        let mut values = values.into_iter();
        let Some(first) = values.next() else {
            return 0;
        };
        values.fold(first, |acc, value| match self {
            FaninOperation::Or => acc | value,
            FaninOperation::And => acc & value,
            FaninOperation::Xor => acc ^ value,
        })
    }
}

impl FromStr for FaninOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "or" => Ok(FaninOperation::Or),
            "and" => Ok(FaninOperation::And),
            "xor" => Ok(FaninOperation::Xor),
            other => Err(format!("unknown operation '{other}', expected or, and or xor")),
        }
    }
}

impl fmt::Display for FaninOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FaninOperation::Or => "or",
            FaninOperation::And => "and",
            FaninOperation::Xor => "xor",
        })
    }
}

/// Digital inputs combined bitwise.
#[derive(Debug)]
pub struct DigitalFanin {
    inputs: Vec<Child>,
    operation: FaninOperation,
}

impl DigitalInputDriver for DigitalFanin {
    fn read(&mut self, _state: &mut DigitalInputState) -> DeviceResult<u32> {
        let mut values = Vec::with_capacity(self.inputs.len());
        each_until_error(&self.inputs, |record| {
            values.push(record.digital_input()?.read()?);
            Ok(())
        })?;
        Ok(self.operation.combine(values))
    }

    fn clear(&mut self, _state: &mut DigitalInputState) -> DeviceResult<()> {
        each_first_error(&self.inputs, |record| record.digital_input()?.clear())
    }
}

impl RecordDriver for DigitalFanin {
    fn initialize(&mut self, _ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        bind_all(&mut self.inputs, database)
    }

    fn as_digital_input(&mut self) -> Option<&mut dyn DigitalInputDriver> {
        Some(self)
    }
}

/// Factory for `digital_fanin` records.
pub struct DigitalFaninFactory;

impl DriverFactory for DigitalFaninFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::DigitalInput
    }

    fn description(&self) -> &'static str {
        "Digital inputs combined with or, and or xor"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("num_inputs", ScalarType::Int32)
                .with_default(FieldValue::Int32(1))
                .read_only()
                .in_description(),
            FieldDescriptor::array(
                "inputs",
                ScalarType::RecordRef,
                Dimension::depends_on("num_inputs"),
            )
            .read_only()
            .in_description(),
            FieldDescriptor::scalar("operation", ScalarType::String)
                .with_default(FieldValue::String("or".into()))
                .read_only()
                .in_description(),
        ]
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let field = |e| DriverError::from_field(DRIVER_TYPE, e);
        let operation = fields
            .get_as::<String>("operation")
            .map_err(field)?
            .parse()
            .map_err(|reason: String| {
                DriverError::new(DRIVER_TYPE, DriverErrorKind::Configuration, reason)
            })?;
        Ok(Box::new(DigitalFanin {
            inputs: Child::list_from_field(fields, "inputs").map_err(field)?,
            operation,
        }))
    }
}
