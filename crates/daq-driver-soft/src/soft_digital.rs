//! Soft digital input and output registers.
//!
//! A soft input reads whatever was last written to its `simulated_value`
//! field; clearing it zeroes the simulated value. A soft output reads back
//! what was written to it.

use daq_records::classes::{
    DigitalInputDriver, DigitalInputState, DigitalOutputDriver, DigitalOutputState,
};
use daq_records::{
    DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, ProcessOp,
    RecordClass, RecordContext, RecordDriver, ScalarType,
};

use crate::common::{with_fault_fields, FaultInjector};

const INPUT_TYPE: &str = "soft_digital_input";
const OUTPUT_TYPE: &str = "soft_digital_output";

/// Simulated digital input.
#[derive(Debug)]
pub struct SoftDigitalInput {
    faults: FaultInjector,
    value: u32,
}

impl DigitalInputDriver for SoftDigitalInput {
    fn read(&mut self, _state: &mut DigitalInputState) -> DeviceResult<u32> {
        self.faults.check("read")?;
        Ok(self.value)
    }

    fn clear(&mut self, _state: &mut DigitalInputState) -> DeviceResult<()> {
        self.faults.check("clear")?;
        self.value = 0;
        Ok(())
    }
}

impl RecordDriver for SoftDigitalInput {
    fn open(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        self.faults.check("open")
    }

    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        match (field, op) {
            ("simulated_value", ProcessOp::Put) => {
                self.value = fields.get_as("simulated_value")?;
                Ok(true)
            }
            ("simulated_value", ProcessOp::Get) => {
                fields.set_internal_as("simulated_value", self.value)?;
                Ok(true)
            }
            _ => self.faults.process(fields, field, op),
        }
    }

    fn as_digital_input(&mut self) -> Option<&mut dyn DigitalInputDriver> {
        Some(self)
    }
}

/// Factory for `soft_digital_input` records.
pub struct SoftDigitalInputFactory;

impl DriverFactory for SoftDigitalInputFactory {
    fn driver_type(&self) -> &'static str {
        INPUT_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::DigitalInput
    }

    fn description(&self) -> &'static str {
        "Digital input driven by a field"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(vec![FieldDescriptor::scalar(
            "simulated_value",
            ScalarType::UInt32,
        )
        .process()
        .in_description()])
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(SoftDigitalInput {
            faults: FaultInjector::from_fields(INPUT_TYPE, fields)?,
            value: fields
                .get_as("simulated_value")
                .map_err(|e| DriverError::from_field(INPUT_TYPE, e))?,
        }))
    }
}

/// Simulated digital output.
#[derive(Debug)]
pub struct SoftDigitalOutput {
    faults: FaultInjector,
    value: u32,
}

impl DigitalOutputDriver for SoftDigitalOutput {
    fn read(&mut self, _state: &mut DigitalOutputState) -> DeviceResult<u32> {
        self.faults.check("read")?;
        Ok(self.value)
    }

    fn write(&mut self, _state: &mut DigitalOutputState, value: u32) -> DeviceResult<()> {
        self.faults.check("write")?;
        self.value = value;
        Ok(())
    }
}

impl RecordDriver for SoftDigitalOutput {
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

    fn as_digital_output(&mut self) -> Option<&mut dyn DigitalOutputDriver> {
        Some(self)
    }
}

/// Factory for `soft_digital_output` records.
pub struct SoftDigitalOutputFactory;

impl DriverFactory for SoftDigitalOutputFactory {
    fn driver_type(&self) -> &'static str {
        OUTPUT_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::DigitalOutput
    }

    fn description(&self) -> &'static str {
        "Digital output register held in memory"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(Vec::new())
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(SoftDigitalOutput {
            faults: FaultInjector::from_fields(OUTPUT_TYPE, fields)?,
            value: fields
                .get_as("value")
                .map_err(|e| DriverError::from_field(OUTPUT_TYPE, e))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_database;
    use daq_records::{DeviceError, FieldValue, RecordDescription};

    #[test]
    fn test_input_follows_simulated_value() {
        let database = open_database(&[RecordDescription::new("di", INPUT_TYPE)
            .with_field("simulated_value", 5)]);
        let di = database.resolve("di").unwrap();
        di.with(|record| {
            assert_eq!(record.digital_input()?.read()?, 5);
            record.write_field("simulated_value", FieldValue::UInt32(0b1010))?;
            assert_eq!(record.read_field("value")?, FieldValue::UInt32(0b1010));
            record.digital_input()?.clear()?;
            assert_eq!(record.read_field("simulated_value")?, FieldValue::UInt32(0));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_output_reads_back() {
        let database = open_database(&[RecordDescription::new("do", OUTPUT_TYPE).with_field("value", 3)]);
        let output = database.resolve("do").unwrap();
        output
            .with(|record| {
                assert_eq!(record.digital_output()?.read()?, 3);
                record.write_field("value", FieldValue::UInt32(0xFF))?;
                assert_eq!(record.digital_output()?.read()?, 0xFF);

                record.write_field("fail_operation", FieldValue::String("write".into()))?;
                assert!(matches!(
                    record.write_field("value", FieldValue::UInt32(1)),
                    Err(DeviceError::HardwareFault(_))
                ));
                assert_eq!(record.fields().get_as::<u32>("value")?, 0xFF);
                Ok(())
            })
            .unwrap();
    }
}
