//! Soft amplifier: gain, offset and time constant held in memory.

use daq_records::classes::{AmplifierDriver, AmplifierState};
use daq_records::{
    DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, ProcessOp,
    RecordClass, RecordContext, RecordDriver,
};

use crate::common::{with_fault_fields, FaultInjector};

const DRIVER_TYPE: &str = "soft_amplifier";

/// Simulated amplifier.
#[derive(Debug)]
pub struct SoftAmplifier {
    faults: FaultInjector,
    gain: f64,
    offset: f64,
    time_constant: f64,
}

impl AmplifierDriver for SoftAmplifier {
    fn get_gain(&mut self, _state: &mut AmplifierState) -> DeviceResult<f64> {
        self.faults.check("get_gain")?;
        Ok(self.gain)
    }

    fn set_gain(&mut self, _state: &mut AmplifierState, gain: f64) -> DeviceResult<()> {
        self.faults.check("set_gain")?;
        self.gain = gain;
        Ok(())
    }

    fn get_offset(&mut self, _state: &mut AmplifierState) -> DeviceResult<f64> {
        self.faults.check("get_offset")?;
        Ok(self.offset)
    }

    fn set_offset(&mut self, _state: &mut AmplifierState, offset: f64) -> DeviceResult<()> {
        self.faults.check("set_offset")?;
        self.offset = offset;
        Ok(())
    }

    fn get_time_constant(&mut self, _state: &mut AmplifierState) -> DeviceResult<f64> {
        self.faults.check("get_time_constant")?;
        Ok(self.time_constant)
    }

    fn set_time_constant(&mut self, _state: &mut AmplifierState, seconds: f64) -> DeviceResult<()> {
        self.faults.check("set_time_constant")?;
        self.time_constant = seconds;
        Ok(())
    }
}

impl RecordDriver for SoftAmplifier {
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

    fn as_amplifier(&mut self) -> Option<&mut dyn AmplifierDriver> {
        Some(self)
    }
}

/// Factory for `soft_amplifier` records.
pub struct SoftAmplifierFactory;

impl DriverFactory for SoftAmplifierFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Amplifier
    }

    fn description(&self) -> &'static str {
        "Amplifier settings held in memory"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(Vec::new())
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let field = |e| DriverError::from_field(DRIVER_TYPE, e);
        Ok(Box::new(SoftAmplifier {
            faults: FaultInjector::from_fields(DRIVER_TYPE, fields)?,
            gain: fields.get_as("gain").map_err(field)?,
            offset: fields.get_as("offset").map_err(field)?,
            time_constant: fields.get_as("time_constant").map_err(field)?,
        }))
    }
}
