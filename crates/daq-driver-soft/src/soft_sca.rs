//! Soft single channel analyzer: discriminator settings held in memory.

use daq_records::classes::{sca, ScaDriver, ScaParam, ScaState};
use daq_records::{
    DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, ParamValue,
    ProcessOp, RecordClass, RecordContext, RecordDriver,
};

use crate::common::{with_fault_fields, FaultInjector};

const DRIVER_TYPE: &str = "soft_sca";

/// Simulated single channel analyzer.
#[derive(Debug)]
pub struct SoftSca {
    faults: FaultInjector,
}

impl ScaDriver for SoftSca {
    fn get_parameter(&mut self, state: &mut ScaState, param: ScaParam) -> DeviceResult<ParamValue> {
        self.faults.check("get_parameter")?;
        sca::default_get_parameter(state, param)
    }

    fn set_parameter(
        &mut self,
        state: &mut ScaState,
        param: ScaParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.faults.check("set_parameter")?;
        sca::default_set_parameter(state, param, value)
    }
}

impl RecordDriver for SoftSca {
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

    fn as_sca(&mut self) -> Option<&mut dyn ScaDriver> {
        Some(self)
    }
}

/// Factory for `soft_sca` records.
pub struct SoftScaFactory;

impl DriverFactory for SoftScaFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Sca
    }

    fn description(&self) -> &'static str {
        "Single channel analyzer settings held in memory"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(Vec::new())
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let lower = fields
            .get_as::<f64>("lower_level")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        let upper = fields
            .get_as::<f64>("upper_level")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        if upper != 0.0 && lower > upper {
            return Err(DriverError::new(
                DRIVER_TYPE,
                daq_records::DriverErrorKind::Configuration,
                format!("lower_level {lower} is above upper_level {upper}"),
            ));
        }
        Ok(Box::new(SoftSca {
            faults: FaultInjector::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}
