//! Soft autoscale: a range switch over a simulated monitor.
//!
//! The monitor reads `simulated_monitor` minus the offset of the current
//! control setting. An increase request steps the offset index up, a decrease
//! request steps it down; both stop at the ends of the offset table.

use tracing::debug;

use daq_records::classes::{AutoscaleDriver, AutoscaleState, ChangeRequest};
use daq_records::{
    DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, ProcessOp,
    RecordClass, RecordContext, RecordDriver, ScalarType,
};

use crate::common::{with_fault_fields, FaultInjector};

const DRIVER_TYPE: &str = "soft_autoscale";

/// Simulated autoscale controller.
#[derive(Debug)]
pub struct SoftAutoscale {
    faults: FaultInjector,
    monitor: f64,
}

/// Offset index after applying `request`, kept inside `[0, count)`.
pub(crate) fn stepped_index(index: usize, count: usize, request: ChangeRequest) -> usize {
    match request {
        ChangeRequest::Increase if index + 1 < count => index + 1,
        ChangeRequest::Decrease if index > 0 => index - 1,
        _ => index,
    }
}

impl AutoscaleDriver for SoftAutoscale {
    fn read_monitor(&mut self, state: &mut AutoscaleState) -> DeviceResult<f64> {
        self.faults.check("read_monitor")?;
        Ok(self.monitor - state.current_offset().unwrap_or(0.0))
    }

    fn change_control(
        &mut self,
        state: &mut AutoscaleState,
        request: ChangeRequest,
    ) -> DeviceResult<()> {
        self.faults.check("change_control")?;
        let index = stepped_index(state.offset_index, state.num_monitor_offsets, request);
        debug!(from = state.offset_index, to = index, ?request, "soft autoscale step");
        state.offset_index = index;
        Ok(())
    }

    fn set_offset_index(&mut self, state: &mut AutoscaleState, index: usize) -> DeviceResult<()> {
        self.faults.check("set_offset_index")?;
        state.offset_index = index;
        Ok(())
    }
}

impl RecordDriver for SoftAutoscale {
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
            ("simulated_monitor", ProcessOp::Put) => {
                self.monitor = fields.get_as("simulated_monitor")?;
                Ok(true)
            }
            _ => self.faults.process(fields, field, op),
        }
    }

    fn as_autoscale(&mut self) -> Option<&mut dyn AutoscaleDriver> {
        Some(self)
    }
}

/// Factory for `soft_autoscale` records.
pub struct SoftAutoscaleFactory;

impl DriverFactory for SoftAutoscaleFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Autoscale
    }

    fn description(&self) -> &'static str {
        "Range switch over a field-driven monitor"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(vec![FieldDescriptor::scalar(
            "simulated_monitor",
            ScalarType::Double,
        )
        .process()])
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(SoftAutoscale {
            faults: FaultInjector::from_fields(DRIVER_TYPE, fields)?,
            monitor: fields
                .get_as("simulated_monitor")
                .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?,
        }))
    }
}
