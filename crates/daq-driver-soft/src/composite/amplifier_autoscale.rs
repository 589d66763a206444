//! Amplifier autoscale: switches an amplifier's gain range from a scaler
//! reading.
//!
//! Offset index `i` selects gain `gain_base · gain_step^i`. The monitor value
//! is the scaler's dark-corrected count minus the monitor offset of the
//! current index. An increase request moves one range up, a decrease one
//! range down; both stop at the ends of the offset table. At open the index
//! is taken from the amplifier's current gain, or the amplifier is set to the
//! first range when its gain matches none.

use tracing::{debug, info};

use daq_records::classes::{AutoscaleDriver, AutoscaleState, ChangeRequest};
use daq_records::{
    ClassState, Database, DeviceError, DeviceResult, DriverError, DriverErrorKind, DriverFactory,
    FieldDescriptor, FieldStore, FieldValue, RecordClass, RecordContext, RecordDriver,
    ScalarType,
};

use super::Child;
use crate::soft_autoscale::stepped_index;

const DRIVER_TYPE: &str = "amplifier_autoscale";

/// Range switch over a scaler monitor and an amplifier control.
#[derive(Debug)]
pub struct AmplifierAutoscale {
    monitor: Child,
    control: Child,
    gain_base: f64,
    gain_step: f64,
}

impl AmplifierAutoscale {
    fn from_fields(fields: &FieldStore) -> Result<Self, DriverError> {
        let field = |e| DriverError::from_field(DRIVER_TYPE, e);
        let gain_base: f64 = fields.get_as("gain_base").map_err(field)?;
        let gain_step: f64 = fields.get_as("gain_step").map_err(field)?;
        if gain_base <= 0.0 || gain_step <= 0.0 {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                format!("gain_base {gain_base} and gain_step {gain_step} must be positive"),
            ));
        }
        Ok(Self {
            monitor: Child::from_field(fields, "monitor").map_err(field)?,
            control: Child::from_field(fields, "control").map_err(field)?,
            gain_base,
            gain_step,
        })
    }

    /// Gain selected by offset index `index`.
    pub fn gain_for(&self, index: usize) -> f64 {
        let power = i32::try_from(index).unwrap_or(i32::MAX);
        self.gain_base * self.gain_step.powi(power)
    }

    /// Offset index whose gain matches `gain`, if any.
    fn index_for(&self, gain: f64, count: usize) -> Option<usize> {
        (0..count).find(|&index| {
            let expected = self.gain_for(index);
            (gain - expected).abs() <= 1e-9 * expected.abs()
        })
    }

    fn apply(&self, state: &mut AutoscaleState, index: usize) -> DeviceResult<()> {
        let gain = self.gain_for(index);
        self.control
            .with(|record| record.amplifier()?.set_gain(gain))?;
        debug!(from = state.offset_index, to = index, gain, "gain range changed");
        state.offset_index = index;
        Ok(())
    }
}

impl AutoscaleDriver for AmplifierAutoscale {
    fn read_monitor(&mut self, state: &mut AutoscaleState) -> DeviceResult<f64> {
        let counts = self.monitor.with(|record| record.scaler()?.read())?;
        Ok(counts as f64 - state.current_offset().unwrap_or(0.0))
    }

    fn change_control(
        &mut self,
        state: &mut AutoscaleState,
        request: ChangeRequest,
    ) -> DeviceResult<()> {
        let index = stepped_index(state.offset_index, state.num_monitor_offsets, request);
        if index == state.offset_index {
            return Ok(());
        }
        self.apply(state, index)
    }

    fn set_offset_index(&mut self, state: &mut AutoscaleState, index: usize) -> DeviceResult<()> {
        self.apply(state, index)
    }
}

impl RecordDriver for AmplifierAutoscale {
    fn initialize(&mut self, _ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.monitor.bind(database)?;
        self.control.bind(database)
    }

    fn open(&mut self, ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        let name = ctx.name;
        let actual = ctx.class_state.class();
        let ClassState::Autoscale(state) = &mut *ctx.class_state else {
            return Err(DeviceError::WrongClass {
                record: name.to_string(),
                expected: RecordClass::Autoscale,
                actual,
            });
        };
        if state.num_monitor_offsets == 0 {
            return Ok(());
        }
        let gain = self.control.with(|record| record.amplifier()?.get_gain())?;
        match self.index_for(gain, state.num_monitor_offsets) {
            Some(index) => {
                state.offset_index = index;
                Ok(())
            }
            None => {
                info!(record = name, gain, "amplifier gain outside the ranges, selecting the first");
                self.apply(state, 0)
            }
        }
    }

    fn as_autoscale(&mut self) -> Option<&mut dyn AutoscaleDriver> {
        Some(self)
    }
}

/// Factory for `amplifier_autoscale` records.
pub struct AmplifierAutoscaleFactory;

impl DriverFactory for AmplifierAutoscaleFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Autoscale
    }

    fn description(&self) -> &'static str {
        "Amplifier gain ranging driven by a scaler"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        use ScalarType::{Double, RecordRef};
        vec![
            FieldDescriptor::scalar("monitor", RecordRef).in_description(),
            FieldDescriptor::scalar("control", RecordRef).in_description(),
            FieldDescriptor::scalar("gain_base", Double)
                .with_default(FieldValue::Double(1.0))
                .in_description(),
            FieldDescriptor::scalar("gain_step", Double)
                .with_default(FieldValue::Double(10.0))
                .in_description(),
        ]
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(AmplifierAutoscale::from_fields(fields)?))
    }
}
