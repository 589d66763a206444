//! Soft scaler: a simulated counter.
//!
//! Counts accumulate at `count_rate` counts per second while counting, plus
//! whatever is written to `inject_counts`. In counter mode the scaler counts
//! from open onward; in preset mode it counts only after `start`, stays busy
//! until the preset is reached and never counts past it. `overflow_threshold`
//! (0 disables it) sets the count at which the overflow flag rises.

use std::time::Instant;
use tracing::debug;

use daq_records::classes::{ScalerDriver, ScalerMode, ScalerState};
use daq_records::{
    ClassState, DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore,
    FieldValue, ProcessOp, RecordClass, RecordContext, RecordDriver, ScalarType,
};

use crate::common::{with_fault_fields, FaultInjector};

const DRIVER_TYPE: &str = "soft_scaler";

/// Simulated scaler.
#[derive(Debug)]
pub struct SoftScaler {
    faults: FaultInjector,
    count_rate: f64,
    overflow_threshold: i64,
    counts: i64,
    counting_since: Option<Instant>,
    preset: Option<i64>,
}

impl SoftScaler {
    fn from_fields(fields: &FieldStore) -> Result<Self, DriverError> {
        let field = |e| DriverError::from_field(DRIVER_TYPE, e);
        Ok(Self {
            faults: FaultInjector::from_fields(DRIVER_TYPE, fields)?,
            count_rate: fields.get_as("count_rate").map_err(field)?,
            overflow_threshold: fields.get_as("overflow_threshold").map_err(field)?,
            counts: 0,
            counting_since: None,
            preset: None,
        })
    }

    /// Counts at `now`, without folding them in.
    fn counts_at(&self, now: Instant) -> i64 {
        let counted = self.counting_since.map_or(0, |since| {
            (self.count_rate * now.saturating_duration_since(since).as_secs_f64()).floor() as i64
        });
        let total = self.counts.saturating_add(counted);
        match self.preset {
            Some(preset) => total.min(preset),
            None => total,
        }
    }

    /// Fold the elapsed counting into `counts`.
    fn settle(&mut self) -> i64 {
        let now = Instant::now();
        self.counts = self.counts_at(now);
        if self.counting_since.is_some() {
            self.counting_since = Some(now);
        }
        self.counts
    }

    fn preset_reached(&self) -> bool {
        self.preset.is_some_and(|preset| self.counts >= preset)
    }

    fn inject(&mut self, counts: i64) {
        self.settle();
        self.counts = self.counts.saturating_add(counts);
        if let Some(preset) = self.preset {
            self.counts = self.counts.min(preset);
        }
        debug!(counts, total = self.counts, "counts injected");
    }
}

impl ScalerDriver for SoftScaler {
    fn clear(&mut self, _state: &mut ScalerState) -> DeviceResult<()> {
        self.faults.check("clear")?;
        self.settle();
        self.counts = 0;
        Ok(())
    }

    fn read(&mut self, _state: &mut ScalerState) -> DeviceResult<i64> {
        self.faults.check("read")?;
        Ok(self.settle())
    }

    fn overflow_set(&mut self, _state: &mut ScalerState) -> DeviceResult<bool> {
        self.faults.check("overflow_set")?;
        let counts = self.settle();
        Ok(self.overflow_threshold > 0 && counts >= self.overflow_threshold)
    }

    fn is_busy(&mut self, state: &mut ScalerState) -> DeviceResult<bool> {
        self.faults.check("is_busy")?;
        self.settle();
        Ok(state.mode == ScalerMode::Preset
            && self.counting_since.is_some()
            && !self.preset_reached())
    }

    fn start(&mut self, state: &mut ScalerState, preset: i64) -> DeviceResult<()> {
        self.faults.check("start")?;
        self.settle();
        self.counts = 0;
        self.preset = match state.mode {
            ScalerMode::Preset => Some(preset),
            ScalerMode::Counter => None,
        };
        self.counting_since = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self, state: &mut ScalerState) -> DeviceResult<i64> {
        self.faults.check("stop")?;
        let started = self.counting_since;
        let counts = self.settle();
        if let Some(since) = started {
            state.measurement_time += since.elapsed().as_secs_f64();
        }
        self.counting_since = None;
        self.preset = None;
        Ok(counts)
    }
}

impl RecordDriver for SoftScaler {
    fn open(&mut self, ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        self.faults.check("open")?;
        if let ClassState::Scaler(state) = ctx.class_state {
            if state.mode == ScalerMode::Counter {
                self.counting_since = Some(Instant::now());
            }
        }
        Ok(())
    }

    fn close(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        self.settle();
        self.counting_since = None;
        Ok(())
    }

    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        match (field, op) {
            ("inject_counts", ProcessOp::Put) => {
                let counts = fields.get_as::<i64>("inject_counts")?;
                if counts < 0 {
                    return Err(DeviceError::invalid_parameter(
                        "inject_counts",
                        "must not be negative",
                    ));
                }
                self.inject(counts);
                Ok(true)
            }
            ("count_rate", ProcessOp::Put) => {
                self.settle();
                self.count_rate = fields.get_as("count_rate")?;
                Ok(true)
            }
            _ => self.faults.process(fields, field, op),
        }
    }

    fn as_scaler(&mut self) -> Option<&mut dyn ScalerDriver> {
        Some(self)
    }
}

/// Factory for `soft_scaler` records.
pub struct SoftScalerFactory;

impl DriverFactory for SoftScalerFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Scaler
    }

    fn description(&self) -> &'static str {
        "Simulated counter with a constant count rate"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(vec![
            FieldDescriptor::scalar("count_rate", ScalarType::Double)
                .process()
                .in_description(),
            FieldDescriptor::scalar("overflow_threshold", ScalarType::Int64).in_description(),
            FieldDescriptor::scalar("inject_counts", ScalarType::Int64)
                .with_default(FieldValue::Int64(0))
                .process(),
        ])
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(SoftScaler::from_fields(fields)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_single;
    use daq_records::RecordDescription;

    #[test]
    fn test_counter_mode_counts_injected_and_clears() {
        let (_db, s1) = open_single(RecordDescription::new("s1", DRIVER_TYPE));
        s1.with(|record| {
            record.write_field("inject_counts", FieldValue::Int64(250))?;
            assert_eq!(record.scaler()?.read()?, 250);
            record.scaler()?.clear()?;
            assert_eq!(record.scaler()?.read()?, 0);
            assert!(!record.scaler()?.is_busy()?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_dark_current_correction() {
        let (_db, s1) = open_single(
            RecordDescription::new("s1", DRIVER_TYPE)
                .with_field("dark_current", 10.0)
                .with_field("measurement_time", 2.0),
        );
        s1.with(|record| {
            record.write_field("inject_counts", FieldValue::Int64(100))?;
            let mut scaler = record.scaler()?;
            assert_eq!(scaler.read()?, 80);
            assert_eq!(scaler.state().raw_value, 100);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_preset_mode_busy_until_preset() {
        let (_db, s1) = open_single(RecordDescription::new("s1", DRIVER_TYPE).with_field("mode", 1));
        s1.with(|record| {
            record.scaler()?.start(100)?;
            assert!(record.scaler()?.is_busy()?);
            record.write_field("inject_counts", FieldValue::Int64(60))?;
            assert!(record.scaler()?.is_busy()?);
            record.write_field("inject_counts", FieldValue::Int64(60))?;
            assert!(!record.scaler()?.is_busy()?);
            assert_eq!(record.scaler()?.stop()?, 100);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_overflow_threshold() {
        let (_db, s1) = open_single(
            RecordDescription::new("s1", DRIVER_TYPE).with_field("overflow_threshold", 10),
        );
        s1.with(|record| {
            assert!(!record.scaler()?.overflow_set()?);
            record.write_field("inject_counts", FieldValue::Int64(10))?;
            assert_eq!(record.read_field("overflow_set")?, FieldValue::Bool(true));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_negative_injection_rejected() {
        let (_db, s1) = open_single(RecordDescription::new("s1", DRIVER_TYPE));
        s1.with(|record| {
            assert!(matches!(
                record.write_field("inject_counts", FieldValue::Int64(-1)),
                Err(DeviceError::InvalidParameter { .. })
            ));
            Ok(())
        })
        .unwrap();
    }
}
