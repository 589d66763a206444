//! Soft timer: wall-clock gate timer.
//!
//! In preset mode a run ends by itself after the requested time; in counter
//! mode it runs until stopped.

use std::time::Instant;

use daq_records::classes::{TimerDriver, TimerMode, TimerState};
use daq_records::{
    DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, ProcessOp,
    RecordClass, RecordContext, RecordDriver,
};

use crate::common::{with_fault_fields, FaultInjector};

const DRIVER_TYPE: &str = "soft_timer";

#[derive(Debug, Clone, Copy)]
struct Run {
    started: Instant,
    preset: Option<f64>,
}

impl Run {
    fn elapsed(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.preset.map_or(elapsed, |preset| elapsed.min(preset))
    }

    fn finished(&self) -> bool {
        self.preset
            .is_some_and(|preset| self.started.elapsed().as_secs_f64() >= preset)
    }
}

/// Simulated timer.
#[derive(Debug)]
pub struct SoftTimer {
    faults: FaultInjector,
    run: Option<Run>,
    elapsed: f64,
}

impl SoftTimer {
    fn new(faults: FaultInjector) -> Self {
        Self {
            faults,
            run: None,
            elapsed: 0.0,
        }
    }

    fn current(&self) -> f64 {
        self.run.map_or(self.elapsed, |run| run.elapsed())
    }
}

impl TimerDriver for SoftTimer {
    fn start(&mut self, state: &mut TimerState, seconds: f64) -> DeviceResult<()> {
        self.faults.check("start")?;
        let preset = match state.mode {
            TimerMode::Preset => Some(seconds),
            TimerMode::Counter => None,
        };
        self.run = Some(Run {
            started: Instant::now(),
            preset,
        });
        Ok(())
    }

    fn stop(&mut self, _state: &mut TimerState) -> DeviceResult<f64> {
        self.faults.check("stop")?;
        self.elapsed = self.current();
        self.run = None;
        Ok(self.elapsed)
    }

    fn clear(&mut self, _state: &mut TimerState) -> DeviceResult<()> {
        self.faults.check("clear")?;
        self.elapsed = 0.0;
        if let Some(run) = &mut self.run {
            run.started = Instant::now();
        }
        Ok(())
    }

    fn read(&mut self, _state: &mut TimerState) -> DeviceResult<f64> {
        self.faults.check("read")?;
        Ok(self.current())
    }

    fn is_busy(&mut self, _state: &mut TimerState) -> DeviceResult<bool> {
        self.faults.check("is_busy")?;
        match self.run {
            Some(run) if run.finished() => {
                self.elapsed = run.elapsed();
                self.run = None;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }
}

impl RecordDriver for SoftTimer {
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

    fn as_timer(&mut self) -> Option<&mut dyn TimerDriver> {
        Some(self)
    }
}

/// Factory for `soft_timer` records.
pub struct SoftTimerFactory;

impl DriverFactory for SoftTimerFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Timer
    }

    fn description(&self) -> &'static str {
        "Wall-clock gate timer"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(Vec::new())
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(SoftTimer::new(FaultInjector::from_fields(
            DRIVER_TYPE,
            fields,
        )?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_single;
    use daq_records::RecordDescription;

    #[test]
    fn test_preset_run_ends_by_itself() {
        let (_db, t1) = open_single(RecordDescription::new("t1", DRIVER_TYPE));
        t1.with(|record| {
            let mut timer = record.timer()?;
            timer.start(0.0)?;
            assert!(!timer.is_busy()?);
            assert_eq!(timer.state().last_measurement_time, 0.0);

            timer.start(1000.0)?;
            assert!(timer.is_busy()?);
            let elapsed = timer.stop()?;
            assert!(elapsed < 1000.0);
            assert!(!timer.is_busy()?);
            assert_eq!(timer.state().last_measurement_time, elapsed);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_counter_mode_runs_until_stopped() {
        let (_db, t1) = open_single(RecordDescription::new("t1", DRIVER_TYPE).with_field("mode", 1));
        t1.with(|record| {
            let mut timer = record.timer()?;
            assert_eq!(timer.get_mode()?, TimerMode::Counter);
            timer.start(0.0)?;
            assert!(timer.is_busy()?);
            timer.clear()?;
            assert!(timer.read()? < 1.0);
            timer.stop()?;
            assert!(!timer.is_busy()?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_disconnected_timer_fails_open() {
        let database = daq_records::Database::build(
            &crate::testing::registry(),
            &[RecordDescription::new("t1", DRIVER_TYPE).with_field("disconnected", true)],
        )
        .unwrap();
        database.initialize_all().unwrap();
        let failures = database.open_all();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0].1,
            daq_records::DeviceError::HardwareFault(_)
        ));
    }
}
