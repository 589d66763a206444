//! Soft area detector: timed frame sequences without pixel data.
//!
//! `arm` readies a sequence of `num_frames` frames; `trigger` starts it. Each
//! frame takes `exposure_time` seconds (zero completes the sequence at once).
//! Triggering an unarmed detector is an error.

use std::time::Instant;
use tracing::{debug, info};

use daq_records::classes::{AreaDetectorDriver, AreaDetectorState, AreaDetectorStatus};
use daq_records::{
    DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore,
    FieldValue, ProcessOp, RecordClass, RecordContext, RecordDriver, ScalarType,
};

use crate::common::{with_fault_fields, FaultInjector};

const DRIVER_TYPE: &str = "soft_area_detector";

#[derive(Debug, Clone, Copy)]
struct Sequence {
    started: Instant,
    frames: i64,
    exposure: f64,
}

impl Sequence {
    fn completed(&self) -> i64 {
        if self.exposure <= 0.0 {
            return self.frames;
        }
        let done = (self.started.elapsed().as_secs_f64() / self.exposure).floor();
        (done as i64).min(self.frames)
    }
}

/// Simulated area detector.
#[derive(Debug)]
pub struct SoftAreaDetector {
    faults: FaultInjector,
    num_frames: i64,
    armed: bool,
    sequence: Option<Sequence>,
    /// Frames completed before the current sequence.
    frames_before: i64,
}

impl SoftAreaDetector {
    /// Fold a finished or stopped sequence into the totals.
    fn update(&mut self, state: &mut AreaDetectorState, stopping: bool) {
        if let Some(sequence) = self.sequence {
            let completed = sequence.completed();
            state.total_num_frames = self.frames_before + completed;
            if completed > 0 {
                state.last_frame_number = completed - 1;
            }
            if stopping || completed >= sequence.frames {
                self.frames_before = state.total_num_frames;
                self.sequence = None;
                debug!(frames = completed, "sequence ended");
            }
        }
    }
}

impl AreaDetectorDriver for SoftAreaDetector {
    fn arm(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.faults.check("arm")?;
        self.update(state, false);
        if self.sequence.is_some() {
            return Err(DeviceError::invalid_parameter("arm", "a sequence is running"));
        }
        self.armed = true;
        state.last_frame_number = -1;
        Ok(())
    }

    fn trigger(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.faults.check("trigger")?;
        if !self.armed {
            return Err(DeviceError::invalid_parameter("trigger", "detector is not armed"));
        }
        self.armed = false;
        self.sequence = Some(Sequence {
            started: Instant::now(),
            frames: self.num_frames,
            exposure: state.exposure_time,
        });
        info!(frames = self.num_frames, exposure = state.exposure_time, "sequence started");
        self.update(state, false);
        Ok(())
    }

    fn stop(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.faults.check("stop")?;
        self.update(state, true);
        self.armed = false;
        Ok(())
    }

    fn abort(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.faults.check("abort")?;
        self.update(state, true);
        self.armed = false;
        Ok(())
    }

    fn get_status(&mut self, state: &mut AreaDetectorState) -> DeviceResult<AreaDetectorStatus> {
        self.faults.check("get_status")?;
        self.update(state, false);
        let mut bits = 0;
        if self.sequence.is_some() {
            bits |= AreaDetectorStatus::BUSY;
        }
        if self.armed {
            bits |= AreaDetectorStatus::ARMED;
        }
        Ok(AreaDetectorStatus::from_bits(bits))
    }

    fn get_last_frame_number(&mut self, state: &mut AreaDetectorState) -> DeviceResult<i64> {
        self.faults.check("get_last_frame_number")?;
        self.update(state, false);
        Ok(state.last_frame_number)
    }

    fn get_total_num_frames(&mut self, state: &mut AreaDetectorState) -> DeviceResult<i64> {
        self.faults.check("get_total_num_frames")?;
        self.update(state, false);
        Ok(state.total_num_frames)
    }
}

impl RecordDriver for SoftAreaDetector {
    fn open(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        self.faults.check("open")
    }

    fn close(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        self.sequence = None;
        self.armed = false;
        Ok(())
    }

    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        match (field, op) {
            ("num_frames", ProcessOp::Put) => {
                let frames = fields.get_as::<i32>("num_frames")?;
                if frames < 1 {
                    return Err(DeviceError::invalid_parameter("num_frames", "must be at least 1"));
                }
                self.num_frames = i64::from(frames);
                Ok(true)
            }
            _ => self.faults.process(fields, field, op),
        }
    }

    fn as_area_detector(&mut self) -> Option<&mut dyn AreaDetectorDriver> {
        Some(self)
    }
}

/// Factory for `soft_area_detector` records.
pub struct SoftAreaDetectorFactory;

impl DriverFactory for SoftAreaDetectorFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::AreaDetector
    }

    fn description(&self) -> &'static str {
        "Area detector producing timed frame sequences"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        with_fault_fields(vec![FieldDescriptor::scalar("num_frames", ScalarType::Int32)
            .with_default(FieldValue::Int32(1))
            .process()
            .in_description()])
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let frames = fields
            .get_as::<i32>("num_frames")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        if frames < 1 {
            return Err(DriverError::new(
                DRIVER_TYPE,
                daq_records::DriverErrorKind::Configuration,
                "num_frames must be at least 1",
            ));
        }
        Ok(Box::new(SoftAreaDetector {
            faults: FaultInjector::from_fields(DRIVER_TYPE, fields)?,
            num_frames: i64::from(frames),
            armed: false,
            sequence: None,
            frames_before: 0,
        }))
    }
}
