//! In-memory driver used by unit tests. Every class operation completes
//! instantly against plain fields.

use std::sync::Arc;

use crate::classes::{
    class_fields, AmplifierDriver, AmplifierState, AreaDetectorDriver, AreaDetectorState,
    AreaDetectorStatus, AutoscaleDriver, AutoscaleState, ChangeRequest, DigitalInputDriver,
    DigitalInputState, DigitalOutputDriver, DigitalOutputState, MotorDriver, MotorState,
    MotorStatus, RelayCommand, RelayDriver, RelayState, RelayStatus, ScaDriver, ScalerDriver,
    ScalerState, TimerDriver, TimerState,
};
use crate::database::Database;
use crate::driver::{DriverFactory, RecordContext, RecordDriver};
use crate::error::{DeviceError, DeviceResult, DriverError};
use crate::fields::{FieldDescriptor, FieldStore, FieldTable};
use crate::record::{Record, RecordClass};
use crate::value::ScalarType;

#[derive(Debug, Default)]
pub(crate) struct StubDriver {
    pub(crate) fail_open: bool,
    pub(crate) position: f64,
    pub(crate) counts: i64,
    pub(crate) elapsed: f64,
    pub(crate) running: bool,
    pub(crate) gain: f64,
    pub(crate) relay: RelayStatus,
    pub(crate) digital: u32,
    pub(crate) monitor: f64,
    pub(crate) changes: Vec<ChangeRequest>,
    pub(crate) armed: bool,
    pub(crate) frames: i64,
}

/// Open record of `class` backed by `driver`, with class fields resolved
/// from `description`.
pub(crate) fn open_record(class: RecordClass, description: &str, driver: StubDriver) -> Record {
    let table = Arc::new(FieldTable::new(class_fields(class)).unwrap());
    let supplied: toml::Table = toml::from_str(description).unwrap();
    let fields = table.resolve(&supplied).unwrap();
    let mut record = Record::new("test", class, "stub", fields, Box::new(driver)).unwrap();
    record.initialize(&Database::new()).unwrap();
    record.open().unwrap();
    record
}

/// Factory for `stub_<class>` driver types. Adds `fail_open` and a `peer`
/// record reference to the class fields.
pub(crate) struct StubFactory {
    pub(crate) class: RecordClass,
    pub(crate) extra: Vec<FieldDescriptor>,
}

impl StubFactory {
    pub(crate) fn new(class: RecordClass) -> Self {
        Self {
            class,
            extra: Vec::new(),
        }
    }
}

impl DriverFactory for StubFactory {
    fn driver_type(&self) -> &'static str {
        match self.class {
            RecordClass::Motor => "stub_motor",
            RecordClass::Scaler => "stub_scaler",
            RecordClass::Timer => "stub_timer",
            RecordClass::Amplifier => "stub_amplifier",
            RecordClass::Relay => "stub_relay",
            RecordClass::DigitalInput => "stub_digital_input",
            RecordClass::DigitalOutput => "stub_digital_output",
            RecordClass::Autoscale => "stub_autoscale",
            RecordClass::Sca => "stub_sca",
            RecordClass::AreaDetector => "stub_area_detector",
            RecordClass::NetworkServer => "stub_network_server",
            RecordClass::Variable => "stub_variable",
        }
    }

    fn class(&self) -> RecordClass {
        self.class
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        let mut fields = vec![
            FieldDescriptor::scalar("fail_open", ScalarType::Bool),
            FieldDescriptor::scalar("peer", ScalarType::RecordRef),
        ];
        fields.extend(self.extra.iter().cloned());
        fields
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let fail_open = fields
            .get_as::<bool>("fail_open")
            .map_err(|e| DriverError::from_field(self.driver_type(), e))?;
        Ok(Box::new(StubDriver {
            fail_open,
            ..StubDriver::default()
        }))
    }
}

impl RecordDriver for StubDriver {
    fn open(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        if self.fail_open {
            return Err(DeviceError::HardwareFault("stub refused to open".into()));
        }
        Ok(())
    }

    fn as_motor(&mut self) -> Option<&mut dyn MotorDriver> {
        Some(self)
    }

    fn as_scaler(&mut self) -> Option<&mut dyn ScalerDriver> {
        Some(self)
    }

    fn as_timer(&mut self) -> Option<&mut dyn TimerDriver> {
        Some(self)
    }

    fn as_amplifier(&mut self) -> Option<&mut dyn AmplifierDriver> {
        Some(self)
    }

    fn as_relay(&mut self) -> Option<&mut dyn RelayDriver> {
        Some(self)
    }

    fn as_digital_input(&mut self) -> Option<&mut dyn DigitalInputDriver> {
        Some(self)
    }

    fn as_digital_output(&mut self) -> Option<&mut dyn DigitalOutputDriver> {
        Some(self)
    }

    fn as_autoscale(&mut self) -> Option<&mut dyn AutoscaleDriver> {
        Some(self)
    }

    fn as_sca(&mut self) -> Option<&mut dyn ScaDriver> {
        Some(self)
    }

    fn as_area_detector(&mut self) -> Option<&mut dyn AreaDetectorDriver> {
        Some(self)
    }
}

impl MotorDriver for StubDriver {
    fn move_absolute(&mut self, _state: &mut MotorState, raw_destination: f64) -> DeviceResult<()> {
        self.position = raw_destination;
        Ok(())
    }

    fn get_position(&mut self, _state: &mut MotorState) -> DeviceResult<f64> {
        Ok(self.position)
    }

    fn soft_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        Ok(())
    }

    fn get_status(&mut self, _state: &mut MotorState) -> DeviceResult<MotorStatus> {
        Ok(MotorStatus::default())
    }
}

impl ScalerDriver for StubDriver {
    fn clear(&mut self, _state: &mut ScalerState) -> DeviceResult<()> {
        self.counts = 0;
        Ok(())
    }

    fn read(&mut self, _state: &mut ScalerState) -> DeviceResult<i64> {
        Ok(self.counts)
    }
}

impl TimerDriver for StubDriver {
    fn start(&mut self, _state: &mut TimerState, seconds: f64) -> DeviceResult<()> {
        self.elapsed = seconds;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, _state: &mut TimerState) -> DeviceResult<f64> {
        self.running = false;
        Ok(self.elapsed)
    }

    fn read(&mut self, _state: &mut TimerState) -> DeviceResult<f64> {
        Ok(self.elapsed)
    }

    fn is_busy(&mut self, _state: &mut TimerState) -> DeviceResult<bool> {
        Ok(self.running)
    }
}

impl AmplifierDriver for StubDriver {
    fn get_gain(&mut self, _state: &mut AmplifierState) -> DeviceResult<f64> {
        Ok(self.gain)
    }

    fn set_gain(&mut self, _state: &mut AmplifierState, gain: f64) -> DeviceResult<()> {
        self.gain = gain;
        Ok(())
    }

    fn set_offset(&mut self, _state: &mut AmplifierState, _offset: f64) -> DeviceResult<()> {
        Ok(())
    }

    fn set_time_constant(&mut self, _state: &mut AmplifierState, _seconds: f64) -> DeviceResult<()> {
        Ok(())
    }
}

impl RelayDriver for StubDriver {
    fn relay_command(&mut self, _state: &mut RelayState, command: RelayCommand) -> DeviceResult<()> {
        self.relay = match command {
            RelayCommand::Open => RelayStatus::Open,
            RelayCommand::Close => RelayStatus::Closed,
        };
        Ok(())
    }

    fn get_relay_status(&mut self, _state: &mut RelayState) -> DeviceResult<RelayStatus> {
        Ok(self.relay)
    }
}

impl DigitalInputDriver for StubDriver {
    fn read(&mut self, _state: &mut DigitalInputState) -> DeviceResult<u32> {
        Ok(self.digital)
    }

    fn clear(&mut self, _state: &mut DigitalInputState) -> DeviceResult<()> {
        self.digital = 0;
        Ok(())
    }
}

impl DigitalOutputDriver for StubDriver {
    fn write(&mut self, _state: &mut DigitalOutputState, value: u32) -> DeviceResult<()> {
        self.digital = value;
        Ok(())
    }
}

impl AutoscaleDriver for StubDriver {
    fn read_monitor(&mut self, _state: &mut AutoscaleState) -> DeviceResult<f64> {
        Ok(self.monitor)
    }

    fn change_control(
        &mut self,
        _state: &mut AutoscaleState,
        request: ChangeRequest,
    ) -> DeviceResult<()> {
        self.changes.push(request);
        Ok(())
    }
}

impl ScaDriver for StubDriver {}

impl AreaDetectorDriver for StubDriver {
    fn arm(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.armed = true;
        Ok(())
    }

    fn trigger(&mut self, state: &mut AreaDetectorState) -> DeviceResult<()> {
        if !self.armed {
            return Err(DeviceError::HardwareFault("trigger before arm".into()));
        }
        state.last_frame_number = self.frames;
        self.frames += 1;
        state.total_num_frames = self.frames;
        Ok(())
    }

    fn stop(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.armed = false;
        Ok(())
    }

    fn get_status(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<AreaDetectorStatus> {
        let bits = if self.armed { AreaDetectorStatus::ARMED } else { 0 };
        Ok(AreaDetectorStatus::from_bits(bits))
    }
}
