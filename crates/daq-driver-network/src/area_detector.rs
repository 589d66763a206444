//! Network area detector proxy.
//!
//! Frame geometry is pulled at open so the class can refuse a bin size that
//! does not divide the remote frame before anything is sent.

use tracing::debug;

use daq_network::NetworkField;
use daq_records::classes::area_detector::default_set_parameter;
use daq_records::classes::{
    AreaDetectorDriver, AreaDetectorParam, AreaDetectorState, AreaDetectorStatus, ClassParam,
    ParamValue,
};
use daq_records::{
    ClassState, Database, DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor,
    FieldStore, RecordClass, RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteParams, RemoteRecord};

const DRIVER_TYPE: &str = "network_area_detector";

#[derive(Debug)]
struct AreaDetectorFields {
    arm: NetworkField,
    trigger: NetworkField,
    stop: NetworkField,
    abort: NetworkField,
    status: NetworkField,
    last_frame_number: NetworkField,
    total_num_frames: NetworkField,
    params: RemoteParams<AreaDetectorParam>,
}

impl RemoteFields for AreaDetectorFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            arm: remote.field("arm"),
            trigger: remote.field("trigger"),
            stop: remote.field("stop"),
            abort: remote.field("abort"),
            status: remote.field("status"),
            last_frame_number: remote.field("last_frame_number"),
            total_num_frames: remote.field("total_num_frames"),
            params: RemoteParams::bind(remote),
        }
    }
}

/// Area detector on a remote server.
#[derive(Debug)]
pub struct NetworkAreaDetector {
    remote: Remote<AreaDetectorFields>,
}

impl AreaDetectorDriver for NetworkAreaDetector {
    fn arm(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.remote.fields()?.arm.put(true)
    }

    fn trigger(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.remote.fields()?.trigger.put(true)
    }

    fn stop(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.remote.fields()?.stop.put(true)
    }

    fn abort(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<()> {
        self.remote.fields()?.abort.put(true)
    }

    fn get_status(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<AreaDetectorStatus> {
        let bits: u32 = self.remote.fields()?.status.get()?;
        Ok(AreaDetectorStatus::from_bits(bits))
    }

    fn get_last_frame_number(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<i64> {
        self.remote.fields()?.last_frame_number.get()
    }

    fn get_total_num_frames(&mut self, _state: &mut AreaDetectorState) -> DeviceResult<i64> {
        self.remote.fields()?.total_num_frames.get()
    }

    fn get_parameter(
        &mut self,
        state: &mut AreaDetectorState,
        param: AreaDetectorParam,
    ) -> DeviceResult<ParamValue> {
        let value = self.remote.fields()?.params.get(param)?;
        default_set_parameter(state, param, &value)?;
        Ok(value)
    }

    fn set_parameter(
        &mut self,
        state: &mut AreaDetectorState,
        param: AreaDetectorParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.remote.fields()?.params.set(param, value)?;
        default_set_parameter(state, param, value)
    }
}

impl RecordDriver for NetworkAreaDetector {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn open(&mut self, ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        let name = ctx.name;
        let actual = ctx.class_state.class();
        let ClassState::AreaDetector(state) = &mut *ctx.class_state else {
            return Err(DeviceError::WrongClass {
                record: name.to_string(),
                expected: RecordClass::AreaDetector,
                actual,
            });
        };
        for &param in AreaDetectorParam::ALL {
            self.get_parameter(state, param)?;
        }
        debug!(
            record = name,
            framesize = ?state.framesize,
            binsize = ?state.binsize,
            "area detector proxy opened"
        );
        ctx.fields.set_array_internal("framesize", state.framesize.to_vec())?;
        ctx.fields.set_array_internal("binsize", state.binsize.to_vec())?;
        Ok(())
    }

    fn as_area_detector(&mut self) -> Option<&mut dyn AreaDetectorDriver> {
        Some(self)
    }
}

/// Factory for `network_area_detector` records.
pub struct NetworkAreaDetectorFactory;

impl DriverFactory for NetworkAreaDetectorFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::AreaDetector
    }

    fn description(&self) -> &'static str {
        "Area detector record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkAreaDetector {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}
