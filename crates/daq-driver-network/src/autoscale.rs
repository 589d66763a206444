//! Network autoscale proxy.
//!
//! The number of control settings and their monitor offsets belong to the
//! remote record. Open copies both into the local record; resizing
//! `num_monitor_offsets` redimensions `monitor_offset_array` and the class
//! bounds-checks offset indices against the copied count.

use tracing::debug;

use daq_network::NetworkField;
use daq_records::classes::autoscale::default_set_parameter;
use daq_records::classes::{
    AutoscaleDriver, AutoscaleParam, AutoscaleState, ChangeRequest, ClassParam, ParamValue,
};
use daq_records::{
    ClassState, Database, DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor,
    FieldStore, RecordClass, RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteParams, RemoteRecord};

const DRIVER_TYPE: &str = "network_autoscale";

#[derive(Debug)]
struct AutoscaleFields {
    monitor_value: NetworkField,
    change_request: NetworkField,
    offset_index: NetworkField,
    num_offsets: NetworkField,
    offsets: NetworkField,
    params: RemoteParams<AutoscaleParam>,
}

impl RemoteFields for AutoscaleFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            monitor_value: remote.field("monitor_value"),
            change_request: remote.field("change_request"),
            offset_index: remote.field("monitor_offset_index"),
            num_offsets: remote.field("num_monitor_offsets"),
            offsets: remote.field("monitor_offset_array"),
            params: RemoteParams::bind(remote),
        }
    }
}

fn remote_index(value: i32) -> DeviceResult<usize> {
    usize::try_from(value)
        .map_err(|_| DeviceError::Protocol(format!("remote offset index {value} is negative")))
}

/// Autoscale controller on a remote server.
#[derive(Debug)]
pub struct NetworkAutoscale {
    remote: Remote<AutoscaleFields>,
}

impl AutoscaleDriver for NetworkAutoscale {
    fn read_monitor(&mut self, _state: &mut AutoscaleState) -> DeviceResult<f64> {
        self.remote.fields()?.monitor_value.get()
    }

    fn get_change_request(&mut self, _state: &mut AutoscaleState) -> DeviceResult<ChangeRequest> {
        ChangeRequest::from_code(self.remote.fields()?.change_request.get()?)
    }

    fn change_control(
        &mut self,
        _state: &mut AutoscaleState,
        request: ChangeRequest,
    ) -> DeviceResult<()> {
        self.remote.fields()?.change_request.put(request.code())
    }

    fn get_offset_index(&mut self, _state: &mut AutoscaleState) -> DeviceResult<usize> {
        remote_index(self.remote.fields()?.offset_index.get()?)
    }

    fn set_offset_index(&mut self, _state: &mut AutoscaleState, index: usize) -> DeviceResult<()> {
        let index = i32::try_from(index)
            .map_err(|_| DeviceError::invalid_parameter("monitor_offset_index", "too large"))?;
        self.remote.fields()?.offset_index.put(index)
    }

    fn get_parameter(
        &mut self,
        state: &mut AutoscaleState,
        param: AutoscaleParam,
    ) -> DeviceResult<ParamValue> {
        let value = self.remote.fields()?.params.get(param)?;
        default_set_parameter(state, param, &value)?;
        Ok(value)
    }

    fn set_parameter(
        &mut self,
        state: &mut AutoscaleState,
        param: AutoscaleParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.remote.fields()?.params.set(param, value)?;
        default_set_parameter(state, param, value)
    }
}

impl RecordDriver for NetworkAutoscale {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
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

        let fields = self.remote.fields()?;
        let count: i32 = fields.num_offsets.get()?;
        let offsets: Vec<f64> = fields.offsets.get_array(remote_index(count)?)?;
        let index = remote_index(fields.offset_index.get()?)?;

        state.set_num_monitor_offsets(offsets.len());
        state.monitor_offsets.clone_from(&offsets);
        state.offset_index = index;
        for &param in AutoscaleParam::ALL {
            self.get_parameter(state, param)?;
        }
        debug!(record = name, count, index, "autoscale proxy opened");

        ctx.fields.set_internal_as("num_monitor_offsets", count)?;
        ctx.fields.set_array_internal("monitor_offset_array", offsets)?;
        Ok(())
    }

    fn as_autoscale(&mut self) -> Option<&mut dyn AutoscaleDriver> {
        Some(self)
    }
}

/// Factory for `network_autoscale` records.
pub struct NetworkAutoscaleFactory;

impl DriverFactory for NetworkAutoscaleFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Autoscale
    }

    fn description(&self) -> &'static str {
        "Autoscale record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkAutoscale {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}
