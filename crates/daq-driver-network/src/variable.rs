//! Network variables: a local `value` array mirroring a remote variable.
//!
//! Reading `value` fetches the remote array, which must have exactly
//! `num_elements` entries. Writing `value` sends the whole local array.

use daq_network::field::array_len;
use daq_network::NetworkField;
use daq_records::{
    DataType, Database, DeviceError, DeviceResult, Dimension, DriverError, DriverFactory,
    FieldDescriptor, FieldStore, FieldValue, ProcessOp, RecordClass, RecordContext, RecordDriver,
    ScalarType,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteRecord};

#[derive(Debug)]
struct VariableFields {
    value: NetworkField,
}

impl RemoteFields for VariableFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            value: remote.field("value"),
        }
    }
}

/// Variable whose value lives on a remote server.
#[derive(Debug)]
pub struct NetworkVariable {
    remote: Remote<VariableFields>,
    element: ScalarType,
}

impl NetworkVariable {
    fn pull(&self, fields: &mut FieldStore) -> DeviceResult<()> {
        let remote = &self.remote.fields()?.value;
        let value = remote.get_value(DataType::Array(self.element))?;
        let expected = fields.element_count("value")?;
        let actual = array_len(&value).unwrap_or(1);
        if actual != expected {
            return Err(DeviceError::DimensionMismatch {
                field: remote.remote_name(),
                expected,
                actual,
            });
        }
        fields.set_internal("value", value)?;
        Ok(())
    }
}

impl RecordDriver for NetworkVariable {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        match (field, op) {
            ("value", ProcessOp::Get) => self.pull(fields)?,
            ("value", ProcessOp::Put) => {
                let value = fields.get("value")?.clone();
                self.remote.fields()?.value.put_value(value)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Factory for one network variable element type.
#[derive(Debug, Clone, Copy)]
pub struct NetworkVariableFactory {
    driver_type: &'static str,
    element: ScalarType,
}

impl NetworkVariableFactory {
    /// `network_long_variable`: 64-bit integers.
    pub const LONG: Self = Self {
        driver_type: "network_long_variable",
        element: ScalarType::Int64,
    };

    /// `network_double_variable`: doubles.
    pub const DOUBLE: Self = Self {
        driver_type: "network_double_variable",
        element: ScalarType::Double,
    };

    /// `network_string_variable`: strings.
    pub const STRING: Self = Self {
        driver_type: "network_string_variable",
        element: ScalarType::String,
    };

    /// Every network variable type.
    pub const ALL: [Self; 3] = [Self::LONG, Self::DOUBLE, Self::STRING];
}

impl DriverFactory for NetworkVariableFactory {
    fn driver_type(&self) -> &'static str {
        self.driver_type
    }

    fn class(&self) -> RecordClass {
        RecordClass::Variable
    }

    fn description(&self) -> &'static str {
        "Value array held by a remote variable"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        let mut fields = proxy_fields();
        fields.push(
            FieldDescriptor::scalar("num_elements", ScalarType::Int32)
                .with_default(FieldValue::Int32(1))
                .in_description(),
        );
        fields.push(
            FieldDescriptor::array("value", self.element, Dimension::depends_on("num_elements"))
                .process()
                .in_summary(),
        );
        fields
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkVariable {
            remote: Remote::from_fields(self.driver_type, fields)?,
            element: self.element,
        }))
    }
}
