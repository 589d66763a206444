//! Served database used by unit tests.

use std::sync::Arc;

use crate::codec::MAX_BODY_LEN;

use daq_records::{
    Database, DeviceError, DeviceResult, Dimension, DriverError, DriverFactory, DriverRegistry,
    FieldDescriptor, FieldStore, ProcessOp, RecordClass, RecordDescription,
    RecordDriver, ScalarType,
};

struct TestVariable;

impl RecordDriver for TestVariable {
    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        match (field, op) {
            ("fault", ProcessOp::Put) if fields.get_as::<bool>("fault")? => {
                Err(DeviceError::HardwareFault("injected fault".into()))
            }
            ("fault", _) => Ok(true),
            ("blob", ProcessOp::Get) => {
                fields.set_internal_as("blob", "x".repeat(MAX_BODY_LEN))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct TestVariableFactory;

impl DriverFactory for TestVariableFactory {
    fn driver_type(&self) -> &'static str {
        "test_variable"
    }

    fn class(&self) -> RecordClass {
        RecordClass::Variable
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("value", ScalarType::Double).in_description(),
            FieldDescriptor::scalar("count", ScalarType::Int32).in_description(),
            FieldDescriptor::array("items", ScalarType::Double, Dimension::depends_on("count"))
                .in_description(),
            FieldDescriptor::scalar("label", ScalarType::String).in_description(),
            FieldDescriptor::scalar("fault", ScalarType::Bool).process(),
            FieldDescriptor::scalar("blob", ScalarType::String).read_only().process(),
        ]
    }

    fn create(&self, _fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(TestVariable))
    }
}

/// Opened database with one `test_variable` record named `var`:
/// `value = 0.0`, `count = 3`, `items = [1, 2, 3]`.
pub(crate) fn served_database() -> Arc<Database> {
    let mut registry = DriverRegistry::new();
    registry.register(TestVariableFactory).unwrap();
    let description = RecordDescription::new("var", "test_variable")
        .with_field("count", 3)
        .with_field(
            "items",
            toml::Value::Array(vec![1.0.into(), 2.0.into(), 3.0.into()]),
        );
    let database = Database::build(&registry, &[description]).unwrap();
    database.initialize_all().unwrap();
    assert!(database.open_all().is_empty());
    Arc::new(database)
}
