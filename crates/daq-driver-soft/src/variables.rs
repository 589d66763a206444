//! Variable records: named, typed value arrays with no device behind them.
//!
//! Every variable carries `num_elements` and a `value` array sized by it.
//! Writing `num_elements` re-dimensions `value`, up to
//! [`MAX_ARRAY_LEN`](daq_records::MAX_ARRAY_LEN) elements.

use daq_records::{
    Dimension, DriverError, DriverFactory, FieldDescriptor, FieldStore, FieldValue, RecordClass,
    RecordDriver, ScalarType,
};

/// Variable driver. The value lives entirely in the record's fields.
#[derive(Debug, Default)]
pub struct Variable;

impl RecordDriver for Variable {}

/// Factory for one variable element type.
#[derive(Debug, Clone, Copy)]
pub struct VariableFactory {
    driver_type: &'static str,
    element: ScalarType,
}

impl VariableFactory {
    /// `long_variable`: 64-bit integers.
    pub const LONG: Self = Self {
        driver_type: "long_variable",
        element: ScalarType::Int64,
    };

    /// `double_variable`: doubles.
    pub const DOUBLE: Self = Self {
        driver_type: "double_variable",
        element: ScalarType::Double,
    };

    /// `string_variable`: strings.
    pub const STRING: Self = Self {
        driver_type: "string_variable",
        element: ScalarType::String,
    };

    /// Every variable type.
    pub const ALL: [Self; 3] = [Self::LONG, Self::DOUBLE, Self::STRING];
}

impl DriverFactory for VariableFactory {
    fn driver_type(&self) -> &'static str {
        self.driver_type
    }

    fn class(&self) -> RecordClass {
        RecordClass::Variable
    }

    fn description(&self) -> &'static str {
        "Value array held in the record"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("num_elements", ScalarType::Int32)
                .with_default(FieldValue::Int32(1))
                .in_description(),
            FieldDescriptor::array("value", self.element, Dimension::depends_on("num_elements"))
                .in_summary()
                .in_description(),
        ]
    }

    fn create(&self, _fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(Variable))
    }
}
