//! Field descriptors: name, type, dimensions, flags and default of one field.

use serde::{Deserialize, Serialize};

use crate::value::{DataType, FieldValue, ScalarType};

/// Length of one array dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    /// Length known when the table is written.
    Fixed(usize),
    /// Length equals the current value of an earlier integer field.
    DependsOn(String),
}

impl Dimension {
    /// Dimension taken from the named field.
    pub fn depends_on(field: impl Into<String>) -> Self {
        Dimension::DependsOn(field.into())
    }

    /// Source field name, for `DependsOn`.
    pub fn source(&self) -> Option<&str> {
        match self {
            Dimension::Fixed(_) => None,
            Dimension::DependsOn(field) => Some(field),
        }
    }
}

/// Per-field flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFlags {
    /// Only drivers may write the field.
    pub read_only: bool,
    /// Shown in record summaries.
    pub in_summary: bool,
    /// Written back into a record description.
    pub in_description: bool,
    /// Access through the record runs the class process hook.
    pub process: bool,
}

/// Static description of one field in a type's field table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, unique within the table.
    pub name: String,
    /// Declared type.
    pub data_type: DataType,
    /// Array dimensions, empty for scalars.
    pub dimensions: Vec<Dimension>,
    /// Access flags.
    pub flags: FieldFlags,
    /// Initial value for scalars, fill value for array elements.
    pub default: Option<FieldValue>,
}

impl FieldDescriptor {
    /// Scalar field with a zero default.
    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Scalar(scalar),
            dimensions: Vec::new(),
            flags: FieldFlags::default(),
            default: None,
        }
    }

    /// One-dimensional array field.
    pub fn array(name: impl Into<String>, scalar: ScalarType, dimension: Dimension) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Array(scalar),
            dimensions: vec![dimension],
            flags: FieldFlags::default(),
            default: None,
        }
    }

    /// Append another dimension; storage is the flattened product.
    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Mark read-only.
    pub fn read_only(mut self) -> Self {
        self.flags.read_only = true;
        self
    }

    /// Include in summaries.
    pub fn in_summary(mut self) -> Self {
        self.flags.in_summary = true;
        self
    }

    /// Include in descriptions.
    pub fn in_description(mut self) -> Self {
        self.flags.in_description = true;
        self
    }

    /// Run the class process hook on access.
    pub fn process(mut self) -> Self {
        self.flags.process = true;
        self
    }

    /// Initial scalar value: the default, or the type's zero value.
    pub fn initial_value(&self) -> FieldValue {
        self.default
            .clone()
            .unwrap_or_else(|| FieldValue::default_for(self.data_type.element()))
    }

    /// Names of the fields this descriptor's dimensions depend on.
    pub fn dimension_sources(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().filter_map(Dimension::source)
    }
}
