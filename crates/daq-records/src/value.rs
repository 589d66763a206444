//! Typed field values.
//!
//! Every field of a record holds a [`FieldValue`]: one scalar of a closed set of
//! primitive types, or a homogeneous [`ArrayValue`] of one of them. Values always
//! know their own [`DataType`], which is the type tag carried on the wire and
//! checked by every typed accessor.
//!
//! The [`FieldType`] trait is the typed bridge between Rust primitives and
//! `FieldValue`; it backs `FieldStore::get_as/set_as` and the typed network
//! field calls.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FieldError;

// =============================================================================
// Type tags
// =============================================================================

/// Scalar element type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScalarType {
    /// Boolean flag.
    Bool = 0,
    /// Signed 8-bit integer.
    Int8 = 1,
    /// Signed 16-bit integer.
    Int16 = 2,
    /// Signed 32-bit integer.
    Int32 = 3,
    /// Signed 64-bit integer.
    Int64 = 4,
    /// Unsigned 8-bit integer.
    UInt8 = 5,
    /// Unsigned 16-bit integer.
    UInt16 = 6,
    /// Unsigned 32-bit integer.
    UInt32 = 7,
    /// Unsigned 64-bit integer.
    UInt64 = 8,
    /// Single precision float.
    Float = 9,
    /// Double precision float.
    Double = 10,
    /// UTF-8 string.
    String = 11,
    /// Name of another record in the same database.
    RecordRef = 12,
}

impl ScalarType {
    /// All scalar types, indexed by their wire tag.
    pub const ALL: [ScalarType; 13] = [
        ScalarType::Bool,
        ScalarType::Int8,
        ScalarType::Int16,
        ScalarType::Int32,
        ScalarType::Int64,
        ScalarType::UInt8,
        ScalarType::UInt16,
        ScalarType::UInt32,
        ScalarType::UInt64,
        ScalarType::Float,
        ScalarType::Double,
        ScalarType::String,
        ScalarType::RecordRef,
    ];

    /// Lower-case type name used in messages and descriptions.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int8 => "int8",
            ScalarType::Int16 => "int16",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::UInt8 => "uint8",
            ScalarType::UInt16 => "uint16",
            ScalarType::UInt32 => "uint32",
            ScalarType::UInt64 => "uint64",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::String => "string",
            ScalarType::RecordRef => "record",
        }
    }

    /// True for the signed and unsigned integer types.
    ///
    /// Only integer fields may act as the source of a `DependsOn` dimension.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarType::Int8
                | ScalarType::Int16
                | ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::UInt8
                | ScalarType::UInt16
                | ScalarType::UInt32
                | ScalarType::UInt64
        )
    }

    /// Wire tag of this type.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Inverse of [`ScalarType::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full type of a field: a scalar, or an array of scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Single value.
    Scalar(ScalarType),
    /// Variable-length array; its length comes from the field's dimensions.
    Array(ScalarType),
}

impl DataType {
    /// Element type, for scalars the type itself.
    pub fn element(self) -> ScalarType {
        match self {
            DataType::Scalar(scalar) | DataType::Array(scalar) => scalar,
        }
    }

    /// True for array types.
    pub fn is_array(self) -> bool {
        matches!(self, DataType::Array(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Scalar(scalar) => write!(f, "{scalar}"),
            DataType::Array(scalar) => write!(f, "{scalar}[]"),
        }
    }
}

// =============================================================================
// Values
// =============================================================================

macro_rules! define_values {
    ($($(#[$doc:meta])* $variant:ident => $ty:ty),* $(,)?) => {
        /// A single typed field value.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum FieldValue {
            $($(#[$doc])* $variant($ty),)*
            /// Homogeneous array of one scalar type.
            Array(ArrayValue),
        }

        /// Array storage, one `Vec` per scalar type.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum ArrayValue {
            $($(#[$doc])* $variant(Vec<$ty>),)*
        }

        impl FieldValue {
            /// Type tag of this value.
            pub fn data_type(&self) -> DataType {
                match self {
                    $(FieldValue::$variant(_) => DataType::Scalar(ScalarType::$variant),)*
                    FieldValue::Array(array) => DataType::Array(array.element_type()),
                }
            }

            /// Zero value of a scalar type.
            pub fn default_for(scalar: ScalarType) -> Self {
                match scalar {
                    $(ScalarType::$variant => FieldValue::$variant(<$ty>::default()),)*
                }
            }
        }

        impl ArrayValue {
            /// Element type of the array.
            pub fn element_type(&self) -> ScalarType {
                match self {
                    $(ArrayValue::$variant(_) => ScalarType::$variant,)*
                }
            }

            /// Array of `len` zero values.
            pub fn with_len(scalar: ScalarType, len: usize) -> Self {
                match scalar {
                    $(ScalarType::$variant => ArrayValue::$variant(vec![<$ty>::default(); len]),)*
                }
            }

            /// Number of elements.
            pub fn len(&self) -> usize {
                match self {
                    $(ArrayValue::$variant(items) => items.len(),)*
                }
            }

            /// Element at `index` as a scalar value.
            pub fn element(&self, index: usize) -> Option<FieldValue> {
                match self {
                    $(ArrayValue::$variant(items) => items.get(index).cloned().map(FieldValue::$variant),)*
                }
            }

            /// Store `value` at `index`. Returns false when the index is out
            /// of range or the value has a different type.
            pub fn set_element(&mut self, index: usize, value: FieldValue) -> bool {
                match (self, value) {
                    $((ArrayValue::$variant(items), FieldValue::$variant(item)) => match items.get_mut(index) {
                        Some(slot) => {
                            *slot = item;
                            true
                        }
                        None => false,
                    },)*
                    _ => false,
                }
            }

            /// Truncate or zero-extend to `len` elements.
            pub fn resize(&mut self, len: usize) {
                match self {
                    $(ArrayValue::$variant(items) => items.resize(len, <$ty>::default()),)*
                }
            }

            /// All elements as scalar values.
            pub fn elements(&self) -> Vec<FieldValue> {
                match self {
                    $(ArrayValue::$variant(items) => items.iter().cloned().map(FieldValue::$variant).collect(),)*
                }
            }

            /// Build an array from scalar values; `None` if any element has the
            /// wrong type.
            pub fn from_elements(scalar: ScalarType, elements: Vec<FieldValue>) -> Option<Self> {
                match scalar {
                    $(ScalarType::$variant => elements
                        .into_iter()
                        .map(|element| match element {
                            FieldValue::$variant(item) => Some(item),
                            _ => None,
                        })
                        .collect::<Option<Vec<$ty>>>()
                        .map(ArrayValue::$variant),)*
                }
            }
        }
    };
}

define_values! {
    /// Boolean flag.
    Bool => bool,
    /// Signed 8-bit integer.
    Int8 => i8,
    /// Signed 16-bit integer.
    Int16 => i16,
    /// Signed 32-bit integer.
    Int32 => i32,
    /// Signed 64-bit integer.
    Int64 => i64,
    /// Unsigned 8-bit integer.
    UInt8 => u8,
    /// Unsigned 16-bit integer.
    UInt16 => u16,
    /// Unsigned 32-bit integer.
    UInt32 => u32,
    /// Unsigned 64-bit integer.
    UInt64 => u64,
    /// Single precision float.
    Float => f32,
    /// Double precision float.
    Double => f64,
    /// UTF-8 string.
    String => String,
    /// Name of another record.
    RecordRef => String,
}

impl ArrayValue {
    /// True when the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FieldValue {
    /// Integer view of an integer scalar. Used to resolve dimensions.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::Int8(v) => Some(i64::from(v)),
            FieldValue::Int16(v) => Some(i64::from(v)),
            FieldValue::Int32(v) => Some(i64::from(v)),
            FieldValue::Int64(v) => Some(v),
            FieldValue::UInt8(v) => Some(i64::from(v)),
            FieldValue::UInt16(v) => Some(i64::from(v)),
            FieldValue::UInt32(v) => Some(i64::from(v)),
            FieldValue::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Floating point view of any numeric scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::Float(v) => Some(f64::from(v)),
            FieldValue::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Record name held by a `RecordRef` scalar.
    pub fn as_record_name(&self) -> Option<&str> {
        match self {
            FieldValue::RecordRef(name) => Some(name),
            _ => None,
        }
    }

    /// Coerce a description entry into a value of `data_type`.
    ///
    /// Integers are range-checked against the target width; floats accept
    /// integer literals.
    pub fn from_toml(
        field: &str,
        value: &toml::Value,
        data_type: DataType,
    ) -> Result<FieldValue, FieldError> {
        match data_type {
            DataType::Scalar(scalar) => scalar_from_toml(field, value, scalar),
            DataType::Array(scalar) => {
                let toml::Value::Array(items) = value else {
                    return Err(FieldError::TypeMismatch {
                        field: field.to_string(),
                        expected: data_type,
                        actual: value.type_str().to_string(),
                    });
                };
                let elements = items
                    .iter()
                    .map(|item| scalar_from_toml(field, item, scalar))
                    .collect::<Result<Vec<_>, _>>()?;
                ArrayValue::from_elements(scalar, elements)
                    .map(FieldValue::Array)
                    .ok_or_else(|| FieldError::TypeMismatch {
                        field: field.to_string(),
                        expected: data_type,
                        actual: "mixed array".to_string(),
                    })
            }
        }
    }

    /// Description form of this value, the inverse of [`FieldValue::from_toml`].
    pub fn to_toml(&self) -> toml::Value {
        use toml::Value as T;
        match self {
            FieldValue::Bool(v) => T::Boolean(*v),
            FieldValue::Int8(v) => T::Integer(i64::from(*v)),
            FieldValue::Int16(v) => T::Integer(i64::from(*v)),
            FieldValue::Int32(v) => T::Integer(i64::from(*v)),
            FieldValue::Int64(v) => T::Integer(*v),
            FieldValue::UInt8(v) => T::Integer(i64::from(*v)),
            FieldValue::UInt16(v) => T::Integer(i64::from(*v)),
            FieldValue::UInt32(v) => T::Integer(i64::from(*v)),
            FieldValue::UInt64(v) => i64::try_from(*v)
                .map(T::Integer)
                .unwrap_or(T::Float(*v as f64)),
            FieldValue::Float(v) => T::Float(f64::from(*v)),
            FieldValue::Double(v) => T::Float(*v),
            FieldValue::String(v) | FieldValue::RecordRef(v) => T::String(v.clone()),
            FieldValue::Array(array) => {
                T::Array(array.elements().iter().map(FieldValue::to_toml).collect())
            }
        }
    }
}

fn scalar_from_toml(
    field: &str,
    value: &toml::Value,
    scalar: ScalarType,
) -> Result<FieldValue, FieldError> {
    use toml::Value as T;
    let coerced = match (scalar, value) {
        (ScalarType::Bool, T::Boolean(v)) => FieldValue::Bool(*v),
        (ScalarType::Int8, T::Integer(v)) => FieldValue::Int8(narrow(field, *v)?),
        (ScalarType::Int16, T::Integer(v)) => FieldValue::Int16(narrow(field, *v)?),
        (ScalarType::Int32, T::Integer(v)) => FieldValue::Int32(narrow(field, *v)?),
        (ScalarType::Int64, T::Integer(v)) => FieldValue::Int64(*v),
        (ScalarType::UInt8, T::Integer(v)) => FieldValue::UInt8(narrow(field, *v)?),
        (ScalarType::UInt16, T::Integer(v)) => FieldValue::UInt16(narrow(field, *v)?),
        (ScalarType::UInt32, T::Integer(v)) => FieldValue::UInt32(narrow(field, *v)?),
        (ScalarType::UInt64, T::Integer(v)) => FieldValue::UInt64(narrow(field, *v)?),
        (ScalarType::Float, T::Float(v)) => FieldValue::Float(*v as f32),
        (ScalarType::Float, T::Integer(v)) => FieldValue::Float(*v as f32),
        (ScalarType::Double, T::Float(v)) => FieldValue::Double(*v),
        (ScalarType::Double, T::Integer(v)) => FieldValue::Double(*v as f64),
        (ScalarType::String, T::String(v)) => FieldValue::String(v.clone()),
        (ScalarType::RecordRef, T::String(v)) => FieldValue::RecordRef(v.clone()),
        (_, other) => {
            return Err(FieldError::TypeMismatch {
                field: field.to_string(),
                expected: DataType::Scalar(scalar),
                actual: other.type_str().to_string(),
            })
        }
    };
    Ok(coerced)
}

fn narrow<T: TryFrom<i64>>(field: &str, value: i64) -> Result<T, FieldError> {
    T::try_from(value).map_err(|_| FieldError::InvalidValue {
        field: field.to_string(),
        reason: format!("{value} is out of range for {}", std::any::type_name::<T>()),
    })
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Int8(v) => write!(f, "{v}"),
            FieldValue::Int16(v) => write!(f, "{v}"),
            FieldValue::Int32(v) => write!(f, "{v}"),
            FieldValue::Int64(v) => write!(f, "{v}"),
            FieldValue::UInt8(v) => write!(f, "{v}"),
            FieldValue::UInt16(v) => write!(f, "{v}"),
            FieldValue::UInt32(v) => write!(f, "{v}"),
            FieldValue::UInt64(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Double(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{v:?}"),
            FieldValue::RecordRef(v) => write!(f, "@{v}"),
            FieldValue::Array(array) => {
                f.write_str("[")?;
                for (i, element) in array.elements().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("]")
            }
        }
    }
}

// =============================================================================
// Typed bridge
// =============================================================================

/// Rust types that map onto one [`ScalarType`].
pub trait FieldType: Sized + Clone + Send + 'static {
    /// Scalar type this Rust type maps to.
    const SCALAR: ScalarType;

    /// Wrap into a scalar value.
    fn into_value(self) -> FieldValue;

    /// Extract from a scalar value of exactly this type.
    fn from_value(value: &FieldValue) -> Option<Self>;

    /// Wrap a vector into array storage.
    fn into_array(values: Vec<Self>) -> ArrayValue;

    /// Extract from array storage of exactly this type.
    fn from_array(array: &ArrayValue) -> Option<Vec<Self>>;
}

macro_rules! impl_field_type {
    ($($variant:ident => $ty:ty),* $(,)?) => {$(
        impl FieldType for $ty {
            const SCALAR: ScalarType = ScalarType::$variant;

            fn into_value(self) -> FieldValue {
                FieldValue::$variant(self)
            }

            fn from_value(value: &FieldValue) -> Option<Self> {
                match value {
                    FieldValue::$variant(v) => Some(v.to_owned()),
                    _ => None,
                }
            }

            fn into_array(values: Vec<Self>) -> ArrayValue {
                ArrayValue::$variant(values)
            }

            fn from_array(array: &ArrayValue) -> Option<Vec<Self>> {
                match array {
                    ArrayValue::$variant(items) => Some(items.clone()),
                    _ => None,
                }
            }
        }
    )*};
}

impl_field_type! {
    Bool => bool,
    Int8 => i8,
    Int16 => i16,
    Int32 => i32,
    Int64 => i64,
    UInt8 => u8,
    UInt16 => u16,
    UInt32 => u32,
    UInt64 => u64,
    Float => f32,
    Double => f64,
    String => String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scalar_tags_round_trip() {
        for scalar in ScalarType::ALL {
            assert_eq!(ScalarType::from_tag(scalar.tag()), Some(scalar));
        }
        assert_eq!(ScalarType::from_tag(200), None);
    }

    #[test]
    fn test_array_resize_and_elements() {
        let mut array = ArrayValue::with_len(ScalarType::Double, 3);
        assert_eq!(array.len(), 3);
        assert!(array.set_element(1, FieldValue::Double(2.5)));
        assert!(!array.set_element(3, FieldValue::Double(1.0)));
        assert!(!array.set_element(0, FieldValue::Int32(1)));

        array.resize(5);
        assert_eq!(array.element(1), Some(FieldValue::Double(2.5)));
        assert_eq!(array.element(4), Some(FieldValue::Double(0.0)));

        array.resize(0);
        assert!(array.is_empty());
        assert_eq!(array.element(0), None);
    }

    #[test]
    fn test_toml_coercion_range_checked() {
        let ok = FieldValue::from_toml("n", &toml::Value::Integer(200), DataType::Scalar(ScalarType::UInt8));
        assert_eq!(ok, Ok(FieldValue::UInt8(200)));

        let err = FieldValue::from_toml("n", &toml::Value::Integer(300), DataType::Scalar(ScalarType::UInt8));
        assert!(matches!(err, Err(FieldError::InvalidValue { .. })));

        let err = FieldValue::from_toml(
            "n",
            &toml::Value::String("x".into()),
            DataType::Scalar(ScalarType::Int32),
        );
        assert!(matches!(err, Err(FieldError::TypeMismatch { .. })));
    }

    #[test]
    fn test_toml_array_coercion() {
        let value = toml::Value::Array(vec![toml::Value::Integer(1), toml::Value::Float(2.5)]);
        let coerced = FieldValue::from_toml("offsets", &value, DataType::Array(ScalarType::Double));
        assert_eq!(
            coerced,
            Ok(FieldValue::Array(ArrayValue::Double(vec![1.0, 2.5])))
        );
    }

    #[test]
    fn test_unsigned_overflow_falls_back_to_float() {
        let value = FieldValue::UInt64(u64::MAX);
        assert!(matches!(value.to_toml(), toml::Value::Float(_)));
    }

    fn arb_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i8>().prop_map(FieldValue::Int8),
            any::<i16>().prop_map(FieldValue::Int16),
            any::<i32>().prop_map(FieldValue::Int32),
            any::<i64>().prop_map(FieldValue::Int64),
            any::<u8>().prop_map(FieldValue::UInt8),
            any::<u16>().prop_map(FieldValue::UInt16),
            any::<u32>().prop_map(FieldValue::UInt32),
            (0..=i64::MAX as u64).prop_map(FieldValue::UInt64),
            any::<f32>()
                .prop_filter("finite", |v| v.is_finite())
                .prop_map(FieldValue::Float),
            any::<f64>()
                .prop_filter("finite", |v| v.is_finite())
                .prop_map(FieldValue::Double),
            "[a-z0-9 ]{0,16}".prop_map(FieldValue::String),
        ]
    }

    proptest! {
        #[test]
        fn prop_toml_description_preserves_value(value in arb_value()) {
            let data_type = value.data_type();
            let restored = FieldValue::from_toml("f", &value.to_toml(), data_type);
            prop_assert_eq!(restored, Ok(value));
        }
    }
}
