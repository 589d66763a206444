//! Validated field tables and description resolution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FieldError;
use crate::fields::descriptor::{Dimension, FieldDescriptor};
use crate::fields::store::FieldStore;
use crate::value::{ArrayValue, DataType, FieldValue};

/// Largest element count any array field may resolve to.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Ordered, validated list of field descriptors for one record type.
///
/// Construction checks that names are unique, that scalars have no dimensions
/// and arrays at least one, that defaults match the element type, and that
/// every `DependsOn` names an earlier integer scalar.
#[derive(Debug, Clone)]
pub struct FieldTable {
    descriptors: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
    dependents: Vec<Vec<usize>>,
}

impl FieldTable {
    /// Validate and build a table.
    pub fn new(descriptors: Vec<FieldDescriptor>) -> Result<Self, FieldError> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(descriptors.len());
        let mut dependents = vec![Vec::new(); descriptors.len()];

        for (position, descriptor) in descriptors.iter().enumerate() {
            let name = &descriptor.name;
            if index.contains_key(name) {
                return Err(FieldError::DuplicateField {
                    field: name.clone(),
                });
            }

            match (descriptor.data_type, descriptor.dimensions.is_empty()) {
                (DataType::Scalar(_), false) => {
                    return Err(FieldError::InvalidDimension {
                        field: name.clone(),
                        reason: "scalar field declares dimensions".to_string(),
                    })
                }
                (DataType::Array(_), true) => {
                    return Err(FieldError::InvalidDimension {
                        field: name.clone(),
                        reason: "array field declares no dimensions".to_string(),
                    })
                }
                _ => {}
            }

            if let Some(default) = &descriptor.default {
                let expected = DataType::Scalar(descriptor.data_type.element());
                if default.data_type() != expected {
                    return Err(FieldError::TypeMismatch {
                        field: name.clone(),
                        expected,
                        actual: default.data_type().to_string(),
                    });
                }
            }

            for source in descriptor.dimension_sources() {
                let source_position = index.get(source).copied();
                let integer_source = source_position.is_some_and(|i| {
                    matches!(descriptors[i].data_type, DataType::Scalar(s) if s.is_integer())
                });
                match source_position {
                    Some(i) if integer_source => dependents[i].push(position),
                    _ => {
                        return Err(FieldError::UnresolvedDependency {
                            field: name.clone(),
                            depends_on: source.to_string(),
                        })
                    }
                }
            }

            index.insert(name.clone(), position);
        }

        Ok(Self {
            descriptors,
            index,
            dependents,
        })
    }

    /// Table with `more` appended after this table's fields.
    pub fn extend(&self, more: Vec<FieldDescriptor>) -> Result<Self, FieldError> {
        Self::new(self.descriptors.iter().cloned().chain(more).collect())
    }

    /// Descriptors in table order.
    pub fn descriptors(&self) -> &[FieldDescriptor] {
        &self.descriptors
    }

    /// Descriptor by name.
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.position(name).map(|i| &self.descriptors[i])
    }

    /// Table position of a field.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when the table has no fields.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Positions of array fields whose dimensions read the field at `position`.
    pub(crate) fn dependents(&self, position: usize) -> &[usize] {
        self.dependents
            .get(position)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Element count of `descriptor` given the values resolved so far.
    pub(crate) fn resolved_len(
        &self,
        descriptor: &FieldDescriptor,
        values: &[FieldValue],
    ) -> Result<usize, FieldError> {
        let mut len = 1usize;
        for dimension in &descriptor.dimensions {
            let extent = match dimension {
                Dimension::Fixed(n) => *n,
                Dimension::DependsOn(source) => {
                    let unresolved = || FieldError::UnresolvedDependency {
                        field: descriptor.name.clone(),
                        depends_on: source.clone(),
                    };
                    let position = self.position(source).ok_or_else(unresolved)?;
                    let n = values
                        .get(position)
                        .and_then(FieldValue::as_i64)
                        .ok_or_else(unresolved)?;
                    usize::try_from(n).map_err(|_| unresolved())?
                }
            };
            len = len
                .checked_mul(extent)
                .filter(|&len| len <= MAX_ARRAY_LEN)
                .ok_or_else(|| FieldError::InvalidValue {
                    field: descriptor.name.clone(),
                    reason: format!("more than {MAX_ARRAY_LEN} elements"),
                })?;
        }
        Ok(len)
    }

    /// Resolve a record description against this table.
    ///
    /// Walks the descriptors in order. Scalars take the supplied value or the
    /// descriptor default; arrays take exactly their resolved length, filled
    /// from the description (which must match that length) or with defaults.
    /// A dimension of zero gives an empty array.
    pub fn resolve(self: &Arc<Self>, supplied: &toml::Table) -> Result<FieldStore, FieldError> {
        if let Some(unknown) = supplied.keys().find(|key| !self.index.contains_key(*key)) {
            return Err(FieldError::NoSuchField {
                field: unknown.clone(),
            });
        }

        let mut values: Vec<FieldValue> = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            let supplied_value = supplied
                .get(&descriptor.name)
                .map(|raw| FieldValue::from_toml(&descriptor.name, raw, descriptor.data_type))
                .transpose()?;

            let value = match descriptor.data_type {
                DataType::Scalar(_) => {
                    supplied_value.unwrap_or_else(|| descriptor.initial_value())
                }
                DataType::Array(scalar) => {
                    let len = self.resolved_len(descriptor, &values)?;
                    match supplied_value {
                        Some(FieldValue::Array(array)) if array.len() == len => {
                            FieldValue::Array(array)
                        }
                        Some(FieldValue::Array(array)) => {
                            return Err(FieldError::DimensionMismatch {
                                field: descriptor.name.clone(),
                                expected: len,
                                actual: array.len(),
                            })
                        }
                        _ => {
                            let mut array = ArrayValue::with_len(scalar, 0);
                            fit_array(&mut array, descriptor, len);
                            FieldValue::Array(array)
                        }
                    }
                }
            };
            values.push(value);
        }

        Ok(FieldStore::from_parts(Arc::clone(self), values))
    }
}

/// Resize `array` to `len`, filling new elements with the descriptor default.
pub(crate) fn fit_array(array: &mut ArrayValue, descriptor: &FieldDescriptor, len: usize) {
    let old_len = array.len();
    array.resize(len);
    if let Some(fill) = &descriptor.default {
        for i in old_len..len {
            array.set_element(i, fill.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScalarType;

    fn offsets_table() -> Arc<FieldTable> {
        Arc::new(
            FieldTable::new(vec![
                FieldDescriptor::scalar("num_monitor_offsets", ScalarType::Int32).in_description(),
                FieldDescriptor::array(
                    "monitor_offset_array",
                    ScalarType::Double,
                    Dimension::depends_on("num_monitor_offsets"),
                )
                .in_description(),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_depends_on_sizes_array() {
        let table = offsets_table();
        let mut supplied = toml::Table::new();
        supplied.insert("num_monitor_offsets".into(), toml::Value::Integer(4));
        let store = table.resolve(&supplied).unwrap();
        let offsets: Vec<f64> = store.get_array("monitor_offset_array").unwrap();
        assert_eq!(offsets.len(), 4);
    }

    #[test]
    fn test_zero_dimension_gives_empty_array() {
        let table = offsets_table();
        let store = table.resolve(&toml::Table::new()).unwrap();
        let offsets: Vec<f64> = store.get_array("monitor_offset_array").unwrap();
        assert!(offsets.is_empty());
    }

    #[test]
    fn test_supplied_array_must_match_dimension() {
        let table = offsets_table();
        let supplied: toml::Table = toml::from_str(
            "num_monitor_offsets = 2\nmonitor_offset_array = [1.0, 2.0, 3.0]",
        )
        .unwrap();
        let err = table.resolve(&supplied).unwrap_err();
        assert_eq!(
            err,
            FieldError::DimensionMismatch {
                field: "monitor_offset_array".into(),
                expected: 2,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_oversized_dimension_rejected() {
        let table = offsets_table();
        let supplied: toml::Table = toml::from_str("num_monitor_offsets = 2147483647").unwrap();
        assert!(matches!(
            table.resolve(&supplied),
            Err(FieldError::InvalidValue { field, .. }) if field == "monitor_offset_array"
        ));

        let limit = i64::try_from(MAX_ARRAY_LEN).unwrap();
        let mut supplied = toml::Table::new();
        supplied.insert("num_monitor_offsets".into(), toml::Value::Integer(limit));
        let store = table.resolve(&supplied).unwrap();
        assert_eq!(store.element_count("monitor_offset_array").unwrap(), MAX_ARRAY_LEN);
    }

    #[test]
    fn test_negative_dimension_is_unresolved() {
        let table = offsets_table();
        let supplied: toml::Table = toml::from_str("num_monitor_offsets = -1").unwrap();
        assert!(matches!(
            table.resolve(&supplied),
            Err(FieldError::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let err = FieldTable::new(vec![
            FieldDescriptor::array("values", ScalarType::Int32, Dimension::depends_on("count")),
            FieldDescriptor::scalar("count", ScalarType::Int32),
        ])
        .unwrap_err();
        assert!(matches!(err, FieldError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_non_integer_dimension_source_rejected() {
        let err = FieldTable::new(vec![
            FieldDescriptor::scalar("count", ScalarType::Double),
            FieldDescriptor::array("values", ScalarType::Int32, Dimension::depends_on("count")),
        ])
        .unwrap_err();
        assert!(matches!(err, FieldError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_duplicate_and_shape_errors() {
        let dup = FieldTable::new(vec![
            FieldDescriptor::scalar("a", ScalarType::Bool),
            FieldDescriptor::scalar("a", ScalarType::Bool),
        ]);
        assert!(matches!(dup, Err(FieldError::DuplicateField { .. })));

        let mut scalar_with_dims = FieldDescriptor::scalar("a", ScalarType::Bool);
        scalar_with_dims.dimensions.push(Dimension::Fixed(2));
        assert!(matches!(
            FieldTable::new(vec![scalar_with_dims]),
            Err(FieldError::InvalidDimension { .. })
        ));
    }

    #[test]
    fn test_unknown_description_key_rejected() {
        let table = offsets_table();
        let supplied: toml::Table = toml::from_str("bogus = 1").unwrap();
        assert_eq!(
            table.resolve(&supplied).unwrap_err(),
            FieldError::NoSuchField {
                field: "bogus".into()
            }
        );
    }

    #[test]
    fn test_multi_dimensional_array_is_flattened() {
        let table = Arc::new(
            FieldTable::new(vec![
                FieldDescriptor::scalar("rows", ScalarType::UInt16).with_default(FieldValue::UInt16(2)),
                FieldDescriptor::array("grid", ScalarType::Int32, Dimension::depends_on("rows"))
                    .with_dimension(Dimension::Fixed(3))
                    .with_default(FieldValue::Int32(7)),
            ])
            .unwrap(),
        );
        let store = table.resolve(&toml::Table::new()).unwrap();
        let grid: Vec<i32> = store.get_array("grid").unwrap();
        assert_eq!(grid, vec![7; 6]);
    }
}
