//! Registry of field tables keyed by record type name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FieldError;
use crate::fields::store::FieldStore;
use crate::fields::table::FieldTable;

/// Maps driver type names to their field tables.
#[derive(Debug, Default, Clone)]
pub struct FieldRegistry {
    tables: HashMap<String, Arc<FieldTable>>,
}

impl FieldRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the table for a type. Returns the table it replaces, if any.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        table: FieldTable,
    ) -> Option<Arc<FieldTable>> {
        self.tables.insert(type_name.into(), Arc::new(table))
    }

    /// Table of a type.
    pub fn table(&self, type_name: &str) -> Option<Arc<FieldTable>> {
        self.tables.get(type_name).cloned()
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a description's fields against the table of `type_name`.
    pub fn resolve(
        &self,
        type_name: &str,
        supplied: &toml::Table,
    ) -> Result<FieldStore, FieldError> {
        let table = self
            .tables
            .get(type_name)
            .ok_or_else(|| FieldError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        table.resolve(supplied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::descriptor::FieldDescriptor;
    use crate::value::ScalarType;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = FieldRegistry::new();
        let table = FieldTable::new(vec![FieldDescriptor::scalar("gain", ScalarType::Double)]).unwrap();
        assert!(registry.register("soft_amplifier", table).is_none());
        assert_eq!(registry.type_names(), vec!["soft_amplifier"]);

        let supplied: toml::Table = toml::from_str("gain = 1e6").unwrap();
        let store = registry.resolve("soft_amplifier", &supplied).unwrap();
        assert_eq!(store.get_as::<f64>("gain").unwrap(), 1e6);

        assert_eq!(
            registry.resolve("nope", &supplied).unwrap_err(),
            FieldError::UnknownType {
                type_name: "nope".into()
            }
        );
    }
}
