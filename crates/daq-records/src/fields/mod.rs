//! Field reflection: descriptors, validated tables, per-record stores and the
//! type registry.
//!
//! A record type declares its fields once as a [`FieldTable`]. Resolving a
//! record description against the table yields a [`FieldStore`], which gives
//! name-based, type-checked access to every field. Array fields may take their
//! length from an earlier integer field ([`Dimension::DependsOn`]); the store
//! keeps those lengths in step when the source changes.

pub mod descriptor;
pub mod registry;
pub mod store;
pub mod table;

pub use descriptor::{Dimension, FieldDescriptor, FieldFlags};
pub use registry::FieldRegistry;
pub use store::{FieldSnapshot, FieldStore};
pub use table::{FieldTable, MAX_ARRAY_LEN};
