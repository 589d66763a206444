//! # daq-records
//!
//! Record model for instrument control. Every device, server connection and
//! variable is a [`Record`]: a named, typed set of fields plus class-level
//! state and a driver.
//!
//! ## Type hierarchy
//!
//! Records are classified three ways:
//!
//! - **superclass** ([`Superclass`]): device, server or variable,
//! - **class** ([`RecordClass`]): motor, scaler, timer, amplifier, relay,
//!   digital I/O, autoscale, single channel analyzer, area detector, network
//!   server, variable. Each class has one contract (see [`classes`]) shared by
//!   all drivers of that class,
//! - **type**: the driver type name, e.g. `soft_motor` or `network_motor`,
//!   registered through a [`DriverFactory`].
//!
//! ## Fields
//!
//! Each type declares a field table (class fields first, then type fields).
//! Array fields may take their length from an earlier integer field with
//! [`Dimension::DependsOn`]. A record description supplies field values by
//! name; [`FieldTable::resolve`] turns it into a [`FieldStore`] with
//! name-based, type-checked access.
//!
//! ## Database
//!
//! A [`Database`] owns all records, each behind its own mutex. Records refer
//! to one another through [`RecordRef`] and are initialized and opened in
//! dependency order.
//!
//! ## Example
//!
//! ```rust,ignore
//! use daq_records::{config::Settings, logging, DriverRegistry};
//!
//! let settings = Settings::load()?;
//! logging::init(&settings.logging)?;
//!
//! let mut registry = DriverRegistry::new();
//! daq_driver_soft::register_all(&mut registry)?;
//!
//! let database = settings.build_database(&registry)?;
//! database.open_all();
//!
//! let theta = database.get("theta").unwrap();
//! theta.lock().motor()?.move_absolute(12.5)?;
//! ```

pub mod classes;
pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod fields;
pub mod logging;
pub mod record;
pub mod value;

#[cfg(test)]
mod testing;

pub use classes::{ClassParam, ClassState, ParamValue, ProcessOp};
pub use config::{RecordDescription, Settings};
pub use database::{Database, RecordRef, SharedRecord};
pub use driver::{DriverFactory, DriverRegistry, RecordContext, RecordDriver};
pub use error::{
    ConfigError, DeviceError, DeviceResult, DriverError, DriverErrorKind, FieldError,
};
pub use fields::{
    Dimension, FieldDescriptor, FieldFlags, FieldRegistry, FieldSnapshot, FieldStore, FieldTable,
    MAX_ARRAY_LEN,
};
pub use record::{Lifecycle, Record, RecordClass, Superclass};
pub use value::{ArrayValue, DataType, FieldType, FieldValue, ScalarType};
