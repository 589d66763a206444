//! Infrastructure shared by the soft drivers.
//!
//! - **faults**: fault injection through record fields
//! - **motion**: trapezoidal motion timing for soft motors

pub mod faults;
pub mod motion;

pub use faults::{fault_fields, FaultInjector};
pub use motion::{Motion, MotionProfile};

use daq_records::FieldDescriptor;

/// Driver type fields followed by the fault fields.
pub fn with_fault_fields(mut fields: Vec<FieldDescriptor>) -> Vec<FieldDescriptor> {
    fields.extend(fault_fields());
    fields
}
