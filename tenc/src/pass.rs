//! Transform passes.
//!
//! The pipeline runs them in a fixed order: SPMD legality check, lifetime
//! stops, stack assignment, barrier insertion, work-group sizing, and the
//! lowering to OpenCL-C.

mod barrier;
mod lower;
mod work_group_size;

pub use barrier::insert_barriers;
pub use lower::{lower_function, LoweredKernel};
pub use work_group_size::set_work_group_size;
