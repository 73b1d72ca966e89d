//! Typed SSA intermediate representation for small tensor kernels.
//!
//! The IR models kernel functions with structured control flow, memory
//! references (memrefs), cooperative matrices, and BLAS-shaped instructions.
//! Programs are built through [`builder::ProgramBuilder`], verified per
//! instruction at construction time, and handed to the compiler crate for
//! analysis, transformation, and lowering.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod builder;
mod context;
mod dump;
mod error;
mod func;
mod inst;
mod lit;
mod location;
mod region;
mod types;
mod value;
mod verify;

pub use builder::{FunctionBuilder, ProgramBuilder};
pub use context::Context;
pub use dump::{dump_function, dump_program, print_ty};
pub use error::{
    report_error_with_context, CompileError, ErrorKind, ErrorReporter, ADDITIONAL_CONTEXT_LINES,
};
pub use func::{BlasA2, BlasA3, Function, Program, UseIter};
pub use inst::{Immediate, InstClass, InstData, InstId, InstKind, Opcode, ReduceMode};
pub use lit::parse_int_immediate;
pub use location::{Location, Position};
pub use region::{RegionData, RegionId, RegionKind};
pub use types::{
    is_dynamic_value, packed_strides, AddressSpace, AddressSpaceFlags, CoreFeatureFlags,
    FloatFormat, IntWidth, MatrixUse, Transpose, Ty, TypeKind, DYNAMIC,
};
pub use value::{UseData, UseId, ValueData, ValueId};
pub use verify::{check_ir, setup_and_check};
