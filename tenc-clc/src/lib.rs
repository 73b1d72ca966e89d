//! A small OpenCL-C abstract syntax tree with a source printer and
//! required-extension inference, used as the lowering target of the tensor
//! compiler.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod ast;
mod ext;
mod printer;

pub use ast::{
    AddrSpace, BinOp, Expr, Kernel, KernelAttribute, KernelParam, Module, Scalar, Stmt, Type, UnOp,
};
pub use ext::{required_extensions, Extension};
pub use printer::{print_expr, print_kernel, print_module, print_type};
