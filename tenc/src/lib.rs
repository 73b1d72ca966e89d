//! Compiler core lowering tensor-kernel IR to OpenCL-C device binaries.
//!
//! The pipeline takes a verified [`tenc_ir::Program`], runs the analysis
//! and transform passes (alias analysis, lifetime stops, stack assignment,
//! barrier insertion, work-group sizing), lowers every function to an
//! OpenCL-C kernel, and hands the source to an external device compiler
//! behind the [`DeviceCompiler`] trait. The [`recipe`] module bakes
//! recurring kernels (batched small GEMM, axpby, sum, cumsum) into
//! reusable artifacts with argument binders.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod analysis;
mod compile;
mod device;
mod error;
pub mod half;
pub mod pass;
pub mod recipe;
mod tiling;

pub use compile::{
    compile_to_binary, compile_to_opencl, compiler_options, Binary, BundleFormat,
    CompilerArtifact, DeviceCompiler, KernelMetadata, DEFAULT_COMPILER_OPTIONS,
    LARGE_REGISTER_FILE_OPTION_CL, LARGE_REGISTER_FILE_OPTION_ZE,
};
pub use device::{CoreConfig, CoreInfo, IntelGpuArchitecture};
pub use error::Error;
pub use tiling::{
    max_register_block_gemm, suggest_local_tiling, suggest_subgroup_size, BlasShape, LocalTiling,
    MAX_K_UNROLLING,
};

// The IR and the OpenCL-C AST are part of the public surface.
pub use tenc_clc;
pub use tenc_ir;
