//! Pipeline error type.

use tenc_ir::CompileError;

/// Errors raised by analyses, passes, and the codegen backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The IR failed verification or a pass-level legality check.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The requested subgroup size is not offered by the device.
    #[error("requested subgroup size {0} not available")]
    UnsupportedSubgroupSize(u32),
    /// A type has no OpenCL-C lowering on this device.
    #[error("type not supported by the OpenCL-C lowering: {0}")]
    UnsupportedType(String),
    /// The device compiler rejected the generated source.
    #[error("device compiler failed: {log}")]
    Backend {
        /// Build log returned by the device compiler.
        log: String,
    },
    /// A recipe was submitted before its arguments were bound.
    #[error("recipe arguments not set")]
    RecipeArgumentsNotSet,
}
