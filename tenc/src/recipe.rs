//! Canned kernels with baked argument binders.
//!
//! A recipe builds a one-function program through the builder API, runs the
//! full pipeline, and keeps the resulting artifact together with the
//! argument layout its kernel expects. The runtime side is abstracted as a
//! [`CommandList`]; submission returns an opaque [`Event`].

mod axpby;
mod cumsum;
mod small_gemm_batched;
mod sum;

pub use axpby::Axpby;
pub use cumsum::Cumsum;
pub use small_gemm_batched::SmallGemmBatched;
pub use sum::Sum;

use tenc_ir::{Context, Transpose, Ty};

use crate::compile::{CompilerArtifact, KernelMetadata};
use crate::error::Error;

/// Element type selector for recipe construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// IEEE binary32.
    F32,
    /// IEEE binary64.
    F64,
    /// Complex with f32 components.
    C32,
    /// Complex with f64 components.
    C64,
}

impl ScalarType {
    /// Resolve to an interned type handle.
    pub fn ty(&self, ctx: &Context) -> Ty {
        match self {
            Self::I32 => ctx.i32(),
            Self::I64 => ctx.i64(),
            Self::F32 => ctx.f32(),
            Self::F64 => ctx.f64(),
            Self::C32 => ctx.c32(),
            Self::C64 => ctx.c64(),
        }
    }
}

/// An opaque backend memory handle (device pointer or buffer object).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMem(pub u64);

/// An opaque runtime event token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event(pub u64);

/// One bound kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    /// 32-bit integer argument.
    I32(i32),
    /// 64-bit integer argument.
    I64(i64),
    /// f32 argument.
    F32(f32),
    /// f64 argument.
    F64(f64),
    /// Complex f32 argument.
    C32(f32, f32),
    /// Complex f64 argument.
    C64(f64, f64),
    /// Memory argument.
    Mem(DeviceMem),
}

/// A fully-described kernel launch.
#[derive(Debug, Clone)]
pub struct KernelLaunch<'a> {
    /// Kernel name inside the recipe's binary.
    pub kernel: &'a str,
    /// Arguments in kernel-parameter order.
    pub args: &'a [ArgValue],
    /// Local work size.
    pub local_size: [u32; 3],
    /// Global work size.
    pub global_size: [u64; 3],
    /// Events to wait for.
    pub wait_for: &'a [Event],
}

/// Runtime command list a recipe submits into.
pub trait CommandList {
    /// Enqueue a kernel launch and return its completion event.
    fn enqueue(&mut self, launch: &KernelLaunch<'_>) -> Event;
}

/// Compiled recipe state shared by all recipe kinds.
pub struct RecipeHandler {
    artifact: CompilerArtifact,
    kernel_name: String,
    args: Option<Vec<ArgValue>>,
    group_count: u64,
}

impl RecipeHandler {
    pub(crate) fn new(artifact: CompilerArtifact, kernel_name: String) -> Self {
        Self {
            artifact,
            kernel_name,
            args: None,
            group_count: 1,
        }
    }

    pub(crate) fn bind(&mut self, args: Vec<ArgValue>, group_count: u64) {
        self.args = Some(args);
        self.group_count = group_count;
    }

    /// The compiled artifact (source, options, metadata).
    pub fn artifact(&self) -> &CompilerArtifact {
        &self.artifact
    }

    /// The kernel name this recipe launches.
    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    /// Launch metadata of the recipe's kernel.
    pub fn metadata(&self) -> &KernelMetadata {
        &self.artifact.metadata[&self.kernel_name]
    }

    /// Currently bound arguments, if any.
    pub fn args(&self) -> Option<&[ArgValue]> {
        self.args.as_deref()
    }

    /// Enqueue the kernel with the bound arguments.
    pub fn submit(
        &self,
        cmd: &mut dyn CommandList,
        wait_for: &[Event],
    ) -> Result<Event, Error> {
        let args = self.args.as_deref().ok_or(Error::RecipeArgumentsNotSet)?;
        let md = self.metadata();
        let local = [md.work_group_size[0], md.work_group_size[1], 1];
        let global = [
            md.work_group_size[0] as u64,
            md.work_group_size[1] as u64,
            self.group_count,
        ];
        Ok(cmd.enqueue(&KernelLaunch {
            kernel: &self.kernel_name,
            args,
            local_size: local,
            global_size: global,
            wait_for,
        }))
    }
}

pub(crate) fn transpose_tag(t: Transpose) -> char {
    match t {
        Transpose::N => 'n',
        Transpose::T => 't',
    }
}
