//! Row-sum recipe: `b ← α·sum(op(A)) + β·b`.

use tenc_ir::{Location, ProgramBuilder, Transpose};

use crate::compile::compile_to_opencl;
use crate::device::CoreInfo;
use crate::error::Error;
use crate::recipe::{transpose_tag, ArgValue, CommandList, DeviceMem, Event, RecipeHandler, ScalarType};

/// A compiled matrix-to-vector sum kernel with its argument binder.
pub struct Sum {
    handler: RecipeHandler,
}

impl Sum {
    /// Bake the kernel reducing an `m × k` operand to `m` row sums.
    pub fn new(
        info: &CoreInfo,
        ty: ScalarType,
        trans_a: Transpose,
        m: i64,
        k: i64,
        ld_a: i64,
    ) -> Result<Self, Error> {
        let kernel_name = format!("sum_{}_m{m}_k{k}", transpose_tag(trans_a));
        let (a_rows, a_cols) = if trans_a == Transpose::T { (k, m) } else { (m, k) };

        let mut pb = ProgramBuilder::new();
        let elt = ty.ty(pb.ctx());
        let a_ty = pb.ctx().get_memref(
            elt,
            &[a_rows, a_cols],
            &[1, ld_a],
            tenc_ir::AddressSpace::Global,
        )?;
        let b_ty = pb
            .ctx()
            .get_memref(elt, &[m], &[1], tenc_ir::AddressSpace::Global)?;

        pb.create_function(kernel_name.clone(), &[elt, a_ty, elt, b_ty], |fb| {
            let loc = Location::default;
            let p = fb.params();
            fb.name(p[0], "alpha");
            fb.name(p[1], "A");
            fb.name(p[2], "beta");
            fb.name(p[3], "b");
            fb.sum(trans_a, p[0], p[1], p[2], p[3], loc())
        })?;

        let mut prog = pb.build();
        let artifact = compile_to_opencl(&mut prog, info)?;
        Ok(Self {
            handler: RecipeHandler::new(artifact, kernel_name),
        })
    }

    /// Bind the runtime arguments; parameter order is `alpha`, `A`, `beta`,
    /// `b`.
    pub fn set_args(&mut self, alpha: ArgValue, a: DeviceMem, beta: ArgValue, b: DeviceMem) {
        self.handler
            .bind(vec![alpha, ArgValue::Mem(a), beta, ArgValue::Mem(b)], 1);
    }

    /// Enqueue the kernel.
    pub fn submit(&self, cmd: &mut dyn CommandList, wait_for: &[Event]) -> Result<Event, Error> {
        self.handler.submit(cmd, wait_for)
    }

    /// Shared recipe state (artifact, metadata).
    pub fn handler(&self) -> &RecipeHandler {
        &self.handler
    }
}
