//! Batched small-GEMM recipe.
//!
//! Builds a one-kernel program computing `howmany` independent
//! `C_i ← α·op(A_i)·op(B_i) + β·C_i` products. The batch is carried as the
//! dynamic third mode of each operand; one work-group handles one batch
//! element, indexed through the z axis.

use tenc_ir::{Location, ProgramBuilder, Transpose, DYNAMIC};

use crate::device::CoreInfo;
use crate::error::Error;
use crate::recipe::{transpose_tag, ArgValue, CommandList, DeviceMem, Event, RecipeHandler, ScalarType};
use crate::compile::compile_to_opencl;

/// A compiled batched small-GEMM kernel with its argument binder.
pub struct SmallGemmBatched {
    handler: RecipeHandler,
}

impl SmallGemmBatched {
    /// Bake the kernel for fixed shapes, leading dimensions, and batch
    /// strides.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        info: &CoreInfo,
        ty: ScalarType,
        trans_a: Transpose,
        trans_b: Transpose,
        m: i64,
        n: i64,
        k: i64,
        ld_a: i64,
        stride_a: i64,
        ld_b: i64,
        stride_b: i64,
        ld_c: i64,
        stride_c: i64,
    ) -> Result<Self, Error> {
        let sel = |t: Transpose, n1: i64, n2: i64| if t == Transpose::T { n2 } else { n1 };
        let (a_rows, a_cols) = (sel(trans_a, m, k), sel(trans_a, k, m));
        let (b_rows, b_cols) = (sel(trans_b, k, n), sel(trans_b, n, k));

        let kernel_name = format!(
            "gemm_{}{}_m{m}_n{n}_k{k}",
            transpose_tag(trans_a),
            transpose_tag(trans_b)
        );

        let mut pb = ProgramBuilder::new();
        let elt = ty.ty(pb.ctx());
        let a_ty = pb.ctx().get_memref(
            elt,
            &[a_rows, a_cols, DYNAMIC],
            &[1, ld_a, stride_a],
            tenc_ir::AddressSpace::Global,
        )?;
        let b_ty = pb.ctx().get_memref(
            elt,
            &[b_rows, b_cols, DYNAMIC],
            &[1, ld_b, stride_b],
            tenc_ir::AddressSpace::Global,
        )?;
        let c_ty = pb.ctx().get_memref(
            elt,
            &[m, n, DYNAMIC],
            &[1, ld_c, stride_c],
            tenc_ir::AddressSpace::Global,
        )?;

        pb.create_function(
            kernel_name.clone(),
            &[elt, a_ty, b_ty, elt, c_ty],
            |fb| {
                let loc = Location::default;
                let p = fb.params();
                fb.name(p[0], "alpha");
                fb.name(p[1], "A");
                fb.name(p[2], "B");
                fb.name(p[3], "beta");
                fb.name(p[4], "C");
                let gid = fb.group_id(loc())?;
                let a = fb.subview(
                    p[1],
                    &[0, 0, DYNAMIC],
                    &[a_rows, a_cols, 0],
                    &[gid],
                    &[],
                    loc(),
                )?;
                let b = fb.subview(
                    p[2],
                    &[0, 0, DYNAMIC],
                    &[b_rows, b_cols, 0],
                    &[gid],
                    &[],
                    loc(),
                )?;
                let c = fb.subview(p[4], &[0, 0, DYNAMIC], &[m, n, 0], &[gid], &[], loc())?;
                fb.gemm(trans_a, trans_b, p[0], a, b, p[3], c, loc())
            },
        )?;

        let mut prog = pb.build();
        let artifact = compile_to_opencl(&mut prog, info)?;
        Ok(Self {
            handler: RecipeHandler::new(artifact, kernel_name),
        })
    }

    /// Bind the runtime arguments.
    ///
    /// The kernel parameter order is `alpha`, `A`, `A.shape(2)`, `B`,
    /// `B.shape(2)`, `beta`, `C`, `C.shape(2)`; the three dynamic batch
    /// extents all take `howmany`.
    pub fn set_args(
        &mut self,
        howmany: i64,
        alpha: ArgValue,
        a: DeviceMem,
        b: DeviceMem,
        beta: ArgValue,
        c: DeviceMem,
    ) {
        self.handler.bind(
            vec![
                alpha,
                ArgValue::Mem(a),
                ArgValue::I64(howmany),
                ArgValue::Mem(b),
                ArgValue::I64(howmany),
                beta,
                ArgValue::Mem(c),
                ArgValue::I64(howmany),
            ],
            howmany.max(0) as u64,
        );
    }

    /// Enqueue the kernel; one work-group per batch element.
    pub fn submit(
        &self,
        cmd: &mut dyn CommandList,
        wait_for: &[Event],
    ) -> Result<Event, Error> {
        self.handler.submit(cmd, wait_for)
    }

    /// Shared recipe state (artifact, metadata).
    pub fn handler(&self) -> &RecipeHandler {
        &self.handler
    }
}
