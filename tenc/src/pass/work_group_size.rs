//! Work-group size selection.
//!
//! Functions declaring `[0, 0]` get a heuristic work-group size derived
//! from their BLAS shapes: a subgroup size (honoring the function's hint)
//! and a local tiling that maximizes utilization on the dominant shape.

use tenc_ir::{Context, Function, TypeKind};

use crate::device::CoreInfo;
use crate::error::Error;
use crate::tiling::{suggest_local_tiling, suggest_subgroup_size, BlasShape};

/// `(M, N)` shapes of all BLAS-shaped instructions in `func`, taken from
/// the accumulated operand.
pub(crate) fn blas_shapes(ctx: &Context, func: &Function) -> Vec<BlasShape> {
    let mut shapes = Vec::new();
    let mut add = |ty: tenc_ir::Ty| {
        if let TypeKind::Memref { elem, shape, .. } = ctx.kind(ty) {
            let elem_size = ctx.size_in_bytes(*elem).unwrap_or(4);
            let m = shape.first().copied().unwrap_or(1);
            let n = shape.get(1).copied().unwrap_or(1);
            shapes.push(BlasShape::new(elem_size, m, n));
        }
    };
    for inst in func.walk_insts() {
        if let Some(a3) = func.as_blas_a3(inst) {
            add(func.value_ty(a3.c));
        } else if let Some(a2) = func.as_blas_a2(inst) {
            add(func.value_ty(a2.b));
        }
    }
    shapes
}

/// Pick and set the work-group size of `func` if it declared `[0, 0]`.
///
/// The chosen size is `[m_tiles·sgs, n_tiles]`; the subgroup size is stored
/// back on the function so codegen and metadata agree.
pub fn set_work_group_size(
    ctx: &Context,
    func: &mut Function,
    info: &CoreInfo,
) -> Result<(), Error> {
    let shapes = blas_shapes(ctx, func);

    let sgs = if func.subgroup_size() != 0 {
        let sgs = func.subgroup_size();
        if !info.subgroup_sizes().contains(&sgs) {
            return Err(Error::UnsupportedSubgroupSize(sgs));
        }
        sgs
    } else {
        suggest_subgroup_size(&shapes, info)
    };
    func.set_subgroup_size(sgs);

    if func.work_group_size() != [0, 0] {
        return Ok(());
    }

    let cfg = info.get_core_config(sgs)?;
    let tiling = suggest_local_tiling(&shapes, &cfg);
    let wgs = tiling.work_group_size(sgs);
    tracing::debug!(kernel = func.name(), ?wgs, sgs, "selected work-group size");
    func.set_work_group_size(wgs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::IntelGpuArchitecture;
    use tenc_ir::{packed_strides, AddressSpace, Location, ProgramBuilder, Transpose};

    #[test]
    fn heuristic_size_covers_the_gemm_shape() {
        let mut pb = ProgramBuilder::new();
        let f32 = pb.ctx().f32();
        let a_ty = pb
            .ctx()
            .get_memref(f32, &[128, 64], &packed_strides(&[128, 64]), AddressSpace::Global)
            .unwrap();
        let b_ty = pb
            .ctx()
            .get_memref(f32, &[64, 128], &packed_strides(&[64, 128]), AddressSpace::Global)
            .unwrap();
        let c_ty = pb
            .ctx()
            .get_memref(f32, &[128, 128], &packed_strides(&[128, 128]), AddressSpace::Global)
            .unwrap();
        pb.create_function("g", &[a_ty, b_ty, c_ty], |fb| {
            let loc = Location::default;
            let p = fb.params();
            let f32 = fb.ctx().f32();
            let alpha = fb.constant_one(f32, loc())?;
            let beta = fb.constant_zero(f32, loc())?;
            fb.gemm(Transpose::N, Transpose::N, alpha, p[0], p[1], beta, p[2], loc())
        })
        .unwrap();
        let mut prog = pb.build();

        let info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
        let (ctx, funcs) = prog.split_mut();
        let func = &mut funcs[0];
        set_work_group_size(ctx, func, &info).unwrap();

        let wgs = func.work_group_size();
        let sgs = func.subgroup_size();
        assert!(info.subgroup_sizes().contains(&sgs));
        assert_eq!(wgs[0] % sgs, 0);
        let cfg = info.get_core_config(sgs).unwrap();
        assert!(wgs[0] * wgs[1] <= cfg.max_number_of_work_items);
        assert!(wgs[0] >= sgs && wgs[1] >= 1);
    }

    #[test]
    fn declared_size_is_kept() {
        let mut pb = ProgramBuilder::new();
        pb.create_function("k", &[], |_| Ok(())).unwrap();
        let mut prog = pb.build();
        let info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
        let (ctx, funcs) = prog.split_mut();
        funcs[0].set_work_group_size([64, 2]);
        funcs[0].set_subgroup_size(16);
        set_work_group_size(ctx, &mut funcs[0], &info).unwrap();
        assert_eq!(funcs[0].work_group_size(), [64, 2]);
        assert_eq!(funcs[0].subgroup_size(), 16);
    }
}
