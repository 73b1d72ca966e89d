//! Stack-slot assignment for local scratch memory.
//!
//! Walks the function in program order, first-fitting every `alloca` into a
//! free list of byte gaps and releasing slots at the matching
//! `lifetime_stop`. The byte intervals recorded here feed alias analysis:
//! two allocations whose intervals overlap may reuse the same bytes.

use std::collections::HashMap;

use tenc_ir::{Context, Function, InstId, InstKind, RegionId, TypeKind, ValueId};

/// Byte intervals and high-water mark of one function's scratch area.
#[derive(Debug, Default, Clone)]
pub struct StackMap {
    intervals: HashMap<ValueId, (usize, usize)>,
    high_water: usize,
}

impl StackMap {
    /// Byte interval `[start, stop)` per allocation.
    pub fn intervals(&self) -> &HashMap<ValueId, (usize, usize)> {
        &self.intervals
    }

    /// Byte offset of one allocation.
    pub fn offset(&self, v: ValueId) -> Option<usize> {
        self.intervals.get(&v).map(|&(start, _)| start)
    }

    /// Total scratch bytes the function needs.
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

struct Allocation {
    value: ValueId,
    start: usize,
    stop: usize,
}

fn memref_byte_size(ctx: &Context, ty: tenc_ir::Ty) -> (usize, usize) {
    match ctx.kind(ty) {
        TypeKind::Memref { elem, shape, .. } => {
            let elem_size = ctx.size_in_bytes(*elem).unwrap_or(1) as usize;
            let count: usize = shape.iter().map(|&s| s.max(0) as usize).product();
            (elem_size * count, elem_size)
        }
        _ => (0, 1),
    }
}

fn align_up(v: usize, align: usize) -> usize {
    let align = align.max(1);
    v.div_ceil(align) * align
}

fn process_region(
    ctx: &Context,
    func: &mut Function,
    region: RegionId,
    allocs: &mut Vec<Allocation>,
    map: &mut StackMap,
) {
    let insts: Vec<InstId> = func.region(region).insts().to_vec();
    for inst in insts {
        match func.inst(inst).kind().clone() {
            InstKind::Alloca { .. } => {
                let value = func.result(inst);
                let (size, align) = memref_byte_size(ctx, func.value_ty(value));
                // First fit into the sorted gap list.
                let mut start = 0usize;
                let mut insert_at = allocs.len();
                for (idx, a) in allocs.iter().enumerate() {
                    let candidate = align_up(start, align);
                    if candidate + size <= a.start {
                        start = candidate;
                        insert_at = idx;
                        break;
                    }
                    start = start.max(a.stop);
                }
                let start = align_up(start, align);
                let stop = start + size;
                allocs.insert(
                    insert_at,
                    Allocation {
                        value,
                        start,
                        stop,
                    },
                );
                map.intervals.insert(value, (start, stop));
                map.high_water = map.high_water.max(stop);
                if let InstKind::Alloca { stack_ptr } = func.inst_kind_mut(inst) {
                    *stack_ptr = start as i64;
                }
                tracing::trace!(offset = start, size, "assigned stack slot");
            }
            InstKind::LifetimeStop => {
                let object = func.operand(inst, 0);
                allocs.retain(|a| a.value != object);
            }
            _ => {
                let regions = func.inst(inst).regions().to_vec();
                for r in regions {
                    process_region(ctx, func, r, allocs, map);
                }
            }
        }
    }
}

/// Assign scratch byte offsets to every allocation of `func`.
pub fn set_stack_ptrs(ctx: &Context, func: &mut Function) -> StackMap {
    let mut map = StackMap::default();
    let mut allocs = Vec::new();
    let body = func.body();
    process_region(ctx, func, body, &mut allocs, &mut map);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{alias_analysis, insert_lifetime_stops};
    use tenc_ir::{packed_strides, AddressSpace, ProgramBuilder, Transpose};

    #[test]
    fn slots_are_reused_after_lifetime_stop() {
        let mut pb = ProgramBuilder::new();
        let f32 = pb.ctx().f32();
        let local_ty = pb
            .ctx()
            .get_memref(f32, &[8, 8], &packed_strides(&[8, 8]), AddressSpace::Local)
            .unwrap();
        let in_ty = pb
            .ctx()
            .get_memref(f32, &[8, 8], &packed_strides(&[8, 8]), AddressSpace::Global)
            .unwrap();

        pb.create_function("f", &[in_ty], |fb| {
            let loc = tenc_ir::Location::default;
            let p = fb.params();
            let f32 = fb.ctx().f32();
            let alpha = fb.constant_one(f32, loc())?;
            let beta = fb.constant_zero(f32, loc())?;

            let t0 = fb.alloca(local_ty, loc())?;
            fb.axpby(Transpose::N, alpha, p[0], beta, t0, loc())?;
            let t1 = fb.alloca(local_ty, loc())?;
            fb.axpby(Transpose::N, alpha, t0, beta, t1, loc())?;
            // t0 dies here; t2 can reuse its bytes.
            let t2 = fb.alloca(local_ty, loc())?;
            fb.axpby(Transpose::N, alpha, t1, beta, t2, loc())?;
            fb.axpby(Transpose::N, alpha, t2, beta, p[0], loc())?;

            let aa = alias_analysis(fb.func(), None);
            insert_lifetime_stops(fb.func_mut(), &aa);
            let (ctx, func) = fb.split_mut();
            let map = set_stack_ptrs(ctx, func);

            // 8x8 f32 buffers take 256 bytes each; t2 reuses t0's bytes.
            assert_eq!(map.offset(t0), Some(0));
            assert_eq!(map.offset(t1), Some(256));
            assert_eq!(map.offset(t2), Some(0));
            assert_eq!(map.high_water(), 512);

            // With the intervals attached, reused slots alias.
            let aa = alias_analysis(fb.func(), Some(&map));
            assert!(aa.alias(t0, t2));
            assert!(!aa.alias(t0, t1));
            Ok(())
        })
        .unwrap();
    }
}
