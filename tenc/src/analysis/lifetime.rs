//! Lifetime analysis of stack allocations.
//!
//! Scans each region backwards and inserts a `lifetime_stop` immediately
//! after the last use of every `alloca` defined in that region. Uses are
//! alias-root aware, so a store through a subview keeps the underlying
//! allocation alive. Nested regions are processed inside-out during the
//! scan; an allocation used inside a loop body therefore either ends inside
//! the body or after the loop instruction itself, never in between.

use std::collections::HashSet;

use tenc_ir::{Function, InstId, InstKind, Location, RegionId, ValueId};

use super::alias::AaResults;

/// Values whose backing storage `inst` touches, recursing into child
/// regions (which are processed for insertion on the way).
fn tracked_operands(
    func: &mut Function,
    aa: &AaResults,
    inst: InstId,
) -> HashSet<ValueId> {
    let kind = func.inst(inst).kind().clone();
    let ops = func.operand_values(inst);
    let results = func.inst(inst).results().to_vec();
    match kind {
        InstKind::Alloca { .. } => [results[0]].into_iter().collect(),
        InstKind::LifetimeStop => [ops[0]].into_iter().collect(),
        InstKind::Axpby { .. } | InstKind::Sum { .. } | InstKind::Cumsum { .. } => {
            [ops[1], ops[3]].into_iter().collect()
        }
        InstKind::Gemm { .. } | InstKind::Gemv { .. } | InstKind::Ger | InstKind::Hadamard => {
            [ops[1], ops[2], ops[4]].into_iter().collect()
        }
        InstKind::Subview { .. } | InstKind::Expand { .. } | InstKind::Fuse { .. } => {
            [ops[0], results[0]].into_iter().collect()
        }
        InstKind::Load => {
            let mut s: HashSet<ValueId> = [ops[0]].into_iter().collect();
            s.insert(results[0]);
            s
        }
        InstKind::Store => [ops[1]].into_iter().collect(),
        InstKind::Size { .. } => [ops[0]].into_iter().collect(),
        InstKind::CoopmatrixLoad | InstKind::CoopmatrixPrefetch { .. } => {
            [ops[0]].into_iter().collect()
        }
        InstKind::CoopmatrixStore => [ops[1]].into_iter().collect(),
        InstKind::For { .. }
        | InstKind::Foreach { .. }
        | InstKind::Parallel
        | InstKind::CoopmatrixApply => {
            let body = func.inst(inst).regions()[0];
            process_region(func, aa, body)
        }
        InstKind::If => {
            let then_r = func.inst(inst).regions()[0];
            let else_r = func.inst(inst).regions()[1];
            let mut s = process_region(func, aa, then_r);
            s.extend(process_region(func, aa, else_r));
            s
        }
        _ => HashSet::new(),
    }
}

/// Insert lifetime stops into `region`, returning the tracked values the
/// region touches (for the enclosing scan).
fn process_region(func: &mut Function, aa: &AaResults, region: RegionId) -> HashSet<ValueId> {
    // Allocas defined directly in this region, in program order.
    let mut allocas: Vec<ValueId> = func
        .region(region)
        .insts()
        .iter()
        .filter(|&&i| matches!(func.inst(i).kind(), InstKind::Alloca { .. }))
        .map(|&i| func.result(i))
        .collect();

    let mut region_ops: HashSet<ValueId> = HashSet::new();

    let mut i = func.region(region).insts().len();
    while i > 0 {
        let inst = func.region(region).insts()[i - 1];
        let operands = tracked_operands(func, aa, inst);
        region_ops.extend(operands.iter().copied());
        let roots: HashSet<ValueId> = operands.iter().map(|&v| aa.root(v)).collect();
        if matches!(func.inst(inst).kind(), InstKind::LifetimeStop) {
            // An existing stop already ends this lifetime; re-running the
            // pass must not add another one.
            let object = func.operand(inst, 0);
            allocas.retain(|a| *a != object);
            i -= 1;
            continue;
        }
        while let Some(pos) = allocas.iter().position(|a| roots.contains(a)) {
            let alloca = allocas.remove(pos);
            let stop = func.create_inst(
                InstKind::LifetimeStop,
                &[alloca],
                &[],
                0,
                Location::default(),
            );
            let list = func.region(region).insts();
            if i < list.len() {
                let before = list[i];
                func.insert_inst_before(region, before, stop);
            } else {
                func.append_inst(region, stop);
            }
        }
        i -= 1;
    }

    region_ops
}

/// Insert `lifetime_stop` instructions after the last use of every stack
/// allocation in `func`.
pub fn insert_lifetime_stops(func: &mut Function, aa: &AaResults) {
    let body = func.body();
    process_region(func, aa, body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::alias_analysis;
    use tenc_ir::{packed_strides, AddressSpace, Opcode, ProgramBuilder, Transpose};

    #[test]
    fn stop_follows_last_use_through_views() {
        let mut pb = ProgramBuilder::new();
        let f32 = pb.ctx().f32();
        let local_ty = pb
            .ctx()
            .get_memref(f32, &[16, 16], &packed_strides(&[16, 16]), AddressSpace::Local)
            .unwrap();
        let in_ty = pb
            .ctx()
            .get_memref(f32, &[16, 16], &packed_strides(&[16, 16]), AddressSpace::Global)
            .unwrap();

        pb.create_function("f", &[in_ty, in_ty], |fb| {
            let loc = tenc_ir::Location::default;
            let p = fb.params();
            let f32 = fb.ctx().f32();
            let tmp = fb.alloca(local_ty, loc())?;
            let alpha = fb.constant_one(f32, loc())?;
            let beta = fb.constant_zero(f32, loc())?;
            // Copy into the scratch buffer, multiply out of it, then do an
            // unrelated copy. The scratch lifetime ends after the gemm.
            fb.axpby(Transpose::N, alpha, p[0], beta, tmp, loc())?;
            let view = fb.subview(tmp, &[0, 0], &[16, 16], &[], &[], loc())?;
            fb.gemm(Transpose::N, Transpose::N, alpha, view, p[0], beta, p[1], loc())?;
            fb.axpby(Transpose::N, alpha, p[0], beta, p[1], loc())?;

            let aa = alias_analysis(fb.func(), None);
            insert_lifetime_stops(fb.func_mut(), &aa);

            let func = fb.func();
            let body = func.body();
            let opcodes: Vec<Opcode> = func
                .region(body)
                .insts()
                .iter()
                .map(|&i| func.inst(i).opcode())
                .collect();
            let stop_at = opcodes
                .iter()
                .position(|o| *o == Opcode::LifetimeStop)
                .expect("lifetime stop inserted");
            let gemm_at = opcodes.iter().position(|o| *o == Opcode::Gemm).unwrap();
            let last_axpby = opcodes.iter().rposition(|o| *o == Opcode::Axpby).unwrap();
            assert_eq!(stop_at, gemm_at + 1);
            assert!(stop_at < last_axpby);
            // Exactly one stop for the single alloca.
            assert_eq!(
                opcodes.iter().filter(|o| **o == Opcode::LifetimeStop).count(),
                1
            );
            Ok(())
        })
        .unwrap();
    }
}
