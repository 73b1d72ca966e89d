//! Barrier insertion.
//!
//! A forward dataflow over the control-flow graph tracks, per address
//! space, the alias roots written and read since the last barrier with that
//! space's fence bit. Any node whose accesses conflict with the incoming
//! state gets a barrier in front of it, with the fence masks of all
//! conflicting spaces coalesced into one instruction. Nodes inside SPMD
//! regions never receive barriers; their conflicts hoist to the defining
//! instruction of the nearest enclosing non-SPMD region. The pass is
//! idempotent: an already-present covering barrier suppresses insertion.

use std::collections::{BTreeSet, HashMap};

use tenc_ir::{
    AddressSpace, AddressSpaceFlags, Context, Function, InstId, InstKind, Location, RegionId,
    RegionKind, TypeKind, ValueId,
};

use crate::analysis::{control_flow_graph, AaResults};

const NUM_SPACES: usize = 2;

fn space_index(space: AddressSpace) -> usize {
    match space {
        AddressSpace::Global => 0,
        AddressSpace::Local => 1,
    }
}

fn space_flag(idx: usize) -> AddressSpaceFlags {
    if idx == 0 {
        AddressSpaceFlags::GLOBAL
    } else {
        AddressSpaceFlags::LOCAL
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SpaceState {
    written: BTreeSet<ValueId>,
    read: BTreeSet<ValueId>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct MemState {
    spaces: [SpaceState; NUM_SPACES],
}

impl MemState {
    fn merge(&mut self, other: &MemState) -> bool {
        let mut changed = false;
        for i in 0..NUM_SPACES {
            for &v in &other.spaces[i].written {
                changed |= self.spaces[i].written.insert(v);
            }
            for &v in &other.spaces[i].read {
                changed |= self.spaces[i].read.insert(v);
            }
        }
        changed
    }
}

/// Memref alias roots `inst` reads and writes, tagged by address-space
/// index.
fn accesses(
    ctx: &Context,
    func: &Function,
    aa: &AaResults,
    inst: InstId,
) -> (Vec<(usize, ValueId)>, Vec<(usize, ValueId)>) {
    let mut reads = Vec::new();
    let mut writes = Vec::new();
    {
        let mut push = |list: &mut Vec<(usize, ValueId)>, v: ValueId| {
            if let TypeKind::Memref { addrspace, .. } = ctx.kind(func.value_ty(v)) {
                list.push((space_index(*addrspace), aa.root(v)));
            }
        };
        let ops = func.operand_values(inst);
        match func.inst(inst).kind() {
            InstKind::Axpby { .. } | InstKind::Sum { .. } | InstKind::Cumsum { .. } => {
                push(&mut reads, ops[1]);
                push(&mut reads, ops[3]);
                push(&mut writes, ops[3]);
            }
            InstKind::Gemm { .. } | InstKind::Gemv { .. } | InstKind::Ger | InstKind::Hadamard => {
                push(&mut reads, ops[1]);
                push(&mut reads, ops[2]);
                push(&mut reads, ops[4]);
                push(&mut writes, ops[4]);
            }
            InstKind::Load => push(&mut reads, ops[0]),
            InstKind::Store => push(&mut writes, ops[1]),
            InstKind::CoopmatrixLoad | InstKind::CoopmatrixPrefetch { .. } => {
                push(&mut reads, ops[0]);
            }
            InstKind::CoopmatrixStore => push(&mut writes, ops[1]),
            _ => {}
        }
    }
    (reads, writes)
}

fn transfer(ctx: &Context, func: &Function, aa: &AaResults, inst: InstId, state: &mut MemState) {
    if let InstKind::Barrier { fence } = func.inst(inst).kind() {
        for i in 0..NUM_SPACES {
            if fence.contains(space_flag(i)) {
                state.spaces[i].written.clear();
                state.spaces[i].read.clear();
            }
        }
        return;
    }
    let (reads, writes) = accesses(ctx, func, aa, inst);
    for (space, root) in reads {
        state.spaces[space].read.insert(root);
    }
    for (space, root) in writes {
        state.spaces[space].written.insert(root);
    }
}

fn conflict_mask(
    ctx: &Context,
    func: &Function,
    aa: &AaResults,
    inst: InstId,
    state: &MemState,
) -> AddressSpaceFlags {
    let set_conflicts = |set: &BTreeSet<ValueId>, roots: &[ValueId]| -> bool {
        roots.iter().any(|&r| set.iter().any(|&s| aa.alias(s, r)))
    };
    let (reads, writes) = accesses(ctx, func, aa, inst);
    let mut mask = AddressSpaceFlags::empty();
    for space in 0..NUM_SPACES {
        let read_roots: Vec<ValueId> = reads
            .iter()
            .filter(|(s, _)| *s == space)
            .map(|&(_, r)| r)
            .collect();
        let write_roots: Vec<ValueId> = writes
            .iter()
            .filter(|(s, _)| *s == space)
            .map(|&(_, r)| r)
            .collect();
        let st = &state.spaces[space];
        if set_conflicts(&st.written, &read_roots)
            || set_conflicts(&st.written, &write_roots)
            || set_conflicts(&st.read, &write_roots)
        {
            mask |= space_flag(space);
        }
    }
    mask
}

/// True if `region` or any enclosing region is SPMD.
fn inside_spmd(func: &Function, mut region: RegionId) -> bool {
    loop {
        if func.region(region).kind() == RegionKind::Spmd {
            return true;
        }
        let Some(def) = func.region(region).defining_inst() else {
            return false;
        };
        let Some(parent) = func.inst(def).parent() else {
            return false;
        };
        region = parent;
    }
}

/// The instruction in front of which a barrier for a conflict at `inst` may
/// legally go: `inst` itself, or the defining instruction of the nearest
/// enclosing non-SPMD region.
fn insertion_point(func: &Function, inst: InstId) -> Option<InstId> {
    let mut candidate = inst;
    loop {
        let region = func.inst(candidate).parent()?;
        if !inside_spmd(func, region) {
            return Some(candidate);
        }
        candidate = func.region(region).defining_inst()?;
    }
}

/// Insert barriers into `func` so that shared-memory dependencies are
/// separated by a fence covering the affected address spaces.
pub fn insert_barriers(ctx: &Context, func: &mut Function, aa: &AaResults) {
    let body = func.body();
    let cfg = control_flow_graph(func, body);

    // Forward fixpoint over the CFG; program order keeps iteration counts
    // low on the structured graphs we build.
    let order = func.walk_insts();
    let mut in_states: HashMap<InstId, MemState> = HashMap::new();
    loop {
        let mut changed = false;
        for &n in &order {
            let mut incoming = MemState::default();
            for &p in cfg.predecessors(n) {
                let mut out = in_states.get(&p).cloned().unwrap_or_default();
                transfer(ctx, func, aa, p, &mut out);
                incoming.merge(&out);
            }
            let entry = in_states.entry(n).or_default();
            if entry.merge(&incoming) {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Coalesce fence masks per insertion point.
    let mut targets: Vec<InstId> = Vec::new();
    let mut masks: HashMap<InstId, AddressSpaceFlags> = HashMap::new();
    for &n in &order {
        let Some(state) = in_states.get(&n) else {
            continue;
        };
        let mask = conflict_mask(ctx, func, aa, n, state);
        if mask.is_empty() {
            continue;
        }
        let Some(target) = insertion_point(func, n) else {
            continue;
        };
        let entry = masks.entry(target).or_insert_with(AddressSpaceFlags::empty);
        if entry.is_empty() {
            targets.push(target);
        }
        *entry |= mask;
    }

    for target in targets {
        let mask = masks[&target];
        let Some(region) = func.inst(target).parent() else {
            continue;
        };
        // Idempotence: a covering barrier directly in front suppresses a
        // new one.
        let list = func.region(region).insts();
        let pos = list.iter().position(|&i| i == target).unwrap_or(0);
        if pos > 0 {
            if let InstKind::Barrier { fence } = func.inst(list[pos - 1]).kind() {
                if fence.contains(mask) {
                    continue;
                }
            }
        }
        tracing::debug!(?mask, "inserting barrier");
        let barrier = func.create_inst(
            InstKind::Barrier { fence: mask },
            &[],
            &[],
            0,
            Location::default(),
        );
        func.insert_inst_before(region, target, barrier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::alias_analysis;
    use tenc_ir::{dump_function, packed_strides, Opcode, ProgramBuilder, Transpose};

    fn build_copy_then_gemm() -> (tenc_ir::Program, usize) {
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
        pb.create_function("f", &[in_ty, in_ty], |fb| {
            let loc = Location::default;
            let p = fb.params();
            let f32 = fb.ctx().f32();
            let alpha = fb.constant_one(f32, loc())?;
            let beta = fb.constant_zero(f32, loc())?;
            let tmp = fb.alloca(local_ty, loc())?;
            // Stage A into local memory, then consume it: needs a local fence
            // in between.
            fb.axpby(Transpose::N, alpha, p[0], beta, tmp, loc())?;
            fb.gemm(Transpose::N, Transpose::N, alpha, tmp, p[0], beta, p[1], loc())?;
            Ok(())
        })
        .unwrap();
        (pb.build(), 0)
    }

    #[test]
    fn local_staging_gets_a_barrier() {
        let (mut prog, idx) = build_copy_then_gemm();
        let (ctx, funcs) = prog.split_mut();
        let func = &mut funcs[idx];
        let aa = alias_analysis(func, None);
        insert_barriers(ctx, func, &aa);

        let body = func.body();
        let opcodes: Vec<Opcode> = func
            .region(body)
            .insts()
            .iter()
            .map(|&i| func.inst(i).opcode())
            .collect();
        let barrier_at = opcodes
            .iter()
            .position(|o| *o == Opcode::Barrier)
            .expect("barrier inserted");
        let gemm_at = opcodes.iter().position(|o| *o == Opcode::Gemm).unwrap();
        assert_eq!(barrier_at + 1, gemm_at);
        assert_eq!(
            opcodes.iter().filter(|o| **o == Opcode::Barrier).count(),
            1
        );

        // The fence covers exactly the local address space.
        let barrier_inst = func.region(body).insts()[barrier_at];
        match func.inst(barrier_inst).kind() {
            InstKind::Barrier { fence } => assert_eq!(*fence, AddressSpaceFlags::LOCAL),
            _ => unreachable!(),
        }
    }

    #[test]
    fn insertion_is_idempotent() {
        let (mut prog, idx) = build_copy_then_gemm();
        let (ctx, funcs) = prog.split_mut();
        let func = &mut funcs[idx];
        let aa = alias_analysis(func, None);
        insert_barriers(ctx, func, &aa);
        let once = dump_function(ctx, func);
        let aa = alias_analysis(func, None);
        insert_barriers(ctx, func, &aa);
        let twice = dump_function(ctx, func);
        assert_eq!(once, twice);
    }
}
