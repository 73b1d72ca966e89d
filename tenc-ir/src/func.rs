//! Functions, programs, and the per-function IR arena.
//!
//! All IR entities of a function live in one arena and are addressed by
//! index handles. Use lists are intrusive and doubly linked; every mutation
//! of operand slots goes through [`Function::add_use`] /
//! [`Function::remove_use`] / [`Function::set_operand_value`] so the lists
//! stay consistent.

use crate::context::Context;
use crate::error::{CompileError, ErrorKind};
use crate::inst::{InstData, InstId, InstKind};
use crate::location::Location;
use crate::region::{RegionData, RegionId, RegionKind};
use crate::types::{CoreFeatureFlags, Transpose, Ty};
use crate::value::{UseData, UseId, ValueData, ValueId};

/// Operand view of a BLAS two-operand instruction (`axpby`, `sum`,
/// `cumsum`): `[alpha, A, beta, B]`.
#[derive(Debug, Clone, Copy)]
pub struct BlasA2 {
    /// Scaling factor of op(A).
    pub alpha: ValueId,
    /// Input memref.
    pub a: ValueId,
    /// Scaling factor of B.
    pub beta: ValueId,
    /// Output memref.
    pub b: ValueId,
    /// Transpose flag of A.
    pub trans_a: Transpose,
}

/// Operand view of a BLAS three-operand instruction (`gemm`, `gemv`, `ger`,
/// `hadamard`): `[alpha, A, B, beta, C]`.
#[derive(Debug, Clone, Copy)]
pub struct BlasA3 {
    /// Scaling factor of the product.
    pub alpha: ValueId,
    /// First input memref.
    pub a: ValueId,
    /// Second input memref.
    pub b: ValueId,
    /// Scaling factor of C.
    pub beta: ValueId,
    /// Accumulated output memref.
    pub c: ValueId,
    /// Transpose flag of A.
    pub trans_a: Transpose,
    /// Transpose flag of B.
    pub trans_b: Transpose,
}

/// A named kernel function with a body region and launch configuration.
pub struct Function {
    name: String,
    ctx_id: u64,
    body: RegionId,
    work_group_size: [u32; 2],
    subgroup_size: u32,
    core_features: CoreFeatureFlags,
    values: Vec<ValueData>,
    uses: Vec<UseData>,
    insts: Vec<InstData>,
    regions: Vec<RegionData>,
}

impl Function {
    /// Create an empty function whose body region is collective.
    pub fn new(ctx: &Context, name: impl Into<String>) -> Self {
        let mut f = Self {
            name: name.into(),
            ctx_id: ctx.id(),
            body: RegionId(0),
            work_group_size: [0, 0],
            subgroup_size: 0,
            core_features: CoreFeatureFlags::empty(),
            values: Vec::new(),
            uses: Vec::new(),
            insts: Vec::new(),
            regions: Vec::new(),
        };
        f.body = f.new_region(RegionKind::Collective, None);
        f
    }

    /// Function name, used as the kernel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the owning context.
    pub fn context_id(&self) -> u64 {
        self.ctx_id
    }

    /// Body region.
    pub fn body(&self) -> RegionId {
        self.body
    }

    /// Declared work-group size; `[0, 0]` requests a heuristic choice.
    pub fn work_group_size(&self) -> [u32; 2] {
        self.work_group_size
    }

    /// Set the work-group size.
    pub fn set_work_group_size(&mut self, wgs: [u32; 2]) {
        self.work_group_size = wgs;
    }

    /// Subgroup-size hint; 0 leaves the choice to the compiler.
    pub fn subgroup_size(&self) -> u32 {
        self.subgroup_size
    }

    /// Set the subgroup-size hint.
    pub fn set_subgroup_size(&mut self, sgs: u32) {
        self.subgroup_size = sgs;
    }

    /// Core features this function requires from the device.
    pub fn core_features(&self) -> CoreFeatureFlags {
        self.core_features
    }

    /// Set the required core features.
    pub fn set_core_features(&mut self, flags: CoreFeatureFlags) {
        self.core_features = flags;
    }

    /* ---------------- regions ---------------- */

    pub(crate) fn new_region(&mut self, kind: RegionKind, def_inst: Option<InstId>) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(RegionData {
            kind,
            params: Vec::new(),
            insts: Vec::new(),
            def_inst,
            loc: Location::default(),
        });
        id
    }

    /// Region storage.
    pub fn region(&self, r: RegionId) -> &RegionData {
        &self.regions[r.index()]
    }

    pub(crate) fn region_mut(&mut self, r: RegionId) -> &mut RegionData {
        &mut self.regions[r.index()]
    }

    /// Set the execution discipline of a region.
    pub fn set_region_kind(&mut self, r: RegionId, kind: RegionKind) {
        self.regions[r.index()].kind = kind;
    }

    /// Replace the parameter list of `r` by fresh values of the given types.
    pub fn set_region_params(&mut self, r: RegionId, tys: &[Ty]) -> Vec<ValueId> {
        let params: Vec<ValueId> = tys.iter().map(|&ty| self.new_value(ty, None)).collect();
        self.regions[r.index()].params = params.clone();
        params
    }

    /* ---------------- values and uses ---------------- */

    /// Create a value; `def` is its defining instruction, absent for region
    /// parameters.
    pub fn new_value(&mut self, ty: Ty, def: Option<InstId>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            ty,
            name: None,
            def,
            first_use: None,
        });
        id
    }

    /// Value storage.
    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v.index()]
    }

    /// Type of a value.
    pub fn value_ty(&self, v: ValueId) -> Ty {
        self.values[v.index()].ty
    }

    /// Assign a display name.
    pub fn set_value_name(&mut self, v: ValueId, name: impl Into<String>) {
        self.values[v.index()].name = Some(name.into());
    }

    /// Display name: `%name` if assigned, otherwise `%<slot>`.
    pub fn display_name(&self, v: ValueId) -> String {
        match &self.values[v.index()].name {
            Some(n) => format!("%{n}"),
            None => format!("%{}", v.0),
        }
    }

    /// Use storage.
    pub fn use_data(&self, u: UseId) -> &UseData {
        &self.uses[u.index()]
    }

    /// Append a use of `value` owned by `owner`, linked at the head of the
    /// value's use list.
    pub fn add_use(&mut self, owner: InstId, value: ValueId) -> UseId {
        let id = UseId(self.uses.len() as u32);
        let old_head = self.values[value.index()].first_use;
        self.uses.push(UseData {
            value,
            owner,
            prev: None,
            next: old_head,
        });
        if let Some(h) = old_head {
            self.uses[h.index()].prev = Some(id);
        }
        self.values[value.index()].first_use = Some(id);
        id
    }

    /// Splice a use out of its value's list. The slot stays allocated but
    /// unreachable.
    pub fn remove_use(&mut self, u: UseId) {
        let (value, prev, next) = {
            let ud = &self.uses[u.index()];
            (ud.value, ud.prev, ud.next)
        };
        match prev {
            Some(p) => self.uses[p.index()].next = next,
            None => self.values[value.index()].first_use = next,
        }
        if let Some(n) = next {
            self.uses[n.index()].prev = prev;
        }
        self.uses[u.index()].prev = None;
        self.uses[u.index()].next = None;
    }

    /// Redirect a use to a different value, keeping both lists consistent.
    pub fn set_operand_value(&mut self, u: UseId, new_value: ValueId) {
        self.remove_use(u);
        let owner = self.uses[u.index()].owner;
        let old_head = self.values[new_value.index()].first_use;
        {
            let ud = &mut self.uses[u.index()];
            ud.value = new_value;
            ud.owner = owner;
            ud.next = old_head;
            ud.prev = None;
        }
        if let Some(h) = old_head {
            self.uses[h.index()].prev = Some(u);
        }
        self.values[new_value.index()].first_use = Some(u);
    }

    /// Iterate over all uses of `v`.
    pub fn uses(&self, v: ValueId) -> UseIter<'_> {
        UseIter {
            func: self,
            next: self.values[v.index()].first_use,
        }
    }

    /* ---------------- instructions ---------------- */

    /// Create a detached instruction with operand uses, fresh result values,
    /// and `num_regions` fresh child regions.
    pub fn create_inst(
        &mut self,
        kind: InstKind,
        operands: &[ValueId],
        result_tys: &[Ty],
        num_regions: usize,
        loc: Location,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(InstData {
            kind,
            operands: Vec::with_capacity(operands.len()),
            results: Vec::with_capacity(result_tys.len()),
            regions: Vec::with_capacity(num_regions),
            parent: None,
            loc,
        });
        for &op in operands {
            let u = self.add_use(id, op);
            self.insts[id.index()].operands.push(u);
        }
        for &ty in result_tys {
            let v = self.new_value(ty, Some(id));
            self.insts[id.index()].results.push(v);
        }
        for _ in 0..num_regions {
            let r = self.new_region(RegionKind::Mixed, Some(id));
            self.insts[id.index()].regions.push(r);
        }
        id
    }

    /// Instruction storage.
    pub fn inst(&self, i: InstId) -> &InstData {
        &self.insts[i.index()]
    }

    pub(crate) fn inst_mut(&mut self, i: InstId) -> &mut InstData {
        &mut self.insts[i.index()]
    }

    /// Mutable payload access for passes (e.g. the stack pass writing the
    /// assigned offset). Does not re-run verification.
    pub fn inst_kind_mut(&mut self, i: InstId) -> &mut InstKind {
        &mut self.insts[i.index()].kind
    }

    /// Value of operand slot `slot`.
    pub fn operand(&self, i: InstId, slot: usize) -> ValueId {
        self.uses[self.insts[i.index()].operands[slot].index()].value
    }

    /// All operand values in slot order.
    pub fn operand_values(&self, i: InstId) -> Vec<ValueId> {
        self.insts[i.index()]
            .operands
            .iter()
            .map(|u| self.uses[u.index()].value)
            .collect()
    }

    /// Number of operand slots.
    pub fn num_operands(&self, i: InstId) -> usize {
        self.insts[i.index()].operands.len()
    }

    /// Sole result of a single-result instruction.
    pub fn result(&self, i: InstId) -> ValueId {
        self.insts[i.index()].results[0]
    }

    /// Append `inst` at the end of `region`.
    pub fn append_inst(&mut self, region: RegionId, inst: InstId) {
        self.insts[inst.index()].parent = Some(region);
        self.regions[region.index()].insts.push(inst);
    }

    /// Insert `inst` into `region` immediately before `before`.
    pub fn insert_inst_before(&mut self, region: RegionId, before: InstId, inst: InstId) {
        let pos = self.regions[region.index()]
            .insts
            .iter()
            .position(|&i| i == before)
            .unwrap_or(self.regions[region.index()].insts.len());
        self.insts[inst.index()].parent = Some(region);
        self.regions[region.index()].insts.insert(pos, inst);
    }

    /// Insert `inst` into `region` immediately after `after`.
    pub fn insert_inst_after(&mut self, region: RegionId, after: InstId, inst: InstId) {
        let pos = self.regions[region.index()]
            .insts
            .iter()
            .position(|&i| i == after)
            .map(|p| p + 1)
            .unwrap_or(self.regions[region.index()].insts.len());
        self.insts[inst.index()].parent = Some(region);
        self.regions[region.index()].insts.insert(pos, inst);
    }

    /// Detach `inst` from its region and splice all of its operand uses out
    /// of their use lists. Child regions are emptied recursively.
    pub fn remove_inst(&mut self, inst: InstId) {
        if let Some(parent) = self.insts[inst.index()].parent.take() {
            self.regions[parent.index()].insts.retain(|&i| i != inst);
        }
        let operand_uses = self.insts[inst.index()].operands.clone();
        for u in operand_uses {
            self.remove_use(u);
        }
        self.insts[inst.index()].operands.clear();
        let child_regions = self.insts[inst.index()].regions.clone();
        for r in child_regions {
            let children = self.regions[r.index()].insts.clone();
            for c in children {
                self.remove_inst(c);
            }
        }
    }

    /* ---------------- capability views ---------------- */

    /// View a BLAS two-operand instruction's operands, if `inst` is one.
    pub fn as_blas_a2(&self, inst: InstId) -> Option<BlasA2> {
        let data = &self.insts[inst.index()];
        let trans_a = match data.kind {
            InstKind::Axpby { trans_a } | InstKind::Sum { trans_a } => trans_a,
            InstKind::Cumsum { .. } => Transpose::N,
            _ => return None,
        };
        Some(BlasA2 {
            alpha: self.operand(inst, 0),
            a: self.operand(inst, 1),
            beta: self.operand(inst, 2),
            b: self.operand(inst, 3),
            trans_a,
        })
    }

    /// View a BLAS three-operand instruction's operands, if `inst` is one.
    pub fn as_blas_a3(&self, inst: InstId) -> Option<BlasA3> {
        let data = &self.insts[inst.index()];
        let (trans_a, trans_b) = match data.kind {
            InstKind::Gemm { trans_a, trans_b } => (trans_a, trans_b),
            InstKind::Gemv { trans_a } => (trans_a, Transpose::N),
            InstKind::Ger | InstKind::Hadamard => (Transpose::N, Transpose::N),
            _ => return None,
        };
        Some(BlasA3 {
            alpha: self.operand(inst, 0),
            a: self.operand(inst, 1),
            b: self.operand(inst, 2),
            beta: self.operand(inst, 3),
            c: self.operand(inst, 4),
            trans_a,
            trans_b,
        })
    }

    /// Walk all instructions of the function, pre-order, outermost first.
    pub fn walk_insts(&self) -> Vec<InstId> {
        let mut out = Vec::new();
        let mut stack = vec![self.body];
        while let Some(r) = stack.pop() {
            for &i in &self.regions[r.index()].insts {
                out.push(i);
                for &cr in self.insts[i.index()].regions.iter().rev() {
                    stack.push(cr);
                }
            }
        }
        out
    }
}

/// Iterator over the uses of a value.
pub struct UseIter<'a> {
    func: &'a Function,
    next: Option<UseId>,
}

impl<'a> Iterator for UseIter<'a> {
    type Item = UseId;

    fn next(&mut self) -> Option<UseId> {
        let cur = self.next?;
        self.next = self.func.uses[cur.index()].next;
        Some(cur)
    }
}

/// An ordered list of functions sharing one context.
pub struct Program {
    ctx: Context,
    functions: Vec<Function>,
}

impl Program {
    /// Program with no functions.
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            functions: Vec::new(),
        }
    }

    /// The owning context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Mutable access to the owning context.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Functions in order.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Mutable access to the functions.
    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    /// Split borrow for passes that mutate functions while consulting the
    /// context.
    pub fn split_mut(&mut self) -> (&Context, &mut [Function]) {
        (&self.ctx, &mut self.functions)
    }

    /// Append a function; rejects functions built against another context.
    pub fn push_function(&mut self, f: Function) -> Result<(), CompileError> {
        if f.context_id() != self.ctx.id() {
            return Err(CompileError::new(Location::default(), ErrorKind::ContextMismatch));
        }
        self.functions.push(f);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Immediate;

    #[test]
    fn use_lists_stay_consistent() {
        let ctx = Context::new();
        let mut f = Function::new(&ctx, "t");
        let i32_ty = ctx.i32();

        let c = f.create_inst(
            InstKind::Constant(Immediate::Int(1)),
            &[],
            &[i32_ty],
            0,
            Location::default(),
        );
        let v = f.result(c);
        let body = f.body();
        f.append_inst(body, c);

        let add1 = f.create_inst(InstKind::Add, &[v, v], &[i32_ty], 0, Location::default());
        f.append_inst(body, add1);
        let add2 = f.create_inst(
            InstKind::Add,
            &[v, f.result(add1)],
            &[i32_ty],
            0,
            Location::default(),
        );
        f.append_inst(body, add2);

        // Three uses of v: two in add1, one in add2; each names v exactly once.
        let uses: Vec<_> = f.uses(v).collect();
        assert_eq!(uses.len(), 3);
        for u in &uses {
            assert_eq!(f.use_data(*u).value(), v);
        }
        let owners: Vec<_> = uses.iter().map(|u| f.use_data(*u).owner()).collect();
        assert_eq!(owners.iter().filter(|&&o| o == add1).count(), 2);
        assert_eq!(owners.iter().filter(|&&o| o == add2).count(), 1);

        // Removing add1 splices its uses out and leaves the rest intact.
        f.remove_inst(add1);
        let uses: Vec<_> = f.uses(v).collect();
        assert_eq!(uses.len(), 1);
        assert_eq!(f.use_data(uses[0]).owner(), add2);

        f.remove_inst(add2);
        assert_eq!(f.uses(v).count(), 0);
    }

    #[test]
    fn operand_rewrite_relinks() {
        let ctx = Context::new();
        let mut f = Function::new(&ctx, "t");
        let ty = ctx.f32();
        let a = f.new_value(ty, None);
        let b = f.new_value(ty, None);
        let add = f.create_inst(InstKind::Add, &[a, a], &[ty], 0, Location::default());

        assert_eq!(f.uses(a).count(), 2);
        assert_eq!(f.uses(b).count(), 0);

        let slot0 = f.inst(add).operands()[0];
        f.set_operand_value(slot0, b);
        assert_eq!(f.uses(a).count(), 1);
        assert_eq!(f.uses(b).count(), 1);
        assert_eq!(f.operand(add, 0), b);
        assert_eq!(f.operand(add, 1), a);
    }

    #[test]
    fn cross_context_functions_are_rejected() {
        let ctx_a = Context::new();
        let ctx_b = Context::new();
        let f = Function::new(&ctx_b, "other");
        let mut prog = Program::new(ctx_a);
        let err = prog.push_function(f).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContextMismatch);
    }
}
