//! Alias analysis.
//!
//! Maps every view-producing result (`subview`, `expand`, `fuse`) to the
//! root memref it aliases. Two values alias iff their roots are equal, or
//! both roots are stack allocations whose byte intervals overlap.

use std::collections::HashMap;

use tenc_ir::{Function, ValueId};

use super::stack::StackMap;

/// Result of alias analysis over one function.
#[derive(Debug, Default, Clone)]
pub struct AaResults {
    root: HashMap<ValueId, ValueId>,
    intervals: HashMap<ValueId, (usize, usize)>,
}

impl AaResults {
    /// Root storage of `v`: the value itself unless `v` is a view.
    pub fn root(&self, v: ValueId) -> ValueId {
        self.root.get(&v).copied().unwrap_or(v)
    }

    /// True if a write through `a` may be observed through `b`.
    pub fn alias(&self, a: ValueId, b: ValueId) -> bool {
        let ra = self.root(a);
        let rb = self.root(b);
        if ra == rb {
            return true;
        }
        match (self.intervals.get(&ra), self.intervals.get(&rb)) {
            (Some(&(a0, a1)), Some(&(b0, b1))) => a0 < b1 && b0 < a1,
            _ => false,
        }
    }
}

/// Compute alias roots for `func`; pass the stack map to additionally treat
/// overlapping stack slots as aliases.
pub fn alias_analysis(func: &Function, stack: Option<&StackMap>) -> AaResults {
    let mut root: HashMap<ValueId, ValueId> = HashMap::new();
    for inst in func.walk_insts() {
        if func.inst(inst).kind().is_view() {
            let source = func.operand(inst, 0);
            let source_root = root.get(&source).copied().unwrap_or(source);
            root.insert(func.result(inst), source_root);
        }
    }
    AaResults {
        root,
        intervals: stack.map(|s| s.intervals().clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenc_ir::{
        packed_strides, AddressSpace, Location, ProgramBuilder, Transpose, DYNAMIC,
    };

    #[test]
    fn views_chase_to_backing_storage() {
        let mut pb = ProgramBuilder::new();
        let f32 = pb.ctx().f32();
        let a_ty = pb
            .ctx()
            .get_memref(f32, &[8, 8, 4], &packed_strides(&[8, 8, 4]), AddressSpace::Global)
            .unwrap();
        pb.create_function("f", &[a_ty, a_ty], |fb| {
            let p = fb.params();
            let loc = Location::default;
            let gid = fb.group_id(loc())?;
            let v0 = fb.subview(p[0], &[0, 0, DYNAMIC], &[8, 8, 0], &[gid], &[], loc())?;
            let v1 = fb.fuse(v0, 0, 1, loc())?;
            let w0 = fb.subview(p[1], &[0, 0, DYNAMIC], &[8, 8, 0], &[gid], &[], loc())?;

            let f32 = fb.ctx().f32();
            let alpha = fb.constant_one(f32, loc())?;
            let beta = fb.constant_zero(f32, loc())?;
            fb.axpby(Transpose::N, alpha, v0, beta, w0, loc())?;

            let func = fb.func();
            let aa = alias_analysis(func, None);
            assert_eq!(aa.root(v1), p[0]);
            assert_eq!(aa.root(v0), p[0]);
            assert_eq!(aa.root(w0), p[1]);
            assert!(aa.alias(v0, v1));
            assert!(aa.alias(v1, p[0]));
            assert!(!aa.alias(v0, w0));
            assert!(!aa.alias(p[0], p[1]));
            Ok(())
        })
        .unwrap();
    }
}
