//! Control-flow graph over structured regions.
//!
//! Every instruction is a node. Linear siblings get a forward edge. `if`
//! fans out into its arms and back in at the successor; `for` and `foreach`
//! get a back-edge from the last instruction of the body to the loop
//! instruction itself, making loops natural cycles with the loop
//! instruction as header. Each node additionally records the maximum kind
//! of any enclosing region, which the barrier pass consults.

use std::collections::HashMap;

use tenc_ir::{Function, InstId, RegionId, RegionKind};

#[derive(Debug)]
struct Adjacency {
    pred: Vec<InstId>,
    succ: Vec<InstId>,
    kind_max: RegionKind,
}

impl Adjacency {
    fn with_kind(kind_max: RegionKind) -> Self {
        Self {
            pred: Vec::new(),
            succ: Vec::new(),
            kind_max,
        }
    }
}

/// Control-flow graph of one function body.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    adj: HashMap<InstId, Adjacency>,
}

impl ControlFlowGraph {
    fn entry(&mut self, node: InstId) -> &mut Adjacency {
        self.adj
            .entry(node)
            .or_insert_with(|| Adjacency::with_kind(RegionKind::Mixed))
    }

    fn add_node(&mut self, node: InstId, kind_max: RegionKind) {
        self.adj
            .entry(node)
            .or_insert_with(|| Adjacency::with_kind(kind_max));
    }

    fn add_edge(&mut self, from: InstId, to: InstId) {
        self.entry(from).succ.push(to);
        self.entry(to).pred.push(from);
    }

    /// Successors of `node`.
    pub fn successors(&self, node: InstId) -> &[InstId] {
        self.adj.get(&node).map(|a| a.succ.as_slice()).unwrap_or(&[])
    }

    /// Predecessors of `node`.
    pub fn predecessors(&self, node: InstId) -> &[InstId] {
        self.adj.get(&node).map(|a| a.pred.as_slice()).unwrap_or(&[])
    }

    /// Maximum kind of any region enclosing `node`.
    pub fn kind_max(&self, node: InstId) -> RegionKind {
        self.adj
            .get(&node)
            .map(|a| a.kind_max)
            .unwrap_or(RegionKind::Mixed)
    }

    /// All nodes, unordered.
    pub fn nodes(&self) -> impl Iterator<Item = InstId> + '_ {
        self.adj.keys().copied()
    }

    /// Register `new_inst` in place of `before_inst`'s incoming edges, used
    /// by passes that insert instructions without rebuilding the graph.
    pub fn insert_before(&mut self, before_inst: InstId, new_inst: InstId) {
        let kind = self.kind_max(before_inst);
        self.add_node(new_inst, kind);
        let preds = std::mem::take(&mut self.entry(before_inst).pred);
        for &p in &preds {
            for s in self.entry(p).succ.iter_mut() {
                if *s == before_inst {
                    *s = new_inst;
                }
            }
        }
        self.entry(new_inst).pred = preds;
        self.add_edge(new_inst, before_inst);
    }
}

/// Build the CFG of `top` (usually the function body).
pub fn control_flow_graph(func: &Function, top: RegionId) -> ControlFlowGraph {
    let mut cfg = ControlFlowGraph::default();
    add_region(func, &mut cfg, top, func.region(top).kind());
    cfg
}

fn visit_inst(
    func: &Function,
    cfg: &mut ControlFlowGraph,
    pred_nodes: &mut Vec<InstId>,
    kind_max: RegionKind,
    node: InstId,
) {
    let mut empty_child_regions = true;
    for &subreg in func.inst(node).regions() {
        let sub_kind = kind_max.max(func.region(subreg).kind());
        if let Some((substart, subexits)) = add_region(func, cfg, subreg, sub_kind) {
            empty_child_regions = false;
            cfg.add_edge(node, substart);
            if func.inst(node).kind().is_loop() {
                for e in subexits {
                    cfg.add_edge(e, node);
                }
                pred_nodes.push(node);
            } else {
                pred_nodes.extend(subexits);
            }
        }
    }
    if empty_child_regions {
        pred_nodes.push(node);
    }
}

/// Returns (start node, exit nodes) of `region`, or `None` when empty.
fn add_region(
    func: &Function,
    cfg: &mut ControlFlowGraph,
    region: RegionId,
    kind_max: RegionKind,
) -> Option<(InstId, Vec<InstId>)> {
    let insts = func.region(region).insts().to_vec();
    let first = *insts.first()?;

    let mut pred_nodes: Vec<InstId> = Vec::new();
    cfg.add_node(first, kind_max);
    visit_inst(func, cfg, &mut pred_nodes, kind_max, first);

    for &node in &insts[1..] {
        cfg.add_node(node, kind_max);
        for p in std::mem::take(&mut pred_nodes) {
            cfg.add_edge(p, node);
        }
        visit_inst(func, cfg, &mut pred_nodes, kind_max, node);
    }

    Some((first, pred_nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenc_ir::{Immediate, Location, ProgramBuilder};

    #[test]
    fn loops_are_natural_cycles() {
        let mut pb = ProgramBuilder::new();
        pb.create_function("f", &[], |fb| {
            let loc = Location::default;
            let i32_ty = fb.ctx().i32();
            let from = fb.constant(Immediate::Int(0), i32_ty, loc())?;
            let to = fb.constant(Immediate::Int(4), i32_ty, loc())?;
            fb.for_(from, to, None, &[], loc(), |fb, iv, _| {
                let _ = fb.add(iv, iv, loc())?;
                Ok(())
            })?;
            let _tail = fb.constant(Immediate::Int(7), i32_ty, loc())?;

            let func = fb.func();
            let body = func.body();
            let insts = func.region(body).insts().to_vec();
            let for_inst = insts[2];
            let cfg = control_flow_graph(func, body);

            // from -> to -> for; for -> body; body-last -> for (back-edge);
            // for -> tail.
            assert_eq!(cfg.successors(insts[0]), &[insts[1]]);
            assert_eq!(cfg.successors(insts[1]), &[for_inst]);
            let body_region = func.inst(for_inst).regions()[0];
            let body_first = func.region(body_region).insts()[0];
            assert!(cfg.successors(for_inst).contains(&body_first));
            assert!(cfg.successors(body_first).contains(&for_inst));
            assert!(cfg.successors(for_inst).contains(&insts[3]));
            assert_eq!(cfg.predecessors(insts[3]), &[for_inst]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn spmd_kind_propagates_to_nested_nodes() {
        let mut pb = ProgramBuilder::new();
        pb.create_function("f", &[], |fb| {
            let loc = Location::default;
            fb.parallel(loc(), |fb| {
                let _ = fb.subgroup_local_id(loc())?;
                Ok(())
            })?;

            let func = fb.func();
            let body = func.body();
            let cfg = control_flow_graph(func, body);
            let parallel_inst = func.region(body).insts()[0];
            let spmd_region = func.inst(parallel_inst).regions()[0];
            let inner_inst = func.region(spmd_region).insts()[0];
            assert_eq!(cfg.kind_max(inner_inst), RegionKind::Spmd);
            assert_eq!(cfg.kind_max(parallel_inst), RegionKind::Collective);
            Ok(())
        })
        .unwrap();
    }
}
