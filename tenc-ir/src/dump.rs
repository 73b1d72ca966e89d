//! Textual IR dumping.
//!
//! The printed form is stable for a given program and is used by tests to
//! compare IR before and after passes. A slot tracker assigns `%N` names to
//! anonymous values in definition order.

use std::collections::HashMap;
use std::fmt::Write;

use crate::context::Context;
use crate::func::{Function, Program};
use crate::inst::{Immediate, InstId, InstKind};
use crate::region::RegionId;
use crate::types::{
    is_dynamic_value, AddressSpace, AddressSpaceFlags, FloatFormat, IntWidth, MatrixUse, Transpose,
    Ty, TypeKind,
};
use crate::value::ValueId;

/// Render a type in assembly syntax.
pub fn print_ty(ctx: &Context, ty: Ty) -> String {
    match ctx.kind(ty) {
        TypeKind::Void => "void".into(),
        TypeKind::Bool => "bool".into(),
        TypeKind::Index => "index".into(),
        TypeKind::Int(w) => match w {
            IntWidth::I8 => "i8".into(),
            IntWidth::I16 => "i16".into(),
            IntWidth::I32 => "i32".into(),
            IntWidth::I64 => "i64".into(),
        },
        TypeKind::Float(f) => match f {
            FloatFormat::F16 => "f16".into(),
            FloatFormat::Bf16 => "bf16".into(),
            FloatFormat::F32 => "f32".into(),
            FloatFormat::F64 => "f64".into(),
        },
        TypeKind::Complex(f) => match f {
            FloatFormat::F32 => "c32".into(),
            FloatFormat::F64 => "c64".into(),
            _ => "c?".into(),
        },
        TypeKind::Memref {
            elem,
            shape,
            stride,
            addrspace,
        } => {
            let mut s = format!("memref<{}", print_ty(ctx, *elem));
            for &e in shape {
                s.push('x');
                push_extent(&mut s, e);
            }
            if *stride != crate::types::packed_strides(shape) {
                s.push_str(",strided<");
                for (i, &e) in stride.iter().enumerate() {
                    if i > 0 {
                        s.push(',');
                    }
                    push_extent(&mut s, e);
                }
                s.push('>');
            }
            if *addrspace == AddressSpace::Local {
                s.push_str(",local");
            }
            s.push('>');
            s
        }
        TypeKind::Group { of, offset } => {
            let mut s = format!("group<{}", print_ty(ctx, *of));
            if *offset != 0 {
                s.push_str(", offset: ");
                push_extent(&mut s, *offset);
            }
            s.push('>');
            s
        }
        TypeKind::Coopmatrix {
            comp,
            rows,
            cols,
            use_,
        } => {
            let use_s = match use_ {
                MatrixUse::A => "matrix_a",
                MatrixUse::B => "matrix_b",
                MatrixUse::Acc => "matrix_acc",
            };
            format!("coopmatrix<{}x{rows}x{cols},{use_s}>", print_ty(ctx, *comp))
        }
        TypeKind::Function { params, result } => {
            let mut s = String::from("(");
            for (i, &p) in params.iter().enumerate() {
                if i > 0 {
                    s.push_str(", ");
                }
                s.push_str(&print_ty(ctx, p));
            }
            s.push_str(") -> ");
            s.push_str(&print_ty(ctx, *result));
            s
        }
    }
}

fn push_extent(s: &mut String, e: i64) {
    if is_dynamic_value(e) {
        s.push('?');
    } else {
        let _ = write!(s, "{e}");
    }
}

struct SlotTracker {
    slots: HashMap<ValueId, usize>,
    next: usize,
}

impl SlotTracker {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next: 0,
        }
    }

    fn assign(&mut self, v: ValueId) -> usize {
        let next = &mut self.next;
        *self.slots.entry(v).or_insert_with(|| {
            let s = *next;
            *next += 1;
            s
        })
    }
}

struct Dumper<'a> {
    ctx: &'a Context,
    func: &'a Function,
    slots: SlotTracker,
    out: String,
}

impl<'a> Dumper<'a> {
    fn val(&mut self, v: ValueId) -> String {
        match self.func.value(v).name() {
            Some(n) => format!("%{n}"),
            None => {
                let s = self.slots.assign(v);
                format!("%{s}")
            }
        }
    }

    fn val_list(&mut self, vs: &[ValueId]) -> String {
        let parts: Vec<String> = vs.iter().map(|&v| self.val(v)).collect();
        parts.join(", ")
    }

    fn ty_list(&mut self, vs: &[ValueId]) -> String {
        let parts: Vec<String> = vs
            .iter()
            .map(|&v| print_ty(self.ctx, self.func.value_ty(v)))
            .collect();
        parts.join(", ")
    }

    fn indent(&mut self, level: usize) {
        for _ in 0..level {
            self.out.push_str("  ");
        }
    }

    fn immediate(imm: &Immediate) -> String {
        match imm {
            Immediate::Bool(b) => format!("{b}"),
            Immediate::Int(i) => format!("{i}"),
            Immediate::Float(f) => format!("{f:e}"),
            Immediate::Complex(re, im) => format!("[{re:e}, {im:e}]"),
        }
    }

    fn trans(t: Transpose) -> &'static str {
        match t {
            Transpose::N => "n",
            Transpose::T => "t",
        }
    }

    fn region(&mut self, r: RegionId, level: usize) {
        let params = self.func.region(r).params().to_vec();
        self.out.push('(');
        let ps = self.val_list(&params);
        self.out.push_str(&ps);
        self.out.push_str(") {\n");
        for &i in &self.func.region(r).insts().to_vec() {
            self.inst(i, level + 1);
        }
        self.indent(level);
        self.out.push('}');
    }

    fn inst(&mut self, i: InstId, level: usize) {
        self.indent(level);
        let results = self.func.inst(i).results().to_vec();
        if !results.is_empty() {
            let rs = self.val_list(&results);
            self.out.push_str(&rs);
            self.out.push_str(" = ");
        }
        let opcode_name = self.func.inst(i).opcode().name();
        let ops = self.func.operand_values(i);
        match self.func.inst(i).kind().clone() {
            InstKind::Constant(imm) => {
                let ty = print_ty(self.ctx, self.func.value_ty(results[0]));
                let _ = write!(self.out, "constant {} : {ty}", Self::immediate(&imm));
            }
            InstKind::Barrier { fence } => {
                self.out.push_str("barrier");
                if fence.contains(AddressSpaceFlags::GLOBAL) {
                    self.out.push_str(".global");
                }
                if fence.contains(AddressSpaceFlags::LOCAL) {
                    self.out.push_str(".local");
                }
            }
            InstKind::Gemm { trans_a, trans_b } => {
                let o = self.val_list(&ops);
                let t = self.ty_list(&ops);
                let _ = write!(
                    self.out,
                    "gemm.{}.{} {o} : {t}",
                    Self::trans(trans_a),
                    Self::trans(trans_b)
                );
            }
            InstKind::Gemv { trans_a } => {
                let o = self.val_list(&ops);
                let t = self.ty_list(&ops);
                let _ = write!(self.out, "gemv.{} {o} : {t}", Self::trans(trans_a));
            }
            InstKind::Axpby { trans_a } => {
                let o = self.val_list(&ops);
                let t = self.ty_list(&ops);
                let _ = write!(self.out, "axpby.{} {o} : {t}", Self::trans(trans_a));
            }
            InstKind::Sum { trans_a } => {
                let o = self.val_list(&ops);
                let t = self.ty_list(&ops);
                let _ = write!(self.out, "sum.{} {o} : {t}", Self::trans(trans_a));
            }
            InstKind::Cumsum { mode } => {
                let o = self.val_list(&ops);
                let t = self.ty_list(&ops);
                let _ = write!(self.out, "cumsum.{mode} {o} : {t}");
            }
            InstKind::Subview {
                static_offsets,
                static_sizes,
                num_dyn_offsets: _,
            } => {
                let base = self.val(ops[0]);
                let _ = write!(self.out, "subview {base}");
                let mut dyn_it = ops[1..].iter();
                for list in [&static_offsets, &static_sizes] {
                    self.out.push('[');
                    for (idx, &e) in list.iter().enumerate() {
                        if idx > 0 {
                            self.out.push(',');
                        }
                        if is_dynamic_value(e) {
                            let v = dyn_it.next().copied();
                            match v {
                                Some(v) => {
                                    let s = self.val(v);
                                    self.out.push_str(&s);
                                }
                                None => self.out.push('?'),
                            }
                        } else {
                            let _ = write!(self.out, "{e}");
                        }
                    }
                    self.out.push(']');
                }
                let ty = print_ty(self.ctx, self.func.value_ty(results[0]));
                let _ = write!(self.out, " : {ty}");
            }
            InstKind::Expand { mode, static_shape } => {
                let base = self.val(ops[0]);
                let _ = write!(self.out, "expand.{mode} {base} -> [");
                let mut dyn_it = ops[1..].iter();
                for (idx, &e) in static_shape.iter().enumerate() {
                    if idx > 0 {
                        self.out.push(',');
                    }
                    if is_dynamic_value(e) {
                        if let Some(&v) = dyn_it.next() {
                            let s = self.val(v);
                            self.out.push_str(&s);
                        }
                    } else {
                        let _ = write!(self.out, "{e}");
                    }
                }
                let ty = print_ty(self.ctx, self.func.value_ty(results[0]));
                let _ = write!(self.out, "] : {ty}");
            }
            InstKind::Fuse { from, to } => {
                let base = self.val(ops[0]);
                let ty = print_ty(self.ctx, self.func.value_ty(results[0]));
                let _ = write!(self.out, "fuse.{from}.{to} {base} : {ty}");
            }
            InstKind::For { has_step } => {
                let body = self.func.inst(i).regions()[0];
                let params = self.func.region(body).params().to_vec();
                let iv = self.val(params[0]);
                let from = self.val(ops[0]);
                let to = self.val(ops[1]);
                let _ = write!(self.out, "for {iv} = {from} to {to}");
                let init_at = if has_step {
                    let step = self.val(ops[2]);
                    let _ = write!(self.out, " step {step}");
                    3
                } else {
                    2
                };
                if ops.len() > init_at {
                    let inits = self.val_list(&ops[init_at..]);
                    let args = self.val_list(&params[1..]);
                    let _ = write!(self.out, " iter_args({args} = {inits})");
                }
                self.out.push(' ');
                self.region_body_only(body, level);
            }
            InstKind::Foreach { num_loop_vars } => {
                let from = self.val_list(&ops[..num_loop_vars]);
                let to = self.val_list(&ops[num_loop_vars..]);
                let _ = write!(self.out, "foreach ({from}) to ({to}) ");
                let body = self.func.inst(i).regions()[0];
                self.region(body, level);
            }
            InstKind::If => {
                let cond = self.val(ops[0]);
                let _ = write!(self.out, "if {cond} ");
                let then_r = self.func.inst(i).regions()[0];
                let else_r = self.func.inst(i).regions()[1];
                self.region_body_only(then_r, level);
                if !self.func.region(else_r).is_empty() {
                    self.out.push_str(" else ");
                    self.region_body_only(else_r, level);
                }
            }
            InstKind::Parallel => {
                self.out.push_str("parallel ");
                let body = self.func.inst(i).regions()[0];
                self.region_body_only(body, level);
            }
            InstKind::CoopmatrixApply => {
                let a = self.val(ops[0]);
                let _ = write!(self.out, "coopmatrix.apply {a} ");
                let body = self.func.inst(i).regions()[0];
                self.region(body, level);
            }
            _ => {
                self.out.push_str(opcode_name);
                if !ops.is_empty() {
                    self.out.push(' ');
                    let o = self.val_list(&ops);
                    self.out.push_str(&o);
                    self.out.push_str(" : ");
                    let t = self.ty_list(&ops);
                    self.out.push_str(&t);
                }
                if !results.is_empty() {
                    let rty = print_ty(self.ctx, self.func.value_ty(results[0]));
                    let _ = write!(self.out, " -> {rty}");
                }
            }
        }
        self.out.push('\n');
    }

    fn region_body_only(&mut self, r: RegionId, level: usize) {
        self.out.push_str("{\n");
        for &i in &self.func.region(r).insts().to_vec() {
            self.inst(i, level + 1);
        }
        self.indent(level);
        self.out.push('}');
    }

    fn function(&mut self) {
        let body = self.func.body();
        let params = self.func.region(body).params().to_vec();
        let _ = write!(self.out, "func @{}(", self.func.name());
        for (idx, &p) in params.iter().enumerate() {
            if idx > 0 {
                self.out.push_str(", ");
            }
            let name = self.val(p);
            let ty = print_ty(self.ctx, self.func.value_ty(p));
            let _ = write!(self.out, "{name}: {ty}");
        }
        self.out.push(')');
        let wgs = self.func.work_group_size();
        if wgs != [0, 0] {
            let _ = write!(
                self.out,
                " attributes{{work_group_size = [{}, {}]}}",
                wgs[0], wgs[1]
            );
        }
        if self.func.subgroup_size() != 0 {
            let _ = write!(
                self.out,
                " attributes{{subgroup_size = {}}}",
                self.func.subgroup_size()
            );
        }
        self.out.push_str(" {\n");
        for &i in &self.func.region(body).insts().to_vec() {
            self.inst(i, 1);
        }
        self.out.push_str("}\n");
    }
}

/// Render one function.
pub fn dump_function(ctx: &Context, func: &Function) -> String {
    let mut d = Dumper {
        ctx,
        func,
        slots: SlotTracker::new(),
        out: String::new(),
    };
    d.function();
    d.out
}

/// Render a whole program.
pub fn dump_program(prog: &Program) -> String {
    let mut out = String::new();
    for f in prog.functions() {
        out.push_str(&dump_function(prog.context(), f));
        out.push('\n');
    }
    out
}
