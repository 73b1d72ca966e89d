//! Required-extension inference.
//!
//! Walks a module and collects the OpenCL-C extensions it depends on:
//! `double` usage, `half` usage, and subgroup builtins.

use crate::ast::{Expr, Kernel, Module, Stmt, Type};

/// An OpenCL-C extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Extension {
    /// Double-precision floating point.
    KhrFp64,
    /// Half-precision floating point.
    KhrFp16,
    /// Subgroup operations.
    KhrSubgroups,
}

impl Extension {
    /// Extension name as used in pragmas and compiler options.
    pub fn name(&self) -> &'static str {
        match self {
            Self::KhrFp64 => "cl_khr_fp64",
            Self::KhrFp16 => "cl_khr_fp16",
            Self::KhrSubgroups => "cl_khr_subgroups",
        }
    }
}

/// Builtins that require the subgroup extension.
const SUBGROUP_BUILTINS: &[&str] = &[
    "get_sub_group_size",
    "get_num_sub_groups",
    "get_sub_group_id",
    "get_sub_group_local_id",
    "sub_group_barrier",
    "sub_group_broadcast",
    "sub_group_reduce_add",
    "sub_group_reduce_max",
    "sub_group_reduce_min",
    "sub_group_scan_inclusive_add",
    "sub_group_scan_inclusive_max",
    "sub_group_scan_inclusive_min",
    "sub_group_scan_exclusive_add",
    "sub_group_scan_exclusive_max",
    "sub_group_scan_exclusive_min",
];

struct Scan {
    fp64: bool,
    fp16: bool,
    subgroups: bool,
}

impl Scan {
    fn ty(&mut self, ty: &Type) {
        let scalar = match ty {
            Type::Scalar(s) => s,
            Type::Pointer { elem, .. } => elem,
        };
        self.fp64 |= scalar.needs_fp64();
        self.fp16 |= scalar.needs_fp16();
    }

    fn expr(&mut self, e: &Expr) {
        match e {
            Expr::Var(_) | Expr::Int(_) | Expr::Uint(_) | Expr::Float(_) | Expr::FloatSingle(_) => {
            }
            Expr::Binary(_, a, b) => {
                self.expr(a);
                self.expr(b);
            }
            Expr::Unary(_, a) => self.expr(a),
            Expr::Ternary(c, a, b) => {
                self.expr(c);
                self.expr(a);
                self.expr(b);
            }
            Expr::Call(name, args) => {
                self.subgroups |= SUBGROUP_BUILTINS.contains(&name.as_str());
                for a in args {
                    self.expr(a);
                }
            }
            Expr::Cast(ty, a) => {
                self.ty(ty);
                self.expr(a);
            }
            Expr::Index(base, idx) => {
                self.expr(base);
                self.expr(idx);
            }
            Expr::Vector(scalar, parts) => {
                self.fp64 |= scalar.needs_fp64();
                self.fp16 |= scalar.needs_fp16();
                for p in parts {
                    self.expr(p);
                }
            }
            Expr::Member(base, _) => self.expr(base),
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::VarDecl { ty, init, .. } => {
                self.ty(ty);
                if let Some(init) = init {
                    self.expr(init);
                }
            }
            Stmt::Assign { lhs, rhs } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Stmt::Expr(e) => self.expr(e),
            Stmt::For {
                ty,
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.ty(ty);
                self.expr(init);
                self.expr(cond);
                self.expr(step);
                for s in body {
                    self.stmt(s);
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond);
                for s in then_branch {
                    self.stmt(s);
                }
                for s in else_branch {
                    self.stmt(s);
                }
            }
            Stmt::Block(body) => {
                for s in body {
                    self.stmt(s);
                }
            }
        }
    }

    fn kernel(&mut self, k: &Kernel) {
        for p in &k.params {
            self.ty(&p.ty);
        }
        for s in &k.body {
            self.stmt(s);
        }
    }
}

/// Extensions a module requires, sorted and deduplicated.
pub fn required_extensions(m: &Module) -> Vec<Extension> {
    let mut scan = Scan {
        fp64: false,
        fp16: false,
        subgroups: false,
    };
    for k in &m.kernels {
        scan.kernel(k);
    }
    let mut out = Vec::new();
    if scan.fp64 {
        out.push(Extension::KhrFp64);
    }
    if scan.fp16 {
        out.push(Extension::KhrFp16);
    }
    if scan.subgroups {
        out.push(Extension::KhrSubgroups);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AddrSpace, KernelParam, Scalar};

    #[test]
    fn detects_fp64_and_subgroups() {
        let m = Module {
            kernels: vec![Kernel {
                name: "k".into(),
                attributes: vec![],
                params: vec![KernelParam {
                    ty: Type::Pointer {
                        elem: Scalar::Double,
                        space: AddrSpace::Global,
                    },
                    name: "a".into(),
                    pointer_to_pointer: false,
                }],
                body: vec![Stmt::Expr(Expr::call(
                    "sub_group_reduce_add",
                    vec![Expr::var("x")],
                ))],
            }],
        };
        assert_eq!(
            required_extensions(&m),
            vec![Extension::KhrFp64, Extension::KhrSubgroups]
        );
    }

    #[test]
    fn plain_float_kernel_needs_nothing() {
        let m = Module {
            kernels: vec![Kernel {
                name: "k".into(),
                attributes: vec![],
                params: vec![],
                body: vec![],
            }],
        };
        assert!(required_extensions(&m).is_empty());
    }
}
