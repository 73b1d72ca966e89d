//! Lowering from IR to the OpenCL-C AST.
//!
//! One kernel per function. Memref parameters become address-space pointers
//! plus one `long` parameter per dynamic shape/stride entry (in mode
//! order), groups become batch pointers, scalars pass by value. Collective
//! BLAS instructions lower to work-group-distributed loops; cooperative
//! matrices lower to per-lane register arrays with dimension 0 distributed
//! across the subgroup round-robin. `foreach` partitions its iteration
//! space over global ids, the batch axis being the z dimension.

use std::collections::HashMap;

use tenc_clc::{
    AddrSpace, BinOp, Expr, Kernel, KernelAttribute, KernelParam, Scalar, Stmt, Type, UnOp,
};
use tenc_ir::{
    is_dynamic_value, AddressSpaceFlags, Context, Function, Immediate, InstId, InstKind,
    IntWidth, FloatFormat, RegionId, ReduceMode, Transpose, Ty, TypeKind, ValueId,
};

use crate::analysis::StackMap;
use crate::error::Error;

/// A lowered kernel.
#[derive(Debug, Clone)]
pub struct LoweredKernel {
    /// The OpenCL-C kernel definition.
    pub kernel: Kernel,
}

#[derive(Clone)]
struct MemrefVal {
    ptr: Expr,
    shape: Vec<Expr>,
    stride: Vec<Expr>,
    elem: Scalar,
    space: AddrSpace,
}

#[derive(Clone)]
struct GroupVal {
    ptr: Expr,
    offset: Expr,
    of: Ty,
}

#[derive(Clone)]
struct CoopVal {
    name: String,
    rows: i64,
    cols: i64,
    row_blocks: i64,
    comp: Ty,
}

impl CoopVal {
    fn len(&self) -> u64 {
        (self.row_blocks * self.cols) as u64
    }
}

#[derive(Clone)]
enum Val {
    Scalar(Expr),
    Memref(MemrefVal),
    Group(GroupVal),
    Coopmatrix(CoopVal),
}

struct Lowerer<'a> {
    ctx: &'a Context,
    func: &'a Function,
    stack: &'a StackMap,
    sgs: i64,
    wgs: [i64; 2],
    vals: HashMap<ValueId, Val>,
    tmp: usize,
}

fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

/// Lower one verified, pass-processed function to an OpenCL-C kernel.
pub fn lower_function(
    ctx: &Context,
    func: &Function,
    stack: &StackMap,
) -> Result<LoweredKernel, Error> {
    let sgs = func.subgroup_size().max(1) as i64;
    let wgs_decl = func.work_group_size();
    let wgs = [
        (wgs_decl[0].max(1)) as i64,
        (wgs_decl[1].max(1)) as i64,
    ];
    let mut lo = Lowerer {
        ctx,
        func,
        stack,
        sgs,
        wgs,
        vals: HashMap::new(),
        tmp: 0,
    };

    let mut params = Vec::new();
    let body_region = func.body();
    for (i, &p) in func.region(body_region).params().iter().enumerate() {
        lo.lower_param(i, p, &mut params)?;
    }

    let mut body = Vec::new();
    if stack.high_water() > 0 {
        // Scratch area, 8-byte aligned through its element type.
        body.push(Stmt::VarDecl {
            space: AddrSpace::Local,
            ty: Type::Scalar(Scalar::Ulong),
            name: "stack".into(),
            array: Some((stack.high_water() as u64).div_ceil(8)),
            init: None,
        });
    }
    body.extend(lo.region_stmts(body_region, &[])?);

    let mut attributes = vec![KernelAttribute::ReqdWorkGroupSize(
        wgs[0] as u32,
        wgs[1] as u32,
        1,
    )];
    if func.subgroup_size() > 0 {
        attributes.push(KernelAttribute::IntelReqdSubGroupSize(func.subgroup_size()));
    }

    Ok(LoweredKernel {
        kernel: Kernel {
            name: func.name().to_string(),
            attributes,
            params,
            body,
        },
    })
}

impl<'a> Lowerer<'a> {
    fn fresh(&mut self, prefix: &str) -> String {
        let n = self.tmp;
        self.tmp += 1;
        format!("{prefix}{n}")
    }

    fn kind(&self, v: ValueId) -> &TypeKind {
        self.ctx.kind(self.func.value_ty(v))
    }

    fn scalar_of(&self, ty: Ty) -> Result<Scalar, Error> {
        Ok(match self.ctx.kind(ty) {
            TypeKind::Bool => Scalar::Bool,
            TypeKind::Index => Scalar::Long,
            TypeKind::Int(w) => match w {
                IntWidth::I8 => Scalar::Char,
                IntWidth::I16 => Scalar::Short,
                IntWidth::I32 => Scalar::Int,
                IntWidth::I64 => Scalar::Long,
            },
            TypeKind::Float(f) => match f {
                FloatFormat::F16 => Scalar::Half,
                FloatFormat::F32 => Scalar::Float,
                FloatFormat::F64 => Scalar::Double,
                FloatFormat::Bf16 => {
                    return Err(Error::UnsupportedType("bf16".into()));
                }
            },
            TypeKind::Complex(f) => match f {
                FloatFormat::F32 => Scalar::Float2,
                FloatFormat::F64 => Scalar::Double2,
                _ => return Err(Error::UnsupportedType("complex half".into())),
            },
            other => {
                return Err(Error::UnsupportedType(format!("{other:?}")));
            }
        })
    }

    fn component_scalar(&self, ty: Ty) -> Result<Scalar, Error> {
        self.scalar_of(self.ctx.component_ty(ty))
    }

    fn is_complex_ty(&self, ty: Ty) -> bool {
        self.ctx.kind(ty).is_complex()
    }

    fn val(&self, v: ValueId) -> Result<&Val, Error> {
        self.vals.get(&v).ok_or_else(|| {
            Error::UnsupportedType("value used before definition in lowering".into())
        })
    }

    fn scalar_val(&self, v: ValueId) -> Result<Expr, Error> {
        match self.val(v)? {
            Val::Scalar(e) => Ok(e.clone()),
            _ => Err(Error::UnsupportedType("expected scalar value".into())),
        }
    }

    fn memref_val(&self, v: ValueId) -> Result<MemrefVal, Error> {
        match self.val(v)? {
            Val::Memref(m) => Ok(m.clone()),
            _ => Err(Error::UnsupportedType("expected memref value".into())),
        }
    }

    fn coop_val(&self, v: ValueId) -> Result<CoopVal, Error> {
        match self.val(v)? {
            Val::Coopmatrix(c) => Ok(c.clone()),
            _ => Err(Error::UnsupportedType("expected coopmatrix value".into())),
        }
    }

    /* ---------------- kernel parameters ---------------- */

    fn lower_param(
        &mut self,
        idx: usize,
        value: ValueId,
        params: &mut Vec<KernelParam>,
    ) -> Result<(), Error> {
        let name = format!("arg{idx}");
        match self.ctx.kind(self.func.value_ty(value)).clone() {
            TypeKind::Memref {
                elem,
                shape,
                stride,
                addrspace,
            } => {
                let scalar = self.scalar_of(elem)?;
                let space = match addrspace {
                    tenc_ir::AddressSpace::Global => AddrSpace::Global,
                    tenc_ir::AddressSpace::Local => AddrSpace::Local,
                };
                params.push(KernelParam {
                    ty: Type::Pointer {
                        elem: scalar,
                        space,
                    },
                    name: name.clone(),
                    pointer_to_pointer: false,
                });
                let mut shape_exprs = Vec::new();
                for (j, &s) in shape.iter().enumerate() {
                    if is_dynamic_value(s) {
                        let pname = format!("{name}_shape{j}");
                        params.push(KernelParam {
                            ty: Type::Scalar(Scalar::Long),
                            name: pname.clone(),
                            pointer_to_pointer: false,
                        });
                        shape_exprs.push(Expr::var(pname));
                    } else {
                        shape_exprs.push(Expr::Int(s));
                    }
                }
                let mut stride_exprs = Vec::new();
                for (j, &s) in stride.iter().enumerate() {
                    if is_dynamic_value(s) {
                        let pname = format!("{name}_stride{j}");
                        params.push(KernelParam {
                            ty: Type::Scalar(Scalar::Long),
                            name: pname.clone(),
                            pointer_to_pointer: false,
                        });
                        stride_exprs.push(Expr::var(pname));
                    } else {
                        stride_exprs.push(Expr::Int(s));
                    }
                }
                self.vals.insert(
                    value,
                    Val::Memref(MemrefVal {
                        ptr: Expr::var(name),
                        shape: shape_exprs,
                        stride: stride_exprs,
                        elem: scalar,
                        space,
                    }),
                );
            }
            TypeKind::Group { of, offset } => {
                let elem = match self.ctx.kind(of) {
                    TypeKind::Memref { elem, .. } => *elem,
                    _ => return Err(Error::UnsupportedType("group of non-memref".into())),
                };
                let scalar = self.scalar_of(elem)?;
                params.push(KernelParam {
                    ty: Type::Pointer {
                        elem: scalar,
                        space: AddrSpace::Global,
                    },
                    name: name.clone(),
                    pointer_to_pointer: true,
                });
                let offset_expr = if is_dynamic_value(offset) {
                    let pname = format!("{name}_offset");
                    params.push(KernelParam {
                        ty: Type::Scalar(Scalar::Long),
                        name: pname.clone(),
                        pointer_to_pointer: false,
                    });
                    Expr::var(pname)
                } else {
                    Expr::Int(offset)
                };
                self.vals.insert(
                    value,
                    Val::Group(GroupVal {
                        ptr: Expr::var(name),
                        offset: offset_expr,
                        of,
                    }),
                );
            }
            _ => {
                let scalar = self.scalar_of(self.func.value_ty(value))?;
                params.push(KernelParam {
                    ty: Type::Scalar(scalar),
                    name: name.clone(),
                    pointer_to_pointer: false,
                });
                self.vals.insert(value, Val::Scalar(Expr::var(name)));
            }
        }
        Ok(())
    }

    /* ---------------- expression helpers ---------------- */

    fn zero_of(&self, scalar: Scalar) -> Expr {
        match scalar {
            Scalar::Float2 => Expr::Vector(
                Scalar::Float2,
                vec![Expr::FloatSingle(0.0), Expr::FloatSingle(0.0)],
            ),
            Scalar::Double2 => {
                Expr::Vector(Scalar::Double2, vec![Expr::Float(0.0), Expr::Float(0.0)])
            }
            Scalar::Half | Scalar::Float => Expr::FloatSingle(0.0),
            Scalar::Double => Expr::Float(0.0),
            _ => Expr::Int(0),
        }
    }

    fn is_complex_scalar(scalar: Scalar) -> bool {
        matches!(scalar, Scalar::Float2 | Scalar::Double2)
    }

    fn complex_component(scalar: Scalar) -> Scalar {
        match scalar {
            Scalar::Float2 => Scalar::Float,
            Scalar::Double2 => Scalar::Double,
            s => s,
        }
    }

    fn add_expr(scalar: Scalar, a: Expr, b: Expr) -> Expr {
        // Vector addition is componentwise, which is complex addition.
        let _ = scalar;
        Expr::bin(BinOp::Add, a, b)
    }

    fn mul_expr(scalar: Scalar, a: Expr, b: Expr) -> Expr {
        if Self::is_complex_scalar(scalar) {
            let ax = Expr::Member(Box::new(a.clone()), "x");
            let ay = Expr::Member(Box::new(a.clone()), "y");
            let bx = Expr::Member(Box::new(b.clone()), "x");
            let by = Expr::Member(Box::new(b), "y");
            Expr::Vector(
                scalar,
                vec![
                    Expr::bin(
                        BinOp::Sub,
                        Expr::bin(BinOp::Mul, ax.clone(), bx.clone()),
                        Expr::bin(BinOp::Mul, ay.clone(), by.clone()),
                    ),
                    Expr::bin(
                        BinOp::Add,
                        Expr::bin(BinOp::Mul, ax, by),
                        Expr::bin(BinOp::Mul, ay, bx),
                    ),
                ],
            )
        } else {
            Expr::bin(BinOp::Mul, a, b)
        }
    }

    fn div_expr(scalar: Scalar, a: Expr, b: Expr) -> Expr {
        if Self::is_complex_scalar(scalar) {
            let ax = Expr::Member(Box::new(a.clone()), "x");
            let ay = Expr::Member(Box::new(a), "y");
            let bx = Expr::Member(Box::new(b.clone()), "x");
            let by = Expr::Member(Box::new(b), "y");
            let den = Expr::bin(
                BinOp::Add,
                Expr::bin(BinOp::Mul, bx.clone(), bx.clone()),
                Expr::bin(BinOp::Mul, by.clone(), by.clone()),
            );
            Expr::Vector(
                scalar,
                vec![
                    Expr::bin(
                        BinOp::Div,
                        Expr::bin(
                            BinOp::Add,
                            Expr::bin(BinOp::Mul, ax.clone(), bx.clone()),
                            Expr::bin(BinOp::Mul, ay.clone(), by.clone()),
                        ),
                        den.clone(),
                    ),
                    Expr::bin(
                        BinOp::Div,
                        Expr::bin(BinOp::Sub, Expr::bin(BinOp::Mul, ay, bx), Expr::bin(BinOp::Mul, ax, by)),
                        den,
                    ),
                ],
            )
        } else {
            Expr::bin(BinOp::Div, a, b)
        }
    }

    /// Cast `e` from `from` to `to`, complex-aware.
    fn cast_expr(&self, from: Ty, to: Ty, e: Expr) -> Result<Expr, Error> {
        if from == to {
            return Ok(e);
        }
        let from_s = self.scalar_of(from)?;
        let to_s = self.scalar_of(to)?;
        Ok(match (Self::is_complex_scalar(from_s), Self::is_complex_scalar(to_s)) {
            (false, false) => Expr::Cast(Type::Scalar(to_s), Box::new(e)),
            (false, true) => {
                let comp = Self::complex_component(to_s);
                let zero = if comp == Scalar::Float {
                    Expr::FloatSingle(0.0)
                } else {
                    Expr::Float(0.0)
                };
                Expr::Vector(
                    to_s,
                    vec![Expr::Cast(Type::Scalar(comp), Box::new(e)), zero],
                )
            }
            (true, true) => {
                let comp = Self::complex_component(to_s);
                Expr::Vector(
                    to_s,
                    vec![
                        Expr::Cast(
                            Type::Scalar(comp),
                            Box::new(Expr::Member(Box::new(e.clone()), "x")),
                        ),
                        Expr::Cast(Type::Scalar(comp), Box::new(Expr::Member(Box::new(e), "y"))),
                    ],
                )
            }
            (true, false) => {
                return Err(Error::UnsupportedType("complex to real cast".into()));
            }
        })
    }

    fn linear_index(strides: &[Expr], indices: &[Expr]) -> Expr {
        let mut acc: Option<Expr> = None;
        for (s, i) in strides.iter().zip(indices.iter()) {
            let term = match s {
                Expr::Int(1) => i.clone(),
                _ => Expr::bin(BinOp::Mul, i.clone(), s.clone()),
            };
            acc = Some(match acc {
                None => term,
                Some(a) => Expr::bin(BinOp::Add, a, term),
            });
        }
        acc.unwrap_or(Expr::Int(0))
    }

    fn mem_elem(m: &MemrefVal, indices: &[Expr]) -> Expr {
        Expr::index(m.ptr.clone(), Self::linear_index(&m.stride, indices))
    }

    /// True if `v` is a constant zero.
    fn is_const_zero(&self, v: ValueId) -> bool {
        if let Some(def) = self.func.value(v).defining_inst() {
            if let InstKind::Constant(imm) = self.func.inst(def).kind() {
                return imm.is_zero();
            }
        }
        false
    }

    fn local_id(dim: i64) -> Expr {
        Expr::Cast(
            Type::Scalar(Scalar::Long),
            Box::new(Expr::call("get_local_id", vec![Expr::Int(dim)])),
        )
    }

    fn lane_id() -> Expr {
        Expr::Cast(
            Type::Scalar(Scalar::Long),
            Box::new(Expr::call("get_sub_group_local_id", vec![])),
        )
    }

    fn flat_local_id(&self) -> Expr {
        Expr::bin(
            BinOp::Add,
            Expr::bin(BinOp::Mul, Self::local_id(1), Expr::Int(self.wgs[0])),
            Self::local_id(0),
        )
    }

    fn define_scalar(&mut self, out: &mut Vec<Stmt>, v: ValueId, init: Expr) -> Result<(), Error> {
        let scalar = self.scalar_of(self.func.value_ty(v))?;
        let name = format!("v{}", v.index());
        out.push(Stmt::VarDecl {
            space: AddrSpace::Private,
            ty: Type::Scalar(scalar),
            name: name.clone(),
            array: None,
            init: Some(init),
        });
        self.vals.insert(v, Val::Scalar(Expr::var(name)));
        Ok(())
    }

    /* ---------------- regions ---------------- */

    /// Lower all instructions of `region`; `yields` are the assignment
    /// targets of a terminating `yield`.
    fn region_stmts(&mut self, region: RegionId, yields: &[Expr]) -> Result<Vec<Stmt>, Error> {
        let mut out = Vec::new();
        for &inst in &self.func.region(region).insts().to_vec() {
            self.inst_stmts(inst, &mut out, yields)?;
        }
        Ok(out)
    }

    fn inst_stmts(
        &mut self,
        inst: InstId,
        out: &mut Vec<Stmt>,
        yields: &[Expr],
    ) -> Result<(), Error> {
        let kind = self.func.inst(inst).kind().clone();
        let ops = self.func.operand_values(inst);
        let results = self.func.inst(inst).results().to_vec();

        match kind {
            InstKind::Constant(imm) => self.lower_constant(out, results[0], imm)?,
            InstKind::Barrier { fence } => {
                let mut flags: Option<Expr> = None;
                if fence.contains(AddressSpaceFlags::GLOBAL) {
                    flags = Some(Expr::var("CLK_GLOBAL_MEM_FENCE"));
                }
                if fence.contains(AddressSpaceFlags::LOCAL) {
                    let local = Expr::var("CLK_LOCAL_MEM_FENCE");
                    flags = Some(match flags {
                        None => local,
                        Some(f) => Expr::bin(BinOp::Or, f, local),
                    });
                }
                out.push(Stmt::Expr(Expr::call(
                    "barrier",
                    vec![flags.unwrap_or_else(|| Expr::var("CLK_LOCAL_MEM_FENCE"))],
                )));
            }
            InstKind::LifetimeStop => {}
            InstKind::Alloca { stack_ptr } => {
                let (elem, shape, stride) = match self.kind(results[0]).clone() {
                    TypeKind::Memref {
                        elem,
                        shape,
                        stride,
                        ..
                    } => (elem, shape, stride),
                    _ => unreachable!("verified alloca result"),
                };
                let scalar = self.scalar_of(elem)?;
                let offset = if stack_ptr >= 0 {
                    stack_ptr as usize
                } else {
                    self.stack.offset(results[0]).unwrap_or(0)
                };
                let name = format!("v{}", results[0].index());
                let ptr = Expr::Cast(
                    Type::Pointer {
                        elem: scalar,
                        space: AddrSpace::Local,
                    },
                    Box::new(Expr::bin(
                        BinOp::Add,
                        Expr::Cast(
                            Type::Pointer {
                                elem: Scalar::Uchar,
                                space: AddrSpace::Local,
                            },
                            Box::new(Expr::var("stack")),
                        ),
                        Expr::Int(offset as i64),
                    )),
                );
                out.push(Stmt::VarDecl {
                    space: AddrSpace::Private,
                    ty: Type::Pointer {
                        elem: scalar,
                        space: AddrSpace::Local,
                    },
                    name: name.clone(),
                    array: None,
                    init: Some(ptr),
                });
                self.vals.insert(
                    results[0],
                    Val::Memref(MemrefVal {
                        ptr: Expr::var(name),
                        shape: shape.iter().map(|&s| Expr::Int(s)).collect(),
                        stride: stride.iter().map(|&s| Expr::Int(s)).collect(),
                        elem: scalar,
                        space: AddrSpace::Local,
                    }),
                );
            }
            InstKind::Load => self.lower_load(out, inst, &ops, results[0])?,
            InstKind::Store => {
                let val = self.scalar_val(ops[0])?;
                let m = self.memref_val(ops[1])?;
                let indices: Vec<Expr> = ops[2..]
                    .iter()
                    .map(|&v| self.scalar_val(v))
                    .collect::<Result<_, _>>()?;
                out.push(Stmt::Assign {
                    lhs: Self::mem_elem(&m, &indices),
                    rhs: val,
                });
            }
            InstKind::Size { mode } => {
                let init = match self.val(ops[0])? {
                    Val::Memref(m) => m.shape[mode as usize].clone(),
                    Val::Group(_) => Expr::Cast(
                        Type::Scalar(Scalar::Long),
                        Box::new(Expr::call("get_num_groups", vec![Expr::Int(2)])),
                    ),
                    _ => return Err(Error::UnsupportedType("size of non-memref".into())),
                };
                self.define_scalar(out, results[0], init)?;
            }
            InstKind::Subview {
                static_offsets,
                static_sizes,
                num_dyn_offsets,
            } => {
                self.lower_subview(
                    out,
                    &ops,
                    results[0],
                    &static_offsets,
                    &static_sizes,
                    num_dyn_offsets,
                )?;
            }
            InstKind::Expand { mode, static_shape } => {
                let base = self.memref_val(ops[0])?;
                let m = mode as usize;
                let mut dyn_it = ops[1..].iter();
                let mut shape: Vec<Expr> = base.shape[..m].to_vec();
                let mut stride: Vec<Expr> = base.stride[..m].to_vec();
                let mut s = base.stride[m].clone();
                for &entry in &static_shape {
                    let extent = if is_dynamic_value(entry) {
                        let &v = dyn_it.next().ok_or_else(|| {
                            Error::UnsupportedType("expand operand count".into())
                        })?;
                        self.scalar_val(v)?
                    } else {
                        Expr::Int(entry)
                    };
                    shape.push(extent.clone());
                    stride.push(s.clone());
                    s = Expr::bin(BinOp::Mul, s, extent);
                }
                shape.extend_from_slice(&base.shape[m + 1..]);
                stride.extend_from_slice(&base.stride[m + 1..]);
                self.vals.insert(
                    results[0],
                    Val::Memref(MemrefVal {
                        ptr: base.ptr.clone(),
                        shape,
                        stride,
                        elem: base.elem,
                        space: base.space,
                    }),
                );
            }
            InstKind::Fuse { from, to } => {
                let base = self.memref_val(ops[0])?;
                let (f, t) = (from as usize, to as usize);
                let mut prod = base.shape[f].clone();
                for e in &base.shape[f + 1..=t] {
                    prod = Expr::bin(BinOp::Mul, prod, e.clone());
                }
                let mut shape: Vec<Expr> = base.shape[..f].to_vec();
                let mut stride: Vec<Expr> = base.stride[..f].to_vec();
                shape.push(prod);
                stride.push(base.stride[f].clone());
                shape.extend_from_slice(&base.shape[t + 1..]);
                stride.extend_from_slice(&base.stride[t + 1..]);
                self.vals.insert(
                    results[0],
                    Val::Memref(MemrefVal {
                        ptr: base.ptr.clone(),
                        shape,
                        stride,
                        elem: base.elem,
                        space: base.space,
                    }),
                );
            }
            InstKind::For { has_step } => self.lower_for(out, inst, &ops, &results, has_step)?,
            InstKind::Foreach { num_loop_vars } => {
                self.lower_foreach(out, inst, &ops, num_loop_vars)?
            }
            InstKind::If => self.lower_if(out, inst, &ops, &results)?,
            InstKind::Parallel => {
                let body = self.func.inst(inst).regions()[0];
                let stmts = self.region_stmts(body, &[])?;
                out.push(Stmt::Block(stmts));
            }
            InstKind::Yield => {
                for (&v, target) in ops.iter().zip(yields.iter()) {
                    let rhs = self.scalar_val(v)?;
                    out.push(Stmt::Assign {
                        lhs: target.clone(),
                        rhs,
                    });
                }
            }
            InstKind::GroupId => {
                let e = Expr::Cast(
                    Type::Scalar(Scalar::Long),
                    Box::new(Expr::call("get_group_id", vec![Expr::Int(2)])),
                );
                self.define_scalar(out, results[0], e)?;
            }
            InstKind::NumGroups => {
                let e = Expr::Cast(
                    Type::Scalar(Scalar::Long),
                    Box::new(Expr::call("get_num_groups", vec![Expr::Int(2)])),
                );
                self.define_scalar(out, results[0], e)?;
            }
            InstKind::NumSubgroups => {
                let e = Expr::Cast(
                    Type::Scalar(Scalar::Int),
                    Box::new(Expr::call("get_num_sub_groups", vec![])),
                );
                self.define_scalar(out, results[0], e)?;
            }
            InstKind::SubgroupSize => {
                let e = Expr::Cast(
                    Type::Scalar(Scalar::Int),
                    Box::new(Expr::call("get_sub_group_size", vec![])),
                );
                self.define_scalar(out, results[0], e)?;
            }
            InstKind::SubgroupId => {
                let e = Expr::Cast(
                    Type::Scalar(Scalar::Int),
                    Box::new(Expr::call("get_sub_group_id", vec![])),
                );
                self.define_scalar(out, results[0], e)?;
            }
            InstKind::SubgroupLocalId => {
                let e = Expr::Cast(
                    Type::Scalar(Scalar::Int),
                    Box::new(Expr::call("get_sub_group_local_id", vec![])),
                );
                self.define_scalar(out, results[0], e)?;
            }
            InstKind::Cast => self.lower_cast(out, &ops, results[0])?,
            InstKind::Add
            | InstKind::Sub
            | InstKind::Mul
            | InstKind::Div
            | InstKind::Rem
            | InstKind::Max
            | InstKind::Min
            | InstKind::Shl
            | InstKind::Shr
            | InstKind::And
            | InstKind::Or
            | InstKind::Xor => self.lower_binary(out, &kind, &ops, results[0])?,
            InstKind::Abs
            | InstKind::Neg
            | InstKind::Not
            | InstKind::Conj
            | InstKind::Im
            | InstKind::Re => self.lower_unary(out, &kind, &ops, results[0])?,
            InstKind::Equal
            | InstKind::NotEqual
            | InstKind::GreaterThan
            | InstKind::GreaterThanEqual
            | InstKind::LessThan
            | InstKind::LessThanEqual => self.lower_compare(out, &kind, &ops, results[0])?,
            InstKind::Cos | InstKind::Sin | InstKind::Exp | InstKind::Exp2 => {
                self.lower_math(out, &kind, &ops, results[0])?
            }
            InstKind::SubgroupBroadcast => {
                let a = self.scalar_val(ops[0])?;
                let idx = Expr::Cast(
                    Type::Scalar(Scalar::Uint),
                    Box::new(self.scalar_val(ops[1])?),
                );
                let ty = self.func.value_ty(results[0]);
                let e = if self.is_complex_ty(ty) {
                    let s = self.scalar_of(ty)?;
                    Expr::Vector(
                        s,
                        vec![
                            Expr::call(
                                "sub_group_broadcast",
                                vec![Expr::Member(Box::new(a.clone()), "x"), idx.clone()],
                            ),
                            Expr::call(
                                "sub_group_broadcast",
                                vec![Expr::Member(Box::new(a), "y"), idx],
                            ),
                        ],
                    )
                } else {
                    Expr::call("sub_group_broadcast", vec![a, idx])
                };
                self.define_scalar(out, results[0], e)?;
            }
            InstKind::SubgroupReduceAdd
            | InstKind::SubgroupReduceMax
            | InstKind::SubgroupReduceMin
            | InstKind::SubgroupInclusiveScanAdd
            | InstKind::SubgroupInclusiveScanMax
            | InstKind::SubgroupInclusiveScanMin
            | InstKind::SubgroupExclusiveScanAdd
            | InstKind::SubgroupExclusiveScanMax
            | InstKind::SubgroupExclusiveScanMin => {
                self.lower_subgroup_op(out, &kind, &ops, results[0])?
            }
            InstKind::Gemm { trans_a, trans_b } => {
                self.lower_gemm(out, &ops, trans_a, trans_b)?
            }
            InstKind::Gemv { trans_a } => self.lower_gemv(out, &ops, trans_a)?,
            InstKind::Ger => self.lower_ger(out, &ops)?,
            InstKind::Hadamard => self.lower_hadamard(out, &ops)?,
            InstKind::Axpby { trans_a } => self.lower_axpby(out, &ops, trans_a)?,
            InstKind::Sum { trans_a } => self.lower_sum(out, &ops, trans_a)?,
            InstKind::Cumsum { mode } => self.lower_cumsum(out, &ops, mode)?,
            InstKind::CoopmatrixLoad => self.lower_coop_load(out, &ops, results[0])?,
            InstKind::CoopmatrixStore => self.lower_coop_store(out, &ops)?,
            InstKind::CoopmatrixMulAdd => self.lower_coop_mul_add(out, &ops, results[0])?,
            InstKind::CoopmatrixScale => self.lower_coop_scale(out, &ops, results[0])?,
            InstKind::CoopmatrixExtract => self.lower_coop_extract(out, &ops, results[0])?,
            InstKind::CoopmatrixInsert => self.lower_coop_insert(out, &ops, results[0])?,
            InstKind::CoopmatrixApply => self.lower_coop_apply(out, inst, &ops, results[0])?,
            InstKind::CoopmatrixReduceAdd { mode } => {
                self.lower_coop_reduce(out, &ops, results[0], mode, "add")?
            }
            InstKind::CoopmatrixReduceMax { mode } => {
                self.lower_coop_reduce(out, &ops, results[0], mode, "max")?
            }
            InstKind::CoopmatrixReduceMin { mode } => {
                self.lower_coop_reduce(out, &ops, results[0], mode, "min")?
            }
            InstKind::CoopmatrixPrefetch { rows, cols } => {
                let m = self.memref_val(ops[0])?;
                if m.space == AddrSpace::Global {
                    let pos0 = self.scalar_val(ops[1])?;
                    let pos1 = self.scalar_val(ops[2])?;
                    let base = Expr::bin(
                        BinOp::Add,
                        m.ptr.clone(),
                        Self::linear_index(&m.stride, &[pos0, pos1]),
                    );
                    out.push(Stmt::Expr(Expr::call(
                        "prefetch",
                        vec![base, Expr::Int(rows * cols)],
                    )));
                }
            }
        }
        Ok(())
    }

    /* ---------------- simple value ops ---------------- */

    fn immediate_expr(&self, scalar: Scalar, imm: &Immediate) -> Expr {
        match (imm, scalar) {
            (Immediate::Bool(b), _) => Expr::Int(*b as i64),
            (Immediate::Int(i), _) => Expr::Int(*i),
            (Immediate::Float(f), Scalar::Double) => Expr::Float(*f),
            (Immediate::Float(f), _) => Expr::FloatSingle(*f),
            (Immediate::Complex(re, im), Scalar::Double2) => Expr::Vector(
                Scalar::Double2,
                vec![Expr::Float(*re), Expr::Float(*im)],
            ),
            (Immediate::Complex(re, im), _) => Expr::Vector(
                Scalar::Float2,
                vec![Expr::FloatSingle(*re), Expr::FloatSingle(*im)],
            ),
        }
    }

    fn lower_constant(
        &mut self,
        out: &mut Vec<Stmt>,
        result: ValueId,
        imm: Immediate,
    ) -> Result<(), Error> {
        if matches!(self.kind(result), TypeKind::Coopmatrix { .. }) {
            let res = self.define_coop(out, result)?;
            let scalar = self.component_scalar(self.func.value_ty(result))?;
            let lit = self.immediate_expr(scalar, &imm);
            let s = self.fresh("s");
            out.push(Self::for_long(
                &s,
                Expr::Int(0),
                Expr::Int(res.len() as i64),
                vec![Stmt::Assign {
                    lhs: Expr::index(Expr::var(res.name.clone()), Expr::var(s.clone())),
                    rhs: lit,
                }],
            ));
            return Ok(());
        }
        let scalar = self.scalar_of(self.func.value_ty(result))?;
        let lit = self.immediate_expr(scalar, &imm);
        self.define_scalar(out, result, lit)
    }

    fn lower_load(
        &mut self,
        out: &mut Vec<Stmt>,
        _inst: InstId,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        match self.val(ops[0])?.clone() {
            Val::Memref(m) => {
                let indices: Vec<Expr> = ops[1..]
                    .iter()
                    .map(|&v| self.scalar_val(v))
                    .collect::<Result<_, _>>()?;
                let e = Self::mem_elem(&m, &indices);
                self.define_scalar(out, result, e)
            }
            Val::Group(g) => {
                let (elem, shape, stride) = match self.ctx.kind(g.of) {
                    TypeKind::Memref {
                        elem,
                        shape,
                        stride,
                        ..
                    } => (*elem, shape.clone(), stride.clone()),
                    _ => unreachable!("verified group"),
                };
                if shape.iter().chain(stride.iter()).any(|&e| is_dynamic_value(e)) {
                    return Err(Error::UnsupportedType(
                        "group of memref with dynamic extents".into(),
                    ));
                }
                let scalar = self.scalar_of(elem)?;
                let idx = self.scalar_val(ops[1])?;
                let mut ptr = Expr::index(g.ptr.clone(), idx);
                if g.offset != Expr::Int(0) {
                    ptr = Expr::bin(BinOp::Add, ptr, g.offset.clone());
                }
                let name = format!("v{}", result.index());
                out.push(Stmt::VarDecl {
                    space: AddrSpace::Private,
                    ty: Type::Pointer {
                        elem: scalar,
                        space: AddrSpace::Global,
                    },
                    name: name.clone(),
                    array: None,
                    init: Some(ptr),
                });
                self.vals.insert(
                    result,
                    Val::Memref(MemrefVal {
                        ptr: Expr::var(name),
                        shape: shape.iter().map(|&s| Expr::Int(s)).collect(),
                        stride: stride.iter().map(|&s| Expr::Int(s)).collect(),
                        elem: scalar,
                        space: AddrSpace::Global,
                    }),
                );
                Ok(())
            }
            _ => Err(Error::UnsupportedType("load from non-memref".into())),
        }
    }

    fn lower_subview(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
        static_offsets: &[i64],
        static_sizes: &[i64],
        num_dyn_offsets: usize,
    ) -> Result<(), Error> {
        let base = self.memref_val(ops[0])?;
        let mut dyn_offsets = ops[1..1 + num_dyn_offsets].iter();
        let mut dyn_sizes = ops[1 + num_dyn_offsets..].iter();

        let mut offset: Option<Expr> = None;
        let mut shape = Vec::new();
        let mut stride = Vec::new();
        for i in 0..static_offsets.len() {
            let off = if is_dynamic_value(static_offsets[i]) {
                let &v = dyn_offsets
                    .next()
                    .ok_or_else(|| Error::UnsupportedType("subview offset operand count".into()))?;
                Some(self.scalar_val(v)?)
            } else if static_offsets[i] != 0 {
                Some(Expr::Int(static_offsets[i]))
            } else {
                None
            };
            if let Some(off) = off {
                let term = match &base.stride[i] {
                    Expr::Int(1) => off,
                    s => Expr::bin(BinOp::Mul, off, s.clone()),
                };
                offset = Some(match offset {
                    None => term,
                    Some(o) => Expr::bin(BinOp::Add, o, term),
                });
            }
            let size = static_sizes[i];
            if is_dynamic_value(size) {
                let &v = dyn_sizes
                    .next()
                    .ok_or_else(|| Error::UnsupportedType("subview size operand count".into()))?;
                shape.push(self.scalar_val(v)?);
                stride.push(base.stride[i].clone());
            } else if size > 0 {
                shape.push(Expr::Int(size));
                stride.push(base.stride[i].clone());
            }
        }

        let ptr = match offset {
            None => base.ptr.clone(),
            Some(o) => Expr::bin(BinOp::Add, base.ptr.clone(), o),
        };
        let name = format!("v{}", result.index());
        out.push(Stmt::VarDecl {
            space: AddrSpace::Private,
            ty: Type::Pointer {
                elem: base.elem,
                space: base.space,
            },
            name: name.clone(),
            array: None,
            init: Some(ptr),
        });
        self.vals.insert(
            result,
            Val::Memref(MemrefVal {
                ptr: Expr::var(name),
                shape,
                stride,
                elem: base.elem,
                space: base.space,
            }),
        );
        Ok(())
    }

    /* ---------------- structured control flow ---------------- */

    fn for_long(var: &str, init: Expr, cond: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::For {
            ty: Type::Scalar(Scalar::Long),
            var: var.to_string(),
            init,
            cond,
            step: Expr::Int(1),
            body,
        }
    }

    fn for_strided(ty: Scalar, var: &str, init: Expr, cond: Expr, step: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::For {
            ty: Type::Scalar(ty),
            var: var.to_string(),
            init,
            cond,
            step,
            body,
        }
    }

    fn lower_for(
        &mut self,
        out: &mut Vec<Stmt>,
        inst: InstId,
        ops: &[ValueId],
        results: &[ValueId],
        has_step: bool,
    ) -> Result<(), Error> {
        let init_at = if has_step { 3 } else { 2 };
        let from = self.scalar_val(ops[0])?;
        let to = self.scalar_val(ops[1])?;
        let step = if has_step {
            self.scalar_val(ops[2])?
        } else {
            Expr::Int(1)
        };
        let iv_scalar = self.scalar_of(self.func.value_ty(ops[0]))?;

        let body_region = self.func.inst(inst).regions()[0];
        let params = self.func.region(body_region).params().to_vec();

        // Loop-carried values live in mutable variables initialized from the
        // loop inits; the body's yield writes them back.
        let mut yields = Vec::new();
        for (i, &r) in results.iter().enumerate() {
            let init = self.scalar_val(ops[init_at + i])?;
            self.define_scalar(out, r, init)?;
            let e = self.scalar_val(r)?;
            self.vals.insert(params[1 + i], Val::Scalar(e.clone()));
            yields.push(e);
        }

        let iv_name = format!("v{}", params[0].index());
        self.vals
            .insert(params[0], Val::Scalar(Expr::var(iv_name.clone())));
        let body = self.region_stmts(body_region, &yields)?;
        out.push(Self::for_strided(iv_scalar, &iv_name, from, to, step, body));
        Ok(())
    }

    fn lower_foreach(
        &mut self,
        out: &mut Vec<Stmt>,
        inst: InstId,
        ops: &[ValueId],
        num_loop_vars: usize,
    ) -> Result<(), Error> {
        if num_loop_vars > 3 {
            return Err(Error::UnsupportedType("foreach with more than 3 loop variables".into()));
        }
        let body_region = self.func.inst(inst).regions()[0];
        let params = self.func.region(body_region).params().to_vec();

        let mut guard: Option<Expr> = None;
        for i in 0..num_loop_vars {
            let from = self.scalar_val(ops[i])?;
            let to = self.scalar_val(ops[num_loop_vars + i])?;
            let scalar = self.scalar_of(self.func.value_ty(ops[i]))?;
            // The batch axis is z; additional loop variables take y and x.
            let axis = 2 - i as i64;
            let gid = Expr::Cast(
                Type::Scalar(scalar),
                Box::new(Expr::call("get_global_id", vec![Expr::Int(axis)])),
            );
            self.define_scalar(out, params[i], Expr::bin(BinOp::Add, from, gid))?;
            let v = self.scalar_val(params[i])?;
            let in_range = Expr::bin(BinOp::Lt, v, to);
            guard = Some(match guard {
                None => in_range,
                Some(g) => Expr::bin(BinOp::LogicalAnd, g, in_range),
            });
        }

        let body = self.region_stmts(body_region, &[])?;
        out.push(Stmt::If {
            cond: guard.unwrap_or(Expr::Int(1)),
            then_branch: body,
            else_branch: Vec::new(),
        });
        Ok(())
    }

    fn lower_if(
        &mut self,
        out: &mut Vec<Stmt>,
        inst: InstId,
        ops: &[ValueId],
        results: &[ValueId],
    ) -> Result<(), Error> {
        let cond = self.scalar_val(ops[0])?;
        let mut yields = Vec::new();
        for &r in results {
            let scalar = self.scalar_of(self.func.value_ty(r))?;
            let zero = self.zero_of(scalar);
            self.define_scalar(out, r, zero)?;
            yields.push(self.scalar_val(r)?);
        }
        let then_region = self.func.inst(inst).regions()[0];
        let else_region = self.func.inst(inst).regions()[1];
        let then_branch = self.region_stmts(then_region, &yields)?;
        let else_branch = self.region_stmts(else_region, &yields)?;
        out.push(Stmt::If {
            cond,
            then_branch,
            else_branch,
        });
        Ok(())
    }

    /* ---------------- scalar arithmetic ---------------- */

    fn lower_cast(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        if matches!(self.kind(result), TypeKind::Coopmatrix { .. }) {
            let a = self.coop_val(ops[0])?;
            let res = self.define_coop(out, result)?;
            let s = self.fresh("s");
            let elem = Expr::index(Expr::var(a.name.clone()), Expr::var(s.clone()));
            let casted = self.cast_expr(a.comp, res.comp, elem)?;
            out.push(Self::for_long(
                &s,
                Expr::Int(0),
                Expr::Int(res.len() as i64),
                vec![Stmt::Assign {
                    lhs: Expr::index(Expr::var(res.name.clone()), Expr::var(s.clone())),
                    rhs: casted,
                }],
            ));
            return Ok(());
        }
        let a = self.scalar_val(ops[0])?;
        let e = self.cast_expr(self.func.value_ty(ops[0]), self.func.value_ty(result), a)?;
        self.define_scalar(out, result, e)
    }

    fn binary_scalar_expr(
        &self,
        kind: &InstKind,
        scalar: Scalar,
        a: Expr,
        b: Expr,
    ) -> Result<Expr, Error> {
        let is_float = matches!(scalar, Scalar::Half | Scalar::Float | Scalar::Double);
        Ok(match kind {
            InstKind::Add => Self::add_expr(scalar, a, b),
            InstKind::Sub => Expr::bin(BinOp::Sub, a, b),
            InstKind::Mul => Self::mul_expr(scalar, a, b),
            InstKind::Div => Self::div_expr(scalar, a, b),
            InstKind::Rem => {
                if is_float {
                    Expr::call("fmod", vec![a, b])
                } else {
                    Expr::bin(BinOp::Rem, a, b)
                }
            }
            InstKind::Max => {
                if is_float {
                    Expr::call("fmax", vec![a, b])
                } else {
                    Expr::call("max", vec![a, b])
                }
            }
            InstKind::Min => {
                if is_float {
                    Expr::call("fmin", vec![a, b])
                } else {
                    Expr::call("min", vec![a, b])
                }
            }
            InstKind::Shl => Expr::bin(BinOp::Shl, a, b),
            InstKind::Shr => Expr::bin(BinOp::Shr, a, b),
            InstKind::And => Expr::bin(BinOp::And, a, b),
            InstKind::Or => Expr::bin(BinOp::Or, a, b),
            InstKind::Xor => Expr::bin(BinOp::Xor, a, b),
            _ => return Err(Error::UnsupportedType("not a binary opcode".into())),
        })
    }

    fn lower_binary(
        &mut self,
        out: &mut Vec<Stmt>,
        kind: &InstKind,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        if matches!(self.kind(result), TypeKind::Coopmatrix { .. }) {
            let a = self.coop_val(ops[0])?;
            let b = self.coop_val(ops[1])?;
            let res = self.define_coop(out, result)?;
            let scalar = self.component_scalar(self.func.value_ty(result))?;
            let s = self.fresh("s");
            let ea = Expr::index(Expr::var(a.name.clone()), Expr::var(s.clone()));
            let eb = Expr::index(Expr::var(b.name.clone()), Expr::var(s.clone()));
            let e = self.binary_scalar_expr(kind, scalar, ea, eb)?;
            out.push(Self::for_long(
                &s,
                Expr::Int(0),
                Expr::Int(res.len() as i64),
                vec![Stmt::Assign {
                    lhs: Expr::index(Expr::var(res.name.clone()), Expr::var(s.clone())),
                    rhs: e,
                }],
            ));
            return Ok(());
        }
        let scalar = self.scalar_of(self.func.value_ty(result))?;
        let a = self.scalar_val(ops[0])?;
        let b = self.scalar_val(ops[1])?;
        let e = self.binary_scalar_expr(kind, scalar, a, b)?;
        self.define_scalar(out, result, e)
    }

    fn unary_scalar_expr(
        &self,
        kind: &InstKind,
        scalar: Scalar,
        a: Expr,
    ) -> Result<Expr, Error> {
        let is_float = matches!(scalar, Scalar::Half | Scalar::Float | Scalar::Double);
        let is_complex = Self::is_complex_scalar(scalar);
        Ok(match kind {
            InstKind::Neg => Expr::Unary(UnOp::Neg, Box::new(a)),
            InstKind::Abs => {
                if is_complex {
                    Expr::call("length", vec![a])
                } else if is_float {
                    Expr::call("fabs", vec![a])
                } else {
                    Expr::Cast(Type::Scalar(scalar), Box::new(Expr::call("abs", vec![a])))
                }
            }
            InstKind::Not => {
                if scalar == Scalar::Bool {
                    Expr::Unary(UnOp::LogicalNot, Box::new(a))
                } else {
                    Expr::Unary(UnOp::BitNot, Box::new(a))
                }
            }
            InstKind::Conj => Expr::Vector(
                scalar,
                vec![
                    Expr::Member(Box::new(a.clone()), "x"),
                    Expr::Unary(UnOp::Neg, Box::new(Expr::Member(Box::new(a), "y"))),
                ],
            ),
            InstKind::Im => Expr::Member(Box::new(a), "y"),
            InstKind::Re => Expr::Member(Box::new(a), "x"),
            _ => return Err(Error::UnsupportedType("not a unary opcode".into())),
        })
    }

    fn lower_unary(
        &mut self,
        out: &mut Vec<Stmt>,
        kind: &InstKind,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        if matches!(self.kind(result), TypeKind::Coopmatrix { .. }) {
            let a = self.coop_val(ops[0])?;
            let res = self.define_coop(out, result)?;
            let op_scalar = self.component_scalar(self.func.value_ty(ops[0]))?;
            let s = self.fresh("s");
            let ea = Expr::index(Expr::var(a.name.clone()), Expr::var(s.clone()));
            let e = self.unary_scalar_expr(kind, op_scalar, ea)?;
            out.push(Self::for_long(
                &s,
                Expr::Int(0),
                Expr::Int(res.len() as i64),
                vec![Stmt::Assign {
                    lhs: Expr::index(Expr::var(res.name.clone()), Expr::var(s.clone())),
                    rhs: e,
                }],
            ));
            return Ok(());
        }
        let scalar = self.scalar_of(self.func.value_ty(ops[0]))?;
        let a = self.scalar_val(ops[0])?;
        let e = self.unary_scalar_expr(kind, scalar, a)?;
        self.define_scalar(out, result, e)
    }

    fn lower_compare(
        &mut self,
        out: &mut Vec<Stmt>,
        kind: &InstKind,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let a = self.scalar_val(ops[0])?;
        let b = self.scalar_val(ops[1])?;
        let complex = self.is_complex_ty(self.func.value_ty(ops[0]));
        let e = if complex {
            let ax = Expr::Member(Box::new(a.clone()), "x");
            let ay = Expr::Member(Box::new(a), "y");
            let bx = Expr::Member(Box::new(b.clone()), "x");
            let by = Expr::Member(Box::new(b), "y");
            match kind {
                InstKind::Equal => Expr::bin(
                    BinOp::LogicalAnd,
                    Expr::bin(BinOp::Eq, ax, bx),
                    Expr::bin(BinOp::Eq, ay, by),
                ),
                InstKind::NotEqual => Expr::bin(
                    BinOp::LogicalOr,
                    Expr::bin(BinOp::Ne, ax, bx),
                    Expr::bin(BinOp::Ne, ay, by),
                ),
                _ => return Err(Error::UnsupportedType("ordered complex compare".into())),
            }
        } else {
            let op = match kind {
                InstKind::Equal => BinOp::Eq,
                InstKind::NotEqual => BinOp::Ne,
                InstKind::GreaterThan => BinOp::Gt,
                InstKind::GreaterThanEqual => BinOp::Ge,
                InstKind::LessThan => BinOp::Lt,
                InstKind::LessThanEqual => BinOp::Le,
                _ => return Err(Error::UnsupportedType("not a compare opcode".into())),
            };
            Expr::bin(op, a, b)
        };
        self.define_scalar(out, result, e)
    }

    fn lower_math(
        &mut self,
        out: &mut Vec<Stmt>,
        kind: &InstKind,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let a = self.scalar_val(ops[0])?;
        let ty = self.func.value_ty(ops[0]);
        let e = if self.is_complex_ty(ty) {
            let scalar = self.scalar_of(ty)?;
            let x = Expr::Member(Box::new(a.clone()), "x");
            let y = Expr::Member(Box::new(a), "y");
            let (mag, phase) = match kind {
                InstKind::Exp => (Expr::call("exp", vec![x]), y),
                InstKind::Exp2 => (
                    Expr::call("exp2", vec![x]),
                    Expr::bin(BinOp::Mul, y, Expr::var("M_LN2")),
                ),
                _ => return Err(Error::UnsupportedType("complex trigonometry".into())),
            };
            Expr::Vector(
                scalar,
                vec![
                    Expr::bin(BinOp::Mul, mag.clone(), Expr::call("cos", vec![phase.clone()])),
                    Expr::bin(BinOp::Mul, mag, Expr::call("sin", vec![phase])),
                ],
            )
        } else {
            let name = match kind {
                InstKind::Cos => "cos",
                InstKind::Sin => "sin",
                InstKind::Exp => "exp",
                InstKind::Exp2 => "exp2",
                _ => return Err(Error::UnsupportedType("not a math opcode".into())),
            };
            Expr::call(name, vec![a])
        };
        self.define_scalar(out, result, e)
    }

    fn lower_subgroup_op(
        &mut self,
        out: &mut Vec<Stmt>,
        kind: &InstKind,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let name = match kind {
            InstKind::SubgroupReduceAdd => "sub_group_reduce_add",
            InstKind::SubgroupReduceMax => "sub_group_reduce_max",
            InstKind::SubgroupReduceMin => "sub_group_reduce_min",
            InstKind::SubgroupInclusiveScanAdd => "sub_group_scan_inclusive_add",
            InstKind::SubgroupInclusiveScanMax => "sub_group_scan_inclusive_max",
            InstKind::SubgroupInclusiveScanMin => "sub_group_scan_inclusive_min",
            InstKind::SubgroupExclusiveScanAdd => "sub_group_scan_exclusive_add",
            InstKind::SubgroupExclusiveScanMax => "sub_group_scan_exclusive_max",
            InstKind::SubgroupExclusiveScanMin => "sub_group_scan_exclusive_min",
            _ => return Err(Error::UnsupportedType("not a subgroup opcode".into())),
        };
        let a = self.scalar_val(ops[0])?;
        let ty = self.func.value_ty(result);
        let e = if self.is_complex_ty(ty) {
            let scalar = self.scalar_of(ty)?;
            Expr::Vector(
                scalar,
                vec![
                    Expr::call(name, vec![Expr::Member(Box::new(a.clone()), "x")]),
                    Expr::call(name, vec![Expr::Member(Box::new(a), "y")]),
                ],
            )
        } else {
            Expr::call(name, vec![a])
        };
        self.define_scalar(out, result, e)
    }

    /* ---------------- BLAS ---------------- */

    fn memref_elem_ty(&self, v: ValueId) -> Ty {
        match self.ctx.kind(self.func.value_ty(v)) {
            TypeKind::Memref { elem, .. } => *elem,
            _ => self.func.value_ty(v),
        }
    }

    /// `α·acc + β·C` with promotion-aware casts; drops the β term when β is
    /// a literal zero so uninitialized output is never read.
    fn blas_update(
        &self,
        c_ty: Ty,
        c_lhs: Expr,
        alpha_v: ValueId,
        acc_ty: Ty,
        acc: Expr,
        beta_v: ValueId,
    ) -> Result<Expr, Error> {
        let alpha = self.scalar_val(alpha_v)?;
        let alpha_acc = self.cast_expr(self.func.value_ty(alpha_v), acc_ty, alpha)?;
        let acc_scalar = self.scalar_of(acc_ty)?;
        let scaled = Self::mul_expr(acc_scalar, alpha_acc, acc);
        let scaled_c = self.cast_expr(acc_ty, c_ty, scaled)?;
        if self.is_const_zero(beta_v) {
            return Ok(scaled_c);
        }
        let beta = self.scalar_val(beta_v)?;
        let beta_c = self.cast_expr(self.func.value_ty(beta_v), c_ty, beta)?;
        let c_scalar = self.scalar_of(c_ty)?;
        Ok(Self::add_expr(
            c_scalar,
            scaled_c,
            Self::mul_expr(c_scalar, beta_c, c_lhs),
        ))
    }

    fn decl_long(name: &str, init: Expr) -> Stmt {
        Stmt::VarDecl {
            space: AddrSpace::Private,
            ty: Type::Scalar(Scalar::Long),
            name: name.to_string(),
            array: None,
            init: Some(init),
        }
    }

    fn lower_gemm(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        trans_a: Transpose,
        trans_b: Transpose,
    ) -> Result<(), Error> {
        let a = self.memref_val(ops[1])?;
        let b = self.memref_val(ops[2])?;
        let c = self.memref_val(ops[4])?;
        let a_ty = self.memref_elem_ty(ops[1]);
        let b_ty = self.memref_elem_ty(ops[2]);
        let c_ty = self.memref_elem_ty(ops[4]);
        let ab_ty = self
            .ctx
            .promote(a_ty, b_ty)
            .ok_or_else(|| Error::UnsupportedType("gemm operand promotion".into()))?;
        let ab_scalar = self.scalar_of(ab_ty)?;

        let ak = if trans_a == Transpose::T { 0 } else { 1 };
        let k_extent = a.shape[ak].clone();

        let mv = self.fresh("m");
        let nv = self.fresh("n");
        let kv = self.fresh("k");
        let accv = self.fresh("acc");
        let (m, n, k) = (Expr::var(mv.clone()), Expr::var(nv.clone()), Expr::var(kv.clone()));

        let a_idx = if trans_a == Transpose::T {
            [k.clone(), m.clone()]
        } else {
            [m.clone(), k.clone()]
        };
        let b_idx = if trans_b == Transpose::T {
            [n.clone(), k.clone()]
        } else {
            [k.clone(), n.clone()]
        };
        let a_e = self.cast_expr(a_ty, ab_ty, Self::mem_elem(&a, &a_idx))?;
        let b_e = self.cast_expr(b_ty, ab_ty, Self::mem_elem(&b, &b_idx))?;
        let prod = Self::mul_expr(ab_scalar, a_e, b_e);
        let k_body = vec![Stmt::Assign {
            lhs: Expr::var(accv.clone()),
            rhs: Self::add_expr(ab_scalar, Expr::var(accv.clone()), prod),
        }];

        let c_lhs = Self::mem_elem(&c, &[m, n]);
        let update = self.blas_update(
            c_ty,
            c_lhs.clone(),
            ops[0],
            ab_ty,
            Expr::var(accv.clone()),
            ops[3],
        )?;

        let m_body = vec![
            Stmt::VarDecl {
                space: AddrSpace::Private,
                ty: Type::Scalar(ab_scalar),
                name: accv,
                array: None,
                init: Some(self.zero_of(ab_scalar)),
            },
            Self::for_long(&kv, Expr::Int(0), k_extent, k_body),
            Stmt::Assign {
                lhs: c_lhs,
                rhs: update,
            },
        ];
        let m_loop = Self::for_strided(
            Scalar::Long,
            &mv,
            Self::local_id(0),
            c.shape[0].clone(),
            Expr::Int(self.wgs[0]),
            m_body,
        );
        out.push(Self::for_strided(
            Scalar::Long,
            &nv,
            Self::local_id(1),
            c.shape[1].clone(),
            Expr::Int(self.wgs[1]),
            vec![m_loop],
        ));
        Ok(())
    }

    fn lower_gemv(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        trans_a: Transpose,
    ) -> Result<(), Error> {
        let a = self.memref_val(ops[1])?;
        let b = self.memref_val(ops[2])?;
        let c = self.memref_val(ops[4])?;
        let a_ty = self.memref_elem_ty(ops[1]);
        let b_ty = self.memref_elem_ty(ops[2]);
        let c_ty = self.memref_elem_ty(ops[4]);
        let ab_ty = self
            .ctx
            .promote(a_ty, b_ty)
            .ok_or_else(|| Error::UnsupportedType("gemv operand promotion".into()))?;
        let ab_scalar = self.scalar_of(ab_ty)?;

        let ak = if trans_a == Transpose::T { 0 } else { 1 };
        let k_extent = a.shape[ak].clone();

        let mv = self.fresh("m");
        let kv = self.fresh("k");
        let accv = self.fresh("acc");
        let (m, k) = (Expr::var(mv.clone()), Expr::var(kv.clone()));

        let a_idx = if trans_a == Transpose::T {
            [k.clone(), m.clone()]
        } else {
            [m.clone(), k.clone()]
        };
        let a_e = self.cast_expr(a_ty, ab_ty, Self::mem_elem(&a, &a_idx))?;
        let b_e = self.cast_expr(b_ty, ab_ty, Self::mem_elem(&b, &[k]))?;
        let k_body = vec![Stmt::Assign {
            lhs: Expr::var(accv.clone()),
            rhs: Self::add_expr(
                ab_scalar,
                Expr::var(accv.clone()),
                Self::mul_expr(ab_scalar, a_e, b_e),
            ),
        }];

        let c_lhs = Self::mem_elem(&c, &[m]);
        let update =
            self.blas_update(c_ty, c_lhs.clone(), ops[0], ab_ty, Expr::var(accv.clone()), ops[3])?;
        let m_body = vec![
            Stmt::VarDecl {
                space: AddrSpace::Private,
                ty: Type::Scalar(ab_scalar),
                name: accv,
                array: None,
                init: Some(self.zero_of(ab_scalar)),
            },
            Self::for_long(&kv, Expr::Int(0), k_extent, k_body),
            Stmt::Assign {
                lhs: c_lhs,
                rhs: update,
            },
        ];
        out.push(Self::for_strided(
            Scalar::Long,
            &mv,
            self.flat_local_id(),
            c.shape[0].clone(),
            Expr::Int(self.wgs[0] * self.wgs[1]),
            m_body,
        ));
        Ok(())
    }

    fn lower_ger(&mut self, out: &mut Vec<Stmt>, ops: &[ValueId]) -> Result<(), Error> {
        let a = self.memref_val(ops[1])?;
        let b = self.memref_val(ops[2])?;
        let c = self.memref_val(ops[4])?;
        let a_ty = self.memref_elem_ty(ops[1]);
        let b_ty = self.memref_elem_ty(ops[2]);
        let c_ty = self.memref_elem_ty(ops[4]);
        let ab_ty = self
            .ctx
            .promote(a_ty, b_ty)
            .ok_or_else(|| Error::UnsupportedType("ger operand promotion".into()))?;
        let ab_scalar = self.scalar_of(ab_ty)?;

        let mv = self.fresh("m");
        let nv = self.fresh("n");
        let (m, n) = (Expr::var(mv.clone()), Expr::var(nv.clone()));

        let a_e = self.cast_expr(a_ty, ab_ty, Self::mem_elem(&a, &[m.clone()]))?;
        let b_e = self.cast_expr(b_ty, ab_ty, Self::mem_elem(&b, &[n.clone()]))?;
        let acc = Self::mul_expr(ab_scalar, a_e, b_e);
        let c_lhs = Self::mem_elem(&c, &[m, n]);
        let update = self.blas_update(c_ty, c_lhs.clone(), ops[0], ab_ty, acc, ops[3])?;

        let m_loop = Self::for_strided(
            Scalar::Long,
            &mv,
            Self::local_id(0),
            c.shape[0].clone(),
            Expr::Int(self.wgs[0]),
            vec![Stmt::Assign {
                lhs: c_lhs,
                rhs: update,
            }],
        );
        out.push(Self::for_strided(
            Scalar::Long,
            &nv,
            Self::local_id(1),
            c.shape[1].clone(),
            Expr::Int(self.wgs[1]),
            vec![m_loop],
        ));
        Ok(())
    }

    fn lower_hadamard(&mut self, out: &mut Vec<Stmt>, ops: &[ValueId]) -> Result<(), Error> {
        let a = self.memref_val(ops[1])?;
        let b = self.memref_val(ops[2])?;
        let c = self.memref_val(ops[4])?;
        let a_ty = self.memref_elem_ty(ops[1]);
        let b_ty = self.memref_elem_ty(ops[2]);
        let c_ty = self.memref_elem_ty(ops[4]);
        let ab_ty = self
            .ctx
            .promote(a_ty, b_ty)
            .ok_or_else(|| Error::UnsupportedType("hadamard operand promotion".into()))?;
        let ab_scalar = self.scalar_of(ab_ty)?;

        if c.shape.len() == 1 {
            let iv = self.fresh("i");
            let i = Expr::var(iv.clone());
            let a_e = self.cast_expr(a_ty, ab_ty, Self::mem_elem(&a, &[i.clone()]))?;
            let b_e = self.cast_expr(b_ty, ab_ty, Self::mem_elem(&b, &[i.clone()]))?;
            let acc = Self::mul_expr(ab_scalar, a_e, b_e);
            let c_lhs = Self::mem_elem(&c, &[i]);
            let update = self.blas_update(c_ty, c_lhs.clone(), ops[0], ab_ty, acc, ops[3])?;
            out.push(Self::for_strided(
                Scalar::Long,
                &iv,
                self.flat_local_id(),
                c.shape[0].clone(),
                Expr::Int(self.wgs[0] * self.wgs[1]),
                vec![Stmt::Assign {
                    lhs: c_lhs,
                    rhs: update,
                }],
            ));
        } else {
            let mv = self.fresh("m");
            let nv = self.fresh("n");
            let (m, n) = (Expr::var(mv.clone()), Expr::var(nv.clone()));
            let a_e = self.cast_expr(a_ty, ab_ty, Self::mem_elem(&a, &[m.clone(), n.clone()]))?;
            let b_e = self.cast_expr(b_ty, ab_ty, Self::mem_elem(&b, &[m.clone(), n.clone()]))?;
            let acc = Self::mul_expr(ab_scalar, a_e, b_e);
            let c_lhs = Self::mem_elem(&c, &[m, n]);
            let update = self.blas_update(c_ty, c_lhs.clone(), ops[0], ab_ty, acc, ops[3])?;
            let m_loop = Self::for_strided(
                Scalar::Long,
                &mv,
                Self::local_id(0),
                c.shape[0].clone(),
                Expr::Int(self.wgs[0]),
                vec![Stmt::Assign {
                    lhs: c_lhs,
                    rhs: update,
                }],
            );
            out.push(Self::for_strided(
                Scalar::Long,
                &nv,
                Self::local_id(1),
                c.shape[1].clone(),
                Expr::Int(self.wgs[1]),
                vec![m_loop],
            ));
        }
        Ok(())
    }

    fn lower_axpby(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        trans_a: Transpose,
    ) -> Result<(), Error> {
        let a = self.memref_val(ops[1])?;
        let b = self.memref_val(ops[3])?;
        let a_ty = self.memref_elem_ty(ops[1]);
        let b_ty = self.memref_elem_ty(ops[3]);

        match b.shape.len() {
            0 => {
                let b_lhs = Self::mem_elem(&b, &[]);
                let update =
                    self.blas_update(b_ty, b_lhs.clone(), ops[0], a_ty, Self::mem_elem(&a, &[]), ops[2])?;
                out.push(Stmt::If {
                    cond: Expr::bin(BinOp::Eq, self.flat_local_id(), Expr::Int(0)),
                    then_branch: vec![Stmt::Assign {
                        lhs: b_lhs,
                        rhs: update,
                    }],
                    else_branch: Vec::new(),
                });
            }
            1 => {
                let iv = self.fresh("i");
                let i = Expr::var(iv.clone());
                let b_lhs = Self::mem_elem(&b, &[i.clone()]);
                let update = self.blas_update(
                    b_ty,
                    b_lhs.clone(),
                    ops[0],
                    a_ty,
                    Self::mem_elem(&a, &[i]),
                    ops[2],
                )?;
                out.push(Self::for_strided(
                    Scalar::Long,
                    &iv,
                    self.flat_local_id(),
                    b.shape[0].clone(),
                    Expr::Int(self.wgs[0] * self.wgs[1]),
                    vec![Stmt::Assign {
                        lhs: b_lhs,
                        rhs: update,
                    }],
                ));
            }
            _ => {
                let mv = self.fresh("m");
                let nv = self.fresh("n");
                let (m, n) = (Expr::var(mv.clone()), Expr::var(nv.clone()));
                let a_idx = if trans_a == Transpose::T {
                    [n.clone(), m.clone()]
                } else {
                    [m.clone(), n.clone()]
                };
                let b_lhs = Self::mem_elem(&b, &[m, n]);
                let update = self.blas_update(
                    b_ty,
                    b_lhs.clone(),
                    ops[0],
                    a_ty,
                    Self::mem_elem(&a, &a_idx),
                    ops[2],
                )?;
                let m_loop = Self::for_strided(
                    Scalar::Long,
                    &mv,
                    Self::local_id(0),
                    b.shape[0].clone(),
                    Expr::Int(self.wgs[0]),
                    vec![Stmt::Assign {
                        lhs: b_lhs,
                        rhs: update,
                    }],
                );
                out.push(Self::for_strided(
                    Scalar::Long,
                    &nv,
                    Self::local_id(1),
                    b.shape[1].clone(),
                    Expr::Int(self.wgs[1]),
                    vec![m_loop],
                ));
            }
        }
        Ok(())
    }

    fn lower_sum(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        trans_a: Transpose,
    ) -> Result<(), Error> {
        let a = self.memref_val(ops[1])?;
        let b = self.memref_val(ops[3])?;
        let a_ty = self.memref_elem_ty(ops[1]);
        let b_ty = self.memref_elem_ty(ops[3]);
        let a_scalar = self.scalar_of(a_ty)?;

        if b.shape.is_empty() {
            // Full reduction of a vector, done by work item 0.
            let accv = self.fresh("acc");
            let kv = self.fresh("k");
            let k = Expr::var(kv.clone());
            let k_body = vec![Stmt::Assign {
                lhs: Expr::var(accv.clone()),
                rhs: Self::add_expr(
                    a_scalar,
                    Expr::var(accv.clone()),
                    Self::mem_elem(&a, &[k]),
                ),
            }];
            let b_lhs = Self::mem_elem(&b, &[]);
            let update =
                self.blas_update(b_ty, b_lhs.clone(), ops[0], a_ty, Expr::var(accv.clone()), ops[2])?;
            out.push(Stmt::If {
                cond: Expr::bin(BinOp::Eq, self.flat_local_id(), Expr::Int(0)),
                then_branch: vec![
                    Stmt::VarDecl {
                        space: AddrSpace::Private,
                        ty: Type::Scalar(a_scalar),
                        name: accv,
                        array: None,
                        init: Some(self.zero_of(a_scalar)),
                    },
                    Self::for_long(&kv, Expr::Int(0), a.shape[0].clone(), k_body),
                    Stmt::Assign {
                        lhs: b_lhs,
                        rhs: update,
                    },
                ],
                else_branch: Vec::new(),
            });
            return Ok(());
        }

        // Row sums of op(A), one output element per work item.
        let mv = self.fresh("m");
        let kv = self.fresh("k");
        let accv = self.fresh("acc");
        let (m, k) = (Expr::var(mv.clone()), Expr::var(kv.clone()));
        let a_idx = if trans_a == Transpose::T {
            [k.clone(), m.clone()]
        } else {
            [m.clone(), k.clone()]
        };
        let k_extent = if trans_a == Transpose::T {
            a.shape[0].clone()
        } else {
            a.shape[1].clone()
        };
        let k_body = vec![Stmt::Assign {
            lhs: Expr::var(accv.clone()),
            rhs: Self::add_expr(
                a_scalar,
                Expr::var(accv.clone()),
                Self::mem_elem(&a, &a_idx),
            ),
        }];
        let b_lhs = Self::mem_elem(&b, &[m]);
        let update =
            self.blas_update(b_ty, b_lhs.clone(), ops[0], a_ty, Expr::var(accv.clone()), ops[2])?;
        out.push(Self::for_strided(
            Scalar::Long,
            &mv,
            self.flat_local_id(),
            b.shape[0].clone(),
            Expr::Int(self.wgs[0] * self.wgs[1]),
            vec![
                Stmt::VarDecl {
                    space: AddrSpace::Private,
                    ty: Type::Scalar(a_scalar),
                    name: accv,
                    array: None,
                    init: Some(self.zero_of(a_scalar)),
                },
                Self::for_long(&kv, Expr::Int(0), k_extent, k_body),
                Stmt::Assign {
                    lhs: b_lhs,
                    rhs: update,
                },
            ],
        ));
        Ok(())
    }

    fn lower_cumsum(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        mode: i64,
    ) -> Result<(), Error> {
        let a = self.memref_val(ops[1])?;
        let b = self.memref_val(ops[3])?;
        let a_ty = self.memref_elem_ty(ops[1]);
        let b_ty = self.memref_elem_ty(ops[3]);
        let a_scalar = self.scalar_of(a_ty)?;

        match a.shape.len() {
            1 => {
                // Sequential scan by work item 0.
                let accv = self.fresh("acc");
                let iv = self.fresh("i");
                let i = Expr::var(iv.clone());
                let b_lhs = Self::mem_elem(&b, &[i.clone()]);
                let update = self.blas_update(
                    b_ty,
                    b_lhs.clone(),
                    ops[0],
                    a_ty,
                    Expr::var(accv.clone()),
                    ops[2],
                )?;
                let scan = vec![
                    Stmt::Assign {
                        lhs: Expr::var(accv.clone()),
                        rhs: Self::add_expr(
                            a_scalar,
                            Expr::var(accv.clone()),
                            Self::mem_elem(&a, &[i]),
                        ),
                    },
                    Stmt::Assign {
                        lhs: b_lhs,
                        rhs: update,
                    },
                ];
                out.push(Stmt::If {
                    cond: Expr::bin(BinOp::Eq, self.flat_local_id(), Expr::Int(0)),
                    then_branch: vec![
                        Stmt::VarDecl {
                            space: AddrSpace::Private,
                            ty: Type::Scalar(a_scalar),
                            name: accv,
                            array: None,
                            init: Some(self.zero_of(a_scalar)),
                        },
                        Self::for_long(&iv, Expr::Int(0), a.shape[0].clone(), scan),
                    ],
                    else_branch: Vec::new(),
                });
            }
            2 => {
                // One scan per orthogonal index, distributed over work items.
                let ortho = 1 - mode as usize;
                let ov = self.fresh("o");
                let sv = self.fresh("i");
                let accv = self.fresh("acc");
                let (o, s) = (Expr::var(ov.clone()), Expr::var(sv.clone()));
                let mut idx = [Expr::Int(0), Expr::Int(0)];
                idx[mode as usize] = s.clone();
                idx[ortho] = o.clone();
                let b_lhs = Self::mem_elem(&b, &idx);
                let update = self.blas_update(
                    b_ty,
                    b_lhs.clone(),
                    ops[0],
                    a_ty,
                    Expr::var(accv.clone()),
                    ops[2],
                )?;
                let scan = vec![
                    Stmt::Assign {
                        lhs: Expr::var(accv.clone()),
                        rhs: Self::add_expr(
                            a_scalar,
                            Expr::var(accv.clone()),
                            Self::mem_elem(&a, &idx),
                        ),
                    },
                    Stmt::Assign {
                        lhs: b_lhs,
                        rhs: update,
                    },
                ];
                out.push(Self::for_strided(
                    Scalar::Long,
                    &ov,
                    self.flat_local_id(),
                    a.shape[ortho].clone(),
                    Expr::Int(self.wgs[0] * self.wgs[1]),
                    vec![
                        Stmt::VarDecl {
                            space: AddrSpace::Private,
                            ty: Type::Scalar(a_scalar),
                            name: accv,
                            array: None,
                            init: Some(self.zero_of(a_scalar)),
                        },
                        Self::for_long(&sv, Expr::Int(0), a.shape[mode as usize].clone(), scan),
                    ],
                ));
            }
            _ => {
                return Err(Error::UnsupportedType("cumsum of order > 2".into()));
            }
        }
        Ok(())
    }

    /* ---------------- cooperative matrices ---------------- */

    /// Declare the per-lane register array of a coopmatrix value.
    ///
    /// Dimension 0 is distributed round-robin across the subgroup: element
    /// `(r, c)` lives on lane `r % sgs` in slot `r / sgs + c·row_blocks`.
    fn define_coop(&mut self, out: &mut Vec<Stmt>, v: ValueId) -> Result<CoopVal, Error> {
        let (comp, rows, cols) = match self.kind(v) {
            TypeKind::Coopmatrix {
                comp, rows, cols, ..
            } => (*comp, *rows, *cols),
            _ => return Err(Error::UnsupportedType("expected coopmatrix type".into())),
        };
        let scalar = self.scalar_of(comp)?;
        let row_blocks = ceil_div(rows, self.sgs);
        let name = format!("v{}", v.index());
        let cv = CoopVal {
            name: name.clone(),
            rows,
            cols,
            row_blocks,
            comp,
        };
        out.push(Stmt::VarDecl {
            space: AddrSpace::Private,
            ty: Type::Scalar(scalar),
            name,
            array: Some(cv.len()),
            init: None,
        });
        self.vals.insert(v, Val::Coopmatrix(cv.clone()));
        Ok(cv)
    }

    fn coop_elem(cv: &CoopVal, slot: Expr) -> Expr {
        Expr::index(Expr::var(cv.name.clone()), slot)
    }

    fn broadcast_expr(&self, comp: Ty, e: Expr, idx: Expr) -> Result<Expr, Error> {
        let idx = Expr::Cast(Type::Scalar(Scalar::Uint), Box::new(idx));
        if self.is_complex_ty(comp) {
            let scalar = self.scalar_of(comp)?;
            Ok(Expr::Vector(
                scalar,
                vec![
                    Expr::call(
                        "sub_group_broadcast",
                        vec![Expr::Member(Box::new(e.clone()), "x"), idx.clone()],
                    ),
                    Expr::call(
                        "sub_group_broadcast",
                        vec![Expr::Member(Box::new(e), "y"), idx],
                    ),
                ],
            ))
        } else {
            Ok(Expr::call("sub_group_broadcast", vec![e, idx]))
        }
    }

    /// Emit `rb`, `c`, `r` declarations for slot `s` of `cv`; returns their
    /// variable expressions.
    fn slot_coords(
        &mut self,
        body: &mut Vec<Stmt>,
        cv: &CoopVal,
        s: &Expr,
        lane: &Expr,
    ) -> (Expr, Expr, Expr) {
        let rbv = self.fresh("rb");
        let cvv = self.fresh("c");
        let rv = self.fresh("r");
        body.push(Self::decl_long(
            &rbv,
            Expr::bin(BinOp::Rem, s.clone(), Expr::Int(cv.row_blocks)),
        ));
        body.push(Self::decl_long(
            &cvv,
            Expr::bin(BinOp::Div, s.clone(), Expr::Int(cv.row_blocks)),
        ));
        body.push(Self::decl_long(
            &rv,
            Expr::bin(
                BinOp::Add,
                lane.clone(),
                Expr::bin(BinOp::Mul, Expr::var(rbv.clone()), Expr::Int(self.sgs)),
            ),
        ));
        (Expr::var(rbv), Expr::var(cvv), Expr::var(rv))
    }

    fn declare_lane(&mut self, out: &mut Vec<Stmt>) -> Expr {
        let name = self.fresh("lane");
        out.push(Self::decl_long(&name, Self::lane_id()));
        Expr::var(name)
    }

    fn lower_coop_load(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let m = self.memref_val(ops[0])?;
        let pos0 = self.scalar_val(ops[1])?;
        let pos1 = self.scalar_val(ops[2])?;
        let res = self.define_coop(out, result)?;
        let lane = self.declare_lane(out);

        let s = self.fresh("s");
        let se = Expr::var(s.clone());
        let mut body = Vec::new();
        let (_rb, c, r) = self.slot_coords(&mut body, &res, &se, &lane);
        let elem = Self::mem_elem(
            &m,
            &[
                Expr::bin(BinOp::Add, pos0, r.clone()),
                Expr::bin(BinOp::Add, pos1, c),
            ],
        );
        body.push(Stmt::If {
            cond: Expr::bin(BinOp::Lt, r, Expr::Int(res.rows)),
            then_branch: vec![Stmt::Assign {
                lhs: Self::coop_elem(&res, se),
                rhs: elem,
            }],
            else_branch: Vec::new(),
        });
        out.push(Self::for_long(
            &s,
            Expr::Int(0),
            Expr::Int(res.len() as i64),
            body,
        ));
        Ok(())
    }

    fn lower_coop_store(&mut self, out: &mut Vec<Stmt>, ops: &[ValueId]) -> Result<(), Error> {
        let val = self.coop_val(ops[0])?;
        let m = self.memref_val(ops[1])?;
        let pos0 = self.scalar_val(ops[2])?;
        let pos1 = self.scalar_val(ops[3])?;
        let lane = self.declare_lane(out);

        let s = self.fresh("s");
        let se = Expr::var(s.clone());
        let mut body = Vec::new();
        let (_rb, c, r) = self.slot_coords(&mut body, &val, &se, &lane);
        let elem = Self::mem_elem(
            &m,
            &[
                Expr::bin(BinOp::Add, pos0, r.clone()),
                Expr::bin(BinOp::Add, pos1, c),
            ],
        );
        body.push(Stmt::If {
            cond: Expr::bin(BinOp::Lt, r, Expr::Int(val.rows)),
            then_branch: vec![Stmt::Assign {
                lhs: elem,
                rhs: Self::coop_elem(&val, se),
            }],
            else_branch: Vec::new(),
        });
        out.push(Self::for_long(
            &s,
            Expr::Int(0),
            Expr::Int(val.len() as i64),
            body,
        ));
        Ok(())
    }

    fn lower_coop_mul_add(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let am = self.coop_val(ops[0])?;
        let bm = self.coop_val(ops[1])?;
        let cm = self.coop_val(ops[2])?;
        let res = self.define_coop(out, result)?;
        let ab_ty = self
            .ctx
            .promote(am.comp, bm.comp)
            .ok_or_else(|| Error::UnsupportedType("coopmatrix mul_add promotion".into()))?;
        let ab_scalar = self.scalar_of(ab_ty)?;
        let c_scalar = self.scalar_of(cm.comp)?;
        let k_extent = am.cols;

        let s = self.fresh("s");
        let kv = self.fresh("k");
        let accv = self.fresh("acc");
        let se = Expr::var(s.clone());
        let k = Expr::var(kv.clone());

        let rbv = self.fresh("rb");
        let colv = self.fresh("col");
        let mut body = vec![
            Self::decl_long(
                &rbv,
                Expr::bin(BinOp::Rem, se.clone(), Expr::Int(res.row_blocks)),
            ),
            Self::decl_long(
                &colv,
                Expr::bin(BinOp::Div, se.clone(), Expr::Int(res.row_blocks)),
            ),
            Stmt::VarDecl {
                space: AddrSpace::Private,
                ty: Type::Scalar(c_scalar),
                name: accv.clone(),
                array: None,
                init: Some(Self::coop_elem(&cm, se.clone())),
            },
        ];

        // A(r, k) is lane-local; B(k, col) is fetched from lane k % sgs.
        let a_slot = Expr::bin(
            BinOp::Add,
            Expr::var(rbv),
            Expr::bin(BinOp::Mul, k.clone(), Expr::Int(am.row_blocks)),
        );
        let a_e = self.cast_expr(am.comp, ab_ty, Self::coop_elem(&am, a_slot))?;
        let b_slot = Expr::bin(
            BinOp::Add,
            Expr::bin(BinOp::Div, k.clone(), Expr::Int(self.sgs)),
            Expr::bin(BinOp::Mul, Expr::var(colv), Expr::Int(bm.row_blocks)),
        );
        let b_owner = Expr::bin(BinOp::Rem, k, Expr::Int(self.sgs));
        let b_bcast = self.broadcast_expr(bm.comp, Self::coop_elem(&bm, b_slot), b_owner)?;
        let b_e = self.cast_expr(bm.comp, ab_ty, b_bcast)?;
        let prod = Self::mul_expr(ab_scalar, a_e, b_e);
        let prod_c = self.cast_expr(ab_ty, cm.comp, prod)?;
        let k_body = vec![Stmt::Assign {
            lhs: Expr::var(accv.clone()),
            rhs: Self::add_expr(c_scalar, Expr::var(accv.clone()), prod_c),
        }];
        body.push(Self::for_long(&kv, Expr::Int(0), Expr::Int(k_extent), k_body));

        let final_val = self.cast_expr(cm.comp, res.comp, Expr::var(accv))?;
        body.push(Stmt::Assign {
            lhs: Self::coop_elem(&res, se),
            rhs: final_val,
        });

        out.push(Self::for_long(
            &s,
            Expr::Int(0),
            Expr::Int(res.len() as i64),
            body,
        ));
        Ok(())
    }

    fn lower_coop_scale(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let a = self.scalar_val(ops[0])?;
        let bm = self.coop_val(ops[1])?;
        let res = self.define_coop(out, result)?;
        let scalar = self.scalar_of(bm.comp)?;
        let s = self.fresh("s");
        let se = Expr::var(s.clone());
        out.push(Self::for_long(
            &s,
            Expr::Int(0),
            Expr::Int(res.len() as i64),
            vec![Stmt::Assign {
                lhs: Self::coop_elem(&res, se.clone()),
                rhs: Self::mul_expr(scalar, a, Self::coop_elem(&bm, se)),
            }],
        ));
        Ok(())
    }

    fn lower_coop_extract(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let mat = self.coop_val(ops[0])?;
        let idx = self.scalar_val(ops[1])?;
        let ev = self.fresh("e");
        let rv = self.fresh("r");
        let cv = self.fresh("c");
        out.push(Self::decl_long(
            &ev,
            Expr::Cast(Type::Scalar(Scalar::Long), Box::new(idx)),
        ));
        out.push(Self::decl_long(
            &rv,
            Expr::bin(BinOp::Rem, Expr::var(ev.clone()), Expr::Int(mat.rows)),
        ));
        out.push(Self::decl_long(
            &cv,
            Expr::bin(BinOp::Div, Expr::var(ev), Expr::Int(mat.rows)),
        ));
        let slot = Expr::bin(
            BinOp::Add,
            Expr::bin(BinOp::Div, Expr::var(rv.clone()), Expr::Int(self.sgs)),
            Expr::bin(BinOp::Mul, Expr::var(cv), Expr::Int(mat.row_blocks)),
        );
        let owner = Expr::bin(BinOp::Rem, Expr::var(rv), Expr::Int(self.sgs));
        let e = self.broadcast_expr(mat.comp, Self::coop_elem(&mat, slot), owner)?;
        self.define_scalar(out, result, e)
    }

    fn lower_coop_insert(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let val = self.scalar_val(ops[0])?;
        let mat = self.coop_val(ops[1])?;
        let idx = self.scalar_val(ops[2])?;
        let res = self.define_coop(out, result)?;

        let s = self.fresh("s");
        let se = Expr::var(s.clone());
        out.push(Self::for_long(
            &s,
            Expr::Int(0),
            Expr::Int(res.len() as i64),
            vec![Stmt::Assign {
                lhs: Self::coop_elem(&res, se.clone()),
                rhs: Self::coop_elem(&mat, se),
            }],
        ));

        let lane = self.declare_lane(out);
        let ev = self.fresh("e");
        let rv = self.fresh("r");
        let cv = self.fresh("c");
        out.push(Self::decl_long(
            &ev,
            Expr::Cast(Type::Scalar(Scalar::Long), Box::new(idx)),
        ));
        out.push(Self::decl_long(
            &rv,
            Expr::bin(BinOp::Rem, Expr::var(ev.clone()), Expr::Int(res.rows)),
        ));
        out.push(Self::decl_long(
            &cv,
            Expr::bin(BinOp::Div, Expr::var(ev), Expr::Int(res.rows)),
        ));
        let slot = Expr::bin(
            BinOp::Add,
            Expr::bin(BinOp::Div, Expr::var(rv.clone()), Expr::Int(self.sgs)),
            Expr::bin(BinOp::Mul, Expr::var(cv), Expr::Int(res.row_blocks)),
        );
        let owner = Expr::bin(BinOp::Rem, Expr::var(rv), Expr::Int(self.sgs));
        out.push(Stmt::If {
            cond: Expr::bin(BinOp::Eq, lane, owner),
            then_branch: vec![Stmt::Assign {
                lhs: Self::coop_elem(&res, slot),
                rhs: val,
            }],
            else_branch: Vec::new(),
        });
        Ok(())
    }

    fn lower_coop_apply(
        &mut self,
        out: &mut Vec<Stmt>,
        inst: InstId,
        ops: &[ValueId],
        result: ValueId,
    ) -> Result<(), Error> {
        let a = self.coop_val(ops[0])?;
        let res = self.define_coop(out, result)?;
        let body_region = self.func.inst(inst).regions()[0];
        let params = self.func.region(body_region).params().to_vec();
        let lane = self.declare_lane(out);

        let s = self.fresh("s");
        let se = Expr::var(s.clone());
        let mut body = Vec::new();
        let (_rb, c, r) = self.slot_coords(&mut body, &res, &se, &lane);
        // Padding slots keep the input value.
        body.push(Stmt::Assign {
            lhs: Self::coop_elem(&res, se.clone()),
            rhs: Self::coop_elem(&a, se.clone()),
        });

        let mut guarded = Vec::new();
        self.define_scalar(
            &mut guarded,
            params[0],
            Expr::Cast(Type::Scalar(Scalar::Int), Box::new(r.clone())),
        )?;
        self.define_scalar(
            &mut guarded,
            params[1],
            Expr::Cast(Type::Scalar(Scalar::Int), Box::new(c)),
        )?;
        self.vals
            .insert(params[2], Val::Scalar(Self::coop_elem(&a, se.clone())));
        let yields = vec![Self::coop_elem(&res, se)];
        guarded.extend(self.region_stmts(body_region, &yields)?);

        body.push(Stmt::If {
            cond: Expr::bin(BinOp::Lt, r, Expr::Int(res.rows)),
            then_branch: guarded,
            else_branch: Vec::new(),
        });
        out.push(Self::for_long(
            &s,
            Expr::Int(0),
            Expr::Int(res.len() as i64),
            body,
        ));
        Ok(())
    }

    fn reduce_identity(&self, scalar: Scalar, op: &str) -> Expr {
        match op {
            "add" => self.zero_of(scalar),
            "max" => match scalar {
                Scalar::Half | Scalar::Float | Scalar::Double => {
                    Expr::Unary(UnOp::Neg, Box::new(Expr::var("INFINITY")))
                }
                Scalar::Char => Expr::var("CHAR_MIN"),
                Scalar::Short => Expr::var("SHRT_MIN"),
                Scalar::Int => Expr::var("INT_MIN"),
                _ => Expr::var("LONG_MIN"),
            },
            _ => match scalar {
                Scalar::Half | Scalar::Float | Scalar::Double => Expr::var("INFINITY"),
                Scalar::Char => Expr::var("CHAR_MAX"),
                Scalar::Short => Expr::var("SHRT_MAX"),
                Scalar::Int => Expr::var("INT_MAX"),
                _ => Expr::var("LONG_MAX"),
            },
        }
    }

    fn combine_expr(&self, scalar: Scalar, op: &str, a: Expr, b: Expr) -> Result<Expr, Error> {
        match op {
            "add" => Ok(Self::add_expr(scalar, a, b)),
            "max" => self.binary_scalar_expr(&InstKind::Max, scalar, a, b),
            _ => self.binary_scalar_expr(&InstKind::Min, scalar, a, b),
        }
    }

    fn lower_coop_reduce(
        &mut self,
        out: &mut Vec<Stmt>,
        ops: &[ValueId],
        result: ValueId,
        mode: ReduceMode,
        op: &str,
    ) -> Result<(), Error> {
        let a = self.coop_val(ops[0])?;
        let res = self.define_coop(out, result)?;
        let scalar = self.scalar_of(a.comp)?;
        let identity = self.reduce_identity(scalar, op);

        match mode {
            ReduceMode::Column => {
                // Collapse rows: each lane accumulates its row blocks, then
                // the subgroup reduces across lanes.
                let lane = self.declare_lane(out);
                let cv = self.fresh("c");
                let rbv = self.fresh("rb");
                let partv = self.fresh("part");
                let c = Expr::var(cv.clone());
                let rb = Expr::var(rbv.clone());

                let r = Expr::bin(
                    BinOp::Add,
                    lane,
                    Expr::bin(BinOp::Mul, rb.clone(), Expr::Int(self.sgs)),
                );
                let a_slot = Expr::bin(
                    BinOp::Add,
                    rb,
                    Expr::bin(BinOp::Mul, c.clone(), Expr::Int(a.row_blocks)),
                );
                let combined = self.combine_expr(
                    scalar,
                    op,
                    Expr::var(partv.clone()),
                    Self::coop_elem(&a, a_slot),
                )?;
                let rb_body = vec![Stmt::If {
                    cond: Expr::bin(BinOp::Lt, r, Expr::Int(a.rows)),
                    then_branch: vec![Stmt::Assign {
                        lhs: Expr::var(partv.clone()),
                        rhs: combined,
                    }],
                    else_branch: Vec::new(),
                }];

                let reduce_name = format!("sub_group_reduce_{op}");
                let reduced = if self.is_complex_ty(a.comp) {
                    let part = Expr::var(partv.clone());
                    Expr::Vector(
                        scalar,
                        vec![
                            Expr::call(
                                reduce_name.clone(),
                                vec![Expr::Member(Box::new(part.clone()), "x")],
                            ),
                            Expr::call(reduce_name.clone(), vec![Expr::Member(Box::new(part), "y")]),
                        ],
                    )
                } else {
                    Expr::call(reduce_name, vec![Expr::var(partv.clone())])
                };

                let c_body = vec![
                    Stmt::VarDecl {
                        space: AddrSpace::Private,
                        ty: Type::Scalar(scalar),
                        name: partv,
                        array: None,
                        init: Some(identity),
                    },
                    Self::for_long(&rbv, Expr::Int(0), Expr::Int(a.row_blocks), rb_body),
                    Stmt::Assign {
                        lhs: Self::coop_elem(&res, c),
                        rhs: reduced,
                    },
                ];
                out.push(Self::for_long(&cv, Expr::Int(0), Expr::Int(a.cols), c_body));
            }
            ReduceMode::Row => {
                // Collapse columns: lane-local accumulation only.
                let rbv = self.fresh("rb");
                let cvv = self.fresh("c");
                let partv = self.fresh("part");
                let rb = Expr::var(rbv.clone());
                let c = Expr::var(cvv.clone());
                let a_slot = Expr::bin(
                    BinOp::Add,
                    rb.clone(),
                    Expr::bin(BinOp::Mul, c, Expr::Int(a.row_blocks)),
                );
                let combined = self.combine_expr(
                    scalar,
                    op,
                    Expr::var(partv.clone()),
                    Self::coop_elem(&a, a_slot),
                )?;
                let c_body = vec![Stmt::Assign {
                    lhs: Expr::var(partv.clone()),
                    rhs: combined,
                }];
                let rb_body = vec![
                    Stmt::VarDecl {
                        space: AddrSpace::Private,
                        ty: Type::Scalar(scalar),
                        name: partv.clone(),
                        array: None,
                        init: Some(identity),
                    },
                    Self::for_long(&cvv, Expr::Int(0), Expr::Int(a.cols), c_body),
                    Stmt::Assign {
                        lhs: Self::coop_elem(&res, rb),
                        rhs: Expr::var(partv),
                    },
                ];
                out.push(Self::for_long(
                    &rbv,
                    Expr::Int(0),
                    Expr::Int(a.row_blocks),
                    rb_body,
                ));
            }
        }
        Ok(())
    }
}
