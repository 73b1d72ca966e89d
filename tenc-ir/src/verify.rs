//! Per-opcode instruction checking.
//!
//! [`setup_and_check`] runs when an instruction is built. It is
//! deterministic and side-effect-free except that it assigns child-region
//! parameter types (e.g. the induction variable of a `for`) and marks the
//! regions of SPMD-introducing instructions.

use crate::context::Context;
use crate::error::{CompileError, ErrorKind};
use crate::func::Function;
use crate::inst::{Immediate, InstId, InstKind};
use crate::location::Location;
use crate::region::RegionKind;
use crate::types::{is_dynamic_value, AddressSpace, MatrixUse, Transpose, Ty, TypeKind, DYNAMIC};
use crate::value::ValueId;

const SUPPORTS_BOOL: u8 = 0x1;
const SUPPORTS_INT: u8 = 0x2;
const SUPPORTS_FLOAT: u8 = 0x4;
const SUPPORTS_COMPLEX: u8 = 0x8;

#[derive(Clone, PartialEq)]
struct MemrefInfo {
    elem: Ty,
    shape: Vec<i64>,
    stride: Vec<i64>,
    addrspace: AddressSpace,
}

impl MemrefInfo {
    fn dim(&self) -> i64 {
        self.shape.len() as i64
    }
    fn shape(&self, i: i64) -> i64 {
        self.shape[i as usize]
    }
    fn stride(&self, i: i64) -> i64 {
        self.stride[i as usize]
    }
}

#[derive(Clone, Copy, PartialEq)]
struct CoopmatrixInfo {
    comp: Ty,
    rows: i64,
    cols: i64,
    use_: MatrixUse,
}

impl CoopmatrixInfo {
    fn shape(&self, i: i64) -> i64 {
        if i == 0 {
            self.rows
        } else {
            self.cols
        }
    }
}

fn err(loc: &Location, kind: ErrorKind) -> CompileError {
    CompileError::new(loc.clone(), kind)
}

fn err_vals(f: &Function, loc: &Location, kind: ErrorKind, vals: &[ValueId]) -> CompileError {
    err(loc, kind).with_values(vals.iter().map(|&v| f.display_name(v)).collect())
}

fn memref_info(ctx: &Context, ty: Ty) -> Option<MemrefInfo> {
    match ctx.kind(ty) {
        TypeKind::Memref {
            elem,
            shape,
            stride,
            addrspace,
        } => Some(MemrefInfo {
            elem: *elem,
            shape: shape.clone(),
            stride: stride.clone(),
            addrspace: *addrspace,
        }),
        _ => None,
    }
}

fn coopmatrix_info(ctx: &Context, ty: Ty) -> Option<CoopmatrixInfo> {
    match ctx.kind(ty) {
        TypeKind::Coopmatrix {
            comp,
            rows,
            cols,
            use_,
        } => Some(CoopmatrixInfo {
            comp: *comp,
            rows: *rows,
            cols: *cols,
            use_: *use_,
        }),
        _ => None,
    }
}

fn get_memref(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    v: ValueId,
) -> Result<MemrefInfo, CompileError> {
    memref_info(ctx, f.value_ty(v)).ok_or_else(|| err_vals(f, loc, ErrorKind::ExpectedMemref, &[v]))
}

fn get_coopmatrix(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    v: ValueId,
) -> Result<CoopmatrixInfo, CompileError> {
    coopmatrix_info(ctx, f.value_ty(v))
        .ok_or_else(|| err_vals(f, loc, ErrorKind::ExpectedCoopmatrix, &[v]))
}

fn check_index_ty(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    v: ValueId,
) -> Result<(), CompileError> {
    if *ctx.kind(f.value_ty(v)) != TypeKind::Index {
        return Err(err_vals(f, loc, ErrorKind::ExpectedIndex, &[v]));
    }
    Ok(())
}

fn check_memref_shape(
    rt: &MemrefInfo,
    ri: i64,
    ot: &MemrefInfo,
    oi: i64,
    loc: &Location,
) -> Result<(), CompileError> {
    if rt.shape(ri) != ot.shape(oi) {
        return Err(err(loc, ErrorKind::InvalidShape).with_extra(format!(
            "size of mode {ri} does not match operand mode {oi} [{}!={}]",
            rt.shape(ri),
            ot.shape(oi)
        )));
    }
    Ok(())
}

fn check_memref_stride(
    rt: &MemrefInfo,
    ri: i64,
    ot: &MemrefInfo,
    oi: i64,
    loc: &Location,
) -> Result<(), CompileError> {
    if !is_dynamic_value(rt.stride(ri)) && rt.stride(ri) != ot.stride(oi) {
        return Err(err(loc, ErrorKind::InvalidStride).with_extra(format!(
            "stride of mode {ri} does not match operand stride {oi} [{}!={}]",
            rt.stride(ri),
            ot.stride(oi)
        )));
    }
    Ok(())
}

fn check_memref_mode(
    rt: &MemrefInfo,
    ri: i64,
    ot: &MemrefInfo,
    oi: i64,
    loc: &Location,
) -> Result<(), CompileError> {
    check_memref_shape(rt, ri, ot, oi, loc)?;
    check_memref_stride(rt, ri, ot, oi, loc)
}

/// Result + operand memref pair with matching element type and address space.
fn get_and_check_memref_pair(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    operand: ValueId,
    result_ty: Ty,
) -> Result<(MemrefInfo, MemrefInfo), CompileError> {
    let rt = memref_info(ctx, result_ty).ok_or_else(|| err(loc, ErrorKind::ExpectedMemref))?;
    let ot = get_memref(ctx, f, loc, operand)?;
    if rt.elem != ot.elem {
        return Err(err_vals(f, loc, ErrorKind::NumberMismatch, &[operand]));
    }
    if rt.addrspace != ot.addrspace {
        return Err(err_vals(f, loc, ErrorKind::AddressSpaceMismatch, &[operand]));
    }
    Ok((ot, rt))
}

fn check_scalar_support(
    ctx: &Context,
    loc: &Location,
    ty: Ty,
    support: u8,
) -> Result<(), CompileError> {
    let kind = ctx.kind(ty);
    if support & SUPPORTS_INT == 0 && kind.is_integer() {
        return Err(err(loc, ErrorKind::IntUnsupported));
    }
    if support & SUPPORTS_FLOAT == 0 && kind.is_float() {
        return Err(err(loc, ErrorKind::FpUnsupported));
    }
    if support & SUPPORTS_COMPLEX == 0 && kind.is_complex() {
        return Err(err(loc, ErrorKind::ComplexUnsupported));
    }
    Ok(())
}

/// Verify `inst` and assign child-region parameters where the opcode
/// requires it.
pub fn setup_and_check(
    func: &mut Function,
    ctx: &Context,
    inst: InstId,
) -> Result<(), CompileError> {
    let kind = func.inst(inst).kind().clone();
    let loc = func.inst(inst).loc().clone();
    let ops = func.operand_values(inst);
    let results = func.inst(inst).results().to_vec();
    let result_ty = |i: usize| func.value_ty(results[i]);

    match kind {
        InstKind::Alloca { .. } => {
            let memref = memref_info(ctx, result_ty(0))
                .ok_or_else(|| err(&loc, ErrorKind::ExpectedMemref))?;
            if memref.addrspace != AddressSpace::Local {
                return Err(err(&loc, ErrorKind::ExpectedLocalAddressSpace));
            }
        }
        InstKind::Barrier { .. } | InstKind::LifetimeStop | InstKind::Yield => {}
        InstKind::Cast => {
            let to_ty = result_ty(0);
            if let Some(rt) = coopmatrix_info(ctx, to_ty) {
                let ct = coopmatrix_info(ctx, func.value_ty(ops[0]))
                    .ok_or_else(|| err_vals(func, &loc, ErrorKind::ExpectedCoopmatrix, &[ops[0]]))?;
                if ct.rows != rt.rows || ct.cols != rt.cols {
                    return Err(err_vals(func, &loc, ErrorKind::ForbiddenCast, &[ops[0]]));
                }
                let use_matches = ct.use_ == rt.use_;
                let use_conversion_allowed = ct.use_ == MatrixUse::Acc
                    && matches!(rt.use_, MatrixUse::A | MatrixUse::B);
                if !use_matches && !use_conversion_allowed {
                    return Err(err_vals(func, &loc, ErrorKind::ForbiddenCast, &[ops[0]]));
                }
                if !ctx.is_cast_allowed(ct.comp, rt.comp) {
                    return Err(err_vals(func, &loc, ErrorKind::ForbiddenCast, &[ops[0]]));
                }
            } else {
                if !ctx.kind(to_ty).is_number() {
                    return Err(err(&loc, ErrorKind::ExpectedNumber));
                }
                if !ctx.is_cast_allowed(func.value_ty(ops[0]), to_ty) {
                    return Err(err_vals(func, &loc, ErrorKind::ForbiddenCast, &[ops[0]]));
                }
            }
        }
        InstKind::Constant(value) => {
            let ty = result_ty(0);
            let scalar_ok = |val: &Immediate, kind: &TypeKind| {
                (kind.is_integer() && matches!(val, Immediate::Int(_)))
                    || (kind.is_float() && matches!(val, Immediate::Float(_)))
                    || (kind.is_complex() && matches!(val, Immediate::Complex(..)))
            };
            match ctx.kind(ty) {
                TypeKind::Bool => {
                    if !matches!(value, Immediate::Bool(_)) {
                        return Err(err(&loc, ErrorKind::ConstantMismatch));
                    }
                }
                k if k.is_number() => {
                    if !scalar_ok(&value, k) {
                        return Err(err(&loc, ErrorKind::ConstantMismatch));
                    }
                }
                TypeKind::Coopmatrix { comp, .. } => {
                    if !scalar_ok(&value, ctx.kind(*comp)) {
                        return Err(err(&loc, ErrorKind::ConstantMismatch));
                    }
                }
                _ => return Err(err(&loc, ErrorKind::ExpectedCoopmatrixNumberOrBoolean)),
            }
        }
        InstKind::Axpby { trans_a } => {
            check_blas_a2(ctx, func, &loc, &ops)?;
            let a = get_memref(ctx, func, &loc, ops[1])?;
            let b = get_memref(ctx, func, &loc, ops[3])?;
            if b.dim() > 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder012, &[ops[3]]));
            }
            let shape_equal = if trans_a == Transpose::T && a.dim() == 2 && b.dim() == 2 {
                a.shape(1) == b.shape(0) && a.shape(0) == b.shape(1)
            } else {
                a.shape == b.shape
            };
            if !shape_equal {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::IncompatibleShapes,
                    &[ops[1], ops[3]],
                ));
            }
        }
        InstKind::Cumsum { mode } => {
            check_blas_a2(ctx, func, &loc, &ops)?;
            let a = get_memref(ctx, func, &loc, ops[1])?;
            let b = get_memref(ctx, func, &loc, ops[3])?;
            if a.dim() < 1 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedNonScalarMemref, &[ops[1]]));
            }
            if mode < 0 || mode >= a.dim() {
                return Err(err_vals(func, &loc, ErrorKind::OutOfBounds, &[ops[1]]));
            }
            if a.shape != b.shape {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::IncompatibleShapes,
                    &[ops[1], ops[3]],
                ));
            }
        }
        InstKind::Sum { trans_a } => {
            check_blas_a2(ctx, func, &loc, &ops)?;
            let a = get_memref(ctx, func, &loc, ops[1])?;
            let b = get_memref(ctx, func, &loc, ops[3])?;
            if b.dim() == 1 && a.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[1]]));
            }
            if b.dim() == 0 && a.dim() != 1 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder1, &[ops[1]]));
            }
            if b.dim() != 0 && b.dim() != 1 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder0Or1, &[ops[3]]));
            }
            if a.dim() == 2 {
                let reduced_to = if trans_a == Transpose::T { 1 } else { 0 };
                if a.shape(reduced_to) != b.shape(0) {
                    return Err(err_vals(
                        func,
                        &loc,
                        ErrorKind::IncompatibleShapes,
                        &[ops[1], ops[3]],
                    ));
                }
            }
        }
        InstKind::Gemm { trans_a, trans_b } => {
            check_blas_a3(ctx, func, &loc, &ops)?;
            let a = get_memref(ctx, func, &loc, ops[1])?;
            let b = get_memref(ctx, func, &loc, ops[2])?;
            let c = get_memref(ctx, func, &loc, ops[4])?;
            if a.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[1]]));
            }
            if b.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[2]]));
            }
            if c.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[4]]));
            }
            let ak: i64 = if trans_a == Transpose::T { 0 } else { 1 };
            let bk: i64 = if trans_b == Transpose::T { 1 } else { 0 };
            let m = c.shape(0);
            let n = c.shape(1);
            let k = a.shape(ak);
            if a.shape(1 - ak) != m || b.shape(bk) != k || b.shape(1 - bk) != n {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::IncompatibleShapes,
                    &[ops[1], ops[2], ops[4]],
                )
                .with_extra(format!(
                    "got A={}x{}, B={}x{}, C={}x{}",
                    a.shape(0),
                    a.shape(1),
                    b.shape(0),
                    b.shape(1),
                    c.shape(0),
                    c.shape(1)
                )));
            }
        }
        InstKind::Gemv { trans_a } => {
            check_blas_a3(ctx, func, &loc, &ops)?;
            let a = get_memref(ctx, func, &loc, ops[1])?;
            let b = get_memref(ctx, func, &loc, ops[2])?;
            let c = get_memref(ctx, func, &loc, ops[4])?;
            if a.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[1]]));
            }
            if b.dim() != 1 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder1, &[ops[2]]));
            }
            if c.dim() != 1 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder1, &[ops[4]]));
            }
            let ak: i64 = if trans_a == Transpose::T { 0 } else { 1 };
            let m = c.shape(0);
            let k = a.shape(ak);
            if a.shape(1 - ak) != m || b.shape(0) != k {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::IncompatibleShapes,
                    &[ops[1], ops[2], ops[4]],
                )
                .with_extra(format!(
                    "got A={}x{}, b={}, c={}",
                    a.shape(0),
                    a.shape(1),
                    b.shape(0),
                    c.shape(0)
                )));
            }
        }
        InstKind::Ger => {
            check_blas_a3(ctx, func, &loc, &ops)?;
            let a = get_memref(ctx, func, &loc, ops[1])?;
            let b = get_memref(ctx, func, &loc, ops[2])?;
            let c = get_memref(ctx, func, &loc, ops[4])?;
            if a.dim() != 1 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder1, &[ops[1]]));
            }
            if b.dim() != 1 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder1, &[ops[2]]));
            }
            if c.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[4]]));
            }
            if a.shape(0) != c.shape(0) || b.shape(0) != c.shape(1) {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::IncompatibleShapes,
                    &[ops[1], ops[2], ops[4]],
                ));
            }
        }
        InstKind::Hadamard => {
            check_blas_a3(ctx, func, &loc, &ops)?;
            let a = get_memref(ctx, func, &loc, ops[1])?;
            let b = get_memref(ctx, func, &loc, ops[2])?;
            let c = get_memref(ctx, func, &loc, ops[4])?;
            for (info, v) in [(&a, ops[1]), (&b, ops[2]), (&c, ops[4])] {
                if info.dim() != 1 && info.dim() != 2 {
                    return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder1Or2, &[v]));
                }
            }
            if c.dim() != a.dim() || c.dim() != b.dim() || a.shape != c.shape || b.shape != c.shape {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::IncompatibleShapes,
                    &[ops[1], ops[2], ops[4]],
                ));
            }
        }
        InstKind::Expand {
            mode,
            ref static_shape,
        } => {
            for &es in &ops[1..] {
                check_index_ty(ctx, func, &loc, es)?;
            }
            let (ot, rt) = get_and_check_memref_pair(ctx, func, &loc, ops[0], result_ty(0))?;
            if mode < 0 || mode >= ot.dim() {
                return Err(err_vals(func, &loc, ErrorKind::OutOfBounds, &[ops[0]]));
            }
            if static_shape.len() < 2 {
                return Err(err(&loc, ErrorKind::ExpandShapeOrderTooSmall));
            }
            let dyn_count = static_shape.iter().filter(|&&s| is_dynamic_value(s)).count();
            if dyn_count != ops.len() - 1 {
                return Err(err(&loc, ErrorKind::ExpandShapeMismatch));
            }
            for i in 0..mode {
                check_memref_mode(&rt, i, &ot, i, &loc)?;
            }
            let mut stride = ot.stride(mode);
            for (i, &sse) in static_shape.iter().enumerate() {
                let rmode = mode + i as i64;
                if rt.shape(rmode) != sse {
                    return Err(err(&loc, ErrorKind::InvalidShape).with_extra(format!(
                        "size of mode {rmode} does not match static expand shape ({}!={})",
                        rt.shape(rmode),
                        sse
                    )));
                }
                if !is_dynamic_value(rt.stride(rmode)) && rt.stride(rmode) != stride {
                    return Err(err(&loc, ErrorKind::InvalidStride).with_extra(format!(
                        "stride of mode {rmode} is invalid ({}!={})",
                        rt.stride(rmode),
                        stride
                    )));
                }
                stride = if is_dynamic_value(stride) || is_dynamic_value(rt.shape(rmode)) {
                    DYNAMIC
                } else {
                    stride * rt.shape(rmode)
                };
            }
            for i in mode + 1..ot.dim() {
                check_memref_mode(&rt, i + static_shape.len() as i64 - 1, &ot, i, &loc)?;
            }
        }
        InstKind::Fuse { from, to } => {
            let (ot, rt) = get_and_check_memref_pair(ctx, func, &loc, ops[0], result_ty(0))?;
            if from < 0 || from >= to || to >= ot.dim() {
                return Err(err(&loc, ErrorKind::OutOfBounds));
            }
            for i in 0..from {
                check_memref_mode(&rt, i, &ot, i, &loc)?;
            }
            let mut prod: i64 = 1;
            for i in from..=to {
                if is_dynamic_value(ot.shape(i)) {
                    prod = DYNAMIC;
                    break;
                }
                prod *= ot.shape(i);
            }
            if rt.shape(from) != prod {
                return Err(err(&loc, ErrorKind::InvalidShape).with_extra(format!(
                    "size of mode {from} does not match shape product ({}!={})",
                    rt.shape(from),
                    crate::types::DisplayExtent(prod)
                )));
            }
            check_memref_stride(&rt, from, &ot, from, &loc)?;
            for i in to + 1..ot.dim() {
                check_memref_mode(&rt, i - to + from, &ot, i, &loc)?;
            }
        }
        InstKind::Subview {
            ref static_offsets,
            ref static_sizes,
            num_dyn_offsets,
        } => {
            for &v in &ops[1..] {
                check_index_ty(ctx, func, &loc, v)?;
            }
            let (ot, rt) = get_and_check_memref_pair(ctx, func, &loc, ops[0], result_ty(0))?;
            if ot.dim() != static_offsets.len() as i64 || ot.dim() != static_sizes.len() as i64 {
                return Err(err(&loc, ErrorKind::InvalidNumberOfIndices));
            }
            let dyn_offsets = num_dyn_offsets;
            let dyn_sizes = ops.len() - 1 - num_dyn_offsets;
            if static_offsets.iter().filter(|&&o| is_dynamic_value(o)).count() != dyn_offsets
                || static_sizes.iter().filter(|&&s| is_dynamic_value(s)).count() != dyn_sizes
            {
                return Err(err(&loc, ErrorKind::SubviewMismatch));
            }
            let mut ri: i64 = 0;
            for i in 0..ot.dim() {
                let offset = static_offsets[i as usize];
                let size = static_sizes[i as usize];
                if (offset < 0 && !is_dynamic_value(offset)) || (size < 0 && !is_dynamic_value(size))
                {
                    return Err(err(&loc, ErrorKind::InvalidSlice));
                }
                if size > 0 || is_dynamic_value(size) {
                    if rt.shape(ri) != size {
                        return Err(err(&loc, ErrorKind::InvalidShape).with_extra(format!(
                            "size of mode {ri} does not match slice size [{}!={}]",
                            rt.shape(ri),
                            crate::types::DisplayExtent(size)
                        )));
                    }
                    check_memref_stride(&rt, ri, &ot, i, &loc)?;
                    ri += 1;
                }
            }
        }
        InstKind::Load => {
            let ty = result_ty(0);
            match ctx.kind(func.value_ty(ops[0])) {
                TypeKind::Group { of, .. } => {
                    if *of != ty {
                        return Err(err_vals(
                            func,
                            &loc,
                            ErrorKind::OperandTypeMustMatchReturnType,
                            &[ops[0]],
                        ));
                    }
                    if ops.len() - 1 != 1 {
                        return Err(err(&loc, ErrorKind::InvalidNumberOfIndices));
                    }
                }
                TypeKind::Memref { elem, shape, .. } => {
                    if *elem != ty {
                        return Err(err_vals(
                            func,
                            &loc,
                            ErrorKind::OperandTypeMustMatchReturnType,
                            &[ops[0]],
                        ));
                    }
                    if shape.len() != ops.len() - 1 {
                        return Err(err(&loc, ErrorKind::InvalidNumberOfIndices));
                    }
                }
                _ => return Err(err(&loc, ErrorKind::ExpectedMemrefOrGroup)),
            }
            for &v in &ops[1..] {
                check_index_ty(ctx, func, &loc, v)?;
            }
        }
        InstKind::Store => {
            for &v in &ops[2..] {
                check_index_ty(ctx, func, &loc, v)?;
            }
            let o = get_memref(ctx, func, &loc, ops[1])?;
            if func.value_ty(ops[0]) != o.elem {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[ops[0], ops[1]]));
            }
            if o.dim() != ops.len() as i64 - 2 {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::InvalidNumberOfIndices,
                    &[ops[1]],
                ));
            }
        }
        InstKind::Size { mode } => {
            if *ctx.kind(result_ty(0)) != TypeKind::Index {
                return Err(err(&loc, ErrorKind::ExpectedIndex));
            }
            let range_ok = match ctx.kind(func.value_ty(ops[0])) {
                TypeKind::Group { .. } => (0..1).contains(&mode),
                TypeKind::Memref { shape, .. } => mode >= 0 && mode < shape.len() as i64,
                _ => return Err(err(&loc, ErrorKind::ExpectedMemrefOrGroup)),
            };
            if !range_ok {
                return Err(err(&loc, ErrorKind::OutOfBounds));
            }
        }
        InstKind::For { has_step } => {
            let from = ops[0];
            let to = ops[1];
            if !ctx.kind(func.value_ty(from)).is_integer() {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedInt, &[from]));
            }
            if func.value_ty(from) != func.value_ty(to) {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[from, to]));
            }
            let mut init_at = 2;
            if has_step {
                let step = ops[2];
                if func.value_ty(from) != func.value_ty(step) {
                    return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[from, step]));
                }
                init_at = 3;
            }
            let inits = &ops[init_at..];
            if inits.len() != results.len() {
                return Err(err(&loc, ErrorKind::InitReturnTypeMismatch));
            }
            let mut param_tys = Vec::with_capacity(1 + results.len());
            param_tys.push(func.value_ty(from));
            for (i, &init) in inits.iter().enumerate() {
                let ty = result_ty(i);
                if func.value_ty(init) != ty {
                    return Err(err_vals(func, &loc, ErrorKind::InitReturnTypeMismatch, &[init]));
                }
                let k = ctx.kind(ty);
                if *k != TypeKind::Bool
                    && !k.is_number()
                    && !matches!(k, TypeKind::Coopmatrix { .. })
                {
                    return Err(err(&loc, ErrorKind::ExpectedCoopmatrixNumberOrBoolean));
                }
                param_tys.push(ty);
            }
            let body = func.inst(inst).regions()[0];
            func.set_region_params(body, &param_tys);
        }
        InstKind::Foreach { num_loop_vars } => {
            if num_loop_vars == 0 || ops.len() != 2 * num_loop_vars {
                return Err(err(&loc, ErrorKind::FromToMismatch));
            }
            let mut param_tys = Vec::with_capacity(num_loop_vars);
            for i in 0..num_loop_vars {
                let from = ops[i];
                let to = ops[num_loop_vars + i];
                if !ctx.kind(func.value_ty(from)).is_integer() {
                    return Err(err_vals(func, &loc, ErrorKind::ExpectedInt, &[from]));
                }
                if func.value_ty(from) != func.value_ty(to) {
                    return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[from, to]));
                }
                param_tys.push(func.value_ty(from));
            }
            let body = func.inst(inst).regions()[0];
            func.set_region_kind(body, RegionKind::Spmd);
            func.set_region_params(body, &param_tys);
        }
        InstKind::If => {
            if *ctx.kind(func.value_ty(ops[0])) != TypeKind::Bool {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedBoolean, &[ops[0]]));
            }
            for i in 0..results.len() {
                let k = ctx.kind(result_ty(i));
                if *k != TypeKind::Bool
                    && !k.is_number()
                    && !matches!(k, TypeKind::Coopmatrix { .. })
                {
                    return Err(err(&loc, ErrorKind::ExpectedCoopmatrixNumberOrBoolean));
                }
            }
        }
        InstKind::Parallel => {
            let body = func.inst(inst).regions()[0];
            func.set_region_kind(body, RegionKind::Spmd);
        }
        InstKind::GroupId | InstKind::NumGroups => {
            if *ctx.kind(result_ty(0)) != TypeKind::Index {
                return Err(err(&loc, ErrorKind::ExpectedIndex));
            }
        }
        InstKind::NumSubgroups
        | InstKind::SubgroupSize
        | InstKind::SubgroupId
        | InstKind::SubgroupLocalId => {
            if result_ty(0) != ctx.i32() {
                return Err(err(&loc, ErrorKind::ExpectedI32));
            }
        }
        InstKind::Add | InstKind::Sub | InstKind::Mul | InstKind::Div => {
            check_arith_binary(ctx, func, &loc, &ops, result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT | SUPPORTS_COMPLEX)?;
        }
        InstKind::Rem | InstKind::Max | InstKind::Min => {
            check_arith_binary(ctx, func, &loc, &ops, result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT)?;
        }
        InstKind::Shl | InstKind::Shr => {
            check_arith_binary(ctx, func, &loc, &ops, result_ty(0), SUPPORTS_INT)?;
        }
        InstKind::And | InstKind::Or | InstKind::Xor => {
            check_arith_binary(ctx, func, &loc, &ops, result_ty(0), SUPPORTS_BOOL | SUPPORTS_INT)?;
        }
        InstKind::Abs => {
            check_arith_unary(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT | SUPPORTS_COMPLEX, true)?;
        }
        InstKind::Neg => {
            check_arith_unary(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT | SUPPORTS_COMPLEX, false)?;
        }
        InstKind::Not => {
            check_arith_unary(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_BOOL | SUPPORTS_INT, false)?;
        }
        InstKind::Conj => {
            check_arith_unary(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_COMPLEX, false)?;
        }
        InstKind::Im | InstKind::Re => {
            check_arith_unary(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_COMPLEX, true)?;
        }
        InstKind::Equal | InstKind::NotEqual => {
            check_compare(ctx, func, &loc, &ops, result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT | SUPPORTS_COMPLEX)?;
        }
        InstKind::GreaterThan
        | InstKind::GreaterThanEqual
        | InstKind::LessThan
        | InstKind::LessThanEqual => {
            check_compare(ctx, func, &loc, &ops, result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT)?;
        }
        InstKind::Cos | InstKind::Sin => {
            check_math_unary(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_FLOAT)?;
        }
        InstKind::Exp | InstKind::Exp2 => {
            check_math_unary(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_FLOAT | SUPPORTS_COMPLEX)?;
        }
        InstKind::SubgroupBroadcast => {
            let ty = result_ty(0);
            if !ctx.kind(ty).is_number() {
                return Err(err(&loc, ErrorKind::ExpectedNumber));
            }
            if func.value_ty(ops[0]) != ty {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::OperandTypeMustMatchReturnType,
                    &[ops[0]],
                ));
            }
            if func.value_ty(ops[1]) != ctx.i32() {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedI32, &[ops[1]]));
            }
        }
        InstKind::SubgroupReduceAdd
        | InstKind::SubgroupInclusiveScanAdd
        | InstKind::SubgroupExclusiveScanAdd => {
            check_subgroup_op(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT | SUPPORTS_COMPLEX)?;
        }
        InstKind::SubgroupReduceMax
        | InstKind::SubgroupReduceMin
        | InstKind::SubgroupInclusiveScanMax
        | InstKind::SubgroupInclusiveScanMin
        | InstKind::SubgroupExclusiveScanMax
        | InstKind::SubgroupExclusiveScanMin => {
            check_subgroup_op(ctx, func, &loc, ops[0], result_ty(0), SUPPORTS_INT | SUPPORTS_FLOAT)?;
        }
        InstKind::CoopmatrixLoad => {
            let rt = coopmatrix_info(ctx, result_ty(0))
                .ok_or_else(|| err(&loc, ErrorKind::ExpectedCoopmatrix))?;
            let ot = get_memref(ctx, func, &loc, ops[0])?;
            if ot.elem != rt.comp {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[ops[0]]));
            }
            if ot.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[0]]));
            }
            check_index_ty(ctx, func, &loc, ops[1])?;
            check_index_ty(ctx, func, &loc, ops[2])?;
        }
        InstKind::CoopmatrixStore => {
            let vt = get_coopmatrix(ctx, func, &loc, ops[0])?;
            let ot = get_memref(ctx, func, &loc, ops[1])?;
            if vt.comp != ot.elem {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[ops[0], ops[1]]));
            }
            if ot.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[1]]));
            }
            check_index_ty(ctx, func, &loc, ops[2])?;
            check_index_ty(ctx, func, &loc, ops[3])?;
        }
        InstKind::CoopmatrixMulAdd => {
            let rt = coopmatrix_info(ctx, result_ty(0))
                .ok_or_else(|| err(&loc, ErrorKind::ExpectedCoopmatrix))?;
            if rt.use_ != MatrixUse::Acc {
                return Err(err(&loc, ErrorKind::InvalidMatrixUse));
            }
            let at = get_coopmatrix(ctx, func, &loc, ops[0])?;
            let bt = get_coopmatrix(ctx, func, &loc, ops[1])?;
            let ct = get_coopmatrix(ctx, func, &loc, ops[2])?;
            if at.use_ != MatrixUse::A {
                return Err(err_vals(func, &loc, ErrorKind::InvalidMatrixUse, &[ops[0]]));
            }
            if bt.use_ != MatrixUse::B {
                return Err(err_vals(func, &loc, ErrorKind::InvalidMatrixUse, &[ops[1]]));
            }
            if ct.use_ != MatrixUse::Acc {
                return Err(err_vals(func, &loc, ErrorKind::InvalidMatrixUse, &[ops[2]]));
            }
            let m = rt.rows;
            let n = rt.cols;
            let k = at.cols;
            if ct.rows != m || ct.cols != n || at.rows != m || bt.rows != k || bt.cols != n {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::IncompatibleShapes,
                    &[ops[0], ops[1], ops[2]],
                )
                .with_extra(format!(
                    "got A={}x{}, B={}x{}, C={}x{}, result={}x{}",
                    at.rows, at.cols, bt.rows, bt.cols, ct.rows, ct.cols, rt.rows, rt.cols
                )));
            }
            let ab_ty = ctx
                .promote(at.comp, bt.comp)
                .ok_or_else(|| err_vals(func, &loc, ErrorKind::ForbiddenPromotion, &[ops[0], ops[1]]))?;
            if !ctx.promotable(ab_ty, ct.comp) {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::ForbiddenPromotion,
                    &[ops[0], ops[1], ops[2]],
                ));
            }
            if !ctx.is_cast_allowed(ct.comp, rt.comp) {
                return Err(err_vals(func, &loc, ErrorKind::ForbiddenCast, &[ops[2]]));
            }
        }
        InstKind::CoopmatrixScale => {
            let ty = result_ty(0);
            if func.value_ty(ops[1]) != ty {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::OperandTypeMustMatchReturnType,
                    &[ops[1]],
                ));
            }
            let bt = get_coopmatrix(ctx, func, &loc, ops[1])?;
            if func.value_ty(ops[0]) != bt.comp {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[ops[0], ops[1]]));
            }
        }
        InstKind::CoopmatrixExtract => {
            let matt = get_coopmatrix(ctx, func, &loc, ops[0])?;
            if matt.comp != result_ty(0) {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[ops[0]]));
            }
            if func.value_ty(ops[1]) != ctx.i32() {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedI32, &[ops[1]]));
            }
        }
        InstKind::CoopmatrixInsert => {
            let ty = result_ty(0);
            if func.value_ty(ops[1]) != ty {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::OperandTypeMustMatchReturnType,
                    &[ops[1]],
                ));
            }
            let matt = get_coopmatrix(ctx, func, &loc, ops[1])?;
            let val_ty = func.value_ty(ops[0]);
            if !ctx.kind(val_ty).is_number() {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedNumber, &[ops[0]]));
            }
            if matt.comp != val_ty {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[ops[0], ops[1]]));
            }
            if func.value_ty(ops[2]) != ctx.i32() {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedI32, &[ops[2]]));
            }
        }
        InstKind::CoopmatrixApply => {
            let ty = result_ty(0);
            if func.value_ty(ops[0]) != ty {
                return Err(err_vals(
                    func,
                    &loc,
                    ErrorKind::OperandTypeMustMatchReturnType,
                    &[ops[0]],
                ));
            }
            let at = get_coopmatrix(ctx, func, &loc, ops[0])?;
            let body = func.inst(inst).regions()[0];
            func.set_region_kind(body, RegionKind::Spmd);
            func.set_region_params(body, &[ctx.i32(), ctx.i32(), at.comp]);
        }
        InstKind::CoopmatrixReduceAdd { mode }
        | InstKind::CoopmatrixReduceMax { mode }
        | InstKind::CoopmatrixReduceMin { mode } => {
            let at = get_coopmatrix(ctx, func, &loc, ops[0])?;
            let rt = coopmatrix_info(ctx, result_ty(0))
                .ok_or_else(|| err(&loc, ErrorKind::ExpectedCoopmatrix))?;
            if at.comp != rt.comp {
                return Err(err_vals(func, &loc, ErrorKind::NumberMismatch, &[ops[0]]));
            }
            if at.use_ != rt.use_ {
                return Err(err_vals(func, &loc, ErrorKind::InvalidMatrixUse, &[ops[0]]));
            }
            let m: i64 = match mode {
                crate::inst::ReduceMode::Column => 0,
                crate::inst::ReduceMode::Row => 1,
            };
            if rt.shape(1 - m) != at.shape(1 - m) || rt.shape(m) != 1 {
                return Err(err_vals(func, &loc, ErrorKind::InvalidShape, &[ops[0]]));
            }
        }
        InstKind::CoopmatrixPrefetch { rows, cols } => {
            let ot = get_memref(ctx, func, &loc, ops[0])?;
            if ot.dim() != 2 {
                return Err(err_vals(func, &loc, ErrorKind::ExpectedMemrefOrder2, &[ops[0]]));
            }
            if rows <= 0 || cols <= 0 {
                return Err(err(&loc, ErrorKind::InvalidShape));
            }
            check_index_ty(ctx, func, &loc, ops[1])?;
            check_index_ty(ctx, func, &loc, ops[2])?;
        }
    }
    Ok(())
}

/// Promotion chain of the BLAS two-operand family.
fn check_blas_a2(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    ops: &[ValueId],
) -> Result<(), CompileError> {
    let at = get_memref(ctx, f, loc, ops[1])?;
    let bt = get_memref(ctx, f, loc, ops[3])?;
    if !ctx.promotable(f.value_ty(ops[0]), at.elem) {
        return Err(err_vals(f, loc, ErrorKind::ForbiddenPromotion, &[ops[0], ops[1]]));
    }
    if !ctx.promotable(at.elem, bt.elem) {
        return Err(err_vals(f, loc, ErrorKind::ForbiddenPromotion, &[ops[1], ops[3]]));
    }
    if !ctx.promotable(f.value_ty(ops[2]), bt.elem) {
        return Err(err_vals(f, loc, ErrorKind::ForbiddenPromotion, &[ops[2], ops[3]]));
    }
    Ok(())
}

/// Promotion chain of the BLAS three-operand family.
fn check_blas_a3(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    ops: &[ValueId],
) -> Result<(), CompileError> {
    let at = get_memref(ctx, f, loc, ops[1])?;
    let bt = get_memref(ctx, f, loc, ops[2])?;
    let ct = get_memref(ctx, f, loc, ops[4])?;
    let ab_ty = ctx
        .promote(at.elem, bt.elem)
        .ok_or_else(|| err_vals(f, loc, ErrorKind::ForbiddenPromotion, &[ops[1], ops[2]]))?;
    if !ctx.promotable(f.value_ty(ops[0]), ab_ty) {
        return Err(err_vals(
            f,
            loc,
            ErrorKind::ForbiddenPromotion,
            &[ops[0], ops[1], ops[2]],
        ));
    }
    if !ctx.promotable(ab_ty, ct.elem) {
        return Err(err_vals(
            f,
            loc,
            ErrorKind::ForbiddenPromotion,
            &[ops[1], ops[2], ops[4]],
        ));
    }
    if !ctx.promotable(f.value_ty(ops[3]), ct.elem) {
        return Err(err_vals(f, loc, ErrorKind::ForbiddenPromotion, &[ops[3], ops[4]]));
    }
    Ok(())
}

fn check_arith_binary(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    ops: &[ValueId],
    result_ty: Ty,
    support: u8,
) -> Result<(), CompileError> {
    if f.value_ty(ops[0]) != result_ty {
        return Err(err_vals(f, loc, ErrorKind::OperandTypeMustMatchReturnType, &[ops[0]]));
    }
    if f.value_ty(ops[1]) != result_ty {
        return Err(err_vals(f, loc, ErrorKind::OperandTypeMustMatchReturnType, &[ops[1]]));
    }
    let kind = ctx.kind(result_ty);
    if *kind == TypeKind::Bool {
        if support & SUPPORTS_BOOL == 0 {
            return Err(err(loc, ErrorKind::BooleanUnsupported));
        }
        return Ok(());
    }
    if let TypeKind::Coopmatrix { comp, .. } = kind {
        return check_scalar_support(ctx, loc, *comp, support);
    }
    if kind.is_number() {
        return check_scalar_support(ctx, loc, result_ty, support);
    }
    Err(err(loc, ErrorKind::ExpectedCoopmatrixOrNumber))
}

fn check_arith_unary(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    a: ValueId,
    result_ty: Ty,
    support: u8,
    component_type_match: bool,
) -> Result<(), CompileError> {
    let a_ty = f.value_ty(a);
    let r_kind = ctx.kind(result_ty);
    if *r_kind == TypeKind::Bool {
        if support & SUPPORTS_BOOL == 0 {
            return Err(err(loc, ErrorKind::BooleanUnsupported));
        }
        if a_ty != result_ty {
            return Err(err_vals(f, loc, ErrorKind::OperandTypeMustMatchReturnType, &[a]));
        }
        return Ok(());
    }
    let check_scalar = |a_scalar: Ty, r_scalar: Ty| -> Result<(), CompileError> {
        if component_type_match {
            if r_scalar != ctx.component_ty(a_scalar) {
                return Err(err_vals(f, loc, ErrorKind::OperandTypeMustMatchReturnType, &[a]));
            }
        } else if a_scalar != r_scalar {
            return Err(err_vals(f, loc, ErrorKind::OperandTypeMustMatchReturnType, &[a]));
        }
        check_scalar_support(ctx, loc, a_scalar, support)
    };
    let a_kind = ctx.kind(a_ty);
    match (a_kind, r_kind) {
        (TypeKind::Coopmatrix { comp: ac, .. }, TypeKind::Coopmatrix { comp: rc, .. }) => {
            check_scalar(*ac, *rc)
        }
        (ak, rk) if ak.is_number() && rk.is_number() => check_scalar(a_ty, result_ty),
        _ => Err(err_vals(f, loc, ErrorKind::ExpectedCoopmatrixOrNumber, &[a])),
    }
}

fn check_compare(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    ops: &[ValueId],
    result_ty: Ty,
    support: u8,
) -> Result<(), CompileError> {
    if *ctx.kind(result_ty) != TypeKind::Bool {
        return Err(err(loc, ErrorKind::ExpectedBoolean));
    }
    let a_ty = f.value_ty(ops[0]);
    if !ctx.kind(a_ty).is_number() {
        return Err(err_vals(f, loc, ErrorKind::ExpectedNumber, &[ops[0]]));
    }
    if support & SUPPORTS_COMPLEX == 0 && ctx.kind(a_ty).is_complex() {
        return Err(err_vals(f, loc, ErrorKind::ComplexUnsupported, &[ops[0]]));
    }
    if a_ty != f.value_ty(ops[1]) {
        return Err(err_vals(f, loc, ErrorKind::NumberMismatch, &[ops[0], ops[1]]));
    }
    Ok(())
}

fn check_math_unary(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    a: ValueId,
    result_ty: Ty,
    support: u8,
) -> Result<(), CompileError> {
    let a_ty = f.value_ty(a);
    if !ctx.kind(a_ty).is_number() {
        return Err(err_vals(f, loc, ErrorKind::ExpectedNumber, &[a]));
    }
    check_scalar_support(ctx, loc, a_ty, support)?;
    if a_ty != result_ty {
        return Err(err_vals(f, loc, ErrorKind::OperandTypeMustMatchReturnType, &[a]));
    }
    Ok(())
}

fn check_subgroup_op(
    ctx: &Context,
    f: &Function,
    loc: &Location,
    a: ValueId,
    result_ty: Ty,
    support: u8,
) -> Result<(), CompileError> {
    let a_ty = f.value_ty(a);
    if !ctx.kind(a_ty).is_number() {
        return Err(err_vals(f, loc, ErrorKind::ExpectedNumber, &[a]));
    }
    if support & SUPPORTS_COMPLEX == 0 && ctx.kind(a_ty).is_complex() {
        return Err(err_vals(f, loc, ErrorKind::ComplexUnsupported, &[a]));
    }
    if a_ty != result_ty {
        return Err(err_vals(f, loc, ErrorKind::OperandTypeMustMatchReturnType, &[a]));
    }
    Ok(())
}

/// Whole-function legality check: collective instructions must not appear
/// inside SPMD regions.
pub fn check_ir(func: &Function) -> Result<(), CompileError> {
    fn walk(func: &Function, region: crate::region::RegionId, inside_spmd: bool) -> Result<(), CompileError> {
        let inside_spmd = inside_spmd || func.region(region).kind() == RegionKind::Spmd;
        for &i in func.region(region).insts() {
            if inside_spmd && func.inst(i).opcode().is_collective() {
                return Err(CompileError::new(
                    func.inst(i).loc().clone(),
                    ErrorKind::CollectiveInSpmdRegion,
                )
                .with_extra(format!(
                    "{} must not be called from an SPMD region",
                    func.inst(i).opcode().name()
                )));
            }
            for &r in func.inst(i).regions() {
                walk(func, r, inside_spmd)?;
            }
        }
        Ok(())
    }
    walk(func, func.body(), false)
}
