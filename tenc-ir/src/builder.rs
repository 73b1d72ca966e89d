//! Programmatic IR construction.
//!
//! Builders construct instructions, run the verifier at insertion, append to
//! the current region, and hand back the SSA results. On error the
//! half-built instruction is left detached and the builder can no longer be
//! trusted to produce a verified function, so errors should be propagated.

use crate::context::Context;
use crate::error::{CompileError, ErrorKind};
use crate::func::{Function, Program};
use crate::inst::{Immediate, InstId, InstKind, ReduceMode};
use crate::location::Location;
use crate::region::RegionId;
use crate::types::{AddressSpaceFlags, Transpose, Ty, TypeKind, DYNAMIC};
use crate::value::ValueId;
use crate::verify;

/// Builds a [`Program`] function by function.
pub struct ProgramBuilder {
    prog: Program,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    /// Builder over a fresh context.
    pub fn new() -> Self {
        Self {
            prog: Program::new(Context::new()),
        }
    }

    /// Builder over an existing context.
    pub fn with_context(ctx: Context) -> Self {
        Self {
            prog: Program::new(ctx),
        }
    }

    /// The context, for interning types.
    pub fn ctx(&mut self) -> &mut Context {
        self.prog.context_mut()
    }

    /// Build one function. `param_tys` become the body region's parameters.
    pub fn create_function(
        &mut self,
        name: impl Into<String>,
        param_tys: &[Ty],
        build: impl FnOnce(&mut FunctionBuilder<'_>) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let mut func = Function::new(self.prog.context(), name);
        let body = func.body();
        func.set_region_params(body, param_tys);
        {
            let mut fb = FunctionBuilder {
                ctx: self.prog.context_mut(),
                func: &mut func,
                current: body,
            };
            build(&mut fb)?;
        }
        self.prog.push_function(func)
    }

    /// Finish and return the program.
    pub fn build(self) -> Program {
        self.prog
    }
}

macro_rules! binary_arith {
    ($($(#[$attr:meta])* $method:ident => $kind:ident;)*) => {
        $(
            $(#[$attr])*
            pub fn $method(
                &mut self,
                a: ValueId,
                b: ValueId,
                loc: Location,
            ) -> Result<ValueId, CompileError> {
                let ty = self.func.value_ty(a);
                let inst = self.push(InstKind::$kind, &[a, b], &[ty], 0, loc)?;
                Ok(self.func.result(inst))
            }
        )*
    };
}

macro_rules! compare_ops {
    ($($(#[$attr:meta])* $method:ident => $kind:ident;)*) => {
        $(
            $(#[$attr])*
            pub fn $method(
                &mut self,
                a: ValueId,
                b: ValueId,
                loc: Location,
            ) -> Result<ValueId, CompileError> {
                let ty = self.ctx.bool_();
                let inst = self.push(InstKind::$kind, &[a, b], &[ty], 0, loc)?;
                Ok(self.func.result(inst))
            }
        )*
    };
}

macro_rules! unary_same_ty {
    ($($(#[$attr:meta])* $method:ident => $kind:ident;)*) => {
        $(
            $(#[$attr])*
            pub fn $method(&mut self, a: ValueId, loc: Location) -> Result<ValueId, CompileError> {
                let ty = self.func.value_ty(a);
                let inst = self.push(InstKind::$kind, &[a], &[ty], 0, loc)?;
                Ok(self.func.result(inst))
            }
        )*
    };
}

macro_rules! unary_component_ty {
    ($($(#[$attr:meta])* $method:ident => $kind:ident;)*) => {
        $(
            $(#[$attr])*
            pub fn $method(&mut self, a: ValueId, loc: Location) -> Result<ValueId, CompileError> {
                let ty = self.ctx.component_ty(self.func.value_ty(a));
                let inst = self.push(InstKind::$kind, &[a], &[ty], 0, loc)?;
                Ok(self.func.result(inst))
            }
        )*
    };
}

/// Builds the body of one function.
pub struct FunctionBuilder<'a> {
    ctx: &'a mut Context,
    func: &'a mut Function,
    current: RegionId,
}

impl<'a> FunctionBuilder<'a> {
    /// The function under construction.
    pub fn func(&self) -> &Function {
        self.func
    }

    /// Mutable access for launch configuration (work-group size, subgroup
    /// size, core features).
    pub fn func_mut(&mut self) -> &mut Function {
        self.func
    }

    /// The context.
    pub fn ctx(&mut self) -> &mut Context {
        self.ctx
    }

    /// Split borrow for running analyses mid-build.
    pub fn split_mut(&mut self) -> (&Context, &mut Function) {
        (&*self.ctx, &mut *self.func)
    }

    /// Function parameters (the body region's parameters).
    pub fn params(&self) -> Vec<ValueId> {
        let body = self.func.body();
        self.func.region(body).params().to_vec()
    }

    /// Assign a display name to a value.
    pub fn name(&mut self, v: ValueId, name: impl Into<String>) {
        self.func.set_value_name(v, name);
    }

    fn push(
        &mut self,
        kind: InstKind,
        operands: &[ValueId],
        result_tys: &[Ty],
        num_regions: usize,
        loc: Location,
    ) -> Result<InstId, CompileError> {
        let inst = self.func.create_inst(kind, operands, result_tys, num_regions, loc);
        verify::setup_and_check(self.func, self.ctx, inst)?;
        self.func.append_inst(self.current, inst);
        Ok(inst)
    }

    /* ---------------- constants ---------------- */

    /// Materialize an immediate of type `ty`.
    pub fn constant(
        &mut self,
        value: Immediate,
        ty: Ty,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let inst = self.push(InstKind::Constant(value), &[], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    fn splat_immediate(&self, ty: Ty, zero: bool) -> Result<Immediate, CompileError> {
        let scalar = match self.ctx.kind(ty) {
            TypeKind::Coopmatrix { comp, .. } => *comp,
            _ => ty,
        };
        let (int, float) = if zero { (0, 0.0) } else { (1, 1.0) };
        let kind = self.ctx.kind(scalar);
        if kind.is_integer() {
            Ok(Immediate::Int(int))
        } else if kind.is_float() {
            Ok(Immediate::Float(float))
        } else if kind.is_complex() {
            Ok(Immediate::Complex(float, 0.0))
        } else if *kind == TypeKind::Bool {
            Ok(Immediate::Bool(!zero))
        } else {
            Err(CompileError::new(
                Location::default(),
                ErrorKind::ExpectedCoopmatrixNumberOrBoolean,
            ))
        }
    }

    /// The additive identity of `ty` (splat for coopmatrix types).
    pub fn constant_zero(&mut self, ty: Ty, loc: Location) -> Result<ValueId, CompileError> {
        let imm = self.splat_immediate(ty, true)?;
        self.constant(imm, ty, loc)
    }

    /// The multiplicative identity of `ty` (splat for coopmatrix types).
    pub fn constant_one(&mut self, ty: Ty, loc: Location) -> Result<ValueId, CompileError> {
        let imm = self.splat_immediate(ty, false)?;
        self.constant(imm, ty, loc)
    }

    /// An index-typed integer constant.
    pub fn constant_index(&mut self, v: i64, loc: Location) -> Result<ValueId, CompileError> {
        let ty = self.ctx.index();
        self.constant(Immediate::Int(v), ty, loc)
    }

    /* ---------------- memory ---------------- */

    /// Reserve local scratch memory of type `memref_ty` (local address
    /// space).
    pub fn alloca(&mut self, memref_ty: Ty, loc: Location) -> Result<ValueId, CompileError> {
        let inst = self.push(InstKind::Alloca { stack_ptr: -1 }, &[], &[memref_ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Load a scalar from a memref or a memref from a group.
    pub fn load(
        &mut self,
        operand: ValueId,
        indices: &[ValueId],
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let result_ty = match self.ctx.kind(self.func.value_ty(operand)) {
            TypeKind::Memref { elem, .. } => *elem,
            TypeKind::Group { of, .. } => *of,
            _ => return Err(CompileError::new(loc, ErrorKind::ExpectedMemrefOrGroup)),
        };
        let mut operands = vec![operand];
        operands.extend_from_slice(indices);
        let inst = self.push(InstKind::Load, &operands, &[result_ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Store `val` into a memref.
    pub fn store(
        &mut self,
        val: ValueId,
        operand: ValueId,
        indices: &[ValueId],
        loc: Location,
    ) -> Result<(), CompileError> {
        let mut operands = vec![val, operand];
        operands.extend_from_slice(indices);
        self.push(InstKind::Store, &operands, &[], 0, loc)?;
        Ok(())
    }

    /// Run-time extent of mode `mode`.
    pub fn size(
        &mut self,
        operand: ValueId,
        mode: i64,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let ty = self.ctx.index();
        let inst = self.push(InstKind::Size { mode }, &[operand], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Work-group barrier with the given fence set.
    pub fn barrier(&mut self, fence: AddressSpaceFlags, loc: Location) -> Result<(), CompileError> {
        self.push(InstKind::Barrier { fence }, &[], &[], 0, loc)?;
        Ok(())
    }

    /* ---------------- views ---------------- */

    /// Strided sub-block of `operand`. `static_offsets`/`static_sizes` hold
    /// one entry per mode ([`DYNAMIC`] entries take their value from
    /// `offsets`/`sizes`); a static size of 0 drops the mode.
    pub fn subview(
        &mut self,
        operand: ValueId,
        static_offsets: &[i64],
        static_sizes: &[i64],
        offsets: &[ValueId],
        sizes: &[ValueId],
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let (elem, shape, stride, addrspace) = self.memref_parts(operand, &loc)?;
        if static_offsets.len() != shape.len() || static_sizes.len() != shape.len() {
            return Err(CompileError::new(loc, ErrorKind::InvalidNumberOfIndices));
        }
        let mut rshape = Vec::new();
        let mut rstride = Vec::new();
        for i in 0..shape.len() {
            let size = static_sizes[i];
            if size != 0 {
                rshape.push(size);
                rstride.push(stride[i]);
            }
        }
        let result_ty = self.ctx.get_memref(elem, &rshape, &rstride, addrspace)?;
        let mut operands = vec![operand];
        operands.extend_from_slice(offsets);
        operands.extend_from_slice(sizes);
        let inst = self.push(
            InstKind::Subview {
                static_offsets: static_offsets.to_vec(),
                static_sizes: static_sizes.to_vec(),
                num_dyn_offsets: offsets.len(),
            },
            &operands,
            &[result_ty],
            0,
            loc,
        )?;
        Ok(self.func.result(inst))
    }

    /// Split mode `mode` into `static_shape` modes; [`DYNAMIC`] entries take
    /// their extent from `expand_shape`.
    pub fn expand(
        &mut self,
        operand: ValueId,
        mode: i64,
        static_shape: &[i64],
        expand_shape: &[ValueId],
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let (elem, shape, stride, addrspace) = self.memref_parts(operand, &loc)?;
        if mode < 0 || mode as usize >= shape.len() {
            return Err(CompileError::new(loc, ErrorKind::OutOfBounds));
        }
        let m = mode as usize;
        let mut rshape: Vec<i64> = shape[..m].to_vec();
        let mut rstride: Vec<i64> = stride[..m].to_vec();
        let mut s = stride[m];
        for &entry in static_shape {
            rshape.push(entry);
            rstride.push(s);
            s = if crate::types::is_dynamic_value(s) || crate::types::is_dynamic_value(entry) {
                DYNAMIC
            } else {
                s * entry
            };
        }
        rshape.extend_from_slice(&shape[m + 1..]);
        rstride.extend_from_slice(&stride[m + 1..]);
        let result_ty = self.ctx.get_memref(elem, &rshape, &rstride, addrspace)?;
        let mut operands = vec![operand];
        operands.extend_from_slice(expand_shape);
        let inst = self.push(
            InstKind::Expand {
                mode,
                static_shape: static_shape.to_vec(),
            },
            &operands,
            &[result_ty],
            0,
            loc,
        )?;
        Ok(self.func.result(inst))
    }

    /// Merge the contiguous mode range `[from, to]` into one mode.
    pub fn fuse(
        &mut self,
        operand: ValueId,
        from: i64,
        to: i64,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let (elem, shape, stride, addrspace) = self.memref_parts(operand, &loc)?;
        if from < 0 || from >= to || to as usize >= shape.len() {
            return Err(CompileError::new(loc, ErrorKind::OutOfBounds));
        }
        let (f, t) = (from as usize, to as usize);
        let mut prod: i64 = 1;
        for &s in &shape[f..=t] {
            if crate::types::is_dynamic_value(s) {
                prod = DYNAMIC;
                break;
            }
            prod *= s;
        }
        let mut rshape: Vec<i64> = shape[..f].to_vec();
        let mut rstride: Vec<i64> = stride[..f].to_vec();
        rshape.push(prod);
        rstride.push(stride[f]);
        rshape.extend_from_slice(&shape[t + 1..]);
        rstride.extend_from_slice(&stride[t + 1..]);
        let result_ty = self.ctx.get_memref(elem, &rshape, &rstride, addrspace)?;
        let inst = self.push(InstKind::Fuse { from, to }, &[operand], &[result_ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    fn memref_parts(
        &self,
        operand: ValueId,
        loc: &Location,
    ) -> Result<(Ty, Vec<i64>, Vec<i64>, crate::types::AddressSpace), CompileError> {
        match self.ctx.kind(self.func.value_ty(operand)) {
            TypeKind::Memref {
                elem,
                shape,
                stride,
                addrspace,
            } => Ok((*elem, shape.clone(), stride.clone(), *addrspace)),
            _ => Err(CompileError::new(loc.clone(), ErrorKind::ExpectedMemref)),
        }
    }

    /* ---------------- BLAS ---------------- */

    /// `C ← α·op(A)·op(B) + β·C`.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        &mut self,
        trans_a: Transpose,
        trans_b: Transpose,
        alpha: ValueId,
        a: ValueId,
        b: ValueId,
        beta: ValueId,
        c: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(
            InstKind::Gemm { trans_a, trans_b },
            &[alpha, a, b, beta, c],
            &[],
            0,
            loc,
        )?;
        Ok(())
    }

    /// `c ← α·op(A)·b + β·c`.
    #[allow(clippy::too_many_arguments)]
    pub fn gemv(
        &mut self,
        trans_a: Transpose,
        alpha: ValueId,
        a: ValueId,
        b: ValueId,
        beta: ValueId,
        c: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(InstKind::Gemv { trans_a }, &[alpha, a, b, beta, c], &[], 0, loc)?;
        Ok(())
    }

    /// `C ← α·a·bᵀ + β·C`.
    pub fn ger(
        &mut self,
        alpha: ValueId,
        a: ValueId,
        b: ValueId,
        beta: ValueId,
        c: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(InstKind::Ger, &[alpha, a, b, beta, c], &[], 0, loc)?;
        Ok(())
    }

    /// `C ← α·(A ⊙ B) + β·C`.
    pub fn hadamard(
        &mut self,
        alpha: ValueId,
        a: ValueId,
        b: ValueId,
        beta: ValueId,
        c: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(InstKind::Hadamard, &[alpha, a, b, beta, c], &[], 0, loc)?;
        Ok(())
    }

    /// `B ← α·op(A) + β·B`.
    pub fn axpby(
        &mut self,
        trans_a: Transpose,
        alpha: ValueId,
        a: ValueId,
        beta: ValueId,
        b: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(InstKind::Axpby { trans_a }, &[alpha, a, beta, b], &[], 0, loc)?;
        Ok(())
    }

    /// `B ← α·sum(op(A)) + β·B`.
    pub fn sum(
        &mut self,
        trans_a: Transpose,
        alpha: ValueId,
        a: ValueId,
        beta: ValueId,
        b: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(InstKind::Sum { trans_a }, &[alpha, a, beta, b], &[], 0, loc)?;
        Ok(())
    }

    /// `B ← α·cumsum_mode(A) + β·B`.
    pub fn cumsum(
        &mut self,
        mode: i64,
        alpha: ValueId,
        a: ValueId,
        beta: ValueId,
        b: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(InstKind::Cumsum { mode }, &[alpha, a, beta, b], &[], 0, loc)?;
        Ok(())
    }

    /* ---------------- casts ---------------- */

    /// Explicit conversion to `to_ty`.
    pub fn cast(&mut self, a: ValueId, to_ty: Ty, loc: Location) -> Result<ValueId, CompileError> {
        let inst = self.push(InstKind::Cast, &[a], &[to_ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /* ---------------- structured control flow ---------------- */

    /// Counted loop. The body closure receives the induction variable and
    /// the loop-carried values; it must end with [`Self::yield_`] when
    /// `inits` is non-empty. Returns the loop results.
    #[allow(clippy::too_many_arguments)]
    pub fn for_(
        &mut self,
        from: ValueId,
        to: ValueId,
        step: Option<ValueId>,
        inits: &[ValueId],
        loc: Location,
        body: impl FnOnce(&mut Self, ValueId, &[ValueId]) -> Result<(), CompileError>,
    ) -> Result<Vec<ValueId>, CompileError> {
        let mut operands = vec![from, to];
        if let Some(s) = step {
            operands.push(s);
        }
        operands.extend_from_slice(inits);
        let result_tys: Vec<Ty> = inits.iter().map(|&v| self.func.value_ty(v)).collect();
        let inst = self.push(
            InstKind::For {
                has_step: step.is_some(),
            },
            &operands,
            &result_tys,
            1,
            loc,
        )?;
        let body_region = self.func.inst(inst).regions()[0];
        let params = self.func.region(body_region).params().to_vec();
        self.in_region(body_region, |fb| body(fb, params[0], &params[1..]))?;
        Ok(self.func.inst(inst).results().to_vec())
    }

    /// SPMD loop nest over `[from_i, to_i)` ranges; the body closure
    /// receives one loop variable per range.
    pub fn foreach(
        &mut self,
        from: &[ValueId],
        to: &[ValueId],
        loc: Location,
        body: impl FnOnce(&mut Self, &[ValueId]) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        if from.len() != to.len() {
            return Err(CompileError::new(loc, ErrorKind::FromToMismatch));
        }
        let mut operands = from.to_vec();
        operands.extend_from_slice(to);
        let inst = self.push(
            InstKind::Foreach {
                num_loop_vars: from.len(),
            },
            &operands,
            &[],
            1,
            loc,
        )?;
        let body_region = self.func.inst(inst).regions()[0];
        let params = self.func.region(body_region).params().to_vec();
        self.in_region(body_region, |fb| body(fb, &params))
    }

    /// Conditional without results; the otherwise arm stays empty.
    pub fn if_(
        &mut self,
        condition: ValueId,
        loc: Location,
        then_body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let inst = self.push(InstKind::If, &[condition], &[], 2, loc)?;
        let then_region = self.func.inst(inst).regions()[0];
        self.in_region(then_region, then_body)
    }

    /// Conditional yielding `result_tys`; both arms must end with
    /// [`Self::yield_`].
    pub fn if_else(
        &mut self,
        condition: ValueId,
        result_tys: &[Ty],
        loc: Location,
        then_body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
        else_body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<Vec<ValueId>, CompileError> {
        let inst = self.push(InstKind::If, &[condition], result_tys, 2, loc)?;
        let then_region = self.func.inst(inst).regions()[0];
        let else_region = self.func.inst(inst).regions()[1];
        self.in_region(then_region, then_body)?;
        self.in_region(else_region, else_body)?;
        Ok(self.func.inst(inst).results().to_vec())
    }

    /// SPMD region in which lanes diverge freely.
    pub fn parallel(
        &mut self,
        loc: Location,
        body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let inst = self.push(InstKind::Parallel, &[], &[], 1, loc)?;
        let body_region = self.func.inst(inst).regions()[0];
        self.in_region(body_region, body)
    }

    /// Terminate the current region, passing `values` to the parent.
    pub fn yield_(&mut self, values: &[ValueId], loc: Location) -> Result<(), CompileError> {
        self.push(InstKind::Yield, values, &[], 0, loc)?;
        Ok(())
    }

    fn in_region(
        &mut self,
        region: RegionId,
        body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let prev = self.current;
        self.current = region;
        let r = body(self);
        self.current = prev;
        r
    }

    /* ---------------- builtins ---------------- */

    /// Work-group index along the batch axis.
    pub fn group_id(&mut self, loc: Location) -> Result<ValueId, CompileError> {
        let ty = self.ctx.index();
        let inst = self.push(InstKind::GroupId, &[], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Number of work-groups along the batch axis.
    pub fn num_groups(&mut self, loc: Location) -> Result<ValueId, CompileError> {
        let ty = self.ctx.index();
        let inst = self.push(InstKind::NumGroups, &[], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Number of subgroups in the work-group.
    pub fn num_subgroups(&mut self, loc: Location) -> Result<ValueId, CompileError> {
        let ty = self.ctx.i32();
        let inst = self.push(InstKind::NumSubgroups, &[], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Lanes per subgroup.
    pub fn subgroup_size(&mut self, loc: Location) -> Result<ValueId, CompileError> {
        let ty = self.ctx.i32();
        let inst = self.push(InstKind::SubgroupSize, &[], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Subgroup index within the work-group.
    pub fn subgroup_id(&mut self, loc: Location) -> Result<ValueId, CompileError> {
        let ty = self.ctx.i32();
        let inst = self.push(InstKind::SubgroupId, &[], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Lane index within the subgroup.
    pub fn subgroup_local_id(&mut self, loc: Location) -> Result<ValueId, CompileError> {
        let ty = self.ctx.i32();
        let inst = self.push(InstKind::SubgroupLocalId, &[], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    binary_arith! {
        /// Addition.
        add => Add;
        /// Subtraction.
        sub => Sub;
        /// Multiplication.
        mul => Mul;
        /// Division.
        div => Div;
        /// Remainder.
        rem => Rem;
        /// Elementwise maximum.
        max => Max;
        /// Elementwise minimum.
        min => Min;
        /// Left shift.
        shl => Shl;
        /// Arithmetic right shift.
        shr => Shr;
        /// Bitwise/logical and.
        and => And;
        /// Bitwise/logical or.
        or => Or;
        /// Bitwise/logical xor.
        xor => Xor;
    }

    compare_ops! {
        /// Equality comparison.
        equal => Equal;
        /// Inequality comparison.
        not_equal => NotEqual;
        /// Greater-than comparison.
        greater_than => GreaterThan;
        /// Greater-or-equal comparison.
        greater_than_equal => GreaterThanEqual;
        /// Less-than comparison.
        less_than => LessThan;
        /// Less-or-equal comparison.
        less_than_equal => LessThanEqual;
    }

    unary_same_ty! {
        /// Negation.
        neg => Neg;
        /// Bitwise/logical not.
        not => Not;
        /// Complex conjugate.
        conj => Conj;
        /// Cosine.
        cos => Cos;
        /// Sine.
        sin => Sin;
        /// Natural exponential.
        exp => Exp;
        /// Base-2 exponential.
        exp2 => Exp2;
        /// Subgroup-wide sum.
        subgroup_reduce_add => SubgroupReduceAdd;
        /// Subgroup-wide maximum.
        subgroup_reduce_max => SubgroupReduceMax;
        /// Subgroup-wide minimum.
        subgroup_reduce_min => SubgroupReduceMin;
        /// Subgroup inclusive prefix sum.
        subgroup_inclusive_scan_add => SubgroupInclusiveScanAdd;
        /// Subgroup inclusive prefix maximum.
        subgroup_inclusive_scan_max => SubgroupInclusiveScanMax;
        /// Subgroup inclusive prefix minimum.
        subgroup_inclusive_scan_min => SubgroupInclusiveScanMin;
        /// Subgroup exclusive prefix sum.
        subgroup_exclusive_scan_add => SubgroupExclusiveScanAdd;
        /// Subgroup exclusive prefix maximum.
        subgroup_exclusive_scan_max => SubgroupExclusiveScanMax;
        /// Subgroup exclusive prefix minimum.
        subgroup_exclusive_scan_min => SubgroupExclusiveScanMin;
    }

    unary_component_ty! {
        /// Absolute value (magnitude for complex operands).
        abs => Abs;
        /// Imaginary part.
        im => Im;
        /// Real part.
        re => Re;
    }

    /// Broadcast lane `idx`'s value across the subgroup.
    pub fn subgroup_broadcast(
        &mut self,
        a: ValueId,
        idx: ValueId,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let ty = self.func.value_ty(a);
        let inst = self.push(InstKind::SubgroupBroadcast, &[a, idx], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /* ---------------- cooperative matrices ---------------- */

    /// Load a fragment of type `result_ty` from position `(pos0, pos1)`.
    pub fn coopmatrix_load(
        &mut self,
        result_ty: Ty,
        operand: ValueId,
        pos0: ValueId,
        pos1: ValueId,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let inst = self.push(
            InstKind::CoopmatrixLoad,
            &[operand, pos0, pos1],
            &[result_ty],
            0,
            loc,
        )?;
        Ok(self.func.result(inst))
    }

    /// Store fragment `val` at position `(pos0, pos1)`.
    pub fn coopmatrix_store(
        &mut self,
        val: ValueId,
        operand: ValueId,
        pos0: ValueId,
        pos1: ValueId,
        loc: Location,
    ) -> Result<(), CompileError> {
        self.push(InstKind::CoopmatrixStore, &[val, operand, pos0, pos1], &[], 0, loc)?;
        Ok(())
    }

    /// `result ← A·B + C` on fragments; `result_ty` must be an accumulator.
    pub fn coopmatrix_mul_add(
        &mut self,
        a: ValueId,
        b: ValueId,
        c: ValueId,
        result_ty: Ty,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let inst = self.push(InstKind::CoopmatrixMulAdd, &[a, b, c], &[result_ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Scale fragment `b` by scalar `a`.
    pub fn coopmatrix_scale(
        &mut self,
        a: ValueId,
        b: ValueId,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let ty = self.func.value_ty(b);
        let inst = self.push(InstKind::CoopmatrixScale, &[a, b], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Read component `idx` of fragment `mat`.
    pub fn coopmatrix_extract(
        &mut self,
        mat: ValueId,
        idx: ValueId,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let ty = self.ctx.component_ty(self.func.value_ty(mat));
        let inst = self.push(InstKind::CoopmatrixExtract, &[mat, idx], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Replace component `idx` of fragment `mat` by `val`.
    pub fn coopmatrix_insert(
        &mut self,
        val: ValueId,
        mat: ValueId,
        idx: ValueId,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let ty = self.func.value_ty(mat);
        let inst = self.push(InstKind::CoopmatrixInsert, &[val, mat, idx], &[ty], 0, loc)?;
        Ok(self.func.result(inst))
    }

    /// Elementwise transform of fragment `a`; the SPMD body receives
    /// `(row, col, component)` and must yield the replacement component.
    pub fn coopmatrix_apply(
        &mut self,
        a: ValueId,
        loc: Location,
        body: impl FnOnce(&mut Self, ValueId, ValueId, ValueId) -> Result<(), CompileError>,
    ) -> Result<ValueId, CompileError> {
        let ty = self.func.value_ty(a);
        let inst = self.push(InstKind::CoopmatrixApply, &[a], &[ty], 1, loc)?;
        let body_region = self.func.inst(inst).regions()[0];
        let params = self.func.region(body_region).params().to_vec();
        self.in_region(body_region, |fb| body(fb, params[0], params[1], params[2]))?;
        Ok(self.func.result(inst))
    }

    /// Sum-reduce fragment `a` along `mode`; the result type collapses the
    /// reduced mode to extent 1.
    pub fn coopmatrix_reduce_add(
        &mut self,
        mode: ReduceMode,
        a: ValueId,
        result_ty: Ty,
        loc: Location,
    ) -> Result<ValueId, CompileError> {
        let inst = self.push(InstKind::CoopmatrixReduceAdd { mode }, &[a], &[result_ty], 0, loc)?;
        Ok(self.func.result(inst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{packed_strides, AddressSpace};

    fn loc() -> Location {
        Location::default()
    }

    #[test]
    fn batched_gemm_builds_and_verifies() {
        // A: 27x71x43, B: 71x3x43, C: 27x3x43; one GEMM per batch element.
        let mut pb = ProgramBuilder::new();
        let f32 = pb.ctx().f32();
        let a_ty = pb
            .ctx()
            .get_memref(f32, &[27, 71, 43], &packed_strides(&[27, 71, 43]), AddressSpace::Global)
            .unwrap();
        let b_ty = pb
            .ctx()
            .get_memref(f32, &[71, 3, 43], &packed_strides(&[71, 3, 43]), AddressSpace::Global)
            .unwrap();
        let c_ty = pb
            .ctx()
            .get_memref(f32, &[27, 3, 43], &packed_strides(&[27, 3, 43]), AddressSpace::Global)
            .unwrap();

        pb.create_function("gemm", &[a_ty, b_ty, c_ty], |fb| {
            let p = fb.params();
            let f32 = fb.ctx().f32();
            let alpha = fb.constant_one(f32, loc())?;
            let beta = fb.constant_zero(f32, loc())?;
            let gid = fb.group_id(loc())?;
            let a = fb.subview(
                p[0],
                &[0, 0, DYNAMIC],
                &[27, 71, 0],
                &[gid],
                &[],
                loc(),
            )?;
            let b = fb.subview(p[1], &[0, 0, DYNAMIC], &[71, 3, 0], &[gid], &[], loc())?;
            let c = fb.subview(p[2], &[0, 0, DYNAMIC], &[27, 3, 0], &[gid], &[], loc())?;
            fb.gemm(Transpose::N, Transpose::N, alpha, a, b, beta, c, loc())
        })
        .unwrap();
    }

    #[test]
    fn gemm_shape_mismatch_is_rejected() {
        let mut pb = ProgramBuilder::new();
        let f32 = pb.ctx().f32();
        let a_ty = pb
            .ctx()
            .get_memref(f32, &[8, 16], &packed_strides(&[8, 16]), AddressSpace::Global)
            .unwrap();
        let b_ty = pb
            .ctx()
            .get_memref(f32, &[17, 4], &packed_strides(&[17, 4]), AddressSpace::Global)
            .unwrap();
        let c_ty = pb
            .ctx()
            .get_memref(f32, &[8, 4], &packed_strides(&[8, 4]), AddressSpace::Global)
            .unwrap();

        let err = pb
            .create_function("bad", &[a_ty, b_ty, c_ty], |fb| {
                let p = fb.params();
                let f32 = fb.ctx().f32();
                let alpha = fb.constant_one(f32, loc())?;
                let beta = fb.constant_zero(f32, loc())?;
                fb.gemm(Transpose::N, Transpose::N, alpha, p[0], p[1], beta, p[2], loc())
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompatibleShapes);
    }

    #[test]
    fn for_loop_carries_values() {
        let mut pb = ProgramBuilder::new();
        pb.create_function("loop", &[], |fb| {
            let i32_ty = fb.ctx().i32();
            let from = fb.constant(Immediate::Int(0), i32_ty, loc())?;
            let to = fb.constant(Immediate::Int(8), i32_ty, loc())?;
            let acc0 = fb.constant_zero(i32_ty, loc())?;
            let results = fb.for_(from, to, None, &[acc0], loc(), |fb, iv, args| {
                let next = fb.add(args[0], iv, loc())?;
                fb.yield_(&[next], loc())
            })?;
            assert_eq!(results.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn alloca_requires_local_address_space() {
        let mut pb = ProgramBuilder::new();
        let f32 = pb.ctx().f32();
        let global_ty = pb
            .ctx()
            .get_memref(f32, &[8], &[1], AddressSpace::Global)
            .unwrap();
        let err = pb
            .create_function("bad_alloca", &[], move |fb| {
                fb.alloca(global_ty, loc())?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExpectedLocalAddressSpace);
    }
}
