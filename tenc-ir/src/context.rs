//! Compiler context: type interning and diagnostics sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CompileError, ErrorKind, ErrorReporter};
use crate::location::Location;
use crate::types::{
    is_dynamic_value, promote_kinds, AddressSpace, FloatFormat, IntWidth, MatrixUse, Ty, TypeKind,
};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ScalarCache {
    void: Ty,
    bool_: Ty,
    index: Ty,
    i8: Ty,
    i16: Ty,
    i32: Ty,
    i64: Ty,
    f16: Ty,
    bf16: Ty,
    f32: Ty,
    f64: Ty,
    c32: Ty,
    c64: Ty,
}

/// Process-scoped compiler context.
///
/// Owns the type-interning table and the error reporter. Every IR entity
/// transitively references exactly one context; mixing entities from
/// different contexts is rejected at validation boundaries.
pub struct Context {
    id: u64,
    kinds: Vec<TypeKind>,
    interned: HashMap<TypeKind, Ty>,
    scalars: ScalarCache,
    reporter: Option<ErrorReporter>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a context with a fresh identity.
    pub fn new() -> Self {
        let mut ctx = Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            kinds: Vec::new(),
            interned: HashMap::new(),
            scalars: ScalarCache {
                void: Ty(0),
                bool_: Ty(0),
                index: Ty(0),
                i8: Ty(0),
                i16: Ty(0),
                i32: Ty(0),
                i64: Ty(0),
                f16: Ty(0),
                bf16: Ty(0),
                f32: Ty(0),
                f64: Ty(0),
                c32: Ty(0),
                c64: Ty(0),
            },
            reporter: None,
        };
        ctx.scalars = ScalarCache {
            void: ctx.intern(TypeKind::Void),
            bool_: ctx.intern(TypeKind::Bool),
            index: ctx.intern(TypeKind::Index),
            i8: ctx.intern(TypeKind::Int(IntWidth::I8)),
            i16: ctx.intern(TypeKind::Int(IntWidth::I16)),
            i32: ctx.intern(TypeKind::Int(IntWidth::I32)),
            i64: ctx.intern(TypeKind::Int(IntWidth::I64)),
            f16: ctx.intern(TypeKind::Float(FloatFormat::F16)),
            bf16: ctx.intern(TypeKind::Float(FloatFormat::Bf16)),
            f32: ctx.intern(TypeKind::Float(FloatFormat::F32)),
            f64: ctx.intern(TypeKind::Float(FloatFormat::F64)),
            c32: ctx.intern(TypeKind::Complex(FloatFormat::F32)),
            c64: ctx.intern(TypeKind::Complex(FloatFormat::F64)),
        };
        ctx
    }

    /// Identity of this context, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Install the diagnostics callback invoked by passes and the verifier.
    pub fn set_error_reporter(&mut self, reporter: ErrorReporter) {
        self.reporter = Some(reporter);
    }

    /// Forward a diagnostic to the installed reporter, if any.
    pub fn report(&mut self, message: &str, loc: Option<&Location>) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter(message, loc);
        }
    }

    fn intern(&mut self, kind: TypeKind) -> Ty {
        if let Some(ty) = self.interned.get(&kind) {
            return *ty;
        }
        let ty = Ty(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interned.insert(kind, ty);
        ty
    }

    /// Structural description of `ty`.
    pub fn kind(&self, ty: Ty) -> &TypeKind {
        &self.kinds[ty.0 as usize]
    }

    /// The void type.
    pub fn void(&self) -> Ty {
        self.scalars.void
    }
    /// The boolean type.
    pub fn bool_(&self) -> Ty {
        self.scalars.bool_
    }
    /// The index type.
    pub fn index(&self) -> Ty {
        self.scalars.index
    }
    /// 8-bit signed integer.
    pub fn i8(&self) -> Ty {
        self.scalars.i8
    }
    /// 16-bit signed integer.
    pub fn i16(&self) -> Ty {
        self.scalars.i16
    }
    /// 32-bit signed integer.
    pub fn i32(&self) -> Ty {
        self.scalars.i32
    }
    /// 64-bit signed integer.
    pub fn i64(&self) -> Ty {
        self.scalars.i64
    }
    /// IEEE binary16 float.
    pub fn f16(&self) -> Ty {
        self.scalars.f16
    }
    /// bfloat16 float.
    pub fn bf16(&self) -> Ty {
        self.scalars.bf16
    }
    /// IEEE binary32 float.
    pub fn f32(&self) -> Ty {
        self.scalars.f32
    }
    /// IEEE binary64 float.
    pub fn f64(&self) -> Ty {
        self.scalars.f64
    }
    /// Complex with f32 components.
    pub fn c32(&self) -> Ty {
        self.scalars.c32
    }
    /// Complex with f64 components.
    pub fn c64(&self) -> Ty {
        self.scalars.c64
    }

    /// Intern a memref type.
    ///
    /// `shape` entries must be non-negative or [`crate::DYNAMIC`]; `stride`
    /// must have the same length as `shape` (pass
    /// [`crate::packed_strides`] for the contiguous layout); the element
    /// type must be a number.
    pub fn get_memref(
        &mut self,
        elem: Ty,
        shape: &[i64],
        stride: &[i64],
        addrspace: AddressSpace,
    ) -> Result<Ty, CompileError> {
        if !self.kind(elem).is_number() {
            return Err(CompileError::new(Location::default(), ErrorKind::ExpectedNumber));
        }
        if shape.len() != stride.len() {
            return Err(CompileError::new(Location::default(), ErrorKind::InvalidShape)
                .with_extra("shape and stride length differ"));
        }
        if shape.iter().any(|&s| s < 0 && !is_dynamic_value(s)) {
            return Err(CompileError::new(Location::default(), ErrorKind::InvalidShape));
        }
        if stride.iter().any(|&s| s < 0 && !is_dynamic_value(s)) {
            return Err(CompileError::new(Location::default(), ErrorKind::InvalidStride));
        }
        Ok(self.intern(TypeKind::Memref {
            elem,
            shape: shape.to_vec(),
            stride: stride.to_vec(),
            addrspace,
        }))
    }

    /// Intern a group type over `of`, which must be a memref.
    pub fn get_group(&mut self, of: Ty, offset: i64) -> Result<Ty, CompileError> {
        if !matches!(self.kind(of), TypeKind::Memref { .. }) {
            return Err(CompileError::new(Location::default(), ErrorKind::ExpectedMemref));
        }
        if offset < 0 && !is_dynamic_value(offset) {
            return Err(CompileError::new(Location::default(), ErrorKind::OutOfBounds));
        }
        Ok(self.intern(TypeKind::Group { of, offset }))
    }

    /// Intern a cooperative matrix type; `rows` and `cols` must be positive
    /// and the component must be a number.
    pub fn get_coopmatrix(
        &mut self,
        comp: Ty,
        rows: i64,
        cols: i64,
        use_: MatrixUse,
    ) -> Result<Ty, CompileError> {
        if !self.kind(comp).is_number() {
            return Err(CompileError::new(Location::default(), ErrorKind::ExpectedNumber));
        }
        if rows <= 0 || cols <= 0 {
            return Err(CompileError::new(Location::default(), ErrorKind::InvalidShape));
        }
        Ok(self.intern(TypeKind::Coopmatrix {
            comp,
            rows,
            cols,
            use_,
        }))
    }

    /// Intern a function type.
    pub fn get_function(&mut self, params: &[Ty], result: Ty) -> Ty {
        self.intern(TypeKind::Function {
            params: params.to_vec(),
            result,
        })
    }

    /// Smallest number type both arguments promote into, or `None`.
    pub fn promote(&self, a: Ty, b: Ty) -> Option<Ty> {
        let kind = promote_kinds(self.kind(a), self.kind(b))?;
        // All scalar kinds are pre-interned at construction.
        self.interned.get(&kind).copied()
    }

    /// True if `a` implicitly promotes into `b`.
    pub fn promotable(&self, a: Ty, b: Ty) -> bool {
        self.promote(a, b) == Some(b)
    }

    /// True if an explicit cast from `a` to `b` is permitted.
    pub fn is_cast_allowed(&self, a: Ty, b: Ty) -> bool {
        crate::types::is_cast_allowed_kinds(self.kind(a), self.kind(b))
    }

    /// Size of a scalar type in bytes; `None` for aggregates.
    pub fn size_in_bytes(&self, ty: Ty) -> Option<u32> {
        self.kind(ty).size_in_bytes()
    }

    /// Element type of a memref, component type of a coopmatrix or group
    /// element, identity for scalars.
    pub fn component_ty(&self, ty: Ty) -> Ty {
        match self.kind(ty) {
            TypeKind::Memref { elem, .. } => *elem,
            TypeKind::Coopmatrix { comp, .. } => *comp,
            TypeKind::Complex(ff) => match ff {
                FloatFormat::F32 => self.scalars.f32,
                FloatFormat::F64 => self.scalars.f64,
                FloatFormat::F16 => self.scalars.f16,
                FloatFormat::Bf16 => self.scalars.bf16,
            },
            _ => ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::packed_strides;
    use crate::DYNAMIC;

    #[test]
    fn interning_is_structural() {
        let mut ctx = Context::new();
        assert_eq!(ctx.void(), ctx.void());

        let m12 = ctx
            .get_memref(ctx.f32(), &[1, 2], &packed_strides(&[1, 2]), AddressSpace::Global)
            .unwrap();
        let m12_again = ctx
            .get_memref(ctx.f32(), &[1, 2], &packed_strides(&[1, 2]), AddressSpace::Global)
            .unwrap();
        let m23 = ctx
            .get_memref(ctx.f32(), &[2, 3], &packed_strides(&[2, 3]), AddressSpace::Global)
            .unwrap();
        let m12_f64 = ctx
            .get_memref(ctx.f64(), &[1, 2], &packed_strides(&[1, 2]), AddressSpace::Global)
            .unwrap();
        assert_eq!(m12, m12_again);
        assert_ne!(m12, m23);
        assert_ne!(m12, m12_f64);

        let g = ctx.get_group(m12, 0).unwrap();
        assert_ne!(g, m12);
        assert_eq!(g, ctx.get_group(m12, 0).unwrap());
        assert_ne!(g, ctx.get_group(m12, DYNAMIC).unwrap());
    }

    #[rstest::rstest]
    #[case("i8", "i32", Some("i32"))]
    #[case("i64", "f16", Some("f32"))]
    #[case("f16", "bf16", Some("f32"))]
    #[case("f32", "f64", Some("f64"))]
    #[case("c32", "f64", Some("c64"))]
    #[case("i32", "c32", Some("c32"))]
    #[case("index", "i32", Some("i64"))]
    #[case("bool", "i32", None)]
    fn promotion_lattice(#[case] a: &str, #[case] b: &str, #[case] expected: Option<&str>) {
        let ctx = Context::new();
        let by_name = |n: &str| match n {
            "bool" => ctx.bool_(),
            "index" => ctx.index(),
            "i8" => ctx.i8(),
            "i32" => ctx.i32(),
            "i64" => ctx.i64(),
            "f16" => ctx.f16(),
            "bf16" => ctx.bf16(),
            "f32" => ctx.f32(),
            "f64" => ctx.f64(),
            "c32" => ctx.c32(),
            _ => ctx.c64(),
        };
        assert_eq!(ctx.promote(by_name(a), by_name(b)), expected.map(by_name));
    }

    #[test]
    fn promotable_and_casts() {
        let ctx = Context::new();
        assert!(ctx.promotable(ctx.f32(), ctx.f64()));
        assert!(!ctx.promotable(ctx.f64(), ctx.f32()));

        assert!(ctx.is_cast_allowed(ctx.f64(), ctx.i8()));
        assert!(ctx.is_cast_allowed(ctx.f32(), ctx.c32()));
        assert!(!ctx.is_cast_allowed(ctx.c32(), ctx.f32()));
        assert!(!ctx.is_cast_allowed(ctx.bool_(), ctx.i32()));
    }

    #[test]
    fn memref_invariants() {
        let mut ctx = Context::new();
        let b = ctx.bool_();
        assert!(ctx.get_memref(b, &[4], &[1], AddressSpace::Global).is_err());
        let f = ctx.f32();
        assert!(ctx.get_memref(f, &[-3], &[1], AddressSpace::Global).is_err());
        assert!(ctx.get_memref(f, &[4, 4], &[1], AddressSpace::Global).is_err());
        assert!(ctx
            .get_memref(f, &[4, DYNAMIC], &[1, 4], AddressSpace::Local)
            .is_ok());

        assert!(ctx.get_coopmatrix(f, 0, 4, MatrixUse::A).is_err());
        assert!(ctx.get_coopmatrix(f, 8, 4, MatrixUse::Acc).is_ok());
    }
}
