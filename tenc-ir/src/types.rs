//! Interned types with structural equality.

use core::fmt;

/// Sentinel for run-time-known extents in shapes, strides, and group offsets.
pub const DYNAMIC: i64 = i64::MIN;

/// True if `v` is the [`DYNAMIC`] sentinel.
pub const fn is_dynamic_value(v: i64) -> bool {
    v == DYNAMIC
}

/// Address space of a memref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// Device-global memory.
    Global,
    /// Work-group shared local memory.
    Local,
}

bitflags::bitflags! {
    /// Address-space set, used as barrier fence mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AddressSpaceFlags: u32 {
        /// Fence global memory.
        const GLOBAL = 0x1;
        /// Fence local memory.
        const LOCAL = 0x2;
    }
}

impl From<AddressSpace> for AddressSpaceFlags {
    fn from(a: AddressSpace) -> Self {
        match a {
            AddressSpace::Global => Self::GLOBAL,
            AddressSpace::Local => Self::LOCAL,
        }
    }
}

bitflags::bitflags! {
    /// Optional device features a function requires for compilation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CoreFeatureFlags: u32 {
        /// Double the register file per thread at the cost of thread count.
        const LARGE_REGISTER_FILE = 0x1;
    }
}

/// Layout tag of a cooperative matrix fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixUse {
    /// Left-hand-side operand of a multiply-add.
    A,
    /// Right-hand-side operand of a multiply-add.
    B,
    /// Accumulator operand and result.
    Acc,
}

/// Transpose flag of a BLAS operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transpose {
    /// Use the operand as stored.
    N,
    /// Use the transposed operand.
    T,
}

/// Bit width of an integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    /// 8 bits.
    I8,
    /// 16 bits.
    I16,
    /// 32 bits.
    I32,
    /// 64 bits.
    I64,
}

impl IntWidth {
    /// Width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::I8 => 8,
            Self::I16 => 16,
            Self::I32 => 32,
            Self::I64 => 64,
        }
    }
}

/// Floating-point format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatFormat {
    /// IEEE 754 binary16.
    F16,
    /// bfloat16.
    Bf16,
    /// IEEE 754 binary32.
    F32,
    /// IEEE 754 binary64.
    F64,
}

impl FloatFormat {
    /// Width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::F16 | Self::Bf16 => 16,
            Self::F32 => 32,
            Self::F64 => 64,
        }
    }

    /// Rank in the promotion lattice; equal-rank distinct formats promote to
    /// the next rank.
    const fn rank(self) -> u32 {
        match self {
            Self::F16 | Self::Bf16 => 1,
            Self::F32 => 2,
            Self::F64 => 3,
        }
    }
}

/// Interned type handle. Two handles from the same context are equal iff the
/// types are structurally equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ty(pub(crate) u32);

impl Ty {
    /// Raw interning slot, used by dumpers.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural description of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// No value.
    Void,
    /// Truth value.
    Bool,
    /// Pointer-sized index.
    Index,
    /// Signed integer.
    Int(IntWidth),
    /// Floating-point number.
    Float(FloatFormat),
    /// Complex number over a floating-point component.
    Complex(FloatFormat),
    /// Strided view over device memory.
    Memref {
        /// Element type; always a number.
        elem: Ty,
        /// Extent per mode; entries are non-negative or [`DYNAMIC`].
        shape: Vec<i64>,
        /// Stride per mode, in elements.
        stride: Vec<i64>,
        /// Address space of the backing storage.
        addrspace: AddressSpace,
    },
    /// Batch of memrefs addressed by a single index.
    Group {
        /// Memref type yielded per batch element.
        of: Ty,
        /// Offset added to the loaded pointer; non-negative or [`DYNAMIC`].
        offset: i64,
    },
    /// Matrix fragment cooperatively held by a subgroup.
    Coopmatrix {
        /// Component type; always a number.
        comp: Ty,
        /// Number of rows; positive.
        rows: i64,
        /// Number of columns; positive.
        cols: i64,
        /// Layout tag.
        use_: MatrixUse,
    },
    /// Function type.
    Function {
        /// Parameter types.
        params: Vec<Ty>,
        /// Result type.
        result: Ty,
    },
}

impl TypeKind {
    /// True for integer, float, and complex types.
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_) | Self::Complex(_) | Self::Index)
    }

    /// True for integer types; the index type counts as an integer.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Index)
    }

    /// True for complex types.
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Complex(_))
    }

    /// True for float types.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// Size of a scalar in bytes; `None` for aggregate types.
    pub fn size_in_bytes(&self) -> Option<u32> {
        Some(match self {
            Self::Bool => 1,
            Self::Index => 8,
            Self::Int(w) => w.bits() / 8,
            Self::Float(ff) => ff.bits() / 8,
            Self::Complex(ff) => ff.bits() / 4,
            _ => return None,
        })
    }
}

/// Scalar promotion lattice over number kinds.
///
/// Returns the smallest number kind both arguments promote into, or `None`
/// when no such kind exists. Integers widen to the wider width, an integer
/// meeting a float goes to at least f32, and a complex type absorbs its
/// component's float lattice.
pub(crate) fn promote_kinds(a: &TypeKind, b: &TypeKind) -> Option<TypeKind> {
    use TypeKind::{Complex, Float, Index, Int};

    let int_width = |k: &TypeKind| match k {
        Int(w) => Some(*w),
        Index => Some(IntWidth::I64),
        _ => None,
    };
    let promote_float = |x: FloatFormat, y: FloatFormat| -> FloatFormat {
        if x == y {
            return x;
        }
        if x.rank() == y.rank() {
            // f16 meets bf16: neither embeds in the other.
            return FloatFormat::F32;
        }
        if x.rank() > y.rank() {
            x
        } else {
            y
        }
    };
    // Integers promote to floats of at least f32.
    let int_meets_float = |f: FloatFormat| -> FloatFormat { promote_float(f, FloatFormat::F32) };

    match (a, b) {
        (Index, Index) => Some(Index),
        _ if int_width(a).is_some() && int_width(b).is_some() => {
            let (wa, wb) = (int_width(a)?, int_width(b)?);
            let w = if wa.bits() >= wb.bits() { wa } else { wb };
            Some(Int(w))
        }
        (Float(fa), Float(fb)) => Some(Float(promote_float(*fa, *fb))),
        (Float(f), k) | (k, Float(f)) if int_width(k).is_some() => Some(Float(int_meets_float(*f))),
        (Complex(ca), Complex(cb)) => Some(Complex(promote_float(*ca, *cb))),
        (Complex(c), Float(f)) | (Float(f), Complex(c)) => Some(Complex(promote_float(*c, *f))),
        (Complex(c), k) | (k, Complex(c)) if int_width(k).is_some() => {
            Some(Complex(int_meets_float(*c)))
        }
        _ => None,
    }
}

/// Cast legality between scalar kinds: complex values never cast to
/// non-complex types; everything else is permitted between numbers.
pub(crate) fn is_cast_allowed_kinds(from: &TypeKind, to: &TypeKind) -> bool {
    if !from.is_number() || !to.is_number() {
        return false;
    }
    if from.is_complex() && !to.is_complex() {
        return false;
    }
    true
}

/// Packed strides for `shape`: `[1, s0, s0*s1, …]`, with [`DYNAMIC`]
/// propagating once encountered.
pub fn packed_strides(shape: &[i64]) -> Vec<i64> {
    let mut stride = Vec::with_capacity(shape.len());
    let mut acc: i64 = 1;
    for &s in shape {
        stride.push(acc);
        acc = if is_dynamic_value(acc) || is_dynamic_value(s) {
            DYNAMIC
        } else {
            acc * s
        };
    }
    stride
}

pub(crate) struct DisplayExtent(pub i64);

impl fmt::Display for DisplayExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_dynamic_value(self.0) {
            f.write_str("?")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
