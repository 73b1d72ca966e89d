//! OpenCL-C abstract syntax tree.

/// Address space qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrSpace {
    /// No qualifier (private memory).
    Private,
    /// `__global`.
    Global,
    /// `__local`.
    Local,
}

/// Scalar builtin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    /// `bool`.
    Bool,
    /// `char`.
    Char,
    /// `short`.
    Short,
    /// `int`.
    Int,
    /// `long`.
    Long,
    /// `uchar`.
    Uchar,
    /// `ushort`.
    Ushort,
    /// `uint`.
    Uint,
    /// `ulong`.
    Ulong,
    /// `half`.
    Half,
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// `float2` (used for complex numbers).
    Float2,
    /// `double2` (used for complex numbers).
    Double2,
}

impl Scalar {
    /// OpenCL-C spelling.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Uchar => "uchar",
            Self::Ushort => "ushort",
            Self::Uint => "uint",
            Self::Ulong => "ulong",
            Self::Half => "half",
            Self::Float => "float",
            Self::Double => "double",
            Self::Float2 => "float2",
            Self::Double2 => "double2",
        }
    }

    /// True for `double` and `double2`, which require `cl_khr_fp64`.
    pub fn needs_fp64(&self) -> bool {
        matches!(self, Self::Double | Self::Double2)
    }

    /// True for `half`, which requires `cl_khr_fp16`.
    pub fn needs_fp16(&self) -> bool {
        matches!(self, Self::Half)
    }
}

/// A value or pointer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Scalar value.
    Scalar(Scalar),
    /// Pointer to a scalar in an address space.
    Pointer {
        /// Pointee type.
        elem: Scalar,
        /// Address space of the pointee.
        space: AddrSpace,
    },
}

/// Binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `&&`
    LogicalAnd,
    /// `||`
    LogicalOr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl BinOp {
    /// OpenCL-C spelling.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// Unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `-`
    Neg,
    /// `!`
    LogicalNot,
    /// `~`
    BitNot,
    /// `*`
    Deref,
    /// `&`
    AddressOf,
}

impl UnOp {
    /// OpenCL-C spelling.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::LogicalNot => "!",
            Self::BitNot => "~",
            Self::Deref => "*",
            Self::AddressOf => "&",
        }
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Named variable.
    Var(String),
    /// Integer literal.
    Int(i64),
    /// Unsigned integer literal with `u` suffix.
    Uint(u64),
    /// Floating-point literal.
    Float(f64),
    /// `float` literal with `f` suffix.
    FloatSingle(f64),
    /// Binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Unary operation.
    Unary(UnOp, Box<Expr>),
    /// `cond ? a : b`.
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Builtin or helper call.
    Call(String, Vec<Expr>),
    /// C-style cast.
    Cast(Type, Box<Expr>),
    /// `base[index]`.
    Index(Box<Expr>, Box<Expr>),
    /// `(float2)(re, im)` style constructor.
    Vector(Scalar, Vec<Expr>),
    /// `.x` / `.y` component access.
    Member(Box<Expr>, &'static str),
}

impl Expr {
    /// Named variable.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Builtin or helper call.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call(name.into(), args)
    }

    /// Binary operation.
    pub fn bin(op: BinOp, a: Expr, b: Expr) -> Self {
        Self::Binary(op, Box::new(a), Box::new(b))
    }

    /// `base[index]`.
    pub fn index(base: Expr, idx: Expr) -> Self {
        Self::Index(Box::new(base), Box::new(idx))
    }
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Variable declaration, optionally an array, optionally initialized.
    VarDecl {
        /// Address-space qualifier for array declarations.
        space: AddrSpace,
        /// Variable type.
        ty: Type,
        /// Variable name.
        name: String,
        /// Array length, if this declares an array.
        array: Option<u64>,
        /// Initializer.
        init: Option<Expr>,
    },
    /// `lhs = rhs;`
    Assign {
        /// Assignment target.
        lhs: Expr,
        /// Assigned value.
        rhs: Expr,
    },
    /// Expression statement.
    Expr(Expr),
    /// `for (ty var = init; var < cond; var += step) { body }`
    For {
        /// Induction variable type.
        ty: Type,
        /// Induction variable name.
        var: String,
        /// Initial value.
        init: Expr,
        /// Exclusive upper bound.
        cond: Expr,
        /// Increment added each iteration.
        step: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// Conditional.
    If {
        /// Condition.
        cond: Expr,
        /// Then branch.
        then_branch: Vec<Stmt>,
        /// Else branch; empty to omit.
        else_branch: Vec<Stmt>,
    },
    /// Free-standing block (scoping).
    Block(Vec<Stmt>),
}

/// Kernel attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelAttribute {
    /// `reqd_work_group_size(x, y, z)`.
    ReqdWorkGroupSize(u32, u32, u32),
    /// `intel_reqd_sub_group_size(n)`.
    IntelReqdSubGroupSize(u32),
}

/// A kernel parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelParam {
    /// Parameter type.
    pub ty: Type,
    /// Parameter name.
    pub name: String,
    /// True for `__global T* const*` batch-pointer parameters.
    pub pointer_to_pointer: bool,
}

/// A kernel definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    /// Kernel name.
    pub name: String,
    /// Attributes emitted before the signature.
    pub attributes: Vec<KernelAttribute>,
    /// Parameters in order.
    pub params: Vec<KernelParam>,
    /// Body statements.
    pub body: Vec<Stmt>,
}

/// A translation unit of kernels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    /// Kernels in order.
    pub kernels: Vec<Kernel>,
}
