//! Compilation error kinds and reporting.

use core::fmt;

use crate::location::Location;

/// Stable error kinds raised by the instruction verifier and the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operand must be a memref.
    ExpectedMemref,
    /// Operand must be a cooperative matrix.
    ExpectedCoopmatrix,
    /// Operand must be a cooperative matrix or a number.
    ExpectedCoopmatrixOrNumber,
    /// Result must be a cooperative matrix, number, or boolean.
    ExpectedCoopmatrixNumberOrBoolean,
    /// Operand must be a number (integer, float, or complex).
    ExpectedNumber,
    /// Operand must be a boolean.
    ExpectedBoolean,
    /// Operand must be an integer.
    ExpectedInt,
    /// Operand must be an i32.
    ExpectedI32,
    /// Operand must have index type.
    ExpectedIndex,
    /// Memref operand must have order 0.
    ExpectedMemrefOrder0,
    /// Memref operand must have order 1.
    ExpectedMemrefOrder1,
    /// Memref operand must have order 2.
    ExpectedMemrefOrder2,
    /// Memref operand must have order 0 or 1.
    ExpectedMemrefOrder0Or1,
    /// Memref operand must have order 1 or 2.
    ExpectedMemrefOrder1Or2,
    /// Memref operand must have order 0, 1, or 2.
    ExpectedMemrefOrder012,
    /// Memref operand must have order 1 or higher.
    ExpectedNonScalarMemref,
    /// Operand must be a memref or a group.
    ExpectedMemrefOrGroup,
    /// Memref must live in the local address space.
    ExpectedLocalAddressSpace,
    /// Number types of two operands do not agree.
    NumberMismatch,
    /// Address spaces of two memrefs do not agree.
    AddressSpaceMismatch,
    /// A shape entry is negative or does not match.
    InvalidShape,
    /// A stride entry is negative or does not match.
    InvalidStride,
    /// Operand shapes cannot be combined.
    IncompatibleShapes,
    /// Cooperative matrix use tag is wrong for this operand position.
    InvalidMatrixUse,
    /// A mode index is outside the operand's order.
    OutOfBounds,
    /// The number of indices does not match the operand's order.
    InvalidNumberOfIndices,
    /// An offset or size entry of a slice is negative.
    InvalidSlice,
    /// Dynamic operand count does not match the `dynamic` entries of a subview.
    SubviewMismatch,
    /// Expand shape does not multiply up to the expanded mode.
    ExpandShapeMismatch,
    /// Expand needs at least two target modes.
    ExpandShapeOrderTooSmall,
    /// Loop init types do not match the result types.
    InitReturnTypeMismatch,
    /// The `from` and `to` bound lists differ in length.
    FromToMismatch,
    /// The requested implicit promotion is not allowed.
    ForbiddenPromotion,
    /// The requested cast is not allowed.
    ForbiddenCast,
    /// A constant's immediate does not match its result type.
    ConstantMismatch,
    /// Boolean operands are not supported by this operation.
    BooleanUnsupported,
    /// Floating point operands are not supported by this operation.
    FpUnsupported,
    /// Complex operands are not supported by this operation.
    ComplexUnsupported,
    /// Integer operands are not supported by this operation.
    IntUnsupported,
    /// Operand type must match the result type.
    OperandTypeMustMatchReturnType,
    /// A collective instruction appears inside an SPMD region.
    CollectiveInSpmdRegion,
    /// An integer literal does not fit the target type.
    IntegerOverflow,
    /// Entities from different compiler contexts were mixed.
    ContextMismatch,
    /// The device compiler rejected the generated source.
    BackendCompileFailed,
}

impl ErrorKind {
    /// Stable snake_case name, as used in diagnostics and tests.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExpectedMemref => "expected_memref",
            Self::ExpectedCoopmatrix => "expected_coopmatrix",
            Self::ExpectedCoopmatrixOrNumber => "expected_coopmatrix_or_number",
            Self::ExpectedCoopmatrixNumberOrBoolean => "expected_coopmatrix_number_or_boolean",
            Self::ExpectedNumber => "expected_number",
            Self::ExpectedBoolean => "expected_boolean",
            Self::ExpectedInt => "expected_int",
            Self::ExpectedI32 => "expected_i32",
            Self::ExpectedIndex => "expected_index",
            Self::ExpectedMemrefOrder0 => "expected_memref_order_0",
            Self::ExpectedMemrefOrder1 => "expected_memref_order_1",
            Self::ExpectedMemrefOrder2 => "expected_memref_order_2",
            Self::ExpectedMemrefOrder0Or1 => "expected_memref_order_0_or_1",
            Self::ExpectedMemrefOrder1Or2 => "expected_memref_order_1_or_2",
            Self::ExpectedMemrefOrder012 => "expected_memref_order_0_1_or_2",
            Self::ExpectedNonScalarMemref => "expected_non_scalar_memref",
            Self::ExpectedMemrefOrGroup => "expected_memref_or_group",
            Self::ExpectedLocalAddressSpace => "expected_local_address_space",
            Self::NumberMismatch => "number_mismatch",
            Self::AddressSpaceMismatch => "address_space_mismatch",
            Self::InvalidShape => "invalid_shape",
            Self::InvalidStride => "invalid_stride",
            Self::IncompatibleShapes => "incompatible_shapes",
            Self::InvalidMatrixUse => "invalid_matrix_use",
            Self::OutOfBounds => "out_of_bounds",
            Self::InvalidNumberOfIndices => "invalid_number_of_indices",
            Self::InvalidSlice => "invalid_slice",
            Self::SubviewMismatch => "subview_mismatch",
            Self::ExpandShapeMismatch => "expand_shape_mismatch",
            Self::ExpandShapeOrderTooSmall => "expand_shape_order_too_small",
            Self::InitReturnTypeMismatch => "init_return_type_mismatch",
            Self::FromToMismatch => "from_to_mismatch",
            Self::ForbiddenPromotion => "forbidden_promotion",
            Self::ForbiddenCast => "forbidden_cast",
            Self::ConstantMismatch => "constant_mismatch",
            Self::BooleanUnsupported => "boolean_unsupported",
            Self::FpUnsupported => "fp_unsupported",
            Self::ComplexUnsupported => "complex_unsupported",
            Self::IntUnsupported => "int_unsupported",
            Self::OperandTypeMustMatchReturnType => "operand_type_must_match_return_type",
            Self::CollectiveInSpmdRegion => "collective_in_spmd_region",
            Self::IntegerOverflow => "integer_overflow",
            Self::ContextMismatch => "context_mismatch",
            Self::BackendCompileFailed => "backend_compile_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed verifier or pipeline error with source attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Source range of the offending instruction.
    pub loc: Location,
    /// Stable error kind.
    pub kind: ErrorKind,
    /// Display names of the offending values, if any.
    pub values: Vec<String>,
    /// Free-form detail, e.g. the mismatching extents.
    pub extra: Option<String>,
}

impl CompileError {
    /// Error without offending values.
    pub fn new(loc: Location, kind: ErrorKind) -> Self {
        Self {
            loc,
            kind,
            values: Vec::new(),
            extra: None,
        }
    }

    /// Attach offending value names.
    pub fn with_values(mut self, values: Vec<String>) -> Self {
        self.values = values;
        self
    }

    /// Attach free-form detail.
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.loc, self.kind)?;
        if !self.values.is_empty() {
            write!(f, " [{}]", self.values.join(", "))?;
        }
        if let Some(extra) = &self.extra {
            write!(f, ": {extra}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// Callback invoked for every reported diagnostic.
pub type ErrorReporter = Box<dyn FnMut(&str, Option<&Location>)>;

/// Number of context lines printed above and below an error range.
pub const ADDITIONAL_CONTEXT_LINES: u32 = 2;

/// Render `what` at `loc` with code context from `source`.
///
/// Prints up to [`ADDITIONAL_CONTEXT_LINES`] lines before the error range,
/// every line of the range with a `~~~` underline spanning `begin..end`, and
/// the structured location with the message on the final line.
pub fn report_error_with_context(source: &str, loc: &Location, what: &str) -> String {
    use fmt::Write;

    let mut out = String::new();
    if loc.begin.line == 0 {
        let _ = writeln!(out, "{loc}: {what}");
        return out;
    }

    let first = loc.begin.line.saturating_sub(ADDITIONAL_CONTEXT_LINES).max(1);
    for (idx, line) in source.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if line_no < first {
            continue;
        }
        if line_no > loc.end.line {
            break;
        }
        let _ = writeln!(out, "{line}");
        if line_no >= loc.begin.line {
            let start_col = line.chars().take_while(|c| c.is_whitespace()).count() as u32;
            let line_len = line.chars().count() as u32;
            let (col_begin, num_col) = if loc.begin.line == loc.end.line {
                let cb = loc.begin.column.saturating_sub(1);
                let n = if loc.end.column > loc.begin.column {
                    loc.end.column - loc.begin.column
                } else {
                    1
                };
                (cb, n)
            } else if line_no == loc.begin.line {
                let cb = loc.begin.column.saturating_sub(1);
                (cb, line_len.saturating_sub(cb).max(1))
            } else if line_no == loc.end.line {
                let n = loc.end.column.saturating_sub(1).saturating_sub(start_col).max(1);
                (start_col, n)
            } else {
                (start_col, line_len.saturating_sub(start_col).max(1))
            };
            for _ in 0..col_begin {
                out.push(' ');
            }
            for _ in 0..num_col {
                out.push('~');
            }
            out.push('\n');
        }
    }
    let _ = writeln!(out, "{loc}: {what}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Position;
    use strum::IntoEnumIterator;

    #[test]
    fn kind_names_are_unique() {
        let mut names: Vec<_> = ErrorKind::iter().map(|k| k.name()).collect();
        let n = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), n);
    }

    #[test]
    fn context_rendering_underlines_range() {
        use pretty_assertions::assert_eq;

        let source = "func @f() {\n  %0 = constant 1 : i32\n}\n";
        let loc = Location::new("t.ir", Position::new(2, 8), Position::new(2, 18));
        let rendered = report_error_with_context(source, &loc, "constant_mismatch");
        assert_eq!(
            rendered,
            "func @f() {\n  %0 = constant 1 : i32\n       ~~~~~~~~~~\nt.ir:2.8-2.18: constant_mismatch\n"
        );
    }
}
