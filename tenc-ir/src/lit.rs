//! Literal parsing shared with the surface syntax.
//!
//! Constants reach the IR through text in two ways: the external parser and
//! diagnostics round-trips. The integer rules live here so both agree on
//! overflow behavior.

use crate::error::{CompileError, ErrorKind};
use crate::inst::Immediate;
use crate::location::Location;

/// Parse a decimal integer literal into an i64 immediate.
///
/// Accepts an optional leading `-`. Values outside the i64 range produce
/// [`ErrorKind::IntegerOverflow`].
pub fn parse_int_immediate(text: &str, loc: &Location) -> Result<Immediate, CompileError> {
    match text.parse::<i64>() {
        Ok(v) => Ok(Immediate::Int(v)),
        Err(e) if *e.kind() == core::num::IntErrorKind::PosOverflow
            || *e.kind() == core::num::IntErrorKind::NegOverflow =>
        {
            Err(CompileError::new(loc.clone(), ErrorKind::IntegerOverflow)
                .with_extra(format!("literal '{text}' does not fit i64")))
        }
        Err(_) => Err(CompileError::new(loc.clone(), ErrorKind::ConstantMismatch)
            .with_extra(format!("invalid integer literal '{text}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_i64_parses() {
        let imm = parse_int_immediate("9223372036854775807", &Location::default()).unwrap();
        assert_eq!(imm, Immediate::Int(9223372036854775807));
    }

    #[test]
    fn overflow_is_detected() {
        let err = parse_int_immediate("9223372036854775808", &Location::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegerOverflow);
    }

    #[test]
    fn min_i64_parses() {
        let imm = parse_int_immediate("-9223372036854775808", &Location::default()).unwrap();
        assert_eq!(imm, Immediate::Int(i64::MIN));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = parse_int_immediate("12ab", &Location::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConstantMismatch);
    }
}
