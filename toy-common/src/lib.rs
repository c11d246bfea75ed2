//! Leaf types shared by every stage of the toyssa pipeline.
//!
//! - [`Value`]: an instruction operand, either a variable name or an integer literal
//! - [`BinOp`]: the four integer operators the IR knows how to fold
//! - [`IrError`]: the error taxonomy surfaced by the CFG, SSA and optimizer crates
use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// An operand: a variable reference or an integer literal.
///
/// Literals are never counted as uses.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Value {
    Var(String),
    Const(i64),
}
impl Value {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Value::Var(name) => Some(name.as_str()),
            Value::Const(_) => None,
        }
    }
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Value::Var(_) => None,
            Value::Const(c) => Some(*c),
        }
    }
    /// Renames the operand in place if it refers to `old`.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        match self {
            Value::Var(name) if name == old => {
                *name = new.to_owned();
                true
            }
            _ => false,
        }
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Const(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Var(value.to_owned())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Var(value)
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Var(name) => write!(f, "{name}"),
            Value::Const(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Floor division, rounding toward negative infinity.
    Div,
}
impl BinOp {
    pub fn all() -> impl Iterator<Item = Self> {
        [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div].into_iter()
    }
    pub fn of(a: &str) -> Option<Self> {
        Some(match a {
            "add" => BinOp::Add,
            "sub" => BinOp::Sub,
            "mul" => BinOp::Mul,
            "div" => BinOp::Div,
            _ => return None,
        })
    }
    pub fn name(&self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
        }
    }
    /// Evaluates `lhs op rhs` over `i64`.
    ///
    /// Overflow and division by zero are reported as [`IrError::Arithmetic`] rather than
    /// producing a wrapped or undefined constant.
    pub fn eval(&self, lhs: i64, rhs: i64) -> Result<i64, IrError> {
        let overflow = || IrError::Arithmetic(format!("{lhs} {} {rhs} overflows i64", self.name()));
        match self {
            BinOp::Add => lhs.checked_add(rhs).ok_or_else(overflow),
            BinOp::Sub => lhs.checked_sub(rhs).ok_or_else(overflow),
            BinOp::Mul => lhs.checked_mul(rhs).ok_or_else(overflow),
            BinOp::Div => {
                if rhs == 0 {
                    return Err(IrError::Arithmetic(format!("{lhs} div 0: division by zero")));
                }
                let q = lhs.checked_div(rhs).ok_or_else(overflow)?;
                if lhs % rhs != 0 && ((lhs < 0) != (rhs < 0)) {
                    Ok(q - 1)
                } else {
                    Ok(q)
                }
            }
        }
    }
}
impl FromStr for BinOp {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BinOp::of(s).ok_or_else(|| IrError::UnsupportedOperator(s.to_owned()))
    }
}
impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by the IR passes.
///
/// All of these are programming or input errors: the pass that raises one aborts, and no
/// partial result is kept.
#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum IrError {
    /// A block is missing its terminator, or a terminator names a block that is gone.
    #[error("malformed IR in block `{block}`: {reason}")]
    MalformedIr { block: String, reason: String },
    /// Dominator data is inconsistent with the CFG.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// An operator name outside `add`/`sub`/`mul`/`div`.
    #[error("unsupported binary operator `{0}`")]
    UnsupportedOperator(String),
    /// Division by zero or `i64` overflow during constant evaluation.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("block `{0}` already exists")]
    DuplicateBlock(String),
    #[error("function is not in SSA form: {0}")]
    NotSsa(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_rounds_down() {
        assert_eq!(BinOp::Div.eval(7, 2), Ok(3));
        assert_eq!(BinOp::Div.eval(-7, 2), Ok(-4));
        assert_eq!(BinOp::Div.eval(7, -2), Ok(-4));
        assert_eq!(BinOp::Div.eval(-7, -2), Ok(3));
        assert_eq!(BinOp::Div.eval(-8, 2), Ok(-4));
    }

    #[test]
    fn division_by_zero_is_reported() {
        assert!(matches!(BinOp::Div.eval(1, 0), Err(IrError::Arithmetic(_))));
    }

    #[test]
    fn overflow_is_reported() {
        assert!(matches!(BinOp::Add.eval(i64::MAX, 1), Err(IrError::Arithmetic(_))));
        assert!(matches!(BinOp::Div.eval(i64::MIN, -1), Err(IrError::Arithmetic(_))));
    }

    #[test]
    fn operator_names_round_trip() {
        for op in BinOp::all() {
            assert_eq!(op.name().parse::<BinOp>(), Ok(op));
        }
        assert_eq!(
            "mod".parse::<BinOp>(),
            Err(IrError::UnsupportedOperator("mod".to_owned()))
        );
    }

    #[test]
    fn rename_only_touches_matching_vars() {
        let mut v = Value::var("x");
        assert!(!v.rename("y", "y.0"));
        assert!(v.rename("x", "x.0"));
        assert_eq!(v, Value::var("x.0"));
        let mut c = Value::Const(3);
        assert!(!c.rename("x", "x.1"));
    }
}
