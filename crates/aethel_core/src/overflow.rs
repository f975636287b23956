//! Overflow Sentinel (component C).
//!
//! Heuristic worst-case bounds check on arithmetic operators, mirroring
//! `aethel/core/overflow.py`'s per-operator rules. §9 flags the original's
//! module-level singleton (`get_overflow_sentinel()`) as a redesign target:
//! here the limits are a plain, immutable, constructible value (`Limits`)
//! passed in by the caller rather than a lazily-initialized global.

use alloc::string::String;

use crate::error::AethelError;
use crate::parser::{self, BinOp, Expr, Rel};
use crate::types::Constraint;

/// Bounds the sentinel checks against. Defaults match the spec's
/// 64-bit signed integer constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_int: i128,
    pub min_int: i128,
    pub max_multiplier: i128,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_int: i64::MAX as i128,
            min_int: i64::MIN as i128,
            max_multiplier: 1_000_000,
        }
    }
}

/// For each post-condition of shape `v == old_v OP k`, apply the
/// per-operator heuristic from §4.1 pass 4. Also rejects any bare literal
/// assignment `v == L` outside `[min_int, max_int]`.
pub fn check(conditions: &[Constraint], limits: &Limits) -> Result<(), AethelError> {
    for c in conditions {
        let parsed = match parser::parse_constraint(&c.text) {
            Ok(p) => p,
            Err(_) => continue, // not this sentinel's concern; solver will report malformed text
        };
        if parsed.rel != Rel::Eq {
            continue;
        }
        let var = match &parsed.lhs {
            Expr::Var(name) => name.clone(),
            _ => continue,
        };

        check_rhs(&var, &parsed.rhs, limits)?;
    }
    Ok(())
}

fn check_rhs(var: &str, rhs: &Expr, limits: &Limits) -> Result<(), AethelError> {
    match rhs {
        Expr::Lit(value) => check_explicit_literal(var, *value, limits),
        Expr::Bin(op, _old, rhs_operand) => {
            let value = match rhs_operand.as_ref() {
                Expr::Lit(v) => *v,
                _ => return Ok(()), // non-literal operand: solver pass handles it
            };
            check_operation(var, *op, value, limits)
        }
        Expr::Var(_) => Ok(()),
    }
}

fn check_operation(var: &str, op: BinOp, value: i128, limits: &Limits) -> Result<(), AethelError> {
    let name = || String::from(var);
    match op {
        BinOp::Add => {
            if value > limits.max_int / 2 {
                return Err(AethelError::Overflow { variable: name() });
            }
        }
        BinOp::Sub => {
            if value > limits.min_int.unsigned_abs() as i128 / 2 {
                return Err(AethelError::Underflow { variable: name() });
            }
        }
        BinOp::Mul => {
            if value > limits.max_multiplier {
                return Err(AethelError::Overflow { variable: name() });
            }
        }
        BinOp::Div | BinOp::Mod => {
            if value == 0 {
                return Err(AethelError::DivByZero { variable: name() });
            }
        }
    }
    Ok(())
}

fn check_explicit_literal(var: &str, value: i128, limits: &Limits) -> Result<(), AethelError> {
    if value > limits.max_int {
        return Err(AethelError::Overflow {
            variable: String::from(var),
        });
    }
    if value < limits.min_int {
        return Err(AethelError::Underflow {
            variable: String::from(var),
        });
    }
    Ok(())
}
