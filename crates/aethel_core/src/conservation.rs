//! Conservation Validator (component B).
//!
//! Used twice, as the dependency graph in §2 implies: as a fast textual
//! pre-check inside the verifier (pass 3, over a proof's own declared
//! post-conditions) and inside the State Store's `apply_transition`
//! (over the actual `balance:`-prefixed key/value writes of an accepted
//! transition). Both are "sum-zero check across a state delta"; they
//! differ only in where the delta comes from.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::AethelError;
use crate::parser::{self, BinOp, Expr, Rel};
use crate::types::{Constraint, StateChange};

/// One `v == old_v ± k` delta extracted from a post-condition's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
    pub var: String,
    pub old_var: String,
    pub delta: i128,
}

/// Either every post-condition parsed to a literal delta (and their sum is
/// returned), or at least one post-condition does not match the
/// `v == old_v ± k` shape and the pre-check defers to the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    Sum(i128),
    Defer,
}

/// §4.1 pass 3: parse each post-condition. Conditions that aren't of the
/// `v == old_v ± k` delta shape at all (e.g. an inequality, or an equality
/// unrelated to a balance pair) are not this pass's concern and are
/// skipped, exactly as the original `_extract_balance_change` returns
/// `None` and the caller's loop moves on. Only a delta-shaped post with a
/// literal `k` contributes to the sum; one with a non-literal (symbolic)
/// amount defers the whole pre-check to the solver, since the pre-check
/// cannot evaluate it without a full assignment.
pub fn precheck(post_conditions: &[Constraint]) -> Precheck {
    let mut sum: i128 = 0;
    let mut saw_any = false;
    for c in post_conditions {
        match classify_delta(&c.text) {
            DeltaShape::Literal(d) => {
                sum += d.delta;
                saw_any = true;
            }
            DeltaShape::Symbolic => return Precheck::Defer,
            DeltaShape::NotADelta => continue,
        }
    }
    if saw_any {
        Precheck::Sum(sum)
    } else {
        Precheck::Defer
    }
}

/// The three ways a post-condition's text can relate to a `v == old_v OP k`
/// balance delta: not that shape at all, that shape with a symbolic amount,
/// or that shape with a literal amount.
enum DeltaShape {
    NotADelta,
    Symbolic,
    Literal(BalanceDelta),
}

fn classify_delta(text: &str) -> DeltaShape {
    let parsed = match parser::parse_constraint(text) {
        Ok(p) => p,
        Err(_) => return DeltaShape::NotADelta,
    };
    if parsed.rel != Rel::Eq {
        return DeltaShape::NotADelta;
    }
    let var = match &parsed.lhs {
        Expr::Var(name) => name.clone(),
        _ => return DeltaShape::NotADelta,
    };
    match &parsed.rhs {
        Expr::Bin(op, old, amount) => {
            let old_var = match old.as_ref() {
                Expr::Var(n) => n.clone(),
                _ => return DeltaShape::NotADelta,
            };
            if !matches!(op, BinOp::Add | BinOp::Sub) {
                return DeltaShape::NotADelta;
            }
            let k = match amount.as_ref() {
                Expr::Lit(n) => *n,
                _ => return DeltaShape::Symbolic,
            };
            let delta = match op {
                BinOp::Add => k,
                BinOp::Sub => -k,
                _ => unreachable!(),
            };
            DeltaShape::Literal(BalanceDelta {
                var,
                old_var,
                delta,
            })
        }
        _ => DeltaShape::NotADelta,
    }
}

/// Extract a literal `v == old_v ± k` balance delta from a post-condition's
/// text, if it has that exact shape. Used by `consensus::derive_state_changes`
/// to translate a finalized block's proofs into concrete writes; unlike
/// `classify_delta`, callers here only care about the literal case.
pub fn extract_delta(text: &str) -> Option<BalanceDelta> {
    match classify_delta(text) {
        DeltaShape::Literal(d) => Some(d),
        DeltaShape::Symbolic | DeltaShape::NotADelta => None,
    }
}

/// Sum every `balance:`-prefixed value in a materialized key/value view.
pub fn sum_balances(kv: &BTreeMap<Vec<u8>, i64>) -> i128 {
    kv.iter()
        .filter(|(k, _)| k.starts_with(b"balance:"))
        .map(|(_, v)| *v as i128)
        .sum()
}

/// §4.2 step 2: reject if `Σ Δ(balance:*) != 0` across the write-set.
/// Returns `(conservation_before, conservation_after)` on success.
pub fn validate_transition(
    current_view: &BTreeMap<Vec<u8>, i64>,
    changes: &[StateChange],
) -> Result<(i128, i128), AethelError> {
    let before = sum_balances(current_view);
    let mut after_view = current_view.clone();
    for change in changes {
        after_view.insert(change.key.clone(), change.new_value);
    }
    let after = sum_balances(&after_view);

    if changes.iter().any(|c| c.key.starts_with(b"balance:")) && before != after {
        return Err(AethelError::Conservation {
            net_delta: after - before,
        });
    }
    Ok((before, after))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precheck_accepts_balanced_transfer() {
        let posts = [
            Constraint::new("A_balance == old_A_balance - 30"),
            Constraint::new("B_balance == old_B_balance + 30"),
        ];
        assert_eq!(precheck(&posts), Precheck::Sum(0));
    }

    #[test]
    fn precheck_flags_imbalanced_transfer() {
        let posts = [
            Constraint::new("A_balance == old_A_balance - 30"),
            Constraint::new("B_balance == old_B_balance + 31"),
        ];
        assert_eq!(precheck(&posts), Precheck::Sum(1));
    }

    #[test]
    fn precheck_defers_on_symbolic_delta() {
        let posts = [Constraint::new("A_balance == old_A_balance + fee")];
        assert_eq!(precheck(&posts), Precheck::Defer);
    }

    #[test]
    fn precheck_skips_non_delta_posts_and_still_sums_violation() {
        let posts = [
            Constraint::new("A_balance == old_A_balance - 30"),
            Constraint::new("B_balance == old_B_balance + 31"),
            Constraint::new("A_balance >= 0"),
        ];
        assert_eq!(precheck(&posts), Precheck::Sum(1));
    }

    #[test]
    fn transition_validation_rejects_leak() {
        let mut kv = BTreeMap::new();
        kv.insert(b"balance:A".to_vec(), 100i64);
        kv.insert(b"balance:B".to_vec(), 0i64);
        let changes = alloc::vec![
            StateChange::new(b"balance:A".to_vec(), 70),
            StateChange::new(b"balance:B".to_vec(), 31),
        ];
        assert!(validate_transition(&kv, &changes).is_err());
    }

    #[test]
    fn transition_validation_accepts_conserving_transfer() {
        let mut kv = BTreeMap::new();
        kv.insert(b"balance:A".to_vec(), 100i64);
        kv.insert(b"balance:B".to_vec(), 0i64);
        let changes = alloc::vec![
            StateChange::new(b"balance:A".to_vec(), 70),
            StateChange::new(b"balance:B".to_vec(), 30),
        ];
        let (before, after) = validate_transition(&kv, &changes).unwrap();
        assert_eq!(before, 100);
        assert_eq!(after, 100);
    }
}
