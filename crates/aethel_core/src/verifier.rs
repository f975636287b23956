//! Proof Verifier (component E) — §4.1.
//!
//! Runs the five passes in order, short-circuiting on the first failure,
//! exactly as `judge.py`'s "Fortress Defense" structures them: sanitize,
//! complexity, conservation pre-check, overflow sentinel, solver. Each
//! pass is its own module (`sanitizer`, the complexity gate inline here,
//! `conservation`, `overflow`, `solver`) so it stays independently
//! testable, per SPEC_FULL.md §10.6.

use alloc::collections::BTreeMap;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::time::Duration;

use sha2::{Digest, Sha256};

use crate::conservation::{self, Precheck};
use crate::error::AethelError;
use crate::overflow::{self, Limits};
use crate::parser::{self, ParsedConstraint};
use crate::sanitizer;
use crate::solver::{self, Deadline, SolveOutcome};
use crate::types::{Hash, ModelValue, Proof, ProofBlock, VerificationResult};

pub const MAX_VARIABLES: usize = 100;
pub const MAX_CONSTRAINTS: usize = 500;
pub const SOLVER_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub limits: Limits,
    pub solver_timeout: Duration,
    pub max_distinct_vars: usize,
    pub max_constraints: usize,
    /// First Open Question (§9, SPEC_FULL.md §10.4): reject a proposer's
    /// reported block difficulty if a replica's own measurement is less
    /// than half of it. Off by default, matching the original's behavior.
    pub bound_check_difficulty: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            solver_timeout: Duration::from_millis(SOLVER_TIMEOUT_MS),
            max_distinct_vars: MAX_VARIABLES,
            max_constraints: MAX_CONSTRAINTS,
            bound_check_difficulty: false,
        }
    }
}

pub struct Verifier {
    pub config: VerifierConfig,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(VerifierConfig::default())
    }
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// `verify(proof) -> VerificationResult` — §4.1 contract.
    pub fn verify(&self, proof: &Proof) -> VerificationResult {
        let proof_hash = proof.proof_hash();
        let started = ElapsedTimer::start();

        if let Err(e) = sanitizer::sanitize(&proof.full_text()) {
            return failure(proof_hash, e, started.elapsed_ms());
        }

        let distinct_vars = proof.distinct_vars();
        let constraint_count = proof.constraint_count();
        if distinct_vars > self.config.max_distinct_vars
            || constraint_count > self.config.max_constraints
        {
            return failure(
                proof_hash,
                AethelError::TooComplex {
                    distinct_vars,
                    constraint_count,
                },
                started.elapsed_ms(),
            );
        }

        match conservation::precheck(&proof.post_conditions) {
            Precheck::Sum(net_delta) if net_delta != 0 => {
                return failure(
                    proof_hash,
                    AethelError::Conservation { net_delta },
                    started.elapsed_ms(),
                );
            }
            _ => {}
        }

        if let Err(e) = overflow::check(&proof.post_conditions, &self.config.limits) {
            return failure(proof_hash, e, started.elapsed_ms());
        }

        let guards: Vec<ParsedConstraint> = match parse_all(&proof.guards) {
            Ok(g) => g,
            Err(e) => return failure(proof_hash, e, started.elapsed_ms()),
        };
        let posts: Vec<ParsedConstraint> = match parse_all(&proof.post_conditions) {
            Ok(p) => p,
            Err(e) => return failure(proof_hash, e, started.elapsed_ms()),
        };

        let deadline = Deadline::after(self.config.solver_timeout);
        let outcome = solver::solve(&guards, &posts, &self.config.limits, &deadline);

        let verification_time_ms = started.elapsed_ms();
        let difficulty = compute_difficulty(proof, verification_time_ms);

        match outcome {
            SolveOutcome::Sat(assignment) => {
                let model = mask_secrets(proof, proof_hash, assignment);
                VerificationResult {
                    valid: true,
                    difficulty,
                    verification_time_ms,
                    proof_hash,
                    error: None,
                    model,
                }
            }
            SolveOutcome::Unsat => VerificationResult {
                valid: false,
                difficulty,
                verification_time_ms,
                proof_hash,
                error: Some(AethelError::Contradiction),
                model: BTreeMap::new(),
            },
            SolveOutcome::Unknown => VerificationResult {
                valid: false,
                difficulty,
                verification_time_ms,
                proof_hash,
                error: Some(AethelError::Timeout),
                model: BTreeMap::new(),
            },
        }
    }

    /// `verify_block(block) -> {valid, total_difficulty, per_proof_results[]}` — §4.1.
    pub fn verify_block(&self, block: &ProofBlock) -> BlockVerification {
        let results: Vec<VerificationResult> =
            block.proofs.iter().map(|p| self.verify(p)).collect();
        let valid = !results.is_empty() && results.iter().all(|r| r.valid);
        let total_difficulty = results.iter().map(|r| r.difficulty).sum();
        BlockVerification {
            valid,
            total_difficulty,
            per_proof_results: results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockVerification {
    pub valid: bool,
    pub total_difficulty: u64,
    pub per_proof_results: Vec<VerificationResult>,
}

fn parse_all(
    constraints: &[crate::types::Constraint],
) -> Result<Vec<ParsedConstraint>, AethelError> {
    constraints
        .iter()
        .map(|c| parser::parse_constraint(&c.text))
        .collect()
}

fn failure(proof_hash: Hash, error: AethelError, verification_time_ms: u64) -> VerificationResult {
    VerificationResult {
        valid: false,
        difficulty: 0,
        verification_time_ms,
        proof_hash,
        error: Some(error),
        model: BTreeMap::new(),
    }
}

/// `difficulty = base(1000) + 100*|guards| + 200*|post_conditions| + 500*|distinct_vars| + round(verification_time_ms)`.
fn compute_difficulty(proof: &Proof, verification_time_ms: u64) -> u64 {
    1000
        + 100 * proof.guards.len() as u64
        + 200 * proof.post_conditions.len() as u64
        + 500 * proof.distinct_vars() as u64
        + verification_time_ms
}

/// Replace `secret`-flagged variables in the satisfying assignment with an
/// opaque SHA-256 commitment of `(value, proof-derived salt)` — §4.1
/// "Zero-knowledge variant". The salt is the proof hash so the commitment
/// is stable for a given proof but not guessable from the public model
/// alone (SPEC_FULL.md §9's masking-only open question).
fn mask_secrets(
    proof: &Proof,
    salt: Hash,
    assignment: BTreeMap<alloc::string::String, i128>,
) -> BTreeMap<alloc::string::String, ModelValue> {
    let secret_names: Vec<&str> = proof
        .params
        .iter()
        .filter(|p| p.secret)
        .map(|p| p.name.as_str())
        .collect();

    assignment
        .into_iter()
        .map(|(name, value)| {
            if secret_names.contains(&name.as_str()) {
                (name, ModelValue::Masked(commit(value, &salt)))
            } else {
                (name, ModelValue::Value(value))
            }
        })
        .collect()
}

fn commit(value: i128, salt: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(value.to_be_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

struct ElapsedTimer {
    #[cfg(feature = "std")]
    start: std::time::Instant,
}

impl ElapsedTimer {
    fn start() -> Self {
        #[cfg(feature = "std")]
        {
            Self {
                start: std::time::Instant::now(),
            }
        }
        #[cfg(not(feature = "std"))]
        {
            Self {}
        }
    }

    fn elapsed_ms(&self) -> u64 {
        #[cfg(feature = "std")]
        {
            self.start.elapsed().as_millis() as u64
        }
        #[cfg(not(feature = "std"))]
        {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Constraint, Param};

    fn transfer_proof(a_post: &str, b_post: &str) -> Proof {
        Proof::new(
            alloc::vec![
                Param {
                    name: "A_balance".to_string(),
                    type_tag: "int".to_string(),
                    secret: false,
                },
                Param {
                    name: "B_balance".to_string(),
                    type_tag: "int".to_string(),
                    secret: false,
                },
            ],
            alloc::vec![Constraint::new("A_balance >= 30")],
            alloc::vec![Constraint::new(a_post), Constraint::new(b_post)],
        )
    }

    #[test]
    fn s1_transfer_conservation_is_valid() {
        let proof = transfer_proof(
            "A_balance == old_A_balance - 30",
            "B_balance == old_B_balance + 30",
        );
        let v = Verifier::default();
        let result = v.verify(&proof);
        assert!(result.valid, "expected valid, got {:?}", result.error);
    }

    #[test]
    fn s2_conservation_violation_is_rejected() {
        let proof = transfer_proof(
            "A_balance == old_A_balance - 30",
            "B_balance == old_B_balance + 31",
        );
        let v = Verifier::default();
        let result = v.verify(&proof);
        assert!(!result.valid);
        assert!(matches!(result.error, Some(AethelError::Conservation { .. })));
    }

    #[test]
    fn s3_overflow_is_rejected_before_solver() {
        let proof = transfer_proof(
            "A_balance == old_A_balance + 5000000000000000000",
            "B_balance == old_B_balance + 30",
        );
        let v = Verifier::default();
        let result = v.verify(&proof);
        assert!(!result.valid);
        assert!(matches!(result.error, Some(AethelError::Overflow { .. })));
    }

    #[test]
    fn s4_injection_is_rejected() {
        let mut proof = transfer_proof(
            "A_balance == old_A_balance - 30",
            "B_balance == old_B_balance + 30",
        );
        proof.guards.push(Constraint::new("eval(1)"));
        let v = Verifier::default();
        let result = v.verify(&proof);
        assert!(!result.valid);
        assert!(matches!(result.error, Some(AethelError::Injection { .. })));
    }

    #[test]
    fn secret_variables_are_masked_in_model() {
        let proof = Proof::new(
            alloc::vec![Param {
                name: "x".to_string(),
                type_tag: "int".to_string(),
                secret: true,
            }],
            alloc::vec![Constraint::new("x >= 0"), Constraint::new("x <= 10")],
            alloc::vec::Vec::new(),
        );
        let v = Verifier::default();
        let result = v.verify(&proof);
        assert!(result.valid);
        match result.model.get("x") {
            Some(ModelValue::Masked(_)) => {}
            other => panic!("expected masked x, got {:?}", other),
        }
    }

    #[test]
    fn block_is_valid_only_if_every_proof_is_valid() {
        let good = transfer_proof(
            "A_balance == old_A_balance - 30",
            "B_balance == old_B_balance + 30",
        );
        let bad = transfer_proof(
            "A_balance == old_A_balance - 30",
            "B_balance == old_B_balance + 31",
        );
        let block = ProofBlock {
            block_id: "b1".to_string(),
            timestamp: 0,
            proofs: alloc::vec![good, bad],
            previous_block_hash: [0u8; 32],
            proposer_id: "node_0".to_string(),
            signature: alloc::vec::Vec::new(),
        };
        let v = Verifier::default();
        let verification = v.verify_block(&block);
        assert!(!verification.valid);
        assert_eq!(verification.per_proof_results.len(), 2);
    }
}
