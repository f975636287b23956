//! Shared wire and domain types: the "Message/Data types" component (I).
//!
//! These are the nouns every other module passes around: `Proof` and its
//! constraints (§3), `ProofBlock`, the PBFT wire messages (§6), and the
//! verification/state-transition result types. Everything here derives
//! `Serialize`/`Deserialize` so an external transport or persistence
//! collaborator can move these across the wire without this crate caring
//! about wire format beyond the canonical hashing rules in §6.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];
pub type NodeId = String;

/// A single parameter declared by a proof: `(name, type_tag, is_secret)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_tag: String,
    pub secret: bool,
}

/// A constraint as spec'd in §3: raw text (the canonical form used for
/// sanitizing, hashing, and the conservation/overflow pre-checks) plus
/// whether it is `secret`-flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub text: String,
    pub secret: bool,
}

impl Constraint {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            secret: false,
        }
    }

    pub fn secret(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            secret: true,
        }
    }
}

/// A proof: `(params, guards, post_conditions)` per §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub params: Vec<Param>,
    pub guards: Vec<Constraint>,
    pub post_conditions: Vec<Constraint>,
}

impl Proof {
    pub fn new(params: Vec<Param>, guards: Vec<Constraint>, post_conditions: Vec<Constraint>) -> Self {
        Self {
            params,
            guards,
            post_conditions,
        }
    }

    pub fn distinct_vars(&self) -> usize {
        let mut names: Vec<String> = Vec::new();
        for p in &self.params {
            if !names.iter().any(|n| n == &p.name) {
                names.push(p.name.clone());
            }
        }
        for c in self.guards.iter().chain(self.post_conditions.iter()) {
            if let Ok(parsed) = crate::parser::parse_constraint(&c.text) {
                for v in parsed.variables() {
                    if !names.contains(&v) {
                        names.push(v);
                    }
                }
            }
        }
        names.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.guards.len() + self.post_conditions.len()
    }

    /// All guard and post-condition text concatenated, for the sanitizer
    /// pass to scan in one O(n) sweep. Joined with a space rather than a
    /// newline: the sanitizer treats raw control characters as injection
    /// attempts, and a space can never merge two adjacent identifiers
    /// since the constraint tokenizer already treats whitespace as a
    /// separator.
    pub fn full_text(&self) -> String {
        let mut s = String::new();
        for c in self.guards.iter().chain(self.post_conditions.iter()) {
            s.push_str(&c.text);
            s.push(' ');
        }
        s
    }

    /// SHA-256 of the canonical serialization of guards and post-conditions
    /// (sorted, secret markers preserved) — §4.1 "Proof hash".
    pub fn proof_hash(&self) -> Hash {
        let mut guard_texts: Vec<String> = self
            .guards
            .iter()
            .map(|c| canonical_constraint(c))
            .collect();
        guard_texts.sort();
        let mut post_texts: Vec<String> = self
            .post_conditions
            .iter()
            .map(|c| canonical_constraint(c))
            .collect();
        post_texts.sort();

        let mut hasher = Sha256::new();
        for g in &guard_texts {
            hasher.update((g.len() as u32).to_be_bytes());
            hasher.update(g.as_bytes());
        }
        for p in &post_texts {
            hasher.update((p.len() as u32).to_be_bytes());
            hasher.update(p.as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

fn canonical_constraint(c: &Constraint) -> String {
    if c.secret {
        alloc::format!("secret:{}", c.text)
    } else {
        c.text.clone()
    }
}

/// Error kinds a verification pass can report, used by `VerificationResult`.
pub use crate::error::AethelError as ErrorKind;

/// Outcome of verifying one proof — §3 "Verification Result".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub difficulty: u64,
    pub verification_time_ms: u64,
    pub proof_hash: Hash,
    pub error: Option<ErrorKind>,
    /// Satisfying assignment on success, with `secret`-flagged variables
    /// replaced by an opaque commitment (§4.1 "Zero-knowledge variant").
    pub model: BTreeMap<String, ModelValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelValue {
    Value(i128),
    Masked(Hash),
}

/// A single key/value write performed by a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub key: Vec<u8>,
    pub new_value: i64,
    /// Set for UTXO-style spends so double-spend detection can key on it.
    pub spends: Option<(String, u32)>,
}

impl StateChange {
    pub fn new(key: impl Into<Vec<u8>>, new_value: i64) -> Self {
        Self {
            key: key.into(),
            new_value,
            spends: None,
        }
    }

    pub fn spending(key: impl Into<Vec<u8>>, new_value: i64, txid: impl Into<String>, index: u32) -> Self {
        Self {
            key: key.into(),
            new_value,
            spends: Some((txid.into(), index)),
        }
    }
}

/// A state transition as defined in §3, filled in by `StateStore::apply_transition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub changes: Vec<StateChange>,
    pub root_before: Hash,
    pub root_after: Hash,
    pub conservation_before: i128,
    pub conservation_after: i128,
    pub timestamp: u64,
}

impl StateTransition {
    pub fn new(changes: Vec<StateChange>, timestamp: u64) -> Self {
        Self {
            changes,
            root_before: [0u8; 32],
            root_after: [0u8; 32],
            conservation_before: 0,
            conservation_after: 0,
            timestamp,
        }
    }
}

/// Immutable checkpoint snapshot — §3, created every `CHECKPOINT_INTERVAL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub root_hash: Hash,
    pub conservation_checksum: Hash,
    pub timestamp: u64,
    pub transition_count: u64,
}

/// A batch of proofs proposed as one unit of consensus — §3 "Proof Block".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBlock {
    pub block_id: String,
    pub timestamp: u64,
    pub proofs: Vec<Proof>,
    pub previous_block_hash: Hash,
    pub proposer_id: NodeId,
    pub signature: Vec<u8>,
}

impl ProofBlock {
    /// `block_digest = SHA256(block_id || u64(timestamp) || sum(proof_hash) || previous_block_hash || proposer_id)`
    /// with variable-length fields length-prefixed (u32 big-endian) — §6.
    pub fn digest(&self) -> Hash {
        let mut proof_hash_sum = [0u8; 32];
        {
            // Sum proof hashes as big (carrying) 256-bit addition, deterministic
            // and order-independent, then re-hash so the digest is still a
            // single 32-byte value as §6 prescribes.
            let mut hasher = Sha256::new();
            for p in &self.proofs {
                hasher.update(p.proof_hash());
            }
            proof_hash_sum.copy_from_slice(&hasher.finalize());
        }

        let mut hasher = Sha256::new();
        hasher.update((self.block_id.len() as u32).to_be_bytes());
        hasher.update(self.block_id.as_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(proof_hash_sum);
        hasher.update(self.previous_block_hash);
        hasher.update((self.proposer_id.len() as u32).to_be_bytes());
        hasher.update(self.proposer_id.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

/// PBFT message kinds — §6 wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbftPayload {
    PrePrepare(ProofBlock),
    Prepare { digest: Hash },
    Commit { digest: Hash },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbftMessage {
    pub view: u64,
    pub sequence: u64,
    pub sender_id: NodeId,
    pub payload: PbftPayload,
    pub signature: Vec<u8>,
}

/// Result returned to the caller when a round finalizes — §4.4 step 4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_reached: bool,
    pub finalized_state: Option<Hash>,
    pub new_root: Option<Hash>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_hash_is_order_independent_of_insertion_but_stable() {
        let p1 = Proof::new(
            Vec::new(),
            alloc::vec![Constraint::new("a >= 0"), Constraint::new("b >= 0")],
            alloc::vec![Constraint::new("a == old_a + 1")],
        );
        let p2 = Proof::new(
            Vec::new(),
            alloc::vec![Constraint::new("b >= 0"), Constraint::new("a >= 0")],
            alloc::vec![Constraint::new("a == old_a + 1")],
        );
        assert_eq!(p1.proof_hash(), p2.proof_hash());
    }

    #[test]
    fn proof_hash_changes_with_secret_flag() {
        let p1 = Proof::new(Vec::new(), alloc::vec![Constraint::new("a >= 0")], Vec::new());
        let p2 = Proof::new(Vec::new(), alloc::vec![Constraint::secret("a >= 0")], Vec::new());
        assert_ne!(p1.proof_hash(), p2.proof_hash());
    }

    /// §6: wire messages must survive a round trip through an external
    /// transport's canonical encoding untouched.
    #[test]
    fn pbft_message_survives_json_round_trip() {
        let block = ProofBlock {
            block_id: "b1".to_string(),
            timestamp: 42,
            proofs: alloc::vec![Proof::new(
                alloc::vec![Param {
                    name: "A_balance".to_string(),
                    type_tag: "int".to_string(),
                    secret: true,
                }],
                alloc::vec![Constraint::new("A_balance >= 0")],
                alloc::vec![Constraint::secret("A_balance == old_A_balance - 1")],
            )],
            previous_block_hash: [7u8; 32],
            proposer_id: "node_0".to_string(),
            signature: alloc::vec![1, 2, 3],
        };
        let digest = block.digest();
        let msg = PbftMessage {
            view: 3,
            sequence: 9,
            sender_id: "node_0".to_string(),
            payload: PbftPayload::PrePrepare(block),
            signature: alloc::vec![9, 9, 9],
        };

        let encoded = serde_json::to_string(&msg).expect("wire messages must serialize");
        let decoded: PbftMessage =
            serde_json::from_str(&encoded).expect("wire messages must deserialize");

        assert_eq!(decoded, msg);
        match &decoded.payload {
            PbftPayload::PrePrepare(b) => assert_eq!(b.digest(), digest),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
