//! Proof Mempool (component G) — §4.3.
//!
//! A max-priority queue of not-yet-committed proofs keyed by `difficulty`,
//! ties broken by arrival order. The original (`aethel/consensus/
//! proof_mempool.py`, referenced by `test_consensus_engine.py` as
//! `ProofMempool.add_proof`) keeps this as a flat list resorted on demand;
//! here it is a sorted `Vec` so `take_top` stays O(k) rather than O(n log n)
//! per call, with insertion order preserved via a monotonic sequence number
//! for the tie-break (R9).

use alloc::vec::Vec;

use crate::types::{Hash, Proof};

#[derive(Debug, Clone)]
struct Entry {
    proof: Proof,
    difficulty: u64,
    proof_hash: Hash,
    arrival: u64,
}

/// `ProofMempool` — max-priority queue of pending proofs by difficulty.
///
/// Bounded capacity: on overflow, the lowest-difficulty entry is dropped
/// (ties broken by latest arrival, so the oldest of equal-difficulty
/// entries survives).
#[derive(Debug, Clone)]
pub struct ProofMempool {
    entries: Vec<Entry>,
    capacity: usize,
    next_arrival: u64,
}

impl Default for ProofMempool {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ProofMempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            next_arrival: 0,
        }
    }

    /// `add(proof, difficulty)` — rejects duplicates by `proof_hash`.
    /// Returns `false` if the proof was already present.
    pub fn add_proof(&mut self, proof: Proof, difficulty: u64) -> bool {
        let proof_hash = proof.proof_hash();
        if self.entries.iter().any(|e| e.proof_hash == proof_hash) {
            return false;
        }

        let arrival = self.next_arrival;
        self.next_arrival += 1;
        let idx = self
            .entries
            .partition_point(|e| higher_priority(e.difficulty, e.arrival, difficulty, arrival));
        self.entries.insert(
            idx,
            Entry {
                proof,
                difficulty,
                proof_hash,
                arrival,
            },
        );

        if self.entries.len() > self.capacity {
            self.entries.pop(); // lowest-difficulty (ties: most recent arrival) entry is last
        }
        true
    }

    /// `take_top(k) -> list` — non-destructive peek of the `k`
    /// highest-difficulty proofs, ties broken by insertion order (R9).
    pub fn take_top(&self, k: usize) -> Vec<Proof> {
        self.entries.iter().take(k).map(|e| e.proof.clone()).collect()
    }

    /// `remove_committed(proofs)` — drop by `proof_hash` after finalization.
    pub fn remove_committed(&mut self, proofs: &[Proof]) {
        let hashes: Vec<Hash> = proofs.iter().map(|p| p.proof_hash()).collect();
        self.entries.retain(|e| !hashes.contains(&e.proof_hash));
    }

    pub fn contains(&self, proof: &Proof) -> bool {
        let hash = proof.proof_hash();
        self.entries.iter().any(|e| e.proof_hash == hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-only helper mirroring the original's test-fixture inspection
    /// methods: the difficulty of the current highest-priority entry.
    pub fn peek_top_difficulty(&self) -> Option<u64> {
        self.entries.first().map(|e| e.difficulty)
    }

    /// Empties the mempool. Used between test scenarios, the way the
    /// original's fixtures reset a mempool between cases.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_arrival = 0;
    }
}

/// Max-heap-by-difficulty ordering with arrival as the tie-break: lower
/// arrival (earlier insertion) sorts first among equal difficulties.
fn higher_priority(existing_difficulty: u64, existing_arrival: u64, new_difficulty: u64, new_arrival: u64) -> bool {
    match existing_difficulty.cmp(&new_difficulty) {
        core::cmp::Ordering::Greater => true,
        core::cmp::Ordering::Less => false,
        core::cmp::Ordering::Equal => existing_arrival < new_arrival,
    }
}
