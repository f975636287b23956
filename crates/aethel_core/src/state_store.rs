//! State Store (component F) — §4.2.
//!
//! Wraps the Merkle tree (component A) and the Conservation Validator
//! (component B): every mutation flows through `apply_transition`, which
//! validates conservation before touching the tree and is atomic from the
//! caller's viewpoint (§5 — no suspension inside a batch update).
//!
//! Method names (`validate_state_history`, `reject_alternative_history`,
//! `has_minimum_stake`, `reduce_stake`) mirror `aethel/consensus/
//! state_store.py` directly, per SPEC_FULL.md §10.6.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use sha2::{Digest, Sha256};

use crate::conservation;
use crate::error::AethelError;
use crate::merkle::{InclusionProof, MerkleTree};
use crate::types::{Checkpoint, Hash, StateChange, StateTransition};

pub const MINIMUM_STAKE: i64 = 1000;
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// One entry of an alternative/candidate history, as compared against
/// recorded checkpoints by `validate_state_history` (§4.2, R8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryState {
    pub root_hash: Hash,
    pub conservation_checksum: Hash,
}

#[derive(Debug, Clone)]
pub struct StateStoreConfig {
    pub checkpoint_interval: u64,
    pub history_cap: usize,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    tree: MerkleTree,
    config: StateStoreConfig,
    history: Vec<Hash>,
    spent_outputs: BTreeMap<(String, u32), bool>,
    checkpoints: Vec<Checkpoint>,
    transition_count: u64,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StateStoreConfig::default())
    }
}

impl StateStore {
    pub fn new(config: StateStoreConfig) -> Self {
        Self {
            tree: MerkleTree::new(),
            config,
            history: Vec::new(),
            spent_outputs: BTreeMap::new(),
            checkpoints: Vec::new(),
            transition_count: 0,
        }
    }

    pub fn root_hash(&self) -> Hash {
        self.tree.root()
    }

    pub fn get(&self, key: &[u8]) -> Option<i64> {
        self.tree.get(key)
    }

    pub fn generate_proof(&self, key: &[u8]) -> Option<InclusionProof> {
        self.tree.generate_proof(key)
    }

    pub fn verify_proof(&self, proof: &InclusionProof) -> bool {
        MerkleTree::verify_proof(proof, self.tree.root())
    }

    pub fn conservation_checksum_value(&self) -> i128 {
        conservation::sum_balances(self.tree.view())
    }

    /// Hash of the sorted `balance:`-prefixed `(key, value)` pairs — the
    /// original's `conservation_checksum`, distinguishing two states with
    /// equal sums but different distributions (SPEC_FULL.md §10.6).
    pub fn conservation_checksum(&self) -> Hash {
        checksum_of(self.tree.view())
    }

    // --- Balance / stake helpers -----------------------------------------

    pub fn get_balance(&self, node_id: &str) -> i64 {
        self.get(balance_key(node_id).as_bytes()).unwrap_or(0)
    }

    /// Direct tree write, bypassing `apply_transition`'s conservation
    /// check — matches the original's `set_balance`, used for genesis
    /// allocation rather than a conserving transfer. Accepted transfers
    /// between existing balances still go through `apply_transition`.
    pub fn set_balance(&mut self, node_id: &str, balance: i64) {
        self.tree
            .batch_update(&[(balance_key(node_id).into_bytes(), balance)]);
    }

    pub fn get_validator_stake(&self, node_id: &str) -> i64 {
        self.get(stake_key(node_id).as_bytes()).unwrap_or(0)
    }

    /// Direct tree write, bypassing conservation (stake keys are not
    /// `balance:`-prefixed so conservation never looks at them, but this
    /// also skips history/checkpoint bookkeeping for pure stake setup).
    pub fn set_validator_stake(&mut self, node_id: &str, stake: i64) {
        self.tree
            .batch_update(&[(stake_key(node_id).into_bytes(), stake)]);
    }

    pub fn reduce_stake(&mut self, node_id: &str, amount: i64) {
        let current = self.get_validator_stake(node_id);
        let reduced = (current - amount).max(0);
        self.set_validator_stake(node_id, reduced);
    }

    pub fn has_minimum_stake(&self, node_id: &str) -> bool {
        self.get_validator_stake(node_id) >= MINIMUM_STAKE
    }

    // --- Double-spend detection -------------------------------------------

    pub fn is_output_spent(&self, txid: &str, index: u32) -> bool {
        self.spent_outputs
            .get(&(txid.to_string(), index))
            .copied()
            .unwrap_or(false)
    }

    /// `detect_double_spend(txs)` — §4.2. Scans a batch of changes for
    /// `(txid, idx)` collisions, either within the batch or against
    /// already-spent outputs recorded in the store.
    pub fn detect_double_spend(&self, changes: &[StateChange]) -> Result<(), AethelError> {
        let mut seen: Vec<(String, u32)> = Vec::new();
        for change in changes {
            if let Some((txid, idx)) = &change.spends {
                if seen.contains(&(txid.clone(), *idx)) || self.is_output_spent(txid, *idx) {
                    return Err(AethelError::DoubleSpend {
                        txid: txid.clone(),
                        index: *idx,
                    });
                }
                seen.push((txid.clone(), *idx));
            }
        }
        Ok(())
    }

    // --- Transition application --------------------------------------------

    /// `apply_transition(t)` — §4.2 steps 1-7. Validates conservation and
    /// double-spends before any mutation; on rejection the tree is
    /// untouched and an `Err` is returned (the spec's `false`).
    pub fn apply_transition(
        &mut self,
        changes: Vec<StateChange>,
        timestamp: u64,
    ) -> Result<StateTransition, AethelError> {
        self.detect_double_spend(&changes)?;

        let current_view = self.tree.view().clone();
        let (conservation_before, conservation_after) =
            conservation::validate_transition(&current_view, &changes)?;

        let root_before = self.tree.root();

        let mut updates: Vec<(Vec<u8>, i64)> = Vec::with_capacity(changes.len());
        for change in &changes {
            updates.push((change.key.clone(), change.new_value));
            if let Some((txid, idx)) = &change.spends {
                updates.push((spent_key(txid, *idx).into_bytes(), 1));
            }
        }
        self.tree.batch_update(&updates);

        let root_after = self.tree.root();

        // Conservation must be unchanged by construction; any discrepancy
        // here is a bug in the validator, not a caller error.
        debug_assert_eq!(conservation_before, conservation_after);

        for change in &changes {
            if let Some((txid, idx)) = &change.spends {
                self.spent_outputs.insert((txid.clone(), *idx), true);
            }
        }

        self.history.push(root_after);
        if self.history.len() > self.config.history_cap {
            self.history.remove(0);
        }

        self.transition_count += 1;
        if self.transition_count % self.config.checkpoint_interval == 0 {
            self.create_checkpoint(root_after, timestamp);
        }

        Ok(StateTransition {
            changes,
            root_before,
            root_after,
            conservation_before,
            conservation_after,
            timestamp,
        })
    }

    fn create_checkpoint(&mut self, root_hash: Hash, timestamp: u64) {
        self.checkpoints.push(Checkpoint {
            root_hash,
            conservation_checksum: self.conservation_checksum(),
            timestamp,
            transition_count: self.transition_count,
        });
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn state_history(&self) -> &[Hash] {
        &self.history
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// `validate_state_history(history)` — §4.2, R8. A candidate history
    /// is valid iff the conservation checksum never changes between
    /// adjacent states and every recorded checkpoint whose root appears in
    /// the history agrees with it on the checksum.
    pub fn validate_state_history(&self, history: &[HistoryState]) -> bool {
        if history.is_empty() {
            return true;
        }

        for pair in history.windows(2) {
            if pair[0].conservation_checksum != pair[1].conservation_checksum {
                return false;
            }
        }

        for checkpoint in &self.checkpoints {
            for state in history {
                if state.root_hash == checkpoint.root_hash
                    && state.conservation_checksum != checkpoint.conservation_checksum
                {
                    return false;
                }
            }
        }

        true
    }

    /// `reject_alternative_history(history)` — the negation of
    /// `validate_state_history`, named to match the original's public API
    /// (SPEC_FULL.md §10.6).
    pub fn reject_alternative_history(&self, history: &[HistoryState]) -> bool {
        !self.validate_state_history(history)
    }

    /// `sync_from_peer(peer_root, peer_state_map)` — §4.2. Builds an
    /// ephemeral tree from the peer's claimed state, compares its root to
    /// `peer_root`, and only adopts it wholesale on a match.
    pub fn sync_from_peer(&mut self, peer_root: Hash, peer_state: BTreeMap<Vec<u8>, i64>) -> bool {
        let updates: Vec<(Vec<u8>, i64)> = peer_state.into_iter().collect();
        let mut candidate = MerkleTree::new();
        candidate.batch_update(&updates);

        if candidate.root() != peer_root {
            return false;
        }

        self.tree = candidate;
        self.history.push(peer_root);
        if self.history.len() > self.config.history_cap {
            self.history.remove(0);
        }
        true
    }
}

fn balance_key(node_id: &str) -> String {
    alloc::format!("balance:{}", node_id)
}

fn stake_key(node_id: &str) -> String {
    alloc::format!("stake:{}", node_id)
}

fn spent_key(txid: &str, index: u32) -> String {
    alloc::format!("spent:{}:{}", txid, index)
}

fn checksum_of(view: &BTreeMap<Vec<u8>, i64>) -> Hash {
    let mut hasher = Sha256::new();
    for (key, value) in view.iter().filter(|(k, _)| k.starts_with(b"balance:")) {
        hasher.update((key.len() as u32).to_be_bytes());
        hasher.update(key);
        hasher.update(value.to_be_bytes());
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}
