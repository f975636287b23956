//! Consensus Engine (component H) — §4.4.
//!
//! The PBFT state machine: leader election, the PRE-PREPARE / PREPARE /
//! COMMIT phases, quorum accounting, and finalization against the State
//! Store. Method names (`propose_block_from_mempool`, `start_consensus_round`,
//! `handle_pre_prepare`, `handle_prepare`, `handle_commit`, `is_leader`,
//! `max_faulty_nodes`, `verify_quorum`) mirror `test_consensus_engine.py`'s
//! `ConsensusEngine` directly.
//!
//! Per §9's "dynamic dispatch across verifier vs mock verifier in tests"
//! design note, verification is a capability injected by value (`Box<dyn
//! ProofVerification>`) rather than a concrete `Verifier` field, so tests
//! can swap in a stub that always accepts/rejects without touching the
//! solver.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::time::Duration;

use crate::conservation;
use crate::error::AethelError;
use crate::mempool::ProofMempool;
use crate::state_store::StateStore;
use crate::types::{
    ConsensusResult, Hash, NodeId, PbftMessage, PbftPayload, Proof, ProofBlock, StateChange,
};
use crate::verifier::{BlockVerification, Verifier, VerifierConfig};

/// Slashing penalty applied to a leader caught proposing two different
/// blocks for the same `(view, sequence)` — §4.4 "Failure semantics".
pub const EQUIVOCATION_SLASH: i64 = 100;

/// Capability set for proof verification, injected by value — §9.
pub trait ProofVerification {
    fn verify(&self, proof: &Proof) -> crate::types::VerificationResult;
    fn verify_block(&self, block: &ProofBlock) -> BlockVerification;
}

impl ProofVerification for Verifier {
    fn verify(&self, proof: &Proof) -> crate::types::VerificationResult {
        Verifier::verify(self, proof)
    }

    fn verify_block(&self, block: &ProofBlock) -> BlockVerification {
        Verifier::verify_block(self, block)
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub minimum_stake: i64,
    pub block_size: usize,
    pub round_timeout: Duration,
    /// First Open Question (§9, SPEC_FULL.md §10.4): whether a replica
    /// additionally bound-checks a proposer-reported difficulty. Lives on
    /// `VerifierConfig`, surfaced here too since it governs consensus
    /// admission, not just standalone `verify()` calls.
    pub bound_check_difficulty: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            minimum_stake: crate::state_store::MINIMUM_STAKE,
            block_size: 50,
            round_timeout: Duration::from_secs(10),
            bound_check_difficulty: false,
        }
    }
}

/// Consensus State (per sequence) — §3. Created on the first valid
/// PRE-PREPARE for `(view, sequence)`, mutated only by this tuple's
/// handlers, destroyed on finalization or view change.
#[derive(Debug, Clone)]
pub struct ConsensusState {
    pub sequence: u64,
    pub view: u64,
    pub proof_block: ProofBlock,
    pub block_digest: Hash,
    pub verification_result: BlockVerification,
    pub prepare_messages: BTreeMap<NodeId, PbftMessage>,
    pub commit_messages: BTreeMap<NodeId, PbftMessage>,
    pub prepared: bool,
    pub committed: bool,
}

pub struct ConsensusEngine {
    node_id: NodeId,
    validator_stake: i64,
    peers: Vec<NodeId>,
    view: u64,
    sequence: u64,
    current_state: Option<ConsensusState>,
    last_finalized_digest: Hash,
    store: StateStore,
    mempool: ProofMempool,
    verifier: Box<dyn ProofVerification>,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(
        node_id: NodeId,
        validator_stake: i64,
        mut peers: Vec<NodeId>,
        store: StateStore,
        mempool: ProofMempool,
        verifier: Box<dyn ProofVerification>,
        config: ConsensusConfig,
    ) -> Self {
        if !peers.contains(&node_id) {
            peers.push(node_id.clone());
        }
        peers.sort();
        peers.dedup();
        Self {
            node_id,
            validator_stake,
            peers,
            view: 0,
            sequence: 0,
            current_state: None,
            last_finalized_digest: [0u8; 32],
            store,
            mempool,
            verifier,
            config,
        }
    }

    /// Convenience constructor using a default solver-backed `Verifier`.
    pub fn with_default_verifier(
        node_id: NodeId,
        validator_stake: i64,
        peers: Vec<NodeId>,
        store: StateStore,
        mempool: ProofMempool,
        config: ConsensusConfig,
    ) -> Self {
        Self::new(
            node_id,
            validator_stake,
            peers,
            store,
            mempool,
            Box::new(Verifier::new(VerifierConfig::default())),
            config,
        )
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn current_state(&self) -> Option<&ConsensusState> {
        self.current_state.as_ref()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }

    pub fn mempool(&self) -> &ProofMempool {
        &self.mempool
    }

    pub fn mempool_mut(&mut self) -> &mut ProofMempool {
        &mut self.mempool
    }

    /// `leader(view) = sorted_nodes[view mod N]` — §4.4.
    pub fn leader(&self, view: u64) -> &NodeId {
        let n = self.peers.len() as u64;
        &self.peers[(view % n) as usize]
    }

    pub fn is_leader(&self) -> bool {
        self.leader(self.view) == &self.node_id
    }

    /// `f = floor((N-1)/3)`.
    pub fn max_faulty_nodes(&self) -> usize {
        (self.peers.len().saturating_sub(1)) / 3
    }

    /// `Q = 2f + 1`.
    pub fn quorum_size(&self) -> usize {
        2 * self.max_faulty_nodes() + 1
    }

    /// A set of distinct-sender messages reaches quorum iff its size is at
    /// least `Q`.
    pub fn verify_quorum(&self, messages: &[PbftMessage]) -> bool {
        let mut senders: Vec<&NodeId> = messages.iter().map(|m| &m.sender_id).collect();
        senders.sort();
        senders.dedup();
        senders.len() >= self.quorum_size()
    }

    /// Nodes below `MINIMUM_STAKE` must refuse to participate as voters —
    /// §4.4 "Roles".
    pub fn can_vote(&self) -> bool {
        self.validator_stake >= self.config.minimum_stake
    }

    /// **Propose** step 1: drain up to `block_size` highest-difficulty
    /// proofs from the mempool and build a `ProofBlock`. Returns `None`
    /// for a non-leader.
    pub fn propose_block_from_mempool(
        &mut self,
        block_size: usize,
        timestamp: u64,
        block_id: impl Into<String>,
    ) -> Option<ProofBlock> {
        if !self.is_leader() {
            return None;
        }
        let proofs = self.mempool.take_top(block_size);
        Some(ProofBlock {
            block_id: block_id.into(),
            timestamp,
            proofs,
            previous_block_hash: self.last_finalized_digest,
            proposer_id: self.node_id.clone(),
            signature: Vec::new(),
        })
    }

    /// Leader-side helper: wraps a freshly proposed block in a PRE-PREPARE
    /// and runs it through the same admission path every replica uses,
    /// returning the PREPARE to broadcast.
    pub fn start_consensus_round(&mut self, block: ProofBlock) -> Result<PbftMessage, AethelError> {
        if !self.is_leader() {
            return Err(AethelError::LeaderMismatch { view: self.view });
        }
        let msg = PbftMessage {
            view: self.view,
            sequence: self.sequence,
            sender_id: self.node_id.clone(),
            payload: PbftPayload::PrePrepare(block),
            signature: Vec::new(),
        };
        self.handle_pre_prepare(&msg)
    }

    /// **PRE-PREPARE handler** — §4.4 step 2. On acceptance returns the
    /// PREPARE message to broadcast.
    pub fn handle_pre_prepare(&mut self, msg: &PbftMessage) -> Result<PbftMessage, AethelError> {
        let block = match &msg.payload {
            PbftPayload::PrePrepare(b) => b,
            _ => return Err(AethelError::Internal("expected PrePrepare payload".to_string())),
        };

        if msg.view != self.view || msg.sequence != self.sequence {
            return Err(AethelError::Internal(
                "PRE-PREPARE for a non-current (view, sequence)".to_string(),
            ));
        }

        let expected_leader = self.leader(msg.view).clone();
        if msg.sender_id != expected_leader {
            return Err(AethelError::LeaderMismatch { view: msg.view });
        }

        let digest = block.digest();
        if let Some(state) = &self.current_state {
            if state.view == msg.view && state.sequence == msg.sequence && state.block_digest != digest {
                // A leader proposing two different blocks for the same
                // tuple is equivocation; slash and treat as rejected.
                log::warn!("leader {} equivocated at view {}", msg.sender_id, msg.view);
                self.store.reduce_stake(&msg.sender_id, EQUIVOCATION_SLASH);
                return Err(AethelError::DigestMismatch);
            }
        }

        if block.proofs.is_empty() {
            return Err(AethelError::Internal("proposed block has no proofs".to_string()));
        }

        let verification = self.verifier.verify_block(block);
        if !verification.valid {
            let reason = verification
                .per_proof_results
                .iter()
                .find(|r| !r.valid)
                .and_then(|r| r.error.clone())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "block verification failed".to_string());
            log::debug!("rejecting PRE-PREPARE: {}", reason);
            return Err(AethelError::Internal(reason));
        }

        self.current_state = Some(ConsensusState {
            sequence: msg.sequence,
            view: msg.view,
            proof_block: block.clone(),
            block_digest: digest,
            verification_result: verification,
            prepare_messages: BTreeMap::new(),
            commit_messages: BTreeMap::new(),
            prepared: false,
            committed: false,
        });

        Ok(PbftMessage {
            view: msg.view,
            sequence: msg.sequence,
            sender_id: self.node_id.clone(),
            payload: PbftPayload::Prepare { digest },
            signature: Vec::new(),
        })
    }

    /// **PREPARE handler** — §4.4 step 3. Returns `Ok(Some(commit_msg))`
    /// exactly when quorum is reached for the first time.
    pub fn handle_prepare(&mut self, msg: &PbftMessage) -> Result<Option<PbftMessage>, AethelError> {
        let digest = match &msg.payload {
            PbftPayload::Prepare { digest } => *digest,
            _ => return Err(AethelError::Internal("expected Prepare payload".to_string())),
        };

        if msg.view != self.view || msg.sequence != self.sequence {
            return Ok(None); // admission invariant: dropped silently
        }

        let quorum = self.quorum_size();
        let state = self
            .current_state
            .as_mut()
            .ok_or(AethelError::DigestMismatch)?;

        if digest != state.block_digest {
            return Err(AethelError::DigestMismatch);
        }
        if state.prepare_messages.contains_key(&msg.sender_id) {
            return Ok(None); // idempotent resend (R10)
        }

        state.prepare_messages.insert(msg.sender_id.clone(), msg.clone());

        if !state.prepared && state.prepare_messages.len() >= quorum {
            state.prepared = true;
            return Ok(Some(PbftMessage {
                view: msg.view,
                sequence: msg.sequence,
                sender_id: self.node_id.clone(),
                payload: PbftPayload::Commit { digest },
                signature: Vec::new(),
            }));
        }
        Ok(None)
    }

    /// **COMMIT handler** — §4.4 step 4. When commit quorum is reached and
    /// the tuple is `Prepared`, applies the induced transition, drains the
    /// mempool, and finalizes.
    pub fn handle_commit(
        &mut self,
        msg: &PbftMessage,
        timestamp: u64,
    ) -> Result<Option<ConsensusResult>, AethelError> {
        let digest = match &msg.payload {
            PbftPayload::Commit { digest } => *digest,
            _ => return Err(AethelError::Internal("expected Commit payload".to_string())),
        };

        if msg.view != self.view || msg.sequence != self.sequence {
            return Ok(None);
        }

        let quorum = self.quorum_size();
        {
            let state = self
                .current_state
                .as_mut()
                .ok_or(AethelError::DigestMismatch)?;

            if digest != state.block_digest {
                return Err(AethelError::DigestMismatch);
            }
            if state.commit_messages.contains_key(&msg.sender_id) {
                return Ok(None);
            }
            state.commit_messages.insert(msg.sender_id.clone(), msg.clone());

            if !(state.prepared && state.commit_messages.len() >= quorum) {
                return Ok(None);
            }
            state.committed = true;
        }

        self.finalize(digest, timestamp)
    }

    fn finalize(&mut self, digest: Hash, timestamp: u64) -> Result<Option<ConsensusResult>, AethelError> {
        let state = self
            .current_state
            .take()
            .ok_or_else(|| AethelError::Internal("finalize called without current_state".to_string()))?;
        let changes = derive_state_changes(&state.proof_block, &self.store);
        let transition = self.store.apply_transition(changes, timestamp)?;

        self.mempool.remove_committed(&state.proof_block.proofs);
        self.sequence += 1;
        self.last_finalized_digest = digest;

        Ok(Some(ConsensusResult {
            consensus_reached: true,
            finalized_state: Some(digest),
            new_root: Some(transition.root_after),
        }))
    }

    /// **Timeout and view change** — §4.4. On expiry of `ROUND_TIMEOUT`
    /// without reaching `Committed`, the current tuple is discarded and
    /// the view advances; the caller is responsible for the actual
    /// wall-clock timer (§5 — the event loop owns suspension points, not
    /// this crate).
    pub fn time_out_round(&mut self) {
        self.current_state = None;
        self.view += 1;
    }

    pub fn round_timeout(&self) -> Duration {
        self.config.round_timeout
    }
}

/// Translate a finalized block's proofs into concrete `StateChange`s.
///
/// The spec leaves the exact proof-to-key mapping unspecified beyond "the
/// proofs describe the `Δbalance` keys" (§4.4 step 4); this crate follows
/// the naming convention the scenario proofs in §8 themselves use: a
/// post-condition of shape `<id>_balance == old_<id>_balance ± k` refers to
/// `balance:<id>`. Deltas for the same key across multiple proofs in one
/// block are summed before being applied as a single absolute write.
fn derive_state_changes(block: &ProofBlock, store: &StateStore) -> Vec<StateChange> {
    let mut deltas: BTreeMap<String, i128> = BTreeMap::new();
    for proof in &block.proofs {
        for post in &proof.post_conditions {
            if let Some(delta) = conservation::extract_delta(&post.text) {
                if let Some(node_id) = delta.var.strip_suffix("_balance") {
                    *deltas.entry(node_id.to_string()).or_insert(0) += delta.delta;
                }
            }
        }
    }

    deltas
        .into_iter()
        .map(|(node_id, delta)| {
            let key = alloc::format!("balance:{}", node_id);
            let new_value = (store.get_balance(&node_id) as i128 + delta) as i64;
            StateChange::new(key.into_bytes(), new_value)
        })
        .collect()
}
