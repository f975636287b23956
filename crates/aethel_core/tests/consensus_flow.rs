//! End-to-end scenarios from the system description (S1-S6): proofs flow
//! through `Verifier`, accepted transfers reach the `StateStore` via a
//! finalized PBFT round, and the mempool drains on commit.

use aethel_core::{
    Constraint, ConsensusConfig, ConsensusEngine, Param, Proof, ProofMempool, StateStore,
};

fn transfer_proof(from_delta: &str, to_delta: &str) -> Proof {
    Proof::new(
        vec![
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
        vec![Constraint::new("A_balance >= 30")],
        vec![
            Constraint::new(format!("A_balance == old_A_balance {}", from_delta)),
            Constraint::new(format!("B_balance == old_B_balance {}", to_delta)),
        ],
    )
}

fn network(node_id: &str, peers: &[&str]) -> ConsensusEngine {
    let mut store = StateStore::default();
    store.set_balance("A", 100);
    store.set_balance("B", 0);
    ConsensusEngine::with_default_verifier(
        node_id.to_string(),
        1000,
        peers.iter().map(|p| p.to_string()).collect(),
        store,
        ProofMempool::default(),
        ConsensusConfig::default(),
    )
}

/// S5: four honest nodes reach `Committed` with an identical digest, the
/// mempool drains, and the root hash changes exactly once.
#[test]
fn s5_four_node_happy_path() {
    let names = ["node_0", "node_1", "node_2", "node_3"];
    let mut engines: Vec<ConsensusEngine> = names.iter().map(|n| network(n, &names)).collect();

    for e in engines.iter_mut() {
        e.mempool_mut().add_proof(transfer_proof("- 30", "+ 30"), 0);
    }

    let leader_idx = engines.iter().position(|e| e.is_leader()).unwrap();
    let root_before = engines[leader_idx].store().root_hash();

    let block = engines[leader_idx]
        .propose_block_from_mempool(1, 0, "s5-block")
        .expect("leader must produce a block");
    let expected_digest = block.digest();

    let pre_prepare = aethel_core::PbftMessage {
        view: 0,
        sequence: 0,
        sender_id: engines[leader_idx].node_id().clone(),
        payload: aethel_core::PbftPayload::PrePrepare(block),
        signature: Vec::new(),
    };

    let prepares: Vec<_> = engines
        .iter_mut()
        .map(|e| e.handle_pre_prepare(&pre_prepare).unwrap())
        .collect();

    let mut commits = Vec::new();
    for e in engines.iter_mut() {
        for p in &prepares {
            if let Some(commit) = e.handle_prepare(p).unwrap() {
                commits.push(commit);
                break;
            }
        }
    }

    let mut finalized = Vec::new();
    for e in engines.iter_mut() {
        for c in &commits {
            if let Some(result) = e.handle_commit(c, 1).unwrap() {
                finalized.push(result);
                break;
            }
        }
    }

    assert_eq!(finalized.len(), engines.len());
    for result in &finalized {
        assert!(result.consensus_reached);
        assert_eq!(result.finalized_state, Some(expected_digest));
    }
    for e in &engines {
        assert!(e.mempool().is_empty());
        assert_eq!(e.store().get_balance("A"), 70);
        assert_eq!(e.store().get_balance("B"), 30);
        assert_ne!(e.store().root_hash(), root_before);
    }
}

/// S1 through the full verifier + state store path, bypassing consensus:
/// a valid transfer proof both verifies and, once translated to a
/// `StateChange` set, applies as a conserving transition.
#[test]
fn s1_transfer_conserves_balance_end_to_end() {
    let verifier = aethel_core::Verifier::default();
    let proof = transfer_proof("- 30", "+ 30");
    let result = verifier.verify(&proof);
    assert!(result.valid, "expected valid, got {:?}", result.error);

    let mut store = StateStore::default();
    store.set_balance("A", 100);
    store.set_balance("B", 0);
    let transition = store
        .apply_transition(
            vec![
                aethel_core::StateChange::new(b"balance:A".to_vec(), 70),
                aethel_core::StateChange::new(b"balance:B".to_vec(), 30),
            ],
            1,
        )
        .unwrap();
    assert_eq!(transition.conservation_before, transition.conservation_after);
    assert_eq!(store.get_balance("A"), 70);
    assert_eq!(store.get_balance("B"), 30);
}

/// S2: an imbalanced post-condition is rejected by the verifier before it
/// ever reaches the state store.
#[test]
fn s2_conservation_violation_stops_at_verifier() {
    let verifier = aethel_core::Verifier::default();
    let proof = transfer_proof("- 30", "+ 31");
    let result = verifier.verify(&proof);
    assert!(!result.valid);
    assert!(matches!(
        result.error,
        Some(aethel_core::AethelError::Conservation { net_delta: 1 })
    ));
}

/// A block mixing one valid and one invalid proof is rejected wholesale by
/// `handle_pre_prepare`, so no replica ever opens a `ConsensusState` for it.
#[test]
fn mixed_validity_block_is_rejected_by_every_replica() {
    let names = ["node_0", "node_1", "node_2", "node_3"];
    let mut engines: Vec<ConsensusEngine> = names.iter().map(|n| network(n, &names)).collect();
    let leader_idx = engines.iter().position(|e| e.is_leader()).unwrap();

    for e in engines.iter_mut() {
        e.mempool_mut().add_proof(transfer_proof("- 30", "+ 31"), 50);
    }

    let block = engines[leader_idx]
        .propose_block_from_mempool(1, 0, "bad-block")
        .unwrap();
    let pre_prepare = aethel_core::PbftMessage {
        view: 0,
        sequence: 0,
        sender_id: engines[leader_idx].node_id().clone(),
        payload: aethel_core::PbftPayload::PrePrepare(block),
        signature: Vec::new(),
    };

    for e in engines.iter_mut() {
        assert!(e.handle_pre_prepare(&pre_prepare).is_err());
        assert!(e.current_state().is_none());
    }
}

/// S6: a checkpoint establishes a trusted `(root_hash, conservation_checksum)`
/// pair; an alternative history sharing the root but disagreeing on the
/// checksum is rejected without needing to touch live state.
#[test]
fn s6_long_range_rejection_after_checkpoint() {
    let mut store = StateStore::new(aethel_core::StateStoreConfig {
        checkpoint_interval: 1,
        history_cap: 100,
    });
    store
        .apply_transition(
            vec![aethel_core::StateChange::new(b"stake:A".to_vec(), 100)],
            1,
        )
        .unwrap();
    let checkpoint = store.latest_checkpoint().unwrap().clone();

    let forged = aethel_core::HistoryState {
        root_hash: checkpoint.root_hash,
        conservation_checksum: [0xAB; 32],
    };
    assert!(!store.validate_state_history(&[forged]));
    assert!(store.reject_alternative_history(&[forged]));
}
