//! Error kinds surfaced from the consensus core.
//!
//! Mirrors the error table in the spec's "Error Handling Design" section:
//! every variant here is either directly consumed by a caller to decide
//! whether the event is recoverable (a dropped message, a round timeout)
//! or terminal (a proof/block/transition rejection). No panics anywhere
//! in this crate's non-test code; everything bottoms out in one of these.

use alloc::string::String;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AethelError {
    #[error("proof text matched forbidden pattern: {matched}")]
    Injection { matched: String },

    #[error("proof exceeds complexity bounds: {distinct_vars} vars, {constraint_count} constraints")]
    TooComplex {
        distinct_vars: usize,
        constraint_count: usize,
    },

    #[error("conservation violated: net delta {net_delta}")]
    Conservation { net_delta: i128 },

    #[error("arithmetic overflow on variable {variable}")]
    Overflow { variable: String },

    #[error("arithmetic underflow on variable {variable}")]
    Underflow { variable: String },

    #[error("division or modulo by zero on variable {variable}")]
    DivByZero { variable: String },

    #[error("proof is unsatisfiable (contradiction)")]
    Contradiction,

    #[error("solver exceeded the verification deadline")]
    Timeout,

    #[error("PRE-PREPARE sender is not leader of view {view}")]
    LeaderMismatch { view: u64 },

    #[error("message digest does not match the accepted proposal")]
    DigestMismatch,

    #[error("double spend detected for ({txid}, {index})")]
    DoubleSpend { txid: String, index: u32 },

    #[error("alternative history disagrees with a recorded checkpoint")]
    StaleCheckpoint,

    #[error("malformed constraint text: {0}")]
    ParseError(String),

    #[error("serialization failure: {0}")]
    Serialization(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, AethelError>;
