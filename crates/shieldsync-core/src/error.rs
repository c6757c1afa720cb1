//! error types for shieldsync

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// computed root disagrees with the authoritative on-chain root
    #[error("integrity error: computed root {computed} != on-chain root {onchain} at block {height}")]
    Integrity {
        computed: String,
        onchain: String,
        height: u64,
    },

    #[error("leaf index {index} exceeds tree capacity {capacity}")]
    CapacityExceeded { index: u64, capacity: u64 },

    #[error("conflicting leaf at index {index}")]
    ConflictingLeaf { index: u64 },

    #[error("conflicting note for commitment {0}")]
    ConflictingNote(String),

    #[error("insufficient notes: need {required}, have {available} unspent")]
    InsufficientNotes { required: usize, available: usize },

    #[error("insufficient balance: need {required}, selected notes hold {available}")]
    InsufficientBalance { required: u128, available: u128 },

    /// withdraw spends one whole note; nothing matched the requested amount
    #[error("withdraw needs one unspent note of exactly {amount}, none found (spendable balance {balance})")]
    NoExactNote { amount: u128, balance: u128 },

    #[error("commitment {0} not found in tree")]
    NotFoundInTree(String),

    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("conflicting event at tx {tx} log {log_index}")]
    ConflictingEvent { tx: String, log_index: u64 },

    #[error("unsound leaf index: {0}")]
    UnsoundIndex(String),

    #[error("invalid field element: {0}")]
    InvalidField(String),

    #[error("invalid note: {0}")]
    InvalidNote(String),

    #[error("unknown note {0}")]
    UnknownNote(String),

    #[error("note {0} already spent")]
    NoteSpent(String),

    #[error("circuit shape mismatch: {0}")]
    CircuitShapeMismatch(String),

    #[error("value not conserved: inputs {inputs} != outputs {outputs}")]
    ValueNotConserved { inputs: u128, outputs: u128 },

    #[error("invalid tree depth {0}")]
    InvalidDepth(usize),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("hash error: {0}")]
    Hash(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// errors that must abort the current request; no proof may be assembled
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::Integrity { .. } | LedgerError::CapacityExceeded { .. }
        )
    }

    /// errors the user can fix (more notes, more funds, other input) - never retried
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientNotes { .. }
                | LedgerError::InsufficientBalance { .. }
                | LedgerError::NoExactNote { .. }
                | LedgerError::InvalidConfig(_)
        )
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<light_poseidon::PoseidonError> for LedgerError {
    fn from(e: light_poseidon::PoseidonError) -> Self {
        LedgerError::Hash(e.to_string())
    }
}

#[cfg(feature = "sled-store")]
impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self {
        LedgerError::Storage(format!("sled: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
