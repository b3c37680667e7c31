use thiserror::Error;

/// Caller-protocol violations: the state machine was driven out of order.
/// Reported, never retried.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    #[error("a transaction state already exists for this id")]
    CannotPrepareTxStateTwice,

    #[error("no transaction state has been prepared for this id")]
    CannotUpdateTxStateBeforePrepare,
}

/// Backend failures surfaced verbatim from the four sub-state collaborators.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("key not found")]
    KeyNotFound,

    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("an account with this address already exists")]
    AccountAlreadyExists,

    #[error("account not found")]
    AccountNotFound,
}

/// Gas/balance overflow. Fatal to the transaction that triggered it.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ArithError {
    #[error("gas ledger overflow while replaying gas for an address")]
    GasOverflow,

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },
}

/// Top-level error returned by the engine's public API.
///
/// Concurrency conflicts are deliberately not a variant here: `CheckAndUpdate`
/// returns `Ok(Vec<TxId>)` whether or not the list is empty, per the spec's
/// "not an error" rule for category 4.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Arith(#[from] ArithError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
