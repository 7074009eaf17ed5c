use thiserror::Error;

/// Crate-wide error taxonomy. Remote failures are recoverable (the refresher
/// retries on its next tick); everything else propagates to the caller.
#[derive(Debug, Error)]
pub enum Error {
    // input validation
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("invalid derivation path: {0}")]
    InvalidPath(String),
    #[error("invalid extended key: {0}")]
    InvalidExtendedKey(String),
    #[error("unsupported address: {0}")]
    UnsupportedAddress(String),
    #[error("invalid transaction import: {0}")]
    InvalidImport(String),

    // authentication
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("decryption failed: ciphertext integrity check did not pass")]
    AuthFail,

    // wallet lifecycle
    #[error("wallet '{0}' already exists")]
    WalletAlreadyExists(String),
    #[error("wallet '{0}' not found")]
    WalletNotFound(String),
    #[error("operation requires private keys but the wallet is watch-only")]
    WatchOnly,

    // transactions
    #[error("insufficient funds: short {shortfall} satoshi")]
    InsufficientFunds { shortfall: u64 },
    #[error("transaction is already signed")]
    AlreadySigned,
    #[error("signing failed: {0}")]
    Signing(String),

    // remote
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by remote source: {0}")]
    RateLimited(String),
    #[error("failed to parse remote response: {0}")]
    Parse(String),

    // local environment
    #[error("unknown blockchain api source '{0}'")]
    UnknownApiSource(String),
    #[error("wordlist integrity check failed")]
    WordlistIntegrity,
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures the refresher recovers from locally by retrying.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::RateLimited(_) | Error::Parse(_)
        )
    }
}
