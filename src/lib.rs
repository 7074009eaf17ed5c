//! Hierarchical-deterministic Bitcoin wallet core.
//!
//! Keys come from a BIP39 mnemonic walked through a BIP32 path; state lives
//! in a password-encrypted record file; a background worker reconciles the
//! remote chain view into that record; spending goes through coin selection,
//! assembly and signing, or through a tamper-evident export envelope for
//! signing elsewhere.

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hd;
pub mod mnemonic;
pub mod refresher;
pub mod store;
pub mod tx;
pub mod utils;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
pub use hd::HdAccount;
pub use wallet::Wallet;
