pub mod account;
pub mod path;

pub use account::{check_extended_key, HdAccount};
pub use path::{check_path, HdPath};

/// Pure mnemonic validator, alongside the other key validators.
pub use crate::mnemonic::validate as check_mnemonic;
