use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::ChildNumber;

use crate::error::{Error, Result};

/// BIP32 derivation path in its textual form: an optional `m/` prefix, then
/// `/`-separated indices with a trailing `'` marking hardened components.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HdPath {
    components: Vec<ChildNumber>,
}

impl HdPath {
    pub fn components(&self) -> &[ChildNumber] {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn has_hardened(&self) -> bool {
        self.components.iter().any(|c| c.is_hardened())
    }
}

impl FromStr for HdPath {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut tokens: Vec<&str> = text.split('/').collect();
        if tokens.first() == Some(&"m") {
            tokens.remove(0);
        }
        // "m" alone (or the empty string) is the root itself
        if tokens.len() == 1 && tokens[0].is_empty() {
            tokens.clear();
        }

        let mut components = Vec::with_capacity(tokens.len());
        for token in tokens {
            let (digits, hardened) = match token.strip_suffix('\'') {
                Some(digits) => (digits, true),
                None => (token, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidPath(format!("bad component '{}'", token)));
            }
            let index: u32 = digits
                .parse()
                .map_err(|_| Error::InvalidPath(format!("bad component '{}'", token)))?;
            let child = if hardened {
                ChildNumber::from_hardened_idx(index)
            } else {
                ChildNumber::from_normal_idx(index)
            }
            .map_err(|_| Error::InvalidPath(format!("index {} out of range", index)))?;
            components.push(child);
        }
        Ok(HdPath { components })
    }
}

impl fmt::Display for HdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.components {
            match component {
                ChildNumber::Normal { index } => write!(f, "/{}", index)?,
                ChildNumber::Hardened { index } => write!(f, "/{}'", index)?,
            }
        }
        Ok(())
    }
}

/// Pure validator for path text.
pub fn check_path(text: &str) -> bool {
    text.parse::<HdPath>().is_ok()
}
