//! BIP39 mnemonic generation, validation and seed stretching.
//!
//! The canonical 2048-word English list ships with the crate and is checked
//! against its MD5 digest before every use; a mismatch means the binary was
//! tampered with and is fatal to the operation.

use md5::{Digest as _, Md5};
use once_cell::sync::Lazy;
use rand::RngCore;
use sha2::{Digest as _, Sha256, Sha512};

use crate::error::{Error, Result};

const WORDLIST_RAW: &str = include_str!("../wordlist/english.txt");

/// MD5 of the 2048 words concatenated without separators.
const WORDLIST_MD5: &str = "2a80fc2c95f3a4b0a5769764df251820";

pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

pub const SEED_ITERATIONS: u32 = 2048;

static WORDLIST: Lazy<Option<Vec<&'static str>>> = Lazy::new(|| {
    let words: Vec<&'static str> = WORDLIST_RAW.lines().map(|line| line.trim()).collect();
    if words.len() != 2048 {
        return None;
    }
    let mut hasher = Md5::new();
    for word in &words {
        hasher.update(word.as_bytes());
    }
    if hex::encode(hasher.finalize()) != WORDLIST_MD5 {
        return None;
    }
    Some(words)
});

fn wordlist() -> Result<&'static [&'static str]> {
    WORDLIST
        .as_deref()
        .ok_or(Error::WordlistIntegrity)
}

/// Draws CSPRNG entropy and maps it to a space-joined mnemonic of
/// `word_count` words (12, 15, 18, 21 or 24).
pub fn generate(word_count: usize) -> Result<String> {
    if !VALID_WORD_COUNTS.contains(&word_count) {
        return Err(Error::InvalidMnemonic(format!(
            "unsupported word count {}",
            word_count
        )));
    }
    let words = wordlist()?;

    let entropy_bits = word_count * 32 / 3;
    let mut entropy = vec![0u8; entropy_bits / 8];
    rand::rngs::OsRng.fill_bytes(&mut entropy);

    let indices = indices_from_entropy(&entropy);
    let picked: Vec<&str> = indices.iter().map(|&i| words[i as usize]).collect();
    Ok(picked.join(" "))
}

/// Reverses generation: unknown words, bad length or a checksum mismatch all
/// yield `false`.
pub fn validate(mnemonic: &str) -> bool {
    let words = match wordlist() {
        Ok(words) => words,
        Err(_) => return false,
    };
    let tokens: Vec<&str> = mnemonic.split_whitespace().collect();
    if !VALID_WORD_COUNTS.contains(&tokens.len()) {
        return false;
    }

    let mut indices = Vec::with_capacity(tokens.len());
    for token in &tokens {
        match words.binary_search(token) {
            Ok(index) => indices.push(index as u16),
            Err(_) => return false,
        }
    }

    let entropy_bits = tokens.len() * 32 / 3;
    let checksum_bits = entropy_bits / 32;
    let mut bits = Vec::with_capacity(tokens.len() * 11);
    for index in &indices {
        for shift in (0..11).rev() {
            bits.push((index >> shift) & 1 == 1);
        }
    }

    let mut entropy = vec![0u8; entropy_bits / 8];
    for (i, bit) in bits[..entropy_bits].iter().enumerate() {
        if *bit {
            entropy[i / 8] |= 1 << (7 - i % 8);
        }
    }

    let digest = Sha256::digest(&entropy);
    (0..checksum_bits).all(|i| {
        let expected = (digest[i / 8] >> (7 - i % 8)) & 1 == 1;
        bits[entropy_bits + i] == expected
    })
}

/// PBKDF2-HMAC-SHA512 over the mnemonic, salt `"mnemonic" || passphrase`,
/// 2048 rounds, 64 bytes out.
pub fn to_seed(mnemonic: &str, passphrase: &str) -> [u8; 64] {
    let salt = format!("mnemonic{}", passphrase);
    let mut seed = [0u8; 64];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        mnemonic.as_bytes(),
        salt.as_bytes(),
        SEED_ITERATIONS,
        &mut seed,
    );
    seed
}

/// Splits `entropy || SHA-256 checksum prefix` into 11-bit word indices.
fn indices_from_entropy(entropy: &[u8]) -> Vec<u16> {
    let entropy_bits = entropy.len() * 8;
    let checksum_bits = entropy_bits / 32;
    let digest = Sha256::digest(entropy);

    let mut bits = Vec::with_capacity(entropy_bits + checksum_bits);
    for byte in entropy {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1 == 1);
        }
    }
    for i in 0..checksum_bits {
        bits.push((digest[i / 8] >> (7 - i % 8)) & 1 == 1);
    }

    bits.chunks(11)
        .map(|chunk| chunk.iter().fold(0u16, |acc, &bit| (acc << 1) | bit as u16))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_GOOD: &str =
        "lion harvest elbow beauty butter spirit park jungle dose need flock hobby";

    #[test]
    fn test_generate_validates_for_every_length() {
        for count in VALID_WORD_COUNTS {
            let mnemonic = generate(count).unwrap();
            assert_eq!(mnemonic.split_whitespace().count(), count);
            assert!(validate(&mnemonic), "generated mnemonic failed: {}", mnemonic);
        }
    }

    #[test]
    fn test_generate_rejects_bad_length() {
        assert!(generate(13).is_err());
        assert!(generate(0).is_err());
    }

    #[test]
    fn test_known_vectors_validate() {
        assert!(validate(KNOWN_GOOD));
        assert!(validate(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"
        ));
    }

    #[test]
    fn test_unknown_word_rejected() {
        assert!(!validate(
            "lion harvest elbow beauty butter spirit park jungle dose need flock xyzzy"
        ));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        // swapping two words keeps membership but breaks the checksum
        assert!(!validate(
            "harvest lion elbow beauty butter spirit park jungle dose need flock hobby"
        ));
    }

    #[test]
    fn test_bad_word_count_rejected() {
        assert!(!validate("lion harvest elbow"));
    }

    #[test]
    fn test_seed_is_deterministic_and_passphrase_sensitive() {
        let a = to_seed(KNOWN_GOOD, "");
        let b = to_seed(KNOWN_GOOD, "");
        let c = to_seed(KNOWN_GOOD, "TREZOR");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
