//! Cryptographic primitives: block encryption, hashing, and the XOR used
//! for parity blocks.
//!
//! Every file gets its own random 16-byte key, so AES-CTR runs with a fixed
//! all-zero nonce. The AES key is the raw SHA-256 digest of the file key.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use ctr::Ctr128BE;
use sha2::{Digest, Sha256};

type Aes256Ctr = Ctr128BE<Aes256>;

/// Derive the 32-byte AES key from a file key seed.
pub fn derive_key(seed: &[u8]) -> [u8; 32] {
    Sha256::digest(seed).into()
}

/// Encrypt a block with AES-256-CTR under the key derived from `seed`.
/// Length-preserving.
pub fn encrypt(seed: &[u8], data: &[u8]) -> Vec<u8> {
    let key = derive_key(seed);
    let mut out = data.to_vec();
    let mut cipher = Aes256Ctr::new((&key).into(), (&[0u8; 16]).into());
    cipher.apply_keystream(&mut out);
    out
}

/// Decrypt a block encrypted with [`encrypt`]. CTR mode is symmetric.
pub fn decrypt(seed: &[u8], data: &[u8]) -> Vec<u8> {
    encrypt(seed, data)
}

/// Lowercase hex SHA-256 digest of `data`.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Bytewise XOR of two byte strings, the shorter one zero-padded on the
/// right to the length of the longer.
pub fn xor_pad(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().max(b.len());
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        out.push(x ^ y);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let seed = b"0123456789abcdef";
        let plain = b"the quick brown fox jumps over the lazy dog";
        let cipher = encrypt(seed, plain);
        assert_ne!(cipher, plain.to_vec());
        assert_eq!(cipher.len(), plain.len());
        assert_eq!(decrypt(seed, &cipher), plain.to_vec());
    }

    #[test]
    fn test_different_seeds_differ() {
        let plain = b"same plaintext";
        assert_ne!(encrypt(b"seed-one", plain), encrypt(b"seed-two", plain));
    }

    #[test]
    fn test_hash_hex() {
        // SHA-256 of the empty string
        assert_eq!(
            hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_xor_pad_properties() {
        let a = b"abcdef".to_vec();
        let b = b"xyz".to_vec();
        let c = b"0123456789".to_vec();

        // commutative
        assert_eq!(xor_pad(&a, &b), xor_pad(&b, &a));
        // associative
        assert_eq!(
            xor_pad(&xor_pad(&a, &b), &c),
            xor_pad(&a, &xor_pad(&b, &c))
        );
        // padded result has the length of the longest operand
        assert_eq!(xor_pad(&a, &c).len(), c.len());
        // xor with itself is zero
        assert!(xor_pad(&a, &a).iter().all(|&x| x == 0));
    }

    #[test]
    fn test_xor_parity_recovers_member() {
        // parity of a group recovers any single member when xored with the rest
        let blocks: Vec<Vec<u8>> = vec![
            b"first block".to_vec(),
            b"second".to_vec(),
            b"third block is longest".to_vec(),
        ];
        let mut parity = Vec::new();
        for b in &blocks {
            parity = xor_pad(&parity, b);
        }
        let mut rebuilt = parity.clone();
        rebuilt = xor_pad(&rebuilt, &blocks[0]);
        rebuilt = xor_pad(&rebuilt, &blocks[2]);
        // zero-padded to group width
        let mut expected = blocks[1].clone();
        expected.resize(parity.len(), 0);
        assert_eq!(rebuilt, expected);
    }
}
