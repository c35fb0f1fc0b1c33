use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng as HashRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

/// 32-byte process-wide encryption key. Supplied at startup, never
/// logged, never persisted alongside ciphertext.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Generate a fresh random key.
pub fn generate_key() -> EncryptionKey {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    EncryptionKey(bytes)
}

/// Wrap raw key bytes. Returns `None` unless exactly 32 bytes.
pub fn load_key(bytes: &[u8]) -> Option<EncryptionKey> {
    let arr: [u8; 32] = bytes.try_into().ok()?;
    Some(EncryptionKey(arr))
}

/// Encrypt `plaintext` with `key`, returning `(ciphertext, nonce)`.
/// The nonce is random per call and must be stored with the ciphertext.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12])> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("encrypt: {e}"))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt `ciphertext` with `key` and `nonce`. Fails if the
/// authentication tag does not verify or the input is malformed.
pub fn decrypt(key: &EncryptionKey, ciphertext: &[u8], nonce_bytes: &[u8; 12]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = Nonce::from(*nonce_bytes);

    let plaintext = cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|e| anyhow::anyhow!("decrypt: {e}"))?;

    Ok(plaintext)
}

/// Hash a redemption password with Argon2id and a fresh random salt,
/// returning the PHC string for storage.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut HashRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash: {e}"))?;
    Ok(hash.to_string())
}

/// Verify a password attempt against a stored PHC string. Digest
/// comparison inside argon2 is constant-time.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| anyhow::anyhow!("parse hash: {e}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("argon2 verify: {e}")),
    }
}

/// Read a key file written by `generate_key`, trimming nothing — the
/// file holds raw bytes.
pub fn read_key_file(path: &std::path::Path) -> Result<EncryptionKey> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read key file: {}", path.display()))?;
    load_key(&bytes).ok_or_else(|| {
        anyhow::anyhow!(
            "key file is corrupt (expected 32 bytes, got {}): {}",
            bytes.len(),
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key();
        let plaintext = b"launch codes: 1234";
        let (ct, nonce) = encrypt(&key, plaintext).unwrap();
        let pt = decrypt(&key, &ct, &nonce).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = generate_key();
        let key2 = generate_key();
        let (ct, nonce) = encrypt(&key1, b"secret").unwrap();
        assert!(decrypt(&key2, &ct, &nonce).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_key();
        let (mut ct, nonce) = encrypt(&key, b"secret").unwrap();
        ct[0] ^= 0xff;
        assert!(decrypt(&key, &ct, &nonce).is_err());
    }

    #[test]
    fn password_hash_and_verify() {
        let hash = hash_password("swordfish").unwrap();
        assert!(verify_password("swordfish", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn password_hashes_are_salted() {
        let h1 = hash_password("swordfish").unwrap();
        let h2 = hash_password("swordfish").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn load_key_rejects_wrong_length() {
        assert!(load_key(&[0u8; 16]).is_none());
        assert!(load_key(&[0u8; 32]).is_some());
    }
}
