use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::Sha256;

use crate::constants::{
    KDF_ITERATIONS, KDF_SALT_TUNNEL_KEY, NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE,
};
use crate::error::CryptoError;
use crate::identity::Secret;

/// A contiguous slice of `nonce || ciphertext`. Carries no meaning on its own.
pub type Fragment = Vec<u8>;

/// Symmetric key of a tunnel, derived from its secret.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelKey([u8; SYMMETRIC_KEY_SIZE]);

impl TunnelKey {
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for TunnelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TunnelKey(..)")
    }
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// PBKDF2-HMAC-SHA256 over the secret with the fixed tunnel salt.
pub fn derive_key(secret: &Secret) -> TunnelKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.expose().as_bytes(),
        KDF_SALT_TUNNEL_KEY,
        KDF_ITERATIONS,
        &mut key,
    );
    TunnelKey(key)
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &TunnelKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &TunnelKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt and split the sealed bytes into `count` contiguous fragments.
pub fn encrypt_fragments(
    key: &TunnelKey,
    plaintext: &[u8],
    count: usize,
) -> Result<Vec<Fragment>, CryptoError> {
    let sealed = encrypt(key, plaintext)?;
    Ok(split_fragments(&sealed, count))
}

/// Reassemble fragments in order, then authenticate and decrypt.
pub fn decrypt_fragments(key: &TunnelKey, fragments: &[Fragment]) -> Result<Vec<u8>, CryptoError> {
    if fragments.is_empty() {
        return Err(CryptoError::DecryptionFailed);
    }
    decrypt(key, &join_fragments(fragments))
}

/// Split into `count` near-equal contiguous ranges. `count` is clamped to
/// `1..=data.len()` so no fragment is ever empty.
pub fn split_fragments(data: &[u8], count: usize) -> Vec<Fragment> {
    if data.is_empty() {
        return vec![Vec::new()];
    }
    let count = count.clamp(1, data.len());
    let base = data.len() / count;
    let extra = data.len() % count;

    let mut fragments = Vec::with_capacity(count);
    let mut offset = 0;
    for i in 0..count {
        let len = base + usize::from(i < extra);
        fragments.push(data[offset..offset + len].to_vec());
        offset += len;
    }
    fragments
}

pub fn join_fragments(fragments: &[Fragment]) -> Vec<u8> {
    let total = fragments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for fragment in fragments {
        out.extend_from_slice(fragment);
    }
    out
}
