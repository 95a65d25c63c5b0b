//! Sealed-box asymmetric encryption.
//!
//! ## Threat model
//!
//! A message is encrypted under a recipient's long-term static public key by
//! a sender who may not trust the channel it is relayed over, and who must
//! not be identifiable from the ciphertext itself. The recipient is the only
//! party who can recover the plaintext.
//!
//! ## Security properties
//!
//! - **Confidentiality**: only the holder of the matching static secret can
//!   decrypt.
//! - **Integrity**: any bit-flip in the ciphertext or the embedded ephemeral
//!   key causes decryption to fail (AEAD tag mismatch).
//! - **Sender anonymity**: the ciphertext contains no trace of a sending
//!   identity, only a freshly generated, single-use ephemeral public key.
//! - **Non-determinism**: two seals of the same plaintext under the same
//!   recipient key produce different ciphertexts, because the ephemeral
//!   keypair and the AEAD nonce are both fresh per call.
//!
//! ## Construction
//!
//! This is a libsodium-style `crypto_box_seal` built from primitives already
//! in use elsewhere in this crate: an ephemeral X25519 keypair is generated
//! per call, Diffie-Hellman against the recipient's static public key
//! produces a shared secret, HKDF-SHA256 (with both public keys mixed into
//! the info string for domain separation) derives a one-time AEAD key, and
//! ChaCha20-Poly1305 seals the plaintext under a random 96-bit nonce.
//!
//! ## Wire format
//!
//! `ephemeral_public_key (32 bytes) || nonce (12 bytes) || aead_ciphertext`

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{MixnetError, Result};

const EPHEMERAL_PK_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const HKDF_INFO: &[u8] = b"mixnet-sealed-box-v1";

/// Encrypt `plaintext` under `recipient_public`. Non-deterministic: a fresh
/// ephemeral keypair and nonce are drawn on every call.
pub fn seal(recipient_public: &PublicKey, plaintext: &[u8]) -> Vec<u8> {
    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(recipient_public);
    let key = derive_key(&shared, &ephemeral_public, recipient_public);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = ChaCha20Poly1305::new((&key).into());
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("chacha20poly1305 seal with correctly sized key/nonce cannot fail");

    let mut out = Vec::with_capacity(EPHEMERAL_PK_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt a sealed box produced by [`seal`] under `recipient_secret`.
/// Fails if the ciphertext was tampered with or sealed to a different key.
pub fn unseal(recipient_secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < EPHEMERAL_PK_LEN + NONCE_LEN {
        return Err(MixnetError::Crypto("sealed box too short".to_string()));
    }

    let (ephemeral_pk_bytes, rest) = sealed.split_at(EPHEMERAL_PK_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let ephemeral_public = PublicKey::from(
        <[u8; EPHEMERAL_PK_LEN]>::try_from(ephemeral_pk_bytes)
            .map_err(|_| MixnetError::Crypto("malformed ephemeral key".to_string()))?,
    );
    let recipient_public = PublicKey::from(recipient_secret);

    let shared = recipient_secret.diffie_hellman(&ephemeral_public);
    let key = derive_key(&shared, &ephemeral_public, &recipient_public);

    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new((&key).into());
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| MixnetError::Crypto("decryption failed".to_string()))
}

fn derive_key(
    shared_secret: &x25519_dalek::SharedSecret,
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut info = Vec::with_capacity(HKDF_INFO.len() + 64);
    info.extend_from_slice(HKDF_INFO);
    info.extend_from_slice(ephemeral_public.as_bytes());
    info.extend_from_slice(recipient_public.as_bytes());

    let mut key = [0u8; 32];
    hk.expand(&info, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    #[test]
    fn round_trip() {
        let (secret, public) = keypair();
        let plaintext = b"Hello, client2!";
        let sealed = seal(&public, plaintext);
        let opened = unseal(&secret, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let (_, public) = keypair();
        let (other_secret, _) = keypair();
        let sealed = seal(&public, b"secret");
        assert!(unseal(&other_secret, &sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (secret, public) = keypair();
        let mut sealed = seal(&public, b"secret");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(unseal(&secret, &sealed).is_err());
    }

    #[test]
    fn repeated_seals_are_unlinkable() {
        let (_, public) = keypair();
        let a = seal(&public, b"same message");
        let b = seal(&public, b"same message");
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let (secret, _) = keypair();
        assert!(unseal(&secret, &[0u8; 4]).is_err());
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let (secret, public) = keypair();
        let sealed = seal(&public, b"");
        assert_eq!(unseal(&secret, &sealed).unwrap(), b"");
    }
}
