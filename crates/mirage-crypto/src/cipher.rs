//! Symmetric cipher shared by one peer and the control server.
//!
//! Both ends hold long-lived X25519 keys, so every request between the same
//! pair derives the same key. Nonces are therefore drawn at random per frame
//! rather than counted, and each frame is bound to its sender.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::MachineKey;

const HKDF_SALT: &[u8] = b"mirage-control-hkdf-salt-v1";
const HKDF_LABEL: &[u8] = b"mirage-control-channel-v1";

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// AEAD key for one (peer, server) pair.
pub struct PairCipher {
    cipher: ChaCha20Poly1305,
}

/// HKDF info: label followed by both public keys, smaller first.
fn pair_info(a: &MachineKey, b: &MachineKey) -> Vec<u8> {
    let (lo, hi) = if a.as_bytes() <= b.as_bytes() { (a, b) } else { (b, a) };
    let mut info = Vec::with_capacity(HKDF_LABEL.len() + 64);
    info.extend_from_slice(HKDF_LABEL);
    info.extend_from_slice(lo.as_bytes());
    info.extend_from_slice(hi.as_bytes());
    info
}

impl PairCipher {
    /// ECDH between `local_secret` and `remote`, then HKDF-SHA256 bound to both keys.
    pub fn derive(
        local_secret: &StaticSecret,
        local: &MachineKey,
        remote: &MachineKey,
    ) -> Result<Self, CryptoError> {
        let shared = local_secret.diffie_hellman(&PublicKey::from(*remote.as_bytes()));
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(&pair_info(local, remote), &mut key[..])
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key[..])),
        })
    }

    /// Seal `plaintext` as sent by `sender`; returns the fresh nonce and ciphertext.
    pub fn seal(
        &self,
        sender: &MachineKey,
        plaintext: &[u8],
    ) -> Result<([u8; NONCE_SIZE], Vec<u8>), CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let payload = Payload {
            msg: plaintext,
            aad: sender.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok((nonce, ciphertext))
    }

    /// Open a frame that claims to come from `sender`.
    pub fn open(
        &self,
        sender: &MachineKey,
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: nonce.len(),
            });
        }
        let payload = Payload {
            msg: ciphertext,
            aad: sender.as_bytes(),
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::StaticKeyPair;

    fn ciphers(a: &StaticKeyPair, b: &StaticKeyPair) -> (PairCipher, PairCipher) {
        let at_a = PairCipher::derive(a.secret(), &a.public_key(), &b.public_key()).unwrap();
        let at_b = PairCipher::derive(b.secret(), &b.public_key(), &a.public_key()).unwrap();
        (at_a, at_b)
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let machine = StaticKeyPair::generate();
        let server = StaticKeyPair::generate();
        let (at_machine, at_server) = ciphers(&machine, &server);

        let (nonce, ct) = at_machine
            .seal(&machine.public_key(), b"{\"NodeKey\":\"nodekey:00\"}")
            .unwrap();
        let opened = at_server.open(&machine.public_key(), &nonce, &ct).unwrap();
        assert_eq!(opened, b"{\"NodeKey\":\"nodekey:00\"}");
    }

    #[test]
    fn other_pair_cannot_open() {
        let machine = StaticKeyPair::generate();
        let server = StaticKeyPair::generate();
        let stranger = StaticKeyPair::generate();
        let (at_machine, _) = ciphers(&machine, &server);
        let (_, stranger_server) = ciphers(&stranger, &server);

        let (nonce, ct) = at_machine.seal(&machine.public_key(), b"secret").unwrap();
        assert!(matches!(
            stranger_server.open(&machine.public_key(), &nonce, &ct),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn sender_is_authenticated() {
        let machine = StaticKeyPair::generate();
        let server = StaticKeyPair::generate();
        let (at_machine, at_server) = ciphers(&machine, &server);

        // A frame the server sealed must not pass as one from the machine.
        let (nonce, ct) = at_server.seal(&server.public_key(), b"reply").unwrap();
        assert!(at_machine.open(&machine.public_key(), &nonce, &ct).is_err());
        assert_eq!(
            at_machine.open(&server.public_key(), &nonce, &ct).unwrap(),
            b"reply"
        );
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let machine = StaticKeyPair::generate();
        let server = StaticKeyPair::generate();
        let (at_machine, at_server) = ciphers(&machine, &server);

        let (nonce, mut ct) = at_machine.seal(&machine.public_key(), b"secret").unwrap();
        ct[0] ^= 0xFF;
        assert!(at_server.open(&machine.public_key(), &nonce, &ct).is_err());
    }

    #[test]
    fn short_nonce_rejected() {
        let machine = StaticKeyPair::generate();
        let server = StaticKeyPair::generate();
        let (_, at_server) = ciphers(&machine, &server);
        assert!(matches!(
            at_server.open(&machine.public_key(), &[0u8; 8], b"ciphertext"),
            Err(CryptoError::InvalidNonceLength { expected: 12, actual: 8 })
        ));
    }

    #[test]
    fn nonces_differ_across_ciphers_for_the_same_pair() {
        let machine = StaticKeyPair::generate();
        let server = StaticKeyPair::generate();
        let mut seen = std::collections::HashSet::new();
        // Each request builds a fresh cipher, so uniqueness cannot rely on state.
        for _ in 0..200 {
            let (at_machine, _) = ciphers(&machine, &server);
            let (nonce, _) = at_machine.seal(&machine.public_key(), b"x").unwrap();
            assert!(seen.insert(nonce));
        }
    }
}
