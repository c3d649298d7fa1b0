//! Authenticated encrypted channel between a peer and the control server.
//!
//! The protocol handlers only ever see [`SecureChannel`]: the peer's
//! authenticated machine key plus encrypt/decrypt of opaque payloads.
//! [`PeerChannel`] is the concrete implementation: both sides derive the same
//! key from static-static X25519, so only the holder of the peer's secret key
//! can produce frames the server can open.

use crate::cipher::{NONCE_SIZE, PairCipher};
use crate::error::CryptoError;
use crate::identity::StaticKeyPair;
use crate::keys::MachineKey;

/// Length prefix size in bytes.
const LEN_PREFIX: usize = 4;

/// The secure channel as consumed by request handlers.
pub trait SecureChannel: Send + Sync {
    /// Authenticated key of the remote end.
    fn peer(&self) -> MachineKey;

    /// Open one frame received from the peer.
    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Seal `plaintext` into one frame for the peer.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Static-static X25519 channel.
pub struct PeerChannel {
    local: MachineKey,
    peer: MachineKey,
    cipher: PairCipher,
}

impl PeerChannel {
    /// Open a channel from `local` to the holder of `peer`.
    ///
    /// The server calls this with the key a machine claims; the machine calls
    /// it with the server's pinned public key. Both ends derive the same key.
    pub fn establish(local: &StaticKeyPair, peer: MachineKey) -> Result<Self, CryptoError> {
        let local_key = local.public_key();
        let cipher = PairCipher::derive(local.secret(), &local_key, &peer)?;
        Ok(Self {
            local: local_key,
            peer,
            cipher,
        })
    }
}

impl SecureChannel for PeerChannel {
    fn peer(&self) -> MachineKey {
        self.peer
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (nonce, ciphertext) = decode_frame(payload)?;
        self.cipher.open(&self.peer, nonce, ciphertext)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (nonce, ciphertext) = self.cipher.seal(&self.local, plaintext)?;
        encode_frame(&nonce, &ciphertext)
    }
}

/// Frame layout: `[u32 BE body length][12-byte nonce][ciphertext]`.
pub fn encode_frame(nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let body_len = u32::try_from(NONCE_SIZE + ciphertext.len())
        .map_err(|_| CryptoError::MalformedFrame("payload too large".into()))?;
    let mut out = Vec::with_capacity(LEN_PREFIX + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&body_len.to_be_bytes());
    out.extend_from_slice(nonce);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

/// Split a frame into `(nonce, ciphertext)`; the length prefix must match exactly.
pub fn decode_frame(frame: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    let (len_bytes, body) = frame
        .split_first_chunk::<LEN_PREFIX>()
        .ok_or_else(|| CryptoError::MalformedFrame("missing length prefix".into()))?;
    let declared = u32::from_be_bytes(*len_bytes) as usize;
    if declared != body.len() {
        return Err(CryptoError::MalformedFrame(format!(
            "length prefix says {declared} bytes, got {}",
            body.len()
        )));
    }
    if body.len() < NONCE_SIZE {
        return Err(CryptoError::MalformedFrame("frame shorter than nonce".into()));
    }
    Ok(body.split_at(NONCE_SIZE))
}
