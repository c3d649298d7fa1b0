//! `Mirage` channel cryptography.
//!
//! Provides the key material and the encrypted request/response channel that
//! machines and Navi nodes use to talk to the control server.
//!
//! ## Crypto primitives
//!
//! - **Keys**: 32-byte X25519 public keys, rendered as `mkey:<hex>` (transport)
//!   and `nodekey:<hex>` (node identity)
//! - **Channel**: static-static X25519 ECDH → HKDF-SHA256 (bound to both keys) → symmetric key
//! - **Encryption**: ChaCha20-Poly1305 AEAD, random 12-byte nonce, sender key as associated data
//! - **Framing**: `[u32 BE length][nonce][ciphertext]`

pub mod channel;
pub mod cipher;
pub mod error;
pub mod identity;
pub mod keys;

pub use channel::{PeerChannel, SecureChannel, decode_frame, encode_frame};
pub use error::CryptoError;
pub use identity::StaticKeyPair;
pub use keys::{MachineKey, NodeKey};
pub use cipher::{NONCE_SIZE, PairCipher};
