//! Encrypted machine and Navi protocol.
//!
//! Every request body is one sealed frame from [`SecureChannel`]; the
//! plaintext is JSON. Handlers work on the decoded request plus the channel's
//! authenticated peer key and return a plain response for the caller to seal.

mod machine;
mod navi;
pub mod types;

#[cfg(test)]
mod machine_tests;
#[cfg(test)]
mod navi_tests;

use mirage_crypto::SecureChannel;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::ipalloc::IpAllocator;
use crate::locks::KeyedLocks;
use crate::storage::ControlDatabase;

/// Shared state of the protocol endpoints.
pub struct ProtocolHandler {
    db: ControlDatabase,
    allocator: IpAllocator,
    /// Registration is serialized per node key.
    node_locks: KeyedLocks,
    /// Address allocation and insert run one at a time.
    alloc_lock: Mutex<()>,
    online_window_secs: i64,
}

impl ProtocolHandler {
    pub fn new(db: ControlDatabase, allocator: IpAllocator, online_window_secs: i64) -> Self {
        Self {
            db,
            allocator,
            node_locks: KeyedLocks::new(),
            alloc_lock: Mutex::new(()),
            online_window_secs,
        }
    }
}

/// Decrypt one frame and decode its JSON body.
pub fn open_request<T: DeserializeOwned>(channel: &dyn SecureChannel, frame: &[u8]) -> Result<T> {
    let plaintext = channel.decrypt(frame)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Encode a response as JSON and seal it into one frame.
pub fn seal_response<T: Serialize>(channel: &dyn SecureChannel, value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    Ok(channel.encrypt(&json)?)
}
