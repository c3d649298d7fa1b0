//! Mirage control server library.
//!
//! Coordination point of a mesh VPN: machines register over an encrypted
//! channel, receive addresses and a peer map, and operators administer them
//! through a cookie-authenticated console.
//!
//! The engine components (expiry, route and tag authorization, relay
//! preference) are plain functions over storage so the protocol handlers and
//! the console share them.

pub mod console;
pub mod error;
pub mod expiry;
pub mod hostinfo;
pub mod ipalloc;
pub mod locks;
pub mod naming;
pub mod protocol;
pub mod relay;
pub mod routes;
pub mod server;
pub mod storage;
pub mod tags;

#[cfg(test)]
mod test_helpers;

pub use error::{ControlError, Result};
