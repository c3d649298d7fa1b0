//! Public key types exchanged with machines.
//!
//! Keys travel as `<prefix>:<64 hex chars>`. Storage keeps the bare hex form;
//! the canonical prefixed form is what peers see.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

macro_rules! public_key_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Hash, PartialEq, Eq)]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            /// Hex without the prefix, as stored in the database.
            pub fn raw_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Constant-time comparison against another key.
            pub fn ct_matches(&self, other: &Self) -> bool {
                self.0.ct_eq(&other.0).into()
            }

            /// Parse either the prefixed or the bare hex form.
            pub fn parse(s: &str) -> Result<Self, CryptoError> {
                let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
                let bytes = hex::decode(raw)
                    .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
                let arr: [u8; KEY_LEN] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| CryptoError::InvalidKeyLength {
                            expected: KEY_LEN,
                            actual: bytes.len(),
                        })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", Self::PREFIX, self.raw_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = CryptoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

public_key_type!(
    /// Transport key of a machine or Navi node; the identity the secure
    /// channel authenticates.
    MachineKey,
    "mkey:"
);

public_key_type!(
    /// Node key a machine registers under; rotates on re-authentication.
    NodeKey,
    "nodekey:"
);
