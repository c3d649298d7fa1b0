//! Tailnet address allocation.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};

use crate::error::{ControlError, Result};

/// Hands out the lowest free host address in each configured prefix.
#[derive(Debug, Clone)]
pub struct IpAllocator {
    v4: Ipv4Network,
    v6: Ipv6Network,
}

impl IpAllocator {
    pub fn new(v4: &str, v6: &str) -> Result<Self> {
        let v4 = v4
            .parse()
            .map_err(|e| ControlError::Invalid(format!("IPv4 prefix {v4}: {e}")))?;
        let v6 = v6
            .parse()
            .map_err(|e| ControlError::Invalid(format!("IPv6 prefix {v6}: {e}")))?;
        Ok(Self { v4, v6 })
    }

    /// Pick an unused address pair. `used` holds every address already assigned.
    pub fn allocate(&self, used: &HashSet<IpAddr>) -> Result<(Ipv4Addr, Ipv6Addr)> {
        let v4 = next_free(
            u128::from(u32::from(self.v4.network())),
            u128::from(u32::from(self.v4.broadcast())),
            |n| u32::try_from(n).ok().map(|n| IpAddr::V4(Ipv4Addr::from(n))),
            used,
        )
        .ok_or_else(|| ControlError::Invalid(format!("IPv4 prefix {} exhausted", self.v4)))?;

        let host_mask = u128::MAX
            .checked_shr(u32::from(self.v6.prefix()))
            .unwrap_or(0);
        let v6_last = u128::from(self.v6.network()) | host_mask;
        let v6 = next_free(
            u128::from(self.v6.network()),
            v6_last,
            |n| Some(IpAddr::V6(Ipv6Addr::from(n))),
            used,
        )
        .ok_or_else(|| ControlError::Invalid(format!("IPv6 prefix {} exhausted", self.v6)))?;

        match (v4, v6) {
            (IpAddr::V4(a), IpAddr::V6(b)) => Ok((a, b)),
            _ => Err(ControlError::Invalid("address family mix-up".into())),
        }
    }
}

/// Lowest address strictly between `network` and `last` not in `used`.
fn next_free(
    network: u128,
    last: u128,
    to_addr: impl Fn(u128) -> Option<IpAddr>,
    used: &HashSet<IpAddr>,
) -> Option<IpAddr> {
    let mut n = network.checked_add(1)?;
    while n < last {
        let addr = to_addr(n)?;
        if !used.contains(&addr) {
            return Some(addr);
        }
        n += 1;
    }
    None
}

/// Collect stored address pairs into a lookup set; unparseable entries are skipped.
pub fn used_set(pairs: &[(String, String)]) -> HashSet<IpAddr> {
    pairs
        .iter()
        .flat_map(|(a, b)| [a, b])
        .filter_map(|s| s.parse().ok())
        .collect()
}
