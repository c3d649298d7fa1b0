//! Relay preference selection.
//!
//! Clients report one latency sample per relay and address family
//! (`"<relay>-v4"`, `"<relay>-v6"`). Operators see one value per relay.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::hostinfo::NetInfo;

/// The relay a machine prefers. Serializes as the relay id, or `"x"` for none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredRelay {
    None,
    Relay(i64),
}

impl Serialize for PreferredRelay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_str("x"),
            Self::Relay(id) => serializer.collect_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPreference {
    /// Milliseconds per relay; `None` when the client reported no preference.
    pub latencies: Option<BTreeMap<String, i64>>,
    pub preferred: PreferredRelay,
}

#[allow(clippy::cast_possible_truncation)]
fn to_millis(secs: f64) -> i64 {
    (secs * 1000.0) as i64
}

/// Collapse per-family samples into one latency per relay.
///
/// IPv4 wins only when strictly faster than the IPv6 sample of the same
/// relay; on a tie IPv6 is kept. Keys without a family suffix pass through.
pub fn select_relays(net_info: Option<&NetInfo>) -> RelayPreference {
    let Some(ni) = net_info.filter(|ni| ni.preferred_derp != 0) else {
        return RelayPreference {
            latencies: None,
            preferred: PreferredRelay::None,
        };
    };

    let mut latencies = BTreeMap::new();
    for (key, &secs) in &ni.derp_latency {
        let Some((relay, family)) = key.rsplit_once('-') else {
            latencies.insert(key.clone(), to_millis(secs));
            continue;
        };
        let sibling = match family {
            "v4" => ni.derp_latency.get(&format!("{relay}-v6")),
            "v6" => ni.derp_latency.get(&format!("{relay}-v4")),
            _ => {
                latencies.insert(key.clone(), to_millis(secs));
                continue;
            }
        };
        let keep = match (family, sibling) {
            (_, None) => true,
            ("v4", Some(&v6)) => secs < v6,
            (_, Some(&v4)) => secs <= v4,
        };
        if keep {
            latencies.insert(relay.to_string(), to_millis(secs));
        }
    }

    RelayPreference {
        latencies: Some(latencies),
        preferred: PreferredRelay::Relay(ni.preferred_derp),
    }
}
