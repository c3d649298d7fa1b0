//! Host metadata reported by machines.
//!
//! Stored verbatim as JSON on the machine row and decoded on read. Field
//! names follow the wire format clients already speak.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(rename = "OS", default)]
    pub os: String,
    #[serde(rename = "Hostname", default)]
    pub hostname: String,
    #[serde(rename = "IPNVersion", default)]
    pub ipn_version: String,
    /// Prefixes the machine offers to route (subnets and exit routes).
    #[serde(rename = "RoutableIPs", default)]
    pub routable_ips: Vec<String>,
    #[serde(rename = "NetInfo", default, skip_serializing_if = "Option::is_none")]
    pub net_info: Option<NetInfo>,
}

/// NAT traversal and relay measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetInfo {
    #[serde(rename = "MappingVariesByDestIP", default)]
    pub mapping_varies_by_dest_ip: Option<bool>,
    #[serde(rename = "HairPinning", default)]
    pub hair_pinning: Option<bool>,
    #[serde(rename = "WorkingIPv6", default)]
    pub working_ipv6: Option<bool>,
    #[serde(rename = "WorkingUDP", default)]
    pub working_udp: Option<bool>,
    #[serde(rename = "UPnP", default)]
    pub upnp: Option<bool>,
    #[serde(rename = "PMP", default)]
    pub pmp: Option<bool>,
    #[serde(rename = "PCP", default)]
    pub pcp: Option<bool>,
    /// Relay the client itself prefers; 0 means none.
    #[serde(rename = "PreferredDERP", default)]
    pub preferred_derp: i64,
    /// Latency per relay and address family, in seconds.
    #[serde(rename = "DERPLatency", default)]
    pub derp_latency: HashMap<String, f64>,
}

impl HostInfo {
    /// Decode a stored host-info blob; unreadable blobs decode as empty.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// NAT capability flags as shown in the console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NatFlags {
    pub varies: bool,
    pub hair_pinning: bool,
    pub ipv6: bool,
    pub udp: bool,
    pub upnp: bool,
    pub pcp: bool,
    pub pmp: bool,
}

impl NatFlags {
    pub fn from_net_info(net_info: Option<&NetInfo>) -> Self {
        let Some(ni) = net_info else {
            return Self::default();
        };
        let yes = |flag: Option<bool>| flag == Some(true);
        Self {
            varies: yes(ni.mapping_varies_by_dest_ip),
            hair_pinning: yes(ni.hair_pinning),
            ipv6: yes(ni.working_ipv6),
            udp: yes(ni.working_udp),
            upnp: yes(ni.upnp),
            pcp: yes(ni.pcp),
            pmp: yes(ni.pmp),
        }
    }
}
