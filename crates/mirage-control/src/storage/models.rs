//! Data models for Mirage control storage.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::hostinfo::HostInfo;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub magic_dns_domain: String,
    /// Key lifetime (days) given to newly activated machines. 0 disables expiry.
    pub expiry_days: i64,
    pub acl_policy: String,
    pub created_at: i64,
}

impl Organization {
    /// Parsed ACL policy; an unreadable policy grants no tags.
    pub fn policy(&self) -> AclPolicy {
        serde_json::from_str(&self.acl_policy).unwrap_or_default()
    }

    /// Expiry for a key issued at `now`, or `None` when the organization
    /// does not expire keys.
    pub const fn key_expiry_from(&self, now: i64) -> Option<i64> {
        if self.expiry_days <= 0 {
            return None;
        }
        Some(now.saturating_add(self.expiry_days.saturating_mul(86_400)))
    }
}

/// The part of an organization's ACL policy the control plane interprets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclPolicy {
    #[serde(rename = "tagOwners", default)]
    pub tag_owners: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PreAuthKey {
    pub key: String,
    pub user_id: i64,
    pub reusable: bool,
    pub ephemeral: bool,
    pub used: bool,
    /// Unix seconds; 0 = never expires.
    pub expiration: i64,
    pub acl_tags: String,
    pub created_at: i64,
}

impl PreAuthKey {
    pub fn acl_tags(&self) -> Vec<String> {
        serde_json::from_str(&self.acl_tags).unwrap_or_default()
    }

    pub const fn is_expired(&self, now: i64) -> bool {
        self.expiration != 0 && self.expiration <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Machine {
    pub id: i64,
    /// Bare hex; see `NodeKey`.
    pub node_key: String,
    /// Bare hex, empty until the first authenticated request binds it.
    pub machine_key: String,
    pub user_id: i64,
    pub organization_id: i64,
    pub ipv4: String,
    pub ipv6: String,
    pub hostname: String,
    pub given_name: String,
    pub auto_gen_name: bool,
    pub ephemeral: bool,
    pub forced_tags: String,
    pub host_info: String,
    pub endpoints: String,
    /// Unix seconds; 0 = never expires.
    pub expiry: i64,
    pub last_seen: i64,
    pub created_at: i64,
}

impl Machine {
    pub fn forced_tags(&self) -> Vec<String> {
        serde_json::from_str(&self.forced_tags).unwrap_or_default()
    }

    pub fn host_info(&self) -> HostInfo {
        HostInfo::from_json(&self.host_info)
    }

    pub fn endpoints(&self) -> Vec<String> {
        serde_json::from_str(&self.endpoints).unwrap_or_default()
    }

    pub const fn never_expires(&self) -> bool {
        self.expiry == 0
    }

    pub const fn is_expired(&self, now: i64) -> bool {
        self.expiry != 0 && self.expiry <= now
    }

    pub const fn is_online(&self, now: i64, window_secs: i64) -> bool {
        self.last_seen > 0 && now - self.last_seen <= window_secs
    }

    /// The address pair, IPv4 first regardless of how it was stored.
    pub fn addresses(&self) -> Vec<String> {
        let mut pair = [self.ipv4.as_str(), self.ipv6.as_str()];
        if pair[1].parse::<IpAddr>().is_ok_and(|ip| ip.is_ipv4()) {
            pair.swap(0, 1);
        }
        pair.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Route {
    pub id: i64,
    pub machine_id: i64,
    /// Canonical CIDR text.
    pub prefix: String,
    pub advertised: bool,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Route {
    /// Default routes (`0.0.0.0/0`, `::/0`) make a machine an exit node.
    pub fn is_exit_route(&self) -> bool {
        crate::routes::is_exit_prefix(&self.prefix)
    }
}

/// A satellite relay-trust node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct NaviNode {
    #[serde(rename = "ID")]
    pub id: String,
    /// 0 = global scope.
    #[serde(rename = "OrgID")]
    pub org_id: i64,
    pub hostname: String,
    /// Bare hex of the bound transport key, empty until first registration.
    pub navi_key: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(ipv4: &str, ipv6: &str) -> Machine {
        Machine {
            id: 1,
            node_key: String::new(),
            machine_key: String::new(),
            user_id: 1,
            organization_id: 1,
            ipv4: ipv4.into(),
            ipv6: ipv6.into(),
            hostname: String::new(),
            given_name: String::new(),
            auto_gen_name: true,
            ephemeral: false,
            forced_tags: "[]".into(),
            host_info: "{}".into(),
            endpoints: "[]".into(),
            expiry: 0,
            last_seen: 0,
            created_at: 0,
        }
    }

    #[test]
    fn addresses_are_ipv4_first() {
        let m = machine("100.64.0.1", "fd7a:115c:a1e0::1");
        assert_eq!(m.addresses(), vec!["100.64.0.1", "fd7a:115c:a1e0::1"]);

        let swapped = machine("fd7a:115c:a1e0::1", "100.64.0.1");
        assert_eq!(swapped.addresses(), vec!["100.64.0.1", "fd7a:115c:a1e0::1"]);
    }

    #[test]
    fn zero_expiry_never_expires() {
        let mut m = machine("100.64.0.1", "fd7a:115c:a1e0::1");
        assert!(m.never_expires());
        assert!(!m.is_expired(i64::MAX));

        m.expiry = 100;
        assert!(m.is_expired(100));
        assert!(!m.is_expired(99));
    }

    #[test]
    fn policy_reads_tag_owners() {
        let org = Organization {
            id: 1,
            name: "acme".into(),
            magic_dns_domain: "acme.mirage".into(),
            expiry_days: 180,
            acl_policy: r#"{"tagOwners":{"tag:server":["alice"]}}"#.into(),
            created_at: 0,
        };
        assert!(org.policy().tag_owners.contains_key("tag:server"));
    }

    #[test]
    fn key_expiry_follows_org_setting() {
        let mut org = Organization {
            id: 1,
            name: "acme".into(),
            magic_dns_domain: "acme.mirage".into(),
            expiry_days: 2,
            acl_policy: String::new(),
            created_at: 0,
        };
        assert_eq!(org.key_expiry_from(1_000), Some(1_000 + 2 * 86_400));

        org.expiry_days = 0;
        assert_eq!(org.key_expiry_from(1_000), None);
        org.expiry_days = -5;
        assert_eq!(org.key_expiry_from(1_000), None);
    }
}
