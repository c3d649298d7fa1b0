//! Plaintext payloads carried inside the secure channel.

use std::collections::BTreeMap;

use mirage_crypto::NodeKey;
use serde::{Deserialize, Serialize};

use crate::hostinfo::HostInfo;
use crate::storage::{NaviNode, User};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterRequest {
    pub node_key: NodeKey,
    #[serde(default)]
    pub old_node_key: Option<NodeKey>,
    #[serde(default)]
    pub auth: Option<AuthInfo>,
    /// Requested key expiry (Unix seconds). A past instant logs the node out.
    #[serde(default)]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub hostinfo: Option<HostInfo>,
    #[serde(default)]
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthInfo {
    pub auth_key: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterResponse {
    pub user: UserInfo,
    pub machine_authorized: bool,
    pub node_key_expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineSnapshot>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl RegisterResponse {
    /// Refusal that creates nothing.
    pub fn rejected(reason: &str) -> Self {
        Self {
            error: reason.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserInfo {
    #[serde(rename = "ID")]
    pub id: i64,
    pub login_name: String,
    pub display_name: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            login_name: user.name.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

/// A machine as seen by itself and its peers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineSnapshot {
    #[serde(rename = "ID")]
    pub id: i64,
    pub node_key: String,
    pub name: String,
    pub hostname: String,
    pub addresses: Vec<String>,
    /// Own addresses as host prefixes, then enabled advertised routes.
    #[serde(rename = "AllowedIPs")]
    pub allowed_ips: Vec<String>,
    /// Tags the organization's policy recognises.
    pub tags: Vec<String>,
    pub endpoints: Vec<String>,
    pub expiry: i64,
    pub last_seen: i64,
    pub online: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapRequest {
    pub node_key: NodeKey,
    #[serde(default)]
    pub hostinfo: Option<HostInfo>,
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapResponse {
    pub machine: MachineSnapshot,
    pub peers: Vec<MachineSnapshot>,
    pub domain: String,
    pub key_expired: bool,
}

/// Body of both Navi endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct NaviRequest {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NaviRegisterResponse {
    pub node_info: NaviNode,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustListResponse {
    /// `nodekey:<hex>` → reserved (always empty).
    pub trust_nodes_list: BTreeMap<String, String>,
    pub timestamp: i64,
}
