//! Console request and response bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::relay::PreferredRelay;
use crate::routes::RouteView;
use crate::tags::TagResolution;

/// Every console response is HTTP 200 with this envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            error_message: String::new(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user_id: i64,
    pub display_name: String,
}

/// `POST /console/machines/update` body: a machine id plus one action.
///
/// Every action field is required; a missing one fails decoding before any
/// machine is touched.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub mid: String,
    #[serde(flatten)]
    pub action: MachineUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum MachineUpdate {
    SetExpires,
    RenameNode {
        #[serde(rename = "nodeName")]
        node_name: String,
    },
    SetRouteSettings {
        #[serde(rename = "allowedIPs")]
        allowed_ips: Vec<String>,
        #[serde(rename = "allowedExitNode")]
        allowed_exit_node: bool,
    },
    SetTags { tags: Vec<String> },
}

/// Result of one update action.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UpdateData {
    Expiry(ExpiryData),
    Name(NameData),
    Routes(RouteView),
    Tags(TagResolution),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryData {
    pub never_expires: bool,
    pub expires: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameData {
    pub name: String,
    pub automatic_name_mode: bool,
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub mid: String,
}

/// Removal keeps its own flat shape: `{ status, errmsg }`.
#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub status: &'static str,
    pub errmsg: String,
}

impl RemoveResponse {
    pub const fn ok() -> Self {
        Self {
            status: "OK",
            errmsg: String::new(),
        }
    }

    pub const fn error(errmsg: String) -> Self {
        Self {
            status: "Error",
            errmsg,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MachineList {
    pub basedomain: String,
    /// Keyed by machine id.
    pub machines: BTreeMap<String, MachineItem>,
}

/// One machine row as the console renders it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineItem {
    pub id: String,
    pub name: String,
    pub automatic_name_mode: bool,
    pub user: String,
    pub user_name_head: String,
    /// IPv4 first.
    pub addresses: Vec<String>,
    pub os: String,
    pub hostname: String,
    pub ipn_version: String,
    pub connected_to_control: bool,
    pub last_seen: i64,
    pub created: i64,
    pub is_ephemeral: bool,
    pub never_expires: bool,
    pub expiry_desc: String,
    pub endpoints: Vec<String>,
    /// Latency in ms per relay.
    pub derps: Option<BTreeMap<String, i64>>,
    pub pref_derp: PreferredRelay,
    #[serde(flatten)]
    pub routes: RouteView,
    #[serde(flatten)]
    pub tags: TagResolution,
    pub varies: bool,
    pub hairpinning: bool,
    #[serde(rename = "ipv6en")]
    pub ipv6_enabled: bool,
    #[serde(rename = "udpen")]
    pub udp_enabled: bool,
    #[serde(rename = "upnpen")]
    pub upnp_enabled: bool,
    #[serde(rename = "pcpen")]
    pub pcp_enabled: bool,
    #[serde(rename = "pmpen")]
    pub pmp_enabled: bool,
}
