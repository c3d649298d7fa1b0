//! Navi (satellite relay) registration and trust-list polling.

use std::collections::BTreeMap;

use mirage_core::db::unix_timestamp;
use mirage_crypto::{MachineKey, NodeKey};
use tracing::{info, instrument, warn};

use super::ProtocolHandler;
use super::types::{NaviRegisterResponse, NaviRequest, TrustListResponse};
use crate::error::{ControlError, Result};

impl ProtocolHandler {
    /// Bind the caller's key to a provisioned Navi node.
    ///
    /// Binding happens once; later registrations must come from the same key.
    #[instrument(skip(self, req), fields(navi_id = %req.id))]
    pub async fn register_navi(
        &self,
        peer: MachineKey,
        req: NaviRequest,
    ) -> Result<NaviRegisterResponse> {
        let node = self
            .db
            .get_navi_node(&req.id)
            .await
            .map_err(ControlError::from_lookup)?;

        if !self.db.bind_navi_key(&node.id, &peer.raw_hex()).await? {
            warn!("Navi node already bound to another key");
            return Err(ControlError::KeyMismatch(format!("navi node {}", node.id)));
        }

        let node = self.db.get_navi_node(&node.id).await?;
        info!(org_id = node.org_id, "Navi node registered");
        Ok(NaviRegisterResponse {
            node_info: node,
            timestamp: unix_timestamp(),
        })
    }

    /// Node keys of the machines a Navi node should relay for.
    ///
    /// Global nodes (`org_id == 0`) trust every machine.
    #[instrument(skip(self, req), fields(navi_id = %req.id))]
    pub async fn navi_trust_list(
        &self,
        peer: MachineKey,
        req: NaviRequest,
    ) -> Result<TrustListResponse> {
        let node = self
            .db
            .get_navi_node(&req.id)
            .await
            .map_err(ControlError::from_lookup)?;

        let bound = !node.navi_key.is_empty() && MachineKey::parse(&node.navi_key)?.ct_matches(&peer);
        if !bound {
            warn!("Navi poll from unbound or foreign key");
            return Err(ControlError::KeyMismatch(format!("navi node {}", node.id)));
        }

        let machines = if node.org_id == 0 {
            self.db.list_machines().await?
        } else {
            self.db.list_machines_by_org(node.org_id).await?
        };
        let trust_nodes_list: BTreeMap<String, String> = machines
            .iter()
            .map(|m| (format!("{}{}", NodeKey::PREFIX, m.node_key), String::new()))
            .collect();

        Ok(TrustListResponse {
            trust_nodes_list,
            timestamp: unix_timestamp(),
        })
    }
}
