//! Machine registration and map polling.

use mirage_core::db::{DatabaseError, unix_timestamp};
use mirage_crypto::{MachineKey, NodeKey};
use tracing::{info, instrument, warn};

use super::ProtocolHandler;
use super::types::{
    MachineSnapshot, MapRequest, MapResponse, RegisterRequest, RegisterResponse, UserInfo,
};
use crate::error::{ControlError, Result};
use crate::hostinfo::HostInfo;
use crate::ipalloc::used_set;
use crate::naming::auto_name;
use crate::routes::{RouteView, sync_advertised_routes};
use crate::storage::{AclPolicy, Machine, NewMachine, Route};
use crate::tags::resolve_tags;

impl ProtocolHandler {
    /// Register, re-authenticate, rotate, or log out a machine.
    #[instrument(skip(self, req), fields(node_key = %req.node_key))]
    pub async fn register_machine(
        &self,
        peer: MachineKey,
        req: RegisterRequest,
    ) -> Result<RegisterResponse> {
        let node_hex = req.node_key.raw_hex();
        let _guard = self.node_locks.lock(&node_hex).await;

        match self.db.get_machine_by_node_key(&node_hex).await {
            Ok(machine) => self.refresh_known(peer, machine, &req).await,
            Err(DatabaseError::NotFound(_)) => {
                if let Some(old) = req.old_node_key {
                    if let Some(resp) = self.try_rotate(peer, old, &req).await? {
                        return Ok(resp);
                    }
                }
                match &req.auth {
                    Some(auth) => self.activate(peer, &req, &auth.auth_key).await,
                    None => {
                        info!("Unknown node key without auth key");
                        Ok(RegisterResponse::rejected(
                            "machine is not registered; an auth key is required",
                        ))
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handle a periodic poll: record liveness and return the peer map.
    #[instrument(skip(self, req), fields(node_key = %req.node_key))]
    pub async fn poll_machine(&self, peer: MachineKey, req: MapRequest) -> Result<MapResponse> {
        let mut machine = self
            .db
            .get_machine_by_node_key(&req.node_key.raw_hex())
            .await
            .map_err(ControlError::from_lookup)?;
        self.ensure_machine_key(&mut machine, peer).await?;

        match &req.hostinfo {
            Some(hi) => self.record_host_info(&machine, hi).await?,
            None => self.db.touch_machine(machine.id).await?,
        }
        if let Some(endpoints) = &req.endpoints {
            self.db.update_endpoints(machine.id, endpoints).await?;
        }
        let machine = self.db.get_machine(machine.id).await?;

        let org = self.db.get_organization(machine.organization_id).await?;
        let policy = org.policy();
        let now = unix_timestamp();
        let routes = self.db.get_machine_routes(machine.id).await?;
        let me = self.snapshot(&machine, &routes, &policy, now);

        let key_expired = machine.is_expired(now);
        let mut peers = Vec::new();
        if !key_expired {
            for other in self.db.list_machines_by_org(org.id).await? {
                if other.id == machine.id || other.is_expired(now) {
                    continue;
                }
                let routes = self.db.get_machine_routes(other.id).await?;
                peers.push(self.snapshot(&other, &routes, &policy, now));
            }
        }

        Ok(MapResponse {
            machine: me,
            peers,
            domain: org.magic_dns_domain,
            key_expired,
        })
    }

    async fn refresh_known(
        &self,
        peer: MachineKey,
        mut machine: Machine,
        req: &RegisterRequest,
    ) -> Result<RegisterResponse> {
        self.ensure_machine_key(&mut machine, peer).await?;

        let now = unix_timestamp();
        if let Some(expiry) = req.expiry.filter(|&e| e != 0 && e <= now) {
            if machine.ephemeral {
                let user = self.db.get_user(machine.user_id).await?;
                self.db.hard_delete_machine(machine.id).await?;
                info!(machine_id = machine.id, "Ephemeral machine logged out and removed");
                return Ok(RegisterResponse {
                    user: UserInfo::from(&user),
                    node_key_expired: true,
                    ..RegisterResponse::default()
                });
            }
            self.db.refresh_machine_expiry(machine.id, expiry).await?;
            machine.expiry = expiry;
            info!(machine_id = machine.id, "Machine logged out");
        }

        if let Some(hi) = &req.hostinfo {
            self.record_host_info(&machine, hi).await?;
        }
        self.respond(machine).await
    }

    /// Move an existing machine from `old` to the requested node key, if the
    /// caller holds the machine key bound to it.
    async fn try_rotate(
        &self,
        peer: MachineKey,
        old: NodeKey,
        req: &RegisterRequest,
    ) -> Result<Option<RegisterResponse>> {
        let mut machine = match self.db.get_machine_by_node_key(&old.raw_hex()).await {
            Ok(m) => m,
            Err(DatabaseError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if machine.machine_key.is_empty()
            || !MachineKey::parse(&machine.machine_key)?.ct_matches(&peer)
        {
            warn!(machine_id = machine.id, "Node key rotation from foreign machine key ignored");
            return Ok(None);
        }

        let new_hex = req.node_key.raw_hex();
        self.db.update_node_key(machine.id, &new_hex).await?;
        machine.node_key = new_hex;
        info!(machine_id = machine.id, "Node key rotated");

        if let Some(hi) = &req.hostinfo {
            self.record_host_info(&machine, hi).await?;
        }
        self.respond(machine).await.map(Some)
    }

    /// Create a machine authorized by a pre-auth key.
    async fn activate(
        &self,
        peer: MachineKey,
        req: &RegisterRequest,
        auth_key: &str,
    ) -> Result<RegisterResponse> {
        let key = match self.db.get_preauth_key(auth_key).await {
            Ok(k) => k,
            Err(DatabaseError::NotFound(_)) => {
                warn!("Registration with unknown auth key");
                return Ok(RegisterResponse::rejected("invalid auth key"));
            }
            Err(e) => return Err(e.into()),
        };
        let now = unix_timestamp();
        if key.is_expired(now) {
            return Ok(RegisterResponse::rejected("auth key expired"));
        }
        if !key.reusable && !self.db.mark_preauth_key_used(&key.key).await? {
            return Ok(RegisterResponse::rejected("auth key already used"));
        }

        let user = self.db.get_user(key.user_id).await?;
        let org = self.db.get_organization(user.organization_id).await?;
        let host_info = req.hostinfo.clone().unwrap_or_default();
        let node_hex = req.node_key.raw_hex();
        let given_name = self.unique_given_name(org.id, &host_info.hostname, &node_hex).await?;
        let expiry = org.key_expiry_from(now).unwrap_or(0);
        let tags = key.acl_tags();

        let created = {
            let _alloc = self.alloc_lock.lock().await;
            let used = used_set(&self.db.allocated_addresses().await?);
            let (ipv4, ipv6) = self.allocator.allocate(&used)?;
            self.db
                .create_machine(&NewMachine {
                    node_key: &node_hex,
                    machine_key: &peer.raw_hex(),
                    user_id: user.id,
                    organization_id: org.id,
                    ipv4: &ipv4.to_string(),
                    ipv6: &ipv6.to_string(),
                    hostname: &host_info.hostname,
                    given_name: &given_name,
                    ephemeral: key.ephemeral || req.ephemeral,
                    forced_tags: &tags,
                    host_info: &host_info.to_json(),
                    expiry,
                })
                .await
        };
        let machine = match created {
            Ok(m) => m,
            Err(DatabaseError::Conflict(detail)) => {
                warn!(%detail, "Machine insert raced; treating as known machine");
                let existing = self.db.get_machine_by_node_key(&node_hex).await?;
                return self.refresh_known(peer, existing, req).await;
            }
            Err(e) => return Err(e.into()),
        };

        sync_advertised_routes(&self.db, machine.id, &host_info.routable_ips).await?;
        info!(
            machine_id = machine.id,
            user = %user.name,
            ipv4 = %machine.ipv4,
            ephemeral = machine.ephemeral,
            "Machine registered"
        );
        self.respond(machine).await
    }

    /// Bind the peer's key on first contact, or check it against the bound one.
    async fn ensure_machine_key(&self, machine: &mut Machine, peer: MachineKey) -> Result<()> {
        if machine.machine_key.is_empty() {
            if self.db.bind_machine_key(machine.id, &peer.raw_hex()).await? {
                machine.machine_key = peer.raw_hex();
                info!(machine_id = machine.id, "Machine key bound");
                return Ok(());
            }
            *machine = self.db.get_machine(machine.id).await?;
        }
        let bound = MachineKey::parse(&machine.machine_key)?;
        if bound.ct_matches(&peer) {
            Ok(())
        } else {
            warn!(machine_id = machine.id, "Machine key mismatch");
            Err(ControlError::KeyMismatch(format!("machine {}", machine.id)))
        }
    }

    async fn record_host_info(&self, machine: &Machine, hi: &HostInfo) -> Result<()> {
        self.db
            .update_host_info(machine.id, &hi.hostname, &hi.to_json())
            .await?;
        sync_advertised_routes(&self.db, machine.id, &hi.routable_ips).await
    }

    async fn unique_given_name(&self, org_id: i64, hostname: &str, node_hex: &str) -> Result<String> {
        let base = auto_name(hostname);
        if !self.db.given_name_taken(org_id, &base, 0).await? {
            return Ok(base);
        }
        let suffix = node_hex.get(..8).unwrap_or(node_hex);
        Ok(format!("{base}-{suffix}"))
    }

    async fn respond(&self, machine: Machine) -> Result<RegisterResponse> {
        let user = self.db.get_user(machine.user_id).await?;
        let org = self.db.get_organization(machine.organization_id).await?;
        let routes = self.db.get_machine_routes(machine.id).await?;
        let now = unix_timestamp();
        Ok(RegisterResponse {
            user: UserInfo::from(&user),
            machine_authorized: true,
            node_key_expired: machine.is_expired(now),
            machine: Some(self.snapshot(&machine, &routes, &org.policy(), now)),
            error: String::new(),
        })
    }

    fn snapshot(
        &self,
        machine: &Machine,
        routes: &[Route],
        policy: &AclPolicy,
        now: i64,
    ) -> MachineSnapshot {
        let addresses = machine.addresses();
        let mut allowed_ips: Vec<String> = addresses
            .iter()
            .map(|a| {
                if a.contains(':') {
                    format!("{a}/128")
                } else {
                    format!("{a}/32")
                }
            })
            .collect();
        allowed_ips.extend(RouteView::served_prefixes(routes));

        MachineSnapshot {
            id: machine.id,
            node_key: format!("{}{}", NodeKey::PREFIX, machine.node_key),
            name: machine.given_name.clone(),
            hostname: machine.hostname.clone(),
            addresses,
            allowed_ips,
            tags: resolve_tags(policy, &machine.forced_tags()).allowed_tags,
            endpoints: machine.endpoints(),
            expiry: machine.expiry,
            last_seen: machine.last_seen,
            online: machine.is_online(now, self.online_window_secs),
        }
    }
}
