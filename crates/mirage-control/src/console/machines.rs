//! Machine listing and operator actions.

use std::collections::{BTreeMap, HashMap};

use mirage_core::db::unix_timestamp;
use tracing::{info, instrument, warn};

use super::ConsoleService;
use super::types::{
    ExpiryData, MachineItem, MachineList, MachineUpdate, NameData, UpdateData, UpdateRequest,
};
use crate::error::{ControlError, Result};
use crate::expiry::{describe_expiry, toggle_expiry};
use crate::hostinfo::NatFlags;
use crate::naming::{auto_name, normalize_dns_label};
use crate::relay::select_relays;
use crate::routes::{RouteView, apply_route_settings};
use crate::storage::{Machine, Organization, User};
use crate::tags::{resolve_tags, set_tags};

fn parse_mid(mid: &str) -> Result<i64> {
    mid.trim()
        .parse()
        .map_err(|_| ControlError::Invalid(format!("invalid machine id {mid:?}")))
}

impl ConsoleService {
    /// All machines of the caller's organization.
    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn list_machines(&self, user: &User) -> Result<MachineList> {
        let org = self.db.get_organization(user.organization_id).await?;
        let policy = org.policy();
        let now = unix_timestamp();

        let mut owners: HashMap<i64, User> = HashMap::new();
        let mut machines = BTreeMap::new();
        for machine in self.db.list_machines_by_org(org.id).await? {
            if !owners.contains_key(&machine.user_id) {
                let owner = self.db.get_user(machine.user_id).await?;
                owners.insert(owner.id, owner);
            }
            let owner_name = owners
                .get(&machine.user_id)
                .map(|u| {
                    if u.display_name.is_empty() {
                        u.name.clone()
                    } else {
                        u.display_name.clone()
                    }
                })
                .unwrap_or_default();

            let routes = self.db.get_machine_routes(machine.id).await?;
            let host_info = machine.host_info();
            let relays = select_relays(host_info.net_info.as_ref());
            let nat = NatFlags::from_net_info(host_info.net_info.as_ref());

            let item = MachineItem {
                id: machine.id.to_string(),
                name: machine.given_name.clone(),
                automatic_name_mode: machine.auto_gen_name,
                user_name_head: owner_name.chars().next().map(String::from).unwrap_or_default(),
                user: owner_name,
                addresses: machine.addresses(),
                os: host_info.os.clone(),
                hostname: machine.hostname.clone(),
                ipn_version: host_info.ipn_version.clone(),
                connected_to_control: machine.is_online(now, self.online_window_secs),
                last_seen: machine.last_seen,
                created: machine.created_at,
                is_ephemeral: machine.ephemeral,
                never_expires: machine.never_expires(),
                expiry_desc: describe_expiry(machine.expiry, now),
                endpoints: machine.endpoints(),
                derps: relays.latencies,
                pref_derp: relays.preferred,
                routes: RouteView::from_routes(&routes),
                tags: resolve_tags(&policy, &machine.forced_tags()),
                varies: nat.varies,
                hairpinning: nat.hair_pinning,
                ipv6_enabled: nat.ipv6,
                udp_enabled: nat.udp,
                upnp_enabled: nat.upnp,
                pcp_enabled: nat.pcp,
                pmp_enabled: nat.pmp,
            };
            machines.insert(item.id.clone(), item);
        }

        Ok(MachineList {
            basedomain: org.magic_dns_domain,
            machines,
        })
    }

    /// Apply one operator action to a machine of the caller's organization.
    #[instrument(skip(self, user, req), fields(user_id = user.id, mid = %req.mid))]
    pub async fn update_machine(&self, user: &User, req: UpdateRequest) -> Result<UpdateData> {
        let id = parse_mid(&req.mid)?;
        let mut machine = self
            .db
            .get_machine(id)
            .await
            .map_err(ControlError::from_lookup)?;
        if machine.organization_id != user.organization_id {
            warn!(machine_id = id, "Update on machine outside caller's organization");
            return Err(ControlError::NotFound(format!("Machine {id}")));
        }
        let org = self.db.get_organization(machine.organization_id).await?;

        match req.action {
            MachineUpdate::SetExpires => {
                let expires = toggle_expiry(&self.db, &mut machine, &org).await?;
                Ok(UpdateData::Expiry(ExpiryData {
                    never_expires: machine.never_expires(),
                    expires,
                }))
            }
            MachineUpdate::RenameNode { node_name } => {
                self.rename(&machine, &org, &node_name).await.map(UpdateData::Name)
            }
            MachineUpdate::SetRouteSettings {
                allowed_ips,
                allowed_exit_node,
            } => {
                apply_route_settings(&self.db, machine.id, allowed_exit_node, &allowed_ips).await?;
                let routes = self.db.get_machine_routes(machine.id).await?;
                Ok(UpdateData::Routes(RouteView::from_routes(&routes)))
            }
            MachineUpdate::SetTags { tags } => set_tags(&self.db, &mut machine, &org, tags)
                .await
                .map(UpdateData::Tags),
        }
    }

    async fn rename(&self, machine: &Machine, org: &Organization, requested: &str) -> Result<NameData> {
        let (name, automatic) = if requested.trim().is_empty() {
            let base = auto_name(&machine.hostname);
            let name = if self.db.given_name_taken(org.id, &base, machine.id).await? {
                let suffix = machine.node_key.get(..8).unwrap_or(&machine.node_key);
                format!("{base}-{suffix}")
            } else {
                base
            };
            (name, true)
        } else {
            let label = normalize_dns_label(requested)
                .ok_or_else(|| ControlError::Invalid("name has no usable characters".into()))?;
            if self.db.given_name_taken(org.id, &label, machine.id).await? {
                return Err(ControlError::Invalid(format!("name {label} is already in use")));
            }
            (label, false)
        };

        self.db.rename_machine(machine.id, &name, automatic).await?;
        info!(machine_id = machine.id, %name, automatic, "Machine renamed");
        Ok(NameData {
            name,
            automatic_name_mode: automatic,
        })
    }

    /// Delete one of the caller's own machines.
    #[instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn remove_machine(&self, user: &User, mid: &str) -> Result<()> {
        let id = parse_mid(mid)?;
        let owned = self
            .db
            .list_machines_by_user(user.id)
            .await?
            .iter()
            .any(|m| m.id == id);
        if !owned {
            return Err(ControlError::NotFound(format!("Machine {id}")));
        }
        self.db.hard_delete_machine(id).await?;
        info!(machine_id = id, "Machine removed");
        Ok(())
    }
}
