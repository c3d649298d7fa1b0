//! Route authorization.
//!
//! A route moves between three states: not advertised, advertised but
//! disabled, and advertised and enabled. Machines drive advertisement
//! ([`sync_advertised_routes`]); operators drive enablement
//! ([`apply_route_settings`]). Exit routes (`0.0.0.0/0`, `::/0`) are toggled
//! as a group, independent of subnet routes.

use std::collections::HashSet;

use ipnetwork::IpNetwork;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::storage::{ControlDatabase, Route};

/// Parse a prefix and render it in canonical form (host bits cleared).
pub fn canonical_prefix(raw: &str) -> Option<String> {
    let net: IpNetwork = raw.trim().parse().ok()?;
    IpNetwork::new(net.network(), net.prefix())
        .ok()
        .map(|n| n.to_string())
}

pub fn is_exit_prefix(prefix: &str) -> bool {
    matches!(prefix, "0.0.0.0/0" | "::/0")
}

/// Apply an operator decision to a machine's routes.
///
/// Exit routes follow `exit_node_allowed`. Every other route is first
/// disabled, then exactly those whose stored prefix string appears in
/// `allowed_subnets` are re-enabled, so re-applying the same input is a
/// no-op. The first storage failure aborts; toggles already written stay
/// written. Returns an empty description on success.
pub async fn apply_route_settings(
    db: &ControlDatabase,
    machine_id: i64,
    exit_node_allowed: bool,
    allowed_subnets: &[String],
) -> Result<String> {
    let routes = db.get_machine_routes(machine_id).await?;

    for route in &routes {
        if route.is_exit_route() && exit_node_allowed {
            db.enable_route(route.id).await?;
        } else {
            db.disable_route(route.id).await?;
        }
    }

    // Exit prefixes are controlled by the flag alone.
    let subnets: Vec<String> = allowed_subnets
        .iter()
        .filter(|p| !is_exit_prefix(p))
        .collect::<HashSet<_>>()
        .into_iter()
        .cloned()
        .collect();
    let enabled = db.enable_routes(machine_id, &subnets).await?;

    info!(
        machine_id,
        exit_node_allowed,
        subnets = enabled,
        "Route settings applied"
    );
    Ok(String::new())
}

/// Reconcile stored routes with the prefixes a machine reports.
///
/// New prefixes become advertised routes (disabled until an operator allows
/// them); known ones keep their enabled flag; routes no longer reported are
/// withdrawn.
pub async fn sync_advertised_routes(
    db: &ControlDatabase,
    machine_id: i64,
    routable_ips: &[String],
) -> Result<()> {
    let mut reported = HashSet::new();
    for raw in routable_ips {
        match canonical_prefix(raw) {
            Some(prefix) => {
                reported.insert(prefix);
            }
            None => warn!(machine_id, prefix = %raw, "Ignoring unparseable routable prefix"),
        }
    }

    let existing = db.get_machine_routes(machine_id).await?;
    for route in existing
        .iter()
        .filter(|r| r.advertised && !reported.contains(&r.prefix))
    {
        db.withdraw_route(route.id).await?;
    }
    for prefix in &reported {
        let known = existing.iter().any(|r| r.advertised && &r.prefix == prefix);
        if !known {
            db.upsert_advertised_route(machine_id, prefix).await?;
        }
    }
    Ok(())
}

/// Route state of one machine as presented to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    pub advertised_exit_node: bool,
    pub allowed_exit_node: bool,
    #[serde(rename = "advertisedIPs")]
    pub advertised_ips: Vec<String>,
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<String>,
    /// Advertised subnet routes the operator has not enabled.
    #[serde(rename = "extraIPs")]
    pub extra_ips: Vec<String>,
    pub has_subnets: bool,
}

impl RouteView {
    pub fn from_routes(routes: &[Route]) -> Self {
        let mut view = Self::default();
        for route in routes {
            if route.is_exit_route() {
                view.advertised_exit_node |= route.advertised;
                view.allowed_exit_node |= route.advertised && route.enabled;
                continue;
            }
            match (route.advertised, route.enabled) {
                (true, true) => {
                    view.advertised_ips.push(route.prefix.clone());
                    view.allowed_ips.push(route.prefix.clone());
                }
                (true, false) => {
                    view.advertised_ips.push(route.prefix.clone());
                    view.extra_ips.push(route.prefix.clone());
                }
                (false, _) => {}
            }
        }
        view.has_subnets = !view.advertised_ips.is_empty();
        view
    }

    /// Prefixes peers may route through this machine.
    pub fn served_prefixes(routes: &[Route]) -> Vec<String> {
        routes
            .iter()
            .filter(|r| r.advertised && r.enabled)
            .map(|r| r.prefix.clone())
            .collect()
    }
}
