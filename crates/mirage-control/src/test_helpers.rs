//! Shared fixtures for control-server unit tests.

use crate::storage::{ControlDatabase, Machine, NewMachine, Organization, User};

/// Fresh in-memory database.
pub async fn test_db() -> ControlDatabase {
    ControlDatabase::open_in_memory().await.unwrap()
}

/// Organization "acme" with user "alice" (password "password123").
pub async fn seed_org_user(db: &ControlDatabase) -> (Organization, User) {
    let org = db.create_organization("acme", "acme.mirage", 180).await.unwrap();
    let hash = crate::console::auth::hash_password("password123").unwrap();
    let user = db.create_user(org.id, "alice", "Alice", &hash).await.unwrap();
    (org, user)
}

/// A second user in the same organization.
pub async fn seed_second_user(db: &ControlDatabase, org: &Organization) -> User {
    db.create_user(org.id, "bob", "Bob", "").await.unwrap()
}

/// Insert machine number `n` for `user`; node key is `n` repeated.
pub async fn seed_machine(db: &ControlDatabase, user: &User, n: u8) -> Machine {
    let node_key = format!("{n:02x}").repeat(32);
    let ipv4 = format!("100.64.0.{n}");
    let ipv6 = format!("fd7a:115c:a1e0::{n:x}");
    let name = format!("host-{n}");
    db.create_machine(&NewMachine {
        node_key: &node_key,
        machine_key: "",
        user_id: user.id,
        organization_id: user.organization_id,
        ipv4: &ipv4,
        ipv6: &ipv6,
        hostname: &name,
        given_name: &name,
        ephemeral: false,
        forced_tags: &[],
        host_info: "{}",
        expiry: 0,
    })
    .await
    .unwrap()
}

/// Advertise `prefixes` for a machine.
pub async fn advertise(db: &ControlDatabase, machine_id: i64, prefixes: &[&str]) {
    for prefix in prefixes {
        db.upsert_advertised_route(machine_id, prefix).await.unwrap();
    }
}

/// Enabled prefixes of a machine, in insertion order.
pub async fn enabled_prefixes(db: &ControlDatabase, machine_id: i64) -> Vec<String> {
    db.get_machine_routes(machine_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.enabled)
        .map(|r| r.prefix)
        .collect()
}
