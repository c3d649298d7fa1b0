//! Tests for Navi registration and trust-list polling.

use std::sync::Arc;

use mirage_crypto::{MachineKey, NodeKey};

use super::ProtocolHandler;
use super::types::NaviRequest;
use crate::error::ControlError;
use crate::ipalloc::IpAllocator;
use crate::storage::ControlDatabase;
use crate::test_helpers::{seed_machine, seed_org_user, test_db};

fn handler(db: &ControlDatabase) -> ProtocolHandler {
    let allocator = IpAllocator::new("100.64.0.0/10", "fd7a:115c:a1e0::/48").unwrap();
    ProtocolHandler::new(db.clone(), allocator, 300)
}

fn navi(id: &str) -> NaviRequest {
    NaviRequest {
        id: id.to_string(),
        timestamp: None,
    }
}

fn key(n: u8) -> MachineKey {
    MachineKey::from_bytes([n; 32])
}

#[tokio::test]
async fn unknown_navi_is_not_found() {
    let db = test_db().await;
    let h = handler(&db);

    assert!(matches!(
        h.register_navi(key(1), navi("ghost")).await,
        Err(ControlError::NotFound(_))
    ));
    assert!(matches!(
        h.navi_trust_list(key(1), navi("ghost")).await,
        Err(ControlError::NotFound(_))
    ));
}

#[tokio::test]
async fn first_key_binds_and_sticks() {
    let db = test_db().await;
    db.create_navi_node("navi-1", 0, "relay-a").await.unwrap();
    let h = handler(&db);

    let resp = h.register_navi(key(1), navi("navi-1")).await.unwrap();
    assert_eq!(resp.node_info.navi_key, key(1).raw_hex());
    assert!(resp.timestamp > 0);

    // Same key again is fine.
    h.register_navi(key(1), navi("navi-1")).await.unwrap();

    let err = h.register_navi(key(2), navi("navi-1")).await.unwrap_err();
    assert!(matches!(err, ControlError::KeyMismatch(_)));
    assert_eq!(
        db.get_navi_node("navi-1").await.unwrap().navi_key,
        key(1).raw_hex()
    );
}

#[tokio::test]
async fn concurrent_first_registrations_bind_exactly_one() {
    let db = test_db().await;
    db.create_navi_node("navi-1", 0, "relay-a").await.unwrap();
    let h = Arc::new(handler(&db));

    let mut tasks = Vec::new();
    for n in 1..=6u8 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.register_navi(key(n), navi("navi-1")).await.is_ok()
        }));
    }
    let mut winners = 0;
    for t in tasks {
        if t.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn response_uses_wire_field_names() {
    let db = test_db().await;
    db.create_navi_node("navi-1", 7, "relay-a").await.unwrap();
    let h = handler(&db);

    let resp = h.register_navi(key(1), navi("navi-1")).await.unwrap();
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["NodeInfo"]["ID"], "navi-1");
    assert_eq!(json["NodeInfo"]["OrgID"], 7);
    assert!(json["Timestamp"].is_i64());
}

#[tokio::test]
async fn trust_list_requires_bound_key() {
    let db = test_db().await;
    db.create_navi_node("navi-1", 0, "relay-a").await.unwrap();
    let h = handler(&db);

    // Not yet registered.
    assert!(matches!(
        h.navi_trust_list(key(1), navi("navi-1")).await,
        Err(ControlError::KeyMismatch(_))
    ));

    h.register_navi(key(1), navi("navi-1")).await.unwrap();
    assert!(matches!(
        h.navi_trust_list(key(2), navi("navi-1")).await,
        Err(ControlError::KeyMismatch(_))
    ));
}

#[tokio::test]
async fn global_navi_trusts_every_machine_org_navi_only_its_own() {
    let db = test_db().await;
    let (_, alice) = seed_org_user(&db).await;
    let other_org = db.create_organization("globex", "globex.mirage", 30).await.unwrap();
    let carol = db.create_user(other_org.id, "carol", "Carol", "").await.unwrap();
    let m1 = seed_machine(&db, &alice, 1).await;
    let m2 = seed_machine(&db, &carol, 2).await;

    db.create_navi_node("global", 0, "relay-g").await.unwrap();
    db.create_navi_node("scoped", other_org.id, "relay-s").await.unwrap();
    let h = handler(&db);
    h.register_navi(key(1), navi("global")).await.unwrap();
    h.register_navi(key(2), navi("scoped")).await.unwrap();

    let global = h.navi_trust_list(key(1), navi("global")).await.unwrap();
    assert_eq!(global.trust_nodes_list.len(), 2);
    let k1 = format!("{}{}", NodeKey::PREFIX, m1.node_key);
    assert_eq!(global.trust_nodes_list.get(&k1).map(String::as_str), Some(""));

    let scoped = h.navi_trust_list(key(2), navi("scoped")).await.unwrap();
    let keys: Vec<_> = scoped.trust_nodes_list.keys().cloned().collect();
    assert_eq!(keys, vec![format!("nodekey:{}", m2.node_key)]);
}
