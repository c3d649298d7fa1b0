//! Tests for machine registration and polling.

use std::sync::Arc;

use mirage_core::db::unix_timestamp;
use mirage_crypto::{MachineKey, NodeKey, PeerChannel, SecureChannel, StaticKeyPair};

use super::types::{AuthInfo, MapRequest, RegisterRequest, RegisterResponse};
use super::{ProtocolHandler, open_request, seal_response};
use crate::error::ControlError;
use crate::hostinfo::HostInfo;
use crate::ipalloc::IpAllocator;
use crate::storage::{ControlDatabase, User};
use crate::test_helpers::{seed_org_user, test_db};

fn handler(db: &ControlDatabase) -> ProtocolHandler {
    let allocator = IpAllocator::new("100.64.0.0/10", "fd7a:115c:a1e0::/48").unwrap();
    ProtocolHandler::new(db.clone(), allocator, 300)
}

fn mkey(n: u8) -> MachineKey {
    MachineKey::from_bytes([n; 32])
}

fn nkey(n: u8) -> NodeKey {
    NodeKey::from_bytes([n; 32])
}

fn register(node: u8, auth: Option<&str>) -> RegisterRequest {
    RegisterRequest {
        node_key: nkey(node),
        old_node_key: None,
        auth: auth.map(|k| AuthInfo {
            auth_key: k.to_string(),
        }),
        expiry: None,
        hostinfo: Some(HostInfo {
            os: "linux".into(),
            hostname: "Build Box".into(),
            routable_ips: vec!["10.0.0.0/24".into()],
            ..HostInfo::default()
        }),
        ephemeral: false,
    }
}

async fn setup() -> (ControlDatabase, ProtocolHandler, User) {
    let db = test_db().await;
    let (_, user) = seed_org_user(&db).await;
    db.create_preauth_key("reusable", user.id, true, false, 0, &["tag:ci".into()])
        .await
        .unwrap();
    db.create_preauth_key("once", user.id, false, false, 0, &[])
        .await
        .unwrap();
    let h = handler(&db);
    (db, h, user)
}

async fn machine_count(db: &ControlDatabase) -> usize {
    db.list_machines().await.unwrap().len()
}

#[tokio::test]
async fn new_machine_with_auth_key_is_activated() {
    let (db, h, user) = setup().await;

    let resp = h
        .register_machine(mkey(1), register(1, Some("reusable")))
        .await
        .unwrap();

    assert!(resp.machine_authorized);
    assert!(!resp.node_key_expired);
    assert!(resp.error.is_empty());
    assert_eq!(resp.user.login_name, user.name);
    let snap = resp.machine.unwrap();
    assert_eq!(snap.name, "build-box");
    assert_eq!(snap.addresses, vec!["100.64.0.1", "fd7a:115c:a1e0::1"]);
    assert_eq!(snap.node_key, nkey(1).to_string());

    let stored = db.get_machine(snap.id).await.unwrap();
    assert_eq!(stored.machine_key, mkey(1).raw_hex());
    assert_eq!(stored.forced_tags(), vec!["tag:ci"]);
    assert!(stored.expiry > unix_timestamp() + 179 * 86_400);

    let routes = db.get_machine_routes(stored.id).await.unwrap();
    assert_eq!(routes.len(), 1);
    assert!(routes[0].advertised);
    assert!(!routes[0].enabled);
}

#[tokio::test]
async fn missing_or_bad_auth_creates_nothing() {
    let (db, h, _) = setup().await;

    let resp = h.register_machine(mkey(1), register(1, None)).await.unwrap();
    assert!(!resp.machine_authorized);
    assert!(!resp.error.is_empty());
    assert!(resp.machine.is_none());

    let resp = h
        .register_machine(mkey(1), register(1, Some("nope")))
        .await
        .unwrap();
    assert_eq!(resp.error, "invalid auth key");
    assert_eq!(machine_count(&db).await, 0);
}

#[tokio::test]
async fn single_use_key_activates_one_machine() {
    let (db, h, _) = setup().await;

    let first = h.register_machine(mkey(1), register(1, Some("once"))).await.unwrap();
    assert!(first.machine_authorized);

    let second = h.register_machine(mkey(2), register(2, Some("once"))).await.unwrap();
    assert!(!second.machine_authorized);
    assert_eq!(second.error, "auth key already used");
    assert_eq!(machine_count(&db).await, 1);
}

#[tokio::test]
async fn expired_auth_key_rejected() {
    let (db, h, user) = setup().await;
    db.create_preauth_key("stale", user.id, true, false, unix_timestamp() - 1, &[])
        .await
        .unwrap();

    let resp = h.register_machine(mkey(1), register(1, Some("stale"))).await.unwrap();
    assert_eq!(resp.error, "auth key expired");
    assert_eq!(machine_count(&db).await, 0);
}

#[tokio::test]
async fn known_node_key_from_other_machine_key_rejected() {
    let (db, h, _) = setup().await;
    h.register_machine(mkey(1), register(1, Some("reusable"))).await.unwrap();

    let err = h.register_machine(mkey(9), register(1, None)).await.unwrap_err();
    assert!(matches!(err, ControlError::KeyMismatch(_)));
    assert_eq!(machine_count(&db).await, 1);
}

#[tokio::test]
async fn reauth_refreshes_host_info_and_routes() {
    let (db, h, _) = setup().await;
    let id = h
        .register_machine(mkey(1), register(1, Some("reusable")))
        .await
        .unwrap()
        .machine
        .unwrap()
        .id;

    let mut req = register(1, None);
    req.hostinfo = Some(HostInfo {
        hostname: "build-box".into(),
        routable_ips: vec!["10.0.1.0/24".into(), "0.0.0.0/0".into()],
        ..HostInfo::default()
    });
    let resp = h.register_machine(mkey(1), req).await.unwrap();
    assert!(resp.machine_authorized);

    let advertised: Vec<_> = db
        .get_machine_routes(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.advertised)
        .map(|r| r.prefix)
        .collect();
    assert_eq!(advertised.len(), 2);
    assert!(advertised.contains(&"0.0.0.0/0".to_string()));
    assert!(!advertised.contains(&"10.0.0.0/24".to_string()));
}

#[tokio::test]
async fn past_expiry_logs_machine_out() {
    let (db, h, _) = setup().await;
    let id = h
        .register_machine(mkey(1), register(1, Some("reusable")))
        .await
        .unwrap()
        .machine
        .unwrap()
        .id;

    let mut req = register(1, None);
    req.expiry = Some(unix_timestamp() - 10);
    let resp = h.register_machine(mkey(1), req).await.unwrap();

    assert!(resp.node_key_expired);
    assert!(db.get_machine(id).await.unwrap().is_expired(unix_timestamp()));
}

#[tokio::test]
async fn ephemeral_logout_removes_machine() {
    let (db, h, user) = setup().await;
    db.create_preauth_key("eph", user.id, true, true, 0, &[])
        .await
        .unwrap();
    h.register_machine(mkey(1), register(1, Some("eph"))).await.unwrap();

    let mut req = register(1, None);
    req.expiry = Some(1);
    let resp = h.register_machine(mkey(1), req).await.unwrap();

    assert!(resp.node_key_expired);
    assert!(!resp.machine_authorized);
    assert_eq!(machine_count(&db).await, 0);
}

#[tokio::test]
async fn node_key_rotation_keeps_machine() {
    let (db, h, _) = setup().await;
    let id = h
        .register_machine(mkey(1), register(1, Some("reusable")))
        .await
        .unwrap()
        .machine
        .unwrap()
        .id;

    let mut req = register(2, None);
    req.old_node_key = Some(nkey(1));
    let resp = h.register_machine(mkey(1), req).await.unwrap();

    assert!(resp.machine_authorized);
    assert_eq!(resp.machine.unwrap().id, id);
    assert_eq!(db.get_machine(id).await.unwrap().node_key, nkey(2).raw_hex());
    assert_eq!(machine_count(&db).await, 1);
}

#[tokio::test]
async fn rotation_from_foreign_machine_key_is_ignored() {
    let (db, h, _) = setup().await;
    h.register_machine(mkey(1), register(1, Some("reusable"))).await.unwrap();

    let mut req = register(2, None);
    req.old_node_key = Some(nkey(1));
    let resp = h.register_machine(mkey(7), req).await.unwrap();

    assert!(!resp.machine_authorized);
    assert!(db.get_machine_by_node_key(&nkey(1).raw_hex()).await.is_ok());
}

#[tokio::test]
async fn concurrent_registration_yields_one_row() {
    let (db, h, _) = setup().await;
    let h = Arc::new(h);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.register_machine(mkey(1), register(1, Some("reusable"))).await
        }));
    }
    let mut ids = Vec::new();
    for t in tasks {
        let resp: RegisterResponse = t.await.unwrap().unwrap();
        ids.push(resp.machine.unwrap().id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(machine_count(&db).await, 1);
}

#[tokio::test]
async fn distinct_machines_get_distinct_addresses() {
    let (_, h, _) = setup().await;
    let a = h.register_machine(mkey(1), register(1, Some("reusable"))).await.unwrap();
    let b = h.register_machine(mkey(2), register(2, Some("reusable"))).await.unwrap();

    let (a, b) = (a.machine.unwrap(), b.machine.unwrap());
    assert_ne!(a.addresses, b.addresses);
    assert_ne!(a.name, b.name);
}

#[tokio::test]
async fn poll_returns_org_peers() {
    let (db, h, _) = setup().await;
    h.register_machine(mkey(1), register(1, Some("reusable"))).await.unwrap();
    h.register_machine(mkey(2), register(2, Some("reusable"))).await.unwrap();

    let resp = h
        .poll_machine(
            mkey(1),
            MapRequest {
                node_key: nkey(1),
                hostinfo: None,
                endpoints: Some(vec!["203.0.113.5:41641".into()]),
            },
        )
        .await
        .unwrap();

    assert_eq!(resp.domain, "acme.mirage");
    assert!(resp.machine.online);
    assert_eq!(resp.machine.endpoints, vec!["203.0.113.5:41641"]);
    assert_eq!(resp.peers.len(), 1);
    assert_eq!(resp.peers[0].node_key, nkey(2).to_string());
    assert!(!resp.key_expired);

    let stored = db.get_machine_by_node_key(&nkey(1).raw_hex()).await.unwrap();
    assert!(stored.last_seen > 0);
}

#[tokio::test]
async fn poll_from_wrong_key_or_unknown_node_fails() {
    let (_, h, _) = setup().await;
    h.register_machine(mkey(1), register(1, Some("reusable"))).await.unwrap();

    let req = |n| MapRequest {
        node_key: nkey(n),
        hostinfo: None,
        endpoints: None,
    };
    assert!(matches!(
        h.poll_machine(mkey(3), req(1)).await,
        Err(ControlError::KeyMismatch(_))
    ));
    assert!(matches!(
        h.poll_machine(mkey(1), req(5)).await,
        Err(ControlError::NotFound(_))
    ));
}

#[test]
fn sealed_request_round_trips_through_channel() {
    let server = StaticKeyPair::generate();
    let client = StaticKeyPair::generate();
    let client_side = PeerChannel::establish(&client, server.public_key()).unwrap();
    let server_side = PeerChannel::establish(&server, client.public_key()).unwrap();

    let body = format!(r#"{{"NodeKey":"{}","Hostinfo":{{"Hostname":"n1"}}}}"#, nkey(4));
    let frame = client_side.encrypt(body.as_bytes()).unwrap();
    let req: RegisterRequest = open_request(&server_side, &frame).unwrap();
    assert_eq!(req.node_key, nkey(4));
    assert!(req.auth.is_none());

    let reply = seal_response(&server_side, &RegisterResponse::rejected("no")).unwrap();
    let plain = client_side.decrypt(&reply).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&plain).unwrap();
    assert_eq!(json["Error"], "no");
    assert_eq!(json["MachineAuthorized"], false);
}

#[test]
fn garbage_json_is_rejected() {
    let server = StaticKeyPair::generate();
    let client = StaticKeyPair::generate();
    let client_side = PeerChannel::establish(&client, server.public_key()).unwrap();
    let server_side = PeerChannel::establish(&server, client.public_key()).unwrap();

    let frame = client_side.encrypt(b"{not json").unwrap();
    let result: Result<RegisterRequest, _> = open_request(&server_side, &frame);
    assert!(matches!(result, Err(ControlError::Json(_))));
}
