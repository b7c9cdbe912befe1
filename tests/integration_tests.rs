//! End-to-end tests: real nodes serving the HTTP API on loopback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use group_cache::peers::protocol::{
    ErrorBody, PeerInvalidateRequest, PeerRequest, PEER_GET_PATH, PEER_INVALIDATE_PATH,
};
use group_cache::peers::{HttpConnector, PeerPool};
use group_cache::server::{build_router, AppState};
use group_cache::{loader_fn, GroupOptions, GroupRegistry, Loader};

struct Node {
    addr: String,
    registry: Arc<GroupRegistry>,
    loads: Arc<AtomicUsize>,
}

fn database(name: &'static str, loads: Arc<AtomicUsize>) -> Arc<dyn Loader> {
    loader_fn(move |key: Bytes| {
        let loads = Arc::clone(&loads);
        async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(Bytes::from(format!(
                "{name} data for key: {}",
                String::from_utf8_lossy(&key)
            )))
        }
    })
}

/// Bind a listener, register group "users" and serve the API in the background.
async fn spawn_node(name: &'static str, listener: TcpListener) -> Node {
    let addr = format!("http://{}", listener.local_addr().unwrap());
    let connector = Arc::new(HttpConnector::new(Duration::from_secs(5)).unwrap());
    let peers = Arc::new(PeerPool::new(&addr, 50, connector));
    let registry = Arc::new(GroupRegistry::new(peers, GroupOptions::default()).unwrap());

    let loads = Arc::new(AtomicUsize::new(0));
    registry.new_default_group("users", database(name, loads.clone()));

    let state = Arc::new(AppState::new(Arc::clone(&registry), Duration::from_secs(5)));
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Node {
        addr,
        registry,
        loads,
    }
}

async fn single_node() -> Node {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    spawn_node("local", listener).await
}

/// Two nodes that know about each other.
async fn two_nodes() -> (Node, Node) {
    let a = spawn_node("a", TcpListener::bind("127.0.0.1:0").await.unwrap()).await;
    let b = spawn_node("b", TcpListener::bind("127.0.0.1:0").await.unwrap()).await;
    let members = [a.addr.clone(), b.addr.clone()];
    a.registry.peers().set_peers(&members);
    b.registry.peers().set_peers(&members);
    (a, b)
}

fn key_owned_by(node: &Node, owner: &str) -> String {
    (0..10_000)
        .map(|i| format!("user-{i}"))
        .find(|key| node.registry.peers().owner(key.as_bytes()).as_deref() == Some(owner))
        .expect("some key maps to every peer")
}

#[tokio::test]
async fn test_get_key_over_http() {
    let node = single_node().await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .get(format!("{}/v1/groups/users/keys/exampleKey", node.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.bytes().await.unwrap(),
            Bytes::from_static(b"local data for key: exampleKey")
        );
    }
    assert_eq!(node.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_group_is_404() {
    let node = single_node().await;
    let response = reqwest::Client::new()
        .get(format!("{}/v1/groups/nope/keys/k", node.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.kind, "group_not_found");
}

#[tokio::test]
async fn test_peer_endpoint_serves_raw_bytes() {
    let node = single_node().await;
    let response = reqwest::Client::new()
        .post(format!("{}{PEER_GET_PATH}", node.addr))
        .json(&PeerRequest {
            group: "users".to_string(),
            key: b"exampleKey".to_vec(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.bytes().await.unwrap(),
        Bytes::from_static(b"local data for key: exampleKey")
    );
    let stats = node.registry.group("users").unwrap().stats();
    assert_eq!(stats.server_requests, 1);
}

#[tokio::test]
async fn test_two_nodes_route_to_owner() {
    let (a, b) = two_nodes().await;
    let key = key_owned_by(&a, &b.addr);
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let response = client
            .get(format!("{}/v1/groups/users/keys/{key}", a.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.bytes().await.unwrap(),
            Bytes::from(format!("b data for key: {key}"))
        );
    }

    assert_eq!(a.loads.load(Ordering::SeqCst), 0);
    assert_eq!(b.loads.load(Ordering::SeqCst), 1);
    let a_stats = a.registry.group("users").unwrap().stats();
    assert_eq!(a_stats.peer_loads, 1);
    assert_eq!(a_stats.store.hot.items, 1);
    let b_stats = b.registry.group("users").unwrap().stats();
    assert_eq!(b_stats.server_requests, 1);
}

#[tokio::test]
async fn test_remote_group_missing_surfaces_as_remote_error() {
    let (a, b) = two_nodes().await;
    // Only A knows the group; B answers 404 for the peer fetch.
    b.registry.remove_group("users");
    let key = key_owned_by(&a, &b.addr);

    let err = a.registry.get("users", &key).await.unwrap_err();
    assert!(matches!(err, group_cache::Error::Remote { status: 404, .. }));
    assert_eq!(a.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalidate_endpoint() {
    let node = single_node().await;
    let client = reqwest::Client::new();
    let url = format!("{}/v1/groups/users/keys/k", node.addr);

    client.get(&url).send().await.unwrap();
    let response = client
        .post(format!("{}/v1/groups/users/invalidate", node.addr))
        .json(&json!({ "key": "k" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    client.get(&url).send().await.unwrap();
    assert_eq!(node.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_endpoint_forwards_to_owner() {
    let (a, b) = two_nodes().await;
    let key = key_owned_by(&a, &b.addr);
    let client = reqwest::Client::new();
    let url = format!("{}/v1/groups/users/keys/{key}", a.addr);

    client.get(&url).send().await.unwrap();
    let response = client
        .post(format!("{}/v1/groups/users/invalidate", a.addr))
        .json(&json!({ "key": key }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(b.registry.group("users").unwrap().stats().invalidations, 1);

    client.get(&url).send().await.unwrap();
    assert_eq!(b.loads.load(Ordering::SeqCst), 2);
    assert_eq!(a.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_peer_invalidate_endpoint_unknown_group() {
    let node = single_node().await;
    let response = reqwest::Client::new()
        .post(format!("{}{PEER_INVALIDATE_PATH}", node.addr))
        .json(&PeerInvalidateRequest {
            group: "nope".to_string(),
            key: None,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_clear_and_reset_endpoints() {
    let node = single_node().await;
    let client = reqwest::Client::new();
    client
        .get(format!("{}/v1/groups/users/keys/k", node.addr))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/v1/groups/users/clear", node.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(node.registry.group("users").unwrap().stats().store.items(), 0);

    let before = node.registry.group("users").unwrap();
    let response = client
        .post(format!("{}/v1/groups/users/reset", node.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert!(!node.registry.group("users").unwrap().same_instance(&before));
}

#[tokio::test]
async fn test_peers_endpoint_replaces_membership() {
    let node = single_node().await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("{}/v1/peers", node.addr))
        .json(&json!({ "peers": [node.addr, "http://10.0.0.2:8081/"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = client
        .get(format!("{}/v1/peers", node.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let peers: Vec<&str> = body["peers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(peers.contains(&"http://10.0.0.2:8081"));
    assert!(peers.contains(&node.addr.as_str()));
}

#[tokio::test]
async fn test_stats_metrics_and_health() {
    let node = single_node().await;
    let client = reqwest::Client::new();
    client
        .get(format!("{}/v1/groups/users/keys/k", node.addr))
        .send()
        .await
        .unwrap();

    let stats: Value = client
        .get(format!("{}/v1/stats", node.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats[0]["name"], "users");
    assert_eq!(stats[0]["stats"]["local_loads"], 1);

    let metrics = client
        .get(format!("{}/metrics", node.addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("groupcache_gets_total{group=\"users\"} 1"));

    let health: Value = client
        .get(format!("{}/health", node.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["groups"], 1);
}
