use std::time::Duration;

use codec::{Addr, Id, Node};
use kad_server_service::{Server, ServerOptions};

async fn start(id: u64, bootstrap: &[Node]) -> Server {
    let options = ServerOptions {
        bind: Addr::new("127.0.0.1", 0),
        id: Some(Id::from(id)),
        timeout: Duration::from_millis(500),
        ..Default::default()
    };
    Server::start(options, bootstrap).await.unwrap()
}

#[tokio::test]
async fn test_single_node_set_and_get() {
    let node = start(1, &[]).await;

    node.set(Id::from(42u64), b"hi".to_vec()).await;

    assert_eq!(node.get(&Id::from(42u64)).await, Some(b"hi".to_vec()));
    assert_eq!(node.get(&Id::from(43u64)).await, None);

    node.close();
}

#[tokio::test]
async fn test_two_nodes_store_and_remote_get() {
    let a = start(1, &[]).await;
    let b = start(2, &[a.node().clone()]).await;

    // Joining taught both sides about each other.
    assert_eq!(b.known_nodes().await, vec![a.node().clone()]);
    assert_eq!(a.known_nodes().await, vec![b.node().clone()]);

    b.set(Id::from(99u64), b"world".to_vec()).await;

    // The store replicated to the closest peer, so the owner serves it
    // locally and a third node finds it over the network.
    assert_eq!(a.get(&Id::from(99u64)).await, Some(b"world".to_vec()));

    let c = start(3, &[a.node().clone()]).await;
    assert_eq!(c.get(&Id::from(99u64)).await, Some(b"world".to_vec()));
    assert_eq!(c.get(&Id::from(100u64)).await, None);

    a.close();
    b.close();
    c.close();
}

#[tokio::test]
async fn test_lookup_walks_a_chain_of_peers() {
    // Each node only bootstraps off its predecessor; values still travel.
    let a = start(1, &[]).await;
    let b = start(2, &[a.node().clone()]).await;
    let c = start(3, &[b.node().clone()]).await;

    a.set(Id::from(42u64), b"chain".to_vec()).await;

    assert_eq!(c.get(&Id::from(42u64)).await, Some(b"chain".to_vec()));

    a.close();
    b.close();
    c.close();
}

#[tokio::test]
async fn test_stores_overwrite() {
    let node = start(1, &[]).await;
    let key = Id::from(7u64);

    node.set(key, b"first".to_vec()).await;
    node.set(key, b"second".to_vec()).await;

    assert_eq!(node.get(&key).await, Some(b"second".to_vec()));
    assert_eq!(node.storage_entries().len(), 1);

    node.close();
}

#[tokio::test]
async fn test_served_requests_feed_the_routing_table() {
    let a = start(1, &[]).await;
    let b = start(2, &[a.node().clone()]).await;
    let c = start(3, &[a.node().clone()]).await;

    // Serving the two joins taught the first node both callers.
    let known = a.known_nodes().await;
    assert!(known.contains(b.node()));
    assert!(known.contains(c.node()));

    a.close();
    b.close();
    c.close();
}
