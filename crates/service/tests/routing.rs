use async_trait::async_trait;
use codec::{Addr, Id, Node};
use kad_server_service::routing::{Pinger, RoutingTable};

const K: usize = 20;

fn node(id: u64) -> Node {
    node_at(id, 7890)
}

fn node_at(id: u64, port: u16) -> Node {
    Node::new(Id::from(id), Addr::new("127.0.0.1", port))
}

/// A probe with a fixed answer, so eviction is deterministic.
struct Alive(bool);

#[async_trait]
impl Pinger for Alive {
    async fn ping(&self, _node: &Node) -> bool {
        self.0
    }
}

/// Ranges must tile the id space without gaps or overlaps, and every member
/// must sit in the bucket that covers it.
fn assert_tiling(table: &RoutingTable) {
    let buckets = table.buckets();

    assert_eq!(*buckets[0].lo(), Id::MIN);
    assert_eq!(buckets.last().unwrap().hi(), None);
    for pair in buckets.windows(2) {
        assert_eq!(pair[0].hi(), Some(*pair[1].lo()));
    }

    for bucket in buckets {
        assert!(bucket.len() <= K);
        for member in bucket.nodes() {
            assert!(bucket.covers(&member.id));
        }
    }
}

#[test]
fn test_append_and_move_to_tail() {
    pollster::block_on(async {
        let mut table = RoutingTable::new(Id::from(1u64), K);
        table.update(node(2), &Alive(true)).await;
        table.update(node(3), &Alive(true)).await;
        table.update(node(2), &Alive(true)).await;

        let order: Vec<Id> = table.iter().map(|node| node.id).collect();
        assert_eq!(order, vec![Id::from(3u64), Id::from(2u64)]);
        assert_tiling(&table);
    })
}

#[test]
fn test_update_ignores_the_local_node() {
    pollster::block_on(async {
        let mut table = RoutingTable::new(Id::from(1u64), K);
        table.update(node(1), &Alive(true)).await;

        assert!(table.is_empty());
    })
}

#[test]
fn test_update_is_idempotent() {
    pollster::block_on(async {
        let mut table = RoutingTable::new(Id::from(1u64), K);
        table.update(node(2), &Alive(true)).await;
        table.update(node(2), &Alive(true)).await;

        assert_eq!(table.len(), 1);
    })
}

#[test]
fn test_update_refreshes_the_address() {
    pollster::block_on(async {
        let mut table = RoutingTable::new(Id::from(1u64), K);
        table.update(node_at(2, 7001), &Alive(true)).await;
        table.update(node_at(2, 7002), &Alive(true)).await;

        assert_eq!(table.iter().next().unwrap().addr.port, 7002);
    })
}

#[test]
fn test_home_bucket_splits_on_overflow() {
    pollster::block_on(async {
        let mut table = RoutingTable::new(Id::from(1u64), K);

        // k peers fill the root bucket, one more forces the split chain.
        for id in 2..=(K as u64 + 2) {
            table.update(node(id), &Alive(true)).await;
        }

        assert_eq!(table.len(), K + 1);
        assert!(table.buckets().len() >= 2);
        assert_tiling(&table);

        // Everything lives in the lower half; the upper half is empty.
        let top = table.buckets().last().unwrap();
        assert!(top.lo().bit(0));
        assert!(top.is_empty());
    })
}

#[test]
fn test_full_foreign_bucket_keeps_a_live_head() {
    pollster::block_on(async {
        // Local id in the upper half; peers 1..=k+1 all land in the lower
        // half, which therefore never splits.
        let mut table = RoutingTable::new(Id::MIN.with_bit(0), K);
        for id in 1..=(K as u64) {
            table.update(node(id), &Alive(true)).await;
        }

        let newcomer = node(K as u64 + 1);
        table.update(newcomer.clone(), &Alive(true)).await;

        assert_eq!(table.len(), K);
        assert!(!table.iter().any(|member| member.id == newcomer.id));

        // The probed head moved to the tail of its bucket.
        let lower = &table.buckets()[0];
        assert_eq!(lower.nodes().first().unwrap().id, Id::from(2u64));
        assert_eq!(lower.nodes().last().unwrap().id, Id::from(1u64));
        assert_tiling(&table);
    })
}

#[test]
fn test_full_foreign_bucket_evicts_a_dead_head() {
    pollster::block_on(async {
        let mut table = RoutingTable::new(Id::MIN.with_bit(0), K);
        for id in 1..=(K as u64) {
            table.update(node(id), &Alive(true)).await;
        }

        let newcomer = node(K as u64 + 1);
        table.update(newcomer.clone(), &Alive(false)).await;

        assert_eq!(table.len(), K);
        assert!(!table.iter().any(|member| member.id == Id::from(1u64)));

        let lower = &table.buckets()[0];
        assert_eq!(lower.nodes().last().unwrap().id, newcomer.id);
        assert_tiling(&table);
    })
}

#[test]
fn test_nearest_orders_by_distance() {
    pollster::block_on(async {
        let mut table = RoutingTable::new(Id::MIN, K);
        for id in 1..=10 {
            table.update(node(id), &Alive(true)).await;
        }

        let target = Id::from(3u64);
        let nearest: Vec<Id> = table
            .nearest(&target, 3)
            .into_iter()
            .map(|node| node.id)
            .collect();

        assert_eq!(nearest, vec![Id::from(3u64), Id::from(2u64), Id::from(1u64)]);
    })
}
