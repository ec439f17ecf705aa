//! K-bucket routing table.
//!
//! [paper]: https://pdos.csail.mit.edu/~petar/papers/maymounkov-kademlia-lncs.pdf
//!
//! The table is an ordered list of buckets whose half-open ranges tile the
//! whole 160-bit id space. A bucket is identified by the prefix it covers:
//! `lo` fixes the first `depth` bits and the range is everything below that
//! prefix, so `[lo, lo + 2^(160-depth))`. Only the bucket covering the local
//! id may split, which keeps the table's detail concentrated around the
//! local neighbourhood the way the paper prescribes.
//!
//! Each bucket is LRU-ordered: index 0 holds the peer seen longest ago.
//! On overflow of a foreign bucket the oldest peer is probed; peers that
//! still answer are never evicted in favour of unknown newcomers.

use async_trait::async_trait;

use codec::{Id, Node};

/// Liveness probe used by the eviction path.
///
/// Any reply before the deadline counts as alive, error replies included;
/// only silence is death.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, node: &Node) -> bool;
}

/// A bounded, LRU-ordered list of peers covering one id range.
#[derive(Debug, Clone)]
pub struct KBucket {
    lo: Id,
    depth: u32,
    nodes: Vec<Node>,
}

impl KBucket {
    fn new(lo: Id, depth: u32) -> KBucket {
        KBucket {
            lo,
            depth,
            nodes: Vec::new(),
        }
    }

    /// Lower bound of the covered range.
    pub fn lo(&self) -> &Id {
        &self.lo
    }

    /// Exclusive upper bound of the covered range, `None` when the range
    /// reaches the top of the id space.
    pub fn hi(&self) -> Option<Id> {
        if self.depth == 0 {
            None
        } else {
            self.lo.checked_add_pow2(Id::BITS - self.depth)
        }
    }

    /// Number of leading bits this bucket fixes.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn covers(&self, id: &Id) -> bool {
        self.lo.shares_prefix(id, self.depth)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Split into the two sub-ranges, partitioning members by the bit that
    /// distinguishes them.
    fn split(self) -> (KBucket, KBucket) {
        let mut left = KBucket::new(self.lo, self.depth + 1);
        let mut right = KBucket::new(self.lo.with_bit(self.depth), self.depth + 1);
        for node in self.nodes {
            if node.id.bit(self.depth) {
                right.nodes.push(node);
            } else {
                left.nodes.push(node);
            }
        }

        (left, right)
    }
}

pub struct RoutingTable {
    local: Id,
    k: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// A table with the single root bucket covering everything.
    pub fn new(local: Id, k: usize) -> RoutingTable {
        RoutingTable {
            local,
            k,
            buckets: vec![KBucket::new(Id::MIN, 0)],
        }
    }

    /// Ingest an observation of a peer.
    ///
    /// Every served request and every node returned by a lookup flows
    /// through here. The probe in the eviction branch suspends with
    /// `&mut self` held, so concurrent updates serialize behind whatever
    /// lock guards the table; that serialization is what keeps the split
    /// loop sound.
    pub async fn update(&mut self, new: Node, pinger: &dyn Pinger) {
        if new.id == self.local {
            return;
        }

        loop {
            let index = self
                .buckets
                .iter()
                .position(|bucket| bucket.covers(&new.id))
                .expect("bucket ranges tile the id space");
            let bucket = &mut self.buckets[index];

            if let Some(position) = bucket.nodes.iter().position(|node| node.id == new.id) {
                // Known peer: refresh its address and mark it freshest.
                bucket.nodes.remove(position);
                bucket.nodes.push(new);
                return;
            }

            if bucket.nodes.len() < self.k {
                bucket.nodes.push(new);
                return;
            }

            if bucket.covers(&self.local) {
                let bucket = self.buckets.remove(index);
                let (left, right) = bucket.split();
                self.buckets.insert(index, right);
                self.buckets.insert(index, left);
                continue;
            }

            // Full foreign bucket: the oldest peer decides.
            let oldest = bucket.nodes[0].clone();
            if pinger.ping(&oldest).await {
                log::debug!("bucket full, keeping live peer: node={}", oldest);
                let bucket = &mut self.buckets[index];
                let node = bucket.nodes.remove(0);
                bucket.nodes.push(node);
            } else {
                log::debug!("evicting unresponsive peer: old={}, new={}", oldest, new);
                let bucket = &mut self.buckets[index];
                bucket.nodes.remove(0);
                bucket.nodes.push(new);
            }

            return;
        }
    }

    /// All known peers, in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.buckets.iter().flat_map(|bucket| bucket.nodes.iter())
    }

    /// The up to `n` known peers closest to `target` by XOR distance.
    pub fn nearest(&self, target: &Id, n: usize) -> Vec<Node> {
        let mut nodes: Vec<&Node> = self.iter().collect();
        nodes.sort_by_key(|node| node.id.xor(target));
        nodes.into_iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(KBucket::is_empty)
    }

    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    pub fn local(&self) -> &Id {
        &self.local
    }
}
