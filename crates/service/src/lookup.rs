//! Iterative closest-node search.
//!
//! The caller drives the walk: α workers repeatedly pop the closest
//! not-yet-queried candidate, ask it for nodes near the target, and feed
//! whatever comes back into the shared candidate queue. The queue is bounded
//! to the k best, so every round only admits peers closer than what has
//! already been seen and the walk converges onto the target's
//! neighbourhood.
//!
//! A peer that times out or fails simply contributes nothing. Two events
//! short-circuit the whole search: a `find_value` peer answering with the
//! bytes themselves, and any peer returning a node whose id equals the
//! target.

use std::sync::Arc;

use ahash::{HashSet, HashSetExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use codec::payload::{self, ReplyValue};
use codec::{Id, Node};

use crate::rpc::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    FindNode,
    FindValue,
}

impl LookupKind {
    pub fn func(&self) -> &'static str {
        match self {
            Self::FindNode => payload::FIND_NODE,
            Self::FindValue => payload::FIND_VALUE,
        }
    }
}

/// What a lookup produced.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// The k closest nodes found, nearest first; a single element when the
    /// target itself was discovered.
    Nodes(Vec<Node>),
    /// `find_value` only: a peer served the stored bytes.
    Value(Vec<u8>),
}

/// A worker's reason to end the search early.
enum Found {
    Value(Vec<u8>),
    Target(Node),
}

/// The candidates not yet queried, closest to the target last.
///
/// Bounded: inserting an id farther than the current k best is a no-op once
/// the queue is full, which is what makes the search terminate.
struct CandidateQueue {
    target: Id,
    limit: usize,
    nodes: Vec<Node>,
}

impl CandidateQueue {
    fn new(target: Id, limit: usize) -> CandidateQueue {
        CandidateQueue {
            target,
            limit,
            nodes: Vec::new(),
        }
    }

    fn push(&mut self, node: Node) {
        if self.nodes.iter().any(|known| known.id == node.id) {
            return;
        }

        let distance = node.id.xor(&self.target);
        let position = self
            .nodes
            .partition_point(|known| known.id.xor(&self.target) > distance);
        self.nodes.insert(position, node);
        if self.nodes.len() > self.limit {
            self.nodes.remove(0);
        }
    }

    fn pop(&mut self) -> Option<Node> {
        self.nodes.pop()
    }
}

struct LookupState {
    candidates: CandidateQueue,
    queried: Vec<Node>,
    queried_ids: HashSet<Id>,
}

impl LookupState {
    /// Claim the closest unqueried candidate.
    fn next(&mut self) -> Option<Node> {
        let node = self.candidates.pop()?;
        self.queried_ids.insert(node.id);
        self.queried.push(node.clone());
        Some(node)
    }

    fn offer(&mut self, node: Node) {
        if !self.queried_ids.contains(&node.id) {
            self.candidates.push(node);
        }
    }
}

/// Run an iterative lookup for `target` over the given seed peers.
///
/// The seed is every routing-table peer except the local node and the
/// original caller; the queue trims it to the k nearest.
pub async fn lookup(
    endpoint: Endpoint,
    seed: Vec<Node>,
    target: Id,
    kind: LookupKind,
    k: usize,
    alpha: usize,
) -> LookupOutcome {
    let mut candidates = CandidateQueue::new(target, k);
    for node in seed {
        candidates.push(node);
    }

    let state = Arc::new(Mutex::new(LookupState {
        candidates,
        queried: Vec::new(),
        queried_ids: HashSet::new(),
    }));

    let alpha = alpha.max(1);
    let (found, mut on_found) = mpsc::channel(alpha);
    let mut workers = Vec::with_capacity(alpha);
    for _ in 0..alpha {
        workers.push(tokio::spawn(worker(
            endpoint.clone(),
            state.clone(),
            target,
            kind,
            found.clone(),
        )));
    }
    drop(found);

    // The channel closes once every worker has drained the queue; a message
    // instead means the search ended early and the rest can stop.
    let outcome = match on_found.recv().await {
        Some(Found::Value(bytes)) => LookupOutcome::Value(bytes),
        Some(Found::Target(node)) => LookupOutcome::Nodes(vec![node]),
        None => {
            let mut state = state.lock();
            state.queried.sort_by_key(|node| node.id.xor(&target));
            state.queried.truncate(k);
            return LookupOutcome::Nodes(std::mem::take(&mut state.queried));
        }
    };

    for worker in workers {
        worker.abort();
    }

    outcome
}

async fn worker(
    endpoint: Endpoint,
    state: Arc<Mutex<LookupState>>,
    target: Id,
    kind: LookupKind,
    found: mpsc::Sender<Found>,
) {
    loop {
        let node = match state.lock().next() {
            Some(node) => node,
            None => return,
        };

        let value = match endpoint
            .call(&node.addr, kind.func(), vec![target.to_value()])
            .await
        {
            Ok(value) => value,
            Err(e) => {
                log::debug!("lookup query failed: node={}, error={}", node, e);
                continue;
            }
        };

        match ReplyValue::from_value(kind.func(), &value) {
            Ok(ReplyValue::Value(bytes)) => {
                let _ = found.send(Found::Value(bytes)).await;
                return;
            }
            Ok(ReplyValue::Nodes(nodes)) => {
                if let Some(hit) = nodes.iter().find(|node| node.id == target) {
                    let _ = found.send(Found::Target(hit.clone())).await;
                    return;
                }

                let mut state = state.lock();
                for node in nodes {
                    state.offer(node);
                }
            }
            Ok(_) | Err(_) => {
                log::debug!("lookup reply malformed: node={}, func={}", node, kind.func());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use codec::Addr;

    use super::*;

    fn node(id: u64) -> Node {
        Node::new(Id::from(id), Addr::new("127.0.0.1", 7890))
    }

    #[test]
    fn test_queue_pops_closest_first() {
        let mut queue = CandidateQueue::new(Id::MIN, 20);
        for id in [9, 3, 12, 1, 7] {
            queue.push(node(id));
        }

        let mut popped = Vec::new();
        while let Some(node) = queue.pop() {
            popped.push(node.id);
        }

        assert_eq!(
            popped,
            [1u64, 3, 7, 9, 12].map(Id::from).to_vec(),
        );
    }

    #[test]
    fn test_queue_is_bounded_to_the_closest() {
        let mut queue = CandidateQueue::new(Id::MIN, 3);
        for id in [10, 20, 30, 5, 40, 2] {
            queue.push(node(id));
        }

        assert_eq!(queue.nodes.len(), 3);
        assert_eq!(queue.pop().unwrap().id, Id::from(2u64));
        assert_eq!(queue.pop().unwrap().id, Id::from(5u64));
        assert_eq!(queue.pop().unwrap().id, Id::from(10u64));
    }

    #[test]
    fn test_queue_suppresses_duplicates() {
        let mut queue = CandidateQueue::new(Id::MIN, 20);
        queue.push(node(1));
        queue.push(node(1));

        assert_eq!(queue.nodes.len(), 1);
    }

    #[test]
    fn test_queried_nodes_are_not_reoffered() {
        let mut state = LookupState {
            candidates: CandidateQueue::new(Id::MIN, 20),
            queried: Vec::new(),
            queried_ids: HashSet::new(),
        };

        state.offer(node(1));
        assert_eq!(state.next().unwrap().id, Id::from(1u64));
        state.offer(node(1));
        assert!(state.next().is_none());
    }
}
