//! ## Kademlia DHT node
//!
//! [paper]: https://pdos.csail.mit.edu/~petar/papers/maymounkov-kademlia-lncs.pdf
//!
//! Wires the RPC transport, the routing table and the lookup engine into a
//! node that can join an overlay and cooperatively store and retrieve
//! opaque byte values under 160-bit keys. Every served request feeds the
//! routing table, so the view of the network sharpens simply by being
//! talked to.
//!
//! There is no process-wide state: [`Server::start`] returns a handle and
//! any number of nodes can live in one process, which is how the
//! integration tests run whole overlays on loopback.

pub mod lookup;
pub mod routing;
pub mod rpc;

use std::sync::Arc;
use std::time::Duration;

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use codec::message::WireError;
use codec::payload::{self, CallArgs, ReplyValue};
use codec::{Addr, Id, Node, Value};

use self::lookup::{LookupKind, LookupOutcome, lookup};
use self::routing::{Pinger, RoutingTable};
use self::rpc::{Endpoint, EndpointOptions, RpcError, RpcObserver};

/// Replication factor: bucket capacity and lookup result width.
pub const DEFAULT_K: usize = 20;

/// Lookup query concurrency.
pub const DEFAULT_ALPHA: usize = 3;

pub struct ServerOptions {
    /// Address the UDP socket binds to; port 0 picks an ephemeral port.
    pub bind: Addr,
    /// Local node id; random when absent.
    pub id: Option<Id>,
    pub k: usize,
    pub alpha: usize,
    /// Per-call RPC deadline.
    pub timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind: Addr::new("127.0.0.1", 7890),
            id: None,
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            timeout: Duration::from_secs(30),
        }
    }
}

struct State {
    node: Node,
    k: usize,
    alpha: usize,
    // All mutation of the table happens behind this one lock, probe
    // included, so updates from concurrent inbound requests serialize.
    routing: AsyncMutex<RoutingTable>,
    storage: Mutex<HashMap<Id, Vec<u8>>>,
}

/// A running dht node.
pub struct Server {
    state: Arc<State>,
    endpoint: Endpoint,
}

/// Liveness probe over the rpc transport. An error reply still proves the
/// peer is there; only silence or shutdown counts as gone.
struct Prober {
    endpoint: Endpoint,
}

#[async_trait]
impl Pinger for Prober {
    async fn ping(&self, node: &Node) -> bool {
        !matches!(
            self.endpoint.call(&node.addr, payload::PING, Vec::new()).await,
            Err(RpcError::Timeout | RpcError::Cancelled)
        )
    }
}

/// Feeds the caller of every served request into the routing table.
struct Ingest {
    state: Arc<State>,
    endpoint: Endpoint,
}

#[async_trait]
impl RpcObserver for Ingest {
    async fn on_rpc(&self, caller: &Node) {
        update_table(&self.state, &self.endpoint, caller.clone()).await;
    }
}

async fn update_table(state: &State, endpoint: &Endpoint, node: Node) {
    let prober = Prober {
        endpoint: endpoint.clone(),
    };
    state.routing.lock().await.update(node, &prober).await;
}

/// Snapshot the routing table and run a lookup from it.
///
/// `exclude` keeps a served lookup from bouncing straight back to the peer
/// that asked for it.
async fn lookup_from(
    state: &Arc<State>,
    endpoint: &Endpoint,
    target: Id,
    kind: LookupKind,
    exclude: &Id,
) -> LookupOutcome {
    let seed = {
        let routing = state.routing.lock().await;
        routing
            .iter()
            .filter(|node| node.id != state.node.id && node.id != *exclude)
            .cloned()
            .collect()
    };

    lookup(endpoint.clone(), seed, target, kind, state.k, state.alpha).await
}

/// A `find_node` lookup can only ever produce nodes.
async fn lookup_nodes(
    state: &Arc<State>,
    endpoint: &Endpoint,
    target: Id,
    exclude: &Id,
) -> Vec<Node> {
    match lookup_from(state, endpoint, target, LookupKind::FindNode, exclude).await {
        LookupOutcome::Nodes(nodes) => nodes,
        LookupOutcome::Value(_) => Vec::new(),
    }
}

fn bad_args() -> WireError {
    WireError::Handler("invalid arguments".to_string())
}

fn register_handlers(endpoint: &Endpoint, state: &Arc<State>) {
    endpoint.register(payload::PING, |_caller: Node, _args: Vec<Value>| async move {
        Ok::<_, WireError>(ReplyValue::Pong.into_value())
    });

    {
        let state = state.clone();
        endpoint.register(payload::STORE, move |_caller: Node, args: Vec<Value>| {
            let state = state.clone();
            async move {
                match CallArgs::from_values(payload::STORE, &args) {
                    Ok(CallArgs::Store { key, value }) => {
                        log::debug!("storing value: key={}, size={}", key, value.len());
                        state.storage.lock().insert(key, value);
                        Ok(ReplyValue::Stored.into_value())
                    }
                    _ => Err(bad_args()),
                }
            }
        });
    }

    {
        let state = state.clone();
        let handle = endpoint.clone();
        endpoint.register(payload::FIND_NODE, move |caller: Node, args: Vec<Value>| {
            let state = state.clone();
            let endpoint = handle.clone();
            async move {
                let id = match CallArgs::from_values(payload::FIND_NODE, &args) {
                    Ok(CallArgs::FindNode { id }) => id,
                    _ => return Err(bad_args()),
                };
                let nodes = lookup_nodes(&state, &endpoint, id, &caller.id).await;
                Ok(ReplyValue::Nodes(nodes).into_value())
            }
        });
    }

    {
        let state = state.clone();
        let handle = endpoint.clone();
        endpoint.register(payload::FIND_VALUE, move |caller: Node, args: Vec<Value>| {
            let state = state.clone();
            let endpoint = handle.clone();
            async move {
                let id = match CallArgs::from_values(payload::FIND_VALUE, &args) {
                    Ok(CallArgs::FindValue { id }) => id,
                    _ => return Err(bad_args()),
                };

                if let Some(value) = state.storage.lock().get(&id).cloned() {
                    return Ok(ReplyValue::Value(value).into_value());
                }

                let reply = match lookup_from(&state, &endpoint, id, LookupKind::FindValue, &caller.id)
                    .await
                {
                    LookupOutcome::Value(value) => ReplyValue::Value(value),
                    LookupOutcome::Nodes(nodes) => ReplyValue::Nodes(nodes),
                };
                Ok(reply.into_value())
            }
        });
    }
}

impl Server {
    /// Bring up a node: bind the transport, register the four protocol
    /// handlers and join the overlay through the bootstrap peers.
    ///
    /// A bootstrap peer that cannot be reached is logged and skipped; the
    /// node still comes up, if necessary alone.
    pub async fn start(options: ServerOptions, bootstrap: &[Node]) -> std::io::Result<Server> {
        let id = options.id.unwrap_or_else(Id::random);
        let endpoint = Endpoint::bind(
            Node::new(id, options.bind),
            EndpointOptions {
                timeout: options.timeout,
            },
        )
        .await?;
        let node = endpoint.local_node().clone();
        log::info!("dht node listening: id={}, addr={}", node.id, node.addr);

        let state = Arc::new(State {
            node: node.clone(),
            k: options.k,
            alpha: options.alpha,
            routing: AsyncMutex::new(RoutingTable::new(id, options.k)),
            storage: Mutex::new(HashMap::new()),
        });

        register_handlers(&endpoint, &state);
        endpoint.serve(Ingest {
            state: state.clone(),
            endpoint: endpoint.clone(),
        });

        let server = Server { state, endpoint };
        server.join(bootstrap).await;
        Ok(server)
    }

    /// Ask every bootstrap peer for the neighbourhood of the local id and
    /// ingest whatever comes back.
    async fn join(&self, bootstrap: &[Node]) {
        if bootstrap.is_empty() {
            return;
        }

        let mut queries = Vec::with_capacity(bootstrap.len());
        for peer in bootstrap {
            let endpoint = self.endpoint.clone();
            let addr = peer.addr.clone();
            let local = self.state.node.id;
            queries.push(tokio::spawn(async move {
                endpoint
                    .call(&addr, payload::FIND_NODE, vec![local.to_value()])
                    .await
            }));
        }

        for (peer, query) in bootstrap.iter().zip(queries) {
            let nodes = match query.await {
                Ok(Ok(value)) => match ReplyValue::from_value(payload::FIND_NODE, &value) {
                    Ok(ReplyValue::Nodes(nodes)) => nodes,
                    _ => {
                        log::error!("bootstrap peer sent a malformed reply: node={}", peer);
                        continue;
                    }
                },
                Ok(Err(e)) => {
                    log::error!("failed to connect bootstrap peer: node={}, error={}", peer, e);
                    continue;
                }
                Err(e) => {
                    log::error!("bootstrap query aborted: node={}, error={}", peer, e);
                    continue;
                }
            };

            update_table(&self.state, &self.endpoint, peer.clone()).await;
            for node in nodes {
                update_table(&self.state, &self.endpoint, node).await;
            }
        }

        log::info!(
            "joined the overlay: id={}, known_nodes={}",
            self.state.node.id,
            self.state.routing.lock().await.len()
        );
    }

    /// Store a value locally and on the k nodes closest to the key.
    ///
    /// Best effort: replica failures are logged and swallowed, the local
    /// insertion alone makes the call succeed.
    pub async fn set(&self, key: Id, value: Vec<u8>) {
        self.state.storage.lock().insert(key, value.clone());

        let nodes = lookup_nodes(&self.state, &self.endpoint, key, &self.state.node.id).await;
        let mut stores = Vec::with_capacity(nodes.len());
        for node in nodes {
            let endpoint = self.endpoint.clone();
            let args = CallArgs::Store {
                key,
                value: value.clone(),
            };
            stores.push(tokio::spawn(async move {
                let result = endpoint
                    .call(&node.addr, payload::STORE, args.into_values())
                    .await;
                if let Err(e) = result {
                    log::debug!("store replica failed: node={}, error={}", node, e);
                }
            }));
        }

        for store in stores {
            let _ = store.await;
        }
    }

    /// Fetch a value, first locally, then through a `find_value` walk.
    pub async fn get(&self, key: &Id) -> Option<Vec<u8>> {
        if let Some(value) = self.state.storage.lock().get(key).cloned() {
            return Some(value);
        }

        match lookup_from(
            &self.state,
            &self.endpoint,
            *key,
            LookupKind::FindValue,
            &self.state.node.id,
        )
        .await
        {
            LookupOutcome::Value(value) => Some(value),
            LookupOutcome::Nodes(_) => None,
        }
    }

    /// Tear down the transport: outstanding calls fail with `Cancelled`.
    pub fn close(&self) {
        self.endpoint.close();
    }

    pub fn node(&self) -> &Node {
        &self.state.node
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Snapshot of every peer in the routing table, in bucket order.
    pub async fn known_nodes(&self) -> Vec<Node> {
        self.state.routing.lock().await.iter().cloned().collect()
    }

    /// Snapshot of the local store.
    pub fn storage_entries(&self) -> Vec<(Id, Vec<u8>)> {
        self.state
            .storage
            .lock()
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect()
    }
}
