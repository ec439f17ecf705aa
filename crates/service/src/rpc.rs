//! Request/response RPC over unreliable unicast datagrams.
//!
//! One UDP socket per endpoint. Outbound calls get a process-locally unique
//! request id and a slot in the pending table; the receive loop demultiplexes
//! every inbound datagram into either a handler invocation (replied to the
//! datagram's source address) or the completion of a pending call. There is
//! no ordering guarantee between calls: correlation is by request id alone.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;

use codec::message::{Body, Message, WireError};
use codec::{Addr, Node, Value};

/// Failure of a single outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No reply within the per-call deadline.
    Timeout,
    /// The endpoint was closed while the call was outstanding.
    Cancelled,
    /// The remote has no handler under the requested name.
    NoSuchRpc,
    /// The remote handler failed.
    Remote(String),
}

impl std::error::Error for RpcError {}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Cancelled => write!(f, "request cancelled"),
            Self::NoSuchRpc => write!(f, "no such rpc"),
            Self::Remote(detail) => write!(f, "remote handler failed: {}", detail),
        }
    }
}

impl From<WireError> for RpcError {
    fn from(error: WireError) -> Self {
        match error {
            WireError::NoSuchRpc => Self::NoSuchRpc,
            WireError::Handler(detail) => Self::Remote(detail),
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, WireError>> + Send>>;

/// A registered request handler.
///
/// Implemented for every async closure of the right shape, so registration
/// reads as `endpoint.register(name, |caller, args| async move { .. })`.
pub trait RpcHandler: Send + Sync {
    fn call(&self, caller: Node, args: Vec<Value>) -> HandlerFuture;
}

impl<F, Fut> RpcHandler for F
where
    F: Fn(Node, Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, WireError>> + Send + 'static,
{
    fn call(&self, caller: Node, args: Vec<Value>) -> HandlerFuture {
        Box::pin(self(caller, args))
    }
}

/// Hook invoked with the caller of every served request, before the handler
/// runs and regardless of whether the handler succeeds. The dht server uses
/// it to feed the routing table.
#[async_trait]
pub trait RpcObserver: Send + Sync {
    #[allow(unused_variables)]
    async fn on_rpc(&self, caller: &Node) {}
}

pub struct EndpointOptions {
    /// Per-call deadline.
    pub timeout: Duration,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

type Pending = oneshot::Sender<Result<Value, RpcError>>;

struct Shared {
    node: Node,
    socket: UdpSocket,
    timeout: Duration,
    sequence: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

/// A datagram RPC endpoint. Clones share the socket and all tables.
#[derive(Clone)]
pub struct Endpoint(Arc<Shared>);

impl Endpoint {
    /// Bind the UDP socket.
    ///
    /// Binding port 0 picks an ephemeral port; the advertised address of
    /// `node` is patched from the resolved local address so that callers
    /// always announce a reachable port.
    pub async fn bind(mut node: Node, options: EndpointOptions) -> std::io::Result<Endpoint> {
        let socket = UdpSocket::bind((node.addr.host.as_str(), node.addr.port)).await?;
        node.addr.port = socket.local_addr()?.port();

        Ok(Endpoint(Arc::new(Shared {
            node,
            socket,
            timeout: options.timeout,
            sequence: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            receiver: Mutex::new(None),
        })))
    }

    /// The identity announced as `caller` on every outbound call.
    pub fn local_node(&self) -> &Node {
        &self.0.node
    }

    /// Bind a handler to a function name. The handler's argument decoding
    /// defines the schema of the call; replacement of an existing name is
    /// allowed.
    pub fn register<H>(&self, name: &str, handler: H)
    where
        H: RpcHandler + 'static,
    {
        self.0
            .handlers
            .write()
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Spawn the receive loop.
    pub fn serve<O>(&self, observer: O)
    where
        O: RpcObserver + 'static,
    {
        let shared = self.0.clone();
        let observer: Arc<dyn RpcObserver> = Arc::new(observer);
        let handle = tokio::spawn(receive_loop(shared, observer));
        *self.0.receiver.lock() = Some(handle);
    }

    /// Send a call and await its reply.
    ///
    /// A send failure leaves the request pending on purpose: datagrams are
    /// best-effort and the deadline is the only authority on failure.
    pub async fn call(&self, addr: &Addr, func: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.0.sequence.fetch_add(1, Ordering::Relaxed);
        let (completion, waiter) = oneshot::channel();
        self.0.pending.lock().insert(id, completion);

        let message = Message::call(id, self.0.node.clone(), func, args);
        log::debug!("sending rpc request: id={}, func={}, addr={}", id, func, addr);
        if let Err(e) = self
            .0
            .socket
            .send_to(&message.encode(), (addr.host.as_str(), addr.port))
            .await
        {
            log::warn!("rpc send error: id={}, addr={}, error={}", id, addr, e);
        }

        match time::timeout(self.0.timeout, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => {
                self.0.pending.lock().remove(&id);
                log::warn!("rpc request timed out: id={}, func={}, addr={}", id, func, addr);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Stop the receive loop, fail every outstanding call with
    /// [`RpcError::Cancelled`] and drop all handlers.
    pub fn close(&self) {
        if let Some(handle) = self.0.receiver.lock().take() {
            handle.abort();
        }

        self.0.handlers.write().clear();
        self.0.pending.lock().clear();
    }

    /// Number of outstanding calls.
    pub fn pending_requests(&self) -> usize {
        self.0.pending.lock().len()
    }
}

/// Read datagrams until the endpoint is closed.
///
/// Remote hosts shutting down surface as ConnectionReset on some platforms;
/// that is not an endpoint failure.
async fn receive_loop(shared: Arc<Shared>, observer: Arc<dyn RpcObserver>) {
    let mut buf = vec![0u8; 65536];

    loop {
        let (size, addr) = match shared.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::ConnectionReset {
                    continue;
                }

                log::error!("udp socket receive error: {}", e);
                return;
            }
        };

        log::trace!("udp socket receive: size={}, addr={}", size, addr);
        let message = match Message::decode(&buf[..size]) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("received invalid datagram: addr={}, error={}", addr, e);
                continue;
            }
        };

        match message.body {
            Body::Call { caller, args } => {
                tokio::spawn(dispatch(
                    shared.clone(),
                    observer.clone(),
                    message.id,
                    message.func,
                    caller,
                    args,
                    addr,
                ));
            }
            Body::Reply(result) => {
                complete(&shared, message.id, result.map_err(RpcError::from));
            }
        }
    }
}

/// Serve one inbound call and send the reply back to the datagram's source.
async fn dispatch(
    shared: Arc<Shared>,
    observer: Arc<dyn RpcObserver>,
    id: u64,
    func: String,
    caller: Node,
    args: Vec<Value>,
    addr: SocketAddr,
) {
    log::debug!("received rpc request: id={}, func={}, caller={}", id, func, caller);
    observer.on_rpc(&caller).await;

    let handler = shared.handlers.read().get(&func).cloned();
    let result = match handler {
        Some(handler) => handler.call(caller, args).await,
        None => Err(WireError::NoSuchRpc),
    };

    log::debug!(
        "sending rpc response: id={}, ok={}, addr={}",
        id,
        result.is_ok(),
        addr
    );
    let reply = Message::reply(id, func, result);
    if let Err(e) = shared.socket.send_to(&reply.encode(), addr).await {
        log::warn!("rpc reply send error: id={}, addr={}, error={}", id, addr, e);
    }
}

/// Deliver a reply to the waiting caller. Replies that raced a timeout or
/// cancellation have no pending entry left and are dropped.
fn complete(shared: &Shared, id: u64, result: Result<Value, RpcError>) {
    match shared.pending.lock().remove(&id) {
        Some(completion) => {
            let _ = completion.send(result);
        }
        None => log::warn!("rpc response for unknown request: id={}", id),
    }
}
