use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;
use wallet_core::config::ConnectionConfig;
use wallet_types::ChainNode;

use crate::connection::{ChainConnection, ConnectionId, ConnectionState, ConnectionStateDelegate};
use crate::error::{ConnectionError, ConnectionResult};

const HEALTH_METHOD: &str = "system_health";

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone)]
struct RankedNode {
    url: Url,
    name: String,
}

struct Session {
    state: ConnectionState,
    nodes: Vec<RankedNode>,
    selected: Option<Url>,
    /// Bumped on disconnect so stale reconnect loops stop
    generation: u64,
    reconnect: Option<AbortHandle>,
}

struct Inner {
    id: ConnectionId,
    chain_name: String,
    http: HttpClient,
    config: ConnectionConfig,
    runtime: Handle,
    session: Mutex<Session>,
    events: mpsc::UnboundedSender<ConnectionState>,
    request_id: AtomicU64,
}

type SharedDelegate = Arc<Mutex<Option<Weak<dyn ConnectionStateDelegate>>>>;

/// JSON-RPC over HTTP connection with ranked node failover.
///
/// `connect` tries nodes best-rank first. When every node fails the
/// connection waits on an exponential schedule and tries again until it
/// connects or `disconnect` is called.
pub struct JsonRpcConnection {
    inner: Arc<Inner>,
    delegate: SharedDelegate,
}

fn rank_nodes(chain_name: &str, nodes: Vec<ChainNode>) -> Vec<RankedNode> {
    let mut nodes = nodes;
    nodes.sort_by_key(|node| node.order);

    nodes
        .into_iter()
        .filter_map(|node| match Url::parse(&node.url) {
            Ok(url) => Some(RankedNode { url, name: node.name }),
            Err(e) => {
                warn!("Skipping node {} of {}: {}", node.url, chain_name, e);
                None
            }
        })
        .collect()
}

impl JsonRpcConnection {
    /// Must be called inside a tokio runtime
    pub fn new(
        chain_name: &str,
        nodes: Vec<ChainNode>,
        config: ConnectionConfig,
        http: HttpClient,
    ) -> ConnectionResult<Self> {
        let ranked = rank_nodes(chain_name, nodes);
        if ranked.is_empty() {
            return Err(ConnectionError::UnknownError(format!("No usable node url for {}", chain_name)));
        }

        let runtime = Handle::try_current()
            .map_err(|e| ConnectionError::UnknownError(format!("No async runtime: {}", e)))?;

        let (events, mut receiver) = mpsc::unbounded_channel::<ConnectionState>();
        let delegate: SharedDelegate = Arc::new(Mutex::new(None));
        let id = ConnectionId::next();

        let delegate_ref = delegate.clone();
        runtime.spawn(async move {
            while let Some(state) = receiver.recv().await {
                let delegate = delegate_ref
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .and_then(Weak::upgrade);

                if let Some(delegate) = delegate {
                    delegate.connection_state_did_change(id, state);
                }
            }
        });

        let inner = Inner {
            id,
            chain_name: chain_name.to_string(),
            http,
            config,
            runtime,
            session: Mutex::new(Session {
                state: ConnectionState::NotConnected,
                nodes: ranked,
                selected: None,
                generation: 0,
                reconnect: None,
            }),
            events,
            request_id: AtomicU64::new(1),
        };

        Ok(Self { inner: Arc::new(inner), delegate })
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, session: &mut Session, state: ConnectionState) {
        if session.state != state {
            debug!("{} connection: {:?} -> {:?}", self.chain_name, session.state, state);
            session.state = state;
            let _ = self.events.send(state);
        }
    }

    fn start_loop(self: &Arc<Self>, session: &mut Session) {
        if let Some(previous) = session.reconnect.take() {
            previous.abort();
        }

        let generation = session.generation;
        let task = self.runtime.spawn(Inner::run_session(self.clone(), generation));
        session.reconnect = Some(task.abort_handle());
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut session = self.session();
        if session.state != ConnectionState::Connected {
            return;
        }

        session.selected = None;
        self.transition(&mut session, ConnectionState::WaitingReconnection);
        self.start_loop(&mut session);
    }

    async fn run_session(inner: Arc<Inner>, generation: u64) {
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(inner.config.reconnect_initial_delay())
            .with_max_interval(inner.config.reconnect_max_delay())
            .with_max_elapsed_time(None)
            .build();

        loop {
            let nodes = {
                let mut session = inner.session();
                if session.generation != generation {
                    return;
                }
                inner.transition(&mut session, ConnectionState::Connecting);
                session.nodes.clone()
            };

            for node in &nodes {
                match inner.post(&node.url, HEALTH_METHOD, json!([])).await {
                    Ok(_) => {
                        let mut session = inner.session();
                        if session.generation != generation {
                            return;
                        }
                        session.selected = Some(node.url.clone());
                        inner.transition(&mut session, ConnectionState::Connected);
                        info!("{} connected via {}", inner.chain_name, node.name);
                        return;
                    }
                    Err(e) => warn!("{} node {} unavailable: {}", inner.chain_name, node.name, e),
                }
            }

            let delay = schedule
                .next_backoff()
                .unwrap_or_else(|| inner.config.reconnect_max_delay());

            {
                let mut session = inner.session();
                if session.generation != generation {
                    return;
                }
                inner.transition(&mut session, ConnectionState::WaitingReconnection);
            }

            debug!("{} reconnecting in {:?}", inner.chain_name, delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn post(&self, url: &Url, method: &str, params: Value) -> ConnectionResult<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(url.clone())
            .timeout(self.config.request_timeout())
            .json(&request)
            .send()
            .await
            .map_err(|e| ConnectionError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectionError::RequestError(format!("HTTP status {}", response.status())));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ConnectionError::ProtocolError(format!("Invalid response body: {}", e)))?;

        if let Some(error) = body.error {
            return Err(ConnectionError::RpcError { code: error.code, message: error.message });
        }

        Ok(body.result)
    }
}

#[async_trait]
impl ChainConnection for JsonRpcConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn state(&self) -> ConnectionState {
        self.inner.session().state
    }

    fn change_nodes(&self, nodes: Vec<ChainNode>) {
        let ranked = rank_nodes(&self.inner.chain_name, nodes);
        if ranked.is_empty() {
            warn!("Ignoring empty node list for {}", self.inner.chain_name);
            return;
        }

        let mut session = self.inner.session();
        let selected_survives = session
            .selected
            .as_ref()
            .map(|url| ranked.iter().any(|node| &node.url == url))
            .unwrap_or(true);

        session.nodes = ranked;

        if !selected_survives && session.state == ConnectionState::Connected {
            session.selected = None;
            self.inner.transition(&mut session, ConnectionState::WaitingReconnection);
            self.inner.start_loop(&mut session);
        }
    }

    fn set_delegate(&self, delegate: Option<Weak<dyn ConnectionStateDelegate>>) {
        *self.delegate.lock().unwrap_or_else(PoisonError::into_inner) = delegate;
    }

    fn connect(&self) {
        let mut session = self.inner.session();
        if session.state != ConnectionState::NotConnected {
            return;
        }

        self.inner.transition(&mut session, ConnectionState::Connecting);
        self.inner.start_loop(&mut session);
    }

    fn disconnect(&self) {
        let mut session = self.inner.session();
        session.generation += 1;
        if let Some(task) = session.reconnect.take() {
            task.abort();
        }
        session.selected = None;
        self.inner.transition(&mut session, ConnectionState::NotConnected);
    }

    async fn send(&self, method: &str, params: Value) -> ConnectionResult<Value> {
        let url = self.inner.session().selected.clone().ok_or(ConnectionError::NotConnected)?;

        match self.inner.post(&url, method, params).await {
            Err(ConnectionError::RequestError(e)) => {
                warn!("{} request {} failed: {}", self.inner.chain_name, method, e);
                self.inner.schedule_reconnect();
                Err(ConnectionError::RequestError(e))
            }
            other => other,
        }
    }
}

impl Drop for JsonRpcConnection {
    fn drop(&mut self) {
        let mut session = self.inner.session();
        session.generation += 1;
        if let Some(task) = session.reconnect.take() {
            task.abort();
        }
    }
}
