//! Node runtime: init handshake, request dispatch and the stdio loop
//!
//! Every input line is handled on its own task so a slow handler never holds
//! up the next request. All output funnels through one writer task, which
//! keeps lines whole no matter how many handlers reply at once.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broadcast::{BroadcastEngine, BroadcastStats};
use crate::error::AxonError;
use crate::idgen::IdGenerator;
use crate::logging::{development_config, production_config, CorrelationId, LogConfig};
use crate::message::{Envelope, NodeId, Payload, RawEnvelope};
use crate::retry::{RetryConfig, RetryScheduler};
use crate::rpc::Outbox;

/// Environment variable names read by [`NodeConfig::from_env`]
pub mod env {
    pub const RETRY_MS: &str = "AXONCAST_RETRY_MS";
    pub const RPC_TIMEOUT_MS: &str = "AXONCAST_RPC_TIMEOUT_MS";
    pub const LOG_PRESET: &str = "AXONCAST_LOG_PRESET";
    pub const LOG: &str = "AXONCAST_LOG";
    pub const LOG_JSON: &str = "AXONCAST_LOG_JSON";
}

/// Configuration for an axoncast node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConfig {
    /// Retry scheduler configuration
    pub retry: RetryConfig,
    /// Logging configuration used by the binary
    pub log: LogConfig,
}

impl NodeConfig {
    /// Load overrides from the process environment
    pub fn from_env() -> Result<Self, AxonError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load overrides through `lookup`; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AxonError> {
        let mut config = Self::default();

        if let Some(ms) = lookup(env::RETRY_MS) {
            config.retry.interval = parse_millis(env::RETRY_MS, &ms)?;
        }
        if let Some(ms) = lookup(env::RPC_TIMEOUT_MS) {
            config.retry.rpc_timeout = parse_millis(env::RPC_TIMEOUT_MS, &ms)?;
        }
        // The preset is applied first so the finer settings can override it
        if let Some(preset) = lookup(env::LOG_PRESET) {
            config.log = match preset.trim() {
                "production" => production_config(),
                "development" => development_config(),
                other => {
                    return Err(AxonError::config(format!(
                        "{} must be production or development, got {:?}",
                        env::LOG_PRESET,
                        other
                    )))
                }
            };
        }
        if let Some(level) = lookup(env::LOG) {
            config.log.level = level;
        }
        if let Some(json) = lookup(env::LOG_JSON) {
            config.log.json = json.parse().map_err(|_| {
                AxonError::config(format!("{} must be true or false, got {:?}", env::LOG_JSON, json))
            })?;
        }

        Ok(config)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, AxonError> {
    match value.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(AxonError::config(format!(
            "{} must be a positive number of milliseconds, got {:?}",
            key, value
        ))),
        Ok(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// A single cluster node
pub struct AxonNode {
    config: NodeConfig,
    correlation_id: CorrelationId,
    outbox: Arc<Outbox>,
    engine: Arc<BroadcastEngine>,
    ids: OnceLock<IdGenerator>,
    cluster: OnceLock<Vec<NodeId>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl AxonNode {
    /// Create a new node
    pub fn new(config: NodeConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let outbox = Arc::new(Outbox::new(outbound_tx));
        let engine = Arc::new(BroadcastEngine::new(Arc::clone(&outbox)));

        Self {
            config,
            correlation_id: CorrelationId::new(),
            outbox,
            engine,
            ids: OnceLock::new(),
            cluster: OnceLock::new(),
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Node id assigned by `init`, if it has arrived
    pub fn node_id(&self) -> Option<&str> {
        self.outbox.node_id().ok()
    }

    /// Every node id in the cluster, as announced by `init`
    pub fn cluster(&self) -> &[NodeId] {
        self.cluster.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Configuration the node was built with
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Correlation id tagging this node's log lines
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Engine handling the broadcast workload
    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    /// Get broadcast statistics
    pub async fn stats(&self) -> BroadcastStats {
        self.engine.stats().await
    }

    /// Serve `reader` until it reaches end of input, writing to `writer`
    ///
    /// Starts the retry scheduler and the writer task, spawns a handler per
    /// input line, and on end of input waits for in-flight handlers and
    /// flushes every queued envelope before returning.
    pub async fn run<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<(), AxonError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| AxonError::config("Node is already running"))?;

        let span = info_span!("node", correlation_id = %self.correlation_id.short());
        info!(parent: &span, retry_ms = self.config.retry.interval.as_millis() as u64, "Starting axoncast node");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let writer_task = tokio::spawn(
            write_envelopes(outbound_rx, writer, shutdown_rx).instrument(span.clone()),
        );
        let retry_task = tokio::spawn(
            RetryScheduler::new(Arc::clone(&self.engine), self.config.retry.clone())
                .run()
                .instrument(span.clone()),
        );

        let mut handlers = JoinSet::new();
        let mut lines = reader.lines();
        let read_result = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let node = Arc::clone(&self);
                        handlers.spawn(async move { node.handle_line(&line).await }.instrument(span.clone()));
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(AxonError::from(e)),
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!(parent: &span, error = %e, "Handler task failed");
                    }
                }
            }
        };

        info!(parent: &span, "Input closed, draining handlers");
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!(parent: &span, error = %e, "Handler task failed");
            }
        }

        retry_task.abort();
        let _ = shutdown_tx.send(());
        writer_task.await??;

        info!(parent: &span, "Node stopped");
        read_result
    }

    /// Decode one input line and handle it
    async fn handle_line(&self, line: &str) {
        let raw = match RawEnvelope::parse(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable line");
                return;
            }
        };

        let (src, dest, msg_id, is_response) =
            (raw.src.clone(), raw.dest.clone(), raw.msg_id(), raw.is_response());

        let result = match raw.decode() {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                warn!(%src, error = %e, "Rejecting request");
                match msg_id {
                    Some(msg_id) if !is_response => {
                        self.outbox
                            .reply_to(&dest, &src, Some(msg_id), Payload::error(&e))
                    }
                    _ => Ok(()),
                }
            }
        };

        if let Err(e) = result {
            error!(error = %e, "Failed to send reply");
        }
    }

    /// Handle a decoded envelope
    ///
    /// Handler failures become `error` replies; only a failure to queue
    /// output is returned.
    pub async fn handle(&self, envelope: Envelope) -> Result<(), AxonError> {
        if envelope.is_response() {
            self.engine.on_response(&envelope).await;
            return Ok(());
        }

        match self.dispatch(&envelope).await {
            Ok(()) => Ok(()),
            Err(AxonError::ChannelClosed) => Err(AxonError::ChannelClosed),
            Err(e) => {
                warn!(src = %envelope.src, kind = envelope.body.kind(), error = %e, "Request failed");
                if envelope.body.msg_id.is_some() {
                    self.outbox.reply(&envelope, Payload::error(&e))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn dispatch(&self, request: &Envelope) -> Result<(), AxonError> {
        let payload = &request.body.payload;
        if !matches!(payload, Payload::Init { .. }) && !self.outbox.is_initialized() {
            return Err(AxonError::NotInitialized);
        }

        match payload {
            Payload::Init { node_id, node_ids } => self.on_init(request, node_id, node_ids),
            Payload::Echo { echo } => self
                .outbox
                .reply(request, Payload::EchoOk { echo: echo.clone() }),
            Payload::Generate => {
                let id = self
                    .ids
                    .get()
                    .ok_or(AxonError::NotInitialized)?
                    .generate();
                self.outbox.reply(request, Payload::GenerateOk { id })
            }
            Payload::Broadcast { message } => self.engine.on_broadcast(request, *message).await,
            Payload::Read => self.engine.on_read(request).await,
            Payload::Topology { topology } => self.engine.on_topology(request, topology).await,
            Payload::InitOk
            | Payload::EchoOk { .. }
            | Payload::GenerateOk { .. }
            | Payload::BroadcastOk
            | Payload::ReadOk { .. }
            | Payload::TopologyOk
            | Payload::Error { .. } => {
                // A response with no in_reply_to cannot be correlated; answering
                // it with an error could bounce between nodes forever
                debug!(src = %request.src, kind = request.body.kind(), "Ignoring uncorrelated response");
                Ok(())
            }
        }
    }

    fn on_init(&self, request: &Envelope, node_id: &str, node_ids: &[NodeId]) -> Result<(), AxonError> {
        if self.outbox.initialize(node_id) {
            let _ = self.ids.set(IdGenerator::for_node(node_id));
            let _ = self.cluster.set(node_ids.to_vec());
            info!(node_id, cluster_size = node_ids.len(), "Node initialized");
        } else {
            warn!(node_id, "Ignoring repeated init");
        }
        self.outbox.reply(request, Payload::InitOk)
    }
}

/// Write each queued envelope as one line until shutdown is signalled
async fn write_envelopes<W>(
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    mut writer: W,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<(), AxonError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            envelope = outbound_rx.recv() => match envelope {
                Some(envelope) => write_line(&mut writer, &envelope).await?,
                None => break,
            },
            _ = &mut shutdown_rx => {
                while let Ok(envelope) = outbound_rx.try_recv() {
                    write_line(&mut writer, &envelope).await?;
                }
                break;
            }
        }
    }
    writer.flush().await?;
    Ok(())
}

async fn write_line<W>(writer: &mut W, envelope: &Envelope) -> Result<(), AxonError>
where
    W: AsyncWrite + Unpin,
{
    let line = match envelope.to_line() {
        Ok(line) => line,
        Err(e) => {
            error!(dest = %envelope.dest, error = %e, "Failed to encode envelope");
            return Ok(());
        }
    };
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Builder for creating and configuring nodes
pub struct AxonNodeBuilder {
    config: NodeConfig,
}

impl AxonNodeBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the retry interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry.interval = interval;
        self
    }

    /// Set how long a send waits for its response before being forgotten
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.retry.rpc_timeout = timeout;
        self
    }

    /// Set logging configuration
    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.config.log = log;
        self
    }

    /// Build the node
    pub fn build(self) -> AxonNode {
        AxonNode::new(self.config)
    }
}

impl Default for AxonNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
