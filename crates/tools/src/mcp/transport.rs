use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wayfinder_core::config::TransportConfig;
use wayfinder_core::{CapabilityResult, Result};

use crate::mcp::client::McpClient;

/// Lifecycle of the single capability connection owned by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn can_become(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

/// A capability as declared by the remote service in `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCapability {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// An established request/response channel to the capability service.
#[async_trait]
pub trait CapabilityChannel: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CapabilityResult>;
    async fn list_tools(&self) -> Result<Vec<RemoteCapability>>;
    /// Release the channel and whatever process backs it.
    async fn close(&self);
    /// True once the far end has gone away on its own, e.g. the child exited.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Opens channels for a [`CapabilityTransport`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn CapabilityChannel>>;
}

/// Spawns the configured command and talks MCP over its stdio.
pub struct StdioConnector {
    server_name: String,
    command: String,
    env: HashMap<String, String>,
    cwd: Option<String>,
    request_timeout: Duration,
}

impl StdioConnector {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            server_name: config.server_name.clone(),
            command: config.command.clone(),
            env: config.env.clone(),
            cwd: config.cwd.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(&self) -> Result<Arc<dyn CapabilityChannel>> {
        let client = McpClient::start(
            &self.server_name,
            &self.command,
            &self.env,
            self.cwd.as_deref(),
            self.request_timeout,
        )
        .await?;
        Ok(Arc::new(client))
    }
}

/// Lazily connecting, self-healing handle on the capability service.
///
/// Every operation goes through `ensure_connected`, so callers never sequence
/// `connect()` themselves. A transport-class failure drops the channel and
/// the next call reconnects.
pub struct CapabilityTransport {
    connector: Box<dyn Connector>,
    state: RwLock<ConnectionState>,
    channel: Mutex<Option<Arc<dyn CapabilityChannel>>>,
    connects: AtomicUsize,
}

impl CapabilityTransport {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            state: RwLock::new(ConnectionState::Disconnected),
            channel: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(StdioConnector::from_config(config))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Pure read: never connects. A channel whose far end has closed does
    /// not count as connected.
    pub fn is_connected(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        match self.channel.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|channel| !channel.is_closed()),
            // An operation holds the slot; the state word is current.
            Err(_) => true,
        }
    }

    /// Number of channels opened over the lifetime of this transport.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == next {
            return;
        }
        if state.can_become(next) {
            debug!(from = ?*state, to = ?next, "Transport state change");
            *state = next;
        } else {
            warn!(from = ?*state, to = ?next, "Ignoring illegal transport state change");
        }
    }

    async fn ensure_connected(
        &self,
        slot: &mut Option<Arc<dyn CapabilityChannel>>,
    ) -> Result<Arc<dyn CapabilityChannel>> {
        if let Some(channel) = slot.as_ref() {
            if !channel.is_closed() {
                return Ok(channel.clone());
            }
            warn!("Capability channel closed by the service, reconnecting");
            if let Some(dead) = slot.take() {
                dead.close().await;
            }
            self.transition(ConnectionState::Disconnected);
        }

        self.transition(ConnectionState::Connecting);
        match self.connector.connect().await {
            Ok(channel) => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                *slot = Some(channel.clone());
                self.transition(ConnectionState::Connected);
                info!("Capability transport connected");
                Ok(channel)
            }
            Err(e) => {
                self.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// No-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.channel.lock().await;
        self.ensure_connected(&mut slot).await.map(|_| ())
    }

    /// Idempotent; safe to call from shutdown paths.
    pub async fn disconnect(&self) {
        let channel = self.channel.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await;
            self.transition(ConnectionState::Disconnected);
            info!("Capability transport disconnected");
        }
    }

    /// Drop `failed` if it is still the current channel.
    async fn discard(&self, failed: &Arc<dyn CapabilityChannel>) {
        let mut slot = self.channel.lock().await;
        let is_current = slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed));
        if is_current {
            if let Some(channel) = slot.take() {
                channel.close().await;
            }
            self.transition(ConnectionState::Disconnected);
        }
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<CapabilityResult> {
        let channel = {
            let mut slot = self.channel.lock().await;
            self.ensure_connected(&mut slot).await?
        };

        debug!(capability = %name, "Calling capability");
        match channel.call_tool(name, arguments).await {
            Err(e) if e.is_transport() => {
                warn!(capability = %name, error = %e, "Transport failed, resetting connection");
                self.discard(&channel).await;
                Err(e)
            }
            other => other,
        }
    }

    /// The remote capability set; empty when the service cannot answer.
    pub async fn list_capabilities(&self) -> Vec<RemoteCapability> {
        let channel = {
            let mut slot = self.channel.lock().await;
            match self.ensure_connected(&mut slot).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(error = %e, "Cannot list capabilities: transport unavailable");
                    return Vec::new();
                }
            }
        };

        match channel.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, "Listing capabilities failed");
                if e.is_transport() {
                    self.discard(&channel).await;
                }
                Vec::new()
            }
        }
    }
}
