//! Shared application state
//!
//! Holds the server configuration, the optional external function-call
//! handler and WebSocket connection accounting. Per-connection bridge state
//! is never stored here.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::core::bridge::{FunctionCallHandler, HttpFunctionHandler};

/// Why a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

pub struct AppState {
    pub config: ServerConfig,
    function_handler: Option<Arc<dyn FunctionCallHandler>>,
    ws_connections: AtomicUsize,
    ip_connections: Mutex<HashMap<IpAddr, u32>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("address", &self.config.address())
            .field("function_handler", &self.function_handler.is_some())
            .field("ws_connections", &self.ws_connection_count())
            .finish()
    }
}

impl AppState {
    /// Build the state; an HTTP function-call handler is created when
    /// `function_call_url` is configured.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let function_handler = config.function_call_url.as_ref().map(|url| {
            Arc::new(HttpFunctionHandler::new(
                url.clone(),
                config.function_call_timeout(),
            )) as Arc<dyn FunctionCallHandler>
        });
        Self::with_function_handler(config, function_handler)
    }

    /// Build the state with an explicit handler (or none, for client-side calls).
    pub fn with_function_handler(
        config: ServerConfig,
        function_handler: Option<Arc<dyn FunctionCallHandler>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            function_handler,
            ws_connections: AtomicUsize::new(0),
            ip_connections: Mutex::new(HashMap::new()),
        })
    }

    pub fn function_handler(&self) -> Option<Arc<dyn FunctionCallHandler>> {
        self.function_handler.clone()
    }

    /// Reserve a connection slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let mut per_ip = self.ip_connections.lock();

        if let Some(max) = self.config.max_websocket_connections
            && self.ws_connections.load(Ordering::Acquire) >= max
        {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        let count = per_ip.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            if *count == 0 {
                per_ip.remove(&ip);
            }
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        *count += 1;
        self.ws_connections.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Release a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let mut per_ip = self.ip_connections.lock();
        let Some(count) = per_ip.get_mut(&ip) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            per_ip.remove(&ip);
        }
        self.ws_connections.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.lock().get(ip).copied().unwrap_or(0)
    }
}

/// Releases a connection slot when dropped.
pub struct ConnectionGuard {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionGuard {
    /// Take ownership of a slot already acquired for `ip`.
    pub fn new(state: Arc<AppState>, ip: IpAddr) -> Self {
        Self { state, ip }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}
