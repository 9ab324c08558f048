//! `SwitchyardServer` builder and accept loop.
//!
//! This is the entry point for running a Switchyard server. It ties
//! together all the layers: transport → registry → router → streams.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use switchyard_stream::{ChunkSource, DemoChunks};
use switchyard_transport::{Transport, WebSocketTransport};
use tokio_util::sync::CancellationToken;

use crate::SwitchyardError;
use crate::config::HubConfig;
use crate::handler::handle_connection;
use crate::hub::Hub;
use crate::maintenance;
use crate::router::MessageHandler;

/// Builder for configuring and starting a Switchyard server.
///
/// # Example
///
/// ```rust,ignore
/// use switchyard::prelude::*;
///
/// let server = SwitchyardServer::builder()
///     .config(HubConfig::load("switchyard.json")?)
///     .handler("ai_request", MyAiHandler)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct SwitchyardServerBuilder {
    config: HubConfig,
    bind_addr: Option<String>,
    source: Arc<dyn ChunkSource>,
    handlers: Vec<(String, Arc<dyn MessageHandler>)>,
}

impl SwitchyardServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
            bind_addr: None,
            source: Arc::new(DemoChunks),
            handlers: Vec::new(),
        }
    }

    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds to `addr` instead of the config's `host:port`.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = Some(addr.to_string());
        self
    }

    /// Sets what streams produce (default [`DemoChunks`]).
    pub fn chunk_source(mut self, source: impl ChunkSource) -> Self {
        self.source = Arc::new(source);
        self
    }

    /// Registers a handler for an application message type.
    pub fn handler(mut self, kind: &str, handler: impl MessageHandler + 'static) -> Self {
        self.handlers.push((kind.to_string(), Arc::new(handler)));
        self
    }

    /// Binds the listener and assembles the hub.
    ///
    /// # Errors
    /// - [`SwitchyardError::Transport`] if the address cannot be bound
    /// - [`SwitchyardError::ReservedType`] if a handler targets a built-in type
    pub async fn build(self) -> Result<SwitchyardServer, SwitchyardError> {
        let hub = Hub::with_chunk_source(self.config, self.source);
        for (kind, handler) in self.handlers {
            hub.register_handler(&kind, handler)?;
        }

        let addr = self.bind_addr.unwrap_or_else(|| hub.config().bind_addr());
        let transport = WebSocketTransport::bind(&addr, hub.config().transport_config()).await?;

        Ok(SwitchyardServer {
            transport,
            hub: Arc::new(hub),
        })
    }
}

impl Default for SwitchyardServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Switchyard server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct SwitchyardServer {
    transport: WebSocketTransport,
    hub: Arc<Hub>,
}

impl SwitchyardServer {
    /// Creates a new builder.
    pub fn builder() -> SwitchyardServerBuilder {
        SwitchyardServerBuilder::new()
    }

    /// The shared hub, for sending and inspecting from outside the server.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), SwitchyardError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes, then closes every
    /// connection with 1001 and stops the background tasks.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), SwitchyardError> {
        let background = CancellationToken::new();
        let tasks = maintenance::spawn(&self.hub, &background);

        tracing::info!(addr = ?self.local_addr().ok(), "Switchyard server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(upgrade) => {
                        let hub = Arc::clone(&self.hub);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(upgrade, hub).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        background.cancel();
        self.hub.shutdown();
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}
