//! HTTP and WebSocket front for the control surface.

use anyhow::Result;
use tracing::info;

use crate::control::Controller;

pub mod models;
pub mod server;

/// API server over a [`Controller`]
pub struct ApiServer {
    controller: Controller,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(controller: Controller, host: impl Into<String>, port: u16) -> Self {
        Self {
            controller,
            host: host.into(),
            port,
        }
    }

    /// Serve until the listener fails
    pub async fn start(self) -> Result<()> {
        info!("🚀 Starting API server on {}:{}", self.host, self.port);
        server::start_http_server(self.controller, &self.host, self.port).await
    }
}
