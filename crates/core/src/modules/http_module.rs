use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
use crate::http::{router, BridgeState};

/// Serves the note/pc/cc endpoints until shutdown.
pub struct HttpModule {
    bind: SocketAddr,
    state: BridgeState,
    listener: Option<TcpListener>,
    status: HashMap<String, String>,
}

impl HttpModule {
    pub fn new(bind: SocketAddr, state: BridgeState) -> Self {
        Self {
            bind,
            state,
            listener: None,
            status: HashMap::new(),
        }
    }
}

#[async_trait]
impl AsyncModule for HttpModule {
    fn id(&self) -> ModuleId {
        ModuleId::Http
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Bind here so a taken port fails startup instead of a running module
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|e| format!("Failed to bind HTTP listener on {}: {}", self.bind, e))?;
        let local = listener.local_addr()?;
        self.listener = Some(listener);

        log::info!("HTTP listening on http://{}", local);
        self.status.insert("address".to_string(), local.to_string());
        self.status
            .insert("status".to_string(), "initialized".to_string());
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = self
            .listener
            .take()
            .ok_or("HTTP module must be initialized before it runs")?;

        let _ = tx
            .send(ModuleMessage::Status(format!(
                "HTTP server running on {}",
                listener.local_addr()?
            )))
            .await;
        self.status
            .insert("status".to_string(), "running".to_string());

        let app = router(self.state.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while let Some(event) = rx.recv().await {
                    if let ModuleEvent::Shutdown = event {
                        break;
                    }
                }
                log::info!("HTTP server received shutdown signal");
            })
            .await?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.listener = None;
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        log::info!("HTTP server shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}
