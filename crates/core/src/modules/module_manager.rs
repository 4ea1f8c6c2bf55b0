use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};

type SharedStatus = Arc<Mutex<HashMap<ModuleId, HashMap<String, String>>>>;

pub struct ModuleManager {
    modules: HashMap<ModuleId, Box<dyn AsyncModule>>,
    module_handles: HashMap<ModuleId, JoinHandle<()>>,
    module_senders: HashMap<ModuleId, mpsc::Sender<ModuleEvent>>,
    message_receiver: Option<mpsc::Receiver<ModuleMessage>>,
    message_sender: mpsc::Sender<ModuleMessage>,
    last_status: SharedStatus,
    running: bool,
}

impl ModuleManager {
    pub fn new() -> Self {
        let (message_sender, message_receiver) = mpsc::channel(1000);

        Self {
            modules: HashMap::new(),
            module_handles: HashMap::new(),
            module_senders: HashMap::new(),
            message_receiver: Some(message_receiver),
            message_sender,
            last_status: Arc::new(Mutex::new(HashMap::new())),
            running: false,
        }
    }

    /// Register a new module with the manager
    pub fn register_module(&mut self, module: Box<dyn AsyncModule>) {
        let id = module.id();
        self.modules.insert(id, module);
    }

    /// Initialize all registered modules
    pub async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for (id, module) in &mut self.modules {
            match module.initialize().await {
                Ok(_) => log::info!("Module {:?} initialized successfully", id),
                Err(e) => {
                    log::error!("Failed to initialize module {:?}: {}", id, e);
                    let error_message = format!("{:?} module error: {}", id, e);
                    return Err(error_message.into());
                }
            }
        }
        Ok(())
    }

    /// Start all modules, each in its own task
    pub async fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.running {
            return Err("Module manager is already running".into());
        }

        let modules_to_start = std::mem::take(&mut self.modules);

        for (id, mut module) in modules_to_start {
            let (event_tx, event_rx) = mpsc::channel(1000);
            let message_tx = self.message_sender.clone();
            let module_id = id.clone();
            let last_status = self.last_status.clone();

            let handle = tokio::spawn(async move {
                if let Err(e) = module.run(event_rx, message_tx.clone()).await {
                    let _ = message_tx
                        .send(ModuleMessage::Failed(module_id.clone(), e.to_string()))
                        .await;
                }

                // Ports and sockets are released whether run ended cleanly or not
                if let Err(e) = module.shutdown().await {
                    log::error!("Module {:?} shutdown error: {}", module_id, e);
                }
                last_status.lock().insert(module_id, module.status());
            });

            self.module_handles.insert(id.clone(), handle);
            self.module_senders.insert(id, event_tx);
        }

        self.running = true;
        Ok(())
    }

    /// Broadcast an event to all modules
    pub async fn broadcast_event(&self, event: ModuleEvent) {
        for (id, sender) in &self.module_senders {
            if let Err(e) = sender.send(event.clone()).await {
                log::warn!("Failed to broadcast event to module {:?}: {}", id, e);
            }
        }
    }

    /// Get the message receiver (should only be called once)
    pub fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<ModuleMessage>> {
        self.message_receiver.take()
    }

    /// Shutdown all modules gracefully
    pub async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.running {
            return Ok(());
        }

        log::info!("Shutting down module manager...");

        self.broadcast_event(ModuleEvent::Shutdown).await;

        for (id, handle) in std::mem::take(&mut self.module_handles) {
            log::info!("Waiting for module {:?} to shutdown...", id);
            if let Err(e) = handle.await {
                log::error!("Module {:?} shutdown error: {}", id, e);
            }
        }

        self.module_senders.clear();

        self.running = false;
        log::info!("Module manager shutdown complete");
        Ok(())
    }

    /// Start every module, log what they report until `shutdown` resolves or
    /// a module fails, then shut them all down. A module failure is returned
    /// once the others have stopped.
    pub async fn run_until<F>(
        &mut self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()>,
    {
        let mut messages = self
            .take_message_receiver()
            .ok_or("Module messages are already being consumed")?;
        self.start().await?;

        let mut failure = None;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = messages.recv() => match message {
                    Some(ModuleMessage::Status(status)) => log::info!("{}", status),
                    Some(ModuleMessage::Error(error)) => log::error!("{}", error),
                    Some(ModuleMessage::Failed(id, error)) => {
                        log::error!("Module {:?} failed: {}", id, error);
                        failure = Some(format!("{:?} module failed: {}", id, error));
                        break;
                    }
                    Some(ModuleMessage::Event(ModuleEvent::MidiInput(message, position))) => {
                        log::debug!("MIDI in: {} {}", message, position);
                    }
                    Some(ModuleMessage::Event(_)) => {}
                    None => break,
                },
            }
        }

        self.shutdown().await?;
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Status of registered modules, or the final status of modules that have stopped
    pub fn get_status(&self) -> HashMap<ModuleId, HashMap<String, String>> {
        let mut status = self.last_status.lock().clone();
        for (id, module) in &self.modules {
            status.insert(id.clone(), module.status());
        }
        status
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    struct CountingModule {
        id: ModuleId,
        shutdowns: Arc<AtomicUsize>,
        status: HashMap<String, String>,
    }

    #[async_trait]
    impl AsyncModule for CountingModule {
        fn id(&self) -> ModuleId {
            self.id.clone()
        }

        async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.status
                .insert("status".to_string(), "initialized".to_string());
            Ok(())
        }

        async fn run(
            &mut self,
            mut rx: mpsc::Receiver<ModuleEvent>,
            tx: mpsc::Sender<ModuleMessage>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let _ = tx
                .send(ModuleMessage::Status(format!("{:?} running", self.id)))
                .await;
            while let Some(event) = rx.recv().await {
                if let ModuleEvent::Shutdown = event {
                    break;
                }
            }
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.status
                .insert("status".to_string(), "shutdown".to_string());
            Ok(())
        }

        fn status(&self) -> HashMap<String, String> {
            self.status.clone()
        }
    }

    fn module(id: ModuleId, shutdowns: &Arc<AtomicUsize>) -> Box<dyn AsyncModule> {
        Box::new(CountingModule {
            id,
            shutdowns: shutdowns.clone(),
            status: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut manager = ModuleManager::new();
        manager.register_module(module(ModuleId::Listener, &shutdowns));
        manager.register_module(module(ModuleId::Http, &shutdowns));

        manager.initialize().await.unwrap();
        assert_eq!(
            manager.get_status()[&ModuleId::Http]["status"],
            "initialized"
        );

        let mut messages = manager.take_message_receiver().unwrap();
        manager.start().await.unwrap();
        assert!(manager.is_running());
        assert!(manager.start().await.is_err());

        for _ in 0..2 {
            assert!(matches!(
                messages.recv().await,
                Some(ModuleMessage::Status(_))
            ));
        }

        manager.shutdown().await.unwrap();
        assert!(!manager.is_running());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(
            manager.get_status()[&ModuleId::Listener]["status"],
            "shutdown"
        );
    }

    #[tokio::test]
    async fn test_run_until_shutdown_signal() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut manager = ModuleManager::new();
        manager.register_module(module(ModuleId::Output, &shutdowns));
        manager.initialize().await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        stop_tx.send(()).unwrap();
        manager
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();

        assert!(!manager.is_running());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        // The receiver was consumed by the first run
        assert!(manager.run_until(async {}).await.is_err());
    }

    struct FailingModule;

    #[async_trait]
    impl AsyncModule for FailingModule {
        fn id(&self) -> ModuleId {
            ModuleId::Http
        }

        async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        async fn run(
            &mut self,
            _rx: mpsc::Receiver<ModuleEvent>,
            _tx: mpsc::Sender<ModuleMessage>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("server died".into())
        }

        async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        fn status(&self) -> HashMap<String, String> {
            HashMap::new()
        }
    }

    #[tokio::test]
    async fn test_run_until_stops_when_a_module_fails() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut manager = ModuleManager::new();
        manager.register_module(module(ModuleId::Output, &shutdowns));
        manager.register_module(Box::new(FailingModule));
        manager.initialize().await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            manager.run_until(std::future::pending()),
        )
        .await
        .expect("run_until kept waiting after a module failed");

        let error = result.unwrap_err().to_string();
        assert!(error.contains("Http"), "{}", error);
        assert!(error.contains("server died"), "{}", error);

        // The healthy module was still shut down
        assert!(!manager.is_running());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
