use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
use crate::dispatch::{DispatchWorker, MidiWriter};
use crate::ports::PortInfo;

/// Runs the dispatch worker that owns the output port.
pub struct OutputModule<W: MidiWriter + 'static> {
    port: PortInfo,
    worker: Mutex<Option<DispatchWorker<W>>>,
    status: HashMap<String, String>,
}

impl<W: MidiWriter + 'static> OutputModule<W> {
    pub fn new(port: PortInfo, worker: DispatchWorker<W>) -> Self {
        Self {
            port,
            worker: Mutex::new(Some(worker)),
            status: HashMap::new(),
        }
    }
}

#[async_trait]
impl<W: MidiWriter + 'static> AsyncModule for OutputModule<W> {
    fn id(&self) -> ModuleId {
        ModuleId::Output
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Using MIDI OUT [{}]", self.port.name);

        self.status
            .insert("port".to_string(), self.port.name.clone());
        self.status
            .insert("status".to_string(), "initialized".to_string());
        self.status.insert(
            "output_connected".to_string(),
            self.worker.lock().is_some().to_string(),
        );
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut worker = self
            .worker
            .lock()
            .take()
            .ok_or("MIDI output can only run once")?;

        let _ = tx
            .send(ModuleMessage::Status(format!(
                "Writing to MIDI OUT [{}]",
                self.port.name
            )))
            .await;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ModuleEvent::Shutdown) | None => {
                        log::info!("MIDI output received shutdown signal");
                        worker.finish();
                        break;
                    }
                    Some(_) => {}
                },
                command = worker.next_command() => match command {
                    Some(command) => worker.transmit(command),
                    None => {
                        log::info!("All dispatchers dropped, MIDI output idle");
                        break;
                    }
                },
            }
        }

        self.status
            .insert("sent".to_string(), worker.sent().to_string());
        self.status
            .insert("write_errors".to_string(), worker.write_errors().to_string());
        if worker.write_errors() > 0 {
            let _ = tx
                .send(ModuleMessage::Error(format!(
                    "{} MIDI writes failed on [{}]",
                    worker.write_errors(),
                    self.port.name
                )))
                .await;
        }

        *self.worker.lock() = Some(worker);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Queued commands and held notes were flushed when run ended.
        // Dropping the worker drops the writer, which closes the port
        self.worker.lock().take();

        self.status
            .insert("status".to_string(), "shutdown".to_string());
        self.status
            .insert("output_connected".to_string(), "false".to_string());

        log::info!("MIDI output shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}
