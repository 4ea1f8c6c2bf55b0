use std::collections::HashMap;

use async_trait::async_trait;
use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
use crate::midi::midi::{InputMessage, Position};
use crate::ports::{PortError, PortInfo};

/// Capacity of the hand-off between the driver callback and the module loop.
const CALLBACK_QUEUE: usize = 1024;

/// Data owned by the driver callback for the lifetime of the connection.
pub struct ListenerState {
    tx: mpsc::Sender<(InputMessage, Position)>,
    last_timestamp: Option<u64>,
}

impl ListenerState {
    pub fn new(tx: mpsc::Sender<(InputMessage, Position)>) -> Self {
        Self {
            tx,
            last_timestamp: None,
        }
    }

    /// Decode one incoming message and hand it to the module loop.
    /// Returns the line printed for the operator.
    pub fn handle(&mut self, timestamp_us: u64, bytes: &[u8]) -> Option<String> {
        let message = InputMessage::new(bytes)?;
        let position = Position::next(self.last_timestamp, timestamp_us);
        self.last_timestamp = Some(timestamp_us);

        let line = format!("got {} {}", message, position);

        // We're on the driver thread, never block it
        if let Err(e) = self.tx.try_send((message, position)) {
            log::warn!("Failed to forward MIDI message: {}", e);
        }
        Some(line)
    }
}

/// Prints every message arriving on one input port.
pub struct ListenerModule {
    port: PortInfo,
    connection: Mutex<Option<MidiInputConnection<ListenerState>>>,
    midi_rx: Option<mpsc::Receiver<(InputMessage, Position)>>,
    status: HashMap<String, String>,
}

impl ListenerModule {
    /// Open `port` and start decoding. Failing to open is fatal for the caller.
    pub fn connect(
        midi_in: MidiInput,
        port: &MidiInputPort,
        info: PortInfo,
    ) -> Result<Self, PortError> {
        let (tx, rx) = mpsc::channel(CALLBACK_QUEUE);

        let connection = midi_in
            .connect(
                port,
                "midibridge-input",
                |timestamp, message, state: &mut ListenerState| {
                    if let Some(line) = state.handle(timestamp, message) {
                        println!("{}", line);
                    }
                },
                ListenerState::new(tx),
            )
            .map_err(|e| PortError::Connect {
                index: info.index,
                name: info.name.clone(),
                reason: e.to_string(),
            })?;

        log::info!("Using MIDI IN [{}]", info.name);

        Ok(Self {
            port: info,
            connection: Mutex::new(Some(connection)),
            midi_rx: Some(rx),
            status: HashMap::new(),
        })
    }
}

#[async_trait]
impl AsyncModule for ListenerModule {
    fn id(&self) -> ModuleId {
        ModuleId::Listener
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.status
            .insert("port".to_string(), self.port.name.clone());
        self.status
            .insert("status".to_string(), "initialized".to_string());
        self.status.insert(
            "input_connected".to_string(),
            self.connection.lock().is_some().to_string(),
        );
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut midi_rx = self
            .midi_rx
            .take()
            .ok_or("MIDI listener can only run once")?;

        let _ = tx
            .send(ModuleMessage::Status(format!(
                "Listening on MIDI IN [{}]",
                self.port.name
            )))
            .await;

        let mut received: u64 = 0;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ModuleEvent::Shutdown) | None => {
                        log::info!("MIDI listener received shutdown signal");
                        break;
                    }
                    Some(_) => {}
                },
                incoming = midi_rx.recv() => match incoming {
                    Some((message, position)) => {
                        received += 1;
                        let event = ModuleEvent::MidiInput(message, position);
                        if let Err(e) = tx.try_send(ModuleMessage::Event(event)) {
                            log::warn!("Failed to send MIDI message: {}", e);
                        }
                    }
                    None => {
                        self.status
                            .insert("received".to_string(), received.to_string());
                        return Err("MIDI input connection closed".into());
                    }
                },
            }
        }

        self.status
            .insert("received".to_string(), received.to_string());
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Closing the connection releases the port
        if let Some(connection) = self.connection.lock().take() {
            let _ = connection.close();
        }

        self.status
            .insert("status".to_string(), "shutdown".to_string());
        self.status
            .insert("input_connected".to_string(), "false".to_string());

        log::info!("MIDI listener shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_prints_and_forwards() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut state = ListenerState::new(tx);

        let line = state.handle(1_000, &[0x90, 60, 100]).unwrap();
        assert_eq!(
            line,
            "got channel.NoteOn channel 1 key 60 velocity 100 @1000us (+0us)"
        );

        let line = state.handle(1_500, &[0x80, 60, 0]).unwrap();
        assert!(line.ends_with("(+500us)"));

        let (message, position) = rx.try_recv().unwrap();
        assert_eq!(message.bytes(), &[0x90, 60, 100]);
        assert_eq!(position.delta_us, 0);

        let (_, position) = rx.try_recv().unwrap();
        assert_eq!(position.timestamp_us, 1_500);
    }

    #[test]
    fn test_handle_ignores_empty_messages() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut state = ListenerState::new(tx);

        assert!(state.handle(10, &[]).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_does_not_block_callback() {
        let (tx, _rx) = mpsc::channel(1);
        let mut state = ListenerState::new(tx);

        assert!(state.handle(1, &[0xF8]).is_some());
        // Queue is full now, the line is still produced
        assert!(state.handle(2, &[0xF8]).is_some());
    }
}
