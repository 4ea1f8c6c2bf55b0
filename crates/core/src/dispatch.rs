//! Outgoing MIDI dispatch.
//!
//! Request handlers hold a cloneable [`Dispatcher`] and never touch the output
//! port. Every command goes through one bounded queue whose only consumer, the
//! [`DispatchWorker`], owns the writer, so writes are never concurrent.

use std::collections::BTreeSet;
use std::time::Duration;

use midir::MidiOutputConnection;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::midi::command::MidiCommand;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{name} value {value} is outside the MIDI data range 0-127")]
    DataOutOfRange { name: &'static str, value: u8 },

    #[error("Dispatch queue full")]
    QueueFull,

    #[error("Dispatch worker stopped")]
    Closed,

    #[error("Failed to send MIDI: {0}")]
    Write(String),
}

/// Something that can put raw MIDI bytes on a port.
pub trait MidiWriter: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), DispatchError>;
}

impl MidiWriter for MidiOutputConnection {
    fn write(&mut self, bytes: &[u8]) -> Result<(), DispatchError> {
        self.send(bytes)
            .map_err(|e| DispatchError::Write(e.to_string()))
    }
}

fn data_byte(name: &'static str, value: u8) -> Result<u8, DispatchError> {
    if value > 0x7F {
        return Err(DispatchError::DataOutOfRange { name, value });
    }
    Ok(value)
}

/// Handle used to queue outgoing commands.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    commands: mpsc::Sender<MidiCommand>,
}

impl Dispatcher {
    /// Create a dispatcher and the worker that drains its queue.
    pub fn new<W: MidiWriter>(
        writer: W,
        channel: u8,
        capacity: usize,
    ) -> (Self, DispatchWorker<W>) {
        let (commands, rx) = mpsc::channel(capacity.max(1));
        let worker = DispatchWorker {
            writer,
            channel: channel & 0x0F,
            commands: rx,
            held: BTreeSet::new(),
            sent: 0,
            write_errors: 0,
        };
        (Self { commands }, worker)
    }

    fn enqueue(&self, command: MidiCommand) -> Result<(), DispatchError> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    pub fn send_note_on(&self, key: u8, velocity: u8) -> Result<(), DispatchError> {
        let key = data_byte("key", key)?;
        let velocity = data_byte("velocity", velocity)?;
        self.enqueue(MidiCommand::NoteOn { key, velocity })
    }

    pub fn send_note_off(&self, key: u8) -> Result<(), DispatchError> {
        let key = data_byte("key", key)?;
        self.enqueue(MidiCommand::NoteOff { key })
    }

    pub fn send_program_change(&self, program: u8) -> Result<(), DispatchError> {
        let program = data_byte("program", program)?;
        self.enqueue(MidiCommand::ProgramChange { program })
    }

    pub fn send_control_change(&self, controller: u8, value: u8) -> Result<(), DispatchError> {
        let controller = data_byte("controller", controller)?;
        let value = data_byte("value", value)?;
        self.enqueue(MidiCommand::ControlChange { controller, value })
    }

    /// Queue a note-on now and its note-off after `hold`.
    ///
    /// The note-off waits for queue space instead of failing. If the worker
    /// finishes first it releases the note itself.
    pub fn play_note(&self, key: u8, velocity: u8, hold: Duration) -> Result<(), DispatchError> {
        self.send_note_on(key, velocity)?;

        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            if commands.send(MidiCommand::NoteOff { key }).await.is_err() {
                log::debug!("Note-off for key {} left to the stopping worker", key);
            }
        });
        Ok(())
    }
}

/// Single consumer of the dispatch queue. Owns the output port.
pub struct DispatchWorker<W: MidiWriter> {
    writer: W,
    channel: u8,
    commands: mpsc::Receiver<MidiCommand>,
    /// Keys with a note-on on the wire and no note-off yet
    held: BTreeSet<u8>,
    sent: u64,
    write_errors: u64,
}

impl<W: MidiWriter> DispatchWorker<W> {
    /// Wait for the next queued command; `None` once every dispatcher is gone.
    pub async fn next_command(&mut self) -> Option<MidiCommand> {
        self.commands.recv().await
    }

    /// Write one command. Failures are logged and counted, never retried.
    pub fn transmit(&mut self, command: MidiCommand) {
        let result = command
            .encode(self.channel)
            .and_then(|bytes| self.writer.write(&bytes));
        match result {
            Ok(()) => {
                self.sent += 1;
                match command {
                    MidiCommand::NoteOn { key, velocity } if velocity > 0 => {
                        self.held.insert(key);
                    }
                    MidiCommand::NoteOn { key, .. } | MidiCommand::NoteOff { key } => {
                        self.held.remove(&key);
                    }
                    _ => {}
                }
                log::debug!("Sent {} on channel {}", command, self.channel + 1);
            }
            Err(e) => {
                self.write_errors += 1;
                log::error!("Failed to send {}: {}", command, e);
            }
        }
    }

    /// Stop accepting commands, write whatever is still queued, then send a
    /// note-off for every note left sounding.
    pub fn finish(&mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            self.transmit(command);
        }

        for key in std::mem::take(&mut self.held) {
            log::info!("Releasing held note {}", key);
            self.transmit(MidiCommand::NoteOff { key });
        }
    }

    /// Drain the queue until every dispatcher has been dropped.
    pub async fn run(mut self) -> W {
        while let Some(command) = self.next_command().await {
            self.transmit(command);
        }
        self.finish();
        self.writer
    }

    pub fn held_notes(&self) -> Vec<u8> {
        self.held.iter().copied().collect()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }
}
