use std::fmt;

use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::MidiMessage;

use crate::dispatch::DispatchError;

/// An outgoing channel-voice command. The channel is applied when encoding,
/// so the same command can be written to whichever channel the bridge uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiCommand {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    ProgramChange { program: u8 },
    ControlChange { controller: u8, value: u8 },
}

impl MidiCommand {
    /// The command as a live event on `channel` (0-15).
    ///
    /// Data bytes are masked to 7 bits; callers validate ranges before a
    /// command is built.
    pub fn live_event(&self, channel: u8) -> LiveEvent<'static> {
        let message = match *self {
            MidiCommand::NoteOn { key, velocity } => MidiMessage::NoteOn {
                key: u7::from(key),
                vel: u7::from(velocity),
            },
            MidiCommand::NoteOff { key } => MidiMessage::NoteOff {
                key: u7::from(key),
                vel: u7::new(0),
            },
            MidiCommand::ProgramChange { program } => MidiMessage::ProgramChange {
                program: u7::from(program),
            },
            MidiCommand::ControlChange { controller, value } => MidiMessage::Controller {
                controller: u7::from(controller),
                value: u7::from(value),
            },
        };
        LiveEvent::Midi {
            channel: u4::from(channel),
            message,
        }
    }

    /// Wire bytes for this command on `channel`.
    pub fn encode(&self, channel: u8) -> Result<Vec<u8>, DispatchError> {
        let mut bytes = Vec::with_capacity(3);
        self.live_event(channel)
            .write(&mut bytes)
            .map_err(|e| DispatchError::Write(e.to_string()))?;
        Ok(bytes)
    }
}

impl fmt::Display for MidiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiCommand::NoteOn { key, velocity } => write!(f, "NoteOn({}, {})", key, velocity),
            MidiCommand::NoteOff { key } => write!(f, "NoteOff({})", key),
            MidiCommand::ProgramChange { program } => write!(f, "ProgramChange({})", program),
            MidiCommand::ControlChange { controller, value } => {
                write!(f, "ControlChange({}, {})", controller, value)
            }
        }
    }
}
