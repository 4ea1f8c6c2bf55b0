use std::fmt;

use midly::live::{LiveEvent, SystemCommon, SystemRealtime};
use midly::MidiMessage;

/// One message exactly as the input driver delivered it.
///
/// Parsing is left to `midly`; the raw bytes are kept so malformed input can
/// still be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMessage {
    bytes: Vec<u8>,
}

impl InputMessage {
    /// `None` for an empty buffer.
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        Some(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn event(&self) -> Result<LiveEvent<'_>, midly::Error> {
        LiveEvent::parse(&self.bytes)
    }
}

impl fmt::Display for InputMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event() {
            // Channels are 0-15 on the wire and shown as 1-16
            Ok(LiveEvent::Midi { channel, message }) => {
                write_channel(f, channel.as_int() + 1, message)
            }
            Ok(LiveEvent::Common(common)) => match common {
                SystemCommon::SysEx(data) => {
                    write!(f, "sysex.SysEx len {} {}", data.len(), hex(&self.bytes))
                }
                SystemCommon::MidiTimeCodeQuarterFrame(kind, value) => {
                    write!(f, "syscommon.MTC {:?} {}", kind, value.as_int())
                }
                SystemCommon::SongPosition(beats) => write!(f, "syscommon.SPP {}", beats.as_int()),
                SystemCommon::SongSelect(song) => {
                    write!(f, "syscommon.SongSelect {}", song.as_int())
                }
                SystemCommon::TuneRequest => write!(f, "syscommon.TuneRequest"),
                SystemCommon::Undefined(..) => write!(f, "unknown {}", hex(&self.bytes)),
            },
            Ok(LiveEvent::Realtime(realtime)) => match realtime {
                SystemRealtime::TimingClock => write!(f, "realtime.TimingClock"),
                SystemRealtime::Start => write!(f, "realtime.Start"),
                SystemRealtime::Continue => write!(f, "realtime.Continue"),
                SystemRealtime::Stop => write!(f, "realtime.Stop"),
                SystemRealtime::ActiveSensing => write!(f, "realtime.ActiveSensing"),
                SystemRealtime::Reset => write!(f, "realtime.Reset"),
                SystemRealtime::Undefined(_) => write!(f, "unknown {}", hex(&self.bytes)),
            },
            Err(_) => write!(f, "unknown {}", hex(&self.bytes)),
        }
    }
}

fn write_channel(f: &mut fmt::Formatter<'_>, channel: u8, message: MidiMessage) -> fmt::Result {
    match message {
        MidiMessage::NoteOff { key, vel } => write!(
            f,
            "channel.NoteOff channel {} key {} velocity {}",
            channel,
            key.as_int(),
            vel.as_int()
        ),
        MidiMessage::NoteOn { key, vel } => write!(
            f,
            "channel.NoteOn channel {} key {} velocity {}",
            channel,
            key.as_int(),
            vel.as_int()
        ),
        MidiMessage::Aftertouch { key, vel } => write!(
            f,
            "channel.PolyAftertouch channel {} key {} pressure {}",
            channel,
            key.as_int(),
            vel.as_int()
        ),
        MidiMessage::Controller { controller, value } => write!(
            f,
            "channel.ControlChange channel {} controller {} value {}",
            channel,
            controller.as_int(),
            value.as_int()
        ),
        MidiMessage::ProgramChange { program } => write!(
            f,
            "channel.ProgramChange channel {} program {}",
            channel,
            program.as_int()
        ),
        MidiMessage::ChannelAftertouch { vel } => {
            write!(f, "channel.Aftertouch channel {} pressure {}", channel, vel.as_int())
        }
        MidiMessage::PitchBend { bend } => write!(
            f,
            "channel.Pitchbend channel {} value {}",
            channel,
            bend.as_int()
        ),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Where a message sits in the input stream, in driver microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub timestamp_us: u64,
    /// Time since the previous message on the same connection (0 for the first)
    pub delta_us: u64,
}

impl Position {
    /// Advance from the previous timestamp seen on a connection.
    pub fn next(previous: Option<u64>, timestamp_us: u64) -> Self {
        let delta_us = previous
            .map(|prev| timestamp_us.saturating_sub(prev))
            .unwrap_or(0);
        Self {
            timestamp_us,
            delta_us,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}us (+{}us)", self.timestamp_us, self.delta_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shown(bytes: &[u8]) -> String {
        InputMessage::new(bytes).unwrap().to_string()
    }

    #[test]
    fn test_channel_voice_messages() {
        assert_eq!(
            shown(&[0x91, 60, 100]),
            "channel.NoteOn channel 2 key 60 velocity 100"
        );
        assert_eq!(
            shown(&[0x80, 60, 0]),
            "channel.NoteOff channel 1 key 60 velocity 0"
        );
        assert_eq!(
            shown(&[0xB3, 7, 64]),
            "channel.ControlChange channel 4 controller 7 value 64"
        );
        assert_eq!(
            shown(&[0xCF, 12]),
            "channel.ProgramChange channel 16 program 12"
        );
    }

    #[test]
    fn test_note_on_zero_velocity_is_kept() {
        // A spy shows what's on the wire
        let message = InputMessage::new(&[0x90, 64, 0]).unwrap();
        match message.event().unwrap() {
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { vel, .. },
                ..
            } => assert_eq!(vel.as_int(), 0),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_pitch_bend_is_centered() {
        assert_eq!(
            shown(&[0xE0, 0x00, 0x40]),
            "channel.Pitchbend channel 1 value 0"
        );
        assert_eq!(
            shown(&[0xE0, 0x00, 0x00]),
            "channel.Pitchbend channel 1 value -8192"
        );
    }

    #[test]
    fn test_system_messages() {
        assert_eq!(shown(&[0xF8]), "realtime.TimingClock");
        assert_eq!(shown(&[0xFA]), "realtime.Start");
        assert_eq!(shown(&[0xFC]), "realtime.Stop");
        assert_eq!(shown(&[0xF2, 0x01, 0x01]), "syscommon.SPP 129");
        assert!(shown(&[0xF0, 0x7E, 0x7F, 0xF7]).starts_with("sysex.SysEx"));
    }

    #[test]
    fn test_truncated_and_empty() {
        assert_eq!(InputMessage::new(&[]), None);

        let truncated = InputMessage::new(&[0x90, 60]).unwrap();
        assert!(truncated.event().is_err());
        assert_eq!(truncated.to_string(), "unknown 90 3C");
        assert_eq!(truncated.bytes(), &[0x90, 60]);
    }

    #[test]
    fn test_position_delta() {
        let first = Position::next(None, 1_000);
        assert_eq!(first.delta_us, 0);

        let second = Position::next(Some(first.timestamp_us), 1_750);
        assert_eq!(second.delta_us, 750);

        // Driver clocks can restart; never underflow
        let third = Position::next(Some(second.timestamp_us), 10);
        assert_eq!(third.delta_us, 0);
    }
}
