//! MIDI port enumeration and selection by index.

use midir::{MidiInput, MidiInputPort, MidiOutput, MidiOutputPort};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("MIDI port [{index}] does not exist ({count} available)")]
    InvalidIndex { index: i64, count: usize },

    #[error("MIDI driver unavailable: {0}")]
    Driver(String),

    #[error("Failed to open MIDI port [{index}] {name}: {reason}")]
    Connect {
        index: usize,
        name: String,
        reason: String,
    },
}

/// Index and display name of one port, in driver order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
}

/// Ports seen at startup, served on `/ports/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortListing {
    pub inputs: Vec<PortInfo>,
    pub outputs: Vec<PortInfo>,
}

/// Pick the port at `index`, failing with the bad index if it is out of range.
pub fn select_port<T: Clone>(ports: &[T], index: i64) -> Result<T, PortError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| ports.get(i))
        .cloned()
        .ok_or(PortError::InvalidIndex {
            index,
            count: ports.len(),
        })
}

pub fn render_ports(title: &str, ports: &[PortInfo]) -> String {
    let mut out = format!("{}\n", title);
    for port in ports {
        out.push_str(&format!("[{}] {}\n", port.index, port.name));
    }
    out.push('\n');
    out
}

pub fn print_ports(title: &str, ports: &[PortInfo]) {
    println!("{}", render_ports(title, ports));
}

/// Pair each port with its display name, in driver order.
fn port_infos<P>(ports: &[P], name: impl Fn(&P) -> Option<String>) -> Vec<PortInfo> {
    ports
        .iter()
        .enumerate()
        .map(|(index, port)| PortInfo {
            index,
            name: name(port).unwrap_or_else(|| "<unknown>".to_string()),
        })
        .collect()
}

/// Print a port list, then take the handle and its name from that same list.
fn choose<P: Clone>(
    title: &str,
    ports: &[P],
    name: impl Fn(&P) -> Option<String>,
    index: i64,
) -> Result<(PortInfo, P), PortError> {
    let infos = port_infos(ports, name);
    print_ports(title, &infos);

    let port = select_port(ports, index)?;
    let info = select_port(&infos, index)?;
    Ok((info, port))
}

pub fn input_port_infos(midi_in: &MidiInput) -> Vec<PortInfo> {
    port_infos(&midi_in.ports(), |port| midi_in.port_name(port).ok())
}

pub fn output_port_infos(midi_out: &MidiOutput) -> Vec<PortInfo> {
    port_infos(&midi_out.ports(), |port| midi_out.port_name(port).ok())
}

/// Print the input ports and return the one at `index`.
pub fn select_input(midi_in: &MidiInput, index: i64) -> Result<(PortInfo, MidiInputPort), PortError> {
    choose(
        "MIDI IN Ports",
        &midi_in.ports(),
        |port| midi_in.port_name(port).ok(),
        index,
    )
}

/// Print the output ports and return the one at `index`.
pub fn select_output(
    midi_out: &MidiOutput,
    index: i64,
) -> Result<(PortInfo, MidiOutputPort), PortError> {
    choose(
        "MIDI OUT Ports",
        &midi_out.ports(),
        |port| midi_out.port_name(port).ok(),
        index,
    )
}
