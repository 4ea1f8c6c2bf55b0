//! Spy on a MIDI input port and relay HTTP requests to a MIDI output port.

pub use config::{ConfigError, ConfigManager, ConfigSchema, Settings};
pub use dispatch::{DispatchError, DispatchWorker, Dispatcher, MidiWriter};
pub use http::{parse_u8_literal, router, BridgeState, ParamError};
pub use midi::command::MidiCommand;
pub use midi::midi::{InputMessage, Position};
// Async module system exports
pub use modules::{
    AsyncModule, HttpModule, ListenerModule, ModuleEvent, ModuleId, ModuleManager,
    ModuleMessage, OutputModule,
};
pub use ports::{
    input_port_infos, output_port_infos, print_ports, select_input, select_output, select_port,
    PortError, PortInfo, PortListing,
};

mod config;
mod dispatch;
mod http;
mod midi;
mod modules;
mod ports;
