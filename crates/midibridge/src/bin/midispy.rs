//! Print every message arriving on one MIDI input port.

use anyhow::Context;
use clap::Parser;
use midibridge_core::{
    input_port_infos, print_ports, select_input, ListenerModule, ModuleManager, PortError,
};
use midir::{Ignore, MidiInput};

#[derive(Parser, Debug)]
#[command(name = "midispy")]
#[command(about = "Print the messages received on a MIDI input port")]
struct Args {
    /// Index of the MIDI IN port to listen to
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    midi_in: i64,

    /// Print the available MIDI IN ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut midi_in = MidiInput::new("midispy").map_err(|e| PortError::Driver(e.to_string()))?;
    midi_in.ignore(Ignore::None);

    if args.list_ports {
        print_ports("MIDI IN Ports", &input_port_infos(&midi_in));
        return Ok(());
    }

    let (info, port) = select_input(&midi_in, args.midi_in)?;
    let listener = ListenerModule::connect(midi_in, &port, info)?;

    let mut manager = ModuleManager::new();
    manager.register_module(Box::new(listener));
    manager
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to start midispy")?;

    manager
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
