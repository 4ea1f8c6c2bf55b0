use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use midibridge_core::{
    input_port_infos, output_port_infos, print_ports, select_input, select_output, BridgeState,
    ConfigError, ConfigManager, Dispatcher, HttpModule, ListenerModule, ModuleManager,
    OutputModule, PortError, PortListing, Settings,
};
use midir::{Ignore, MidiInput, MidiOutput};

/// Spy on a MIDI input and play notes, program and control changes from HTTP requests.
#[derive(Parser, Debug)]
#[command(name = "midibridge")]
#[command(about = "MIDI spy with an HTTP-triggered MIDI output")]
struct Args {
    /// Config file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Index of the MIDI IN port to listen to
    #[arg(long, allow_negative_numbers = true)]
    midi_in: Option<i64>,

    /// Index of the MIDI OUT port to write to
    #[arg(long, allow_negative_numbers = true)]
    midi_out: Option<i64>,

    /// HTTP listen address (default: 127.0.0.1:8080)
    #[arg(long, value_parser = parse_addr)]
    bind: Option<SocketAddr>,

    /// MIDI channel for outgoing messages (1-16)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=16))]
    channel: Option<u8>,

    /// Print the available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(index) = self.midi_in {
            settings.midi_in_port = index;
        }
        if let Some(index) = self.midi_out {
            settings.midi_out_port = index;
        }
        if let Some(bind) = self.bind {
            settings.http_bind = bind.to_string();
        }
        if let Some(channel) = self.channel {
            settings.midi_channel = channel;
        }
    }
}

fn parse_addr(s: &str) -> Result<SocketAddr, String> {
    s.parse().map_err(|e| format!("Invalid listen address: {}", e))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ConfigManager::new(args.config.clone());
    let mut settings = config.load().context("Failed to load settings")?;
    args.apply(&mut settings);
    ConfigManager::validate_settings(&settings).map_err(ConfigError::ValidationError)?;

    let mut midi_in =
        MidiInput::new(&settings.client_name).map_err(|e| PortError::Driver(e.to_string()))?;
    midi_in.ignore(Ignore::None);
    let midi_out =
        MidiOutput::new(&settings.client_name).map_err(|e| PortError::Driver(e.to_string()))?;

    let ports = PortListing {
        inputs: input_port_infos(&midi_in),
        outputs: output_port_infos(&midi_out),
    };

    if args.list_ports {
        print_ports("MIDI IN Ports", &ports.inputs);
        print_ports("MIDI OUT Ports", &ports.outputs);
        return Ok(());
    }

    let (in_info, in_port) = select_input(&midi_in, settings.midi_in_port)?;
    let (out_info, out_port) = select_output(&midi_out, settings.midi_out_port)?;

    let listener = ListenerModule::connect(midi_in, &in_port, in_info)?;
    let connection = midi_out
        .connect(&out_port, "midibridge-output")
        .map_err(|e| PortError::Connect {
            index: out_info.index,
            name: out_info.name.clone(),
            reason: e.to_string(),
        })?;

    let (dispatcher, worker) = Dispatcher::new(
        connection,
        settings.wire_channel(),
        settings.dispatch_queue_capacity,
    );
    let state = BridgeState {
        dispatcher,
        note_velocity: settings.note_velocity,
        note_hold: settings.note_hold(),
        ports,
    };

    let mut manager = ModuleManager::new();
    manager.register_module(Box::new(listener));
    manager.register_module(Box::new(OutputModule::new(out_info, worker)));
    manager.register_module(Box::new(HttpModule::new(settings.bind_addr()?, state)));

    manager
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to start midibridge")?;

    println!("midibridge running on http://{} (Ctrl-C to stop)", settings.http_bind);

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
