use midibridge::{list_midi_devices, BridgeServer, Config};

use log::info;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "cli")]
enum Opt {
    /// Print the MIDI devices that can be opened.
    List,
    /// Route MIDI inputs to the MIDI outputs and the sine synthesizer until Ctrl-C.
    Run {
        /// Only open MIDI devices whose name contains this.
        #[structopt(short = "p", long = "prefix", default_value = "")]
        device_filter: String,

        #[structopt(short = "b", long = "buffer-frames", default_value = "2048")]
        buffer_frames: u32,

        #[structopt(long = "volume", default_value = "0.75")]
        master_volume: f64,

        /// Capacity of the note queue feeding the synthesizer (at least 8).
        #[structopt(long = "queue", default_value = "64")]
        note_queue_capacity: usize,

        /// Log every routed MIDI event.
        #[structopt(short = "m", long = "monitor")]
        monitor: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    match Opt::from_args() {
        Opt::List => list_midi_devices()?,
        Opt::Run {
            device_filter,
            buffer_frames,
            master_volume,
            note_queue_capacity,
            monitor,
        } => {
            let config = Config {
                device_filter,
                buffer_frames,
                master_volume,
                note_queue_capacity,
                monitor,
                ..Config::default()
            };
            let server = BridgeServer::new(config)?;
            server
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        info!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
        }
    }

    Ok(())
}
