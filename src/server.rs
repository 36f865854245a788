use crate::{
    audio_device::AudioOutputDeviceStream,
    config::Config,
    error::{error_channel, ErrorMonitor, ErrorReporter, Result},
    event_queue,
    midi::{
        enumerate_midi_devices, open_midi_inputs, open_midi_outputs, spawn_event_monitor,
        MidiDeviceInfo, MidiInputDeviceStream, MidiOutputDeviceStream,
    },
    render_bridge::{AudioEffect, RenderBridge},
    router::{EventRouter, MidiSink},
    synthesizer::{SynthInput, Synthesizer},
};

use log::{debug, info, warn};
use std::future::Future;
use tokio::{select, task};

/// Every device stream the server has open.
#[derive(Default)]
pub struct Streams {
    pub audio: Option<AudioOutputDeviceStream>,
    pub midi_ins: Vec<MidiInputDeviceStream>,
    pub midi_outs: Vec<MidiOutputDeviceStream>,
}

impl Streams {
    /// The enumerated devices, marked open where this server holds a stream for them.
    pub fn devices(&self) -> Result<Vec<MidiDeviceInfo>> {
        let mut devices = enumerate_midi_devices()?;
        for device in devices.iter_mut() {
            device.is_open = self.midi_ins.iter().any(|s| s.name() == device.name)
                || self.midi_outs.iter().any(|s| s.name() == device.name);
        }

        Ok(devices)
    }
}

/// The main server that wires all MIDI inputs to the MIDI outputs and through the synthesizer
/// into the audio output.
pub struct BridgeServer {
    config: Config,
    reporter: ErrorReporter,
    errors: ErrorMonitor,
}

impl BridgeServer {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (reporter, errors) = error_channel();

        Ok(BridgeServer {
            config,
            reporter,
            errors,
        })
    }

    /// Runs until `shutdown` resolves or the audio engine fails. Returns the engine failure, if
    /// that is what stopped it.
    pub async fn run<S: Future<Output = ()>>(mut self, shutdown: S) -> Result<()> {
        let config = &self.config;
        let mut streams = Streams {
            midi_ins: open_midi_inputs(&config.device_filter, config.sink_capacity, &self.reporter)?,
            midi_outs: open_midi_outputs(
                &config.device_filter,
                config.sink_capacity,
                &self.reporter,
            )?,
            audio: None,
        };
        for device in streams.devices()?.iter().filter(|d| d.is_open) {
            info!("Using MIDI device {}", device);
        }
        if streams.midi_ins.is_empty() {
            warn!("No MIDI inputs matched '{}'", config.device_filter);
        }

        // Wire up: inputs --> router --> (outputs, monitor, synth queue --> bridge --> audio).
        let (notes_tx, notes_rx) = event_queue::bounded(config.note_queue_capacity);
        let synth = Synthesizer::new(config.sample_rate as f64, config.master_volume);
        let bridge = RenderBridge::new(notes_rx, config.channels as usize)
            .with_effect(AudioEffect::SineSynth(synth));

        let mut router = EventRouter::new();
        for input in streams.midi_ins.iter_mut() {
            if let Some(events) = input.listen() {
                router.add_input(events);
            }
        }
        for output in streams.midi_outs.iter() {
            router.add_sink(MidiSink::Channel(output.writer()));
        }
        let monitor = if config.monitor {
            let (monitor_tx, handle) = spawn_event_monitor(config.sink_capacity);
            router.add_sink(MidiSink::Channel(monitor_tx));
            Some(handle)
        } else {
            None
        };
        router.add_sink(MidiSink::Synth(SynthInput::new(notes_tx)));

        let audio =
            AudioOutputDeviceStream::connect_default(config, bridge, self.reporter.clone())?;
        let router_handle = task::spawn(router.route());
        audio.play()?;
        streams.audio = Some(audio);
        info!("Bridge running");

        let outcome = select! {
            _ = shutdown => {
                debug!("Shutdown requested");
                Ok(())
            },
            fatal = self.errors.next_fatal() => match fatal {
                Some(err) => Err(err),
                None => Ok(()),
            },
        };

        close(streams, router_handle, monitor).await;
        self.errors.flush();

        outcome
    }
}

/// Audio first so no render runs past this point, then the inputs so the forwarders drain and
/// exit, then the outputs once nothing can write to them anymore.
async fn close(
    mut streams: Streams,
    router_handle: task::JoinHandle<Vec<Result<usize>>>,
    monitor: Option<task::JoinHandle<()>>,
) {
    if let Some(audio) = streams.audio.take() {
        audio.close();
    }
    for input in streams.midi_ins.drain(..) {
        input.close();
    }

    match router_handle.await {
        Ok(results) => {
            for (index, result) in results.into_iter().enumerate() {
                match result {
                    Ok(forwarded) => debug!("Input {} forwarded {} events", index, forwarded),
                    Err(e) => warn!("Input {} stopped early: {}", index, e),
                }
            }
        }
        Err(_) => warn!("Router task panicked"),
    }
    if let Some(monitor) = monitor {
        if monitor.await.is_err() {
            warn!("Event monitor panicked");
        }
    }

    for output in streams.midi_outs.drain(..) {
        output.close().await;
    }
    info!("Bridge stopped");
}
