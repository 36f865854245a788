use crate::{midi::MidiEvent, synthesizer::SynthInput, Error, Result};

use futures::future::join_all;
use log::{debug, warn};
use std::sync::Arc;
use tokio::{sync::mpsc, task};

/// Where routed events go.
#[derive(Clone)]
pub enum MidiSink {
    /// A bounded channel, e.g. a MIDI output device writer. Waits while the channel is full.
    Channel(mpsc::Sender<MidiEvent>),
    /// The synthesizer's note queue. Never waits.
    Synth(SynthInput),
}

impl MidiSink {
    async fn send(&self, event: MidiEvent) -> Result<()> {
        match self {
            MidiSink::Channel(tx) => tx.send(event).await.map_err(|_| Error::SinkClosed),
            MidiSink::Synth(input) => input.forward(event),
        }
    }
}

/// Fans every event from every input out to every sink.
#[derive(Default)]
pub struct EventRouter {
    inputs: Vec<mpsc::Receiver<MidiEvent>>,
    sinks: Vec<MidiSink>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, input: mpsc::Receiver<MidiEvent>) {
        self.inputs.push(input);
    }

    pub fn add_sink(&mut self, sink: MidiSink) {
        self.sinks.push(sink);
    }

    /// Runs one forwarding task per input until every input is exhausted. Each result holds the
    /// number of events an input forwarded, or the error that stopped its task. A failed task
    /// does not affect the others.
    pub async fn route(self) -> Vec<Result<usize>> {
        let sinks = Arc::new(self.sinks);
        let handles: Vec<_> = self
            .inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| task::spawn(forward_events(index, input, sinks.clone())))
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| joined.unwrap_or(Err(Error::ForwardingTask { index })))
            .collect()
    }
}

async fn forward_events(
    index: usize,
    mut input: mpsc::Receiver<MidiEvent>,
    sinks: Arc<Vec<MidiSink>>,
) -> Result<usize> {
    let mut forwarded = 0;
    while let Some(event) = input.recv().await {
        for sink in sinks.iter() {
            if let Err(e) = sink.send(event).await {
                warn!("Stopping forwarding from input {}: {}", index, e);
                return Err(e);
            }
        }
        forwarded += 1;
    }
    debug!("Input {} exhausted after {} events", index, forwarded);

    Ok(forwarded)
}
