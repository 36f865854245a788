use log::{error, warn};
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to initialize MIDI: {0}")]
    MidiInit(String),
    #[error("failed to query MIDI port: {0}")]
    MidiPort(String),
    #[error("failed to open MIDI device '{name}': {reason}")]
    MidiConnect { name: String, reason: String },
    #[error("failed to write to MIDI device '{name}': {reason}")]
    MidiSend { name: String, reason: String },

    #[error("no audio output device available")]
    NoAudioDevice,
    #[error("failed to open audio output stream: {0}")]
    AudioOpen(String),
    #[error("failed to start or stop audio output stream: {0}")]
    AudioControl(String),
    #[error("audio engine failure: {0}")]
    AudioEngine(String),

    #[error("router sink was closed")]
    SinkClosed,
    #[error("forwarding task for input {index} panicked")]
    ForwardingTask { index: usize },
}

impl Error {
    /// Engine failures leave nothing to render into, so they end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::AudioEngine(_))
    }
}

/// Sending half of the device error channel. Never blocks, so the audio callback thread can use
/// it too.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<Error>,
}

impl ErrorReporter {
    pub fn report(&self, err: Error) {
        if let Err(mpsc::error::SendError(err)) = self.tx.send(err) {
            warn!("Error reported after the monitor closed: {}", err);
        }
    }
}

/// Receiving half of the device error channel.
pub struct ErrorMonitor {
    rx: mpsc::UnboundedReceiver<Error>,
}

pub fn error_channel() -> (ErrorReporter, ErrorMonitor) {
    let (tx, rx) = mpsc::unbounded_channel();

    (ErrorReporter { tx }, ErrorMonitor { rx })
}

impl ErrorMonitor {
    /// Logs every non-fatal error and resolves with the first fatal one. Resolves with `None` once
    /// every reporter is gone.
    pub async fn next_fatal(&mut self) -> Option<Error> {
        while let Some(err) = self.rx.recv().await {
            error!("{}", err);
            if err.is_fatal() {
                return Some(err);
            }
        }

        None
    }

    /// Logs whatever has been reported so far without waiting.
    pub fn flush(&mut self) {
        while let Ok(err) = self.rx.try_recv() {
            error!("{}", err);
        }
    }
}
