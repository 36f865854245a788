use crate::{
    error::{ErrorReporter, Result},
    Error,
};

use log::{debug, info, trace};
use std::fmt;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tokio::{sync::mpsc, task};
use wmidi::MidiMessage;

const CLIENT_NAME: &str = "midibridge";

/// One short MIDI message as it arrives from a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Microseconds, as reported by the device backend.
    pub timestamp: u64,
    /// Command in the high nibble, channel in the low nibble.
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

/// The subset of MIDI the synthesizer reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteMessage {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
}

impl MidiEvent {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        MidiEvent {
            timestamp: 0,
            status,
            data1,
            data2,
        }
    }

    pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::new(0x90 | (channel & 0x0f), pitch, velocity)
    }

    pub fn note_off(channel: u8, pitch: u8) -> Self {
        Self::new(0x80 | (channel & 0x0f), pitch, 0)
    }

    /// Accepts messages of one to three bytes. Longer ones (SysEx) are not routed.
    pub fn from_bytes(timestamp: u64, bytes: &[u8]) -> Option<Self> {
        match *bytes {
            [status] => Some(MidiEvent {
                timestamp,
                status,
                data1: 0,
                data2: 0,
            }),
            [status, data1] => Some(MidiEvent {
                timestamp,
                status,
                data1,
                data2: 0,
            }),
            [status, data1, data2] => Some(MidiEvent {
                timestamp,
                status,
                data1,
                data2,
            }),
            _ => None,
        }
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0f
    }

    /// Number of bytes this message occupies on the wire, derived from the status byte.
    pub fn wire_len(&self) -> usize {
        match self.status {
            0x80..=0xbf | 0xe0..=0xef | 0xf2 => 3,
            0xc0..=0xdf | 0xf1 | 0xf3 => 2,
            _ => 1,
        }
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }

    /// Decodes note on/off. A note on with zero velocity counts as a note off.
    pub fn note_message(&self) -> Option<NoteMessage> {
        let bytes = self.to_bytes();
        match MidiMessage::try_from(&bytes[..self.wire_len()]) {
            Ok(MidiMessage::NoteOn(_, key, velocity)) => {
                let pitch = u8::from(key);
                let velocity = u8::from(velocity);
                if velocity == 0 {
                    Some(NoteMessage::NoteOff { pitch })
                } else {
                    Some(NoteMessage::NoteOn { pitch, velocity })
                }
            }
            Ok(MidiMessage::NoteOff(_, key, _)) => Some(NoteMessage::NoteOff {
                pitch: u8::from(key),
            }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MidiDeviceInfo {
    pub name: String,
    pub interface: &'static str,
    pub input: bool,
    pub output: bool,
    pub is_open: bool,
}

fn interface_name() -> &'static str {
    if cfg!(target_os = "linux") {
        "ALSA"
    } else if cfg!(target_os = "macos") {
        "CoreMIDI"
    } else if cfg!(target_os = "windows") {
        "WinMM"
    } else {
        "unknown"
    }
}

fn new_midi_input(suffix: &str) -> Result<MidiInput> {
    let mut midi_in = MidiInput::new(&format!("{}_{}", CLIENT_NAME, suffix))
        .map_err(|e| Error::MidiInit(e.to_string()))?;
    midi_in.ignore(Ignore::None);

    Ok(midi_in)
}

fn new_midi_output(suffix: &str) -> Result<MidiOutput> {
    MidiOutput::new(&format!("{}_{}", CLIENT_NAME, suffix))
        .map_err(|e| Error::MidiInit(e.to_string()))
}

fn input_port_names() -> Result<Vec<String>> {
    let midi_in = new_midi_input("enumerate")?;
    let ports = midi_in.ports();
    ports
        .iter()
        .map(|p| midi_in.port_name(p).map_err(|e| Error::MidiPort(e.to_string())))
        .collect()
}

fn output_port_names() -> Result<Vec<String>> {
    let midi_out = new_midi_output("enumerate")?;
    let ports = midi_out.ports();
    ports
        .iter()
        .map(|p| midi_out.port_name(p).map_err(|e| Error::MidiPort(e.to_string())))
        .collect()
}

/// Every MIDI device the backend can see, with input and output ports of the same name merged.
pub fn enumerate_midi_devices() -> Result<Vec<MidiDeviceInfo>> {
    let mut devices: Vec<MidiDeviceInfo> = Vec::new();
    let mut entry = |name: String| -> usize {
        match devices.iter().position(|d| d.name == name) {
            Some(i) => i,
            None => {
                devices.push(MidiDeviceInfo {
                    name,
                    interface: interface_name(),
                    input: false,
                    output: false,
                    is_open: false,
                });
                devices.len() - 1
            }
        }
    };
    let inputs: Vec<usize> = input_port_names()?.into_iter().map(&mut entry).collect();
    let outputs: Vec<usize> = output_port_names()?.into_iter().map(&mut entry).collect();
    for i in inputs {
        devices[i].input = true;
    }
    for i in outputs {
        devices[i].output = true;
    }

    Ok(devices)
}

impl fmt::Display for MidiDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]{}{} {}",
            self.name,
            self.interface,
            if self.input { " in" } else { "" },
            if self.output { " out" } else { "" },
            if self.is_open { "(open)" } else { "(closed)" },
        )
    }
}

pub fn list_midi_devices() -> Result<()> {
    println!("--- Available MIDI devices ---");
    for (i, device) in enumerate_midi_devices()?.iter().enumerate() {
        println!("{}: {}", i, device);
    }

    Ok(())
}

pub struct MidiInputDeviceStream {
    name: String,
    connection: MidiInputConnection<()>,
    message_rx: Option<mpsc::Receiver<MidiEvent>>,
}

impl MidiInputDeviceStream {
    pub fn connect(name: &str, capacity: usize) -> Result<Self> {
        let connect_error = |reason: String| Error::MidiConnect {
            name: name.to_string(),
            reason,
        };
        let midi_in = new_midi_input("in")?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| connect_error("no such port".into()))?;

        let (message_tx, message_rx) = mpsc::channel(capacity);
        let connection = midi_in
            .connect(
                &port,
                "midibridge_input",
                move |timestamp, message, _| match MidiEvent::from_bytes(timestamp, message) {
                    // Blocks the backend thread while the router is backed up.
                    Some(event) => {
                        if message_tx.blocking_send(event).is_err() {
                            trace!("Dropping MIDI event, nothing is listening");
                        }
                    }
                    None => trace!("Ignoring {}-byte MIDI message", message.len()),
                },
                (),
            )
            .map_err(|e| connect_error(e.to_string()))?;

        Ok(MidiInputDeviceStream {
            name: name.to_string(),
            connection,
            message_rx: Some(message_rx),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The events received from the device, in arrival order. Can only be taken once.
    pub fn listen(&mut self) -> Option<mpsc::Receiver<MidiEvent>> {
        self.message_rx.take()
    }

    /// Closing the connection ends the event sequence returned by `listen`.
    pub fn close(self) {
        self.connection.close();
        info!("Closed MIDI input '{}'", self.name);
    }
}

pub struct MidiOutputDeviceStream {
    name: String,
    event_tx: mpsc::Sender<MidiEvent>,
    writer: task::JoinHandle<()>,
}

impl MidiOutputDeviceStream {
    /// Must be called from within a Tokio runtime; the port writer runs on the blocking pool.
    pub fn connect(name: &str, capacity: usize, reporter: ErrorReporter) -> Result<Self> {
        let connect_error = |reason: String| Error::MidiConnect {
            name: name.to_string(),
            reason,
        };
        let midi_out = new_midi_output("out")?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| connect_error("no such port".into()))?;
        let connection = midi_out
            .connect(&port, "midibridge_output")
            .map_err(|e| connect_error(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(capacity);
        let writer_name = name.to_string();
        let writer = task::spawn_blocking(move || {
            write_events(writer_name, connection, event_rx, reporter)
        });

        Ok(MidiOutputDeviceStream {
            name: name.to_string(),
            event_tx,
            writer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle for queueing events to the device. A full queue makes `send` wait.
    pub fn writer(&self) -> mpsc::Sender<MidiEvent> {
        self.event_tx.clone()
    }

    /// Waits for the writer to flush. Any handles from `writer` must be dropped first.
    pub async fn close(self) {
        drop(self.event_tx);
        if self.writer.await.is_err() {
            debug!("MIDI output writer for '{}' panicked", self.name);
        }
        info!("Closed MIDI output '{}'", self.name);
    }
}

fn write_events(
    name: String,
    mut connection: MidiOutputConnection,
    mut event_rx: mpsc::Receiver<MidiEvent>,
    reporter: ErrorReporter,
) {
    while let Some(event) = event_rx.blocking_recv() {
        let bytes = event.to_bytes();
        if let Err(e) = connection.send(&bytes[..event.wire_len()]) {
            reporter.report(Error::MidiSend {
                name: name.clone(),
                reason: e.to_string(),
            });
        }
    }
    connection.close();
}

/// Opens every input device whose name contains `filter`. Devices that fail to open are reported
/// and skipped.
pub fn open_midi_inputs(
    filter: &str,
    capacity: usize,
    reporter: &ErrorReporter,
) -> Result<Vec<MidiInputDeviceStream>> {
    let mut streams: Vec<MidiInputDeviceStream> = Vec::new();
    for name in input_port_names()? {
        if !name.contains(filter) || streams.iter().any(|s| s.name == name) {
            continue;
        }
        info!("Opening MIDI input '{}'", name);
        match MidiInputDeviceStream::connect(&name, capacity) {
            Ok(stream) => streams.push(stream),
            Err(e) => reporter.report(e),
        }
    }

    Ok(streams)
}

/// Opens every output device whose name contains `filter`. Devices that fail to open are
/// reported and skipped.
pub fn open_midi_outputs(
    filter: &str,
    capacity: usize,
    reporter: &ErrorReporter,
) -> Result<Vec<MidiOutputDeviceStream>> {
    let mut streams: Vec<MidiOutputDeviceStream> = Vec::new();
    for name in output_port_names()? {
        if !name.contains(filter) || streams.iter().any(|s| s.name == name) {
            continue;
        }
        info!("Opening MIDI output '{}'", name);
        match MidiOutputDeviceStream::connect(&name, capacity, reporter.clone()) {
            Ok(stream) => streams.push(stream),
            Err(e) => reporter.report(e),
        }
    }

    Ok(streams)
}

/// Logs every event it receives. Ends when all senders are dropped.
pub fn spawn_event_monitor(capacity: usize) -> (mpsc::Sender<MidiEvent>, task::JoinHandle<()>) {
    let (event_tx, mut event_rx) = mpsc::channel::<MidiEvent>(capacity);
    let handle = task::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!(
                "midi: status {:#04x} data {} {} @ {}",
                event.status, event.data1, event.data2, event.timestamp
            );
        }
    });

    (event_tx, handle)
}
