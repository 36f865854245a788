mod audio_device;
mod config;
mod error;
mod event_queue;
mod midi;
mod render_bridge;
mod router;
mod server;
mod synthesizer;
mod voice;

pub use audio_device::AudioOutputDeviceStream;
pub use config::{Config, MIN_NOTE_QUEUE_CAPACITY};
pub use error::{error_channel, Error, ErrorMonitor, ErrorReporter, Result};
pub use event_queue::{bounded as note_queue, PushError, QueueReceiver, QueueSender};
pub use midi::{
    enumerate_midi_devices, list_midi_devices, open_midi_inputs, open_midi_outputs,
    spawn_event_monitor, MidiDeviceInfo, MidiEvent, MidiInputDeviceStream, MidiOutputDeviceStream,
    NoteMessage,
};
pub use render_bridge::{AudioEffect, RenderBridge};
pub use router::{EventRouter, MidiSink};
pub use server::{BridgeServer, Streams};
pub use synthesizer::{get_midi_key_hz, SynthInput, Synthesizer};
pub use voice::{Lifecycle, Voice, VoiceBank, MAX_VOICES};
