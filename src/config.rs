use crate::{Error, Result};

/// Smallest note queue the render bridge accepts.
pub const MIN_NOTE_QUEUE_CAPACITY: usize = 8;

#[derive(Clone, Debug)]
pub struct Config {
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub channels: u16,
    pub master_volume: f64,
    /// Capacity of the queue between the router and the render bridge.
    pub note_queue_capacity: usize,
    /// Capacity of each MIDI output (and monitor) channel. A full one blocks its forwarders.
    pub sink_capacity: usize,
    /// Substring that a MIDI device name must contain to be opened.
    pub device_filter: String,
    /// Log every routed event.
    pub monitor: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sample_rate: 44100,
            buffer_frames: 2048,
            channels: 2,
            master_volume: 0.75,
            note_queue_capacity: 64,
            sink_capacity: 64,
            device_filter: String::new(),
            monitor: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".into()));
        }
        if self.buffer_frames == 0 {
            return Err(Error::Config("buffer size must be positive".into()));
        }
        if self.channels == 0 {
            return Err(Error::Config("at least one output channel is required".into()));
        }
        if !(self.master_volume.is_finite() && self.master_volume >= 0.0) {
            return Err(Error::Config(format!(
                "master volume {} is not a non-negative number",
                self.master_volume
            )));
        }
        if self.note_queue_capacity < MIN_NOTE_QUEUE_CAPACITY {
            return Err(Error::Config(format!(
                "note queue capacity {} is below {}",
                self.note_queue_capacity, MIN_NOTE_QUEUE_CAPACITY
            )));
        }
        if self.sink_capacity == 0 {
            return Err(Error::Config("sink capacity must be positive".into()));
        }

        Ok(())
    }
}
