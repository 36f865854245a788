use crate::{
    config::Config,
    error::{ErrorReporter, Result},
    render_bridge::RenderBridge,
    Error,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, SampleRate, StreamConfig,
};
use log::info;

pub struct AudioOutputDeviceStream {
    stream: cpal::Stream,
}

impl AudioOutputDeviceStream {
    /// Opens the default output device. `bridge` becomes the stream's render callback and lives on
    /// the audio thread from then on. Engine errors go to `reporter`.
    pub fn connect_default(
        config: &Config,
        mut bridge: RenderBridge,
        reporter: ErrorReporter,
    ) -> Result<AudioOutputDeviceStream> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(Error::NoAudioDevice)?;
        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Fixed(config.buffer_frames),
        };
        info!(
            "Creating output stream on '{}' with config:\n{:?}",
            device.name().unwrap_or_else(|_| "unknown".into()),
            stream_config
        );

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| bridge.process(data),
                move |err| reporter.report(Error::AudioEngine(err.to_string())),
                None,
            )
            .map_err(|e| Error::AudioOpen(e.to_string()))?;

        Ok(AudioOutputDeviceStream { stream })
    }

    pub fn play(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| Error::AudioControl(e.to_string()))
    }

    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::AudioControl(e.to_string()))
    }

    /// Stops the stream for good. No render callback runs after this returns.
    pub fn close(self) {
        if let Err(e) = self.pause() {
            info!("Pausing output stream before close failed: {}", e);
        }
        drop(self.stream);
        info!("Closed audio output stream");
    }
}
