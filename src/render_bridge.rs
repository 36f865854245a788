use crate::{event_queue::QueueReceiver, midi::NoteMessage, synthesizer::Synthesizer};

/// Renderable stages of the output chain.
pub enum AudioEffect {
    SineSynth(Synthesizer),
}

impl AudioEffect {
    pub fn handle_note(&mut self, message: NoteMessage) {
        match self {
            AudioEffect::SineSynth(synth) => synth.handle_note(message),
        }
    }

    /// Adds this stage's audio into the interleaved `output`. `input` is the audio fed into the
    /// chain, empty when there is none.
    pub fn process(&mut self, _input: &[f32], output: &mut [f32], channels: usize) {
        match self {
            AudioEffect::SineSynth(synth) => synth.render(output, channels),
        }
    }
}

/// What the audio engine calls once per hardware buffer. Owns the effects outright, so nothing
/// it touches is shared with the non-realtime side except the note queue.
pub struct RenderBridge {
    notes: QueueReceiver<NoteMessage>,
    effects: Vec<AudioEffect>,
    channels: usize,
}

impl RenderBridge {
    pub fn new(notes: QueueReceiver<NoteMessage>, channels: usize) -> Self {
        RenderBridge {
            notes,
            effects: Vec::new(),
            channels,
        }
    }

    pub fn with_effect(mut self, effect: AudioEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn effects(&self) -> &[AudioEffect] {
        &self.effects
    }

    /// Applies the queued note events, then fills `output` completely.
    pub fn process(&mut self, output: &mut [f32]) {
        for message in self.notes.drain() {
            for effect in self.effects.iter_mut() {
                effect.handle_note(message);
            }
        }

        output.fill(0.0);
        for effect in self.effects.iter_mut() {
            effect.process(&[], output, self.channels);
        }
    }
}
