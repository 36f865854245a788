/// Maximum polyphony.
pub const MAX_VOICES: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Sounding,
    /// Waiting for the waveform to cross zero before going idle.
    Releasing,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Voice {
    pub pitch: u8,
    pub velocity: u8,
    pub lifecycle: Lifecycle,
    /// Sample rendered for this voice on the previous frame, used for zero-crossing detection.
    pub last_sample: f64,
}

impl Voice {
    const fn idle() -> Self {
        Voice {
            pitch: 0,
            velocity: 0,
            lifecycle: Lifecycle::Idle,
            last_sample: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle != Lifecycle::Idle
    }

    /// Linear gain from velocity.
    pub fn gain(&self) -> f64 {
        self.velocity as f64 / 127.0
    }
}

/// Fixed set of voice slots. Slots are never added or removed, only cycled through their
/// lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceBank {
    voices: [Voice; MAX_VOICES],
}

impl Default for VoiceBank {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceBank {
    pub fn new() -> Self {
        VoiceBank {
            voices: [Voice::idle(); MAX_VOICES],
        }
    }

    /// The active voice bound to `pitch`, if any.
    pub fn find(&mut self, pitch: u8) -> Option<&mut Voice> {
        self.voices
            .iter_mut()
            .find(|v| v.is_active() && v.pitch == pitch)
    }

    /// Picks the slot for a new note: the voice already playing `pitch`, else the first idle
    /// voice, else slot 0 is stolen.
    pub fn allocate(&mut self, pitch: u8) -> &mut Voice {
        let index = self
            .voices
            .iter()
            .position(|v| v.is_active() && v.pitch == pitch)
            .or_else(|| self.voices.iter().position(|v| !v.is_active()))
            .unwrap_or(0);

        &mut self.voices[index]
    }

    /// Sum of the gains of all non-idle voices.
    pub fn total_gain(&self) -> f64 {
        self.active().map(Voice::gain).sum()
    }

    pub fn active(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter().filter(|v| v.is_active())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }
}
