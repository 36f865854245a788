use crate::{
    event_queue::{PushError, QueueSender},
    midi::{MidiEvent, NoteMessage},
    voice::{Lifecycle, VoiceBank},
    Error, Result,
};

use log::{debug, info, warn};
use std::f64::consts::PI;

/// Phase slots, addressed by pitch.
const PHASE_SLOTS: usize = 256;

/// Concert pitch A4.
const A4_PITCH: f64 = 69.0;
const A4_HZ: f64 = 440.0;

pub fn get_midi_key_hz(pitch: u8) -> f64 {
    2f64.powf((pitch as f64 - A4_PITCH) / 12.0) * A4_HZ
}

/// Polyphonic sine synthesizer. All of its state is owned by whoever renders it, so note handling
/// and rendering never run concurrently.
pub struct Synthesizer {
    master_volume: f64,
    voices: VoiceBank,
    /// Oscillator phase per pitch, in [0, 1). Kept across note off so a re-triggered note resumes
    /// its waveform.
    phases: [f64; PHASE_SLOTS],
    /// Per-pitch phase increment per sample.
    steps: [f64; PHASE_SLOTS],
    total_volume: f64,
    scale_volume: f64,
}

impl Synthesizer {
    pub fn new(sample_hz: f64, master_volume: f64) -> Self {
        let mut steps = [0.0; PHASE_SLOTS];
        for (pitch, step) in steps.iter_mut().enumerate().take(128) {
            *step = get_midi_key_hz(pitch as u8) / sample_hz;
        }

        Synthesizer {
            master_volume,
            voices: VoiceBank::new(),
            phases: [0.0; PHASE_SLOTS],
            steps,
            total_volume: 0.0,
            scale_volume: 1.0,
        }
    }

    pub fn voices(&self) -> &VoiceBank {
        &self.voices
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    pub fn scale_volume(&self) -> f64 {
        self.scale_volume
    }

    pub fn phase(&self, pitch: u8) -> f64 {
        self.phases[pitch as usize]
    }

    pub fn handle_note(&mut self, message: NoteMessage) {
        match message {
            NoteMessage::NoteOn { pitch, velocity } => self.start_note(pitch, velocity),
            NoteMessage::NoteOff { pitch } => self.stop_note(pitch),
        }
        self.update_volume();
    }

    fn start_note(&mut self, pitch: u8, velocity: u8) {
        let voice = self.voices.allocate(pitch);
        let rebound = !(voice.is_active() && voice.pitch == pitch);
        voice.pitch = pitch;
        voice.velocity = velocity;
        voice.lifecycle = Lifecycle::Sounding;
        if rebound {
            // Zero-crossing detection must start from this pitch's waveform, not the slot's
            // previous note.
            voice.last_sample =
                self.master_volume * (2.0 * PI * self.phases[pitch as usize]).sin() * voice.gain();
        }
    }

    fn stop_note(&mut self, pitch: u8) {
        if let Some(voice) = self.voices.find(pitch) {
            if voice.lifecycle == Lifecycle::Sounding {
                voice.lifecycle = Lifecycle::Releasing;
            }
        }
    }

    fn update_volume(&mut self) {
        self.total_volume = self.voices.total_gain();
        self.scale_volume = if self.total_volume <= 1.0 {
            1.0
        } else {
            1.0 / self.total_volume
        };
    }

    /// Adds one buffer of audio into `output`, interleaved with `channels` channels, then clamps
    /// every written sample to [-1, 1]. Does not allocate or block.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let Synthesizer {
            master_volume,
            voices,
            phases,
            steps,
            scale_volume,
            ..
        } = self;

        for frame in output.chunks_mut(channels) {
            let mut mixed = 0.0;
            for voice in voices.iter_mut().filter(|v| v.is_active()) {
                let slot = voice.pitch as usize;
                let sample = *master_volume * (2.0 * PI * phases[slot]).sin() * voice.gain();

                if voice.lifecycle == Lifecycle::Releasing
                    && (sample < 0.0) != (voice.last_sample < 0.0)
                {
                    voice.lifecycle = Lifecycle::Idle;
                }
                voice.last_sample = sample;
                mixed += sample * *scale_volume;

                phases[slot] = (phases[slot] + steps[slot]).fract();
            }

            for out in frame.iter_mut() {
                *out = (*out + mixed as f32).clamp(-1.0, 1.0);
            }
        }
    }
}

/// The synthesizer's event input, living on the non-realtime side. Decodes routed MIDI events
/// and hands note messages to the render bridge.
#[derive(Clone)]
pub struct SynthInput {
    notes: QueueSender<NoteMessage>,
}

impl SynthInput {
    pub fn new(notes: QueueSender<NoteMessage>) -> Self {
        SynthInput { notes }
    }

    pub fn forward(&self, event: MidiEvent) -> Result<()> {
        let message = match event.note_message() {
            Some(message) => message,
            None => {
                debug!(
                    "Ignoring MIDI status {:#04x} (data {} {})",
                    event.status, event.data1, event.data2
                );
                return Ok(());
            }
        };
        match message {
            NoteMessage::NoteOn { pitch, velocity } => {
                info!("NoteOn pitch = {} vel = {}", pitch, velocity)
            }
            NoteMessage::NoteOff { pitch } => info!("NoteOff pitch = {}", pitch),
        }

        match self.notes.push(message) {
            Ok(0) => Ok(()),
            Ok(dropped) => {
                warn!("Note queue full, dropped {} oldest event(s)", dropped);
                Ok(())
            }
            Err(PushError::Closed(_)) => Err(Error::SinkClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_queue, voice::MAX_VOICES};

    const SAMPLE_HZ: f64 = 44100.0;
    const MASTER: f64 = 0.75;

    fn note_on(pitch: u8, velocity: u8) -> NoteMessage {
        NoteMessage::NoteOn { pitch, velocity }
    }

    fn note_off(pitch: u8) -> NoteMessage {
        NoteMessage::NoteOff { pitch }
    }

    fn render_stereo(synth: &mut Synthesizer, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0; frames * 2];
        synth.render(&mut buffer, 2);
        buffer
    }

    #[test]
    fn a4_is_440_hz() {
        assert!((get_midi_key_hz(69) - 440.0).abs() < 1e-9);
        assert!((get_midi_key_hz(81) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn released_voice_goes_idle_without_click() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        synth.handle_note(note_on(60, 100));
        render_stereo(&mut synth, 1000);
        synth.handle_note(note_off(60));
        assert_eq!(synth.voices().active().next().unwrap().lifecycle, Lifecycle::Releasing);

        let buffer = render_stereo(&mut synth, 1024);
        assert_eq!(synth.voices().active().count(), 0);

        let left: Vec<f32> = buffer.iter().step_by(2).copied().collect();
        let last_sounding = left.iter().rposition(|s| *s != 0.0).unwrap();
        assert!(left[last_sounding].abs() < 0.05);
        assert!(left[last_sounding + 1..].iter().all(|s| *s == 0.0));
    }

    /// Largest sample a voice can emit on the frame its waveform crosses zero.
    fn crossing_bound(pitch: u8, velocity: u8) -> f64 {
        let step = get_midi_key_hz(pitch) / SAMPLE_HZ;
        MASTER * (velocity as f64 / 127.0) * (2.0 * PI * step).sin() + 1e-6
    }

    #[test]
    fn quick_taps_on_reused_slots_release_without_click() {
        for &pitch in &[30u8, 48, 60, 69, 72] {
            for &held_frames in &[0usize, 1, 37, 500] {
                let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);

                // Move this pitch's phase off zero, then leave slot 0 idle with another
                // pitch's last sample.
                synth.handle_note(note_on(pitch, 127));
                render_stereo(&mut synth, 42 + held_frames);
                synth.handle_note(note_off(pitch));
                render_stereo(&mut synth, 4096);
                synth.handle_note(note_on(pitch + 5, 127));
                render_stereo(&mut synth, 42);
                synth.handle_note(note_off(pitch + 5));
                render_stereo(&mut synth, 4096);
                assert_eq!(synth.voices().active().count(), 0);

                synth.handle_note(note_on(pitch, 127));
                let mut left: Vec<f32> = render_stereo(&mut synth, held_frames)
                    .into_iter()
                    .step_by(2)
                    .collect();
                synth.handle_note(note_off(pitch));
                left.extend(render_stereo(&mut synth, 4096).into_iter().step_by(2));
                assert_eq!(synth.voices().active().count(), 0);

                let last_sounding = match left.iter().rposition(|s| *s != 0.0) {
                    Some(i) => i,
                    None => continue,
                };
                assert!(
                    (left[last_sounding].abs() as f64) < crossing_bound(pitch, 127),
                    "pitch {} held {} frames ended on {}",
                    pitch,
                    held_frames,
                    left[last_sounding]
                );
                assert!(left[last_sounding + 1..].iter().all(|s| *s == 0.0));
            }
        }
    }

    #[test]
    fn stolen_slot_does_not_release_on_first_frame() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        synth.handle_note(note_on(60, 127));
        render_stereo(&mut synth, 42);
        for pitch in 61..61 + (MAX_VOICES as u8 - 1) {
            synth.handle_note(note_on(pitch, 100));
        }
        synth.handle_note(note_on(100, 127));
        synth.handle_note(note_off(100));
        for _ in 0..64 {
            if !synth.voices().iter().next().unwrap().is_active() {
                break;
            }
            render_stereo(&mut synth, 16);
        }
        assert!(!synth.voices().iter().next().unwrap().is_active());

        // Pitch 60 sits near the top of its waveform, far from a crossing.
        synth.handle_note(note_on(60, 127));
        synth.handle_note(note_off(60));
        render_stereo(&mut synth, 1);

        let slot = synth.voices().iter().next().unwrap();
        assert_eq!(slot.pitch, 60);
        assert_eq!(slot.lifecycle, Lifecycle::Releasing);
    }

    #[test]
    fn phase_survives_release() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        synth.handle_note(note_on(60, 100));
        render_stereo(&mut synth, 100);
        synth.handle_note(note_off(60));
        render_stereo(&mut synth, 1024);
        assert_eq!(synth.voices().active().count(), 0);

        let phase = synth.phase(60);
        assert!(phase > 0.0 && phase < 1.0);
        synth.handle_note(note_on(60, 100));
        assert_eq!(synth.phase(60), phase);
    }

    #[test]
    fn note_on_retrigger_cancels_release() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        synth.handle_note(note_on(60, 100));
        synth.handle_note(note_off(60));
        synth.handle_note(note_on(60, 80));

        let voices: Vec<_> = synth.voices().active().collect();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].lifecycle, Lifecycle::Sounding);
        assert_eq!(voices[0].velocity, 80);
    }

    #[test]
    fn two_notes_are_normalized() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        synth.handle_note(note_on(60, 100));
        synth.handle_note(note_on(64, 100));

        assert!((synth.total_volume() - 200.0 / 127.0).abs() < 1e-9);
        assert!((synth.scale_volume() - 0.635).abs() < 1e-3);

        let per_voice = MASTER * synth.scale_volume() * (100.0 / 127.0);
        let buffer = render_stereo(&mut synth, 2048);
        let peak = buffer.iter().fold(0.0f32, |m, s| m.max(s.abs())) as f64;
        assert!(peak <= 2.0 * per_voice + 1e-6);
    }

    #[test]
    fn scale_volume_bounds_total_volume() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        assert_eq!(synth.scale_volume(), 1.0);

        synth.handle_note(note_on(60, 127));
        assert_eq!(synth.total_volume(), 1.0);
        assert_eq!(synth.scale_volume(), 1.0);

        for (i, velocity) in [127u8, 1, 64, 90, 33, 127, 5].iter().enumerate() {
            synth.handle_note(note_on(40 + i as u8, *velocity));
            let total = synth.total_volume();
            if total > 1.0 {
                assert!(synth.scale_volume() * total <= 1.0 + 1e-12);
            } else {
                assert_eq!(synth.scale_volume(), 1.0);
            }
        }
    }

    #[test]
    fn pitch_69_renders_440_cycles_per_second() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        synth.handle_note(note_on(69, 127));

        let mut left: Vec<f32> = Vec::with_capacity(SAMPLE_HZ as usize);
        for _ in 0..(SAMPLE_HZ as usize / 1050) {
            let buffer = render_stereo(&mut synth, 1050);
            left.extend(buffer.iter().step_by(2));
        }
        assert_eq!(left.len(), SAMPLE_HZ as usize);

        let rising = left.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        assert!((439..=441).contains(&rising), "{} rising crossings", rising);
    }

    #[test]
    fn output_never_leaves_unit_range() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, 4.0);
        for pitch in 50..50 + MAX_VOICES as u8 {
            synth.handle_note(note_on(pitch, 127));
        }
        let mut buffer = vec![0.9; 4096];
        synth.render(&mut buffer, 2);

        assert!(buffer.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(buffer.iter().any(|s| *s == 1.0));
    }

    #[test]
    fn note_off_for_unknown_pitch_changes_nothing() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        synth.handle_note(note_on(60, 100));
        let before = synth.voices().clone();
        let total = synth.total_volume();

        synth.handle_note(note_off(61));

        assert_eq!(synth.voices(), &before);
        assert_eq!(synth.total_volume(), total);
    }

    #[test]
    fn seventeenth_note_steals_slot_zero() {
        let mut synth = Synthesizer::new(SAMPLE_HZ, MASTER);
        for pitch in 30..30 + MAX_VOICES as u8 {
            synth.handle_note(note_on(pitch, 100));
        }
        synth.handle_note(note_on(100, 100));

        let first = synth.voices().iter().next().unwrap();
        assert_eq!(first.pitch, 100);
        assert_eq!(synth.voices().active().count(), MAX_VOICES);
    }

    #[test]
    fn synth_input_drops_unrecognized_events() {
        let (tx, rx) = event_queue::bounded(8);
        let input = SynthInput::new(tx);
        input.forward(MidiEvent::new(0xb0, 64, 127)).unwrap();
        input.forward(MidiEvent::note_on(0, 60, 100)).unwrap();
        input.forward(MidiEvent::note_on(0, 60, 0)).unwrap();

        let queued: Vec<_> = rx.drain().collect();
        assert_eq!(queued, vec![note_on(60, 100), note_off(60)]);
    }

    #[test]
    fn synth_input_fails_once_bridge_is_gone() {
        let (tx, rx) = event_queue::bounded(8);
        let input = SynthInput::new(tx);
        drop(rx);
        assert!(matches!(
            input.forward(MidiEvent::note_on(0, 60, 100)),
            Err(Error::SinkClosed)
        ));
    }
}
