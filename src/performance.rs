// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Live playing: routes controller notes to pads and keys and feeds the loop
//! recorder.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::audio::{AudioError, SampleBuffer};
use crate::engine::AudioEngine;
use crate::midi::{DecodedMessage, MessageKind};
use crate::project::{MidiClip, PadConfig};
use crate::recorder::Recorder;

/// Velocity recorded for pad hits.
pub const PAD_RECORD_VELOCITY: u8 = 100;

/// Control values at or above this press the record control.
const CONTROL_PRESSED: u8 = 64;

/// A pad and the sample it plays, if one is loaded.
#[derive(Clone, Debug)]
pub struct Pad {
    pub config: PadConfig,
    pub buffer: Option<SampleBuffer>,
}

/// What a controller message did.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Pad(String),
    Key(u8),
    RecordingStarted,
    ClipFinished(MidiClip),
    Ignored,
}

/// Settings for a performance.
#[derive(Clone, Debug)]
pub struct Options {
    pub quantize: bool,
    pub clip_length_bars: u32,
    /// The control change that toggles recording.
    pub record_control: Option<u8>,
    /// Clips already in the project, so new clip ids continue after them.
    pub existing_clips: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            quantize: true,
            clip_length_bars: 1,
            record_control: None,
            existing_clips: 0,
        }
    }
}

pub struct Performance {
    engine: Arc<AudioEngine>,
    pads: RwLock<Vec<Pad>>,
    recorder: Mutex<Recorder>,
    clip_length_bars: u32,
    record_control: Option<u8>,
}

impl Performance {
    pub fn new(engine: Arc<AudioEngine>, pads: Vec<PadConfig>, options: Options) -> Performance {
        let recorder = Recorder::new(engine.transport().clone(), options.quantize)
            .with_existing_clips(options.existing_clips);
        Performance {
            pads: RwLock::new(
                pads.into_iter()
                    .map(|config| Pad {
                        config,
                        buffer: None,
                    })
                    .collect(),
            ),
            recorder: Mutex::new(recorder),
            clip_length_bars: options.clip_length_bars,
            record_control: options.record_control,
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    pub fn pads(&self) -> Vec<PadConfig> {
        self.pads.read().iter().map(|pad| pad.config.clone()).collect()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.lock().is_recording()
    }

    /// Decodes a sample and loads it onto a pad. Returns false if there is no such pad.
    pub fn load_sample(&self, pad_id: &str, name: &str, bytes: &[u8]) -> Result<bool, AudioError> {
        let buffer = self.engine.decode_sample(bytes)?;
        Ok(self.attach_sample(pad_id, name, buffer))
    }

    /// Loads a decoded sample onto a pad. Returns false if there is no such pad.
    pub fn attach_sample(&self, pad_id: &str, name: &str, buffer: SampleBuffer) -> bool {
        let mut pads = self.pads.write();
        let Some(pad) = pads.iter_mut().find(|pad| pad.config.id == pad_id) else {
            return false;
        };
        info!(
            pad = pad_id,
            sample = name,
            seconds = buffer.duration(),
            "Loaded sample onto pad"
        );
        pad.config.sample_name = Some(name.to_string());
        pad.buffer = Some(buffer);
        true
    }

    /// Plays a pad and records the hit. Returns false if there is no such pad.
    pub fn trigger_pad(&self, pad_id: &str) -> bool {
        let pad = self
            .pads
            .read()
            .iter()
            .find(|pad| pad.config.id == pad_id)
            .cloned();
        match pad {
            Some(pad) => {
                self.play_pad(&pad);
                true
            }
            None => false,
        }
    }

    /// Plays a key at a velocity between 0 and 1 and records the hit.
    pub fn trigger_key(&self, note: u8, velocity: f32) {
        self.engine.trigger_key(note, velocity);
        let recorded = (velocity * 127.0).round().clamp(0.0, 127.0) as u8;
        self.recorder
            .lock()
            .record(note, recorded, self.engine.backend().now());
    }

    /// Starts recording, or finishes the take and returns the new clip.
    pub fn toggle_recording(&self) -> Option<MidiClip> {
        let now = self.engine.backend().now();
        self.recorder.lock().toggle(now, self.clip_length_bars)
    }

    /// Routes a decoded controller message. Note-ons play the pad on that note, or a
    /// key when no pad matches. The record control toggles recording.
    pub fn handle(&self, message: &DecodedMessage) -> Action {
        match message.kind {
            MessageKind::NoteOn { note, velocity } => {
                let pad = self
                    .pads
                    .read()
                    .iter()
                    .find(|pad| pad.config.note == note)
                    .cloned();
                match pad {
                    Some(pad) => {
                        self.play_pad(&pad);
                        Action::Pad(pad.config.id)
                    }
                    None => {
                        self.trigger_key(note, velocity as f32 / 127.0);
                        Action::Key(note)
                    }
                }
            }
            MessageKind::ControlChange { control, value }
                if Some(control) == self.record_control && value >= CONTROL_PRESSED =>
            {
                match self.toggle_recording() {
                    Some(clip) => Action::ClipFinished(clip),
                    None => Action::RecordingStarted,
                }
            }
            _ => {
                debug!(message = %message, "Not routed");
                Action::Ignored
            }
        }
    }

    fn play_pad(&self, pad: &Pad) {
        self.engine.trigger_pad(&pad.config, pad.buffer.as_ref());
        self.recorder.lock().record(
            pad.config.note,
            PAD_RECORD_VELOCITY,
            self.engine.backend().now(),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::audio::{mock, Source};
    use crate::midi::decode;
    use crate::project::MidiEvent;
    use crate::testutil::wav_bytes;

    const NEVER: Duration = Duration::from_secs(3600);

    fn performance(options: Options) -> (Arc<mock::Backend>, Performance) {
        let backend = Arc::new(mock::Backend::get("mock-device"));
        let engine = Arc::new(AudioEngine::with_lookahead(backend.clone(), 120.0, NEVER));
        (
            backend,
            Performance::new(engine, PadConfig::default_kit(), options),
        )
    }

    fn message(raw: [u8; 3]) -> DecodedMessage {
        decode::decode_raw(&raw, Instant::now()).unwrap()
    }

    #[test]
    fn test_routes_pads_and_keys() {
        let (backend, performance) = performance(Options::default());

        assert_eq!(
            performance.handle(&message([0x99, 36, 127])),
            Action::Pad("pad-1".to_string())
        );
        assert_eq!(performance.handle(&message([0x90, 60, 127])), Action::Key(60));
        assert_eq!(performance.handle(&message([0x80, 36, 0])), Action::Ignored);
        assert_eq!(performance.handle(&message([0xB0, 1, 127])), Action::Ignored);

        let voices = backend.scheduled();
        assert_eq!(voices.len(), 2);
        // Pads play at the pad's gain, not the hit's velocity.
        assert!((voices[0].amplitude() - 0.24).abs() < 1e-6);
        assert!((voices[1].amplitude() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_loaded_sample_plays_instead_of_synth() -> Result<(), AudioError> {
        let (backend, performance) = performance(Options::default());
        let bytes = wav_bytes(&[1000; 441], 1, 44100);

        assert!(performance.load_sample("pad-2", "snare.wav", &bytes)?);
        assert!(!performance.load_sample("pad-99", "snare.wav", &bytes)?);
        assert_eq!(
            performance.pads()[1].sample_name.as_deref(),
            Some("snare.wav")
        );

        assert!(performance.trigger_pad("pad-2"));
        assert!(!performance.trigger_pad("pad-99"));
        let voices = backend.scheduled();
        assert_eq!(voices.len(), 1);
        assert!(matches!(voices[0].source(), Source::Buffer(_)));
        Ok(())
    }

    #[test]
    fn test_load_sample_rejects_garbage() {
        let (_, performance) = performance(Options::default());
        assert!(performance.load_sample("pad-1", "noise", &[1, 2, 3]).is_err());
        assert_eq!(performance.pads()[0].sample_name, None);
    }

    #[test]
    fn test_record_control_makes_clips() {
        let (backend, performance) = performance(Options {
            record_control: Some(64),
            existing_clips: 2,
            clip_length_bars: 2,
            ..Options::default()
        });
        let clock = backend.manual_clock();
        clock.set(5.0);

        assert_eq!(performance.handle(&message([0xB0, 64, 0])), Action::Ignored);
        assert_eq!(
            performance.handle(&message([0xB0, 64, 127])),
            Action::RecordingStarted
        );
        assert!(performance.is_recording());
        assert!(performance.engine().transport().is_running());

        clock.advance(0.26);
        performance.handle(&message([0x90, 36, 20]));
        clock.advance(0.25);
        performance.handle(&message([0x90, 72, 64]));

        let Action::ClipFinished(clip) = performance.handle(&message([0xB0, 64, 100])) else {
            panic!("expected a finished clip");
        };
        assert!(!performance.is_recording());
        assert_eq!(clip.id(), "clip-3");
        assert_eq!(clip.length_bars(), 2);
        assert_eq!(
            clip.events(),
            &[
                MidiEvent {
                    note: 36,
                    velocity: 100,
                    time: 0.25
                },
                MidiEvent {
                    note: 72,
                    velocity: 64,
                    time: 0.5
                },
            ]
        );
    }
}
