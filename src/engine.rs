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

//! The output graph and everything that makes sound.
//!
//! The engine owns a master gain wired to the backend output and a registry of
//! per-track gains wired to the master. Tracks are created on first reference and
//! live as long as the engine unless explicitly released.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, span, Level};

use crate::audio::{AudioError, Backend, GainNode, SampleBuffer, Source, Voice};
use crate::project::{MidiClip, PadConfig, Project, DEFAULT_GAIN};
use crate::sampler::Sampler;
use crate::transport::{Transport, DEFAULT_LOOKAHEAD};

/// A track's gain stage.
pub struct TrackState {
    id: String,
    gain: Arc<GainNode>,
}

impl TrackState {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn gain(&self) -> &Arc<GainNode> {
        &self.gain
    }

    pub fn volume(&self) -> f32 {
        self.gain.gain()
    }
}

impl fmt::Debug for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackState")
            .field("id", &self.id)
            .field("volume", &self.volume())
            .finish()
    }
}

/// What an arrangement run scheduled.
#[derive(Debug, Default, PartialEq)]
pub struct ArrangementReport {
    /// Placements whose clips were scheduled.
    pub placements: usize,
    /// Placements skipped because their clip or track no longer exists.
    pub skipped: usize,
    /// Total voices handed to the backend.
    pub voices: usize,
}

pub struct AudioEngine {
    backend: Arc<dyn Backend>,
    transport: Transport,
    sampler: Sampler,
    master: Arc<GainNode>,
    tracks: RwLock<HashMap<String, Arc<TrackState>>>,
}

impl AudioEngine {
    pub fn new(backend: Arc<dyn Backend>, bpm: f64) -> AudioEngine {
        AudioEngine::with_lookahead(backend, bpm, DEFAULT_LOOKAHEAD)
    }

    pub fn with_lookahead(backend: Arc<dyn Backend>, bpm: f64, lookahead: Duration) -> AudioEngine {
        let master = GainNode::connected_to(DEFAULT_GAIN, &backend.output());
        AudioEngine {
            transport: Transport::with_lookahead(backend.clock(), bpm, lookahead),
            sampler: Sampler::new(backend.clone()),
            backend,
            master,
            tracks: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn master(&self) -> &Arc<GainNode> {
        &self.master
    }

    /// Returns the track, creating it at the default volume if it doesn't exist yet.
    pub fn ensure_track(&self, id: &str) -> Arc<TrackState> {
        if let Some(track) = self.tracks.read().get(id) {
            return track.clone();
        }

        let mut tracks = self.tracks.write();
        tracks
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(track = id, "Creating track.");
                Arc::new(TrackState {
                    id: id.to_string(),
                    gain: GainNode::connected_to(DEFAULT_GAIN, &self.master),
                })
            })
            .clone()
    }

    /// Removes a track from the registry. Voices already routed to it keep playing
    /// through its gain. Returns false if there was no such track.
    pub fn release_track(&self, id: &str) -> bool {
        let released = self.tracks.write().remove(id).is_some();
        if released {
            debug!(track = id, "Released track.");
        }
        released
    }

    /// Sets a track's gain. Values are not clamped.
    pub fn set_track_volume(&self, id: &str, volume: f32) {
        self.ensure_track(id).gain.set_gain(volume);
    }

    /// Returns a track's gain if the track exists.
    pub fn track_volume(&self, id: &str) -> Option<f32> {
        self.tracks.read().get(id).map(|track| track.volume())
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master.set_gain(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.master.gain()
    }

    /// Decodes a sample for use with [`AudioEngine::trigger_pad`].
    pub fn decode_sample(&self, bytes: &[u8]) -> Result<SampleBuffer, AudioError> {
        self.backend.decode(bytes)
    }

    /// Plays a pad now. With a buffer the sample plays once through its own gain
    /// node at the pad's gain, feeding the master directly rather than any track.
    /// Without one the pad's note is synthesized.
    pub fn trigger_pad(&self, pad: &PadConfig, buffer: Option<&SampleBuffer>) {
        match buffer {
            Some(buffer) => {
                let gain = GainNode::connected_to(pad.gain, &self.master);
                let start = self.backend.now();
                debug!(pad = pad.id, start, "Triggering pad sample.");
                self.backend
                    .schedule(Voice::new(Source::Buffer(buffer.clone()), start, gain));
            }
            None => {
                self.sampler.play_note(pad.note, pad.gain, None, None);
            }
        }
    }

    /// Plays a key now on the main output.
    pub fn trigger_key(&self, note: u8, velocity: f32) {
        self.sampler.play_note(note, velocity, None, None);
    }

    /// Schedules every event of a clip on a track, `start_at_bar` bars (0-based) from
    /// the transport's current position. All voices are submitted at once and are not
    /// affected by later transport changes. Returns the scheduled start times.
    pub fn play_clip_on_track(&self, clip: &MidiClip, track_id: &str, start_at_bar: u32) -> Vec<f64> {
        let track = self.ensure_track(track_id);
        let bar_start =
            self.transport.current_time() + start_at_bar as f64 * self.transport.bar_duration();
        let clock_start = self.transport.clock_time(bar_start);

        debug!(
            clip = clip.id(),
            track = track_id,
            start_at_bar,
            bar_start,
            events = clip.events().len(),
            "Scheduling clip."
        );
        clip.events()
            .iter()
            .map(|event| {
                self.sampler.play_note(
                    event.note,
                    event.velocity as f32 / 127.0,
                    Some(clock_start + event.time),
                    Some(track.gain.clone()),
                )
            })
            .collect()
    }

    /// Starts the transport and schedules every placement of the project. Track
    /// volumes come from the project, muted tracks are silenced, and placements
    /// pointing at missing clips or tracks are skipped.
    pub fn play_arrangement(&self, project: &Project) -> ArrangementReport {
        let span = span!(Level::INFO, "play arrangement");
        let _enter = span.enter();

        self.transport.set_bpm(project.bpm);
        for track in &project.tracks {
            self.set_track_volume(&track.id, track.effective_volume());
        }

        self.transport.start();

        let mut report = ArrangementReport::default();
        for placement in &project.placements {
            let Some(clip) = project.find_clip(&placement.clip_id) else {
                debug!(placement = placement.id, clip = placement.clip_id, "Skipping placement, clip is missing.");
                report.skipped += 1;
                continue;
            };
            if project.find_track(&placement.track_id).is_none() {
                debug!(placement = placement.id, track = placement.track_id, "Skipping placement, track is missing.");
                report.skipped += 1;
                continue;
            }

            let start_at_bar = placement.start_bar.saturating_sub(1);
            report.voices += self
                .play_clip_on_track(clip, &placement.track_id, start_at_bar)
                .len();
            report.placements += 1;
        }

        info!(
            placements = report.placements,
            skipped = report.skipped,
            voices = report.voices,
            bars = project.length_bars(),
            "Arrangement scheduled."
        );
        report
    }

    /// Stops the transport. Voices already scheduled play out.
    pub fn stop_arrangement(&self) {
        self.transport.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock;
    use crate::project::{ClipPlacement, MidiEvent, Track};
    use crate::sampler::{note_to_frequency, velocity_to_amplitude};

    /// A lookahead long enough that the transport never polls on its own.
    const NEVER: Duration = Duration::from_secs(3600);

    fn engine(bpm: f64) -> (Arc<mock::Backend>, AudioEngine) {
        let backend = Arc::new(mock::Backend::get("mock-device"));
        let engine = AudioEngine::with_lookahead(backend.clone(), bpm, NEVER);
        (backend, engine)
    }

    #[test]
    fn test_graph_defaults() {
        let (backend, engine) = engine(100.0);
        assert_eq!(engine.master_volume(), 0.8);
        assert!(Arc::ptr_eq(
            engine.master().destination().unwrap(),
            &backend.output()
        ));

        let track = engine.ensure_track("track-1");
        assert_eq!(track.volume(), 0.8);
        assert!(Arc::ptr_eq(track.gain().destination().unwrap(), engine.master()));

        engine.set_master_volume(0.5);
        assert_eq!(engine.master_volume(), 0.5);
    }

    #[test]
    fn test_ensure_track_is_idempotent() {
        let (_, engine) = engine(100.0);
        let first = engine.ensure_track("track-1");
        engine.set_track_volume("track-1", 0.3);
        let second = engine.ensure_track("track-1");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.volume(), 0.3);
        assert_eq!(engine.track_volume("track-1"), Some(0.3));
    }

    #[test]
    fn test_set_track_volume_creates_and_does_not_clamp() {
        let (_, engine) = engine(100.0);
        assert_eq!(engine.track_volume("new"), None);
        engine.set_track_volume("new", 1.5);
        assert_eq!(engine.track_volume("new"), Some(1.5));
        engine.set_track_volume("new", -0.5);
        assert_eq!(engine.track_volume("new"), Some(-0.5));
    }

    #[test]
    fn test_release_track() {
        let (_, engine) = engine(100.0);
        let first = engine.ensure_track("track-1");
        engine.set_track_volume("track-1", 0.1);

        assert!(engine.release_track("track-1"));
        assert!(!engine.release_track("track-1"));
        assert_eq!(engine.track_volume("track-1"), None);

        let second = engine.ensure_track("track-1");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.volume(), 0.8);
    }

    #[test]
    fn test_trigger_pad_synth() {
        let (backend, engine) = engine(100.0);
        backend.manual_clock().set(2.0);
        engine.trigger_pad(&PadConfig::new("pad-1", 36), None);

        let voices = backend.scheduled();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].frequency(), Some(note_to_frequency(36)));
        assert_eq!(voices[0].start_at(), 2.0);
        assert_eq!(voices[0].amplitude(), velocity_to_amplitude(0.8));
        assert!(Arc::ptr_eq(voices[0].destination(), &backend.output()));
    }

    #[test]
    fn test_trigger_pad_sample_bypasses_tracks() {
        let (backend, engine) = engine(100.0);
        backend.manual_clock().set(1.0);
        let track = engine.ensure_track("track-1");
        let buffer = SampleBuffer::new(vec![0.5; 100], 1, 1000);
        let mut pad = PadConfig::new("pad-2", 37);
        pad.gain = 0.6;

        engine.trigger_pad(&pad, Some(&buffer));

        let voices = backend.scheduled();
        assert_eq!(voices.len(), 1);
        let voice = &voices[0];
        assert!(matches!(voice.source(), Source::Buffer(_)));
        assert_eq!(voice.start_at(), 1.0);
        assert_eq!(voice.destination().gain(), 0.6);
        assert!(Arc::ptr_eq(voice.destination().destination().unwrap(), engine.master()));

        // Sample hits feed the master directly, so track volume has no effect on them.
        assert!(!voice.destination().routes_through(track.gain()));
        let before = voice.destination().effective_gain();
        engine.set_track_volume("track-1", 0.0);
        assert_eq!(voice.destination().effective_gain(), before);
        engine.set_master_volume(0.0);
        assert_eq!(voice.destination().effective_gain(), 0.0);
    }

    #[test]
    fn test_trigger_key() {
        let (backend, engine) = engine(100.0);
        engine.trigger_key(69, 1.0);

        let voices = backend.scheduled();
        assert_eq!(voices[0].frequency(), Some(440.0));
        assert!((voices[0].amplitude() - 0.3).abs() < 1e-6);
        assert!(Arc::ptr_eq(voices[0].destination(), &backend.output()));
    }

    #[test]
    fn test_play_clip_on_track() {
        let (backend, engine) = engine(120.0);
        engine.transport().start();
        backend.manual_clock().advance(10.0);
        assert_eq!(engine.transport().current_time(), 10.0);

        let clip = MidiClip::new(
            "clip-1",
            "Clip 1",
            1,
            vec![MidiEvent {
                note: 60,
                velocity: 127,
                time: 0.5,
            }],
        );
        let starts = engine.play_clip_on_track(&clip, "track-1", 1);
        assert_eq!(starts, vec![12.5]);

        let voices = backend.scheduled();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].start_at(), 12.5);
        assert!((voices[0].amplitude() - 0.3).abs() < 1e-6);
        let track = engine.ensure_track("track-1");
        assert!(Arc::ptr_eq(voices[0].destination(), track.gain()));
        engine.stop_arrangement();
    }

    #[test]
    fn test_play_clip_converts_to_backend_clock() {
        let (backend, engine) = engine(120.0);
        backend.manual_clock().set(5.0);
        engine.transport().start();
        backend.manual_clock().advance(10.0);

        let clip = MidiClip::new(
            "clip-1",
            "Clip 1",
            1,
            vec![
                MidiEvent {
                    note: 60,
                    velocity: 64,
                    time: 0.0,
                },
                MidiEvent {
                    note: 62,
                    velocity: 64,
                    time: 0.5,
                },
            ],
        );
        // Transport time 12.0 and 12.5 are 17.0 and 17.5 on the backend clock.
        let starts = engine.play_clip_on_track(&clip, "track-2", 1);
        assert_eq!(starts, vec![17.0, 17.5]);

        // Stopping does not cancel anything already submitted.
        engine.stop_arrangement();
        assert_eq!(backend.scheduled().len(), 2);
    }

    #[test]
    fn test_play_arrangement() {
        let (backend, engine) = engine(100.0);
        let mut project = Project {
            bpm: 120.0,
            ..Project::default()
        };
        project.tracks.push(Track {
            mute: Some(true),
            ..Track::new("track-3", "Muted")
        });
        project.tracks[1].volume = 0.5;
        project.add_clip(MidiClip::new(
            "clip-1",
            "Clip 1",
            1,
            vec![
                MidiEvent {
                    note: 36,
                    velocity: 100,
                    time: 0.0,
                },
                MidiEvent {
                    note: 38,
                    velocity: 100,
                    time: 1.0,
                },
            ],
        ));
        project.place_clip("clip-1", Some("track-1"), 1);
        project.place_clip("clip-1", Some("track-2"), 3);
        project.place_clip("deleted-clip", Some("track-1"), 1);
        project.placements.push(ClipPlacement {
            id: "placement-x".to_string(),
            clip_id: "clip-1".to_string(),
            track_id: "deleted-track".to_string(),
            start_bar: 1,
            length_bars: 1,
        });

        let report = engine.play_arrangement(&project);
        assert_eq!(
            report,
            ArrangementReport {
                placements: 2,
                skipped: 2,
                voices: 4,
            }
        );
        assert!(engine.transport().is_running());
        assert_eq!(engine.transport().bpm(), 120.0);
        assert_eq!(engine.track_volume("track-2"), Some(0.5));
        assert_eq!(engine.track_volume("track-3"), Some(0.0));
        assert_eq!(engine.track_volume("deleted-track"), None);

        let mut starts: Vec<f64> = backend.scheduled().iter().map(|v| v.start_at()).collect();
        starts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(starts, vec![0.0, 1.0, 4.0, 5.0]);

        engine.stop_arrangement();
        assert!(!engine.transport().is_running());
    }
}
