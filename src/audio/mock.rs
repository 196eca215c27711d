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
use std::{collections::VecDeque, fmt, sync::Arc};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::graph::GainNode;
use super::mixer::Renderer;
use super::voice::Voice;
use super::Backend as AudioBackend;
use crate::clock::{Clock, ManualClock};

/// How many voices the mock keeps for inspection, and how many it queues for
/// rendering between `render` calls.
pub const MAX_SCHEDULED: usize = 4096;

/// An offline backend. Time only moves when the clock is advanced or audio is
/// rendered. The most recent scheduled voices are kept for inspection.
pub struct Backend {
    name: String,
    clock: Arc<ManualClock>,
    output: Arc<GainNode>,
    scheduled: Mutex<VecDeque<Voice>>,
    renderer: Mutex<Renderer>,
    voices: Sender<Voice>,
}

impl Backend {
    /// Gets the given mock backend at 44.1kHz.
    pub fn get(name: &str) -> Backend {
        Backend::with_sample_rate(name, 44100)
    }

    pub fn with_sample_rate(name: &str, sample_rate: u32) -> Backend {
        let (renderer, voices) = Renderer::bounded(sample_rate, 1, MAX_SCHEDULED);
        Backend {
            name: name.to_string(),
            clock: Arc::new(ManualClock::new()),
            output: GainNode::new(1.0, None),
            scheduled: Mutex::new(VecDeque::new()),
            renderer: Mutex::new(renderer),
            voices,
        }
    }

    /// The manual clock behind `now()`.
    pub fn manual_clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    /// The voices scheduled so far, oldest first, up to `MAX_SCHEDULED`.
    pub fn scheduled(&self) -> Vec<Voice> {
        self.scheduled.lock().iter().cloned().collect()
    }

    /// Forgets the scheduled voices (they keep sounding in the renderer).
    pub fn clear_scheduled(&self) {
        self.scheduled.lock().clear();
    }

    /// Renders the given number of mono frames starting at the current clock reading,
    /// then advances the clock past them.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut renderer = self.renderer.lock();
        let mut output = vec![0.0; frames];
        let start = self.clock.now();
        renderer.mix(start, &mut output);
        self.clock
            .advance(frames as f64 / renderer.sample_rate() as f64);
        output
    }
}

impl AudioBackend for Backend {
    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn output(&self) -> Arc<GainNode> {
        self.output.clone()
    }

    fn schedule(&self, voice: Voice) {
        debug!(
            device = self.name,
            start_at = voice.start_at(),
            frequency = voice.frequency(),
            "Scheduling voice (mock)"
        );
        {
            let mut scheduled = self.scheduled.lock();
            if scheduled.len() == MAX_SCHEDULED {
                scheduled.pop_front();
            }
            scheduled.push_back(voice.clone());
        }
        if self.voices.try_send(voice).is_err() {
            warn!(device = self.name, "Mock render queue is full, dropping voice");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.renderer.lock().sample_rate()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::voice::Source;
    use crate::testutil::calculate_rms;

    #[test]
    fn test_render_advances_clock() {
        let backend = Backend::with_sample_rate("mock-device", 1000);
        assert_eq!(backend.now(), 0.0);

        let output = backend.render(500);
        assert_eq!(output.len(), 500);
        assert!((backend.now() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_scheduled_voices_are_recorded_and_rendered() {
        let backend = Backend::with_sample_rate("mock-device", 1000);
        backend.manual_clock().set(1.0);
        backend.schedule(
            Voice::new(
                Source::Oscillator { frequency: 50.0 },
                1.1,
                backend.output(),
            )
            .with_amplitude(0.3)
            .stopping_at(1.2),
        );

        let scheduled = backend.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].start_at(), 1.1);

        let before = backend.render(100);
        assert_eq!(calculate_rms(&before), 0.0);
        let during = backend.render(100);
        assert!(calculate_rms(&during) > 0.1);
        let after = backend.render(100);
        assert_eq!(calculate_rms(&after), 0.0);

        backend.clear_scheduled();
        assert!(backend.scheduled().is_empty());
    }

    #[test]
    fn test_unrendered_voices_are_bounded() {
        let backend = Backend::with_sample_rate("mock-device", 1000);
        for i in 0..MAX_SCHEDULED + 10 {
            backend.schedule(Voice::new(
                Source::Oscillator { frequency: 50.0 },
                i as f64,
                backend.output(),
            ));
        }

        let scheduled = backend.scheduled();
        assert_eq!(scheduled.len(), MAX_SCHEDULED);
        assert_eq!(scheduled[0].start_at(), 10.0);

        // The first voices queued are the ones rendered.
        backend.render(10);
        assert_eq!(backend.renderer.lock().waiting_voices(), MAX_SCHEDULED - 1);
        assert_eq!(backend.renderer.lock().active_voices(), 1);
    }
}
