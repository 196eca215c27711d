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

//! Synthesized voices for pads without samples and for keys.

use std::sync::Arc;

use tracing::trace;

use crate::audio::{Backend, Envelope, GainNode, Source, Voice};

/// How long a synthesized note rings before it stops.
pub const RELEASE_SECONDS: f64 = 1.2;

/// The quietest a triggered note will ever be.
pub const MIN_AMPLITUDE: f32 = 0.05;

/// Velocity scaling, leaving headroom for many voices summing.
pub const VELOCITY_SCALE: f32 = 0.3;

/// The level the release ramps down to.
pub const SILENCE: f32 = 0.0001;

/// Equal temperament frequency for a MIDI note, A4 (69) = 440Hz.
pub fn note_to_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

/// Amplitude for a velocity in [0, 1].
pub fn velocity_to_amplitude(velocity: f32) -> f32 {
    (velocity * VELOCITY_SCALE).max(MIN_AMPLITUDE)
}

/// Plays single sawtooth notes through the backend. Each call allocates a fresh
/// voice that the backend reclaims once it stops.
#[derive(Clone)]
pub struct Sampler {
    backend: Arc<dyn Backend>,
}

impl Sampler {
    pub fn new(backend: Arc<dyn Backend>) -> Sampler {
        Sampler { backend }
    }

    /// Plays a note. Starts now unless `when` is given and goes to the main output
    /// unless a destination is given. Returns the start time.
    pub fn play_note(
        &self,
        note: u8,
        velocity: f32,
        when: Option<f64>,
        destination: Option<Arc<GainNode>>,
    ) -> f64 {
        let start = when.unwrap_or_else(|| self.backend.now());
        let amplitude = velocity_to_amplitude(velocity);
        let frequency = note_to_frequency(note);
        let destination = destination.unwrap_or_else(|| self.backend.output());

        trace!(note, frequency, amplitude, start, "Playing note");
        self.backend.schedule(
            Voice::new(Source::Oscillator { frequency }, start, destination)
                .with_amplitude(amplitude)
                .with_envelope(Envelope::exponential(
                    start,
                    RELEASE_SECONDS,
                    amplitude,
                    SILENCE,
                ))
                .stopping_at(start + RELEASE_SECONDS),
        );
        start
    }
}
