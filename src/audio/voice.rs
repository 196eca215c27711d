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
use std::sync::Arc;

use super::buffer::SampleBuffer;
use super::graph::GainNode;

/// What a voice emits.
#[derive(Clone, Debug)]
pub enum Source {
    /// A sawtooth oscillator at the given frequency in Hz.
    Oscillator { frequency: f64 },
    /// One-shot playback of a decoded buffer.
    Buffer(SampleBuffer),
}

/// An exponential ramp between two levels over an absolute time range.
///
/// Before `start` the level is `from`, after `end` it is `to`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub start: f64,
    pub end: f64,
    pub from: f32,
    pub to: f32,
}

impl Envelope {
    /// Creates a ramp from `from` to `to` lasting `duration` seconds from `start`.
    pub fn exponential(start: f64, duration: f64, from: f32, to: f32) -> Envelope {
        Envelope {
            start,
            end: start + duration,
            from,
            to,
        }
    }

    /// Returns the level at the given absolute time.
    pub fn value_at(&self, time: f64) -> f32 {
        if time <= self.start {
            return self.from;
        }
        if time >= self.end || self.end <= self.start {
            return self.to;
        }
        // An exponential ramp cannot cross or touch zero.
        if self.from <= 0.0 || self.to <= 0.0 {
            return self.to;
        }
        let progress = (time - self.start) / (self.end - self.start);
        let ratio = (self.to / self.from) as f64;
        (self.from as f64 * ratio.powf(progress)) as f32
    }
}

/// A single sounding note instance, handed to a backend to render.
#[derive(Clone, Debug)]
pub struct Voice {
    source: Source,
    /// Level used when there is no envelope.
    amplitude: f32,
    envelope: Option<Envelope>,
    start_at: f64,
    stop_at: Option<f64>,
    destination: Arc<GainNode>,
}

impl Voice {
    /// Creates a voice that starts at `start_at` and feeds `destination`.
    pub fn new(source: Source, start_at: f64, destination: Arc<GainNode>) -> Voice {
        Voice {
            source,
            amplitude: 1.0,
            envelope: None,
            start_at,
            stop_at: None,
            destination,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Voice {
        self.amplitude = amplitude;
        self
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Voice {
        self.envelope = Some(envelope);
        self
    }

    pub fn stopping_at(mut self, stop_at: f64) -> Voice {
        self.stop_at = Some(stop_at);
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub fn start_at(&self) -> f64 {
        self.start_at
    }

    pub fn stop_at(&self) -> Option<f64> {
        self.stop_at
    }

    pub fn destination(&self) -> &Arc<GainNode> {
        &self.destination
    }

    /// Returns the frequency if this is an oscillator voice.
    pub fn frequency(&self) -> Option<f64> {
        match self.source {
            Source::Oscillator { frequency } => Some(frequency),
            Source::Buffer(_) => None,
        }
    }

    /// The level applied to the source at the given time, before graph gains.
    pub fn level_at(&self, time: f64) -> f32 {
        match &self.envelope {
            Some(envelope) => envelope.value_at(time),
            None => self.amplitude,
        }
    }

    /// Returns true once the voice can no longer produce sound.
    pub fn is_finished(&self, time: f64) -> bool {
        if let Some(stop_at) = self.stop_at {
            if time >= stop_at {
                return true;
            }
        }
        match &self.source {
            Source::Oscillator { .. } => false,
            Source::Buffer(buffer) => time >= self.start_at + buffer.duration(),
        }
    }

    /// Returns the raw source value at the given time, or silence outside the
    /// voice's lifetime.
    pub fn sample_at(&self, time: f64) -> f32 {
        if time < self.start_at || self.is_finished(time) {
            return 0.0;
        }
        let elapsed = time - self.start_at;
        match &self.source {
            Source::Oscillator { frequency } => {
                let phase = (frequency * elapsed).fract();
                (2.0 * phase - 1.0) as f32
            }
            Source::Buffer(buffer) => buffer.mono_at(elapsed * buffer.sample_rate() as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope() {
        let envelope = Envelope::exponential(1.0, 1.0, 0.3, 0.0001);
        assert_eq!(envelope.value_at(0.0), 0.3);
        assert_eq!(envelope.value_at(1.0), 0.3);
        assert_eq!(envelope.value_at(2.0), 0.0001);
        assert_eq!(envelope.value_at(5.0), 0.0001);

        // Halfway through an exponential ramp is the geometric mean.
        let expected = (0.3f64 * 0.0001).sqrt() as f32;
        assert!((envelope.value_at(1.5) - expected).abs() < 1e-6);

        // Monotonic decay.
        let mut last = envelope.value_at(1.0);
        for i in 1..=10 {
            let value = envelope.value_at(1.0 + i as f64 / 10.0);
            assert!(value < last);
            last = value;
        }
    }

    #[test]
    fn test_oscillator_voice() {
        let output = GainNode::new(1.0, None);
        let voice = Voice::new(Source::Oscillator { frequency: 1.0 }, 2.0, output)
            .with_amplitude(0.5)
            .stopping_at(3.0);

        assert_eq!(voice.frequency(), Some(1.0));
        assert_eq!(voice.sample_at(1.0), 0.0);
        assert_eq!(voice.sample_at(2.0), -1.0);
        assert!((voice.sample_at(2.5) - 0.0).abs() < 1e-6);
        assert!((voice.sample_at(2.75) - 0.5).abs() < 1e-6);
        assert!(!voice.is_finished(2.9));
        assert!(voice.is_finished(3.0));
        assert_eq!(voice.sample_at(3.5), 0.0);
        assert_eq!(voice.level_at(2.5), 0.5);
    }

    #[test]
    fn test_buffer_voice_finishes_with_buffer() {
        let output = GainNode::new(1.0, None);
        let buffer = SampleBuffer::new(vec![0.5; 10], 1, 10);
        let voice = Voice::new(Source::Buffer(buffer), 1.0, output);

        assert_eq!(voice.frequency(), None);
        assert_eq!(voice.sample_at(1.5), 0.5);
        assert!(!voice.is_finished(1.9));
        assert!(voice.is_finished(2.0));
    }
}
