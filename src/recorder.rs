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
use tracing::{debug, info};

use crate::project::{MidiClip, MidiEvent};
use crate::transport::Transport;

/// Grid steps per beat (sixteenth notes in 4/4).
pub const STEPS_PER_BEAT: f64 = 4.0;

/// Snaps a time to the nearest sixteenth note.
pub fn quantize(time: f64, seconds_per_beat: f64) -> f64 {
    let step = seconds_per_beat / STEPS_PER_BEAT;
    if !step.is_finite() || step <= 0.0 {
        return time;
    }
    (time / step).round() * step
}

/// Records note hits into clips.
pub struct Recorder {
    transport: Transport,
    quantize: bool,
    /// When the current take started, on the backend clock.
    started_at: Option<f64>,
    events: Vec<MidiEvent>,
    clips_made: usize,
}

impl Recorder {
    pub fn new(transport: Transport, quantize: bool) -> Recorder {
        Recorder {
            transport,
            quantize,
            started_at: None,
            events: Vec::new(),
            clips_made: 0,
        }
    }

    /// Continues clip numbering after clips that already exist.
    pub fn with_existing_clips(mut self, count: usize) -> Recorder {
        self.clips_made = count;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    /// The events of the current take.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Begins a new take and starts the transport.
    pub fn start(&mut self, now: f64) {
        self.transport.start();
        self.events.clear();
        self.started_at = Some(now);
        info!(at = now, "Recording started");
    }

    /// Records a hit if a take is running.
    pub fn record(&mut self, note: u8, velocity: u8, now: f64) -> Option<MidiEvent> {
        let started_at = self.started_at?;
        let elapsed = now - started_at;
        let time = if self.quantize {
            quantize(elapsed, self.transport.seconds_per_beat())
        } else {
            elapsed
        };
        let event = MidiEvent {
            note,
            velocity,
            time,
        };
        debug!(note, velocity, time, "Recorded note");
        self.events.push(event);
        Some(event)
    }

    /// Ends the take, stops the transport and returns the new clip.
    pub fn finish(&mut self, length_bars: u32) -> Option<MidiClip> {
        self.started_at.take()?;
        self.transport.stop();
        self.clips_made += 1;
        let clip = MidiClip::new(
            &format!("clip-{}", self.clips_made),
            &format!("Clip {}", self.clips_made),
            length_bars,
            std::mem::take(&mut self.events),
        );
        info!(
            clip = clip.id(),
            events = clip.events().len(),
            bars = clip.length_bars(),
            "Recording finished"
        );
        Some(clip)
    }

    /// Starts a take if none is running, otherwise finishes it.
    pub fn toggle(&mut self, now: f64, length_bars: u32) -> Option<MidiClip> {
        if self.is_recording() {
            self.finish(length_bars)
        } else {
            self.start(now);
            None
        }
    }
}
