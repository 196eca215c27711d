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
// Voice mixing shared by the cpal and mock backends.
use std::cmp;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use super::voice::Voice;
use crate::clock::Clock;

/// The rendering clock: the number of frames mixed so far divided by the sample rate.
#[derive(Debug)]
pub struct RenderClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl RenderClock {
    pub fn new(sample_rate: u32) -> Arc<RenderClock> {
        Arc::new(RenderClock {
            frames: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
        })
    }

    /// The number of frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

impl Clock for RenderClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// A voice that has not started yet. The heap yields the earliest start first.
struct Waiting(Voice);

impl PartialEq for Waiting {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for Waiting {}

impl PartialOrd for Waiting {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiting {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        other.0.start_at().total_cmp(&self.0.start_at())
    }
}

/// Mixes scheduled voices into interleaved output. Every output channel carries
/// the same mono mix.
pub struct Renderer {
    sample_rate: u32,
    channels: u16,
    clock: Arc<RenderClock>,
    pending: Receiver<Voice>,
    /// Voices starting after the last rendered block.
    waiting: BinaryHeap<Waiting>,
    active: Vec<Voice>,
    /// Per-voice gains for the block being rendered.
    gains: Vec<f32>,
}

impl Renderer {
    /// Creates a renderer along with the sender used to schedule voices on it.
    pub fn new(sample_rate: u32, channels: u16) -> (Renderer, Sender<Voice>) {
        Renderer::with_queue(sample_rate, channels, crossbeam_channel::unbounded())
    }

    /// Like `new`, but holds at most `capacity` voices between blocks.
    pub fn bounded(sample_rate: u32, channels: u16, capacity: usize) -> (Renderer, Sender<Voice>) {
        Renderer::with_queue(sample_rate, channels, crossbeam_channel::bounded(capacity))
    }

    fn with_queue(
        sample_rate: u32,
        channels: u16,
        (tx, rx): (Sender<Voice>, Receiver<Voice>),
    ) -> (Renderer, Sender<Voice>) {
        let sample_rate = sample_rate.max(1);
        (
            Renderer {
                sample_rate,
                channels: channels.max(1),
                clock: RenderClock::new(sample_rate),
                pending: rx,
                waiting: BinaryHeap::new(),
                active: Vec::new(),
                gains: Vec::new(),
            },
            tx,
        )
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// The clock driven by this renderer.
    pub fn clock(&self) -> Arc<RenderClock> {
        self.clock.clone()
    }

    /// The number of voices that were still sounding after the last block.
    pub fn active_voices(&self) -> usize {
        self.active.len()
    }

    /// The number of received voices that had not started by the end of the last block.
    pub fn waiting_voices(&self) -> usize {
        self.waiting.len()
    }

    /// Renders the next block at the renderer's own clock and advances it.
    pub fn render(&mut self, output: &mut [f32]) {
        let start = self.clock.now();
        let frames = self.mix(start, output);
        self.clock.advance(frames as u64);
    }

    /// Mixes one block starting at the given time. Returns the number of frames written.
    pub fn mix(&mut self, start: f64, output: &mut [f32]) -> usize {
        while let Ok(voice) = self.pending.try_recv() {
            self.waiting.push(Waiting(voice));
        }

        let channels = self.channels as usize;
        let frames = output.len() / channels;
        output.fill(0.0);

        let rate = self.sample_rate as f64;
        let end = start + frames as f64 / rate;
        while self
            .waiting
            .peek()
            .is_some_and(|waiting| waiting.0.start_at() < end)
        {
            if let Some(Waiting(voice)) = self.waiting.pop() {
                self.active.push(voice);
            }
        }

        // Graph gains are read once per block.
        self.gains.clear();
        self.gains.extend(
            self.active
                .iter()
                .map(|voice| voice.destination().effective_gain()),
        );

        for (index, frame) in output.chunks_exact_mut(channels).enumerate() {
            let time = start + index as f64 / rate;
            let mut value = 0.0f32;
            for (voice, gain) in self.active.iter().zip(self.gains.iter()) {
                value += voice.sample_at(time) * voice.level_at(time) * gain;
            }
            frame.fill(value);
        }

        self.active.retain(|voice| !voice.is_finished(end));
        frames
    }
}
