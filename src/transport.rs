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

//! The bar clock.
//!
//! The transport polls its clock on a fixed lookahead period and classifies elapsed
//! time into bars. Bar notifications are therefore not sample-accurate: they may lag
//! the true bar boundary by up to one lookahead period. Anything that needs accurate
//! timing must convert to absolute clock timestamps itself (see
//! [`crate::engine::AudioEngine::play_clip_on_track`]).

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, span, warn, Level};

use crate::clock::Clock;

/// The slowest tempo the transport will run at.
pub const MIN_BPM: f64 = 40.0;

/// The fastest tempo the transport will run at.
pub const MAX_BPM: f64 = 200.0;

/// The tempo used when none is given.
pub const DEFAULT_BPM: f64 = 100.0;

/// The meter is fixed at 4/4.
pub const BEATS_PER_BAR: f64 = 4.0;

/// How often the polling loop evaluates the clock.
pub const DEFAULT_LOOKAHEAD: Duration = Duration::from_millis(100);

/// A bar listener. Receives the clock reading at notification time and the
/// zero-based index of the bar that was entered.
pub type Listener = dyn Fn(f64, u64) + Send + Sync;

/// Clamps the given tempo to the supported range.
pub fn clamp_bpm(bpm: f64) -> f64 {
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// Returns the length of one 4/4 bar at the given tempo, in seconds.
pub fn bar_duration(bpm: f64) -> f64 {
    (60.0 / bpm) * BEATS_PER_BAR
}

struct State {
    bpm: f64,
    bar_duration: f64,
    running: bool,
    /// Clock reading when the current run started.
    origin: f64,
    /// The last bar that listeners were told about during this run.
    last_bar: Option<u64>,
    /// Incremented on every start so that a stale polling thread can never notify.
    generation: u64,
    /// Dropping this sender stops the polling thread.
    stop_tx: Option<Sender<()>>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Arc<Listener>>,
}

struct Inner {
    clock: Arc<dyn Clock>,
    lookahead: Duration,
    state: Mutex<State>,
    listeners: Arc<Mutex<Listeners>>,
}

/// The bar clock. Cloning produces another handle to the same transport.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// A listener registration. Call [`Subscription::unsubscribe`] to remove the listener.
#[must_use = "the listener can only be removed through its subscription"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Removes the listener. Notifications already in flight still reach it.
    /// Returns false if the listener was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.listeners.upgrade() {
            Some(listeners) => listeners.lock().entries.remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl Transport {
    /// Creates a stopped transport at the given tempo, polling every 100ms.
    pub fn new(clock: Arc<dyn Clock>, bpm: f64) -> Transport {
        Transport::with_lookahead(clock, bpm, DEFAULT_LOOKAHEAD)
    }

    /// Creates a stopped transport with an explicit polling period.
    pub fn with_lookahead(clock: Arc<dyn Clock>, bpm: f64, lookahead: Duration) -> Transport {
        let bpm = if bpm.is_nan() {
            DEFAULT_BPM
        } else {
            clamp_bpm(bpm)
        };
        Transport {
            inner: Arc::new(Inner {
                clock,
                lookahead,
                state: Mutex::new(State {
                    bpm,
                    bar_duration: bar_duration(bpm),
                    running: false,
                    origin: 0.0,
                    last_bar: None,
                    generation: 0,
                    stop_tx: None,
                }),
                listeners: Arc::new(Mutex::new(Listeners::default())),
            }),
        }
    }

    /// Sets the tempo, clamped to [40, 200], and returns the tempo actually applied.
    /// A running transport picks up the new bar length on its next poll.
    pub fn set_bpm(&self, bpm: f64) -> f64 {
        let mut state = self.inner.state.lock();
        if bpm.is_nan() {
            warn!("Ignoring NaN tempo.");
            return state.bpm;
        }
        state.bpm = clamp_bpm(bpm);
        state.bar_duration = bar_duration(state.bpm);
        debug!(bpm = state.bpm, bar_duration = state.bar_duration, "Tempo set.");
        state.bpm
    }

    /// Returns the current tempo.
    pub fn bpm(&self) -> f64 {
        self.inner.state.lock().bpm
    }

    /// Returns the length of one bar in seconds.
    pub fn bar_duration(&self) -> f64 {
        self.inner.state.lock().bar_duration
    }

    /// Returns the length of one beat in seconds.
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm()
    }

    /// Returns true while the transport is running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Starts the transport. Does nothing if it is already running.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.running {
            return;
        }

        state.running = true;
        state.origin = self.inner.clock.now();
        state.last_bar = None;
        state.generation += 1;

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        state.stop_tx = Some(stop_tx);

        info!(bpm = state.bpm, origin = state.origin, "Transport started.");

        let inner = Arc::downgrade(&self.inner);
        let lookahead = self.inner.lookahead;
        let generation = state.generation;
        thread::spawn(move || poll_loop(inner, lookahead, generation, stop_rx));
    }

    /// Stops the transport. Does nothing if it is not running.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if !state.running {
            return;
        }

        state.running = false;
        // Disconnecting the channel ends the polling thread.
        state.stop_tx = None;
        info!("Transport stopped.");
    }

    /// Returns the seconds elapsed since the transport started, or 0 while stopped.
    pub fn current_time(&self) -> f64 {
        let state = self.inner.state.lock();
        if !state.running {
            return 0.0;
        }
        self.inner.clock.now() - state.origin
    }

    /// Returns the current position in (fractional) bars, or 0 while stopped.
    pub fn current_bar(&self) -> f64 {
        self.current_time() / self.bar_duration()
    }

    /// Converts a time on the transport's timeline into a reading of the underlying
    /// clock, which is what voices are scheduled against. While stopped the timeline
    /// is anchored at the present.
    pub fn clock_time(&self, transport_time: f64) -> f64 {
        let state = self.inner.state.lock();
        if state.running {
            state.origin + transport_time
        } else {
            self.inner.clock.now() + transport_time
        }
    }

    /// Registers a bar listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(f64, u64) + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Evaluates the clock once, exactly as a tick of the polling loop would.
    pub fn poll(&self) {
        let generation = self.inner.state.lock().generation;
        self.inner.poll(generation);
    }
}

/// The polling loop. Exits as soon as the stop channel disconnects, which also
/// happens when the last transport handle is dropped.
fn poll_loop(inner: Weak<Inner>, lookahead: Duration, generation: u64, stop_rx: Receiver<()>) {
    let span = span!(Level::DEBUG, "transport poll");
    let _enter = span.enter();

    let ticker = tick(lookahead);
    loop {
        select! {
            recv(ticker) -> _ => match inner.upgrade() {
                Some(inner) => inner.poll(generation),
                None => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }
    debug!(generation, "Transport polling loop finished.");
}

impl Inner {
    fn poll(&self, generation: u64) {
        let (now, bar) = {
            let mut state = self.state.lock();
            if !state.running || state.generation != generation {
                return;
            }

            let now = self.clock.now();
            let elapsed = (now - state.origin).max(0.0);
            let bar = (elapsed / state.bar_duration).floor() as u64;

            // Bars only ever move forward within a run, even if a tempo change
            // would put the clock back into an earlier bar.
            if state.last_bar.is_some_and(|last| bar <= last) {
                return;
            }
            state.last_bar = Some(bar);
            (now, bar)
        };

        // Snapshot so listeners can subscribe or unsubscribe while being notified.
        let batch: Vec<Arc<Listener>> = self.listeners.lock().entries.values().cloned().collect();
        debug!(bar, listeners = batch.len(), "Bar changed.");
        for listener in batch {
            listener(now, bar);
        }
    }
}
