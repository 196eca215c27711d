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

//! Monotonic clocks measured in seconds.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic clock. Readings are seconds since an arbitrary, fixed origin.
pub trait Clock: Send + Sync {
    /// Returns the current reading in seconds.
    fn now(&self) -> f64;
}

/// A clock that only moves when told to. Used by the offline backend and by tests
/// that need to control the passage of time exactly.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// The current reading, stored as f64 bits.
    seconds: AtomicU64,
}

impl ManualClock {
    /// Creates a new manual clock reading zero.
    pub fn new() -> ManualClock {
        ManualClock {
            seconds: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Sets the clock to the given reading.
    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), Ordering::SeqCst);
    }

    /// Moves the clock forward by the given amount.
    pub fn advance(&self, seconds: f64) {
        let _ = self
            .seconds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + seconds).to_bits())
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), 0.0);

        clock.advance(1.5);
        clock.advance(0.25);
        assert_eq!(clock.now(), 1.75);

        clock.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }
}
