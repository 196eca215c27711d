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

use std::{
    thread,
    time::{Duration, Instant},
};

const TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TICK: Duration = Duration::from_millis(100);

/// Polls the predicate with exponential backoff until it holds, panicking with
/// the given message after a timeout.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    let mut tick = Duration::from_millis(2);
    while !predicate() {
        if Instant::now() > deadline {
            panic!("{}", error_msg);
        }
        thread::sleep(tick);
        tick = (tick * 2).min(MAX_TICK);
    }
}
