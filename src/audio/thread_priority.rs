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
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, info, warn};

/// Priority for the output callback thread when PADLOOP_THREAD_PRIORITY is unset.
const DEFAULT_PRIORITY: u8 = 70;

/// Environment variable holding the callback thread priority (0-99).
const PRIORITY_VAR: &str = "PADLOOP_THREAD_PRIORITY";

/// Environment variable that opts out of realtime scheduling.
const DISABLE_RT_VAR: &str = "PADLOOP_DISABLE_RT_AUDIO";

/// Scheduling settings for the output callback thread, read once when the stream is
/// built so the callback never touches the environment.
#[derive(Clone, Copy, Debug)]
pub struct CallbackPriority {
    priority: Option<ThreadPriorityValue>,
    realtime: bool,
    applied: bool,
}

impl CallbackPriority {
    pub fn from_env() -> CallbackPriority {
        let requested = std::env::var(PRIORITY_VAR)
            .ok()
            .and_then(|v| v.trim().parse::<u8>().ok())
            .filter(|v| *v < 100)
            .unwrap_or(DEFAULT_PRIORITY);
        CallbackPriority {
            priority: ThreadPriorityValue::try_from(requested).ok(),
            realtime: !env_flag(DISABLE_RT_VAR),
            applied: false,
        }
    }

    /// Applies the priority to the calling thread. Only the first call does anything.
    pub fn apply(&mut self) {
        if self.applied {
            return;
        }
        self.applied = true;

        let Some(priority) = self.priority else {
            debug!("No valid callback thread priority, leaving scheduling alone");
            return;
        };
        let tp = ThreadPriority::Crossplatform(priority);
        if let Err(e) = set_current_thread_priority(tp) {
            debug!(err = ?e, "Unable to raise output callback thread priority");
        }

        #[cfg(unix)]
        if self.realtime {
            use thread_priority::unix::{
                set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
                ThreadSchedulePolicy,
            };
            match set_thread_priority_and_policy(
                thread_native_id(),
                tp,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
                Ok(()) => info!("Enabled SCHED_FIFO for output callback thread"),
                Err(e) => warn!(err = ?e, "Failed to set SCHED_FIFO for output callback thread"),
            }
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim();
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}
