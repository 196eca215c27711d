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
use serde::Deserialize;

use crate::project::{PadConfig, DEFAULT_GAIN};

/// A YAML representation of a pad.
#[derive(Deserialize, Clone, Debug)]
pub struct Pad {
    /// The pad id, e.g. `pad-1`.
    id: String,

    /// The note the pad answers to.
    note: u8,

    /// Playback gain (default: 0.8).
    gain: Option<f32>,

    /// The id of a stored sample to load onto the pad.
    sample: Option<String>,

    choke_group: Option<u32>,
}

impl Pad {
    pub fn new(id: &str, note: u8) -> Pad {
        Pad {
            id: id.to_string(),
            note,
            gain: None,
            sample: None,
            choke_group: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The stored sample to load onto the pad, if any.
    pub fn sample(&self) -> Option<&str> {
        self.sample.as_deref()
    }

    pub fn to_pad_config(&self) -> PadConfig {
        PadConfig {
            id: self.id.clone(),
            note: self.note.min(127),
            gain: self.gain.unwrap_or(DEFAULT_GAIN),
            sample_name: None,
            choke_group: self.choke_group,
        }
    }
}
