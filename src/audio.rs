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
use std::{error::Error, fmt, sync::Arc};

use crate::clock::Clock;

pub mod buffer;
pub mod cpal;
pub mod graph;
pub mod mixer;
pub mod mock;
mod thread_priority;
pub mod voice;

pub use buffer::SampleBuffer;
pub use graph::GainNode;
pub use voice::{Envelope, Source, Voice};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("unable to decode audio: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("no playable track found in audio data")]
    NoTrack,

    #[error("audio data contained no samples")]
    EmptyStream,

    #[error("output device error: {0}")]
    Device(String),
}

/// The rendering backend everything audible goes through.
pub trait Backend: fmt::Display + Send + Sync {
    /// The monotonic clock voices are scheduled against.
    fn clock(&self) -> Arc<dyn Clock>;

    /// The current reading of the backend clock, in seconds.
    fn now(&self) -> f64 {
        self.clock().now()
    }

    /// The terminal node. Signal reaching it goes to the device.
    fn output(&self) -> Arc<GainNode>;

    /// Hands a voice to the renderer. The backend owns it until it stops.
    fn schedule(&self, voice: Voice);

    /// Decodes encoded audio bytes into a playable buffer.
    fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer, AudioError> {
        buffer::decode(bytes)
    }

    fn sample_rate(&self) -> u32;
}

/// An output device as reported by the host.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub channels: u16,
    pub sample_rate: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={}) ({})",
            self.name, self.channels, self.sample_rate, self.host
        )
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
    cpal::Backend::list()
}

/// Gets a backend for the given device name. Names starting with "mock" select the
/// offline backend.
pub fn get_backend(name: &str, sample_rate: Option<u32>) -> Result<Arc<dyn Backend>, AudioError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(match sample_rate {
            Some(sample_rate) => mock::Backend::with_sample_rate(name, sample_rate),
            None => mock::Backend::get(name),
        }));
    }

    Ok(Arc::new(cpal::Backend::get(name, sample_rate)?))
}
