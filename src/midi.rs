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

pub mod connection;
pub mod decode;
mod midir;
pub mod mock;

pub use connection::{Connection, ConnectionState, Status};
pub use decode::{DecodedMessage, MessageKind, MessageLog};

/// Why controller access could not be granted.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("access to MIDI devices was denied")]
    PermissionDenied,

    #[error("access to MIDI devices is not allowed in this context")]
    Security,

    #[error("{}", .0.as_deref().unwrap_or("MIDI access failed"))]
    Other(Option<String>),
}

impl AccessError {
    /// Returns true for the permission and security class of failures.
    pub fn is_denial(&self) -> bool {
        matches!(self, AccessError::PermissionDenied | AccessError::Security)
    }
}

/// An input port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputInfo {
    pub name: String,
}

impl fmt::Display for InputInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Receives raw messages from an input.
pub type MessageCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Receives the input list whenever it changes.
pub type DeviceChangeCallback = Box<dyn FnMut(&[InputInfo]) + Send>;

/// Keeps a callback registered. Dropping it detaches the callback.
pub struct Attachment {
    _guard: Box<dyn Send>,
}

impl Attachment {
    pub fn new<T: Send + 'static>(guard: T) -> Attachment {
        Attachment {
            _guard: Box::new(guard),
        }
    }
}

/// The platform's controller access capability.
pub trait Access: Send + Sync {
    /// Whether access may be requested from this context at all.
    fn is_secure_context(&self) -> bool;

    /// Whether the platform offers controller access.
    fn is_supported(&self) -> bool;

    /// Requests access to the controller inputs.
    fn request_access(&self) -> Result<Box<dyn Ports>, AccessError>;
}

/// Granted access to the controller inputs.
pub trait Ports: Send {
    /// The inputs currently present.
    fn inputs(&self) -> Vec<InputInfo>;

    /// Delivers raw messages from the given input to the callback.
    fn connect(
        &self,
        input: &InputInfo,
        callback: MessageCallback,
    ) -> Result<Attachment, AccessError>;

    /// Reports the input list whenever inputs appear or disappear.
    fn watch(&self, callback: DeviceChangeCallback) -> Result<Attachment, AccessError>;
}

/// Lists the inputs known to midir.
pub fn list_devices() -> Result<Vec<InputInfo>, Box<dyn Error>> {
    midir::list()
}

/// Gets controller access for the given device filter. Filters starting with "mock"
/// select a mock with a single input of that name.
pub fn get_access(device: Option<&str>) -> Arc<dyn Access> {
    match device {
        Some(name) if name.starts_with("mock") => Arc::new(mock::Access::new().with_input(name)),
        _ => Arc::new(midir::Access::new(device)),
    }
}
