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
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::debug;

use super::{AccessError, Attachment, DeviceChangeCallback, InputInfo, MessageCallback};

#[derive(Default)]
struct Inner {
    insecure: bool,
    unsupported: bool,
    failure: Option<AccessError>,
    inputs: Vec<InputInfo>,
    next_id: u64,
    /// Message callbacks by registration, with the input they listen to.
    listeners: BTreeMap<u64, (String, Arc<Mutex<MessageCallback>>)>,
    watchers: BTreeMap<u64, Arc<Mutex<DeviceChangeCallback>>>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Scripted controller access. Cloning gives another handle to the same script,
/// so a test can keep one while the code under test owns another.
#[derive(Clone, Default)]
pub struct Access {
    inner: Arc<Mutex<Inner>>,
}

impl Access {
    /// A secure, supported context with no inputs.
    pub fn new() -> Access {
        Access::default()
    }

    /// Reports the context as insecure.
    pub fn insecure(self) -> Access {
        self.inner.lock().insecure = true;
        self
    }

    /// Reports controller access as unavailable.
    pub fn unsupported(self) -> Access {
        self.inner.lock().unsupported = true;
        self
    }

    /// Makes access requests fail with the given error.
    pub fn failing(self, error: AccessError) -> Access {
        self.inner.lock().failure = Some(error);
        self
    }

    /// Adds an input that is present from the start.
    pub fn with_input(self, name: &str) -> Access {
        self.inner.lock().inputs.push(InputInfo {
            name: name.to_string(),
        });
        self
    }

    /// Delivers a raw message from every present input to its listeners.
    pub fn send(&self, raw: &[u8]) {
        let targets: Vec<Arc<Mutex<MessageCallback>>> = {
            let inner = self.inner.lock();
            inner
                .listeners
                .values()
                .filter(|(input, _)| inner.inputs.iter().any(|info| &info.name == input))
                .map(|(_, callback)| callback.clone())
                .collect()
        };
        debug!(raw = ?raw, listeners = targets.len(), "Sending mock MIDI message");
        for callback in targets {
            (callback.lock())(raw);
        }
    }

    /// Makes an input appear.
    pub fn plug(&self, name: &str) {
        {
            let mut inner = self.inner.lock();
            if inner.inputs.iter().any(|info| info.name == name) {
                return;
            }
            inner.inputs.push(InputInfo {
                name: name.to_string(),
            });
        }
        self.notify_watchers();
    }

    /// Makes an input disappear.
    pub fn unplug(&self, name: &str) {
        {
            let mut inner = self.inner.lock();
            let before = inner.inputs.len();
            inner.inputs.retain(|info| info.name != name);
            if inner.inputs.len() == before {
                return;
            }
        }
        self.notify_watchers();
    }

    /// The number of message callbacks currently attached.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// The number of device watchers currently attached.
    pub fn watcher_count(&self) -> usize {
        self.inner.lock().watchers.len()
    }

    fn notify_watchers(&self) {
        let (inputs, watchers) = {
            let inner = self.inner.lock();
            let watchers: Vec<Arc<Mutex<DeviceChangeCallback>>> =
                inner.watchers.values().cloned().collect();
            (inner.inputs.clone(), watchers)
        };
        for watcher in watchers {
            (watcher.lock())(&inputs);
        }
    }
}

impl super::Access for Access {
    fn is_secure_context(&self) -> bool {
        !self.inner.lock().insecure
    }

    fn is_supported(&self) -> bool {
        !self.inner.lock().unsupported
    }

    fn request_access(&self) -> Result<Box<dyn super::Ports>, AccessError> {
        if let Some(failure) = self.inner.lock().failure.clone() {
            return Err(failure);
        }
        Ok(Box::new(Ports {
            inner: self.inner.clone(),
        }))
    }
}

struct Ports {
    inner: Arc<Mutex<Inner>>,
}

/// Removes a registration when dropped.
struct Registration {
    id: u64,
    watcher: bool,
    inner: Weak<Mutex<Inner>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock();
            if self.watcher {
                inner.watchers.remove(&self.id);
            } else {
                inner.listeners.remove(&self.id);
            }
        }
    }
}

impl super::Ports for Ports {
    fn inputs(&self) -> Vec<InputInfo> {
        self.inner.lock().inputs.clone()
    }

    fn connect(
        &self,
        input: &InputInfo,
        callback: MessageCallback,
    ) -> Result<Attachment, AccessError> {
        let mut inner = self.inner.lock();
        if !inner.inputs.contains(input) {
            return Err(AccessError::Other(Some(format!(
                "no input named {}",
                input.name
            ))));
        }
        let id = inner.next_id();
        inner
            .listeners
            .insert(id, (input.name.clone(), Arc::new(Mutex::new(callback))));
        Ok(Attachment::new(Registration {
            id,
            watcher: false,
            inner: Arc::downgrade(&self.inner),
        }))
    }

    fn watch(&self, callback: DeviceChangeCallback) -> Result<Attachment, AccessError> {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        inner.watchers.insert(id, Arc::new(Mutex::new(callback)));
        Ok(Attachment::new(Registration {
            id,
            watcher: true,
            inner: Arc::downgrade(&self.inner),
        }))
    }
}
