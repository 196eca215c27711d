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
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Instant,
};

use midly::live::LiveEvent;
use parking_lot::Mutex;
use tracing::{debug, info, span, trace, warn, Level};

use super::{
    decode::{self, DecodedMessage, MessageLog},
    Access, AccessError, Attachment, InputInfo, MessageCallback, Ports,
};

const INSECURE_MESSAGE: &str =
    "MIDI access is not permitted in this context. Run padloop from a trusted session and retry.";
const NO_INPUTS_MESSAGE: &str = "No MIDI inputs detected; check cable/power and reopen permissions.";
const BLOCKED_MESSAGE: &str = "The system blocked MIDI access. Check that this user may open MIDI devices and retry.";
const FALLBACK_MESSAGE: &str = "Permission denied or device busy.";
const DISCONNECTED_MESSAGE: &str = "Device disconnected; reconnect USB then hit connect again.";

/// Where the connection stands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Disconnected,
    Connected,
    Unsupported,
    Error,
    PermissionBlocked,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Disconnected => "disconnected",
            Status::Connected => "connected",
            Status::Unsupported => "unsupported",
            Status::Error => "error",
            Status::PermissionBlocked => "permission-blocked",
        })
    }
}

/// A snapshot of the connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionState {
    pub status: Status,
    pub device_name: Option<String>,
    /// Guidance for the performer, if any.
    pub message: Option<String>,
    /// Newest first.
    pub log: Vec<DecodedMessage>,
}

type Handler = Arc<dyn Fn(&DecodedMessage) + Send + Sync>;

#[derive(Default)]
struct State {
    status: Status,
    device_name: Option<String>,
    message: Option<String>,
    log: MessageLog,
}

impl State {
    fn set(&mut self, status: Status, device_name: Option<String>, message: Option<&str>) {
        self.status = status;
        self.device_name = device_name;
        self.message = message.map(str::to_string);
    }

    fn snapshot(&self) -> ConnectionState {
        ConnectionState {
            status: self.status,
            device_name: self.device_name.clone(),
            message: self.message.clone(),
            log: self.log.to_vec(),
        }
    }
}

/// What a granted access keeps alive.
#[derive(Default)]
struct Session {
    ports: Option<Box<dyn Ports>>,
    input: Option<(String, Attachment)>,
    watch: Option<Attachment>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    handler: Mutex<Option<Handler>>,
    session: Mutex<Session>,
    /// Bumped on every connect and disconnect so stale callbacks go quiet.
    generation: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn receive(&self, generation: u64, raw: &[u8]) {
        if !self.is_current(generation) {
            return;
        }

        match LiveEvent::parse(raw) {
            Ok(event) => trace!(event = ?event, "MIDI event"),
            Err(e) => trace!(err = %e, raw = ?raw, "Unparseable MIDI bytes"),
        }

        let Some(message) = decode::decode_raw(raw, Instant::now()) else {
            debug!(raw = ?raw, "Ignoring MIDI message");
            return;
        };

        self.state.lock().log.push(message);
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(&message);
        }
    }

    /// Follows the input list: attach to the first input, or report the loss.
    fn inputs_changed(self: &Arc<Self>, generation: u64, inputs: &[InputInfo]) {
        if !self.is_current(generation) {
            return;
        }
        let first = inputs.first().cloned();

        let mut stale = None;
        let mut failure = None;
        {
            let mut session = self.session.lock();
            let attached = session.input.as_ref().map(|(name, _)| name.clone());
            match &first {
                Some(input) if attached.as_deref() != Some(input.name.as_str()) => {
                    if let Some(ports) = session.ports.as_ref() {
                        match ports.connect(input, message_callback(self, generation)) {
                            Ok(attachment) => {
                                stale = session.input.replace((input.name.clone(), attachment));
                            }
                            Err(e) => failure = Some(e),
                        }
                    }
                }
                Some(_) => {}
                None => stale = session.input.take(),
            }
        }
        drop(stale);

        let mut state = self.state.lock();
        match (first, failure) {
            (Some(input), None) => {
                info!(device = input.name, "MIDI input connected");
                state.set(Status::Connected, Some(input.name), None);
            }
            (Some(_), Some(e)) => {
                warn!(err = %e, "Unable to reattach MIDI input");
                state.set(Status::Error, None, Some(&failure_message(&e)));
            }
            (None, _) => {
                warn!("MIDI input disconnected");
                state.set(Status::Error, None, Some(DISCONNECTED_MESSAGE));
            }
        }
    }
}

fn message_callback(shared: &Arc<Shared>, generation: u64) -> MessageCallback {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    Box::new(move |raw: &[u8]| {
        if let Some(shared) = weak.upgrade() {
            shared.receive(generation, raw);
        }
    })
}

fn failure_message(error: &AccessError) -> String {
    match error {
        AccessError::PermissionDenied | AccessError::Security => BLOCKED_MESSAGE.to_string(),
        AccessError::Other(Some(message)) => message.clone(),
        AccessError::Other(None) => FALLBACK_MESSAGE.to_string(),
    }
}

/// A controller connection. Decoded note and control messages are logged and handed
/// to the handler given to [`Connection::connect`].
pub struct Connection {
    access: Arc<dyn Access>,
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(access: Arc<dyn Access>) -> Connection {
        Connection {
            access,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Connects to the first input and returns the resulting state. Every state can be
    /// left by connecting again.
    pub fn connect<F>(&self, handler: F) -> ConnectionState
    where
        F: Fn(&DecodedMessage) + Send + Sync + 'static,
    {
        let span = span!(Level::INFO, "connect MIDI");
        let _enter = span.enter();

        *self.shared.handler.lock() = Some(Arc::new(handler));
        let generation = self.teardown();

        if !self.access.is_secure_context() {
            return self.settle(Status::PermissionBlocked, None, Some(INSECURE_MESSAGE));
        }
        if !self.access.is_supported() {
            return self.settle(Status::Unsupported, None, None);
        }

        let ports = match self.access.request_access() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(err = %e, "MIDI access failed");
                let status = if e.is_denial() {
                    Status::PermissionBlocked
                } else {
                    Status::Error
                };
                return self.settle(status, None, Some(&failure_message(&e)));
            }
        };

        let first = ports.inputs().into_iter().next();
        let input = match &first {
            Some(info) => match ports.connect(info, message_callback(&self.shared, generation)) {
                Ok(attachment) => Some((info.name.clone(), attachment)),
                Err(e) => {
                    warn!(err = %e, device = info.name, "Unable to attach MIDI input");
                    return self.settle(Status::Error, None, Some(&failure_message(&e)));
                }
            },
            None => None,
        };

        let watch = {
            let weak = Arc::downgrade(&self.shared);
            ports.watch(Box::new(move |inputs: &[InputInfo]| {
                if let Some(shared) = weak.upgrade() {
                    shared.inputs_changed(generation, inputs);
                }
            }))
        };
        let watch = match watch {
            Ok(watch) => Some(watch),
            Err(e) => {
                warn!(err = %e, "Unable to watch MIDI inputs");
                None
            }
        };

        *self.shared.session.lock() = Session {
            ports: Some(ports),
            input,
            watch,
        };

        match first {
            Some(info) => {
                info!(device = info.name, "MIDI connected");
                self.settle(Status::Connected, Some(info.name), None)
            }
            None => {
                info!("MIDI connected without inputs");
                self.settle(Status::Connected, None, Some(NO_INPUTS_MESSAGE))
            }
        }
    }

    /// Detaches from the controller and returns to the disconnected state.
    pub fn disconnect(&self) -> ConnectionState {
        self.teardown();
        *self.shared.handler.lock() = None;
        self.settle(Status::Disconnected, None, None)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().snapshot()
    }

    pub fn status(&self) -> Status {
        self.shared.state.lock().status
    }

    /// The decoded message log, newest first.
    pub fn log(&self) -> Vec<DecodedMessage> {
        self.shared.state.lock().log.to_vec()
    }

    /// Drops the current session and returns the new generation.
    fn teardown(&self) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let session = std::mem::take(&mut *self.shared.session.lock());
        drop(session);
        generation
    }

    /// Sets the state with a fresh log.
    fn settle(
        &self,
        status: Status,
        device_name: Option<String>,
        message: Option<&str>,
    ) -> ConnectionState {
        let mut state = self.shared.state.lock();
        state.set(status, device_name, message);
        state.log.clear();
        state.snapshot()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{mock, MessageKind};

    fn connection(access: &mock::Access) -> Connection {
        Connection::new(Arc::new(access.clone()))
    }

    #[test]
    fn test_connects_to_first_input() {
        let access = mock::Access::new().with_input("pads").with_input("keys");
        let connection = connection(&access);
        assert_eq!(connection.state().status, Status::Disconnected);

        let received = Arc::new(Mutex::new(Vec::new()));
        let state = {
            let received = received.clone();
            connection.connect(move |msg| received.lock().push(msg.kind))
        };
        assert_eq!(state.status, Status::Connected);
        assert_eq!(state.device_name.as_deref(), Some("pads"));
        assert_eq!(state.message, None);

        access.send(&[0x90, 60, 100]);
        access.send(&[0xA0, 1, 1]);
        access.send(&[0x90, 60]);
        access.send(&[0x80, 60, 0]);

        assert_eq!(
            *received.lock(),
            vec![
                MessageKind::NoteOn {
                    note: 60,
                    velocity: 100
                },
                MessageKind::NoteOff {
                    note: 60,
                    velocity: 0
                },
            ]
        );
        let log = connection.log();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0].kind, MessageKind::NoteOff { .. }));
    }

    #[test]
    fn test_no_inputs_is_connected_with_advice() {
        let access = mock::Access::new();
        let state = connection(&access).connect(|_| {});
        assert_eq!(state.status, Status::Connected);
        assert_eq!(state.device_name, None);
        assert_eq!(state.message.as_deref(), Some(NO_INPUTS_MESSAGE));
    }

    #[test]
    fn test_insecure_context_is_blocked() {
        let access = mock::Access::new().insecure().with_input("pads");
        let state = connection(&access).connect(|_| {});
        assert_eq!(state.status, Status::PermissionBlocked);
        assert!(state.message.is_some());
        assert_eq!(access.listener_count(), 0);
    }

    #[test]
    fn test_unsupported() {
        let access = mock::Access::new().unsupported();
        let state = connection(&access).connect(|_| {});
        assert_eq!(state.status, Status::Unsupported);
        assert_eq!(state.message, None);
    }

    #[test]
    fn test_access_failures() {
        let state = connection(&mock::Access::new().failing(AccessError::Security)).connect(|_| {});
        assert_eq!(state.status, Status::PermissionBlocked);
        assert_eq!(state.message.as_deref(), Some(BLOCKED_MESSAGE));

        let state = connection(&mock::Access::new().failing(AccessError::Other(Some(
            "device busy".to_string(),
        ))))
        .connect(|_| {});
        assert_eq!(state.status, Status::Error);
        assert_eq!(state.message.as_deref(), Some("device busy"));

        let state =
            connection(&mock::Access::new().failing(AccessError::Other(None))).connect(|_| {});
        assert_eq!(state.status, Status::Error);
        assert_eq!(state.message.as_deref(), Some(FALLBACK_MESSAGE));
    }

    #[test]
    fn test_device_loss_and_reconnect() {
        let access = mock::Access::new().with_input("pads");
        let connection = connection(&access);
        let count = Arc::new(Mutex::new(0));
        {
            let count = count.clone();
            connection.connect(move |_| *count.lock() += 1);
        }

        access.unplug("pads");
        let state = connection.state();
        assert_eq!(state.status, Status::Error);
        assert_eq!(state.device_name, None);
        assert_eq!(state.message.as_deref(), Some(DISCONNECTED_MESSAGE));
        assert_eq!(access.listener_count(), 0);

        access.plug("pads");
        let state = connection.state();
        assert_eq!(state.status, Status::Connected);
        assert_eq!(state.device_name.as_deref(), Some("pads"));

        access.send(&[0xB0, 64, 127]);
        assert_eq!(*count.lock(), 1);
        assert_eq!(access.listener_count(), 1);
    }

    #[test]
    fn test_reconnect_replaces_session() {
        let access = mock::Access::new().with_input("pads");
        let connection = connection(&access);
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        {
            let first = first.clone();
            connection.connect(move |_| *first.lock() += 1);
        }
        access.send(&[0x90, 36, 90]);
        {
            let second = second.clone();
            let state = connection.connect(move |_| *second.lock() += 1);
            assert!(state.log.is_empty());
        }
        access.send(&[0x90, 36, 90]);

        assert_eq!(*first.lock(), 1);
        assert_eq!(*second.lock(), 1);
        assert_eq!(access.listener_count(), 1);
        assert_eq!(access.watcher_count(), 1);
    }

    #[test]
    fn test_disconnect() {
        let access = mock::Access::new().with_input("pads");
        let connection = connection(&access);
        connection.connect(|_| {});
        let state = connection.disconnect();
        assert_eq!(state.status, Status::Disconnected);
        assert_eq!(access.listener_count(), 0);
        assert_eq!(access.watcher_count(), 0);

        access.send(&[0x90, 60, 100]);
        assert!(connection.log().is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::PermissionBlocked.to_string(), "permission-blocked");
        assert_eq!(Status::Disconnected.to_string(), "disconnected");
    }
}
