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
use std::{error::Error, thread, time::Duration};

use crossbeam_channel::{select, tick};
use midir::{MidiInput, MidiInputPort};
use tracing::{debug, info, span, warn, Level};

use super::{AccessError, Attachment, DeviceChangeCallback, InputInfo, MessageCallback};

/// How often the input list is checked for changes.
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

const CLIENT_NAME: &str = "padloop";

fn client(purpose: &str) -> Result<MidiInput, AccessError> {
    MidiInput::new(&format!("{} {}", CLIENT_NAME, purpose))
        .map_err(|e| AccessError::Other(Some(e.to_string())))
}

/// Lists the input ports with their names, keeping those whose names contain the filter.
fn ports(input: &MidiInput, filter: Option<&str>) -> Vec<(MidiInputPort, InputInfo)> {
    input
        .ports()
        .into_iter()
        .filter_map(|port| {
            let name = input.port_name(&port).ok()?;
            if filter.is_some_and(|filter| !name.contains(filter)) {
                return None;
            }
            Some((port, InputInfo { name }))
        })
        .collect()
}

/// Lists every input port.
pub fn list() -> Result<Vec<InputInfo>, Box<dyn Error>> {
    let input = client("input listing")?;
    let mut inputs: Vec<InputInfo> = ports(&input, None)
        .into_iter()
        .map(|(_, info)| info)
        .collect();
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(inputs)
}

/// Native controller access. There is no browser-style security context here, so
/// the context is always secure and support depends on whether a client can be made.
pub struct Access {
    filter: Option<String>,
}

impl Access {
    /// Creates access limited to inputs whose names contain the filter.
    pub fn new(filter: Option<&str>) -> Access {
        Access {
            filter: filter.map(str::to_string),
        }
    }
}

impl super::Access for Access {
    fn is_secure_context(&self) -> bool {
        true
    }

    fn is_supported(&self) -> bool {
        client("probe").is_ok()
    }

    fn request_access(&self) -> Result<Box<dyn super::Ports>, AccessError> {
        // Fail here rather than on first use if the platform backend is broken.
        client("access")?;
        Ok(Box::new(Ports {
            filter: self.filter.clone(),
        }))
    }
}

struct Ports {
    filter: Option<String>,
}

impl super::Ports for Ports {
    fn inputs(&self) -> Vec<InputInfo> {
        match client("input listing") {
            Ok(input) => ports(&input, self.filter.as_deref())
                .into_iter()
                .map(|(_, info)| info)
                .collect(),
            Err(e) => {
                warn!(err = %e, "Unable to list MIDI inputs");
                Vec::new()
            }
        }
    }

    fn connect(
        &self,
        input: &InputInfo,
        mut callback: MessageCallback,
    ) -> Result<Attachment, AccessError> {
        let span = span!(Level::INFO, "connect input (midir)");
        let _enter = span.enter();

        let client = client("input")?;
        let port = ports(&client, self.filter.as_deref())
            .into_iter()
            .find(|(_, info)| info.name == input.name)
            .map(|(port, _)| port)
            .ok_or_else(|| AccessError::Other(Some(format!("no input named {}", input.name))))?;

        let connection = client
            .connect(
                &port,
                "padloop input watcher",
                move |_, raw, _| callback(raw),
                (),
            )
            .map_err(|e| AccessError::Other(Some(e.to_string())))?;

        info!(input = input.name, "Listening to MIDI input.");
        Ok(Attachment::new(connection))
    }

    fn watch(&self, mut callback: DeviceChangeCallback) -> Result<Attachment, AccessError> {
        let filter = self.filter.clone();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        thread::Builder::new()
            .name("padloop-midi-watch".to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "watch inputs (midir)");
                let _enter = span.enter();

                let client = match client("device watcher") {
                    Ok(client) => client,
                    Err(e) => {
                        warn!(err = %e, "Unable to watch MIDI inputs");
                        return;
                    }
                };
                let snapshot = |client: &MidiInput| -> Vec<InputInfo> {
                    ports(client, filter.as_deref())
                        .into_iter()
                        .map(|(_, info)| info)
                        .collect()
                };

                let mut last = snapshot(&client);
                let ticker = tick(WATCH_INTERVAL);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let current = snapshot(&client);
                            if current != last {
                                debug!(inputs = current.len(), "MIDI inputs changed");
                                callback(&current);
                                last = current;
                            }
                        },
                        recv(stop_rx) -> _ => break,
                    }
                }
                debug!("Stopped watching MIDI inputs");
            })
            .map_err(|e| AccessError::Other(Some(e.to_string())))?;

        Ok(Attachment::new(stop_tx))
    }
}
