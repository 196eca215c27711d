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
use std::{error::Error, fmt, sync::Arc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use tracing::{error, info, span, Level};

use super::graph::GainNode;
use super::mixer::{RenderClock, Renderer};
use super::thread_priority::CallbackPriority;
use super::voice::Voice;
use super::{AudioError, Backend as AudioBackend, DeviceInfo};
use crate::clock::Clock;

/// An output device driven by a renderer running in the cpal stream callback.
pub struct Backend {
    /// The name of the device.
    name: String,
    /// The host the device belongs to.
    host_id: cpal::HostId,
    channels: u16,
    sample_rate: u32,
    clock: Arc<RenderClock>,
    output: Arc<GainNode>,
    voices: Sender<Voice>,
    /// Dropping this closes the stream.
    _shutdown: Sender<()>,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={}) ({})",
            self.name,
            self.channels,
            self.sample_rate,
            self.host_id.name()
        )
    }
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok().map(|name| name.trim().to_string())
}

impl Backend {
    /// Lists output devices across all hosts.
    pub fn list() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(config) = device.default_output_config() else {
                    continue;
                };
                let Some(name) = device_name(&device) else {
                    continue;
                };
                devices.push(DeviceInfo {
                    name,
                    host: host_id.name().to_string(),
                    channels: config.channels(),
                    sample_rate: config.sample_rate(),
                });
            }
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Opens the named output device, or the default device if the name is empty or
    /// "default", and starts its stream.
    pub fn get(name: &str, sample_rate: Option<u32>) -> Result<Backend, AudioError> {
        let (host_id, device) = find_device(name)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.into();
        if let Some(sample_rate) = sample_rate {
            config.sample_rate = sample_rate;
        }
        let channels = config.channels;
        let rate = config.sample_rate;
        let name = device_name(&device).unwrap_or_else(|| name.to_string());

        let (renderer, voices) = Renderer::new(rate, channels);
        let clock = renderer.clock();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let thread_name = name.clone();

        // The stream is not Send on every platform, so it lives on its own thread
        // until the backend is dropped.
        thread::Builder::new()
            .name("padloop-output".to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "output stream", device = thread_name);
                let _enter = span.enter();

                let stream = match build_stream(&device, &config, sample_format, renderer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                info!("Output stream started");
                let _ = ready_tx.send(Ok(()));

                // Returns once the shutdown sender is dropped.
                let _ = shutdown_rx.recv();
                info!("Output stream closed");
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AudioError::Device(e)),
            Err(_) => {
                return Err(AudioError::Device(
                    "output thread exited before the stream started".to_string(),
                ))
            }
        }

        Ok(Backend {
            name,
            host_id,
            channels,
            sample_rate: rate,
            clock,
            output: GainNode::new(1.0, None),
            voices,
            _shutdown: shutdown_tx,
        })
    }
}

fn find_device(name: &str) -> Result<(cpal::HostId, cpal::Device), AudioError> {
    if name.is_empty() || name == "default" {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("no default output device".to_string()))?;
        return Ok((host.id(), device));
    }

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(devices) = host.output_devices() else {
            continue;
        };
        for device in devices {
            if device_name(&device).as_deref() == Some(name) {
                return Ok((host_id, device));
            }
        }
    }
    Err(AudioError::Device(format!("no device found with name {}", name)))
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    renderer: Renderer,
) -> Result<cpal::Stream, Box<dyn Error>> {
    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_typed_stream::<f32>(device, config, renderer)?,
        cpal::SampleFormat::I16 => build_typed_stream::<i16>(device, config, renderer)?,
        cpal::SampleFormat::I32 => build_typed_stream::<i32>(device, config, renderer)?,
        cpal::SampleFormat::U16 => build_typed_stream::<u16>(device, config, renderer)?,
        other => return Err(format!("unsupported sample format {:?}", other).into()),
    };
    Ok(stream)
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut priority = CallbackPriority::from_env();
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            priority.apply();
            if scratch.len() != data.len() {
                scratch.resize(data.len(), 0.0);
            }
            renderer.render(&mut scratch);
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src.clamp(-1.0, 1.0));
            }
        },
        |err| error!(err = %err, "Output stream error"),
        None,
    )
}

impl AudioBackend for Backend {
    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn output(&self) -> Arc<GainNode> {
        self.output.clone()
    }

    fn schedule(&self, voice: Voice) {
        if self.voices.send(voice).is_err() {
            error!(device = self.name, "Output renderer is gone, dropping voice");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
