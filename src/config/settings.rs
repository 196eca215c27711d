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
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, File, FileFormat};
use duration_string::DurationString;
use serde::Deserialize;

use super::{error::ConfigError, pad::Pad};
use crate::project::{PadConfig, Project};
use crate::transport::{clamp_bpm, DEFAULT_BPM, DEFAULT_LOOKAHEAD};

const DEFAULT_AUDIO_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_STORE: &str = "./padloop-data";
const DEFAULT_CLIP_LENGTH_BARS: u32 = 1;
const DEFAULT_RECORD_CONTROL: u8 = 64;

/// A YAML representation of the padloop settings.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Settings {
    /// The audio output device. Names starting with `mock` render offline.
    audio_device: Option<String>,

    /// Output sample rate in Hz (default: 44100).
    sample_rate: Option<u32>,

    /// Part of the controller input's name. The first input is used when unset.
    midi_device: Option<String>,

    /// Tempo (default: 100, clamped to 40-200).
    bpm: Option<f64>,

    /// How often the transport checks for bar changes (default: 100ms).
    lookahead: Option<String>,

    /// Where projects, profiles and samples are kept (default: ./padloop-data).
    store: Option<PathBuf>,

    /// The pads. Defaults to eight pads on notes 36-43.
    pads: Option<Vec<Pad>>,

    /// Snap recorded hits to sixteenth notes (default: true).
    quantize: Option<bool>,

    /// Length of recorded clips (default: 1).
    clip_length_bars: Option<u32>,

    /// The control change that toggles recording (default: 64).
    record_control: Option<u8>,

    /// A stored controller profile whose pad notes override the configured ones.
    profile: Option<String>,
}

impl Settings {
    /// Parse settings from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Settings, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Settings>()?)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Settings, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Settings>()?)
    }

    pub fn audio_device(&self) -> &str {
        self.audio_device.as_deref().unwrap_or(DEFAULT_AUDIO_DEVICE)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    pub fn bpm(&self) -> f64 {
        clamp_bpm(self.bpm.unwrap_or(DEFAULT_BPM))
    }

    /// An empty project at the configured tempo.
    pub fn new_project(&self) -> Project {
        Project {
            bpm: self.bpm(),
            ..Project::default()
        }
    }

    pub fn lookahead(&self) -> Result<Duration, ConfigError> {
        match &self.lookahead {
            Some(lookahead) => Ok(DurationString::from_string(lookahead.clone())
                .map_err(|e| ConfigError::InvalidDuration {
                    field: "lookahead",
                    value: lookahead.clone(),
                    reason: e.to_string(),
                })?
                .into()),
            None => Ok(DEFAULT_LOOKAHEAD),
        }
    }

    pub fn store(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE))
    }

    pub fn pads(&self) -> Vec<PadConfig> {
        match &self.pads {
            Some(pads) => pads.iter().map(Pad::to_pad_config).collect(),
            None => PadConfig::default_kit(),
        }
    }

    /// Pairs of pad id and stored sample id for pads that name a sample.
    pub fn pad_samples(&self) -> Vec<(String, String)> {
        self.pads
            .iter()
            .flatten()
            .filter_map(|pad| Some((pad.id().to_string(), pad.sample()?.to_string())))
            .collect()
    }

    pub fn quantize(&self) -> bool {
        self.quantize.unwrap_or(true)
    }

    pub fn clip_length_bars(&self) -> u32 {
        self.clip_length_bars
            .unwrap_or(DEFAULT_CLIP_LENGTH_BARS)
            .max(1)
    }

    pub fn record_control(&self) -> u8 {
        self.record_control.unwrap_or(DEFAULT_RECORD_CONTROL)
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }
}
