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

//! The records the engine reads and the store persists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::transport::DEFAULT_BPM;

/// Gain for new tracks and pads.
pub const DEFAULT_GAIN: f32 = 0.8;

/// The first note of the key range when a profile does not say otherwise (C3).
pub const DEFAULT_KEY_RANGE_START: u8 = 48;

/// Number of pads in the default kit.
pub const DEFAULT_PAD_COUNT: u8 = 8;

/// Note of the first pad in the default kit.
pub const DEFAULT_FIRST_PAD_NOTE: u8 = 36;

/// A lane in the arrangement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub name: String,
    pub volume: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

impl Track {
    pub fn new(id: &str, name: &str) -> Track {
        Track {
            id: id.to_string(),
            name: name.to_string(),
            volume: DEFAULT_GAIN,
            mute: None,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.mute.unwrap_or(false)
    }

    /// The gain the engine should apply for this track.
    pub fn effective_volume(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            self.volume
        }
    }
}

/// A trigger pad's mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PadConfig {
    pub id: String,
    pub note: u8,
    pub gain: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choke_group: Option<u32>,
}

impl PadConfig {
    pub fn new(id: &str, note: u8) -> PadConfig {
        PadConfig {
            id: id.to_string(),
            note,
            gain: DEFAULT_GAIN,
            sample_name: None,
            choke_group: None,
        }
    }

    /// Eight pads, `pad-1` to `pad-8`, on notes 36 to 43.
    pub fn default_kit() -> Vec<PadConfig> {
        (0..DEFAULT_PAD_COUNT)
            .map(|i| PadConfig::new(&format!("pad-{}", i + 1), DEFAULT_FIRST_PAD_NOTE + i))
            .collect()
    }
}

/// A recorded note. `time` is seconds from the start of the clip.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiEvent {
    pub note: u8,
    pub velocity: u8,
    pub time: f64,
}

/// A recorded sequence of notes. Clips are never modified once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiClip {
    id: String,
    name: String,
    length_bars: u32,
    events: Vec<MidiEvent>,
}

impl MidiClip {
    /// Creates a clip. The length is at least one bar.
    pub fn new(id: &str, name: &str, length_bars: u32, events: Vec<MidiEvent>) -> MidiClip {
        MidiClip {
            id: id.to_string(),
            name: name.to_string(),
            length_bars: length_bars.max(1),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length_bars(&self) -> u32 {
        self.length_bars
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }
}

/// Plays a clip on a track starting at a 1-based bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipPlacement {
    pub id: String,
    pub clip_id: String,
    pub track_id: String,
    pub start_bar: u32,
    pub length_bars: u32,
}

/// A full arrangement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub bpm: f64,
    pub tracks: Vec<Track>,
    pub clips: Vec<MidiClip>,
    pub placements: Vec<ClipPlacement>,
}

impl Default for Project {
    fn default() -> Self {
        Project {
            bpm: DEFAULT_BPM,
            tracks: vec![
                Track::new("track-1", "Drums"),
                Track::new("track-2", "Instrument"),
            ],
            clips: Vec::new(),
            placements: Vec::new(),
        }
    }
}

impl Project {
    pub fn find_clip(&self, id: &str) -> Option<&MidiClip> {
        self.clips.iter().find(|clip| clip.id == id)
    }

    pub fn find_track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn add_clip(&mut self, clip: MidiClip) {
        self.clips.push(clip);
    }

    /// Places a clip at a 1-based bar. Goes to the first track when no track is given.
    /// The placement length follows the clip, or one bar if the clip is unknown.
    pub fn place_clip(
        &mut self,
        clip_id: &str,
        track_id: Option<&str>,
        start_bar: u32,
    ) -> &ClipPlacement {
        let track_id = match track_id {
            Some(track_id) => track_id.to_string(),
            None => self
                .tracks
                .first()
                .map(|track| track.id.clone())
                .unwrap_or_else(|| "track-1".to_string()),
        };
        let length_bars = self.find_clip(clip_id).map_or(1, |clip| clip.length_bars);
        let n = self.placements.len() + 1;
        self.placements.push(ClipPlacement {
            id: format!("placement-{}", n),
            clip_id: clip_id.to_string(),
            track_id,
            start_bar: start_bar.max(1),
            length_bars,
        });
        &self.placements[n - 1]
    }

    /// Records a track's volume. Returns false if there is no such track.
    pub fn set_track_volume(&mut self, id: &str, volume: f32) -> bool {
        match self.tracks.iter_mut().find(|track| track.id == id) {
            Some(track) => {
                track.volume = volume;
                true
            }
            None => false,
        }
    }

    /// The number of bars until the last placement ends.
    pub fn length_bars(&self) -> u32 {
        self.placements
            .iter()
            .map(|placement| placement.start_bar.saturating_sub(1) + placement.length_bars)
            .max()
            .unwrap_or(0)
    }
}

/// Which function the controller knobs perform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnobPage {
    #[default]
    Mixer,
    Macros,
}

/// A saved controller mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerProfile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub pad_notes: BTreeMap<String, u8>,
    #[serde(rename = "knobCCs", default)]
    pub knob_ccs: BTreeMap<String, u8>,
    #[serde(default)]
    pub knob_page: KnobPage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_range_start: Option<u8>,
}

impl ControllerProfile {
    /// Builds a profile from a pad layout. The id is derived from the name.
    pub fn new(name: &str, device_name: Option<String>, pads: &[PadConfig]) -> ControllerProfile {
        ControllerProfile {
            id: ControllerProfile::id_from_name(name),
            name: name.to_string(),
            device_name,
            pad_notes: pads
                .iter()
                .map(|pad| (pad.id.clone(), pad.note))
                .collect(),
            knob_ccs: BTreeMap::new(),
            knob_page: KnobPage::Mixer,
            key_range_start: Some(DEFAULT_KEY_RANGE_START),
        }
    }

    /// Lower-cases the name and replaces each run of whitespace with a dash.
    pub fn id_from_name(name: &str) -> String {
        let mut id = String::with_capacity(name.len());
        let mut in_space = false;
        for c in name.chars() {
            if c.is_whitespace() {
                if !in_space {
                    id.push('-');
                }
                in_space = true;
            } else {
                id.extend(c.to_lowercase());
                in_space = false;
            }
        }
        id
    }

    pub fn key_range_start(&self) -> u8 {
        self.key_range_start.unwrap_or(DEFAULT_KEY_RANGE_START)
    }

    /// Overrides pad notes by pad id. Pads the profile doesn't mention are unchanged.
    pub fn apply_to(&self, pads: &mut [PadConfig]) {
        for pad in pads.iter_mut() {
            if let Some(note) = self.pad_notes.get(&pad.id) {
                pad.note = *note;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kit() {
        let pads = PadConfig::default_kit();
        assert_eq!(pads.len(), 8);
        assert_eq!(pads[0].id, "pad-1");
        assert_eq!(pads[0].note, 36);
        assert_eq!(pads[7].id, "pad-8");
        assert_eq!(pads[7].note, 43);
        assert!(pads.iter().all(|pad| pad.gain == DEFAULT_GAIN));
    }

    #[test]
    fn test_default_project() {
        let project = Project::default();
        assert_eq!(project.bpm, 100.0);
        assert_eq!(project.tracks.len(), 2);
        assert_eq!(project.tracks[0].name, "Drums");
        assert_eq!(project.tracks[1].name, "Instrument");
        assert_eq!(project.length_bars(), 0);
    }

    #[test]
    fn test_place_clip() {
        let mut project = Project::default();
        project.add_clip(MidiClip::new("clip-1", "Clip 1", 2, Vec::new()));

        let placement = project.place_clip("clip-1", None, 3).clone();
        assert_eq!(placement.id, "placement-1");
        assert_eq!(placement.track_id, "track-1");
        assert_eq!(placement.length_bars, 2);
        assert_eq!(project.length_bars(), 4);

        let placement = project.place_clip("missing", Some("track-2"), 1).clone();
        assert_eq!(placement.id, "placement-2");
        assert_eq!(placement.length_bars, 1);
        assert_eq!(project.length_bars(), 4);
    }

    #[test]
    fn test_set_track_volume() {
        let mut project = Project::default();
        assert!(project.set_track_volume("track-2", 0.25));
        assert!(!project.set_track_volume("track-9", 0.25));
        assert_eq!(project.find_track("track-2").map(|t| t.volume), Some(0.25));
    }

    #[test]
    fn test_mute() {
        let mut track = Track::new("track-1", "Drums");
        assert_eq!(track.effective_volume(), DEFAULT_GAIN);
        track.mute = Some(true);
        assert_eq!(track.effective_volume(), 0.0);
    }

    #[test]
    fn test_project_json_shape() -> Result<(), serde_json::Error> {
        let json = r#"{
            "bpm": 120,
            "tracks": [{"id": "track-1", "name": "Drums", "volume": 0.5, "mute": true}],
            "clips": [{"id": "clip-1", "name": "Clip 1", "lengthBars": 1,
                       "events": [{"note": 36, "velocity": 100, "time": 0.5}]}],
            "placements": [{"id": "placement-1", "clipId": "clip-1", "trackId": "track-1",
                            "startBar": 2, "lengthBars": 1}]
        }"#;
        let project: Project = serde_json::from_str(json)?;
        assert_eq!(project.bpm, 120.0);
        assert!(project.tracks[0].is_muted());
        assert_eq!(project.clips[0].events()[0].time, 0.5);
        assert_eq!(project.placements[0].start_bar, 2);

        let out = serde_json::to_value(&project)?;
        assert_eq!(out["clips"][0]["lengthBars"], 1);
        assert_eq!(out["placements"][0]["clipId"], "clip-1");
        Ok(())
    }

    #[test]
    fn test_profile_id_from_name() {
        assert_eq!(ControllerProfile::id_from_name("MPK mini mk3"), "mpk-mini-mk3");
        assert_eq!(ControllerProfile::id_from_name("My   Pads\tTwo"), "my-pads-two");
        assert_eq!(ControllerProfile::id_from_name("solo"), "solo");
    }

    #[test]
    fn test_profile_json_and_apply() -> Result<(), serde_json::Error> {
        let json = r#"{
            "id": "mpk-mini-mk3",
            "name": "MPK mini mk3",
            "padNotes": {"pad-1": 60, "pad-3": 62},
            "knobCCs": {"k1": 70},
            "knobPage": "macros"
        }"#;
        let profile: ControllerProfile = serde_json::from_str(json)?;
        assert_eq!(profile.knob_page, KnobPage::Macros);
        assert_eq!(profile.knob_ccs.get("k1"), Some(&70));
        assert_eq!(profile.key_range_start(), DEFAULT_KEY_RANGE_START);

        let mut pads = PadConfig::default_kit();
        profile.apply_to(&mut pads);
        assert_eq!(pads[0].note, 60);
        assert_eq!(pads[1].note, 37);
        assert_eq!(pads[2].note, 62);
        Ok(())
    }

    #[test]
    fn test_profile_from_pads() {
        let profile = ControllerProfile::new(
            "MPK mini mk3",
            Some("MPK mini 3".to_string()),
            &PadConfig::default_kit(),
        );
        assert_eq!(profile.id, "mpk-mini-mk3");
        assert_eq!(profile.pad_notes.len(), 8);
        assert_eq!(profile.pad_notes.get("pad-8"), Some(&43));
        assert_eq!(profile.key_range_start, Some(48));
    }
}
