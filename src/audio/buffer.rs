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
use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, span, Level};

use super::AudioError;

/// Decoded audio, held in memory as interleaved f32 samples.
///
/// Cloning is cheap: the sample data is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    data: Arc<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Creates a buffer from interleaved samples.
    pub fn new(data: Vec<f32>, channels: u16, sample_rate: u32) -> SampleBuffer {
        SampleBuffer {
            data: Arc::new(data),
            channels: channels.max(1),
            sample_rate,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    /// The length of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the mono mixdown of the given frame. Out of range frames are silent.
    pub fn mono_frame(&self, frame: usize) -> f32 {
        let channels = self.channels as usize;
        let start = frame * channels;
        match self.data.get(start..start + channels) {
            Some(samples) => samples.iter().sum::<f32>() / channels as f32,
            None => 0.0,
        }
    }

    /// Returns the mono value at a fractional frame position using linear interpolation.
    pub fn mono_at(&self, position: f64) -> f32 {
        if position < 0.0 {
            return 0.0;
        }
        let index = position.floor() as usize;
        let fraction = (position - index as f64) as f32;
        let a = self.mono_frame(index);
        let b = self.mono_frame(index + 1);
        a + (b - a) * fraction
    }
}

/// Decodes an encoded audio file held in memory.
pub fn decode(bytes: &[u8]) -> Result<SampleBuffer, AudioError> {
    let span = span!(Level::DEBUG, "decode sample");
    let _enter = span.enter();

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let probed = symphonia::default::get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioError::NoTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|channels| channels.count() as u16)
        .unwrap_or(0);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut data: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(err = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let mut buffer = DecodeBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        data.extend_from_slice(buffer.samples());
    }

    if data.is_empty() || channels == 0 {
        return Err(AudioError::EmptyStream);
    }

    debug!(
        channels,
        sample_rate,
        samples = data.len(),
        "Decoded sample"
    );
    Ok(SampleBuffer::new(data, channels, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::wav_bytes;

    #[test]
    fn test_decode_wav() -> Result<(), AudioError> {
        let samples: Vec<i16> = (0..4410).map(|i| ((i % 100) * 100) as i16).collect();
        let bytes = wav_bytes(&samples, 1, 44100);

        let buffer = decode(&bytes)?;
        assert_eq!(buffer.channels(), 1);
        assert_eq!(buffer.sample_rate(), 44100);
        assert_eq!(buffer.frames(), 4410);
        assert!((buffer.duration() - 0.1).abs() < 1e-9);
        assert!((buffer.mono_frame(1) - 100.0 / 32768.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_decode_stereo_mixes_down() -> Result<(), AudioError> {
        // Left at half scale, right silent.
        let samples: Vec<i16> = (0..200)
            .map(|i| if i % 2 == 0 { 16384 } else { 0 })
            .collect();
        let bytes = wav_bytes(&samples, 2, 22050);

        let buffer = decode(&bytes)?;
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frames(), 100);
        assert!((buffer.mono_frame(10) - 0.25).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"definitely not audio").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_interpolation() {
        let buffer = SampleBuffer::new(vec![0.0, 1.0, 0.0], 1, 10);
        assert_eq!(buffer.mono_at(0.0), 0.0);
        assert!((buffer.mono_at(0.5) - 0.5).abs() < 1e-6);
        assert_eq!(buffer.mono_at(1.0), 1.0);
        assert!((buffer.mono_at(1.25) - 0.75).abs() < 1e-6);
        assert_eq!(buffer.mono_at(5.0), 0.0);
        assert_eq!(buffer.mono_at(-1.0), 0.0);
        assert!((buffer.duration() - 0.3).abs() < 1e-9);
    }
}
