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
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// How many decoded messages the log keeps.
pub const LOG_CAPACITY: usize = 50;

const NOTE_OFF: u8 = 0x8;
const NOTE_ON: u8 = 0x9;
const CONTROL_CHANGE: u8 = 0xB;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    ControlChange { control: u8, value: u8 },
}

/// A controller message that carries a musical event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodedMessage {
    pub kind: MessageKind,
    /// 0-15.
    pub channel: u8,
    pub received_at: Instant,
}

impl fmt::Display for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::NoteOn { note, velocity } => write!(
                f,
                "noteon  ch={:<2} note={:<3} velocity={}",
                self.channel, note, velocity
            ),
            MessageKind::NoteOff { note, velocity } => write!(
                f,
                "noteoff ch={:<2} note={:<3} velocity={}",
                self.channel, note, velocity
            ),
            MessageKind::ControlChange { control, value } => write!(
                f,
                "cc      ch={:<2} control={:<3} value={}",
                self.channel, control, value
            ),
        }
    }
}

/// Decodes a raw message. Commands other than note on, note off and control change
/// produce nothing. A note on with zero velocity is a note off.
pub fn decode(status: u8, data1: u8, data2: u8, received_at: Instant) -> Option<DecodedMessage> {
    let command = status >> 4;
    let channel = status & 0xF;
    let kind = match command {
        NOTE_ON if data2 > 0 => MessageKind::NoteOn {
            note: data1,
            velocity: data2,
        },
        NOTE_OFF | NOTE_ON => MessageKind::NoteOff {
            note: data1,
            velocity: data2,
        },
        CONTROL_CHANGE => MessageKind::ControlChange {
            control: data1,
            value: data2,
        },
        _ => return None,
    };
    Some(DecodedMessage {
        kind,
        channel,
        received_at,
    })
}

/// Decodes the first three bytes of a raw message. Shorter messages produce nothing.
pub fn decode_raw(raw: &[u8], received_at: Instant) -> Option<DecodedMessage> {
    match raw {
        [status, data1, data2, ..] => decode(*status, *data1, *data2, received_at),
        _ => None,
    }
}

/// The most recent decoded messages, newest first.
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    entries: VecDeque<DecodedMessage>,
}

impl MessageLog {
    pub fn new() -> MessageLog {
        MessageLog {
            entries: VecDeque::with_capacity(LOG_CAPACITY),
        }
    }

    /// Adds a message at the front, evicting the oldest beyond capacity.
    pub fn push(&mut self, message: DecodedMessage) {
        self.entries.push_front(message);
        self.entries.truncate(LOG_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecodedMessage> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<DecodedMessage> {
        self.entries.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let now = Instant::now();

        let msg = decode(0x90, 60, 100, now).unwrap();
        assert_eq!(
            msg.kind,
            MessageKind::NoteOn {
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(msg.channel, 0);
        assert_eq!(msg.received_at, now);

        assert_eq!(
            decode(0x90, 60, 0, now).map(|m| m.kind),
            Some(MessageKind::NoteOff {
                note: 60,
                velocity: 0
            })
        );
        assert_eq!(
            decode(0x80, 60, 64, now).map(|m| m.kind),
            Some(MessageKind::NoteOff {
                note: 60,
                velocity: 64
            })
        );
        assert_eq!(
            decode(0xB0, 7, 127, now).map(|m| m.kind),
            Some(MessageKind::ControlChange {
                control: 7,
                value: 127
            })
        );
        assert!(decode(0xA0, 1, 1, now).is_none());
        assert!(decode(0xC0, 1, 1, now).is_none());
        assert!(decode(0xF8, 0, 0, now).is_none());
    }

    #[test]
    fn test_decode_channel() {
        let now = Instant::now();
        assert_eq!(decode(0x99, 36, 90, now).map(|m| m.channel), Some(9));
        assert_eq!(decode(0xBF, 1, 2, now).map(|m| m.channel), Some(15));
    }

    #[test]
    fn test_decode_raw() {
        let now = Instant::now();
        assert!(decode_raw(&[0x90, 60], now).is_none());
        assert!(decode_raw(&[], now).is_none());
        assert_eq!(
            decode_raw(&[0x91, 62, 10, 0xFF], now).map(|m| (m.kind, m.channel)),
            Some((
                MessageKind::NoteOn {
                    note: 62,
                    velocity: 10
                },
                1
            ))
        );
    }

    #[test]
    fn test_log_cap() {
        let now = Instant::now();
        let mut log = MessageLog::new();
        for i in 0..60u8 {
            log.push(decode(0xB0, i, 0, now).unwrap());
        }

        assert_eq!(log.len(), 50);
        let controls: Vec<u8> = log
            .iter()
            .map(|m| match m.kind {
                MessageKind::ControlChange { control, .. } => control,
                _ => panic!("unexpected message"),
            })
            .collect();
        let expected: Vec<u8> = (10..60u8).rev().collect();
        assert_eq!(controls, expected);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_display() {
        let msg = decode(0x90, 60, 100, Instant::now()).unwrap();
        assert_eq!(msg.to_string(), "noteon  ch=0  note=60  velocity=100");
    }
}
