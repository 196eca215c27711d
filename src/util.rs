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

use std::path::Path;
use std::time::Duration;

use crate::transport::BEATS_PER_BAR;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let secs = duration.as_secs() - minutes * 60;
    format!("{}:{:02}", minutes, secs)
}

/// Outputs a 0-based fractional bar position as a 1-based bar.beat string.
pub fn bar_beat_display(bar: f64) -> String {
    let bar = bar.max(0.0);
    let whole = bar.floor();
    let beat = ((bar - whole) * BEATS_PER_BAR).floor();
    format!("{}.{}", whole as u64 + 1, beat as u64 + 1)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::util::{bar_beat_display, duration_minutes_seconds, filename_display};

    #[test]
    fn test_duration_minutes_strings() {
        assert_eq!("0:00", duration_minutes_seconds(Duration::new(0, 0)));
        assert_eq!("0:05", duration_minutes_seconds(Duration::new(5, 0)));
        assert_eq!("1:00", duration_minutes_seconds(Duration::new(60, 0)));
        assert_eq!("2:05", duration_minutes_seconds(Duration::new(125, 0)));
    }

    #[test]
    fn test_bar_beat_strings() {
        assert_eq!("1.1", bar_beat_display(0.0));
        assert_eq!("1.2", bar_beat_display(0.25));
        assert_eq!("3.4", bar_beat_display(2.99));
        assert_eq!("1.1", bar_beat_display(-1.0));
    }

    #[test]
    fn test_filename_display() {
        assert_eq!("kick.wav", filename_display(&PathBuf::from("/samples/kick.wav")));
        assert_eq!("unreadable file name", filename_display(&PathBuf::from("/")));
    }
}
