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

/// Same as [duration_minutes_seconds], for clock positions held as seconds. Negative and
/// non-finite positions render as 0:00, positions too large for a [Duration] saturate.
pub fn seconds_minutes_seconds(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return duration_minutes_seconds(Duration::ZERO);
    }
    duration_minutes_seconds(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}

/// Converts a level in decibels to a linear amplitude multiplier.
pub fn db_to_gain(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

#[cfg(test)]
mod test {
    use std::{path::Path, time::Duration};

    use crate::util::{
        db_to_gain, duration_minutes_seconds, filename_display, seconds_minutes_seconds,
    };

    #[test]
    fn test_duration_minutes_strings() {
        assert_eq!("0:00", duration_minutes_seconds(Duration::new(0, 0)));
        assert_eq!("0:05", duration_minutes_seconds(Duration::new(5, 0)));
        assert_eq!("1:00", duration_minutes_seconds(Duration::new(60, 0)));
        assert_eq!("60:06", duration_minutes_seconds(Duration::new(3606, 0)));
    }

    #[test]
    fn test_seconds_minutes_strings() {
        assert_eq!("0:00", seconds_minutes_seconds(-3.0));
        assert_eq!("0:00", seconds_minutes_seconds(f64::NAN));
        assert_eq!("0:03", seconds_minutes_seconds(3.5));
        assert_eq!("2:05", seconds_minutes_seconds(125.9));

        let saturated = duration_minutes_seconds(Duration::MAX);
        assert_eq!(saturated, seconds_minutes_seconds(1e30));
        assert_eq!(saturated, seconds_minutes_seconds(u64::MAX as f64));
    }

    #[test]
    fn test_db_to_gain() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-20.0) - 0.1).abs() < 1e-6);
        assert!((db_to_gain(-10.0) - 0.316_227_77).abs() < 1e-6);
        assert!(db_to_gain(-120.0) < 1e-5);
    }

    #[test]
    fn test_filename_display() {
        assert_eq!("Shining.mid", filename_display(Path::new("/music/Shining.mid")));
        assert_eq!("unreadable file name", filename_display(Path::new("/")));
    }
}
