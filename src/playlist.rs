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

use core::fmt;

use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, span, Level, Span};

/// A loadable MIDI resource.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Track {
    /// The display name.
    pub name: String,
    /// A filesystem path or file:// URI.
    pub path: String,
    pub artist: Option<String>,
}

impl Track {
    pub fn new(name: &str, path: &str) -> Track {
        Track {
            name: name.to_string(),
            path: path.to_string(),
            artist: None,
        }
    }

    pub fn with_artist(mut self, artist: &str) -> Track {
        self.artist = Some(artist.to_string());
        self
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.artist {
            Some(artist) => write!(f, "{} by {}", self.name, artist),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("the playlist has no tracks")]
    Empty,
    #[error("no track named {0} in the playlist")]
    NotFound(String),
}

/// Playlist walks the track catalog for the controller.
pub struct Playlist {
    /// The tracks that this playlist will play.
    tracks: Vec<Track>,
    /// The current position of the playlist.
    position: RwLock<usize>,
    /// The logging span.
    span: Span,
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Playlist ({} tracks):", self.tracks.len())?;
        for track in self.tracks.iter() {
            writeln!(f, "  - {} ({})", track, track.path)?;
        }

        Ok(())
    }
}

impl Playlist {
    /// Creates a new playlist. A playlist always has at least one track.
    pub fn new(tracks: Vec<Track>) -> Result<Playlist, PlaylistError> {
        if tracks.is_empty() {
            return Err(PlaylistError::Empty);
        }

        Ok(Playlist {
            tracks,
            position: RwLock::new(0),
            span: span!(Level::INFO, "playlist"),
        })
    }

    /// Move to the next element of the playlist. If we're at the end of the playlist, the position
    /// will not increment. The track at the current position will be returned.
    pub fn next(&self) -> Track {
        let _enter = self.span.enter();

        let mut position = self.position.write();
        if *position < self.tracks.len() - 1 {
            *position += 1;
        }

        let current = &self.tracks[*position];
        info!(
            position = *position,
            track = current.name,
            "Moving to next playlist position."
        );
        current.clone()
    }

    /// Move to the previous element of the playlist. If we're at the beginning of the playlist, the
    /// position will not decrement. The track at the current position will be returned.
    pub fn prev(&self) -> Track {
        let _enter = self.span.enter();

        let mut position = self.position.write();
        if *position > 0 {
            *position -= 1;
        }

        let current = &self.tracks[*position];
        info!(
            position = *position,
            track = current.name,
            "Moving to previous playlist position."
        );
        current.clone()
    }

    /// Moves to the track with the given name and returns it.
    pub fn select(&self, name: &str) -> Result<Track, PlaylistError> {
        let _enter = self.span.enter();

        let index = self
            .tracks
            .iter()
            .position(|track| track.name == name)
            .ok_or_else(|| PlaylistError::NotFound(name.to_string()))?;
        *self.position.write() = index;
        info!(position = index, track = name, "Selected track.");
        Ok(self.tracks[index].clone())
    }

    /// Return the track at the current position of the playlist.
    pub fn current(&self) -> Track {
        self.tracks[*self.position.read()].clone()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
