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

//! Sampled instrument voices.
//!
//! This module provides:
//! - Sample fetching, decoding and caching (in-memory for zero-latency playback)
//! - Sounding notes with a release envelope, mixed by the audio output
//! - The instrument pool built for each loaded piece, one voice per MIDI track

mod instrument;
mod loader;
mod voice;

pub use instrument::{Instrument, InstrumentPool, UnsupportedPitch};
pub use loader::{LoadedSample, SampleError, SampleLoader, SampleSet};
pub use voice::{Voice, Volume, RELEASE_SECONDS};
