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

//! A looping sampled-piano MIDI player.
//!
//! A [player::Player] loads a MIDI track through a [fetch::Fetcher], decodes it with
//! [midi::decode], builds one sampled piano voice per MIDI track and loops the piece against a
//! shared [transport::Transport] clock.

pub mod audio;
pub mod config;
pub mod controller;
pub mod fetch;
pub mod midi;
pub mod player;
pub mod playlist;
pub mod playsync;
pub mod samples;
pub mod scheduler;
pub mod transport;
pub mod util;

#[cfg(test)]
pub mod testutil;
