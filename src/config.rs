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

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::audio;
use crate::fetch::FileFetcher;
use crate::transport::Transport;

mod error;
mod player;
mod samples;

pub use error::ConfigError;
pub use player::{Player, DEFAULT_FRAME_INTERVAL, DEFAULT_VOLUME};
pub use samples::{SampleBank, SampleFile, PIANO_SAMPLES};

/// Initializes the player and its playlist from the given config file.
pub fn init_player(
    player_path: &Path,
) -> Result<(crate::player::Player, crate::playlist::Playlist), Box<dyn Error>> {
    let player_config = Player::load(player_path)?;
    let output = audio::get_output(player_config.audio_device())?;
    let base_path = player_config.base_path();
    info!(
        output = %output,
        base_path = %base_path.display(),
        tracks = player_config.tracks().len(),
        "Initializing player."
    );

    let player = crate::player::Player::new(
        Arc::new(Transport::new()),
        output,
        Arc::new(FileFetcher::new(base_path)),
        player_config.samples(),
        player_config.options()?,
    );
    let playlist = crate::playlist::Playlist::new(player_config.tracks().to_vec())?;
    Ok((player, playlist))
}
