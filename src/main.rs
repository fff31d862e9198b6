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
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use pianola::{audio, config, controller, midi, util};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A looping sampled-piano MIDI player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the tracks in the given player config.
    Tracks {
        /// The path to the player config.
        player_path: String,
    },
    /// Decodes a MIDI file and prints what the player would play.
    Inspect {
        /// The path to the MIDI file.
        path: String,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a track and takes commands from the keyboard.
    Play {
        /// The path to the player config.
        player_path: String,
        /// The name of the track to start with. Defaults to the first track.
        track: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tracks { player_path } => {
            let player_config = config::Player::load(&PathBuf::from(&player_path))?;
            let tracks = player_config.tracks();

            if tracks.is_empty() {
                println!("No tracks found in {}.", player_path);
                return Ok(());
            }

            println!("Tracks (count: {}):", tracks.len());
            for track in tracks {
                println!("- {} ({})", track, track.path);
            }
        }
        Commands::Inspect { path } => {
            let path = PathBuf::from(path);
            let bytes = tokio::fs::read(&path).await?;
            let decoded = midi::decode(&bytes)?;

            println!(
                "{} (duration: {}, notes: {}):",
                util::filename_display(&path),
                util::seconds_minutes_seconds(decoded.duration),
                decoded.note_count()
            );
            for (index, track) in decoded.tracks.iter().enumerate() {
                let first = track.notes.first().map(|note| note.pitch.as_str());
                println!(
                    "- Track {}: {} (notes: {}, first: {})",
                    index,
                    track.name.as_deref().unwrap_or("unnamed"),
                    track.notes.len(),
                    first.unwrap_or("none"),
                );
            }
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play { player_path, track } => {
            let (player, playlist) = config::init_player(&PathBuf::from(player_path))?;
            let player = Arc::new(player);
            let playlist = Arc::new(playlist);

            let track = match track {
                Some(name) => playlist.select(&name)?,
                None => playlist.current(),
            };
            player.load_track(track).await?;
            player.play()?;

            let mut controller = controller::Controller::new(
                player,
                playlist,
                Arc::new(controller::keyboard::Driver::new()),
            );
            controller.join().await?;
        }
    }

    Ok(())
}
