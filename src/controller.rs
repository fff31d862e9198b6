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

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, span, Instrument as _, Level};

use crate::audio::AudioError;
use crate::player::{LoadError, Player, Status};
use crate::playlist::Playlist;
use crate::util::seconds_minutes_seconds;

pub mod keyboard;

/// Controller events that will trigger behavior in the player.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Plays the loaded track, loading the current playlist track first if nothing is loaded.
    Play,

    /// Pauses playback, keeping the position.
    Pause,

    /// Pauses if playing, plays otherwise.
    Toggle,

    /// Stops playback and rewinds to the start.
    Stop,

    /// Loads the next track in the playlist, carrying on playing if the player was playing.
    Next,

    /// Loads the previous track in the playlist, carrying on playing if the player was playing.
    Prev,

    /// Moves to the given position in seconds.
    Seek(f64),

    /// Sets the volume in decibels.
    Volume(f64),

    /// Logs the player status.
    Status,

    /// Releases the player and shuts the controller down.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Controls a player through a playlist.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(
        player: Arc<Player>,
        playlist: Arc<Playlist>,
        driver: Arc<dyn Driver>,
    ) -> Controller {
        let span = span!(Level::INFO, "controller");
        Controller {
            handle: tokio::spawn(
                Controller::trigger_events(player, playlist, driver).instrument(span),
            ),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers player events by watching the driver and getting events from it.
    async fn trigger_events(player: Arc<Player>, playlist: Arc<Playlist>, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        info!(first_track = playlist.current().name, "Controller started.");

        while let Some(event) = events_rx.recv().await {
            info!(event = ?event, "Received event.");
            match Controller::handle_event(&player, &playlist, event).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => error!(err = %e, "Error talking to player."),
            }
        }

        info!("Controller closing.");
        player.dispose();
        drop(events_rx);
        match join_handle.await {
            Ok(Err(e)) => error!(err = %e, "Event monitor failed."),
            Err(e) => error!(err = %e, "Error waiting for event monitor to stop."),
            Ok(Ok(())) => {}
        }
    }

    /// Applies one event to the player. Returns false once the controller should stop.
    async fn handle_event(
        player: &Player,
        playlist: &Playlist,
        event: Event,
    ) -> Result<bool, ControlError> {
        match event {
            Event::Play => {
                if player.status() == Status::Empty {
                    player.load_track(playlist.current()).await?;
                }
                player.play()?;
            }
            Event::Pause => player.pause(),
            Event::Toggle => {
                if player.status() == Status::Empty {
                    player.load_track(playlist.current()).await?;
                }
                player.toggle_playback()?;
            }
            Event::Stop => player.stop(),
            Event::Next => {
                let was_playing = player.state().is_playing;
                let track = playlist.next();
                Controller::switch_track(player, track, was_playing).await?;
            }
            Event::Prev => {
                let was_playing = player.state().is_playing;
                let track = playlist.prev();
                Controller::switch_track(player, track, was_playing).await?;
            }
            Event::Seek(seconds) => player.seek_to(seconds),
            Event::Volume(db) => player.set_volume(db),
            Event::Status => {
                let state = player.state();
                info!(
                    status = %player.status(),
                    track = state.current_track.map(|track| track.to_string()),
                    position = seconds_minutes_seconds(state.current_time),
                    duration = seconds_minutes_seconds(state.duration),
                    volume = state.volume,
                    "Player status."
                );
            }
            Event::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Loads the track unless it's already loaded, then resumes if the player was playing.
    async fn switch_track(
        player: &Player,
        track: crate::playlist::Track,
        was_playing: bool,
    ) -> Result<(), ControlError> {
        if player.state().current_track.as_ref() == Some(&track) {
            return Ok(());
        }

        player.load_track(track).await?;
        if was_playing {
            player.play()?;
        }
        Ok(())
    }
}
