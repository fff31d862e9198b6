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

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, span, Instrument as _, Level, Span};

use crate::{
    audio::{AudioError, Output},
    config::{SampleBank, DEFAULT_FRAME_INTERVAL, DEFAULT_VOLUME},
    fetch::{FetchError, Fetcher},
    midi::{self, DecodeError},
    playlist::Track,
    playsync::CancelHandle,
    samples::{InstrumentPool, SampleError},
    scheduler::Scheduler,
    transport::{Transport, TransportState},
};

/// Runtime settings for a player.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerOptions {
    /// Initial volume in decibels.
    pub volume: f64,
    /// How often the play position is published while playing.
    pub frame_interval: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        PlayerOptions {
            volume: DEFAULT_VOLUME,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

/// What observers see of the player.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_loading: bool,
    /// Seconds into the piece, wrapped into [0, duration) while looping.
    pub current_time: f64,
    pub duration: f64,
    /// Volume in decibels.
    pub volume: f64,
    pub current_track: Option<Track>,
}

/// Where the player is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Empty,
    Loading,
    Ready,
    Playing,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Status::Empty => "empty",
            Status::Loading => "loading",
            Status::Ready => "ready",
            Status::Playing => "playing",
        };
        write!(f, "{}", status)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unable to fetch {track}: {source}")]
    Fetch {
        track: String,
        #[source]
        source: FetchError,
    },
    #[error("unable to decode {track}: {source}")]
    Decode {
        track: String,
        #[source]
        source: DecodeError,
    },
    #[error("unable to load samples for {track}: {source}")]
    Samples {
        track: String,
        #[source]
        source: SampleError,
    },
    #[error("loading {track} was superseded by a later load")]
    Superseded { track: String },
}

/// The instrument pool and scheduler built for the loaded track.
struct Session {
    track: Track,
    pool: Arc<InstrumentPool>,
    scheduler: Scheduler,
    duration: f64,
}

impl Session {
    fn dispose(&self) {
        self.scheduler.dispose();
        self.pool.dispose();
        debug!(track = self.track.name, "Session disposed.");
    }
}

struct PollHandles {
    join: JoinHandle<()>,
    cancel: CancelHandle,
}

impl PollHandles {
    fn stop(self) {
        self.cancel.cancel();
        self.join.abort();
    }
}

/// Plays MIDI tracks through sampled piano voices, looping each piece until told otherwise.
pub struct Player {
    /// The shared clock everything is scheduled against.
    transport: Arc<Transport>,
    /// The output voices are routed into.
    output: Arc<dyn Output>,
    /// Fetches MIDI files and samples.
    fetcher: Arc<dyn Fetcher>,
    /// The samples every voice is built from.
    bank: SampleBank,
    frame_interval: Duration,
    /// The loaded track's resources. At most one at a time.
    session: Mutex<Option<Session>>,
    /// Bumped by every load and by dispose. A load that finds it moved on has been superseded.
    generation: AtomicU64,
    /// Published playback state.
    state: Arc<watch::Sender<PlaybackState>>,
    /// The UI-sync poller. There should only be one task on here at a time.
    poller: Mutex<Option<PollHandles>>,
    /// The logging span.
    span: Span,
}

impl Player {
    /// Creates a new player. Nothing is loaded until [Player::load_track] is called.
    pub fn new(
        transport: Arc<Transport>,
        output: Arc<dyn Output>,
        fetcher: Arc<dyn Fetcher>,
        bank: SampleBank,
        options: PlayerOptions,
    ) -> Player {
        let (state, _) = watch::channel(PlaybackState {
            is_playing: false,
            is_loading: false,
            current_time: 0.0,
            duration: 0.0,
            volume: options.volume,
            current_track: None,
        });
        Player {
            transport,
            output,
            fetcher,
            bank,
            frame_interval: options.frame_interval.max(Duration::from_millis(1)),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            state: Arc::new(state),
            poller: Mutex::new(None),
            span: span!(Level::INFO, "player"),
        }
    }

    /// Loads a track, replacing whatever was loaded. Playback stops first. If another load
    /// starts before this one finishes, this one is discarded and returns
    /// [LoadError::Superseded].
    pub async fn load_track(&self, track: Track) -> Result<(), LoadError> {
        self.load(track).instrument(self.span.clone()).await
    }

    async fn load(&self, track: Track) -> Result<(), LoadError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(track = track.name, generation, "Loading track.");
        self.teardown();

        let result = self.build_session(&track, generation).await;

        let mut session = self.session.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            drop(session);
            match result {
                Ok(built) => built.dispose(),
                Err(e) => debug!(err = %e, track = track.name, "Superseded load also failed."),
            }
            info!(track = track.name, generation, "Discarding superseded load.");
            return Err(LoadError::Superseded { track: track.name });
        }

        match result {
            Ok(built) => {
                let duration = built.duration;
                let events = built.scheduler.event_count();
                // The volume may have changed while loading.
                let volume = self.state.borrow().volume;
                built.pool.set_volume(volume);
                if let Some(stale) = session.replace(built) {
                    stale.dispose();
                }
                self.state.send_modify(|state| {
                    state.is_loading = false;
                    state.is_playing = false;
                    state.current_time = 0.0;
                    state.duration = duration;
                    state.current_track = Some(track.clone());
                });
                info!(track = track.name, duration, events, "Track ready.");
                Ok(())
            }
            Err(e) => {
                self.state.send_modify(|state| {
                    state.is_loading = false;
                    state.current_track = None;
                    state.duration = 0.0;
                    state.current_time = 0.0;
                });
                error!(err = %e, track = track.name, "Unable to load track.");
                Err(e)
            }
        }
    }

    /// Fetches, decodes, and builds the voices and scheduler for a track.
    async fn build_session(&self, track: &Track, generation: u64) -> Result<Session, LoadError> {
        let bytes = self
            .fetcher
            .fetch(&track.path)
            .await
            .map_err(|source| LoadError::Fetch {
                track: track.name.clone(),
                source,
            })?;
        let decoded = midi::decode(&bytes).map_err(|source| LoadError::Decode {
            track: track.name.clone(),
            source,
        })?;

        // Don't load samples for a track nobody wants any more.
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(LoadError::Superseded {
                track: track.name.clone(),
            });
        }

        debug!(
            track = track.name,
            tracks = decoded.tracks.len(),
            notes = decoded.note_count(),
            duration = decoded.duration,
            "Decoded track."
        );
        let volume = self.state.borrow().volume;
        let pool = InstrumentPool::load(
            decoded.tracks.len(),
            &self.bank,
            self.fetcher.clone(),
            self.output.clone(),
            volume,
        )
        .await
        .map_err(|source| LoadError::Samples {
            track: track.name.clone(),
            source,
        })?;
        let pool = Arc::new(pool);
        let scheduler = Scheduler::new(
            decoded.notes(),
            decoded.duration,
            pool.clone(),
            self.transport.clone(),
        );

        Ok(Session {
            track: track.clone(),
            pool,
            scheduler,
            duration: decoded.duration,
        })
    }

    /// Stops playback and releases the current session ahead of a load.
    fn teardown(&self) {
        self.stop_poller();
        self.transport.stop();
        self.transport.cancel();
        if let Some(session) = self.session.lock().take() {
            session.dispose();
        }
        self.state.send_modify(|state| {
            state.is_loading = true;
            state.is_playing = false;
            state.current_time = 0.0;
            state.duration = 0.0;
            state.current_track = None;
        });
    }

    /// Starts or resumes playback. Does nothing if no track is loaded. Must be called from
    /// within a tokio runtime.
    pub fn play(&self) -> Result<(), AudioError> {
        let _enter = self.span.enter();

        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            info!("No track loaded, ignoring play.");
            return Ok(());
        };

        self.output.resume()?;
        session.scheduler.start();
        self.transport.start();
        self.state.send_modify(|state| state.is_playing = true);
        info!(
            track = session.track.name,
            position = self.transport.seconds(),
            "Playing."
        );
        self.start_poller();
        Ok(())
    }

    /// Pauses playback, keeping the position.
    pub fn pause(&self) {
        let _enter = self.span.enter();

        self.stop_poller();
        self.transport.pause();
        let seconds = self.transport.seconds();
        let loaded = self.session.lock().is_some();
        self.state.send_modify(|state| {
            state.is_playing = false;
            if loaded {
                state.current_time = wrap_time(seconds, state.duration);
            }
        });
        info!(position = seconds, "Paused.");
    }

    /// Stops playback and rewinds to the start. Safe to call in any state.
    pub fn stop(&self) {
        let _enter = self.span.enter();

        self.stop_poller();
        self.transport.stop();
        self.transport.cancel();
        if let Some(session) = self.session.lock().as_ref() {
            session.scheduler.stop();
        }
        self.state.send_modify(|state| {
            state.is_playing = false;
            state.current_time = 0.0;
        });
        info!("Stopped.");
    }

    /// Pauses if playing, plays otherwise.
    pub fn toggle_playback(&self) -> Result<(), AudioError> {
        let is_playing = self.state.borrow().is_playing;
        if is_playing {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Moves to the given position. Playback continues from there if it was playing.
    pub fn seek_to(&self, seconds: f64) {
        let _enter = self.span.enter();

        let was_playing = self.state.borrow().is_playing;
        self.transport.stop();
        self.transport.set_seconds(seconds);
        if let Some(session) = self.session.lock().as_ref() {
            session.scheduler.stop();
            if was_playing {
                session.scheduler.start();
                self.transport.start();
            }
        }
        self.state.send_modify(|state| state.current_time = seconds);
        info!(position = seconds, was_playing, "Seeked.");
    }

    /// Sets the volume in decibels for every voice, now and for later loads.
    pub fn set_volume(&self, db: f64) {
        let _enter = self.span.enter();

        self.state.send_modify(|state| state.volume = db);
        if let Some(session) = self.session.lock().as_ref() {
            session.pool.set_volume(db);
        }
        debug!(volume = db, "Volume set.");
    }

    /// Stops playback and releases everything. In-flight loads are superseded. Safe to call
    /// in any state, any number of times.
    pub fn dispose(&self) {
        let _enter = self.span.enter();

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop();
        if let Some(session) = self.session.lock().take() {
            session.dispose();
            info!(track = session.track.name, "Player disposed.");
        }
        self.state.send_modify(|state| {
            state.is_loading = false;
            state.duration = 0.0;
            state.current_track = None;
        });
    }

    /// A snapshot of the playback state.
    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    /// Follows the playback state as it changes.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> Status {
        let loaded = self.session.lock().is_some();
        let state = self.state.borrow();
        if state.is_loading {
            Status::Loading
        } else if !loaded {
            Status::Empty
        } else if state.is_playing {
            Status::Playing
        } else {
            Status::Ready
        }
    }

    /// Returns true while the UI-sync poller is running.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|poller| !poller.join.is_finished())
    }

    fn start_poller(&self) {
        let mut poller = self.poller.lock();
        if let Some(existing) = poller.take() {
            existing.stop();
        }

        let cancel = CancelHandle::new();
        let join = tokio::spawn(
            poll(
                self.transport.clone(),
                self.state.clone(),
                self.frame_interval,
                cancel.clone(),
            )
            .instrument(self.span.clone()),
        );
        *poller = Some(PollHandles { join, cancel });
    }

    fn stop_poller(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.stop();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_poller();
        if let Some(session) = self.session.lock().take() {
            session.dispose();
        }
    }
}

/// Wraps a clock reading into [0, duration) once it runs past the end of the piece.
pub fn wrap_time(seconds: f64, duration: f64) -> f64 {
    if duration > 0.0 && !(0.0..duration).contains(&seconds) {
        seconds.rem_euclid(duration)
    } else {
        seconds
    }
}

/// Publishes the transport position once per frame until playback stops.
async fn poll(
    transport: Arc<Transport>,
    state: Arc<watch::Sender<PlaybackState>>,
    frame_interval: Duration,
    cancel: CancelHandle,
) {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let mut playing = true;
        state.send_if_modified(|state| {
            if !state.is_playing {
                playing = false;
                return false;
            }
            if transport.state() != TransportState::Started {
                return false;
            }
            state.current_time = wrap_time(transport.seconds(), state.duration);
            true
        });
        if !playing {
            debug!("Playback stopped, poller exiting.");
            return;
        }
    }
}
