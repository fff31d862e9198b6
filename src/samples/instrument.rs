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

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::audio::{Output, Route};
use crate::config::SampleBank;
use crate::fetch::Fetcher;
use crate::playsync::CancelHandle;
use crate::samples::loader::{SampleError, SampleLoader, SampleSet};
use crate::samples::voice::{Voice, Volume};

/// Raised when a note's pitch has no sample.
#[derive(Debug, Error, PartialEq)]
#[error("pitch {pitch} is not mapped to a sample")]
pub struct UnsupportedPitch {
    pub pitch: String,
}

/// What a voice holds until it is disposed.
struct Live {
    samples: Arc<SampleSet>,
    /// Held for its connection to the output.
    _route: Route,
}

/// A sampled instrument voice.
pub struct Instrument {
    index: usize,
    volume: Volume,
    output: Arc<dyn Output>,
    /// Shared with every note this voice is sounding.
    cancel_handle: CancelHandle,
    live: Mutex<Option<Live>>,
}

impl Instrument {
    /// Creates a voice playing the given samples through the output.
    pub fn new(
        index: usize,
        samples: Arc<SampleSet>,
        output: Arc<dyn Output>,
        volume_db: f64,
    ) -> Instrument {
        let route = output.route();
        Instrument {
            index,
            volume: Volume::new(volume_db),
            output,
            cancel_handle: CancelHandle::new(),
            live: Mutex::new(Some(Live {
                samples,
                _route: route,
            })),
        }
    }

    /// Starts sounding a note immediately. `at_time` is the transport time the note was due at
    /// and is only logged; callers trigger notes when they come due. Triggering a disposed
    /// instrument does nothing.
    pub fn trigger_note(
        &self,
        pitch: &str,
        duration: f64,
        at_time: f64,
        velocity: f32,
    ) -> Result<(), UnsupportedPitch> {
        let live = self.live.lock();
        let Some(live) = live.as_ref() else {
            return Ok(());
        };

        let sample = live.samples.get(pitch).ok_or_else(|| UnsupportedPitch {
            pitch: pitch.to_string(),
        })?;
        let voice = Voice::new(
            pitch,
            sample.clone(),
            duration,
            velocity,
            self.volume.clone(),
            self.cancel_handle.clone(),
        );
        debug!(
            instrument = self.index,
            voice = voice.id(),
            pitch,
            at_time,
            duration,
            velocity,
            "Note triggered."
        );
        self.output.add_source(Box::new(voice));
        Ok(())
    }

    /// The volume in decibels.
    pub fn volume(&self) -> f64 {
        self.volume.db()
    }

    /// Sets the volume in decibels. Sounding notes follow immediately.
    pub fn set_volume(&self, db: f64) {
        self.volume.set(db);
    }

    /// Silences every sounding note and releases the samples and output route. Safe to call
    /// any number of times.
    pub fn dispose(&self) {
        self.cancel_handle.cancel();
        if self.live.lock().take().is_some() {
            debug!(instrument = self.index, "Instrument disposed.");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.live.lock().is_none()
    }
}

/// The voices built for one loaded piece.
pub struct InstrumentPool {
    instruments: Vec<Instrument>,
}

impl InstrumentPool {
    /// Loads the sample bank and builds the requested number of voices. Every voice uses the
    /// same bank, so the samples are decoded once and shared. Resolves once every sample has
    /// loaded.
    pub async fn load(
        voices: usize,
        bank: &SampleBank,
        fetcher: Arc<dyn Fetcher>,
        output: Arc<dyn Output>,
        volume_db: f64,
    ) -> Result<InstrumentPool, SampleError> {
        if voices == 0 {
            return Ok(InstrumentPool {
                instruments: Vec::new(),
            });
        }

        let loader = Arc::new(SampleLoader::new(fetcher, output.sample_rate()));
        let samples = Arc::new(loader.load_bank(bank).await?);
        let instruments = (0..voices)
            .map(|index| Instrument::new(index, samples.clone(), output.clone(), volume_db))
            .collect();

        info!(voices, samples = samples.len(), "Instrument pool ready.");
        Ok(InstrumentPool { instruments })
    }

    /// The voice at the given index.
    pub fn voice(&self, index: usize) -> Option<&Instrument> {
        self.instruments.get(index)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Sets the volume of every voice.
    pub fn set_volume(&self, db: f64) {
        for instrument in self.instruments.iter() {
            instrument.set_volume(db);
        }
    }

    /// Disposes every voice. Safe to call any number of times.
    pub fn dispose(&self) {
        for instrument in self.instruments.iter() {
            instrument.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.instruments.iter().all(Instrument::is_disposed)
    }
}
