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
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use thiserror::Error;

pub mod cpal;
pub mod mixer;
pub mod mock;

/// The device name that selects the system default output.
pub const DEFAULT_DEVICE: &str = "default";

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no output device found with name {0}")]
    DeviceNotFound(String),
    #[error("no default output device is available")]
    NoDefaultDevice,
    #[error("unable to query output devices: {0}")]
    Devices(#[from] ::cpal::DevicesError),
    #[error("unable to query the output configuration: {0}")]
    DefaultConfig(#[from] ::cpal::DefaultStreamConfigError),
    #[error("unable to build the output stream: {0}")]
    BuildStream(#[from] ::cpal::BuildStreamError),
    #[error("unable to start the output stream: {0}")]
    PlayStream(#[from] ::cpal::PlayStreamError),
    #[error("unsupported output sample format {0}")]
    UnsupportedFormat(String),
    #[error("the audio output thread has stopped")]
    OutputClosed,
}

/// Something that renders audio into the output mix.
pub trait Source: Send {
    /// Adds the next `output.len() / channels` frames to the interleaved output buffer.
    /// Returns false once the source has nothing more to play.
    fn mix_into(&mut self, output: &mut [f32], channels: usize) -> bool;

    /// A short description of the source, used in logs and tests.
    fn label(&self) -> &str;
}

/// An audio output that sounding notes are routed into.
pub trait Output: fmt::Display + Send + Sync {
    /// Activates the output. Safe to call when already active.
    fn resume(&self) -> Result<(), AudioError>;

    /// The output's sample rate. Samples are resampled to it when loaded.
    fn sample_rate(&self) -> u32;

    /// Opens a route into the output. The route stays connected until dropped.
    fn route(&self) -> Route;

    /// The number of routes currently connected.
    fn live_routes(&self) -> usize;

    /// Starts playing the given source.
    fn add_source(&self, source: Box<dyn Source>);
}

/// A connection into an output held by each live instrument voice.
pub struct Route {
    routes: Arc<AtomicUsize>,
}

impl Route {
    /// Connects a route, counting it against the given counter until dropped.
    pub fn connect(routes: Arc<AtomicUsize>) -> Route {
        routes.fetch_add(1, Ordering::SeqCst);
        Route { routes }
    }
}

impl Drop for Route {
    fn drop(&mut self) {
        self.routes.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, AudioError> {
    cpal::Output::list()
}

/// Gets the output with the given name. Names starting with "mock" give a mock output.
pub fn get_output(name: &str) -> Result<Arc<dyn Output>, AudioError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Output::get(name)));
    }

    Ok(Arc::new(cpal::Output::get(name)?))
}
