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
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::audio::{mixer::AudioMixer, AudioError, Route, Source};

const MOCK_SAMPLE_RATE: u32 = 8000;
const MOCK_CHANNELS: u16 = 2;

/// How many triggered sources the mock output remembers.
pub const MAX_TRIGGERED: usize = 1024;

/// How many sources the mock output keeps mixing. Nothing renders the mock when it backs the
/// binary, so the oldest sources are dropped past this.
pub const MAX_ACTIVE_SOURCES: usize = 256;

/// A source added to the mock output.
#[derive(Clone, Debug)]
pub struct Triggered {
    pub label: String,
    pub at: Instant,
}

/// A mock output. Doesn't actually play anything, but remembers what it was asked to play and
/// can render it on demand.
pub struct Output {
    name: String,
    resumed: AtomicBool,
    routes: Arc<AtomicUsize>,
    triggered: Mutex<VecDeque<Triggered>>,
    mixer: Mutex<AudioMixer>,
}

impl Output {
    /// Gets the given mock output.
    pub fn get(name: &str) -> Output {
        Output {
            name: name.to_string(),
            resumed: AtomicBool::new(false),
            routes: Arc::new(AtomicUsize::new(0)),
            triggered: Mutex::new(VecDeque::new()),
            mixer: Mutex::new(AudioMixer::new(MOCK_CHANNELS, MOCK_SAMPLE_RATE)),
        }
    }

    /// Returns true once the output has been resumed.
    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }

    /// The most recent sources added to the output, oldest first.
    pub fn triggered(&self) -> Vec<Triggered> {
        self.triggered.lock().iter().cloned().collect()
    }

    /// The labels of the most recent sources added to the output.
    pub fn triggered_labels(&self) -> Vec<String> {
        self.triggered
            .lock()
            .iter()
            .map(|triggered| triggered.label.clone())
            .collect()
    }

    /// Renders the given number of frames of the sources still playing.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        self.mixer.lock().process_frames(frames)
    }

    /// The number of sources still playing.
    pub fn active_sources(&self) -> usize {
        self.mixer.lock().active_count()
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl super::Output for Output {
    fn resume(&self) -> Result<(), AudioError> {
        self.resumed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        MOCK_SAMPLE_RATE
    }

    fn route(&self) -> Route {
        Route::connect(self.routes.clone())
    }

    fn live_routes(&self) -> usize {
        self.routes.load(Ordering::SeqCst)
    }

    fn add_source(&self, source: Box<dyn Source>) {
        debug!(output = self.name, source = source.label(), "Mock output source added.");
        {
            let mut triggered = self.triggered.lock();
            if triggered.len() >= MAX_TRIGGERED {
                triggered.pop_front();
            }
            triggered.push_back(Triggered {
                label: source.label().to_string(),
                at: Instant::now(),
            });
        }

        let mut mixer = self.mixer.lock();
        if mixer.active_count() >= MAX_ACTIVE_SOURCES {
            mixer.drop_oldest();
        }
        mixer.add_source(source);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::Output as _;

    /// Never finishes on its own.
    struct Held {
        label: String,
    }

    impl Source for Held {
        fn mix_into(&mut self, _output: &mut [f32], _channels: usize) -> bool {
            true
        }

        fn label(&self) -> &str {
            &self.label
        }
    }

    #[test]
    fn test_unrendered_output_stays_bounded() {
        let output = Output::get("mock-device");
        let total = MAX_TRIGGERED + 10;
        for i in 0..total {
            output.add_source(Box::new(Held {
                label: format!("held-{}", i),
            }));
        }

        assert_eq!(MAX_ACTIVE_SOURCES, output.active_sources());
        let labels = output.triggered_labels();
        assert_eq!(MAX_TRIGGERED, labels.len());
        assert_eq!(Some(&"held-10".to_string()), labels.first());
        assert_eq!(Some(&format!("held-{}", total - 1)), labels.last());
    }
}
