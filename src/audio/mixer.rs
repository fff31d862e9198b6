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

// Core mixing logic shared by the cpal output and the mock output.
use tracing::trace;

use crate::audio::Source;

/// Sums active sources into interleaved output buffers. Owned by whichever thread renders audio,
/// so no locking happens while mixing.
pub struct AudioMixer {
    /// Sources currently playing.
    active_sources: Vec<ActiveSource>,
    /// Number of output channels.
    num_channels: u16,
    /// Sample rate.
    sample_rate: u32,
    next_id: u64,
}

/// A source in the mixer.
struct ActiveSource {
    id: u64,
    source: Box<dyn Source>,
}

impl AudioMixer {
    /// Creates a new audio mixer.
    pub fn new(num_channels: u16, sample_rate: u32) -> Self {
        Self {
            active_sources: Vec::new(),
            num_channels,
            sample_rate,
            next_id: 0,
        }
    }

    /// Adds a new audio source to the mixer and returns its ID.
    pub fn add_source(&mut self, source: Box<dyn Source>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        trace!(id, source = source.label(), "Adding source to mixer.");
        self.active_sources.push(ActiveSource { id, source });
        id
    }

    /// Drops the source that has been playing longest.
    pub fn drop_oldest(&mut self) {
        if !self.active_sources.is_empty() {
            let dropped = self.active_sources.remove(0);
            trace!(id = dropped.id, "Dropping oldest source.");
        }
    }

    /// Renders the next block into `output`, which is interleaved with `num_channels` channels.
    /// Sources that finish are dropped.
    pub fn process_into(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        let channels = usize::from(self.num_channels).max(1);

        self.active_sources.retain_mut(|active| {
            let keep = active.source.mix_into(output, channels);
            if !keep {
                trace!(id = active.id, "Source finished.");
            }
            keep
        });
    }

    /// Renders the given number of frames into a new buffer.
    pub fn process_frames(&mut self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * usize::from(self.num_channels)];
        self.process_into(&mut output);
        output
    }

    /// The number of sources still playing.
    pub fn active_count(&self) -> usize {
        self.active_sources.len()
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
