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

//! A sounding note: one sample played at a velocity, held for the note's duration and then
//! faded out.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::audio::Source;
use crate::playsync::CancelHandle;
use crate::samples::loader::LoadedSample;
use crate::util::db_to_gain;

/// How long a released note takes to fade to silence.
pub const RELEASE_SECONDS: f64 = 1.0;

/// Global voice ID counter.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// An instrument volume in decibels, shared with every note the instrument is sounding.
#[derive(Clone, Debug)]
pub struct Volume(Arc<AtomicU32>);

impl Volume {
    pub fn new(db: f64) -> Volume {
        Volume(Arc::new(AtomicU32::new((db as f32).to_bits())))
    }

    pub fn db(&self) -> f64 {
        f64::from(f32::from_bits(self.0.load(Ordering::Relaxed)))
    }

    pub fn set(&self, db: f64) {
        self.0.store((db as f32).to_bits(), Ordering::Relaxed);
    }

    /// The linear gain for the current level.
    pub fn gain(&self) -> f32 {
        db_to_gain(self.db())
    }
}

/// A note playing a loaded sample.
pub struct Voice {
    /// Unique ID for this voice.
    id: u64,
    /// The pitch being played.
    pitch: String,
    sample: LoadedSample,
    /// Next frame to play.
    position: usize,
    /// Frames played at full level before the release starts.
    gate_frames: usize,
    release_frames: usize,
    velocity: f32,
    volume: Volume,
    /// Cancelled when the owning instrument is disposed.
    cancel_handle: CancelHandle,
}

impl Voice {
    /// Creates a new voice holding the note for `duration` seconds.
    pub fn new(
        pitch: &str,
        sample: LoadedSample,
        duration: f64,
        velocity: f32,
        volume: Volume,
        cancel_handle: CancelHandle,
    ) -> Voice {
        let rate = f64::from(sample.sample_rate());
        let id = NEXT_VOICE_ID.fetch_add(1, Ordering::SeqCst);
        trace!(id, pitch, duration, velocity, "Voice created.");
        Voice {
            id,
            pitch: pitch.to_string(),
            sample,
            position: 0,
            gate_frames: (duration.max(0.0) * rate).round() as usize,
            release_frames: ((RELEASE_SECONDS * rate).round() as usize).max(1),
            velocity: velocity.clamp(0.0, 1.0),
            volume,
            cancel_handle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The frame after which nothing more is heard.
    fn end_frame(&self) -> usize {
        self.sample
            .frames()
            .min(self.gate_frames + self.release_frames)
    }

    /// Level of the envelope at the given frame.
    fn envelope(&self, frame: usize) -> f32 {
        if frame < self.gate_frames {
            return 1.0;
        }
        let released = (frame - self.gate_frames) as f32 / self.release_frames as f32;
        (1.0 - released).max(0.0)
    }
}

impl Source for Voice {
    fn mix_into(&mut self, output: &mut [f32], channels: usize) -> bool {
        if self.cancel_handle.is_cancelled() {
            return false;
        }

        let gain = self.velocity * self.volume.gain();
        let end = self.end_frame();
        let source_channels = usize::from(self.sample.channel_count());
        let data = self.sample.data();

        for frame in output.chunks_mut(channels) {
            if self.position >= end {
                break;
            }
            let level = gain * self.envelope(self.position);
            let base = self.position * source_channels;
            for (channel, sample) in frame.iter_mut().enumerate() {
                *sample += data[base + channel % source_channels] * level;
            }
            self.position += 1;
        }

        self.position < end
    }

    fn label(&self) -> &str {
        &self.pitch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(frames: usize, sample_rate: u32) -> LoadedSample {
        LoadedSample::new(vec![1.0; frames], 1, sample_rate)
    }

    #[test]
    fn test_volume() {
        let volume = Volume::new(-10.0);
        assert!((volume.db() + 10.0).abs() < 1e-6);
        volume.set(0.0);
        assert!((volume.gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_voice_gate_and_release() {
        // 10 frames per second: a 0.2s gate is 2 frames, the release is 10.
        let mut voice = Voice::new(
            "C4",
            ones(100, 10),
            0.2,
            0.5,
            Volume::new(0.0),
            CancelHandle::new(),
        );

        let mut output = vec![0.0; 2 * 4];
        assert!(voice.mix_into(&mut output, 2));
        let expected = [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.45, 0.45];
        for (expected, actual) in expected.iter().zip(output.iter()) {
            assert!((expected - actual).abs() < 1e-6, "{expected} != {actual}");
        }

        let mut output = vec![0.0; 20];
        assert!(!voice.mix_into(&mut output, 1));
        assert!(output[7] > 0.0);
        assert_eq!(0.0, output[8]);
        assert_eq!("C4", voice.label());
    }

    #[test]
    fn test_voice_stops_at_sample_end() {
        let mut voice = Voice::new(
            "A1",
            ones(3, 10),
            5.0,
            1.0,
            Volume::new(0.0),
            CancelHandle::new(),
        );

        let mut output = vec![0.0; 5];
        assert!(!voice.mix_into(&mut output, 1));
        assert_eq!(vec![1.0, 1.0, 1.0, 0.0, 0.0], output);
    }

    #[test]
    fn test_voice_follows_volume_changes() {
        let volume = Volume::new(0.0);
        let mut voice = Voice::new(
            "C4",
            ones(100, 10),
            5.0,
            1.0,
            volume.clone(),
            CancelHandle::new(),
        );

        let mut output = vec![0.0; 1];
        voice.mix_into(&mut output, 1);
        assert!((output[0] - 1.0).abs() < 1e-6);

        volume.set(-20.0);
        let mut output = vec![0.0; 1];
        voice.mix_into(&mut output, 1);
        assert!((output[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_cancelled_voice_is_silent() {
        let cancel_handle = CancelHandle::new();
        let mut voice = Voice::new(
            "C4",
            ones(100, 10),
            5.0,
            1.0,
            Volume::new(0.0),
            cancel_handle.clone(),
        );
        cancel_handle.cancel();

        let mut output = vec![0.0; 4];
        assert!(!voice.mix_into(&mut output, 1));
        assert!(output.iter().all(|sample| *sample == 0.0));
    }
}
