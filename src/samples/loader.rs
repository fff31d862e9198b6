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

//! Sample fetching, decoding and caching for instrument voices.
//!
//! Samples are decoded entirely into memory before a piece can play so note triggers never
//! wait on I/O.

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SampleBank;
use crate::fetch::{FetchError, Fetcher};

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("unable to fetch sample {locator}: {source}")]
    Fetch {
        locator: String,
        #[source]
        source: FetchError,
    },
    #[error("unable to decode sample {locator}: {source}")]
    Decode {
        locator: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("sample {0} contains no audio")]
    NoAudio(String),
    #[error("sample {0} does not declare a sample rate")]
    UnknownSampleRate(String),
    #[error("sample loading task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A decoded sample that can be played back.
/// The sample data is stored in an Arc for efficient sharing between voices.
#[derive(Clone)]
pub struct LoadedSample {
    /// The sample data as f32 samples (interleaved if multi-channel).
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl LoadedSample {
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    /// The interleaved sample data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / usize::from(self.channel_count)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Number of live handles to the underlying buffer, this one included.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

/// Decoded samples keyed by pitch name.
pub type SampleSet = HashMap<String, LoadedSample>;

/// Fetches and decodes samples, caching them by locator.
pub struct SampleLoader {
    fetcher: Arc<dyn Fetcher>,
    /// Cache of loaded samples by locator.
    cache: Mutex<HashMap<String, LoadedSample>>,
    /// Target sample rate for transcoding (matches audio output).
    target_sample_rate: u32,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(fetcher: Arc<dyn Fetcher>, target_sample_rate: u32) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(HashMap::new()),
            target_sample_rate,
        }
    }

    /// Loads a sample into memory.
    /// Returns a cached version if already loaded.
    pub async fn load(&self, locator: &str) -> Result<LoadedSample, SampleError> {
        if let Some(sample) = self.cache.lock().get(locator) {
            debug!(locator, "Using cached sample");
            return Ok(sample.clone());
        }

        let bytes = self
            .fetcher
            .fetch(locator)
            .await
            .map_err(|source| SampleError::Fetch {
                locator: locator.to_string(),
                source,
            })?;

        let target_sample_rate = self.target_sample_rate;
        let owned_locator = locator.to_string();
        let loaded = tokio::task::spawn_blocking(move || {
            decode_sample(&owned_locator, bytes, target_sample_rate)
        })
        .await??;

        debug!(
            locator,
            channels = loaded.channel_count,
            sample_rate = loaded.sample_rate,
            frames = loaded.frames(),
            memory_kb = loaded.memory_size() / 1024,
            "Sample loaded"
        );

        // Two concurrent loads of the same locator keep whichever finished first.
        let mut cache = self.cache.lock();
        Ok(cache
            .entry(locator.to_string())
            .or_insert(loaded)
            .clone())
    }

    /// Loads every sample in the bank concurrently and waits for all of them.
    /// The first failure aborts the rest.
    pub async fn load_bank(self: &Arc<Self>, bank: &SampleBank) -> Result<SampleSet, SampleError> {
        let mut tasks = JoinSet::new();
        for (pitch, locator) in bank.entries() {
            let loader = self.clone();
            tasks.spawn(async move { loader.load(&locator).await.map(|sample| (pitch, sample)) });
        }

        let mut samples = SampleSet::new();
        while let Some(result) = tasks.join_next().await {
            let (pitch, sample) = result??;
            samples.insert(pitch, sample);
        }

        info!(
            samples = samples.len(),
            memory_kb = self.total_memory_usage() / 1024,
            "Sample bank loaded"
        );
        Ok(samples)
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.lock().values().map(|s| s.memory_size()).sum()
    }
}

impl std::fmt::Debug for SampleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLoader")
            .field("cached_samples", &self.cache.lock().len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

/// Decodes a complete sample file and resamples it to the target rate.
fn decode_sample(
    locator: &str,
    bytes: Vec<u8>,
    target_sample_rate: u32,
) -> Result<LoadedSample, SampleError> {
    let decode_error = |source: SymphoniaError| SampleError::Decode {
        locator: locator.to_string(),
        source,
    };

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = Path::new(locator).extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_error)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SampleError::NoAudio(locator.to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| SampleError::UnknownSampleRate(locator.to_string()))?;
    let mut channel_count = codec_params
        .channels
        .map(|channels| channels.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(decode_error)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(decode_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                warn!(locator, reason, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(decode_error(e)),
        };

        let spec = *decoded.spec();
        channel_count = spec.channels.count() as u16;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if channel_count == 0 || samples.is_empty() {
        return Err(SampleError::NoAudio(locator.to_string()));
    }

    if source_sample_rate == target_sample_rate {
        return Ok(LoadedSample::new(samples, channel_count, source_sample_rate));
    }
    debug!(
        locator,
        source_rate = source_sample_rate,
        target_rate = target_sample_rate,
        "Transcoding sample"
    );
    let transcoded = transcode_samples(
        &samples,
        channel_count,
        source_sample_rate,
        target_sample_rate,
    );
    Ok(LoadedSample::new(transcoded, channel_count, target_sample_rate))
}

/// Transcodes samples from one sample rate to another using linear interpolation.
fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = f64::from(target_rate) / f64::from(source_rate);
    let channels = usize::from(channel_count);
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}
