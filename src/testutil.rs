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
    collections::HashMap,
    error::Error,
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use hound::{SampleFormat, WavSpec, WavWriter};
use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use parking_lot::Mutex;

use crate::{
    config::SampleBank,
    fetch::{FetchError, FetchFuture, Fetcher},
    midi::NoteEvent,
};

/// Ticks per quarter note in generated MIDI files.
pub const TICKS_PER_BEAT: u16 = 480;

/// Wait for the given async predicate to return true or fail.
#[inline]
pub async fn eventually_async<F, Fut>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate().await {
            return;
        }
        tokio::time::sleep(tick).await;
    }
}

/// An in-memory fetcher that counts what it serves and can be told to be slow.
#[derive(Default)]
pub struct MemoryFetcher {
    files: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    fetches: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> MemoryFetcher {
        MemoryFetcher::default()
    }

    pub fn insert(&self, locator: &str, bytes: Vec<u8>) {
        self.files.lock().insert(locator.to_string(), Arc::new(bytes));
    }

    /// Delays every fetch of the locator by the given duration.
    pub fn set_delay(&self, locator: &str, delay: Duration) {
        self.delays.lock().insert(locator.to_string(), delay);
    }

    pub fn fetch_count(&self, locator: &str) -> usize {
        self.fetches.lock().get(locator).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            *self.fetches.lock().entry(locator.to_string()).or_insert(0) += 1;
            self.total.fetch_add(1, Ordering::SeqCst);

            let delay = self.delays.lock().get(locator).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let file = self.files.lock().get(locator).cloned();
            match file {
                Some(bytes) => Ok(bytes.as_ref().clone()),
                None => Err(FetchError::Io {
                    path: locator.into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        })
    }
}

/// A note in a generated MIDI file, in ticks.
#[derive(Clone, Debug)]
pub struct NoteSpec {
    pub start: u32,
    pub length: u32,
    pub key: u8,
    pub velocity: u8,
}

impl NoteSpec {
    pub fn new(start: u32, length: u32, key: u8, velocity: u8) -> NoteSpec {
        NoteSpec {
            start,
            length,
            key,
            velocity,
        }
    }
}

/// Describes a MIDI file to generate. Tempo changes go in the first track. Without any, the
/// default of 120 BPM applies.
#[derive(Clone, Debug, Default)]
pub struct MidiFixture {
    /// (tick, microseconds per quarter note)
    pub tempo_changes: Vec<(u32, u32)>,
    /// Write note offs as note ons with zero velocity.
    pub note_off_as_zero_velocity: bool,
    pub tracks: Vec<Vec<NoteSpec>>,
    pub track_names: Vec<Option<String>>,
    /// The earliest tick the end of track marker may sit at.
    pub end_tick: u32,
}

impl MidiFixture {
    pub fn single_track(notes: Vec<NoteSpec>) -> MidiFixture {
        MidiFixture {
            tracks: vec![notes],
            ..Default::default()
        }
    }
}

/// Orders events that share a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Meta,
    NoteOff,
    NoteOn,
    ZeroLengthOff,
}

/// Writes the fixture out as a standard MIDI file.
pub fn midi_bytes(fixture: &MidiFixture) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut tracks = Vec::with_capacity(fixture.tracks.len());
    for (index, notes) in fixture.tracks.iter().enumerate() {
        let mut events: Vec<(u32, Slot, TrackEventKind)> = Vec::new();

        if let Some(Some(name)) = fixture.track_names.get(index) {
            let name = TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes()));
            events.push((0, Slot::Meta, name));
        }
        if index == 0 {
            for (tick, tempo) in fixture.tempo_changes.iter() {
                events.push((
                    *tick,
                    Slot::Meta,
                    TrackEventKind::Meta(MetaMessage::Tempo(u24::new(*tempo))),
                ));
            }
        }

        for note in notes.iter() {
            let on = MidiMessage::NoteOn {
                key: u7::new(note.key),
                vel: u7::new(note.velocity),
            };
            let off = if fixture.note_off_as_zero_velocity {
                MidiMessage::NoteOn {
                    key: u7::new(note.key),
                    vel: u7::new(0),
                }
            } else {
                MidiMessage::NoteOff {
                    key: u7::new(note.key),
                    vel: u7::new(64),
                }
            };
            let off_slot = if note.length == 0 {
                Slot::ZeroLengthOff
            } else {
                Slot::NoteOff
            };
            events.push((note.start, Slot::NoteOn, midi_event(on)));
            events.push((note.start + note.length, off_slot, midi_event(off)));
        }
        events.sort_by_key(|(tick, slot, _)| (*tick, *slot));

        let last_tick = events.last().map(|(tick, _, _)| *tick).unwrap_or(0);
        events.push((
            last_tick.max(fixture.end_tick),
            Slot::Meta,
            TrackEventKind::Meta(MetaMessage::EndOfTrack),
        ));

        let mut previous = 0;
        let track: Vec<TrackEvent> = events
            .into_iter()
            .map(|(tick, _, kind)| {
                let delta = tick - previous;
                previous = tick;
                TrackEvent {
                    delta: u28::new(delta),
                    kind,
                }
            })
            .collect();
        tracks.push(track);
    }

    let smf = Smf {
        header: Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(TICKS_PER_BEAT)),
        ),
        tracks,
    };
    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;
    Ok(bytes)
}

fn midi_event<'a>(message: MidiMessage) -> TrackEventKind<'a> {
    TrackEventKind::Midi {
        channel: u4::new(0),
        message,
    }
}

/// A 16 bit WAV file holding a constant half scale signal.
pub fn wav_bytes(
    frames: usize,
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, Box<dyn Error>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for _ in 0..frames * usize::from(channels) {
            writer.write_sample(i16::MAX / 2)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// A three sample bank under "samples".
pub fn small_bank() -> SampleBank {
    SampleBank::new(
        Some("samples".to_string()),
        vec![
            ("C4".to_string(), "C4.wav".to_string()),
            ("A1".to_string(), "A1.wav".to_string()),
            ("C#4".to_string(), "Cs4.wav".to_string()),
        ],
    )
}

/// A fetcher serving every sample in [small_bank] as a two second mono WAV at the mock
/// output's rate.
pub fn small_bank_fetcher() -> Result<MemoryFetcher, Box<dyn Error>> {
    let fetcher = MemoryFetcher::new();
    for (_, locator) in small_bank().entries() {
        fetcher.insert(&locator, wav_bytes(16000, 8000, 1)?);
    }
    Ok(fetcher)
}

/// A short note for scheduling tests.
pub fn note(offset: f64, pitch: &str) -> NoteEvent {
    NoteEvent {
        offset,
        pitch: pitch.to_string(),
        duration: 0.25,
        velocity: 0.8,
    }
}
