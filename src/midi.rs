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

//! Decodes standard MIDI files into per-track note lists timed in seconds.

use std::collections::HashMap;

use midly::{Format, Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use thiserror::Error;

/// Notes whose off event lands on the same tick as their on event still sound for this long.
pub const MIN_NOTE_DURATION: f64 = 0.001;

/// Tempo assumed until the first Set Tempo event: 120 BPM.
const DEFAULT_MICROS_PER_BEAT: f64 = 500_000.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed MIDI data: {0}")]
    Malformed(#[from] midly::Error),
    #[error("truncated MIDI data: {0}")]
    Truncated(String),
    #[error("unsupported MIDI timing: {0}")]
    UnsupportedTiming(String),
}

/// A single note, timed in seconds from the start of the piece.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteEvent {
    /// When the note starts.
    pub offset: f64,
    /// Scientific pitch name, e.g. C#4.
    pub pitch: String,
    /// How long the note is held. Always positive.
    pub duration: f64,
    /// Normalised velocity in [0, 1].
    pub velocity: f32,
}

impl NoteEvent {
    /// The time at which the note is released.
    pub fn end(&self) -> f64 {
        self.offset + self.duration
    }
}

/// The notes of one MIDI track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MidiTrack {
    pub name: Option<String>,
    /// Notes ordered by start time.
    pub notes: Vec<NoteEvent>,
}

/// A decoded MIDI file.
#[derive(Clone, Debug, PartialEq)]
pub struct Midi {
    /// Length of the piece in seconds.
    pub duration: f64,
    pub tracks: Vec<MidiTrack>,
}

impl Midi {
    /// Total number of notes across all tracks.
    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|track| track.notes.len()).sum()
    }

    /// All notes of all tracks in a single list ordered by start time.
    pub fn notes(&self) -> Vec<NoteEvent> {
        let mut notes: Vec<NoteEvent> = self
            .tracks
            .iter()
            .flat_map(|track| track.notes.iter().cloned())
            .collect();
        notes.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        notes
    }
}

/// Returns the scientific pitch name of a MIDI key number. 60 is C4.
pub fn pitch_name(key: u8) -> String {
    let octave = i32::from(key / 12) - 1;
    format!("{}{}", NOTE_NAMES[usize::from(key % 12)], octave)
}

/// Verifies that every chunk of a standard MIDI file is as long as its header claims and that
/// the file holds as many tracks as it declares. Anything that isn't a bare SMF is left to midly.
fn check_chunks(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() < 14 || &bytes[..4] != b"MThd" {
        return Ok(());
    }
    let declared_tracks = usize::from(u16::from_be_bytes([bytes[10], bytes[11]]));

    let mut pos = 0;
    let mut tracks = 0;
    while bytes.len() - pos >= 8 {
        let id = &bytes[pos..pos + 4];
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[pos + 4..pos + 8]);
        let len = u32::from_be_bytes(len) as usize;
        pos += 8;
        if len > bytes.len() - pos {
            return Err(DecodeError::Truncated(format!(
                "{} chunk claims {} bytes, {} remain",
                String::from_utf8_lossy(id),
                len,
                bytes.len() - pos
            )));
        }
        if id == b"MTrk" {
            tracks += 1;
        }
        pos += len;
    }

    if tracks < declared_tracks {
        return Err(DecodeError::Truncated(format!(
            "found {} of {} tracks",
            tracks, declared_tracks
        )));
    }
    Ok(())
}

/// Decodes the bytes of a standard MIDI file.
pub fn decode(bytes: &[u8]) -> Result<Midi, DecodeError> {
    check_chunks(bytes)?;
    let smf = Smf::parse(bytes)?;
    let tempo_map = TempoMap::new(&smf)?;

    let mut tracks = Vec::with_capacity(smf.tracks.len());
    let mut duration: f64 = 0.0;
    let mut track_start: u64 = 0;
    for events in smf.tracks.iter() {
        let collected = collect_track(events, track_start);
        if smf.header.format == Format::Sequential {
            track_start = collected.end_tick;
        }

        let notes: Vec<NoteEvent> = collected
            .notes
            .into_iter()
            .map(|note| {
                let offset = tempo_map.seconds_at(note.start);
                let end = tempo_map.seconds_at(note.end);
                NoteEvent {
                    offset,
                    pitch: pitch_name(note.key),
                    duration: (end - offset).max(MIN_NOTE_DURATION),
                    velocity: f32::from(note.velocity) / 127.0,
                }
            })
            .collect();

        duration = notes
            .iter()
            .map(NoteEvent::end)
            .fold(duration, f64::max)
            .max(tempo_map.seconds_at(collected.end_tick));
        tracks.push(MidiTrack {
            name: collected.name,
            notes,
        });
    }

    Ok(Midi { duration, tracks })
}

/// A note paired from its on and off events, still in ticks.
struct RawNote {
    start: u64,
    end: u64,
    key: u8,
    velocity: u8,
}

struct CollectedTrack {
    name: Option<String>,
    notes: Vec<RawNote>,
    end_tick: u64,
}

/// Pairs note on/off events of a single track. Overlapping notes on the same channel and key
/// are closed first in, first out.
fn collect_track(events: &[midly::TrackEvent], start_tick: u64) -> CollectedTrack {
    let mut tick = start_tick;
    let mut name = None;
    let mut open: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
    let mut notes = Vec::new();

    for event in events {
        tick += u64::from(event.delta.as_int());
        match event.kind {
            TrackEventKind::Midi { channel, message } => {
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        open.entry((channel, key.as_int()))
                            .or_default()
                            .push((tick, vel.as_int()));
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        let key = key.as_int();
                        if let Some(pending) = open.get_mut(&(channel, key)) {
                            if !pending.is_empty() {
                                let (start, velocity) = pending.remove(0);
                                notes.push(RawNote {
                                    start,
                                    end: tick,
                                    key,
                                    velocity,
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
            TrackEventKind::Meta(MetaMessage::TrackName(raw)) if name.is_none() => {
                let decoded = String::from_utf8_lossy(raw).trim().to_string();
                if !decoded.is_empty() {
                    name = Some(decoded);
                }
            }
            _ => {}
        }
    }

    // Anything still held when the track ends is released at the last event.
    for ((_, key), pending) in open {
        for (start, velocity) in pending {
            notes.push(RawNote {
                start,
                end: tick,
                key,
                velocity,
            });
        }
    }
    notes.sort_by_key(|note| (note.start, note.key));

    CollectedTrack {
        name,
        notes,
        end_tick: tick,
    }
}

/// Converts absolute ticks into seconds.
enum TempoMap {
    /// Ticks per beat plus the tempo changes in tick order.
    Metrical {
        ticks_per_beat: f64,
        changes: Vec<TempoChange>,
    },
    /// SMPTE timing has a fixed number of ticks per second.
    Timecode { ticks_per_second: f64 },
}

struct TempoChange {
    tick: u64,
    /// Seconds elapsed when this tempo takes effect.
    seconds: f64,
    micros_per_beat: f64,
}

impl TempoMap {
    fn new(smf: &Smf) -> Result<TempoMap, DecodeError> {
        match smf.header.timing {
            Timing::Metrical(ticks_per_beat) => {
                let ticks_per_beat = ticks_per_beat.as_int();
                if ticks_per_beat == 0 {
                    return Err(DecodeError::UnsupportedTiming(
                        "zero ticks per beat".to_string(),
                    ));
                }

                let mut tempos: Vec<(u64, u32)> = Vec::new();
                let mut track_start = 0;
                for events in smf.tracks.iter() {
                    let mut tick = track_start;
                    for event in events.iter() {
                        tick += u64::from(event.delta.as_int());
                        if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                            tempos.push((tick, tempo.as_int()));
                        }
                    }
                    if smf.header.format == Format::Sequential {
                        track_start = tick;
                    }
                }
                tempos.sort_by_key(|(tick, _)| *tick);

                let mut map = TempoMap::Metrical {
                    ticks_per_beat: f64::from(ticks_per_beat),
                    changes: vec![TempoChange {
                        tick: 0,
                        seconds: 0.0,
                        micros_per_beat: DEFAULT_MICROS_PER_BEAT,
                    }],
                };
                for (tick, micros_per_beat) in tempos {
                    map.push_change(tick, f64::from(micros_per_beat));
                }
                Ok(map)
            }
            Timing::Timecode(fps, subframes) => {
                let frames = match fps {
                    Fps::Fps24 => 24.0,
                    Fps::Fps25 => 25.0,
                    Fps::Fps29 => 29.97,
                    Fps::Fps30 => 30.0,
                };
                if subframes == 0 {
                    return Err(DecodeError::UnsupportedTiming(
                        "zero subframes per frame".to_string(),
                    ));
                }
                Ok(TempoMap::Timecode {
                    ticks_per_second: frames * f64::from(subframes),
                })
            }
        }
    }

    fn push_change(&mut self, tick: u64, micros_per_beat: f64) {
        let seconds = self.seconds_at(tick);
        if let TempoMap::Metrical { changes, .. } = self {
            // A later change at the same tick wins.
            if let Some(last) = changes.last_mut() {
                if last.tick == tick {
                    last.micros_per_beat = micros_per_beat;
                    return;
                }
            }
            changes.push(TempoChange {
                tick,
                seconds,
                micros_per_beat,
            });
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        match self {
            TempoMap::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
            TempoMap::Metrical {
                ticks_per_beat,
                changes,
            } => {
                let index = changes.partition_point(|change| change.tick <= tick);
                let change = &changes[index.saturating_sub(1)];
                let beats = (tick - change.tick) as f64 / ticks_per_beat;
                change.seconds + beats * change.micros_per_beat / 1_000_000.0
            }
        }
    }
}
