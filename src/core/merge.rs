//! Merge per-stem transcriptions into one multi-track MIDI file.
//!
//! Each stem becomes one track on its fixed channel (see [`Stem::channel`])
//! with its General MIDI program. By default notes are rebuilt from note-ons
//! only, each lasting a fixed number of ticks, and only the first track of
//! every input is read. [`NoteTiming::Preserve`] and
//! [`MergeOptions::all_tracks`] switch to note-off timing and every track.

use crate::{
    error::{ConvertError, Result},
    types::Stem,
};

use anyhow::Context;
use midly::{
    num::{u15, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, VecDeque},
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_PPQ: u16 = 480;
pub const FIXED_NOTE_TICKS: u32 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteTiming {
    /// Every note-on becomes a note of `fixed_duration_ticks`.
    #[default]
    Fixed,
    /// Notes end at their matching note-off.
    Preserve,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    pub timing: NoteTiming,
    /// Note length in fixed mode, and for notes never switched off in
    /// preserve mode.
    pub fixed_duration_ticks: u32,
    /// Read every track of each input instead of only the first.
    pub all_tracks: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            timing: NoteTiming::Fixed,
            fixed_duration_ticks: FIXED_NOTE_TICKS,
            all_tracks: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MergeSummary {
    pub output: PathBuf,
    /// Stems written, in track order.
    pub tracks: Vec<Stem>,
    /// Inputs that did not exist.
    pub skipped: Vec<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Note {
    start: u64,
    end: u64,
    key: u7,
    vel: u7,
}

pub fn combine_midi_files(
    stems: &[(Stem, PathBuf)],
    output: &Path,
    options: &MergeOptions,
) -> Result<MergeSummary> {
    let mut tracks: Vec<Track<'_>> = Vec::new();
    let mut written = Vec::new();
    let mut skipped = Vec::new();
    let mut ppq: Option<u15> = None;

    for (stem, path) in stems {
        if !path.exists() {
            tracing::warn!("MIDI file {} not found, skipping", path.display());
            skipped.push(path.clone());
            continue;
        }

        let bytes =
            fs::read(path).with_context(|| format!("Failed to read MIDI file: {:?}", path))?;
        let smf = Smf::parse(&bytes).map_err(|e| ConvertError::Midi {
            path: path.clone(),
            message: e.to_string(),
        })?;

        if ppq.is_none() {
            if let Timing::Metrical(t) = smf.header.timing {
                ppq = Some(t);
            }
        }

        let notes = collect_notes(&smf, options);
        tracing::debug!(stem = %stem, notes = notes.len(), "merging {}", path.display());
        tracks.push(build_track(stem, &notes));
        written.push(stem.clone());
    }

    let header = Header::new(
        Format::Parallel,
        Timing::Metrical(ppq.unwrap_or(u15::new(DEFAULT_PPQ))),
    );
    let smf = Smf { header, tracks };
    smf.save(output)
        .with_context(|| format!("Failed to write combined MIDI: {:?}", output))?;

    tracing::info!(
        tracks = written.len(),
        skipped = skipped.len(),
        "combined MIDI file saved to {}",
        output.display()
    );

    Ok(MergeSummary {
        output: output.to_path_buf(),
        tracks: written,
        skipped,
    })
}

fn collect_notes(smf: &Smf<'_>, options: &MergeOptions) -> Vec<Note> {
    let read = if options.all_tracks {
        smf.tracks.len()
    } else {
        smf.tracks.len().min(1)
    };
    let dur = options.fixed_duration_ticks as u64;
    let mut notes = Vec::new();

    for track in &smf.tracks[..read] {
        let mut tick = 0u64;
        let mut open: BTreeMap<(u8, u8), VecDeque<(u64, u7)>> = BTreeMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => match options.timing {
                    NoteTiming::Fixed => notes.push(Note {
                        start: tick,
                        end: tick + dur,
                        key,
                        vel,
                    }),
                    NoteTiming::Preserve => {
                        open
                            .entry((channel.as_int(), key.as_int()))
                            .or_default()
                            .push_back((tick, vel))
                    }
                },
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    if options.timing == NoteTiming::Preserve {
                        let pending = open
                            .get_mut(&(channel.as_int(), key.as_int()))
                            .and_then(|q| q.pop_front());
                        if let Some((start, vel)) = pending {
                            notes.push(Note {
                                start,
                                end: tick,
                                key,
                                vel,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        // Hanging notes
        for ((_, key), queue) in open {
            for (start, vel) in queue {
                notes.push(Note {
                    start,
                    end: start + dur,
                    key: u7::new(key),
                    vel,
                });
            }
        }
    }

    untangle(&mut notes);
    notes
}

/// All notes of a stem share one channel, so a note still sounding when the
/// same key starts again is cut at the new onset. Notes left without any
/// length are dropped. The result is ordered by start tick.
fn untangle(notes: &mut Vec<Note>) {
    notes.sort_by_key(|n| (n.key.as_int(), n.start, n.end));
    for i in 1..notes.len() {
        let next = notes[i];
        let prev = &mut notes[i - 1];
        if prev.key == next.key && prev.end > next.start {
            prev.end = next.start;
        }
    }
    notes.retain(|n| n.end > n.start);
    notes.sort_by_key(|n| (n.start, n.key.as_int(), n.end));
}

fn build_track<'a>(stem: &'a Stem, notes: &[Note]) -> Track<'a> {
    let channel = u4::new(stem.channel());

    // Note-offs sort ahead of note-ons on the same tick.
    let mut timed: Vec<(u64, u8, MidiMessage)> = Vec::with_capacity(notes.len() * 2);
    for n in notes {
        timed.push((
            n.end,
            0,
            MidiMessage::NoteOff {
                key: n.key,
                vel: u7::new(0),
            },
        ));
        timed.push((
            n.start,
            1,
            MidiMessage::NoteOn {
                key: n.key,
                vel: n.vel,
            },
        ));
    }
    timed.sort_by_key(|(tick, order, _)| (*tick, *order));

    let mut track = vec![TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(stem.name().as_bytes())),
    }];
    if let Some(program) = stem.program() {
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(program),
                },
            },
        });
    }

    let max_delta = (1u64 << 28) - 1;
    let mut last = 0u64;
    for (tick, _, message) in timed {
        let delta = (tick - last).min(max_delta) as u32;
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
        last = tick;
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}
