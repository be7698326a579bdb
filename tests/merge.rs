use midly::{
    num::{u15, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::tempdir;

use stem_to_midi::{combine_midi_files, MergeOptions, NoteTiming, Stem};

/// Single-track file with one note-on at `tick` and its note-off later.
fn write_single_note(path: &Path, key: u8, tick: u32) {
    let track = vec![
        TrackEvent {
            delta: u28::new(tick),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(100),
                },
            },
        },
        TrackEvent {
            delta: u28::new(300),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                },
            },
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ];
    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(220))),
        tracks: vec![track],
    };
    smf.save(path).unwrap();
}

fn four_stems(dir: &Path) -> Vec<(Stem, PathBuf)> {
    Stem::ALL
        .iter()
        .enumerate()
        .map(|(i, stem)| {
            let path = dir.join(format!("song_{}_basic_pitch.mid", stem.name()));
            write_single_note(&path, 40 + i as u8, 10 * i as u32);
            (stem.clone(), path)
        })
        .collect()
}

fn track_name(events: &[TrackEvent<'_>]) -> String {
    events
        .iter()
        .find_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                Some(String::from_utf8_lossy(name).into_owned())
            }
            _ => None,
        })
        .unwrap_or_default()
}

fn programs(events: &[TrackEvent<'_>]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            TrackEventKind::Midi {
                message: MidiMessage::ProgramChange { program },
                ..
            } => Some(program.as_int()),
            _ => None,
        })
        .collect()
}

fn channels(events: &[TrackEvent<'_>]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            TrackEventKind::Midi { channel, .. } => Some(channel.as_int()),
            _ => None,
        })
        .collect()
}

#[test]
fn four_stems_become_four_mapped_tracks() {
    let tmp = tempdir().unwrap();
    let stems = four_stems(tmp.path());
    let out = tmp.path().join("song_combined.mid");

    let summary = combine_midi_files(&stems, &out, &MergeOptions::default()).unwrap();
    assert_eq!(summary.tracks, Stem::ALL.to_vec());
    assert!(summary.skipped.is_empty());

    let bytes = fs::read(&out).unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    assert_eq!(smf.tracks.len(), 4);
    assert_eq!(smf.header.timing, Timing::Metrical(u15::new(220)));

    let drums = &smf.tracks[0];
    assert_eq!(track_name(drums), "drums");
    assert!(programs(drums).is_empty(), "drums must not change program");
    assert!(channels(drums).iter().all(|&c| c == 9), "drums on channel 10");

    let bass = &smf.tracks[1];
    assert_eq!(track_name(bass), "bass");
    assert_eq!(programs(bass), vec![33]);
    assert!(channels(bass).iter().all(|&c| c == 0));

    let vocals = &smf.tracks[2];
    assert_eq!(programs(vocals), vec![53]);
    assert!(channels(vocals).iter().all(|&c| c == 1));

    let other = &smf.tracks[3];
    assert_eq!(programs(other), vec![0]);
    assert!(channels(other).iter().all(|&c| c == 2));
}

#[test]
fn fixed_timing_writes_hundred_tick_notes_at_onset() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("bass.mid");
    write_single_note(&path, 45, 960);
    let out = tmp.path().join("combined.mid");

    combine_midi_files(&[(Stem::Bass, path)], &out, &MergeOptions::default()).unwrap();

    let bytes = fs::read(&out).unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    let mut tick = 0u32;
    let mut on_off = Vec::new();
    for e in &smf.tracks[0] {
        tick += e.delta.as_int();
        match e.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { .. },
                ..
            } => on_off.push(("on", tick)),
            TrackEventKind::Midi {
                message: MidiMessage::NoteOff { .. },
                ..
            } => on_off.push(("off", tick)),
            _ => {}
        }
    }
    assert_eq!(on_off, vec![("on", 960), ("off", 1060)]);
}

#[test]
fn repeated_key_ends_the_earlier_fixed_note() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("drums.mid");
    let hit = |delta: u32| TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOn {
                key: u7::new(36),
                vel: u7::new(90),
            },
        },
    };
    let track = vec![
        hit(0),
        hit(40),
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ];
    Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(220))),
        tracks: vec![track],
    }
    .save(&path)
    .unwrap();
    let out = tmp.path().join("combined.mid");

    combine_midi_files(&[(Stem::Drums, path)], &out, &MergeOptions::default()).unwrap();

    let bytes = fs::read(&out).unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    let mut tick = 0u32;
    let mut on_off = Vec::new();
    for e in &smf.tracks[0] {
        tick += e.delta.as_int();
        match e.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { .. },
                ..
            } => on_off.push(("on", tick)),
            TrackEventKind::Midi {
                message: MidiMessage::NoteOff { .. },
                ..
            } => on_off.push(("off", tick)),
            _ => {}
        }
    }
    assert_eq!(on_off, vec![("on", 0), ("off", 40), ("on", 40), ("off", 140)]);
}

#[test]
fn preserve_timing_keeps_note_off() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("vocals.mid");
    write_single_note(&path, 60, 50);
    let out = tmp.path().join("combined.mid");
    let opts = MergeOptions {
        timing: NoteTiming::Preserve,
        ..MergeOptions::default()
    };

    combine_midi_files(&[(Stem::Vocals, path)], &out, &opts).unwrap();

    let bytes = fs::read(&out).unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    let mut tick = 0u32;
    let mut off_at = None;
    for e in &smf.tracks[0] {
        tick += e.delta.as_int();
        if let TrackEventKind::Midi {
            message: MidiMessage::NoteOff { .. },
            ..
        } = e.kind
        {
            off_at = Some(tick);
        }
    }
    assert_eq!(off_at, Some(350));
}

#[test]
fn unknown_stem_overflows_to_channel_five() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("guitar.mid");
    write_single_note(&path, 52, 0);
    let out = tmp.path().join("combined.mid");

    combine_midi_files(
        &[(Stem::from_name("guitar"), path)],
        &out,
        &MergeOptions::default(),
    )
    .unwrap();

    let bytes = fs::read(&out).unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    assert_eq!(track_name(&smf.tracks[0]), "guitar");
    assert!(channels(&smf.tracks[0]).iter().all(|&c| c == 4));
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn missing_stem_is_skipped_with_a_warning() {
    let tmp = tempdir().unwrap();
    let stems = four_stems(tmp.path());
    let missing = stems[2].1.clone();
    fs::remove_file(&missing).unwrap();
    let out = tmp.path().join("song_combined.mid");

    let logs = Captured::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let summary = tracing::subscriber::with_default(subscriber, || {
        combine_midi_files(&stems, &out, &MergeOptions::default())
    })
    .unwrap();

    assert_eq!(summary.tracks, vec![Stem::Drums, Stem::Bass, Stem::Other]);
    assert_eq!(summary.skipped, vec![missing.clone()]);

    let bytes = fs::read(&out).unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    assert_eq!(smf.tracks.len(), 3);
    assert_eq!(track_name(&smf.tracks[2]), "other");

    let logged = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(logged.contains("WARN"), "no warning in: {logged}");
    assert!(
        logged.contains(&missing.display().to_string()),
        "warning does not name {}: {logged}",
        missing.display()
    );
}

#[test]
fn no_stems_present_still_writes_a_file() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("empty_combined.mid");
    let stems = vec![(Stem::Drums, tmp.path().join("nope.mid"))];

    let summary = combine_midi_files(&stems, &out, &MergeOptions::default()).unwrap();
    assert!(summary.tracks.is_empty());

    let bytes = fs::read(&out).unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    assert!(smf.tracks.is_empty());
}

#[test]
fn garbage_input_is_a_midi_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("bad.mid");
    fs::write(&path, b"not a midi file").unwrap();
    let out = tmp.path().join("combined.mid");

    let err = combine_midi_files(&[(Stem::Bass, path)], &out, &MergeOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("bad.mid"));
}
