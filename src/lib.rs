//! # stem-to-midi
//!
//! Batch transcription of a directory of audio files to MIDI. Each input is
//! either handed straight to the pitch tool, or first separated into
//! drums/bass/vocals/other stems whose transcriptions are merged into one
//! multi-track file.

pub mod audio;
pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod scan;
pub mod types;

pub use crate::{
    config::{load_config, Config, SeparatorBackend},
    core::{
        merge::{combine_midi_files, MergeOptions, MergeSummary, NoteTiming},
        separator::{
            build_model, separate_stems, separate_waveform, CommandModel, OrtModel, SeparationModel,
        },
        transcriber::{BasicPitch, Transcriber},
    },
    error::{ConvertError, Result},
    io::progress::{set_batch_progress_callback, BatchProgress, Stage},
    pipeline::{run_basic, run_stems, scan_basic, scan_stems},
    types::{
        AudioData, BatchReport, FileOutcome, FileReport, ModelManifest, Stem, StemAudio,
        ToolFailure,
    },
};
