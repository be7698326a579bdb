use crate::{
    config::Config,
    core::{
        merge::combine_midi_files,
        separator::{separate_stems, SeparationModel},
        transcriber::Transcriber,
    },
    error::Result,
    io::progress::{emit_batch_progress, BatchProgress, Stage},
    paths::{basic_output_path, combined_output_path, input_stem, stem_output_path},
    scan::{basic_outputs, find_inputs, pending_inputs, stem_outputs, Scan},
    types::{BatchReport, FileOutcome, FileReport},
};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::Builder;

/// Inputs that still need basic-mode transcription.
pub fn scan_basic(config: &Config) -> Result<Scan> {
    let inputs = find_inputs(&config.input_dir, &config.extensions)?;
    Ok(pending_inputs(inputs, |input| {
        basic_outputs(&config.output_dir, input)
    }))
}

/// Inputs missing at least one of their four stem transcriptions.
pub fn scan_stems(config: &Config) -> Result<Scan> {
    let inputs = find_inputs(&config.input_dir, &config.extensions)?;
    Ok(pending_inputs(inputs, |input| {
        stem_outputs(&config.output_dir, input)
    }))
}

/// Transcribe every pending input directly.
///
/// Only setup failures are returned as errors; per-file failures are
/// recorded in the report and the batch moves on.
pub fn run_basic<T>(config: &Config, transcriber: &T) -> Result<BatchReport>
where
    T: Transcriber + ?Sized,
{
    fs::create_dir_all(&config.output_dir)?;
    let scan = scan_basic(config)?;
    let total = scan.pending.len();
    let mut report = start_report(config, total, scan.done);

    for (index, input) in scan.pending.iter().enumerate() {
        emit_batch_progress(BatchProgress::FileStarted { index, total, input });
        tracing::info!("Processing: {}", input.display());

        let outcome = match transcriber.transcribe(input, &config.output_dir) {
            Ok(()) => {
                tracing::info!("Successfully converted: {}", input.display());
                FileOutcome::Converted {
                    outputs: vec![basic_output_path(&config.output_dir, input)],
                }
            }
            Err(failure) => {
                tracing::error!("Error processing {failure}");
                FileOutcome::TranscriptionFailed {
                    failures: vec![failure],
                }
            }
        };
        finish_file(&mut report, input, outcome);
    }

    Ok(report)
}

/// Separate each pending input into stems, transcribe every stem, and merge
/// the transcriptions when `config.combine` is set.
pub fn run_stems<M, T>(config: &Config, model: &M, transcriber: &T) -> Result<BatchReport>
where
    M: SeparationModel + ?Sized,
    T: Transcriber + ?Sized,
{
    fs::create_dir_all(&config.output_dir)?;
    let temp_root = config.temp_root();
    let owns_temp_root = !temp_root.exists();
    fs::create_dir_all(&temp_root)?;

    let scan = scan_stems(config)?;
    let total = scan.pending.len();
    let mut report = start_report(config, total, scan.done);

    for (index, input) in scan.pending.iter().enumerate() {
        emit_batch_progress(BatchProgress::FileStarted { index, total, input });
        tracing::info!("Processing: {}", input.display());

        let outcome = process_stems(config, model, transcriber, input, &temp_root);
        finish_file(&mut report, input, outcome);
    }

    // Only succeeds once every per-input directory is gone.
    if owns_temp_root {
        fs::remove_dir(&temp_root).ok();
    }

    Ok(report)
}

fn process_stems<M, T>(
    config: &Config,
    model: &M,
    transcriber: &T,
    input: &Path,
    temp_root: &Path,
) -> FileOutcome
where
    M: SeparationModel + ?Sized,
    T: Transcriber + ?Sized,
{
    // Removed on drop, so every early return below cleans up too.
    let stems_dir = match Builder::new()
        .prefix(&format!("{}-", input_stem(input)))
        .tempdir_in(temp_root)
    {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!("Error processing {}: {e}", input.display());
            return FileOutcome::Failed {
                message: e.to_string(),
            };
        }
    };

    emit_batch_progress(BatchProgress::Stage(Stage::Separate));
    tracing::info!("Separating stems for: {}", input.display());
    let stems = match separate_stems(model, input, stems_dir.path()) {
        Ok(stems) => stems,
        Err(e) => {
            tracing::error!("Error separating {}: {e}", input.display());
            return FileOutcome::SeparationFailed {
                message: e.to_string(),
            };
        }
    };

    emit_batch_progress(BatchProgress::Stage(Stage::Transcribe));
    let mut outputs = Vec::new();
    let mut failures = Vec::new();
    let mut midi_files = Vec::with_capacity(stems.len());

    for audio in &stems {
        tracing::info!("Converting {} stem to MIDI", audio.stem);
        let expected = stem_output_path(&config.output_dir, input, &audio.stem);
        midi_files.push((audio.stem.clone(), expected.clone()));

        match transcriber.transcribe(&audio.path, &config.output_dir) {
            Ok(()) => {
                tracing::info!("Successfully converted {} stem", audio.stem);
                outputs.push(expected);
            }
            Err(failure) => {
                tracing::error!("Error processing {} stem: {failure}", audio.stem);
                failures.push(failure);
            }
        }
    }
    let transcribed = outputs.len();

    if config.combine {
        emit_batch_progress(BatchProgress::Stage(Stage::Combine));
        tracing::info!("Combining MIDI files...");
        let combined = combined_output_path(&config.output_dir, input);
        match combine_midi_files(&midi_files, &combined, &config.merge) {
            Ok(summary) => outputs.push(summary.output),
            Err(e) => {
                tracing::error!("Error combining {}: {e}", input.display());
                return FileOutcome::Failed {
                    message: e.to_string(),
                };
            }
        }
    }

    if let Err(e) = stems_dir.close() {
        tracing::warn!("Failed to remove temporary stems: {e}");
    }

    if failures.is_empty() {
        FileOutcome::Converted { outputs }
    } else if transcribed > 0 {
        FileOutcome::PartiallyConverted { outputs, failures }
    } else {
        FileOutcome::TranscriptionFailed { failures }
    }
}

fn start_report(config: &Config, pending: usize, done: Vec<PathBuf>) -> BatchReport {
    emit_batch_progress(BatchProgress::Scanned {
        pending,
        done: done.len(),
    });
    if pending == 0 && done.is_empty() {
        tracing::info!("No input files found in {}", config.input_dir.display());
    } else if pending == 0 {
        tracing::info!("No new files to process");
    } else {
        tracing::info!("Found {pending} new file(s) to process");
    }
    BatchReport {
        skipped: done,
        files: Vec::new(),
    }
}

fn finish_file(report: &mut BatchReport, input: &Path, outcome: FileOutcome) {
    emit_batch_progress(BatchProgress::FileFinished {
        input,
        success: outcome.is_success(),
    });
    report.files.push(FileReport {
        input: input.to_path_buf(),
        outcome,
    });
}
