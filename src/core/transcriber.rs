use crate::{config::TranscriberConfig, types::ToolFailure};
use std::{
    ffi::OsString,
    path::Path,
    process::{Command, Stdio},
};

/// Audio → MIDI transcription into a directory.
pub trait Transcriber {
    fn transcribe(&self, audio: &Path, output_dir: &Path) -> Result<(), ToolFailure>;
}

/// The `basic-pitch` command-line tool, run as
/// `<program> [args...] <output-dir> <input-audio>`.
pub struct BasicPitch {
    program: OsString,
    args: Vec<OsString>,
}

impl BasicPitch {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn from_config(cfg: &TranscriberConfig) -> Self {
        Self {
            program: cfg.program.clone().into(),
            args: cfg.args.iter().map(OsString::from).collect(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Transcriber for BasicPitch {
    fn transcribe(&self, audio: &Path, output_dir: &Path) -> Result<(), ToolFailure> {
        tracing::debug!(program = ?self.program, audio = %audio.display(), "running pitch tool");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(output_dir)
            .arg(audio)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ToolFailure {
                audio: audio.to_path_buf(),
                status: None,
                stderr: format!("Failed to run {:?}: {e}", self.program),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ToolFailure {
                audio: audio.to_path_buf(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
