use serde::Deserialize;
use std::{fmt, path::PathBuf};

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One isolated component of a mix, as named by the separation model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stem {
    Drums,
    Bass,
    Vocals,
    Other,
    Unknown(String),
}

impl Stem {
    /// The four stems every stem-mode input is expected to produce.
    pub const ALL: [Stem; 4] = [Stem::Drums, Stem::Bass, Stem::Vocals, Stem::Other];

    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "drums" => Stem::Drums,
            "bass" => Stem::Bass,
            "vocals" => Stem::Vocals,
            "other" => Stem::Other,
            _ => Stem::Unknown(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Stem::Drums => "drums",
            Stem::Bass => "bass",
            Stem::Vocals => "vocals",
            Stem::Other => "other",
            Stem::Unknown(name) => name,
        }
    }

    /// Zero-based MIDI channel. Drums sit on channel 10 (index 9); unknown
    /// stems overflow to the index after the four mapped stems.
    pub fn channel(&self) -> u8 {
        match self {
            Stem::Drums => 9,
            Stem::Bass => 0,
            Stem::Vocals => 1,
            Stem::Other => 2,
            Stem::Unknown(_) => Stem::ALL.len() as u8,
        }
    }

    /// General MIDI program, or `None` for the percussion channel.
    pub fn program(&self) -> Option<u8> {
        match self {
            Stem::Drums => None,
            Stem::Bass => Some(33),   // Electric Bass (finger)
            Stem::Vocals => Some(53), // Voice Oohs
            Stem::Other | Stem::Unknown(_) => Some(0),
        }
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A separated stem written to disk, ready for transcription.
#[derive(Clone, Debug)]
pub struct StemAudio {
    pub stem: Stem,
    pub path: PathBuf,
}

/// The pitch tool exited non-zero or could not be started.
#[derive(Clone, Debug)]
pub struct ToolFailure {
    pub audio: PathBuf,
    /// Exit code, `None` when the process never ran or was killed by a signal.
    pub status: Option<i32>,
    pub stderr: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(
                f,
                "{} (exit {}): {}",
                self.audio.display(),
                code,
                self.stderr.trim()
            ),
            None => write!(f, "{}: {}", self.audio.display(), self.stderr.trim()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum FileOutcome {
    Converted {
        outputs: Vec<PathBuf>,
    },
    /// Some stems transcribed, others failed.
    PartiallyConverted {
        outputs: Vec<PathBuf>,
        failures: Vec<ToolFailure>,
    },
    TranscriptionFailed {
        failures: Vec<ToolFailure>,
    },
    SeparationFailed {
        message: String,
    },
    Failed {
        message: String,
    },
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Converted { .. })
    }
}

#[derive(Clone, Debug)]
pub struct FileReport {
    pub input: PathBuf,
    pub outcome: FileOutcome,
}

/// Result of one batch run. Per-file failures never abort the batch; they
/// land here instead.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    /// Inputs whose expected outputs already existed.
    pub skipped: Vec<PathBuf>,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn converted(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.outcome.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.files.iter().all(|f| f.outcome.is_success())
    }
}

/// Published description of a separation model and where to fetch it.
#[derive(Clone, Debug, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub backend: String,
    pub sample_rate: u32,
    /// Frames per inference window.
    pub window: usize,
    /// Frames between window starts.
    pub hop: usize,
    /// Source names, in model output order.
    pub stems: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<ModelArtifact>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelArtifact {
    pub file: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

impl ModelManifest {
    /// The ONNX file if there is one, otherwise the first artifact.
    pub fn resolve_primary_artifact(&self) -> Result<&ModelArtifact, String> {
        self.artifacts
            .iter()
            .find(|a| a.file.ends_with(".onnx"))
            .or_else(|| self.artifacts.first())
            .ok_or_else(|| format!("manifest `{}` lists no artifacts", self.name))
    }
}
