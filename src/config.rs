//! Batch configuration: directories, external tools and merge behavior.
//!
//! Every field has a default, so a partial TOML file (or none at all) is
//! valid.

use crate::error::{ConvertError, Result};
use crate::core::merge::MergeOptions;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub const LOCAL_CONFIG_FILE: &str = "stem-to-midi.toml";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Root for per-input temporary stem directories. Defaults to
    /// `<output_dir>/temp_stems`.
    pub temp_dir: Option<PathBuf>,
    /// Input extensions, matched case-insensitively.
    pub extensions: Vec<String>,
    /// Merge the stem transcriptions into `<stem>_combined.mid`.
    pub combine: bool,
    pub log_level: String,
    pub transcriber: TranscriberConfig,
    pub separator: SeparatorConfig,
    pub merge: MergeOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: "data".into(),
            output_dir: "out".into(),
            temp_dir: None,
            extensions: vec!["mp3".into()],
            combine: true,
            log_level: "info".into(),
            transcriber: TranscriberConfig::default(),
            separator: SeparatorConfig::default(),
            merge: MergeOptions::default(),
        }
    }
}

impl Config {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("temp_stems"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    pub program: String,
    /// Extra arguments placed before `<output-dir> <input>`.
    pub args: Vec<String>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            program: "basic-pitch".into(),
            args: Vec::new(),
        }
    }
}

/// Which [`SeparationModel`](crate::core::separator::SeparationModel) stem mode uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparatorBackend {
    /// In-process ONNX Runtime inference.
    #[default]
    Onnx,
    /// An external runner program.
    Command,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    pub backend: SeparatorBackend,
    /// Model name, looked up in `models` when no `manifest_url` is given.
    pub model: String,
    /// Local `.onnx` file; skips the manifest and download entirely.
    pub model_path: Option<PathBuf>,
    pub manifest_url: Option<String>,
    /// Downloaded models. Defaults to the user cache dir.
    pub cache_dir: Option<PathBuf>,
    /// Frames between inference windows. Defaults to the manifest hop, or
    /// one full window for a local model.
    pub hop: Option<usize>,
    /// Source order of a local model or the runner. A downloaded model
    /// brings its own.
    pub sources: Vec<String>,
    /// Runner for the `command` backend.
    pub program: Option<String>,
    pub args: Vec<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Model name to manifest URL.
    pub models: BTreeMap<String, String>,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            backend: SeparatorBackend::Onnx,
            model: "htdemucs".into(),
            model_path: None,
            manifest_url: None,
            cache_dir: None,
            hop: None,
            sources: vec![
                "drums".into(),
                "bass".into(),
                "other".into(),
                "vocals".into(),
            ],
            program: None,
            args: Vec::new(),
            sample_rate: 44_100,
            channels: 2,
            models: BTreeMap::new(),
        }
    }
}

/// Config files to try, in order: the CLI path if given, otherwise the local
/// file and then the user config file.
pub fn config_candidates(cli_path: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = cli_path {
        return vec![path.to_path_buf()];
    }

    let mut files = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dirs) = directories::ProjectDirs::from("dev", "StemToMidi", "stem-to-midi") {
        files.push(dirs.config_dir().join("config.toml"));
    }
    files
}

/// Load the first existing candidate, or defaults when none exists.
///
/// A path passed explicitly must exist.
pub fn load_config(cli_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = cli_path {
        return load_from_file(path);
    }

    match config_candidates(None).into_iter().find(|p| p.exists()) {
        Some(path) => load_from_file(&path),
        None => Ok(Config::default()),
    }
}

pub fn load_from_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConvertError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_config(&contents, path)
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConvertError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
